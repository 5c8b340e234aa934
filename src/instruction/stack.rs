//! Merging instructions channel-wise.
//!
//! Stacking dispatches on the shapes of both operands so that concatenations and
//! repetitions survive the merge. Only shapes with no structural counterpart are
//! flattened.

use super::error::InstructionError;
use super::pattern::Pattern;
use super::{join, SequencerInstruction};

/// Combine two instructions of equal length with disjoint named channels.
///
/// The channels of `a` come first in the result.
pub fn stack(
    a: &SequencerInstruction,
    b: &SequencerInstruction,
) -> Result<SequencerInstruction, InstructionError> {
    if a.len() != b.len() {
        return Err(InstructionError::LengthMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let dtype = a.dtype().merge(b.dtype())?;
    if a.is_empty() {
        return Ok(Pattern::empty(&dtype).into());
    }
    use SequencerInstruction as I;
    match (a, b) {
        (I::Pattern(a), I::Pattern(b)) => Ok(Pattern::stack(a, b)?.into()),
        (I::Concatenated(ca), I::Concatenated(cb)) => {
            let bounds = merge_bounds(ca.bounds(), cb.bounds());
            let parts = bounds
                .windows(2)
                .map(|w| stack(&a.sub(w[0], w[1]), &b.sub(w[0], w[1])))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(join(&dtype, parts))
        }
        (I::Concatenated(ca), _) => {
            let parts = ca
                .instructions()
                .iter()
                .zip(ca.bounds().windows(2))
                .map(|(child, w)| stack(child, &b.sub(w[0], w[1])))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(join(&dtype, parts))
        }
        (_, I::Concatenated(cb)) => {
            let parts = cb
                .instructions()
                .iter()
                .zip(cb.bounds().windows(2))
                .map(|(child, w)| stack(&a.sub(w[0], w[1]), child))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(join(&dtype, parts))
        }
        (I::Repeated(ra), I::Repeated(rb)) => {
            let la = ra.instruction().len();
            let lb = rb.instruction().len();
            let period = lcm(la, lb);
            let length = a.len();
            let (block_a, block_b) = if period == length {
                (
                    ra.instruction().tile(period / la),
                    rb.instruction().tile(period / lb),
                )
            } else {
                (
                    ra.instruction().repeat(period / la),
                    rb.instruction().repeat(period / lb),
                )
            };
            let block = stack(&block_a, &block_b)?;
            Ok(block.repeat(length / period))
        }
        _ => Ok(Pattern::stack(&a.to_pattern(), &b.to_pattern())?.into()),
    }
}

/// Stack any number of instructions, left channels first.
///
/// Halves are stacked recursively, which keeps intermediate trees shallow when many
/// channels are merged.
pub fn stack_instructions(
    instructions: &[SequencerInstruction],
) -> Result<SequencerInstruction, InstructionError> {
    match instructions {
        [] => Err(InstructionError::NoInstructions),
        [single] => Ok(single.clone()),
        _ => {
            let (left, right) = instructions.split_at(instructions.len() / 2);
            stack(&stack_instructions(left)?, &stack_instructions(right)?)
        }
    }
}

/// Sorted union of two sets of cumulative bounds.
fn merge_bounds(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        let next = match (a.get(i), b.get(j)) {
            (Some(&x), Some(&y)) if x < y => {
                i += 1;
                x
            }
            (Some(&x), Some(&y)) if y < x => {
                j += 1;
                y
            }
            (Some(&x), Some(_)) => {
                i += 1;
                j += 1;
                x
            }
            (Some(&x), None) => {
                i += 1;
                x
            }
            (None, Some(&y)) => {
                j += 1;
                y
            }
            (None, None) => break,
        };
        if merged.last() != Some(&next) {
            merged.push(next);
        }
    }
    merged
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{concatenate, ramp, Sample, Scalar};

    fn named(values: &[f64], name: &str) -> SequencerInstruction {
        SequencerInstruction::from(Pattern::from_f64s(values.iter().copied()))
            .with_name(name)
            .unwrap()
    }

    fn rows(instruction: &SequencerInstruction) -> Vec<Vec<f64>> {
        instruction
            .to_pattern()
            .samples()
            .map(|s| s.values().iter().map(|v| v.as_f64()).collect())
            .collect()
    }

    #[test]
    fn merge_bounds_deduplicates() {
        assert_eq!(merge_bounds(&[0, 2, 5], &[0, 3, 5]), vec![0, 2, 3, 5]);
    }

    #[test]
    fn lcm_of_periods() {
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(1, 2), 2);
    }

    #[test]
    fn patterns_stack_columns() {
        let s = stack(&named(&[1.0, 2.0], "a"), &named(&[3.0, 4.0], "b")).unwrap();
        assert_eq!(s.dtype().names(), Some(vec!["a", "b"]));
        assert_eq!(rows(&s), vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
    }

    #[test]
    fn repeated_with_different_periods() {
        let a = named(&[1.0], "a").repeat(4);
        let b = named(&[10.0, 20.0], "b").repeat(2);
        let s = stack(&a, &b).unwrap();
        assert_eq!(s.len(), 4);
        assert_eq!(
            rows(&s),
            vec![
                vec![1.0, 10.0],
                vec![1.0, 20.0],
                vec![1.0, 10.0],
                vec![1.0, 20.0]
            ]
        );
        assert!(matches!(s, SequencerInstruction::Repeated(_)));
    }

    #[test]
    fn repeated_with_coprime_periods() {
        let a = named(&[1.0, 2.0], "a").repeat(3);
        let b = named(&[5.0, 6.0, 7.0], "b").repeat(2);
        let s = stack(&a, &b).unwrap();
        assert_eq!(s.field("a").unwrap().to_pattern(), a.to_pattern());
        assert_eq!(s.field("b").unwrap().to_pattern(), b.to_pattern());
    }

    #[test]
    fn concatenations_keep_structure() {
        let a = concatenate(&[named(&[1.0], "a").repeat(3), named(&[2.0], "a").repeat(3)]).unwrap();
        let b = concatenate(&[named(&[5.0], "b").repeat(2), named(&[6.0], "b").repeat(4)]).unwrap();
        let s = stack(&a, &b).unwrap();
        assert!(matches!(s, SequencerInstruction::Concatenated(_)));
        assert_eq!(
            rows(&s),
            vec![
                vec![1.0, 5.0],
                vec![1.0, 5.0],
                vec![1.0, 6.0],
                vec![2.0, 6.0],
                vec![2.0, 6.0],
                vec![2.0, 6.0]
            ]
        );
    }

    #[test]
    fn ramp_against_pattern_is_flattened() {
        let r = ramp(0.0, 4.0, 4).with_name("r").unwrap();
        let s = stack(&r, &named(&[9.0; 4], "p")).unwrap();
        assert_eq!(s.get(2).unwrap(), Sample::new(vec![Scalar::F64(2.0), Scalar::F64(9.0)]));
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let result = stack(&named(&[1.0], "a"), &named(&[1.0, 2.0], "b"));
        assert!(matches!(result, Err(InstructionError::LengthMismatch { .. })));
    }

    #[test]
    fn anonymous_channels_cannot_be_stacked() {
        let anonymous = SequencerInstruction::from(Pattern::from_f64s([1.0]));
        let result = stack(&anonymous, &named(&[1.0], "b"));
        assert_eq!(result, Err(InstructionError::AnonymousChannel));
    }

    #[test]
    fn empty_instructions_stack_to_empty() {
        let s = stack(&named(&[], "a"), &named(&[], "b")).unwrap();
        assert!(s.is_empty());
        assert_eq!(s.width(), 2);
    }

    #[test]
    fn many_channels() {
        let channels: Vec<_> = (0..5)
            .map(|i| named(&[i as f64; 3], &format!("ch {i}")).repeat(2))
            .collect();
        let s = stack_instructions(&channels).unwrap();
        assert_eq!(s.width(), 5);
        assert_eq!(s.len(), 6);
        assert_eq!(
            s.dtype().names(),
            Some(vec!["ch 0", "ch 1", "ch 2", "ch 3", "ch 4"])
        );
        assert!(stack_instructions(&[]).is_err());
    }
}
