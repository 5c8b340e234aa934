//! Compact representation of sequencer output.
//!
//! A [`SequencerInstruction`] describes the value output at every tick of a sequencer.
//! Instead of storing every sample it is a tree whose leaves are dense [`Pattern`]s or
//! lazy [`Ramp`]s, and whose inner nodes either join instructions end to end
//! ([`Concatenated`]) or repeat one instruction ([`Repeated`]).
//!
//! Trees are kept normalized by the constructors in this module:
//! - a `Concatenated` has at least two children, none empty and none concatenated,
//!   and adjacent patterns are merged;
//! - a `Repeated` repeats a non-empty, non-repeated instruction at least twice.

pub mod dtype;
mod error;
mod pattern;
mod ramp;
mod stack;

use std::fmt;

pub use dtype::{DType, Field, Sample, Scalar, ScalarKind};
pub use error::InstructionError;
pub use pattern::{Column, Pattern};
pub use ramp::Ramp;
pub use stack::{stack, stack_instructions};

/// A sequence of samples, one per sequencer tick.
#[derive(Debug, Clone, PartialEq)]
pub enum SequencerInstruction {
    Pattern(Pattern),
    Concatenated(Concatenated),
    Repeated(Repeated),
    Ramp(Ramp),
}

/// Instructions played one after the other.
#[derive(Debug, Clone, PartialEq)]
pub struct Concatenated {
    instructions: Vec<SequencerInstruction>,
    /// Cumulative lengths, starting at 0. `bounds[i]..bounds[i + 1]` is covered by child `i`.
    bounds: Vec<usize>,
}

impl Concatenated {
    fn new(instructions: Vec<SequencerInstruction>) -> Self {
        debug_assert!(instructions.len() >= 2);
        debug_assert!(instructions
            .iter()
            .all(|i| !i.is_empty() && !matches!(i, SequencerInstruction::Concatenated(_))));
        let mut bounds = Vec::with_capacity(instructions.len() + 1);
        bounds.push(0);
        for instruction in &instructions {
            let last = bounds[bounds.len() - 1];
            bounds.push(last + instruction.len());
        }
        Self {
            instructions,
            bounds,
        }
    }

    pub fn instructions(&self) -> &[SequencerInstruction] {
        &self.instructions
    }

    pub fn bounds(&self) -> &[usize] {
        &self.bounds
    }

    pub fn len(&self) -> usize {
        self.bounds[self.bounds.len() - 1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the child covering tick `index`.
    fn child_at(&self, index: usize) -> usize {
        self.bounds.partition_point(|&b| b <= index) - 1
    }
}

/// One instruction played several times in a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Repeated {
    repetitions: usize,
    instruction: Box<SequencerInstruction>,
}

impl Repeated {
    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    pub fn instruction(&self) -> &SequencerInstruction {
        &self.instruction
    }

    pub fn len(&self) -> usize {
        self.repetitions * self.instruction.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SequencerInstruction {
    /// Number of ticks covered.
    pub fn len(&self) -> usize {
        match self {
            SequencerInstruction::Pattern(p) => p.len(),
            SequencerInstruction::Concatenated(c) => c.len(),
            SequencerInstruction::Repeated(r) => r.len(),
            SequencerInstruction::Ramp(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &DType {
        match self {
            SequencerInstruction::Pattern(p) => p.dtype(),
            SequencerInstruction::Concatenated(c) => c.instructions[0].dtype(),
            SequencerInstruction::Repeated(r) => r.instruction.dtype(),
            SequencerInstruction::Ramp(r) => r.dtype(),
        }
    }

    /// Number of channels.
    pub fn width(&self) -> usize {
        self.dtype().width()
    }

    /// Nesting depth of the tree, 0 for a pattern.
    pub fn depth(&self) -> usize {
        match self {
            SequencerInstruction::Pattern(_) => 0,
            SequencerInstruction::Concatenated(c) => {
                1 + c.instructions.iter().map(Self::depth).max().unwrap_or(0)
            }
            SequencerInstruction::Repeated(r) => 1 + r.instruction.depth(),
            SequencerInstruction::Ramp(_) => 1,
        }
    }

    /// The sample at `index`. Negative indices count from the end.
    pub fn get(&self, index: isize) -> Result<Sample, InstructionError> {
        let length = self.len();
        let resolved = if index < 0 {
            index + length as isize
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= length {
            return Err(InstructionError::IndexOutOfBounds { index, length });
        }
        Ok(self.sample_at(resolved as usize))
    }

    pub(crate) fn sample_at(&self, index: usize) -> Sample {
        match self {
            SequencerInstruction::Pattern(p) => p.sample(index),
            SequencerInstruction::Concatenated(c) => {
                let child = c.child_at(index);
                c.instructions[child].sample_at(index - c.bounds[child])
            }
            SequencerInstruction::Repeated(r) => r.instruction.sample_at(index % r.instruction.len()),
            SequencerInstruction::Ramp(r) => r.sample(index),
        }
    }

    /// The ticks in `[start, stop)`. Negative bounds count from the end.
    pub fn slice(&self, start: isize, stop: isize) -> Result<Self, InstructionError> {
        self.slice_by(start, stop, 1)
    }

    /// Like [`slice`](Self::slice) with an explicit step. Only a step of 1 is supported.
    pub fn slice_by(&self, start: isize, stop: isize, step: isize) -> Result<Self, InstructionError> {
        if step != 1 {
            return Err(InstructionError::UnsupportedSliceStep { step });
        }
        let start = self.slice_index(start)?;
        let stop = self.slice_index(stop)?;
        if stop <= start {
            return Ok(Pattern::empty(self.dtype()).into());
        }
        Ok(self.sub(start, stop))
    }

    fn slice_index(&self, index: isize) -> Result<usize, InstructionError> {
        let length = self.len();
        let resolved = if index < 0 {
            index + length as isize
        } else {
            index
        };
        if resolved < 0 || resolved as usize > length {
            return Err(InstructionError::SliceOutOfBounds { index, length });
        }
        Ok(resolved as usize)
    }

    /// Sub-instruction over `[start, stop)` with `start < stop <= len`.
    pub(crate) fn sub(&self, start: usize, stop: usize) -> Self {
        debug_assert!(start < stop && stop <= self.len());
        if start == 0 && stop == self.len() {
            return self.clone();
        }
        match self {
            SequencerInstruction::Pattern(p) => p.slice(start, stop).into(),
            SequencerInstruction::Ramp(r) => r.slice(start, stop).into(),
            SequencerInstruction::Concatenated(c) => {
                let first = c.child_at(start);
                let last = c.child_at(stop - 1);
                let parts = (first..=last)
                    .map(|k| {
                        let offset = c.bounds[k];
                        let lo = start.max(offset) - offset;
                        let hi = stop.min(c.bounds[k + 1]) - offset;
                        c.instructions[k].sub(lo, hi)
                    })
                    .collect();
                join(self.dtype(), parts)
            }
            SequencerInstruction::Repeated(r) => {
                let inner = &*r.instruction;
                let n = inner.len();
                let repetition = start / n;
                if repetition == (stop - 1) / n {
                    let offset = repetition * n;
                    return inner.sub(start - offset, stop - offset);
                }
                let first_full = start.div_ceil(n);
                let last_full = stop / n;
                let mut parts = Vec::with_capacity(3);
                if start % n != 0 {
                    parts.push(inner.sub(start % n, n));
                }
                parts.push(inner.repeat(last_full - first_full));
                if stop % n != 0 {
                    parts.push(inner.sub(0, stop % n));
                }
                join(self.dtype(), parts)
            }
        }
    }

    /// Project onto one named channel, keeping the shape of the tree.
    pub fn field(&self, name: &str) -> Result<Self, InstructionError> {
        Ok(match self {
            SequencerInstruction::Pattern(p) => p.field(name)?.into(),
            SequencerInstruction::Ramp(r) => r.field(name)?.into(),
            SequencerInstruction::Concatenated(c) => {
                let parts = c
                    .instructions
                    .iter()
                    .map(|i| i.field(name))
                    .collect::<Result<Vec<_>, _>>()?;
                let dtype = parts[0].dtype().clone();
                join(&dtype, parts)
            }
            SequencerInstruction::Repeated(r) => r.instruction.field(name)?.repeat(r.repetitions),
        })
    }

    /// Cast every sample to `dtype`, keeping the shape of the tree.
    pub fn as_type(&self, dtype: &DType) -> Result<Self, InstructionError> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        Ok(match self {
            SequencerInstruction::Pattern(p) => p.cast(dtype)?.into(),
            SequencerInstruction::Ramp(r) => r.cast(dtype)?.into(),
            SequencerInstruction::Concatenated(c) => {
                let parts = c
                    .instructions
                    .iter()
                    .map(|i| i.as_type(dtype))
                    .collect::<Result<Vec<_>, _>>()?;
                join(dtype, parts)
            }
            SequencerInstruction::Repeated(r) => r.instruction.as_type(dtype)?.repeat(r.repetitions),
        })
    }

    /// Label the only channel of the instruction with `name`.
    pub fn with_name(&self, name: &str) -> Result<Self, InstructionError> {
        let kinds = self.dtype().kinds();
        let [kind] = kinds.as_slice() else {
            return Err(InstructionError::UnsupportedCast {
                from: self.dtype().clone(),
                to: DType::Record(vec![Field::new(name, ScalarKind::F64)]),
            });
        };
        let dtype = DType::Record(vec![Field::new(name, *kind)]);
        Ok(self.relabel(&dtype))
    }

    fn relabel(&self, dtype: &DType) -> Self {
        match self {
            SequencerInstruction::Pattern(p) => p.relabel(dtype.clone()).into(),
            SequencerInstruction::Ramp(r) => r.relabel(dtype.clone()).into(),
            SequencerInstruction::Concatenated(c) => SequencerInstruction::Concatenated(
                Concatenated::new(c.instructions.iter().map(|i| i.relabel(dtype)).collect()),
            ),
            SequencerInstruction::Repeated(r) => SequencerInstruction::Repeated(Repeated {
                repetitions: r.repetitions,
                instruction: Box::new(r.instruction.relabel(dtype)),
            }),
        }
    }

    /// Map every sample through `f`.
    ///
    /// `f` receives dense patterns and must return patterns of the same length. Concatenated
    /// and repeated nodes are mapped child by child; ramps are flattened first.
    pub fn apply<F>(&self, f: &F) -> Result<Self, InstructionError>
    where
        F: Fn(&Pattern) -> Result<Pattern, InstructionError>,
    {
        let map_leaf = |pattern: &Pattern| -> Result<Self, InstructionError> {
            let result = f(pattern)?;
            if result.len() != pattern.len() {
                return Err(InstructionError::LengthMismatch {
                    expected: pattern.len(),
                    actual: result.len(),
                });
            }
            Ok(result.into())
        };
        match self {
            SequencerInstruction::Pattern(p) => map_leaf(p),
            SequencerInstruction::Ramp(r) => map_leaf(&r.to_pattern()),
            SequencerInstruction::Concatenated(c) => {
                let parts = c
                    .instructions
                    .iter()
                    .map(|i| i.apply(f))
                    .collect::<Result<Vec<_>, _>>()?;
                concatenate(&parts)
            }
            SequencerInstruction::Repeated(r) => Ok(r.instruction.apply(f)?.repeat(r.repetitions)),
        }
    }

    /// Materialize every sample.
    pub fn to_pattern(&self) -> Pattern {
        match self {
            SequencerInstruction::Pattern(p) => p.clone(),
            SequencerInstruction::Ramp(r) => r.to_pattern(),
            SequencerInstruction::Concatenated(c) => {
                let patterns: Vec<Pattern> = c.instructions.iter().map(Self::to_pattern).collect();
                let refs: Vec<&Pattern> = patterns.iter().collect();
                Pattern::concat(self.dtype(), &refs)
            }
            SequencerInstruction::Repeated(r) => r.instruction.to_pattern().tile(r.repetitions),
        }
    }

    /// Play this instruction `repetitions` times.
    pub fn repeat(&self, repetitions: usize) -> Self {
        if repetitions == 0 || self.is_empty() {
            return Pattern::empty(self.dtype()).into();
        }
        if repetitions == 1 {
            return self.clone();
        }
        match self {
            SequencerInstruction::Repeated(r) => SequencerInstruction::Repeated(Repeated {
                repetitions: r.repetitions * repetitions,
                instruction: r.instruction.clone(),
            }),
            other => SequencerInstruction::Repeated(Repeated {
                repetitions,
                instruction: Box::new(other.clone()),
            }),
        }
    }

    /// Concatenation of `copies` copies of this instruction.
    ///
    /// Unlike [`repeat`](Self::repeat) this never produces a `Repeated` node at the top.
    pub fn tile(&self, copies: usize) -> Self {
        join(self.dtype(), vec![self.clone(); copies])
    }

    /// A linear ramp over a float or all-float record dtype.
    pub fn ramp_of(
        dtype: &DType,
        start: &Sample,
        stop: &Sample,
        length: usize,
    ) -> Result<Self, InstructionError> {
        if length == 0 {
            if !dtype.is_interpolable() {
                return Err(InstructionError::NotInterpolable {
                    dtype: dtype.clone(),
                });
            }
            return Ok(Pattern::empty(dtype).into());
        }
        let values = |s: &Sample| s.values().iter().map(|v| v.as_f64()).collect();
        Ok(Ramp::new(dtype.clone(), values(start), values(stop), length)?.into())
    }
}

/// A scalar float ramp from `start` to `stop` (excluded) over `length` ticks.
pub fn ramp(start: f64, stop: f64, length: usize) -> SequencerInstruction {
    if length == 0 {
        return Pattern::empty(&DType::F64).into();
    }
    Ramp::scalar(start, stop, length).into()
}

/// Join instructions end to end.
///
/// Operands with different dtypes are widened to their common dtype first.
pub fn concatenate(instructions: &[SequencerInstruction]) -> Result<SequencerInstruction, InstructionError> {
    let (first, rest) = instructions
        .split_first()
        .ok_or(InstructionError::NoInstructions)?;
    let dtype = rest
        .iter()
        .try_fold(first.dtype().clone(), |acc, i| acc.promote(i.dtype()))?;
    let parts = instructions
        .iter()
        .map(|i| i.as_type(&dtype))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(join(&dtype, parts))
}

/// Normalizing concatenation of instructions that already share `dtype`.
fn join(dtype: &DType, parts: Vec<SequencerInstruction>) -> SequencerInstruction {
    let mut merged: Vec<SequencerInstruction> = Vec::with_capacity(parts.len());
    let flat = parts.into_iter().flat_map(|part| match part {
        SequencerInstruction::Concatenated(c) => c.instructions,
        other => vec![other],
    });
    for instruction in flat {
        if instruction.is_empty() {
            continue;
        }
        if let (Some(SequencerInstruction::Pattern(last)), SequencerInstruction::Pattern(next)) =
            (merged.last_mut(), &instruction)
        {
            let joined = Pattern::concat(dtype, &[&*last, next]);
            *last = joined;
            continue;
        }
        merged.push(instruction);
    }
    match merged.len() {
        0 => Pattern::empty(dtype).into(),
        1 => merged.remove(0),
        _ => SequencerInstruction::Concatenated(Concatenated::new(merged)),
    }
}

impl From<Pattern> for SequencerInstruction {
    fn from(pattern: Pattern) -> Self {
        SequencerInstruction::Pattern(pattern)
    }
}

impl From<Ramp> for SequencerInstruction {
    fn from(ramp: Ramp) -> Self {
        SequencerInstruction::Ramp(ramp)
    }
}

impl fmt::Display for SequencerInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerInstruction::Pattern(p) => write!(f, "{p}"),
            SequencerInstruction::Ramp(r) => write!(f, "{r}"),
            SequencerInstruction::Concatenated(c) => {
                for (i, instruction) in c.instructions.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{instruction}")?;
                }
                Ok(())
            }
            SequencerInstruction::Repeated(r) => write!(f, "{} * ({})", r.repetitions, r.instruction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bools(values: &[bool]) -> SequencerInstruction {
        Pattern::from_bools(values.iter().copied()).into()
    }

    fn floats(values: &[f64]) -> SequencerInstruction {
        Pattern::from_f64s(values.iter().copied()).into()
    }

    fn flat_f64(instruction: &SequencerInstruction) -> Vec<f64> {
        instruction.to_pattern().columns()[0]
            .as_f64s()
            .map(<[f64]>::to_vec)
            .unwrap_or_default()
    }

    // ====================================================================
    // Construction and normalization
    // ====================================================================

    #[test]
    fn adjacent_patterns_are_merged() {
        let joined = concatenate(&[floats(&[1.0]), floats(&[2.0, 3.0])]).unwrap();
        assert_eq!(joined, floats(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn empty_operands_are_dropped() {
        let repeated = floats(&[1.0]).repeat(3);
        let joined = concatenate(&[floats(&[]), repeated.clone(), floats(&[])]).unwrap();
        assert_eq!(joined, repeated);
    }

    #[test]
    fn nested_concatenations_are_flattened() {
        let a = floats(&[1.0]).repeat(2);
        let b = floats(&[2.0]);
        let c = floats(&[3.0]).repeat(3);
        let ab = concatenate(&[a.clone(), b.clone()]).unwrap();
        let abc = concatenate(&[ab, c.clone()]).unwrap();
        match &abc {
            SequencerInstruction::Concatenated(cat) => {
                assert_eq!(cat.instructions(), &[a, b, c]);
                assert_eq!(cat.bounds(), &[0, 2, 3, 6]);
            }
            other => panic!("expected concatenation, got {other}"),
        }
    }

    #[test]
    fn concatenate_of_nothing_is_an_error() {
        assert_eq!(concatenate(&[]), Err(InstructionError::NoInstructions));
    }

    #[test]
    fn concatenate_widens_dtypes() {
        let joined = concatenate(&[bools(&[true]), floats(&[2.0])]).unwrap();
        assert_eq!(joined.dtype(), &DType::F64);
        assert_eq!(flat_f64(&joined), vec![1.0, 2.0]);
    }

    #[test]
    fn repeat_special_cases() {
        let a = floats(&[1.0, 2.0]);
        assert!(a.repeat(0).is_empty());
        assert_eq!(a.repeat(1), a);
        let twice = a.repeat(2);
        let six = twice.repeat(3);
        match six {
            SequencerInstruction::Repeated(r) => {
                assert_eq!(r.repetitions(), 6);
                assert_eq!(r.instruction(), &a);
            }
            other => panic!("expected repetition, got {other}"),
        }
    }

    #[test]
    fn depth_counts_nesting() {
        let a = floats(&[1.0]);
        assert_eq!(a.depth(), 0);
        let r = a.repeat(4);
        assert_eq!(r.depth(), 1);
        let c = concatenate(&[r, floats(&[2.0])]).unwrap();
        assert_eq!(c.depth(), 2);
    }

    // ====================================================================
    // Indexing and slicing
    // ====================================================================

    #[test]
    fn index_with_negative_values() {
        let c = concatenate(&[floats(&[1.0, 2.0]).repeat(2), floats(&[5.0])]).unwrap();
        assert_eq!(c.get(3).unwrap(), Sample::scalar(2.0));
        assert_eq!(c.get(-1).unwrap(), Sample::scalar(5.0));
        assert!(matches!(c.get(5), Err(InstructionError::IndexOutOfBounds { .. })));
        assert!(c.get(-6).is_err());
    }

    #[test]
    fn slice_of_repeated_across_repetitions() {
        let r = floats(&[0.0, 1.0, 2.0]).repeat(4);
        let s = r.slice(2, 11).unwrap();
        assert_eq!(flat_f64(&s), vec![2.0, 0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn slice_of_repeated_inside_one_repetition() {
        let r = floats(&[0.0, 1.0, 2.0]).repeat(4);
        assert_eq!(r.slice(4, 6).unwrap(), floats(&[1.0, 2.0]));
    }

    #[test]
    fn slice_with_step_is_unsupported() {
        let p = floats(&[0.0, 1.0, 2.0]);
        assert_eq!(
            p.slice_by(0, 3, 2),
            Err(InstructionError::UnsupportedSliceStep { step: 2 })
        );
    }

    #[test]
    fn slice_out_of_bounds() {
        let p = floats(&[0.0, 1.0, 2.0]);
        assert!(p.slice(0, 4).is_err());
        assert!(p.slice(2, 1).unwrap().is_empty());
        assert_eq!(p.slice(-2, 3).unwrap(), floats(&[1.0, 2.0]));
    }

    #[test]
    fn slice_of_concatenation_spans_children() {
        let c = concatenate(&[floats(&[1.0]).repeat(3), floats(&[2.0]).repeat(3)]).unwrap();
        let s = c.slice(1, 5).unwrap();
        assert_eq!(flat_f64(&s), vec![1.0, 1.0, 2.0, 2.0]);
    }

    // ====================================================================
    // Fields, casts and maps
    // ====================================================================

    #[test]
    fn with_name_then_field_round_trips() {
        let r = floats(&[1.0, 2.0]).repeat(3);
        let named = r.with_name("x").unwrap();
        assert_eq!(named.dtype().names(), Some(vec!["x"]));
        assert_eq!(named.depth(), r.depth());
        let projected = named.field("x").unwrap();
        assert_eq!(projected, named);
    }

    #[test]
    fn field_on_anonymous_is_an_error() {
        assert!(matches!(
            floats(&[1.0]).field("x"),
            Err(InstructionError::NotARecord { .. })
        ));
    }

    #[test]
    fn as_type_keeps_shape() {
        let r = bools(&[true, false]).repeat(3);
        let cast = r.as_type(&DType::F64).unwrap();
        assert!(matches!(cast, SequencerInstruction::Repeated(_)));
        assert_eq!(flat_f64(&cast), vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn ramp_cannot_become_boolean() {
        assert!(ramp(0.0, 1.0, 5).as_type(&DType::BOOL).is_err());
    }

    #[test]
    fn apply_checks_length() {
        let p = floats(&[1.0, 2.0]).repeat(2);
        let doubled = p
            .apply(&|pattern: &Pattern| {
                let values = pattern.columns()[0].as_f64s().unwrap_or_default();
                Ok(Pattern::from_f64s(values.iter().map(|x| x * 2.0)))
            })
            .unwrap();
        assert_eq!(flat_f64(&doubled), vec![2.0, 4.0, 2.0, 4.0]);

        let truncated = p.apply(&|_: &Pattern| Ok(Pattern::from_f64s([0.0])));
        assert!(matches!(truncated, Err(InstructionError::LengthMismatch { .. })));
    }

    // ====================================================================
    // Ramps
    // ====================================================================

    #[test]
    fn ramp_flattens_to_evenly_spaced_values() {
        let r = ramp(0.0, 10.0, 10);
        assert_eq!(flat_f64(&r), (0..10).map(f64::from).collect::<Vec<_>>());
        assert_eq!(r.get(0).unwrap(), Sample::scalar(0.0));
        assert_eq!(r.depth(), 1);
    }

    #[test]
    fn empty_ramp_is_an_empty_pattern() {
        assert_eq!(ramp(0.0, 1.0, 0), floats(&[]));
    }

    #[test]
    fn ramp_slice_stays_lazy() {
        let r = ramp(0.0, 10.0, 10).slice(3, 7).unwrap();
        assert!(matches!(r, SequencerInstruction::Ramp(_)));
        assert_eq!(flat_f64(&r), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn display_forms() {
        let c = concatenate(&[floats(&[1.0, 2.0]).repeat(2), ramp(0.0, 1.0, 2)]).unwrap();
        assert_eq!(c.to_string(), "2 * ([1, 2]) + 0 -2-> 1");
    }
}
