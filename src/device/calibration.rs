//! Piecewise-linear calibrations applied to float instructions.
//!
//! The calibration is applied node by node so that repetitions stay repetitions and
//! ramps stay ramps: a ramp is cut where its values cross a calibration point, and each
//! piece maps to another ramp.

use thiserror::Error;

use crate::instruction::{concatenate, ramp, Column, DType, InstructionError, Pattern, SequencerInstruction};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("a calibration needs at least 2 points, got {0}")]
    TooFewPoints(usize),

    #[error("calibration point ({x}, {y}) is not finite")]
    NotFinite { x: f64, y: f64 },

    #[error("cannot calibrate the non-finite value {value}")]
    NonFiniteInput { value: f64 },

    #[error(transparent)]
    Instruction(#[from] InstructionError),
}

/// Linear interpolation between measured `(input, output)` points, clamped to the
/// outputs of the extreme points outside of the measured range.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseLinearCalibration {
    inputs: Vec<f64>,
    outputs: Vec<f64>,
}

impl PiecewiseLinearCalibration {
    /// Points are sorted by input.
    pub fn new(points: &[(f64, f64)]) -> Result<Self, CalibrationError> {
        if points.len() < 2 {
            return Err(CalibrationError::TooFewPoints(points.len()));
        }
        if let Some(&(x, y)) = points.iter().find(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(CalibrationError::NotFinite { x, y });
        }
        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self {
            inputs: sorted.iter().map(|p| p.0).collect(),
            outputs: sorted.iter().map(|p| p.1).collect(),
        })
    }

    pub fn inputs(&self) -> &[f64] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[f64] {
        &self.outputs
    }

    /// Same calibration with every output mapped through `f`.
    pub fn map_outputs(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            inputs: self.inputs.clone(),
            outputs: self.outputs.iter().map(|&y| f(y)).collect(),
        }
    }

    pub fn interpolate(&self, x: f64) -> f64 {
        let last = self.inputs.len() - 1;
        if x <= self.inputs[0] {
            return self.outputs[0];
        }
        if x >= self.inputs[last] {
            return self.outputs[last];
        }
        let upper = self.inputs.partition_point(|&input| input <= x).clamp(1, last);
        let (x0, x1) = (self.inputs[upper - 1], self.inputs[upper]);
        let (y0, y1) = (self.outputs[upper - 1], self.outputs[upper]);
        if x1 == x0 {
            return y1;
        }
        y0 + (x - x0) * (y1 - y0) / (x1 - x0)
    }

    /// Calibrated copy of a single-channel instruction, as floats.
    pub fn apply(&self, instruction: &SequencerInstruction) -> Result<SequencerInstruction, CalibrationError> {
        let instruction = instruction.as_type(&DType::F64)?;
        self.apply_float(&instruction)
    }

    fn apply_float(&self, instruction: &SequencerInstruction) -> Result<SequencerInstruction, CalibrationError> {
        Ok(match instruction {
            SequencerInstruction::Pattern(pattern) => {
                let values = match pattern.columns() {
                    [Column::F64(values)] => values,
                    _ => {
                        return Err(InstructionError::UnsupportedCast {
                            from: pattern.dtype().clone(),
                            to: DType::F64,
                        }
                        .into())
                    }
                };
                let calibrated = values
                    .iter()
                    .map(|&x| self.calibrate(x))
                    .collect::<Result<Vec<_>, _>>()?;
                Pattern::from_f64s(calibrated).into()
            }
            SequencerInstruction::Concatenated(concatenated) => {
                let parts = concatenated
                    .instructions()
                    .iter()
                    .map(|child| self.apply_float(child))
                    .collect::<Result<Vec<_>, _>>()?;
                concatenate(&parts)?
            }
            SequencerInstruction::Repeated(repeated) => self
                .apply_float(repeated.instruction())?
                .repeat(repeated.repetitions()),
            SequencerInstruction::Ramp(r) => {
                let (start, stop) = match (r.start().as_scalar(), r.stop().as_scalar()) {
                    (Some(start), Some(stop)) => (start.as_f64(), stop.as_f64()),
                    _ => {
                        return Err(InstructionError::UnsupportedCast {
                            from: r.dtype().clone(),
                            to: DType::F64,
                        }
                        .into())
                    }
                };
                self.apply_ramp(start, stop, r.len())?
            }
        })
    }

    /// Interpolated value of a finite input.
    fn calibrate(&self, x: f64) -> Result<f64, CalibrationError> {
        if !x.is_finite() {
            return Err(CalibrationError::NonFiniteInput { value: x });
        }
        Ok(self.interpolate(x))
    }

    fn apply_ramp(&self, a: f64, b: f64, length: usize) -> Result<SequencerInstruction, CalibrationError> {
        let a_calibrated = self.calibrate(a)?;
        self.calibrate(b)?;
        if a == b {
            return Ok(SequencerInstruction::from(Pattern::from_f64s([a_calibrated])).repeat(length));
        }
        let at = |i: usize| a + (b - a) * i as f64 / length as f64;

        // Ticks at which the ramp crosses a calibration input, plus both ends.
        let mut cuts: Vec<usize> = self
            .inputs
            .iter()
            .map(|&x| {
                let t = length as f64 * (x - a) / (b - a);
                t.clamp(0.0, length as f64).ceil() as usize
            })
            .chain([0, length])
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut pieces = Vec::with_capacity(cuts.len());
        for window in cuts.windows(2) {
            let (start, stop) = (window[0], window[1]);
            let y0 = self.interpolate(at(start));
            let piece = if stop == start + 1 {
                Pattern::from_f64s([y0]).into()
            } else {
                let n = stop - start;
                let y1 = self.interpolate(at(stop - 1));
                ramp(y0, y0 + n as f64 * (y1 - y0) / (n - 1) as f64, n)
            };
            pieces.push(piece);
        }
        if pieces.is_empty() {
            return Ok(Pattern::empty(&DType::F64).into());
        }
        Ok(concatenate(&pieces)?)
    }
}
