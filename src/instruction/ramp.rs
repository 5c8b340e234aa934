//! Linear ramps stored by their endpoints.

use std::fmt;

use super::dtype::{DType, Sample, Scalar};
use super::error::InstructionError;
use super::pattern::{Column, Pattern};

/// A linear interpolation between two samples over `length` ticks.
///
/// Tick `i` holds `start + i * (stop - start) / length`, so `stop` itself is the value one
/// tick past the end and is never output.
#[derive(Debug, Clone, PartialEq)]
pub struct Ramp {
    dtype: DType,
    start: Vec<f64>,
    stop: Vec<f64>,
    length: usize,
}

impl Ramp {
    /// Build a ramp. The dtype must only contain float channels and `length` must not be 0.
    pub(crate) fn new(
        dtype: DType,
        start: Vec<f64>,
        stop: Vec<f64>,
        length: usize,
    ) -> Result<Self, InstructionError> {
        if !dtype.is_interpolable() {
            return Err(InstructionError::NotInterpolable { dtype });
        }
        let width = dtype.width();
        for actual in [start.len(), stop.len()] {
            if actual != width {
                return Err(InstructionError::SampleWidth {
                    dtype,
                    expected: width,
                    actual,
                });
            }
        }
        debug_assert!(length > 0, "empty ramps are represented as empty patterns");
        Ok(Self {
            dtype,
            start,
            stop,
            length,
        })
    }

    pub(crate) fn scalar(start: f64, stop: f64, length: usize) -> Self {
        Self {
            dtype: DType::F64,
            start: vec![start],
            stop: vec![stop],
            length,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn start(&self) -> Sample {
        Sample::new(self.start.iter().map(|&x| Scalar::F64(x)).collect())
    }

    pub fn stop(&self) -> Sample {
        Sample::new(self.stop.iter().map(|&x| Scalar::F64(x)).collect())
    }

    fn values_at(&self, index: usize) -> Vec<f64> {
        self.start
            .iter()
            .zip(&self.stop)
            .map(|(&a, &b)| a + index as f64 * (b - a) / self.length as f64)
            .collect()
    }

    pub(crate) fn sample(&self, index: usize) -> Sample {
        Sample::new(self.values_at(index).into_iter().map(Scalar::F64).collect())
    }

    /// Sub-ramp over `[start, stop)`; the caller guarantees `start < stop <= len`.
    pub(crate) fn slice(&self, start: usize, stop: usize) -> Ramp {
        let stop_values = if stop == self.length {
            self.stop.clone()
        } else {
            self.values_at(stop)
        };
        Ramp {
            dtype: self.dtype.clone(),
            start: self.values_at(start),
            stop: stop_values,
            length: stop - start,
        }
    }

    pub(crate) fn field(&self, name: &str) -> Result<Ramp, InstructionError> {
        let (index, dtype) = self.dtype.project(name)?;
        Ok(Ramp {
            dtype,
            start: vec![self.start[index]],
            stop: vec![self.stop[index]],
            length: self.length,
        })
    }

    pub(crate) fn cast(&self, dtype: &DType) -> Result<Ramp, InstructionError> {
        self.dtype.check_cast(dtype)?;
        if !dtype.is_interpolable() {
            return Err(InstructionError::UnsupportedCast {
                from: self.dtype.clone(),
                to: dtype.clone(),
            });
        }
        Ok(Ramp {
            dtype: dtype.clone(),
            ..self.clone()
        })
    }

    pub(crate) fn relabel(&self, dtype: DType) -> Ramp {
        Ramp {
            dtype,
            ..self.clone()
        }
    }

    /// Evenly spaced values from `start` (included) to `stop` (excluded).
    pub fn to_pattern(&self) -> Pattern {
        let columns = self
            .start
            .iter()
            .zip(&self.stop)
            .map(|(&a, &b)| {
                let span = b - a;
                let n = self.length as f64;
                Column::F64((0..self.length).map(|i| a + i as f64 * span / n).collect())
            })
            .collect();
        Pattern::from_parts(self.dtype.clone(), columns, self.length)
    }
}

impl fmt::Display for Ramp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -{}-> {}", self.start(), self.length, self.stop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::dtype::{Field, ScalarKind};
    use assert_approx_eq::assert_approx_eq;

    fn scalar(start: f64, stop: f64, length: usize) -> Ramp {
        Ramp::new(DType::F64, vec![start], vec![stop], length).unwrap()
    }

    #[test]
    fn flattens_without_reaching_stop() {
        let ramp = scalar(0.0, 10.0, 10);
        let expected: Vec<f64> = (0..10).map(f64::from).collect();
        assert_eq!(ramp.to_pattern(), Pattern::from_f64s(expected));
    }

    #[test]
    fn sample_matches_flattened_value() {
        let ramp = scalar(-1.0, 2.0, 7);
        let flat = ramp.to_pattern();
        for i in 0..7 {
            assert_approx_eq!(ramp.sample(i).values()[0].as_f64(), flat.sample(i).values()[0].as_f64());
        }
    }

    #[test]
    fn slice_to_end_keeps_stop() {
        let ramp = scalar(0.0, 10.0, 10);
        let tail = ramp.slice(4, 10);
        assert_eq!(tail.len(), 6);
        assert_eq!(tail.start(), Sample::scalar(4.0));
        assert_eq!(tail.stop(), Sample::scalar(10.0));
    }

    #[test]
    fn slice_in_middle_interpolates_stop() {
        let ramp = scalar(0.0, 10.0, 10);
        let middle = ramp.slice(2, 5);
        assert_eq!(middle.to_pattern(), Pattern::from_f64s([2.0, 3.0, 4.0]));
        assert_eq!(middle.stop(), Sample::scalar(5.0));
    }

    #[test]
    fn rejects_boolean_dtype() {
        let result = Ramp::new(DType::BOOL, vec![0.0], vec![1.0], 3);
        assert!(matches!(result, Err(InstructionError::NotInterpolable { .. })));
    }

    #[test]
    fn cast_to_bool_fails() {
        let ramp = scalar(0.0, 1.0, 4);
        assert!(ramp.cast(&DType::BOOL).is_err());
    }

    #[test]
    fn field_projects_endpoints() {
        let dtype = DType::Record(vec![
            Field::new("x", ScalarKind::F64),
            Field::new("y", ScalarKind::F64),
        ]);
        let ramp = Ramp::new(dtype, vec![0.0, 10.0], vec![1.0, 20.0], 5).unwrap();
        let y = ramp.field("y").unwrap();
        assert_eq!(y.start().values(), &[Scalar::F64(10.0)]);
        assert_eq!(y.stop().values(), &[Scalar::F64(20.0)]);
        assert_eq!(y.len(), 5);
    }

    #[test]
    fn display() {
        assert_eq!(scalar(0.0, 1.5, 3).to_string(), "0 -3-> 1.5");
    }
}
