//! Dense sample storage, the flattened leaf of an instruction tree.
//!
//! Samples are stored as one [`Column`] per channel (struct-of-arrays), which makes
//! projecting a channel or stacking two patterns a matter of moving columns around.

use std::fmt;

use super::dtype::{DType, Field, Sample, Scalar, ScalarKind};
use super::error::InstructionError;

/// The values of one channel over time.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Bool(Vec<bool>),
    F64(Vec<f64>),
}

impl Column {
    fn empty(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => Column::Bool(Vec::new()),
            ScalarKind::F64 => Column::F64(Vec::new()),
        }
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            Column::Bool(_) => ScalarKind::Bool,
            Column::F64(_) => ScalarKind::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Bool(v) => v.len(),
            Column::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Scalar {
        match self {
            Column::Bool(v) => Scalar::Bool(v[index]),
            Column::F64(v) => Scalar::F64(v[index]),
        }
    }

    fn push(&mut self, value: Scalar) {
        match self {
            Column::Bool(v) => v.push(value.as_bool()),
            Column::F64(v) => v.push(value.as_f64()),
        }
    }

    fn slice(&self, start: usize, stop: usize) -> Column {
        match self {
            Column::Bool(v) => Column::Bool(v[start..stop].to_vec()),
            Column::F64(v) => Column::F64(v[start..stop].to_vec()),
        }
    }

    fn cast(&self, kind: ScalarKind) -> Column {
        match (self, kind) {
            (Column::Bool(v), ScalarKind::Bool) => Column::Bool(v.clone()),
            (Column::F64(v), ScalarKind::F64) => Column::F64(v.clone()),
            (Column::Bool(v), ScalarKind::F64) => {
                Column::F64(v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect())
            }
            (Column::F64(v), ScalarKind::Bool) => Column::Bool(v.iter().map(|&x| x != 0.0).collect()),
        }
    }

    fn extend_from(&mut self, other: &Column) {
        match (self, other) {
            (Column::Bool(a), Column::Bool(b)) => a.extend_from_slice(b),
            (Column::F64(a), Column::F64(b)) => a.extend_from_slice(b),
            (Column::F64(a), Column::Bool(b)) => {
                a.extend(b.iter().map(|&x| if x { 1.0 } else { 0.0 }))
            }
            (Column::Bool(a), Column::F64(b)) => a.extend(b.iter().map(|&x| x != 0.0)),
        }
    }

    fn tile(&self, repetitions: usize) -> Column {
        match self {
            Column::Bool(v) => Column::Bool(v.repeat(repetitions)),
            Column::F64(v) => Column::F64(v.repeat(repetitions)),
        }
    }

    pub fn as_bools(&self) -> Option<&[bool]> {
        match self {
            Column::Bool(v) => Some(v),
            Column::F64(_) => None,
        }
    }

    pub fn as_f64s(&self) -> Option<&[f64]> {
        match self {
            Column::F64(v) => Some(v),
            Column::Bool(_) => None,
        }
    }
}

/// An explicit list of samples, one per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    dtype: DType,
    columns: Vec<Column>,
    length: usize,
}

impl Pattern {
    /// Build a pattern from its columns. Column kinds must match the dtype and all
    /// columns must have the same length.
    pub fn new(dtype: DType, columns: Vec<Column>) -> Result<Self, InstructionError> {
        let kinds = dtype.kinds();
        if kinds.len() != columns.len() || kinds.iter().zip(&columns).any(|(k, c)| *k != c.kind()) {
            return Err(InstructionError::SampleWidth {
                expected: kinds.len(),
                actual: columns.len(),
                dtype,
            });
        }
        let length = columns.first().map(Column::len).unwrap_or(0);
        if let Some(column) = columns.iter().find(|c| c.len() != length) {
            return Err(InstructionError::LengthMismatch {
                expected: length,
                actual: column.len(),
            });
        }
        Ok(Self {
            dtype,
            columns,
            length,
        })
    }

    pub(crate) fn from_parts(dtype: DType, columns: Vec<Column>, length: usize) -> Self {
        debug_assert!(columns.iter().all(|c| c.len() == length));
        Self {
            dtype,
            columns,
            length,
        }
    }

    pub fn from_bools(values: impl IntoIterator<Item = bool>) -> Self {
        let values: Vec<bool> = values.into_iter().collect();
        let length = values.len();
        Self::from_parts(DType::BOOL, vec![Column::Bool(values)], length)
    }

    pub fn from_f64s(values: impl IntoIterator<Item = f64>) -> Self {
        let values: Vec<f64> = values.into_iter().collect();
        let length = values.len();
        Self::from_parts(DType::F64, vec![Column::F64(values)], length)
    }

    /// A pattern with no samples.
    pub fn empty(dtype: &DType) -> Self {
        let columns = dtype.kinds().into_iter().map(Column::empty).collect();
        Self::from_parts(dtype.clone(), columns, 0)
    }

    /// Build a pattern from samples, casting each value to the dtype's kinds.
    pub fn from_samples(dtype: &DType, samples: &[Sample]) -> Result<Self, InstructionError> {
        let mut columns: Vec<Column> = dtype.kinds().into_iter().map(Column::empty).collect();
        for sample in samples {
            if sample.width() != columns.len() {
                return Err(InstructionError::SampleWidth {
                    dtype: dtype.clone(),
                    expected: columns.len(),
                    actual: sample.width(),
                });
            }
            for (column, value) in columns.iter_mut().zip(sample.values()) {
                column.push(*value);
            }
        }
        Ok(Self::from_parts(dtype.clone(), columns, samples.len()))
    }

    /// `length` copies of the same sample.
    pub fn constant(dtype: &DType, sample: &Sample, length: usize) -> Result<Self, InstructionError> {
        Ok(Self::from_samples(dtype, std::slice::from_ref(sample))?.tile(length))
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

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The column of a named channel.
    pub fn column(&self, name: &str) -> Result<&Column, InstructionError> {
        let index = self.dtype.field_index(name)?;
        Ok(&self.columns[index])
    }

    /// Sample at a non-negative index already checked against the length.
    pub(crate) fn sample(&self, index: usize) -> Sample {
        Sample::new(self.columns.iter().map(|c| c.get(index)).collect())
    }

    /// Iterate over all samples in time order.
    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.length).map(move |i| self.sample(i))
    }

    pub(crate) fn slice(&self, start: usize, stop: usize) -> Pattern {
        let columns = self.columns.iter().map(|c| c.slice(start, stop)).collect();
        Self::from_parts(self.dtype.clone(), columns, stop - start)
    }

    pub(crate) fn field(&self, name: &str) -> Result<Pattern, InstructionError> {
        let (index, dtype) = self.dtype.project(name)?;
        Ok(Self::from_parts(
            dtype,
            vec![self.columns[index].clone()],
            self.length,
        ))
    }

    pub(crate) fn cast(&self, dtype: &DType) -> Result<Pattern, InstructionError> {
        self.dtype.check_cast(dtype)?;
        let columns = self
            .columns
            .iter()
            .zip(dtype.kinds())
            .map(|(c, k)| c.cast(k))
            .collect();
        Ok(Self::from_parts(dtype.clone(), columns, self.length))
    }

    /// Join patterns end to end. Values are widened to `dtype`'s kinds.
    pub(crate) fn concat(dtype: &DType, patterns: &[&Pattern]) -> Pattern {
        let mut columns: Vec<Column> = dtype.kinds().into_iter().map(Column::empty).collect();
        let mut length = 0;
        for pattern in patterns {
            for (column, other) in columns.iter_mut().zip(&pattern.columns) {
                column.extend_from(other);
            }
            length += pattern.length;
        }
        Self::from_parts(dtype.clone(), columns, length)
    }

    pub(crate) fn tile(&self, repetitions: usize) -> Pattern {
        let columns = self.columns.iter().map(|c| c.tile(repetitions)).collect();
        Self::from_parts(self.dtype.clone(), columns, self.length * repetitions)
    }

    /// Place the channels of `a` and `b` side by side.
    pub(crate) fn stack(a: &Pattern, b: &Pattern) -> Result<Pattern, InstructionError> {
        if a.length != b.length {
            return Err(InstructionError::LengthMismatch {
                expected: a.length,
                actual: b.length,
            });
        }
        let dtype = a.dtype.merge(&b.dtype)?;
        let columns = a.columns.iter().chain(&b.columns).cloned().collect();
        Ok(Self::from_parts(dtype, columns, a.length))
    }

    /// Give a name to the only channel of an anonymous pattern.
    pub(crate) fn relabel(&self, dtype: DType) -> Pattern {
        Self::from_parts(dtype, self.columns.clone(), self.length)
    }

    pub(crate) fn named_dtype(kind: ScalarKind, name: &str) -> DType {
        DType::Record(vec![Field::new(name, kind)])
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, sample) in self.samples().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{sample}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_column_kinds() {
        let result = Pattern::new(DType::BOOL, vec![Column::F64(vec![1.0])]);
        assert!(result.is_err());
    }

    #[test]
    fn new_checks_column_lengths() {
        let dtype = DType::Record(vec![
            Field::new("a", ScalarKind::Bool),
            Field::new("b", ScalarKind::F64),
        ]);
        let result = Pattern::new(
            dtype,
            vec![Column::Bool(vec![true, false]), Column::F64(vec![1.0])],
        );
        assert!(matches!(result, Err(InstructionError::LengthMismatch { .. })));
    }

    #[test]
    fn concat_widens_values() {
        let a = Pattern::from_bools([true, false]);
        let b = Pattern::from_f64s([2.5]);
        let joined = Pattern::concat(&DType::F64, &[&a, &b]);
        assert_eq!(joined, Pattern::from_f64s([1.0, 0.0, 2.5]));
    }

    #[test]
    fn tile_repeats_columns() {
        let p = Pattern::from_f64s([1.0, 2.0]);
        assert_eq!(p.tile(3), Pattern::from_f64s([1.0, 2.0, 1.0, 2.0, 1.0, 2.0]));
    }

    #[test]
    fn constant_fills_every_tick() {
        let p = Pattern::constant(&DType::F64, &Sample::scalar(true), 3).unwrap();
        assert_eq!(p, Pattern::from_f64s([1.0, 1.0, 1.0]));
    }

    #[test]
    fn from_samples_rejects_wrong_width() {
        let samples = vec![Sample::new(vec![Scalar::Bool(true), Scalar::Bool(false)])];
        assert!(Pattern::from_samples(&DType::BOOL, &samples).is_err());
    }

    #[test]
    fn display_lists_samples() {
        let p = Pattern::from_bools([true, false]);
        assert_eq!(p.to_string(), "[true, false]");
    }
}
