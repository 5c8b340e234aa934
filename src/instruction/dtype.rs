//! Typed sample model: the kind of value a sequencer outputs at each tick.
//!
//! A [`DType`] is either an anonymous scalar (single unnamed channel) or a record
//! of named channels. Samples are stored column-wise in [`Pattern`](super::Pattern),
//! so the dtype only describes the layout; individual values are [`Scalar`]s.

use std::fmt;

use super::error::InstructionError;

/// Kind of a single channel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    F64,
}

impl ScalarKind {
    /// The kind able to represent both `self` and `other` without losing precision.
    pub fn promote(self, other: ScalarKind) -> ScalarKind {
        match (self, other) {
            (ScalarKind::Bool, ScalarKind::Bool) => ScalarKind::Bool,
            _ => ScalarKind::F64,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::Bool => write!(f, "bool"),
            ScalarKind::F64 => write!(f, "f64"),
        }
    }
}

/// A named channel inside a record dtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub kind: ScalarKind,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Layout of the samples of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DType {
    /// One anonymous channel.
    Scalar(ScalarKind),
    /// Ordered, uniquely named channels.
    Record(Vec<Field>),
}

impl DType {
    pub const BOOL: DType = DType::Scalar(ScalarKind::Bool);
    pub const F64: DType = DType::Scalar(ScalarKind::F64);

    /// Build a record dtype, rejecting duplicated channel names.
    pub fn record(fields: Vec<Field>) -> Result<Self, InstructionError> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(InstructionError::OverlappingChannels {
                    channels: vec![field.name.clone()],
                });
            }
        }
        Ok(DType::Record(fields))
    }

    /// Number of channels output at each tick.
    pub fn width(&self) -> usize {
        match self {
            DType::Scalar(_) => 1,
            DType::Record(fields) => fields.len(),
        }
    }

    /// Scalar kinds of the columns, in order.
    pub fn kinds(&self) -> Vec<ScalarKind> {
        match self {
            DType::Scalar(kind) => vec![*kind],
            DType::Record(fields) => fields.iter().map(|f| f.kind).collect(),
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self, DType::Record(_))
    }

    /// Channel names, `None` for an anonymous scalar.
    pub fn names(&self) -> Option<Vec<&str>> {
        match self {
            DType::Scalar(_) => None,
            DType::Record(fields) => Some(fields.iter().map(|f| f.name.as_str()).collect()),
        }
    }

    /// Position of a named channel.
    pub fn field_index(&self, name: &str) -> Result<usize, InstructionError> {
        match self {
            DType::Scalar(_) => Err(InstructionError::NotARecord {
                dtype: self.clone(),
            }),
            DType::Record(fields) => {
                fields
                    .iter()
                    .position(|f| f.name == name)
                    .ok_or_else(|| InstructionError::UnknownField {
                        field: name.to_string(),
                        dtype: self.clone(),
                    })
            }
        }
    }

    /// Position of a named channel and the one-field record projecting onto it.
    pub fn project(&self, name: &str) -> Result<(usize, DType), InstructionError> {
        let index = self.field_index(name)?;
        match self {
            DType::Record(fields) => Ok((index, DType::Record(vec![fields[index].clone()]))),
            DType::Scalar(_) => Err(InstructionError::NotARecord {
                dtype: self.clone(),
            }),
        }
    }

    /// True when every channel is a float, i.e. the dtype can be linearly interpolated.
    pub fn is_interpolable(&self) -> bool {
        self.kinds().iter().all(|k| *k == ScalarKind::F64)
    }

    /// Concatenation of the channels of two records, left channels first.
    ///
    /// Both dtypes must be records and their channel names must be disjoint.
    pub fn merge(&self, other: &DType) -> Result<DType, InstructionError> {
        let (DType::Record(left), DType::Record(right)) = (self, other) else {
            return Err(InstructionError::AnonymousChannel);
        };
        let overlapping: Vec<String> = left
            .iter()
            .filter(|l| right.iter().any(|r| r.name == l.name))
            .map(|f| f.name.clone())
            .collect();
        if !overlapping.is_empty() {
            return Err(InstructionError::OverlappingChannels {
                channels: overlapping,
            });
        }
        Ok(DType::Record(left.iter().chain(right).cloned().collect()))
    }

    /// The common dtype both `self` and `other` can be widened to.
    pub fn promote(&self, other: &DType) -> Result<DType, InstructionError> {
        match (self, other) {
            (DType::Scalar(a), DType::Scalar(b)) => Ok(DType::Scalar(a.promote(*b))),
            (DType::Record(a), DType::Record(b))
                if a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.name == y.name) =>
            {
                Ok(DType::Record(
                    a.iter()
                        .zip(b)
                        .map(|(x, y)| Field::new(x.name.clone(), x.kind.promote(y.kind)))
                        .collect(),
                ))
            }
            _ => Err(InstructionError::IncompatibleDtypes {
                left: self.clone(),
                right: other.clone(),
            }),
        }
    }

    /// Check that samples of `self` can be cast column by column to `target`.
    pub fn check_cast(&self, target: &DType) -> Result<(), InstructionError> {
        if self.width() == target.width() {
            Ok(())
        } else {
            Err(InstructionError::UnsupportedCast {
                from: self.clone(),
                to: target.clone(),
            })
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Scalar(kind) => write!(f, "{kind}"),
            DType::Record(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.kind)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A single channel value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    F64(f64),
}

impl Scalar {
    pub fn kind(self) -> ScalarKind {
        match self {
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::F64(_) => ScalarKind::F64,
        }
    }

    /// Convert to another kind. `F64 -> Bool` is `value != 0`.
    pub fn cast(self, kind: ScalarKind) -> Scalar {
        match (self, kind) {
            (Scalar::Bool(b), ScalarKind::Bool) => Scalar::Bool(b),
            (Scalar::Bool(b), ScalarKind::F64) => Scalar::F64(if b { 1.0 } else { 0.0 }),
            (Scalar::F64(x), ScalarKind::Bool) => Scalar::Bool(x != 0.0),
            (Scalar::F64(x), ScalarKind::F64) => Scalar::F64(x),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Bool(b) => f64::from(u8::from(b)),
            Scalar::F64(x) => x,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Scalar::Bool(b) => b,
            Scalar::F64(x) => x != 0.0,
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::F64(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::F64(x) => write!(f, "{x}"),
        }
    }
}

/// The value of every channel at one tick, in dtype order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    values: Vec<Scalar>,
}

impl Sample {
    pub fn new(values: Vec<Scalar>) -> Self {
        Self { values }
    }

    pub fn scalar(value: impl Into<Scalar>) -> Self {
        Self {
            values: vec![value.into()],
        }
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    /// The only value of a single-channel sample.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self.values.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }
}

impl From<Scalar> for Sample {
    fn from(value: Scalar) -> Self {
        Sample::new(vec![value])
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.values.as_slice() {
            [value] => write!(f, "{value}"),
            values => {
                write!(f, "(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, ")")
            }
        }
    }
}
