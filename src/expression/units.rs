//! Physical units understood by expressions and channel configurations.
//!
//! Only the units a sequencer channel is realistically configured with are supported.
//! Every unit belongs to a [`Dimension`] and converts to its base unit with a scale factor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Value;
use crate::instruction::Scalar;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("unknown unit '{0}'")]
    Unknown(String),

    #[error("cannot convert from {from} to {to}")]
    Incompatible { from: Unit, to: Unit },

    #[error("expected a value in {unit}, got {value}")]
    MissingUnit { unit: Unit, value: String },

    #[error("expected a dimensionless value, got {value}")]
    UnexpectedUnit { value: String },

    #[error("expected a numeric value, got {value}")]
    NotNumeric { value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Time,
    Frequency,
    Voltage,
    Current,
    Power,
    /// Logarithmic ratio, treated as dimensionless.
    Decibel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Unit {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
    Hertz,
    Kilohertz,
    Megahertz,
    Gigahertz,
    Volt,
    Millivolt,
    Ampere,
    Milliampere,
    Watt,
    Milliwatt,
    Decibel,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Second => "s",
            Unit::Millisecond => "ms",
            Unit::Microsecond => "us",
            Unit::Nanosecond => "ns",
            Unit::Hertz => "Hz",
            Unit::Kilohertz => "kHz",
            Unit::Megahertz => "MHz",
            Unit::Gigahertz => "GHz",
            Unit::Volt => "V",
            Unit::Millivolt => "mV",
            Unit::Ampere => "A",
            Unit::Milliampere => "mA",
            Unit::Watt => "W",
            Unit::Milliwatt => "mW",
            Unit::Decibel => "dB",
        }
    }

    pub fn dimension(self) -> Dimension {
        match self {
            Unit::Second | Unit::Millisecond | Unit::Microsecond | Unit::Nanosecond => {
                Dimension::Time
            }
            Unit::Hertz | Unit::Kilohertz | Unit::Megahertz | Unit::Gigahertz => {
                Dimension::Frequency
            }
            Unit::Volt | Unit::Millivolt => Dimension::Voltage,
            Unit::Ampere | Unit::Milliampere => Dimension::Current,
            Unit::Watt | Unit::Milliwatt => Dimension::Power,
            Unit::Decibel => Dimension::Decibel,
        }
    }

    /// Size of one of this unit in its base unit.
    pub fn scale(self) -> f64 {
        match self {
            Unit::Second | Unit::Hertz | Unit::Volt | Unit::Ampere | Unit::Watt => 1.0,
            Unit::Decibel => 1.0,
            Unit::Millisecond | Unit::Millivolt | Unit::Milliampere | Unit::Milliwatt => 1e-3,
            Unit::Microsecond => 1e-6,
            Unit::Nanosecond => 1e-9,
            Unit::Kilohertz => 1e3,
            Unit::Megahertz => 1e6,
            Unit::Gigahertz => 1e9,
        }
    }

    /// The SI base unit of this unit's dimension.
    pub fn base(self) -> Unit {
        match self.dimension() {
            Dimension::Time => Unit::Second,
            Dimension::Frequency => Unit::Hertz,
            Dimension::Voltage => Unit::Volt,
            Dimension::Current => Unit::Ampere,
            Dimension::Power => Unit::Watt,
            Dimension::Decibel => Unit::Decibel,
        }
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "s" => Unit::Second,
            "ms" => Unit::Millisecond,
            "us" | "µs" | "μs" => Unit::Microsecond,
            "ns" => Unit::Nanosecond,
            "Hz" => Unit::Hertz,
            "kHz" => Unit::Kilohertz,
            "MHz" => Unit::Megahertz,
            "GHz" => Unit::Gigahertz,
            "V" => Unit::Volt,
            "mV" => Unit::Millivolt,
            "A" => Unit::Ampere,
            "mA" => Unit::Milliampere,
            "W" => Unit::Watt,
            "mW" => Unit::Milliwatt,
            "dB" => Unit::Decibel,
            other => return Err(UnitError::Unknown(other.to_string())),
        })
    }
}

impl TryFrom<String> for Unit {
    type Error = UnitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> String {
        unit.symbol().to_string()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A magnitude attached to a unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub magnitude: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(magnitude: f64, unit: Unit) -> Self {
        Self { magnitude, unit }
    }

    pub fn to(self, unit: Unit) -> Result<Quantity, UnitError> {
        Ok(Quantity::new(convert_magnitude(self.magnitude, self.unit, unit)?, unit))
    }

    pub fn to_base_units(self) -> Quantity {
        Quantity::new(self.magnitude * self.unit.scale(), self.unit.base())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit)
    }
}

/// Convert a bare magnitude between two units of the same dimension.
///
/// This is a no-op when both units are equal.
pub fn convert_magnitude(magnitude: f64, from: Unit, to: Unit) -> Result<f64, UnitError> {
    if from == to {
        return Ok(magnitude);
    }
    if from.dimension() != to.dimension() {
        return Err(UnitError::Incompatible { from, to });
    }
    Ok(magnitude * from.scale() / to.scale())
}

/// Strip the unit of an evaluated value, expressing it in `unit`.
///
/// Without a unit the value must be a boolean or a plain number. Plain numbers are
/// accepted for decibels.
pub fn magnitude_in_unit(value: &Value, unit: Option<Unit>) -> Result<Scalar, UnitError> {
    match (value, unit) {
        (Value::Bool(b), None) => Ok(Scalar::Bool(*b)),
        (Value::Number(x), None) => Ok(Scalar::F64(*x)),
        (Value::Number(x), Some(Unit::Decibel)) => Ok(Scalar::F64(*x)),
        (Value::Quantity(q), Some(unit)) => Ok(Scalar::F64(q.to(unit)?.magnitude)),
        (Value::Quantity(q), None) if q.unit == Unit::Decibel => Ok(Scalar::F64(q.magnitude)),
        (Value::Quantity(q), None) => Err(UnitError::UnexpectedUnit {
            value: q.to_string(),
        }),
        (Value::Bool(b), Some(_)) => Err(UnitError::NotNumeric {
            value: b.to_string(),
        }),
        (Value::Number(x), Some(unit)) => Err(UnitError::MissingUnit {
            unit,
            value: x.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn parse_symbols() {
        assert_eq!("MHz".parse::<Unit>().unwrap(), Unit::Megahertz);
        assert_eq!("µs".parse::<Unit>().unwrap(), Unit::Microsecond);
        assert!("furlong".parse::<Unit>().is_err());
    }

    #[test]
    fn conversion_within_dimension() {
        assert_approx_eq!(convert_magnitude(2.5, Unit::Millisecond, Unit::Microsecond).unwrap(), 2500.0);
        assert_approx_eq!(convert_magnitude(1.0, Unit::Gigahertz, Unit::Megahertz).unwrap(), 1000.0);
    }

    #[test]
    fn same_unit_is_untouched() {
        let x = 0.1 + 0.2;
        assert_eq!(convert_magnitude(x, Unit::Volt, Unit::Volt).unwrap(), x);
    }

    #[test]
    fn conversion_across_dimensions_fails() {
        assert_eq!(
            convert_magnitude(1.0, Unit::Volt, Unit::Second),
            Err(UnitError::Incompatible {
                from: Unit::Volt,
                to: Unit::Second
            })
        );
    }

    #[test]
    fn base_units() {
        let q = Quantity::new(5.0, Unit::Megahertz).to_base_units();
        assert_eq!(q.unit, Unit::Hertz);
        assert_approx_eq!(q.magnitude, 5e6);
    }

    #[test]
    fn magnitudes() {
        assert_eq!(magnitude_in_unit(&Value::Bool(true), None), Ok(Scalar::Bool(true)));
        assert_eq!(magnitude_in_unit(&Value::Number(2.0), None), Ok(Scalar::F64(2.0)));
        let q = Value::Quantity(Quantity::new(10.0, Unit::Millivolt));
        match magnitude_in_unit(&q, Some(Unit::Volt)) {
            Ok(Scalar::F64(x)) => assert_approx_eq!(x, 0.01),
            other => panic!("unexpected {other:?}"),
        }
        assert!(magnitude_in_unit(&q, None).is_err());
        assert!(magnitude_in_unit(&Value::Number(1.0), Some(Unit::Volt)).is_err());
        assert!(magnitude_in_unit(&Value::Bool(true), Some(Unit::Volt)).is_err());
    }

    #[test]
    fn serde_as_symbol() {
        let yaml = serde_yaml::to_string(&Unit::Milliwatt).unwrap();
        assert_eq!(yaml.trim(), "mW");
        assert_eq!(serde_yaml::from_str::<Unit>("kHz").unwrap(), Unit::Kilohertz);
    }
}
