//! Expressions over a namespace of shot variables.
//!
//! An [`Expression`] is a string such as `"2 * mot.detuning + 1 MHz"`, `"t / 10 ms"`,
//! `"enabled and x > 0"` or `"True"`. The numeric kernel is `fasteval`; this module adds
//! what it lacks:
//!
//! - dotted variable names, which are mangled before parsing;
//! - booleans: literals, boolean variables, comparisons and logical operators;
//! - a single optional trailing unit (`"10 ms"`), making the result a [`Quantity`].
//!
//! Quantity variables are substituted by their magnitude in base SI units. Without a
//! trailing unit the result carries the base unit of the quantities it references, so
//! `"2 * duration"` with `duration = 5 ms` evaluates to `0.01 s`.

pub mod units;

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use fasteval::{Compiler, Evaler};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use units::{convert_magnitude, magnitude_in_unit, Dimension, Quantity, Unit, UnitError};

use crate::instruction::Scalar;

/// Name of the implicit time variable of time-dependent lane cells.
pub const TIME_VARIABLE: &str = "t";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("invalid variable name '{name}'")]
    InvalidVariableName { name: String },

    #[error("could not parse <{expression}>: {message}")]
    Parse { expression: String, message: String },

    #[error("variable '{name}' used in <{expression}> is not defined")]
    UndefinedVariable { expression: String, name: String },

    #[error("<{expression}> mixes quantities in {first} and {second}")]
    MixedUnits {
        expression: String,
        first: Unit,
        second: Unit,
    },

    #[error("could not evaluate <{expression}>: {message}")]
    Evaluation { expression: String, message: String },

    #[error(transparent)]
    Unit(#[from] UnitError),
}

/// A variable name made of identifier segments joined by dots, such as `mot.detuning`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DottedVariableName(String);

impl DottedVariableName {
    pub fn new(name: impl Into<String>) -> Result<Self, EvaluationError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.split('.').all(|segment| {
                let mut chars = segment.chars();
                matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
                    && chars.all(|c| c.is_alphanumeric() || c == '_')
            });
        if valid {
            Ok(Self(name))
        } else {
            Err(EvaluationError::InvalidVariableName { name })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Identifier the numeric kernel sees for this name.
    fn mangled(&self) -> String {
        self.0.replace('.', "__")
    }
}

impl Borrow<str> for DottedVariableName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for DottedVariableName {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DottedVariableName {
    type Error = EvaluationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DottedVariableName> for String {
    fn from(name: DottedVariableName) -> String {
        name.0
    }
}

impl fmt::Display for DottedVariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The result of evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Quantity(Quantity),
}

impl Value {
    /// Numeric value in base SI units, booleans as 0 or 1.
    pub fn base_magnitude(self) -> f64 {
        match self {
            Value::Bool(b) => f64::from(u8::from(b)),
            Value::Number(x) => x,
            Value::Quantity(q) => q.to_base_units().magnitude,
        }
    }

    pub fn is_bool(self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn seconds(seconds: f64) -> Self {
        Value::Quantity(Quantity::new(seconds, Unit::Second))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(x) => write!(f, "{x}"),
            Value::Quantity(q) => write!(f, "{q}"),
        }
    }
}

/// Evaluated variables of a shot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableNamespace {
    values: BTreeMap<DottedVariableName, Value>,
}

impl VariableNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: DottedVariableName, value: Value) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DottedVariableName, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(DottedVariableName, Value)> for VariableNamespace {
    fn from_iter<I: IntoIterator<Item = (DottedVariableName, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// An expression as written by the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression {
    body: String,
}

impl Expression {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }

    /// Variables the expression reads, excluding function names.
    pub fn upstream_variables(&self) -> BTreeSet<DottedVariableName> {
        let (body, _) = split_unit(&self.body);
        translate(body).variables.into_values().collect()
    }

    /// Whether the expression reads the implicit time variable.
    pub fn is_time_dependent(&self) -> bool {
        self.upstream_variables()
            .iter()
            .any(|name| name.as_str() == TIME_VARIABLE)
    }

    /// Parse and compile the expression once, for repeated evaluation.
    pub fn compile(&self) -> Result<CompiledExpression, EvaluationError> {
        let (body, unit) = split_unit(&self.body);
        let translation = translate(body);
        if translation.text.trim().is_empty() {
            return Err(EvaluationError::Parse {
                expression: self.body.clone(),
                message: "empty expression".to_string(),
            });
        }
        let mut slab = fasteval::Slab::with_capacity(64.max(2 * translation.text.len()));
        let instruction = fasteval::Parser::new()
            .parse(&translation.text, &mut slab.ps)
            .map_err(|e| EvaluationError::Parse {
                expression: self.body.clone(),
                message: e.to_string(),
            })?
            .from(&slab.ps)
            .compile(&slab.ps, &mut slab.cs);
        let bare = translation.variables.len() == 1
            && translation
                .variables
                .keys()
                .all(|mangled| mangled == translation.text.trim());
        Ok(CompiledExpression {
            source: self.body.clone(),
            slab,
            instruction,
            variables: translation.variables.into_iter().collect(),
            boolean: translation.boolean,
            bare,
            unit,
        })
    }

    pub fn evaluate(&self, variables: &VariableNamespace) -> Result<Value, EvaluationError> {
        self.compile()?.evaluate(variables)
    }

    /// Evaluate and express the result in `unit` (see [`magnitude_in_unit`]).
    pub fn evaluate_magnitude(
        &self,
        variables: &VariableNamespace,
        unit: Option<Unit>,
    ) -> Result<Scalar, EvaluationError> {
        Ok(magnitude_in_unit(&self.evaluate(variables)?, unit)?)
    }
}

impl From<&str> for Expression {
    fn from(body: &str) -> Self {
        Expression::new(body)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.body)
    }
}

/// A parsed expression ready to be evaluated many times.
pub struct CompiledExpression {
    source: String,
    slab: fasteval::Slab,
    instruction: fasteval::Instruction,
    /// Mangled identifier and original name of every variable read.
    variables: Vec<(String, DottedVariableName)>,
    boolean: bool,
    bare: bool,
    unit: Option<Unit>,
}

impl CompiledExpression {
    pub fn evaluate(&self, variables: &VariableNamespace) -> Result<Value, EvaluationError> {
        self.evaluate_with(variables, &[])
    }

    /// Evaluate with some variables overridden, such as [`TIME_VARIABLE`].
    pub fn evaluate_with(
        &self,
        variables: &VariableNamespace,
        overrides: &[(&str, Value)],
    ) -> Result<Value, EvaluationError> {
        let mut bindings: BTreeMap<&str, f64> = BTreeMap::new();
        let mut base_unit: Option<Unit> = None;
        let mut last_value = None;
        for (mangled, name) in &self.variables {
            let value = overrides
                .iter()
                .find_map(|(n, v)| (*n == name.as_str()).then_some(*v))
                .or_else(|| variables.get(name.as_str()).copied())
                .ok_or_else(|| EvaluationError::UndefinedVariable {
                    expression: self.source.clone(),
                    name: name.to_string(),
                })?;
            if let Value::Quantity(q) = value {
                let unit = q.unit.base();
                match base_unit {
                    Some(first) if first != unit => {
                        return Err(EvaluationError::MixedUnits {
                            expression: self.source.clone(),
                            first,
                            second: unit,
                        });
                    }
                    _ => base_unit = Some(unit),
                }
            }
            bindings.insert(mangled.as_str(), value.base_magnitude());
            last_value = Some(value);
        }

        if let (true, Some(Value::Bool(b))) = (self.bare, last_value) {
            return Ok(Value::Bool(b));
        }

        let result = if let fasteval::IConst(c) = &self.instruction {
            *c
        } else {
            let mut callback = |name: &str, _args: Vec<f64>| -> Option<f64> { bindings.get(name).copied() };
            self.instruction
                .eval(&self.slab, &mut callback)
                .map_err(|e| EvaluationError::Evaluation {
                    expression: self.source.clone(),
                    message: e.to_string(),
                })?
        };

        Ok(if self.boolean {
            Value::Bool(result != 0.0)
        } else if let Some(unit) = self.unit {
            Value::Quantity(Quantity::new(result, unit))
        } else if let Some(unit) = base_unit {
            Value::Quantity(Quantity::new(result, unit))
        } else {
            Value::Number(result)
        })
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.source)
            .field("boolean", &self.boolean)
            .field("unit", &self.unit)
            .finish()
    }
}

const OPERATOR_ENDINGS: &[char] = &['+', '-', '*', '/', '^', '%', '(', ',', '<', '>', '=', '!', '&', '|'];

/// Split a trailing unit token off an expression body.
fn split_unit(body: &str) -> (&str, Option<Unit>) {
    let trimmed = body.trim();
    if let Some((rest, last)) = trimmed.rsplit_once(char::is_whitespace) {
        let rest = rest.trim_end();
        let dangling = rest.ends_with(OPERATOR_ENDINGS)
            || matches!(rest.rsplit(char::is_whitespace).next(), Some("and" | "or" | "not"));
        if let (Ok(unit), false, false) = (last.parse::<Unit>(), rest.is_empty(), dangling) {
            return (rest, Some(unit));
        }
    }
    (trimmed, None)
}

struct Translation {
    text: String,
    variables: BTreeMap<String, DottedVariableName>,
    boolean: bool,
}

/// Rewrite an expression body into the numeric kernel's syntax.
fn translate(body: &str) -> Translation {
    const NUMBER_SUFFIXES: &[char] = &['k', 'M', 'G', 'T', 'm', 'u', 'µ', 'n', 'p'];
    let chars: Vec<char> = body.chars().collect();
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let mut text = String::with_capacity(body.len());
    let mut variables = BTreeMap::new();
    let mut boolean = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                let after = chars.get(i + 1).copied();
                let after2 = chars.get(i + 2).copied();
                if after.is_some_and(|a| a.is_ascii_digit()) {
                    i += 1;
                } else if matches!(after, Some('+' | '-')) && after2.is_some_and(|a| a.is_ascii_digit()) {
                    i += 2;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < chars.len()
                && NUMBER_SUFFIXES.contains(&chars[i])
                && !chars.get(i + 1).is_some_and(|&n| is_ident(n))
            {
                i += 1;
            }
            text.extend(&chars[start..i]);
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (is_ident(chars[i])
                    || (chars[i] == '.'
                        && chars
                            .get(i + 1)
                            .is_some_and(|&n| n.is_alphabetic() || n == '_')))
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let is_call = chars[i..]
                .iter()
                .find(|c| !c.is_whitespace())
                .is_some_and(|&c| c == '(');
            match word.as_str() {
                "and" => text.push_str(" && "),
                "or" => text.push_str(" || "),
                "not" => text.push('!'),
                w if w.eq_ignore_ascii_case("true") => text.push('1'),
                w if w.eq_ignore_ascii_case("false") => text.push('0'),
                _ if is_call => {
                    text.push_str(&word);
                    continue;
                }
                _ => {
                    let name = DottedVariableName(word);
                    let mangled = name.mangled();
                    text.push_str(&mangled);
                    variables.insert(mangled, name);
                    continue;
                }
            }
            boolean = true;
            continue;
        }
        if c == '*' && next == Some('*') {
            text.push('^');
            i += 2;
            continue;
        }
        if matches!(c, '<' | '>' | '=' | '!' | '&' | '|') {
            boolean = true;
        }
        text.push(c);
        i += 1;
    }
    Translation {
        text,
        variables,
        boolean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn name(s: &str) -> DottedVariableName {
        DottedVariableName::new(s).unwrap()
    }

    fn namespace() -> VariableNamespace {
        [
            (name("x"), Value::Number(2.0)),
            (name("enabled"), Value::Bool(true)),
            (name("mot.detuning"), Value::Quantity(Quantity::new(-5.0, Unit::Megahertz))),
            (name("wait"), Value::Quantity(Quantity::new(5.0, Unit::Millisecond))),
        ]
        .into_iter()
        .collect()
    }

    fn quantity(value: Value) -> Quantity {
        match value {
            Value::Quantity(q) => q,
            other => panic!("expected a quantity, got {other}"),
        }
    }

    #[test]
    fn variable_names() {
        assert!(DottedVariableName::new("mot.detuning").is_ok());
        assert!(DottedVariableName::new("_a.b2").is_ok());
        assert!(DottedVariableName::new("a..b").is_err());
        assert!(DottedVariableName::new("2a").is_err());
        assert!(DottedVariableName::new("").is_err());
        assert_eq!(name("a.b.c").segments().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn boolean_literals() {
        let ns = VariableNamespace::new();
        assert_eq!(Expression::new("True").evaluate(&ns).unwrap(), Value::Bool(true));
        assert_eq!(Expression::new("false").evaluate(&ns).unwrap(), Value::Bool(false));
    }

    #[test]
    fn numbers_and_units() {
        let ns = namespace();
        assert_eq!(Expression::new("1 + x").evaluate(&ns).unwrap(), Value::Number(3.0));
        let q = quantity(Expression::new("10 ms").evaluate(&ns).unwrap());
        assert_eq!(q.unit, Unit::Millisecond);
        assert_approx_eq!(q.magnitude, 10.0);
        let q = quantity(Expression::new("2 * x MHz").evaluate(&ns).unwrap());
        assert_eq!(q, Quantity::new(4.0, Unit::Megahertz));
    }

    #[test]
    fn quantity_variables_are_in_base_units() {
        let ns = namespace();
        let q = quantity(Expression::new("2 * mot.detuning").evaluate(&ns).unwrap());
        assert_eq!(q.unit, Unit::Hertz);
        assert_approx_eq!(q.magnitude, -10e6);
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let result = Expression::new("mot.detuning + wait").evaluate(&namespace());
        assert!(matches!(result, Err(EvaluationError::MixedUnits { .. })));
    }

    #[test]
    fn booleans_from_operators_and_variables() {
        let ns = namespace();
        assert_eq!(Expression::new("enabled").evaluate(&ns).unwrap(), Value::Bool(true));
        assert_eq!(Expression::new("x > 1").evaluate(&ns).unwrap(), Value::Bool(true));
        assert_eq!(
            Expression::new("enabled and x < 1").evaluate(&ns).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(Expression::new("not enabled").evaluate(&ns).unwrap(), Value::Bool(false));
    }

    #[test]
    fn power_operator() {
        assert_eq!(
            Expression::new("x ** 3").evaluate(&namespace()).unwrap(),
            Value::Number(8.0)
        );
    }

    #[test]
    fn undefined_variable() {
        let result = Expression::new("y + 1").evaluate(&namespace());
        assert_eq!(
            result,
            Err(EvaluationError::UndefinedVariable {
                expression: "y + 1".to_string(),
                name: "y".to_string()
            })
        );
    }

    #[test]
    fn parse_error() {
        assert!(matches!(
            Expression::new("1 +").evaluate(&namespace()),
            Err(EvaluationError::Parse { .. })
        ));
        assert!(Expression::new("  ").compile().is_err());
    }

    #[test]
    fn upstream_variables_skip_functions_and_units() {
        let e = Expression::new("sin(t / period) * mot.amplitude V");
        let names: Vec<String> = e.upstream_variables().into_iter().map(String::from).collect();
        assert_eq!(names, vec!["mot.amplitude", "period", "t"]);
        assert!(e.is_time_dependent());
        assert!(!Expression::new("3 ms").is_time_dependent());
    }

    #[test]
    fn time_override() {
        let compiled = Expression::new("t / wait").compile().unwrap();
        let ns = namespace();
        let half = compiled
            .evaluate_with(&ns, &[(TIME_VARIABLE, Value::seconds(2.5e-3))])
            .unwrap();
        // Both operands are times, so the result keeps the base time unit.
        assert_approx_eq!(quantity(half).magnitude, 0.5);
        assert!(compiled.evaluate(&ns).is_err());
    }

    #[test]
    fn magnitude_in_required_unit() {
        let ns = namespace();
        let value = Expression::new("500 us").evaluate_magnitude(&ns, Some(Unit::Millisecond));
        match value {
            Ok(Scalar::F64(x)) => assert_approx_eq!(x, 0.5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trailing_variable_is_not_a_unit() {
        let mut ns = namespace();
        ns.insert(name("V"), Value::Number(3.0));
        assert_eq!(Expression::new("x * V").evaluate(&ns).unwrap(), Value::Number(6.0));
    }

    #[test]
    fn serde_transparent() {
        let e: Expression = serde_yaml::from_str("\"10 ms\"").unwrap();
        assert_eq!(e, Expression::new("10 ms"));
    }
}
