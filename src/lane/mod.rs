//! Time lanes: per-shot tracks of values aligned on the shot steps.
//!
//! A shot is divided in named steps, each with a duration expression. Every lane holds
//! one value per step, run-length encoded in [`Block`]s. Lane compilers turn a lane into
//! a [`SequencerInstruction`](crate::instruction::SequencerInstruction) sampled at a
//! sequencer's time step.

pub mod analog;
pub mod camera;
pub mod digital;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use analog::AnalogLaneCompiler;
pub use camera::CameraLaneCompiler;
pub use digital::DigitalLaneCompiler;

use crate::expression::{EvaluationError, Expression, Unit, UnitError, VariableNamespace};
use crate::instruction::{concatenate, DType, InstructionError, Pattern, SequencerInstruction};
use crate::timing::{step_bounds, TimeStep};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LaneError {
    #[error("lane '{lane}' spans {span} steps but the shot has {steps}")]
    SpanMismatch {
        lane: String,
        steps: usize,
        span: usize,
    },

    #[error("lane '{lane}' contains a block spanning no step")]
    EmptyBlock { lane: String },

    #[error("could not evaluate the duration of step '{step}'")]
    StepDuration {
        step: String,
        #[source]
        source: EvaluationError,
    },

    #[error("step '{step}' has a negative duration ({duration} s)")]
    NegativeDuration { step: String, duration: f64 },

    #[error("could not evaluate lane '{lane}' at step '{step}'")]
    Evaluation {
        lane: String,
        step: String,
        #[source]
        source: EvaluationError,
    },

    #[error("lane '{lane}' at step '{step}' must evaluate to a boolean, got {value}")]
    NotBoolean {
        lane: String,
        step: String,
        value: String,
    },

    #[error("lane '{lane}' at step '{step}' must evaluate to a number or a quantity, got {value}")]
    NotAnalog {
        lane: String,
        step: String,
        value: String,
    },

    #[error("lane '{lane}' at step '{step}' cannot be expressed in {unit:?}")]
    Unit {
        lane: String,
        step: String,
        unit: Option<Unit>,
        #[source]
        source: UnitError,
    },

    #[error("ramp of lane '{lane}' at step '{step}' must sit between two expression blocks")]
    RampWithoutNeighbours { lane: String, step: String },

    #[error(
        "no trigger can be generated for picture '{picture}' of lane '{lane}' at step '{step}' \
         because its exposure is too short ({span_ns} ns) with respect to the time step \
         ({time_step})"
    )]
    PictureTooShort {
        lane: String,
        step: String,
        picture: String,
        span_ns: f64,
        time_step: TimeStep,
    },

    #[error(transparent)]
    Instruction(#[from] InstructionError),
}

/// A named step of the shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub duration: Expression,
}

impl Step {
    pub fn new(name: impl Into<String>, duration: impl Into<Expression>) -> Self {
        Self {
            name: name.into(),
            duration: duration.into(),
        }
    }
}

/// Evaluated step durations and the bounds accumulated from them.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTimes {
    names: Vec<String>,
    durations: Vec<f64>,
    bounds: Vec<f64>,
}

impl StepTimes {
    /// Evaluate every step duration, in seconds.
    pub fn evaluate(steps: &[Step], variables: &VariableNamespace) -> Result<Self, LaneError> {
        let mut durations = Vec::with_capacity(steps.len());
        for step in steps {
            let duration = step
                .duration
                .evaluate_magnitude(variables, Some(Unit::Second))
                .map_err(|source| LaneError::StepDuration {
                    step: step.name.clone(),
                    source,
                })?
                .as_f64();
            if duration < 0.0 {
                return Err(LaneError::NegativeDuration {
                    step: step.name.clone(),
                    duration,
                });
            }
            durations.push(duration);
        }
        Ok(Self::from_durations(
            steps.iter().map(|s| s.name.clone()).collect(),
            durations,
        ))
    }

    pub fn from_durations(names: Vec<String>, durations: Vec<f64>) -> Self {
        let bounds = step_bounds(&durations);
        Self {
            names,
            durations,
            bounds,
        }
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn durations(&self) -> &[f64] {
        &self.durations
    }

    /// `[0, d0, d0 + d1, ...]`, one more entry than there are steps.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Total duration of the shot, the last step bound.
    pub fn shot_duration(&self) -> f64 {
        self.bounds[self.bounds.len() - 1]
    }

    pub fn name(&self, step: usize) -> &str {
        self.names.get(step).map(String::as_str).unwrap_or("<end>")
    }
}

/// One value held over `span` consecutive steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block<T> {
    pub value: T,
    pub span: usize,
}

impl<T> Block<T> {
    pub fn new(value: T, span: usize) -> Self {
        Self { value, span }
    }
}

/// Step ranges `[start, stop)` covered by each block.
pub(crate) fn block_bounds<T>(blocks: &[Block<T>]) -> Vec<(usize, usize)> {
    let mut start = 0;
    blocks
        .iter()
        .map(|block| {
            let range = (start, start + block.span);
            start += block.span;
            range
        })
        .collect()
}

/// Check that the blocks cover exactly `steps` steps.
pub(crate) fn check_span<T>(lane: &str, blocks: &[Block<T>], steps: usize) -> Result<(), LaneError> {
    if blocks.iter().any(|b| b.span == 0) {
        return Err(LaneError::EmptyBlock {
            lane: lane.to_string(),
        });
    }
    let span: usize = blocks.iter().map(|b| b.span).sum();
    if span != steps {
        return Err(LaneError::SpanMismatch {
            lane: lane.to_string(),
            steps,
            span,
        });
    }
    Ok(())
}

/// Concatenate per-block instructions, an empty lane giving an empty instruction.
pub(crate) fn join_blocks(
    dtype: &DType,
    instructions: Vec<SequencerInstruction>,
) -> Result<SequencerInstruction, LaneError> {
    if instructions.is_empty() {
        return Ok(Pattern::empty(dtype).into());
    }
    Ok(concatenate(&instructions)?)
}

/// A value held by a digital lane for the duration of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DigitalValue {
    Literal(bool),
    Expression(Expression),
}

/// A value held by an analog lane for the duration of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Expression", into = "Expression")]
pub enum AnalogValue {
    Expression(Expression),
    /// Linear interpolation between the end of the previous block and the start of the
    /// next one. Written `ramp` in configuration files.
    Ramp,
}

const RAMP_KEYWORD: &str = "ramp";

impl From<Expression> for AnalogValue {
    fn from(expression: Expression) -> Self {
        if expression.as_str().trim() == RAMP_KEYWORD {
            AnalogValue::Ramp
        } else {
            AnalogValue::Expression(expression)
        }
    }
}

impl From<AnalogValue> for Expression {
    fn from(value: AnalogValue) -> Self {
        match value {
            AnalogValue::Expression(expression) => expression,
            AnalogValue::Ramp => Expression::new(RAMP_KEYWORD),
        }
    }
}

/// A camera exposure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakePicture {
    pub picture_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalTimeLane {
    pub blocks: Vec<Block<DigitalValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogTimeLane {
    pub blocks: Vec<Block<AnalogValue>>,
}

/// Blocks with no picture keep the camera idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraTimeLane {
    pub blocks: Vec<Block<Option<TakePicture>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeLane {
    Digital(DigitalTimeLane),
    Analog(AnalogTimeLane),
    Camera(CameraTimeLane),
}

impl TimeLane {
    /// Number of steps covered by the lane.
    pub fn span(&self) -> usize {
        match self {
            TimeLane::Digital(l) => l.blocks.iter().map(|b| b.span).sum(),
            TimeLane::Analog(l) => l.blocks.iter().map(|b| b.span).sum(),
            TimeLane::Camera(l) => l.blocks.iter().map(|b| b.span).sum(),
        }
    }

    /// Check that the lane covers exactly `steps` steps.
    pub fn validate(&self, name: &str, steps: usize) -> Result<(), LaneError> {
        match self {
            TimeLane::Digital(l) => check_span(name, &l.blocks, steps),
            TimeLane::Analog(l) => check_span(name, &l.blocks, steps),
            TimeLane::Camera(l) => check_span(name, &l.blocks, steps),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TimeLane::Digital(_) => "digital",
            TimeLane::Analog(_) => "analog",
            TimeLane::Camera(_) => "camera",
        }
    }
}
