//! Errors raised while compiling the parameters of a shot.

use thiserror::Error;

use crate::device::{CalibrationError, Trigger};
use crate::expression::{EvaluationError, Unit};
use crate::instruction::InstructionError;
use crate::lane::LaneError;
use crate::timing::TimeStep;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompilationError {
    #[error("no root sequencer found, exactly one sequencer must be software triggered")]
    NoRootSequencer,

    #[error("more than one root sequencer found: {names:?}")]
    MultipleRootSequencers { names: Vec<String> },

    #[error(
        "there is no trigger relationship from the root sequencer '{root}' to the following \
         sequencers: {names:?}"
    )]
    UnreachedSequencers { root: String, names: Vec<String> },

    #[error("the following lanes were not used when compiling the shot: {names:?}")]
    UnusedLanes { names: Vec<String> },

    #[error("sequencer '{device}' is part of a trigger cycle")]
    TriggerCycle { device: String },

    #[error("sequencer '{sequencer}' has no channel")]
    NoChannels { sequencer: String },

    #[error("error when evaluating output for channel {channel} ({description}) of sequencer '{sequencer}'")]
    Channel {
        sequencer: String,
        channel: usize,
        description: String,
        #[source]
        source: Box<CompilationError>,
    },

    #[error("could not find lane '{lane}' when evaluating output <{output}>")]
    MissingLane { lane: String, output: String },

    #[error("lane '{lane}' is a {kind} lane and cannot be output on a channel")]
    UnsupportedLane { lane: String, kind: &'static str },

    #[error("cannot evaluate digital lane '{lane}' in {unit}")]
    DigitalLaneWithUnit { lane: String, unit: Unit },

    #[error("could not find device '{device}' to generate trigger for output <{output}>")]
    UnknownDevice { device: String, output: String },

    #[error("cannot evaluate trigger for device '{device}' in {unit}")]
    TriggerWithUnit { device: String, unit: Unit },

    #[error("the lane named after camera '{device}' is a {kind} lane, not a camera lane")]
    NotACameraLane { device: String, kind: &'static str },

    #[error("cannot shift an output by a negative number of time steps ({ticks})")]
    NegativeShift { ticks: i64 },

    #[error("cannot advance by {ticks} time steps when only {available} are available")]
    AdvanceTooLarge { ticks: usize, available: usize },

    #[error("cannot delay by {ticks} time steps when only {available} are available")]
    DelayTooLarge { ticks: usize, available: usize },

    #[error("the shot duration is too short to generate a trigger pulse for device '{device}'")]
    TriggerTooShort { device: String },

    #[error("cannot generate a trigger for device '{device}' configured with a {trigger} trigger")]
    UnsupportedTrigger { device: String, trigger: Trigger },

    #[error("slave time step ({slave}) must be at least twice the master time step ({master})")]
    ClockTooFast { slave: TimeStep, master: TimeStep },

    #[error("slave time step ({slave}) must be an integer multiple of the master time step ({master})")]
    ClockNotMultiple { slave: TimeStep, master: TimeStep },

    #[error("adaptive clocks only support repetitions of a single tick, got a block of {length} ticks")]
    UnsupportedRepetition { length: usize },

    #[error("adaptive clocks cannot follow a ramp")]
    RampClockTarget,

    #[error("cannot convert calibrated values from {from:?} to {to:?}")]
    CalibrationUnits { from: Option<Unit>, to: Option<Unit> },

    #[error("could not evaluate <{expression}>")]
    Evaluation {
        expression: String,
        #[source]
        source: EvaluationError,
    },

    #[error(transparent)]
    Lane(#[from] LaneError),

    #[error(transparent)]
    Instruction(#[from] InstructionError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}
