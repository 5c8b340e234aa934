//! Error types for the instruction algebra.

use thiserror::Error;

use super::dtype::DType;

/// An error raised while building or transforming a [`SequencerInstruction`](super::SequencerInstruction).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstructionError {
    /// Operands that must be aligned in time have different lengths.
    #[error("instructions must have the same length (got {expected} and {actual})")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("index {index} is out of bounds for length {length}")]
    IndexOutOfBounds { index: isize, length: usize },

    #[error("slice index {index} is out of bounds for length {length}")]
    SliceOutOfBounds { index: isize, length: usize },

    #[error("slices with step {step} are not supported, only unit steps are")]
    UnsupportedSliceStep { step: isize },

    #[error("at least one instruction must be provided")]
    NoInstructions,

    #[error("instruction must have at least one named channel")]
    AnonymousChannel,

    #[error("channels {channels:?} are present in both instructions")]
    OverlappingChannels { channels: Vec<String> },

    #[error("dtypes {left} and {right} have no common type")]
    IncompatibleDtypes { left: DType, right: DType },

    #[error("cannot cast instruction of dtype {from} to {to}")]
    UnsupportedCast { from: DType, to: DType },

    #[error("ramps can only hold floating point values, not {dtype}")]
    NotInterpolable { dtype: DType },

    #[error("field '{field}' does not exist in dtype {dtype}")]
    UnknownField { field: String, dtype: DType },

    #[error("dtype {dtype} has no named fields")]
    NotARecord { dtype: DType },

    #[error("sample has {actual} values while dtype {dtype} expects {expected}")]
    SampleWidth {
        dtype: DType,
        expected: usize,
        actual: usize,
    },
}
