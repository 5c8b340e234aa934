//! Continuous shot time and sequencer ticks.
//!
//! Step durations are real-valued seconds; sequencers count integer ticks of their
//! [`TimeStep`]. Both boundaries of a time interval are converted with the same ceiling
//! rule, so adjacent cells never overlap nor leave gaps.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One nanosecond, in seconds.
pub const NS: f64 = 1e-9;

/// Sampling period of a sequencer, in integer nanoseconds.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct TimeStep {
    ns: u64,
}

/// A zero time step was requested.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("time step must be at least 1 ns")]
pub struct ZeroTimeStep;

impl TimeStep {
    /// Create a time step from nanoseconds. Returns `None` for 0.
    pub const fn from_ns(ns: u64) -> Option<Self> {
        if ns == 0 {
            None
        } else {
            Some(Self { ns })
        }
    }

    /// Raw period in nanoseconds.
    pub fn ns(self) -> u64 {
        self.ns
    }

    /// Period in seconds.
    pub fn seconds(self) -> f64 {
        self.ns as f64 * NS
    }

    /// Whole number of ticks closest to `duration_ns`, ties to even.
    pub fn ticks_in_ns(self, duration_ns: f64) -> i64 {
        (duration_ns / self.ns as f64).round_ties_even() as i64
    }
}

impl TryFrom<u64> for TimeStep {
    type Error = ZeroTimeStep;

    fn try_from(ns: u64) -> Result<Self, Self::Error> {
        TimeStep::from_ns(ns).ok_or(ZeroTimeStep)
    }
}

impl From<TimeStep> for u64 {
    fn from(step: TimeStep) -> u64 {
        step.ns
    }
}

impl fmt::Display for TimeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ns", self.ns)
    }
}

/// First tick at or after `time` (seconds).
pub fn start_tick(time: f64, time_step: TimeStep) -> usize {
    (time / time_step.seconds()).ceil() as usize
}

/// First tick excluded from an interval ending at `time` (seconds).
pub fn stop_tick(time: f64, time_step: TimeStep) -> usize {
    (time / time_step.seconds()).ceil() as usize
}

/// Number of ticks in `[start, stop)`.
pub fn number_ticks(start: f64, stop: f64, time_step: TimeStep) -> usize {
    stop_tick(stop, time_step).saturating_sub(start_tick(start, time_step))
}

/// Step boundaries `[0, d0, d0 + d1, ...]` by sequential accumulation.
///
/// The last bound is the shot duration. It is not recomputed with an independent sum so
/// that it stays consistent with the per-cell tick computation.
pub fn step_bounds(durations: &[f64]) -> Vec<f64> {
    let mut bounds = Vec::with_capacity(durations.len() + 1);
    let mut elapsed = 0.0;
    bounds.push(elapsed);
    for duration in durations {
        elapsed += duration;
        bounds.push(elapsed);
    }
    bounds
}

/// Times (seconds) of the ticks in `[start, stop)`, relative to `start`.
pub fn tick_times(start: f64, stop: f64, time_step: TimeStep) -> Vec<f64> {
    (start_tick(start, time_step)..stop_tick(stop, time_step))
        .map(|tick| (tick as u64 * time_step.ns()) as f64 * NS - start)
        .collect()
}
