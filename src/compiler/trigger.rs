//! Trigger waveforms a sequencer outputs to start or clock other devices.

use super::CompilationError;
use crate::instruction::{concatenate, Pattern, SequencerInstruction};
use crate::timing::TimeStep;

/// Master ticks of one slave clock period, and how many of them are high and low.
///
/// The slave period must be an integer multiple of at least twice the master period.
/// Odd periods are high one tick longer than they are low.
pub fn high_low_clicks(
    slave: TimeStep,
    master: TimeStep,
) -> Result<(usize, usize, usize), CompilationError> {
    if slave.ns() < 2 * master.ns() {
        return Err(CompilationError::ClockTooFast { slave, master });
    }
    if slave.ns() % master.ns() != 0 {
        return Err(CompilationError::ClockNotMultiple { slave, master });
    }
    let div = (slave.ns() / master.ns()) as usize;
    let high = div.div_ceil(2);
    Ok((div, high, div - high))
}

/// One slave clock period, sampled at the master time step.
pub fn master_clock_pulse(
    slave: TimeStep,
    master: TimeStep,
) -> Result<SequencerInstruction, CompilationError> {
    let (_, high, low) = high_low_clicks(slave, master)?;
    Ok(concatenate(&[level(true, high), level(false, low)])?)
}

/// A clock that ticks only when `target` may change value.
///
/// Every tick of a pattern gets a pulse. A repetition of a single tick only gets one
/// pulse, since the target holds its output in between. Ramps cannot be clocked.
pub fn adaptive_clock(
    target: &SequencerInstruction,
    pulse: &SequencerInstruction,
) -> Result<SequencerInstruction, CompilationError> {
    match target {
        SequencerInstruction::Pattern(_) => Ok(pulse.repeat(target.len())),
        SequencerInstruction::Ramp(_) => Err(CompilationError::RampClockTarget),
        SequencerInstruction::Concatenated(concatenated) => {
            let parts = concatenated
                .instructions()
                .iter()
                .map(|child| adaptive_clock(child, pulse))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(concatenate(&parts)?)
        }
        SequencerInstruction::Repeated(repeated) => {
            let length = repeated.instruction().len();
            if length != 1 {
                return Err(CompilationError::UnsupportedRepetition { length });
            }
            let idle = level(false, (repeated.repetitions() - 1) * pulse.len());
            Ok(concatenate(&[pulse.clone(), idle])?)
        }
    }
}

/// High for the first half of `length` ticks, low for the rest.
pub fn half_pulse(device: &str, length: usize) -> Result<SequencerInstruction, CompilationError> {
    let high = length / 2;
    let low = length - high;
    if high == 0 || low == 0 {
        return Err(CompilationError::TriggerTooShort {
            device: device.to_string(),
        });
    }
    Ok(concatenate(&[level(true, high), level(false, low)])?)
}

/// A constant boolean level held for `length` ticks.
pub fn level(value: bool, length: usize) -> SequencerInstruction {
    SequencerInstruction::from(Pattern::from_bools([value])).repeat(length)
}
