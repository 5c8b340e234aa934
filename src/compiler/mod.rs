//! Compilation of a shot into device parameters.
//!
//! The [`SequencerParameterCompiler`] starts from the root sequencer, the only one
//! triggered by software, and compiles the instruction of every sequencer it reaches
//! through [`ChannelOutput::DeviceTrigger`] outputs. Each channel output is evaluated
//! into an instruction at the sequencer time step, then all channels of a sequencer are
//! stacked into a single instruction with one field per channel, named `ch {n}`.
//!
//! The [`ShotCompiler`] adds the parameters of the cameras to those of the sequencers.

pub mod error;
pub mod trigger;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

pub use error::CompilationError;
pub use trigger::{adaptive_clock, half_pulse, high_low_clicks, master_clock_pulse};

use crate::device::{
    ChannelOutput, DeviceConfiguration, PiecewiseLinearCalibration, SequencerConfiguration, Trigger,
};
use crate::expression::{convert_magnitude, Expression, Unit, VariableNamespace};
use crate::instruction::{
    concatenate, stack_instructions, DType, Pattern, Sample, Scalar, SequencerInstruction,
};
use crate::lane::{
    AnalogLaneCompiler, CameraLaneCompiler, DigitalLaneCompiler, Step, StepTimes, TimeLane,
};
use crate::timing::{number_ticks, TimeStep};

/// Lanes of a shot, by name.
pub type Lanes = BTreeMap<String, TimeLane>;

/// Configured devices, by name.
pub type Devices = BTreeMap<String, DeviceConfiguration>;

/// What a sequencer must be programmed with for one shot.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerParameters {
    pub time_step: TimeStep,
    pub trigger: Trigger,
    pub sequence: SequencerInstruction,
}

/// What a camera must be programmed with for one shot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraParameters {
    pub picture_names: Vec<String>,
    /// Exposure of each picture, in seconds.
    pub exposures: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShotParameters {
    /// Duration of the shot, in seconds.
    pub duration: f64,
    pub sequencers: BTreeMap<String, SequencerParameters>,
    pub cameras: BTreeMap<String, CameraParameters>,
}

/// Name of the unique software triggered sequencer.
pub fn find_root_sequencer(devices: &Devices) -> Result<&str, CompilationError> {
    let roots: Vec<&str> = devices
        .iter()
        .filter(|(_, config)| matches!(config, DeviceConfiguration::Sequencer(s) if s.trigger.is_software()))
        .map(|(name, _)| name.as_str())
        .collect();
    match roots.as_slice() {
        [] => Err(CompilationError::NoRootSequencer),
        [root] => Ok(root),
        names => Err(CompilationError::MultipleRootSequencers {
            names: names.iter().map(|n| n.to_string()).collect(),
        }),
    }
}

/// Compiles the instructions of every sequencer for a shot.
pub struct SequencerParameterCompiler<'a> {
    steps: &'a [Step],
    lanes: &'a Lanes,
    devices: &'a Devices,
    root: &'a str,
}

impl<'a> SequencerParameterCompiler<'a> {
    /// Fails if there is not exactly one root sequencer.
    pub fn new(steps: &'a [Step], lanes: &'a Lanes, devices: &'a Devices) -> Result<Self, CompilationError> {
        let root = find_root_sequencer(devices)?;
        Ok(Self {
            steps,
            lanes,
            devices,
            root,
        })
    }

    pub fn root(&self) -> &str {
        self.root
    }

    pub fn compile(
        &self,
        variables: &VariableNamespace,
    ) -> Result<BTreeMap<String, SequencerInstruction>, CompilationError> {
        let times = StepTimes::evaluate(self.steps, variables)?;
        self.compile_with_times(&times, variables)
    }

    fn compile_with_times(
        &self,
        times: &StepTimes,
        variables: &VariableNamespace,
    ) -> Result<BTreeMap<String, SequencerInstruction>, CompilationError> {
        let shot = SingleShot {
            lanes: self.lanes,
            devices: self.devices,
            times,
            variables,
            instructions: BTreeMap::new(),
            in_progress: BTreeSet::new(),
            used_lanes: BTreeSet::new(),
        };
        shot.compile(self.root)
    }
}

/// State of the compilation of one shot.
struct SingleShot<'a> {
    lanes: &'a Lanes,
    devices: &'a Devices,
    times: &'a StepTimes,
    variables: &'a VariableNamespace,
    /// Compiled sequencers, so that one triggered twice is only compiled once.
    instructions: BTreeMap<String, SequencerInstruction>,
    in_progress: BTreeSet<String>,
    used_lanes: BTreeSet<String>,
}

impl<'a> SingleShot<'a> {
    fn compile(mut self, root: &str) -> Result<BTreeMap<String, SequencerInstruction>, CompilationError> {
        self.compile_sequencer(root)?;

        let unreached: Vec<String> = self
            .devices
            .iter()
            .filter(|(name, config)| config.as_sequencer().is_some() && !self.instructions.contains_key(*name))
            .map(|(name, _)| name.clone())
            .collect();
        if !unreached.is_empty() {
            return Err(CompilationError::UnreachedSequencers {
                root: root.to_string(),
                names: unreached,
            });
        }

        let unused: Vec<String> = self
            .lanes
            .iter()
            .filter(|(name, lane)| !matches!(lane, TimeLane::Camera(_)) && !self.used_lanes.contains(*name))
            .map(|(name, _)| name.clone())
            .collect();
        if !unused.is_empty() {
            return Err(CompilationError::UnusedLanes { names: unused });
        }

        Ok(self.instructions)
    }

    fn shot_ticks(&self, time_step: TimeStep) -> usize {
        number_ticks(0.0, self.times.shot_duration(), time_step)
    }

    fn compile_sequencer(&mut self, name: &str) -> Result<SequencerInstruction, CompilationError> {
        if let Some(instruction) = self.instructions.get(name) {
            return Ok(instruction.clone());
        }
        let devices = self.devices;
        let Some(config) = devices.get(name).and_then(DeviceConfiguration::as_sequencer) else {
            return Err(CompilationError::UnknownDevice {
                device: name.to_string(),
                output: "sequencer".to_string(),
            });
        };
        if !self.in_progress.insert(name.to_string()) {
            return Err(CompilationError::TriggerCycle {
                device: name.to_string(),
            });
        }

        let instruction = self.compile_channels(name, config)?;
        debug!(
            sequencer = name,
            length = instruction.len(),
            depth = instruction.depth(),
            width = instruction.width(),
            "compiled sequencer"
        );
        self.in_progress.remove(name);
        self.instructions.insert(name.to_string(), instruction.clone());
        Ok(instruction)
    }

    fn compile_channels(
        &mut self,
        name: &str,
        config: &SequencerConfiguration,
    ) -> Result<SequencerInstruction, CompilationError> {
        let time_step = config.time_step;
        let mut max_advance = 0;
        let mut max_delay = 0;
        for channel in &config.channels {
            let (advance, delay) = self.max_advance_and_delay(channel.output(), time_step)?;
            max_advance = max_advance.max(advance);
            max_delay = max_delay.max(delay);
        }

        let mut channels = Vec::with_capacity(config.channels.len());
        for (number, channel) in config.channels.iter().enumerate() {
            let values = self
                .evaluate_output(channel.output(), time_step, channel.required_unit(), max_advance, max_delay)
                .and_then(|values| Ok(values.as_type(&DType::Scalar(channel.kind()))?))
                .map_err(|source| CompilationError::Channel {
                    sequencer: name.to_string(),
                    channel: number,
                    description: channel.description().to_string(),
                    source: Box::new(source),
                })?;
            channels.push(values.with_name(&format!("ch {number}"))?);
        }
        if channels.is_empty() {
            return Err(CompilationError::NoChannels {
                sequencer: name.to_string(),
            });
        }
        Ok(stack_instructions(&channels)?)
    }

    /// Ticks by which `output` is shifted earlier and later.
    fn max_advance_and_delay(
        &self,
        output: &ChannelOutput,
        time_step: TimeStep,
    ) -> Result<(usize, usize), CompilationError> {
        Ok(match output {
            ChannelOutput::Constant { .. }
            | ChannelOutput::LaneValues { .. }
            | ChannelOutput::DeviceTrigger { .. } => (0, 0),
            ChannelOutput::CalibratedAnalogMapping { input, .. } => {
                self.max_advance_and_delay(input, time_step)?
            }
            ChannelOutput::Advance { input, advance } => {
                let (a, d) = self.max_advance_and_delay(input, time_step)?;
                (a + self.shift_ticks(advance, time_step)?, d)
            }
            ChannelOutput::Delay { input, delay } => {
                let (a, d) = self.max_advance_and_delay(input, time_step)?;
                (a, d + self.shift_ticks(delay, time_step)?)
            }
        })
    }

    fn shift_ticks(&self, duration: &Expression, time_step: TimeStep) -> Result<usize, CompilationError> {
        let ns = self.evaluate(duration, Some(Unit::Nanosecond))?.as_f64();
        let ticks = time_step.ticks_in_ns(ns);
        usize::try_from(ticks).map_err(|_| CompilationError::NegativeShift { ticks })
    }

    fn evaluate(&self, expression: &Expression, unit: Option<Unit>) -> Result<Scalar, CompilationError> {
        expression
            .evaluate_magnitude(self.variables, unit)
            .map_err(|source| CompilationError::Evaluation {
                expression: expression.to_string(),
                source,
            })
    }

    /// Evaluate `output` with `prepend` extra ticks before the shot and `append` after.
    fn evaluate_output(
        &mut self,
        output: &ChannelOutput,
        time_step: TimeStep,
        unit: Option<Unit>,
        prepend: usize,
        append: usize,
    ) -> Result<SequencerInstruction, CompilationError> {
        match output {
            ChannelOutput::Constant { value } => self.evaluate_constant(value, time_step, unit, prepend + append),
            ChannelOutput::LaneValues { lane, default } => {
                let lanes = self.lanes;
                let Some(time_lane) = lanes.get(lane) else {
                    return match default {
                        Some(default) => self.evaluate_constant(default, time_step, unit, prepend + append),
                        None => Err(CompilationError::MissingLane {
                            lane: lane.clone(),
                            output: output.to_string(),
                        }),
                    };
                };
                let values = self.evaluate_lane(lane, time_lane, time_step, unit)?;
                pad_with_edges(values, prepend, append)
            }
            ChannelOutput::DeviceTrigger { device_name, default } => {
                if !self.devices.contains_key(device_name) {
                    return match default {
                        Some(default) => self.evaluate_output(default, time_step, unit, prepend, append),
                        None => Err(CompilationError::UnknownDevice {
                            device: device_name.clone(),
                            output: output.to_string(),
                        }),
                    };
                }
                if let Some(unit) = unit {
                    return Err(CompilationError::TriggerWithUnit {
                        device: device_name.clone(),
                        unit,
                    });
                }
                let trigger = self.device_trigger(device_name, time_step)?;
                Ok(concatenate(&[
                    trigger::level(false, prepend),
                    trigger,
                    trigger::level(false, append),
                ])?)
            }
            ChannelOutput::CalibratedAnalogMapping {
                input,
                input_units,
                output_units,
                measured_data_points,
            } => {
                let values = self.evaluate_output(input, time_step, *input_units, prepend, append)?;
                let calibration = PiecewiseLinearCalibration::new(measured_data_points)?;
                let calibration = match (*output_units, unit) {
                    (from, to) if from == to => calibration,
                    (Some(from), Some(to)) => {
                        let factor = convert_magnitude(1.0, from, to).map_err(|_| {
                            CompilationError::CalibrationUnits {
                                from: Some(from),
                                to: Some(to),
                            }
                        })?;
                        calibration.map_outputs(|y| y * factor)
                    }
                    (from, to) => return Err(CompilationError::CalibrationUnits { from, to }),
                };
                Ok(calibration.apply(&values)?)
            }
            ChannelOutput::Advance { input, advance } => {
                let ticks = self.shift_ticks(advance, time_step)?;
                if ticks > prepend {
                    return Err(CompilationError::AdvanceTooLarge {
                        ticks,
                        available: prepend,
                    });
                }
                self.evaluate_output(input, time_step, unit, prepend - ticks, append + ticks)
            }
            ChannelOutput::Delay { input, delay } => {
                let ticks = self.shift_ticks(delay, time_step)?;
                if ticks > append {
                    return Err(CompilationError::DelayTooLarge {
                        ticks,
                        available: append,
                    });
                }
                self.evaluate_output(input, time_step, unit, prepend + ticks, append - ticks)
            }
        }
    }

    /// A value held for the whole shot plus `extra` ticks.
    fn evaluate_constant(
        &self,
        value: &Expression,
        time_step: TimeStep,
        unit: Option<Unit>,
        extra: usize,
    ) -> Result<SequencerInstruction, CompilationError> {
        let length = self.shot_ticks(time_step) + extra;
        let pattern = match self.evaluate(value, unit)? {
            Scalar::Bool(b) => Pattern::from_bools([b]),
            Scalar::F64(x) => Pattern::from_f64s([x]),
        };
        Ok(SequencerInstruction::from(pattern).repeat(length))
    }

    fn evaluate_lane(
        &mut self,
        name: &str,
        lane: &TimeLane,
        time_step: TimeStep,
        unit: Option<Unit>,
    ) -> Result<SequencerInstruction, CompilationError> {
        let values = match lane {
            TimeLane::Digital(digital) => {
                if let Some(unit) = unit {
                    return Err(CompilationError::DigitalLaneWithUnit {
                        lane: name.to_string(),
                        unit,
                    });
                }
                DigitalLaneCompiler::new(name, digital, self.times)?.compile(self.variables, time_step)?
            }
            TimeLane::Analog(analog) => {
                AnalogLaneCompiler::new(name, analog, self.times, unit)?.compile(self.variables, time_step)?
            }
            TimeLane::Camera(_) => {
                return Err(CompilationError::UnsupportedLane {
                    lane: name.to_string(),
                    kind: lane.kind(),
                })
            }
        };
        self.used_lanes.insert(name.to_string());
        Ok(values)
    }

    /// The waveform that triggers `device`, at the time step of the triggering sequencer.
    fn device_trigger(&mut self, device: &str, time_step: TimeStep) -> Result<SequencerInstruction, CompilationError> {
        let length = self.shot_ticks(time_step);
        let devices = self.devices;
        match devices.get(device) {
            Some(DeviceConfiguration::Sequencer(config)) => {
                let slave = self.compile_sequencer(device)?;
                match config.trigger {
                    Trigger::ExternalClockOnChange { .. } => {
                        let pulse = master_clock_pulse(config.time_step, time_step)?;
                        let clock = adaptive_clock(&slave, &pulse)?;
                        if clock.len() > length {
                            Ok(clock.slice(0, length as isize)?)
                        } else {
                            Ok(clock)
                        }
                    }
                    Trigger::ExternalTriggerStart { .. } => half_pulse(device, length),
                    trigger => Err(CompilationError::UnsupportedTrigger {
                        device: device.to_string(),
                        trigger,
                    }),
                }
            }
            Some(DeviceConfiguration::Camera) => {
                let lanes = self.lanes;
                match lanes.get(device) {
                    Some(TimeLane::Camera(lane)) => {
                        Ok(CameraLaneCompiler::new(device, lane, self.times)?.compile_trigger(time_step)?)
                    }
                    Some(other) => Err(CompilationError::NotACameraLane {
                        device: device.to_string(),
                        kind: other.kind(),
                    }),
                    None => {
                        warn!(camera = device, "no lane for camera, its trigger stays low");
                        Ok(trigger::level(false, length))
                    }
                }
            }
            Some(DeviceConfiguration::Other) | None => half_pulse(device, length),
        }
    }
}

/// Extend `values` with copies of its first and last samples.
fn pad_with_edges(
    values: SequencerInstruction,
    prepend: usize,
    append: usize,
) -> Result<SequencerInstruction, CompilationError> {
    if prepend == 0 && append == 0 {
        return Ok(values);
    }
    let dtype = values.dtype().clone();
    let edge = |sample: Sample, count: usize| -> Result<SequencerInstruction, CompilationError> {
        Ok(SequencerInstruction::from(Pattern::constant(&dtype, &sample, 1)?).repeat(count))
    };
    let before = edge(values.get(0)?, prepend)?;
    let after = edge(values.get(-1)?, append)?;
    Ok(concatenate(&[before, values, after])?)
}

/// Compiles every device parameter of a shot.
pub struct ShotCompiler<'a> {
    steps: &'a [Step],
    lanes: &'a Lanes,
    devices: &'a Devices,
    sequencers: SequencerParameterCompiler<'a>,
}

impl<'a> ShotCompiler<'a> {
    /// Checks that every lane spans all the steps and that there is a root sequencer.
    pub fn new(steps: &'a [Step], lanes: &'a Lanes, devices: &'a Devices) -> Result<Self, CompilationError> {
        for (name, lane) in lanes {
            lane.validate(name, steps.len())?;
        }
        Ok(Self {
            steps,
            lanes,
            devices,
            sequencers: SequencerParameterCompiler::new(steps, lanes, devices)?,
        })
    }

    pub fn compile(&self, variables: &VariableNamespace) -> Result<ShotParameters, CompilationError> {
        let times = StepTimes::evaluate(self.steps, variables)?;
        let instructions = self.sequencers.compile_with_times(&times, variables)?;

        let mut sequencers = BTreeMap::new();
        for (name, sequence) in instructions {
            if let Some(config) = self.devices.get(&name).and_then(DeviceConfiguration::as_sequencer) {
                sequencers.insert(
                    name,
                    SequencerParameters {
                        time_step: config.time_step,
                        trigger: config.trigger,
                        sequence,
                    },
                );
            }
        }

        let mut cameras = BTreeMap::new();
        for name in self
            .devices
            .iter()
            .filter(|(_, config)| matches!(config, DeviceConfiguration::Camera))
            .map(|(name, _)| name)
        {
            let parameters = match self.lanes.get(name) {
                Some(TimeLane::Camera(lane)) => {
                    let compiler = CameraLaneCompiler::new(name, lane, &times)?;
                    CameraParameters {
                        picture_names: compiler.picture_names().into_iter().map(String::from).collect(),
                        exposures: compiler.compile_exposures(),
                    }
                }
                Some(other) => {
                    return Err(CompilationError::NotACameraLane {
                        device: name.clone(),
                        kind: other.kind(),
                    })
                }
                None => CameraParameters {
                    picture_names: Vec::new(),
                    exposures: Vec::new(),
                },
            };
            cameras.insert(name.clone(), parameters);
        }

        info!(
            duration = times.shot_duration(),
            sequencers = sequencers.len(),
            cameras = cameras.len(),
            "compiled shot"
        );
        Ok(ShotParameters {
            duration: times.shot_duration(),
            sequencers,
            cameras,
        })
    }
}
