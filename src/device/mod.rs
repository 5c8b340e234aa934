//! Device configurations: sequencers, their channels and triggers, cameras.
//!
//! Configurations are declarative. How a [`ChannelOutput`] becomes an instruction is
//! the business of [`crate::compiler`].

pub mod calibration;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expression::{Expression, Unit};
use crate::instruction::ScalarKind;
use crate::timing::TimeStep;

pub use calibration::{CalibrationError, PiecewiseLinearCalibration};

/// Signal edge a device reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerEdge {
    #[default]
    Rising,
    Falling,
    Both,
}

/// What starts a sequencer, or advances it to its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "trigger_type", rename_all = "snake_case")]
pub enum Trigger {
    /// Started by the computer. Exactly one sequencer per setup is started this way.
    Software,
    /// Started by an edge, then runs on its own clock.
    ExternalTriggerStart {
        #[serde(default)]
        edge: TriggerEdge,
    },
    /// Every tick is clocked externally.
    ExternalClock {
        #[serde(default)]
        edge: TriggerEdge,
    },
    /// Clocked externally, but only when its output changes.
    ExternalClockOnChange {
        #[serde(default)]
        edge: TriggerEdge,
    },
}

impl Trigger {
    /// Software triggers come first.
    pub fn priority(&self) -> u8 {
        match self {
            Trigger::Software => 0,
            _ => 1,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self, Trigger::Software)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Software => write!(f, "software"),
            Trigger::ExternalTriggerStart { edge } => write!(f, "external trigger start ({edge:?})"),
            Trigger::ExternalClock { edge } => write!(f, "external clock ({edge:?})"),
            Trigger::ExternalClockOnChange { edge } => {
                write!(f, "external clock on change ({edge:?})")
            }
        }
    }
}

/// Description of what a channel outputs during a shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelOutput {
    /// The same value for the whole shot.
    Constant { value: Expression },
    /// The values of a time lane. `default` is used when the shot has no such lane.
    LaneValues {
        lane: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Expression>,
    },
    /// A trigger for another device. `default` is used when the device is not
    /// configured.
    DeviceTrigger {
        device_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Box<ChannelOutput>>,
    },
    /// Maps its input through a measured calibration.
    CalibratedAnalogMapping {
        input: Box<ChannelOutput>,
        #[serde(default)]
        input_units: Option<Unit>,
        #[serde(default)]
        output_units: Option<Unit>,
        measured_data_points: Vec<(f64, f64)>,
    },
    /// Outputs its input earlier by `advance`.
    Advance {
        input: Box<ChannelOutput>,
        advance: Expression,
    },
    /// Outputs its input later by `delay`.
    Delay {
        input: Box<ChannelOutput>,
        delay: Expression,
    },
}

impl ChannelOutput {
    pub fn constant(value: impl Into<Expression>) -> Self {
        ChannelOutput::Constant {
            value: value.into(),
        }
    }

    pub fn lane(lane: impl Into<String>) -> Self {
        ChannelOutput::LaneValues {
            lane: lane.into(),
            default: None,
        }
    }

    pub fn trigger(device_name: impl Into<String>) -> Self {
        ChannelOutput::DeviceTrigger {
            device_name: device_name.into(),
            default: None,
        }
    }

    pub fn advanced(self, advance: impl Into<Expression>) -> Self {
        ChannelOutput::Advance {
            input: Box::new(self),
            advance: advance.into(),
        }
    }

    pub fn delayed(self, delay: impl Into<Expression>) -> Self {
        ChannelOutput::Delay {
            input: Box::new(self),
            delay: delay.into(),
        }
    }
}

impl fmt::Display for ChannelOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelOutput::Constant { value } => write!(f, "Constant({value})"),
            ChannelOutput::LaneValues { lane, default } => match default {
                Some(default) => write!(f, "{lane} | {default}"),
                None => write!(f, "{lane}"),
            },
            ChannelOutput::DeviceTrigger { device_name, .. } => write!(f, "trig({device_name})"),
            ChannelOutput::CalibratedAnalogMapping { input, .. } => write!(f, "calibrated({input})"),
            ChannelOutput::Advance { input, advance } => write!(f, "{input} << {advance}"),
            ChannelOutput::Delay { input, delay } => write!(f, "{delay} >> {input}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfiguration {
    Digital {
        description: String,
        output: ChannelOutput,
    },
    Analog {
        description: String,
        output: ChannelOutput,
        #[serde(default)]
        output_unit: Option<Unit>,
    },
}

impl ChannelConfiguration {
    pub fn description(&self) -> &str {
        match self {
            ChannelConfiguration::Digital { description, .. }
            | ChannelConfiguration::Analog { description, .. } => description,
        }
    }

    pub fn output(&self) -> &ChannelOutput {
        match self {
            ChannelConfiguration::Digital { output, .. }
            | ChannelConfiguration::Analog { output, .. } => output,
        }
    }

    /// Unit the channel output must be expressed in.
    pub fn required_unit(&self) -> Option<Unit> {
        match self {
            ChannelConfiguration::Digital { .. } => None,
            ChannelConfiguration::Analog { output_unit, .. } => *output_unit,
        }
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            ChannelConfiguration::Digital { .. } => ScalarKind::Bool,
            ChannelConfiguration::Analog { .. } => ScalarKind::F64,
        }
    }
}

impl fmt::Display for ChannelConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelConfiguration::Digital { description, .. } => {
                write!(f, "digital channel '{description}'")
            }
            ChannelConfiguration::Analog {
                description,
                output_unit: Some(unit),
                ..
            } => write!(f, "analog channel '{description}' with unit {unit}"),
            ChannelConfiguration::Analog { description, .. } => {
                write!(f, "analog channel '{description}'")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencerConfiguration {
    /// Tick period, in ns.
    pub time_step: TimeStep,
    pub trigger: Trigger,
    pub channels: Vec<ChannelConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceConfiguration {
    Sequencer(SequencerConfiguration),
    Camera,
    /// Any device that only needs to be started at the beginning of the shot.
    Other,
}

impl DeviceConfiguration {
    pub fn as_sequencer(&self) -> Option<&SequencerConfiguration> {
        match self {
            DeviceConfiguration::Sequencer(config) => Some(config),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeviceConfiguration::Sequencer(_) => "sequencer",
            DeviceConfiguration::Camera => "camera",
            DeviceConfiguration::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_round_trip() {
        let triggers = [
            Trigger::Software,
            Trigger::ExternalTriggerStart {
                edge: TriggerEdge::Falling,
            },
            Trigger::ExternalClock {
                edge: TriggerEdge::Both,
            },
            Trigger::ExternalClockOnChange {
                edge: TriggerEdge::Rising,
            },
        ];
        for trigger in triggers {
            let yaml = serde_yaml::to_string(&trigger).unwrap();
            assert_eq!(serde_yaml::from_str::<Trigger>(&yaml).unwrap(), trigger);
            let json = serde_json::to_string(&trigger).unwrap();
            assert_eq!(serde_json::from_str::<Trigger>(&json).unwrap(), trigger);
        }
    }

    #[test]
    fn trigger_tag_and_default_edge() {
        let trigger: Trigger = serde_yaml::from_str("trigger_type: external_clock_on_change").unwrap();
        assert_eq!(
            trigger,
            Trigger::ExternalClockOnChange {
                edge: TriggerEdge::Rising
            }
        );
        let json = serde_json::to_value(Trigger::Software).unwrap();
        assert_eq!(json["trigger_type"], "software");
    }

    #[test]
    fn priority() {
        assert_eq!(Trigger::Software.priority(), 0);
        assert_eq!(Trigger::ExternalClock { edge: TriggerEdge::Rising }.priority(), 1);
    }

    #[test]
    fn nested_outputs_round_trip() {
        let output = ChannelOutput::CalibratedAnalogMapping {
            input: Box::new(ChannelOutput::lane("aom").delayed("10 us")),
            input_units: Some(Unit::Megahertz),
            output_units: Some(Unit::Volt),
            measured_data_points: vec![(70.0, 0.0), (90.0, 5.0)],
        };
        let yaml = serde_yaml::to_string(&output).unwrap();
        assert_eq!(serde_yaml::from_str::<ChannelOutput>(&yaml).unwrap(), output);
    }

    #[test]
    fn sequencer_from_yaml() {
        let yaml = r#"
type: sequencer
time_step: 1000
trigger: {trigger_type: software}
channels:
  - type: digital
    description: shutter
    output: {type: lane_values, lane: shutter, default: "False"}
  - type: analog
    description: coil
    output_unit: V
    output: {type: constant, value: "0 V"}
  - type: digital
    description: camera trigger
    output: {type: device_trigger, device_name: camera}
"#;
        let config: DeviceConfiguration = serde_yaml::from_str(yaml).unwrap();
        let sequencer = config.as_sequencer().unwrap();
        assert_eq!(sequencer.time_step.ns(), 1000);
        assert!(sequencer.trigger.is_software());
        assert_eq!(sequencer.channels.len(), 3);
        assert_eq!(sequencer.channels[1].required_unit(), Some(Unit::Volt));
        assert_eq!(sequencer.channels[2].output(), &ChannelOutput::trigger("camera"));
        assert_eq!(sequencer.channels[0].to_string(), "digital channel 'shutter'");
    }

    #[test]
    fn camera_and_other_devices() {
        let camera: DeviceConfiguration = serde_yaml::from_str("type: camera").unwrap();
        assert_eq!(camera, DeviceConfiguration::Camera);
        assert_eq!(camera.kind(), "camera");
        assert!(camera.as_sequencer().is_none());
    }

    #[test]
    fn output_display() {
        let output = ChannelOutput::lane("x").advanced("1 us");
        assert_eq!(output.to_string(), "x << 1 us");
    }
}
