//! Compilation of digital lanes into boolean instructions.

use tracing::debug;

use super::{block_bounds, check_span, join_blocks, DigitalTimeLane, DigitalValue, LaneError, StepTimes};
use crate::expression::{Value, VariableNamespace};
use crate::instruction::{DType, Pattern, SequencerInstruction};
use crate::timing::{number_ticks, TimeStep};

pub struct DigitalLaneCompiler<'a> {
    name: &'a str,
    lane: &'a DigitalTimeLane,
    steps: &'a StepTimes,
}

impl<'a> DigitalLaneCompiler<'a> {
    pub fn new(
        name: &'a str,
        lane: &'a DigitalTimeLane,
        steps: &'a StepTimes,
    ) -> Result<Self, LaneError> {
        check_span(name, &lane.blocks, steps.len())?;
        Ok(Self { name, lane, steps })
    }

    /// Sample the lane every `time_step`; each block holds its value for as many ticks as
    /// it lasts.
    pub fn compile(
        &self,
        variables: &VariableNamespace,
        time_step: TimeStep,
    ) -> Result<SequencerInstruction, LaneError> {
        let bounds = self.steps.bounds();
        let mut instructions = Vec::with_capacity(self.lane.blocks.len());
        for (block, (start, stop)) in self.lane.blocks.iter().zip(block_bounds(&self.lane.blocks)) {
            let length = number_ticks(bounds[start], bounds[stop], time_step);
            let value = match &block.value {
                DigitalValue::Literal(value) => *value,
                DigitalValue::Expression(expression) => {
                    let step = self.steps.name(start).to_string();
                    match expression.evaluate(variables) {
                        Ok(Value::Bool(value)) => value,
                        Ok(other) => {
                            return Err(LaneError::NotBoolean {
                                lane: self.name.to_string(),
                                step,
                                value: other.to_string(),
                            })
                        }
                        Err(source) => {
                            return Err(LaneError::Evaluation {
                                lane: self.name.to_string(),
                                step,
                                source,
                            })
                        }
                    }
                }
            };
            instructions.push(SequencerInstruction::from(Pattern::from_bools([value])).repeat(length));
        }
        let instruction = join_blocks(&DType::BOOL, instructions)?;
        debug!(
            lane = self.name,
            length = instruction.len(),
            depth = instruction.depth(),
            "compiled digital lane"
        );
        Ok(instruction)
    }
}
