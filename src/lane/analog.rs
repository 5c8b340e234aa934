//! Compilation of analog lanes into float instructions.
//!
//! Expression blocks are either constant, and repeated over the ticks they cover, or
//! depend on the time `t` elapsed since the start of the block and are sampled at every
//! tick. Ramp blocks interpolate linearly between their neighbours and compile to a lazy
//! [`Ramp`](crate::instruction::Ramp).

use tracing::debug;

use super::{block_bounds, check_span, join_blocks, AnalogTimeLane, AnalogValue, LaneError, StepTimes};
use crate::expression::{
    convert_magnitude, magnitude_in_unit, EvaluationError, Expression, Unit, Value,
    VariableNamespace, TIME_VARIABLE,
};
use crate::instruction::{ramp, DType, Pattern, SequencerInstruction};
use crate::timing::{number_ticks, start_tick, stop_tick, tick_times, TimeStep, NS};

pub struct AnalogLaneCompiler<'a> {
    name: &'a str,
    lane: &'a AnalogTimeLane,
    steps: &'a StepTimes,
    unit: Option<Unit>,
}

impl<'a> AnalogLaneCompiler<'a> {
    /// `unit` is the unit the channel outputs its values in, `None` for dimensionless
    /// channels.
    pub fn new(
        name: &'a str,
        lane: &'a AnalogTimeLane,
        steps: &'a StepTimes,
        unit: Option<Unit>,
    ) -> Result<Self, LaneError> {
        check_span(name, &lane.blocks, steps.len())?;
        Ok(Self {
            name,
            lane,
            steps,
            unit,
        })
    }

    pub fn compile(
        &self,
        variables: &VariableNamespace,
        time_step: TimeStep,
    ) -> Result<SequencerInstruction, LaneError> {
        let ranges = block_bounds(&self.lane.blocks);
        let mut instructions = Vec::with_capacity(ranges.len());
        for (index, (block, &(start, stop))) in self.lane.blocks.iter().zip(&ranges).enumerate() {
            let instruction = match &block.value {
                AnalogValue::Expression(expression) => {
                    self.compile_expression(expression, variables, start, stop, time_step)?
                }
                AnalogValue::Ramp => self.compile_ramp(index, &ranges, variables, time_step)?,
            };
            instructions.push(instruction);
        }
        let instruction = join_blocks(&DType::F64, instructions)?;
        debug!(
            lane = self.name,
            length = instruction.len(),
            depth = instruction.depth(),
            "compiled analog lane"
        );
        Ok(instruction)
    }

    fn compile_expression(
        &self,
        expression: &Expression,
        variables: &VariableNamespace,
        start: usize,
        stop: usize,
        time_step: TimeStep,
    ) -> Result<SequencerInstruction, LaneError> {
        let bounds = self.steps.bounds();
        let (t0, t1) = (bounds[start], bounds[stop]);
        let step = self.steps.name(start);
        let compiled = expression
            .compile()
            .map_err(|source| self.evaluation_error(step, source))?;

        if !expression.is_time_dependent() {
            let value = compiled
                .evaluate(variables)
                .map_err(|source| self.evaluation_error(step, source))?;
            let magnitude = self.magnitude(value, self.unit, step)?;
            let length = number_ticks(t0, t1, time_step);
            return Ok(SequencerInstruction::from(Pattern::from_f64s([magnitude])).repeat(length));
        }

        let times = tick_times(t0, t1, time_step);
        let mut values = Vec::with_capacity(times.len());
        for time in times {
            let value = compiled
                .evaluate_with(variables, &[(TIME_VARIABLE, Value::seconds(time))])
                .map_err(|source| self.evaluation_error(step, source))?;
            values.push(self.magnitude(value, self.unit, step)?);
        }
        Ok(Pattern::from_f64s(values).into())
    }

    fn compile_ramp(
        &self,
        index: usize,
        ranges: &[(usize, usize)],
        variables: &VariableNamespace,
        time_step: TimeStep,
    ) -> Result<SequencerInstruction, LaneError> {
        let bounds = self.steps.bounds();
        let (start, stop) = ranges[index];
        let step = self.steps.name(start);
        let neighbour = |i: Option<usize>| match i.and_then(|i| self.lane.blocks.get(i)) {
            Some(block) => match &block.value {
                AnalogValue::Expression(expression) => Some(expression),
                AnalogValue::Ramp => None,
            },
            None => None,
        };
        let (Some(previous), Some(next)) = (neighbour(index.checked_sub(1)), neighbour(Some(index + 1)))
        else {
            return Err(LaneError::RampWithoutNeighbours {
                lane: self.name.to_string(),
                step: step.to_string(),
            });
        };

        // Interpolation happens in base units, converted to the channel unit at the end.
        let base = self.unit.map(Unit::base);
        let (previous_start, previous_stop) = ranges[index - 1];
        let previous_duration = bounds[previous_stop] - bounds[previous_start];
        let v0 = self.evaluate_at(previous, variables, previous_duration, base, self.steps.name(previous_start))?;
        let v1 = self.evaluate_at(next, variables, 0.0, base, self.steps.name(stop))?;

        let (t0, t1) = (bounds[start], bounds[stop]);
        let (first, last) = (start_tick(t0, time_step), stop_tick(t1, time_step));
        if last <= first {
            return Ok(Pattern::empty(&DType::F64).into());
        }
        let at = |tick: usize| {
            let t = (tick as u64 * time_step.ns()) as f64 * NS;
            (t - t0) / (t1 - t0) * (v1 - v0) + v0
        };
        let (from, to) = match (base, self.unit) {
            (Some(base), Some(unit)) => {
                let convert = |x| {
                    convert_magnitude(x, base, unit).map_err(|source| LaneError::Unit {
                        lane: self.name.to_string(),
                        step: step.to_string(),
                        unit: self.unit,
                        source,
                    })
                };
                (convert(at(first))?, convert(at(last))?)
            }
            _ => (at(first), at(last)),
        };
        Ok(ramp(from, to, last - first))
    }

    fn evaluate_at(
        &self,
        expression: &Expression,
        variables: &VariableNamespace,
        time: f64,
        unit: Option<Unit>,
        step: &str,
    ) -> Result<f64, LaneError> {
        let value = expression
            .compile()
            .and_then(|compiled| compiled.evaluate_with(variables, &[(TIME_VARIABLE, Value::seconds(time))]))
            .map_err(|source| self.evaluation_error(step, source))?;
        self.magnitude(value, unit, step)
    }

    fn magnitude(&self, value: Value, unit: Option<Unit>, step: &str) -> Result<f64, LaneError> {
        if value.is_bool() {
            return Err(LaneError::NotAnalog {
                lane: self.name.to_string(),
                step: step.to_string(),
                value: value.to_string(),
            });
        }
        magnitude_in_unit(&value, unit)
            .map(|scalar| scalar.as_f64())
            .map_err(|source| LaneError::Unit {
                lane: self.name.to_string(),
                step: step.to_string(),
                unit,
                source,
            })
    }

    fn evaluation_error(&self, step: &str, source: EvaluationError) -> LaneError {
        LaneError::Evaluation {
            lane: self.name.to_string(),
            step: step.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{DottedVariableName, Quantity};
    use crate::lane::{Block, Step};
    use assert_approx_eq::assert_approx_eq;

    fn ts(ns: u64) -> TimeStep {
        TimeStep::from_ns(ns).unwrap()
    }

    fn steps(durations: &[&str]) -> StepTimes {
        let steps: Vec<Step> = durations
            .iter()
            .enumerate()
            .map(|(i, d)| Step::new(format!("step {i}"), *d))
            .collect();
        StepTimes::evaluate(&steps, &VariableNamespace::new()).unwrap()
    }

    fn expr(s: &str) -> AnalogValue {
        AnalogValue::Expression(Expression::new(s))
    }

    fn lane(blocks: Vec<(AnalogValue, usize)>) -> AnalogTimeLane {
        AnalogTimeLane {
            blocks: blocks.into_iter().map(|(v, s)| Block::new(v, s)).collect(),
        }
    }

    fn floats(instruction: &SequencerInstruction) -> Vec<f64> {
        instruction.to_pattern().columns()[0].as_f64s().unwrap().to_vec()
    }

    fn period() -> VariableNamespace {
        [(
            DottedVariableName::new("period").unwrap(),
            Value::Quantity(Quantity::new(10.0, Unit::Microsecond)),
        )]
        .into_iter()
        .collect()
    }

    #[test]
    fn constant_block_is_repeated_in_channel_unit() {
        let times = steps(&["10 us"]);
        let lane = lane(vec![(expr("2 V"), 1)]);
        let compiler = AnalogLaneCompiler::new("coil", &lane, &times, Some(Unit::Millivolt)).unwrap();
        let instruction = compiler.compile(&VariableNamespace::new(), ts(1000)).unwrap();
        assert!(matches!(instruction, SequencerInstruction::Repeated(_)));
        assert_eq!(instruction.len(), 10);
        assert!(floats(&instruction).iter().all(|&x| (x - 2000.0).abs() < 1e-9));
    }

    #[test]
    fn dimensionless_channel() {
        let times = steps(&["10 us"]);
        let lane = lane(vec![(expr("0.5"), 1)]);
        let compiler = AnalogLaneCompiler::new("a", &lane, &times, None).unwrap();
        let instruction = compiler.compile(&VariableNamespace::new(), ts(1000)).unwrap();
        assert_eq!(floats(&instruction), vec![0.5; 10]);
    }

    #[test]
    fn time_dependent_block_is_sampled_per_tick() {
        let times = steps(&["10 us"]);
        let lane = lane(vec![(expr("t / period V"), 1)]);
        let compiler = AnalogLaneCompiler::new("a", &lane, &times, Some(Unit::Volt)).unwrap();
        let instruction = compiler.compile(&period(), ts(1000)).unwrap();
        let values = floats(&instruction);
        assert_eq!(values.len(), 10);
        for (i, value) in values.iter().enumerate() {
            assert_approx_eq!(*value, i as f64 / 10.0, 1e-9);
        }
    }

    #[test]
    fn ramp_between_neighbours() {
        let times = steps(&["10 us", "10 us", "10 us"]);
        let lane = lane(vec![(expr("0 V"), 1), (AnalogValue::Ramp, 1), (expr("1 V"), 1)]);
        let compiler = AnalogLaneCompiler::new("a", &lane, &times, Some(Unit::Volt)).unwrap();
        let instruction = compiler.compile(&VariableNamespace::new(), ts(1000)).unwrap();
        assert_eq!(instruction.len(), 30);
        let SequencerInstruction::Concatenated(blocks) = &instruction else {
            panic!("expected a concatenation, got {instruction}");
        };
        assert!(matches!(blocks.instructions()[1], SequencerInstruction::Ramp(_)));
        let values = floats(&instruction);
        for i in 10..20 {
            assert_approx_eq!(values[i], (i - 10) as f64 / 10.0, 1e-9);
        }
        assert_approx_eq!(values[20], 1.0, 1e-12);
    }

    #[test]
    fn ramp_starts_where_the_previous_block_ends() {
        let times = steps(&["10 us", "10 us", "10 us"]);
        let lane = lane(vec![(expr("t / period V"), 1), (AnalogValue::Ramp, 1), (expr("0 V"), 1)]);
        let compiler = AnalogLaneCompiler::new("a", &lane, &times, Some(Unit::Millivolt)).unwrap();
        let instruction = compiler.compile(&period(), ts(1000)).unwrap();
        let values = floats(&instruction);
        assert_approx_eq!(values[10], 1000.0, 1e-6);
        assert_approx_eq!(values[15], 500.0, 1e-6);
    }

    #[test]
    fn ramp_needs_expression_neighbours() {
        let times = steps(&["10 us", "10 us"]);
        let lane = lane(vec![(AnalogValue::Ramp, 1), (expr("1 V"), 1)]);
        let compiler = AnalogLaneCompiler::new("a", &lane, &times, Some(Unit::Volt)).unwrap();
        let result = compiler.compile(&VariableNamespace::new(), ts(1000));
        assert!(matches!(result, Err(LaneError::RampWithoutNeighbours { .. })));
    }

    #[test]
    fn value_in_wrong_dimension() {
        let times = steps(&["10 us"]);
        let lane = lane(vec![(expr("1 s"), 1)]);
        let compiler = AnalogLaneCompiler::new("a", &lane, &times, Some(Unit::Volt)).unwrap();
        let result = compiler.compile(&VariableNamespace::new(), ts(1000));
        assert!(matches!(result, Err(LaneError::Unit { .. })));
    }

    #[test]
    fn boolean_is_not_analog() {
        let times = steps(&["10 us"]);
        let lane = lane(vec![(expr("True"), 1)]);
        let compiler = AnalogLaneCompiler::new("a", &lane, &times, None).unwrap();
        let result = compiler.compile(&VariableNamespace::new(), ts(1000));
        assert!(matches!(result, Err(LaneError::NotAnalog { .. })));
    }
}
