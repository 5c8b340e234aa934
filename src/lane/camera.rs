//! Compilation of camera lanes into exposure triggers.

use tracing::debug;

use super::{block_bounds, check_span, join_blocks, CameraTimeLane, LaneError, StepTimes};
use crate::instruction::{DType, Pattern, SequencerInstruction};
use crate::timing::{number_ticks, TimeStep};

pub struct CameraLaneCompiler<'a> {
    name: &'a str,
    lane: &'a CameraTimeLane,
    steps: &'a StepTimes,
}

impl<'a> CameraLaneCompiler<'a> {
    pub fn new(
        name: &'a str,
        lane: &'a CameraTimeLane,
        steps: &'a StepTimes,
    ) -> Result<Self, LaneError> {
        check_span(name, &lane.blocks, steps.len())?;
        Ok(Self { name, lane, steps })
    }

    /// Trigger high during every picture block and low otherwise.
    ///
    /// Fails if a picture lasts less than a tick, since its exposure would be lost.
    pub fn compile_trigger(&self, time_step: TimeStep) -> Result<SequencerInstruction, LaneError> {
        let bounds = self.steps.bounds();
        let mut instructions = Vec::with_capacity(self.lane.blocks.len());
        for (block, (start, stop)) in self.lane.blocks.iter().zip(block_bounds(&self.lane.blocks)) {
            let length = number_ticks(bounds[start], bounds[stop], time_step);
            if let (Some(picture), 0) = (&block.value, length) {
                return Err(LaneError::PictureTooShort {
                    lane: self.name.to_string(),
                    step: self.steps.name(start).to_string(),
                    picture: picture.picture_name.clone(),
                    span_ns: (bounds[stop] - bounds[start]) * 1e9,
                    time_step,
                });
            }
            let high = block.value.is_some();
            instructions.push(SequencerInstruction::from(Pattern::from_bools([high])).repeat(length));
        }
        let instruction = join_blocks(&DType::BOOL, instructions)?;
        debug!(
            lane = self.name,
            length = instruction.len(),
            pictures = self.picture_names().len(),
            "compiled camera trigger"
        );
        Ok(instruction)
    }

    /// Exposure of every picture, in seconds, in lane order.
    pub fn compile_exposures(&self) -> Vec<f64> {
        let durations = self.steps.durations();
        self.lane
            .blocks
            .iter()
            .zip(block_bounds(&self.lane.blocks))
            .filter(|(block, _)| block.value.is_some())
            .map(|(_, (start, stop))| durations[start..stop].iter().sum::<f64>())
            .collect()
    }

    pub fn picture_names(&self) -> Vec<&str> {
        self.lane
            .blocks
            .iter()
            .filter_map(|block| block.value.as_ref())
            .map(|picture| picture.picture_name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::VariableNamespace;
    use crate::lane::{Block, Step, TakePicture};

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

    fn picture(name: &str) -> Option<TakePicture> {
        Some(TakePicture {
            picture_name: name.to_string(),
        })
    }

    fn lane() -> CameraTimeLane {
        CameraTimeLane {
            blocks: vec![
                Block::new(None, 1),
                Block::new(picture("atoms"), 2),
                Block::new(None, 1),
                Block::new(picture("background"), 1),
            ],
        }
    }

    #[test]
    fn trigger_is_high_during_pictures() {
        let times = steps(&["1 us", "2 us", "1 us", "3 us", "2 us"]);
        let lane = lane();
        let compiler = CameraLaneCompiler::new("camera", &lane, &times).unwrap();
        let trigger = compiler.compile_trigger(ts(1000)).unwrap();
        let flat = trigger.to_pattern();
        let expected = [
            vec![false],
            vec![true; 3],
            vec![false; 3],
            vec![true; 2],
        ]
        .concat();
        assert_eq!(flat.columns()[0].as_bools().unwrap(), expected.as_slice());
    }

    #[test]
    fn exposures_are_continuous_durations() {
        let times = steps(&["1 us", "2 us", "1 us", "3 us", "2 us"]);
        let lane = lane();
        let compiler = CameraLaneCompiler::new("camera", &lane, &times).unwrap();
        let exposures = compiler.compile_exposures();
        assert_eq!(exposures.len(), 2);
        assert!((exposures[0] - 3e-6).abs() < 1e-15);
        assert!((exposures[1] - 2e-6).abs() < 1e-15);
        assert_eq!(compiler.picture_names(), vec!["atoms", "background"]);
    }

    #[test]
    fn picture_shorter_than_a_tick() {
        let times = steps(&["11 ns", "3 ns"]);
        let lane = CameraTimeLane {
            blocks: vec![Block::new(None, 1), Block::new(picture("atoms"), 1)],
        };
        let compiler = CameraLaneCompiler::new("camera", &lane, &times).unwrap();
        let error = compiler.compile_trigger(ts(10)).unwrap_err();
        assert!(matches!(
            &error,
            LaneError::PictureTooShort { step, picture, .. } if step == "step 1" && picture == "atoms"
        ));
        assert!(error.to_string().contains("at step 'step 1'"));
    }
}
