use crate::error::{PipelineError, Result};
use crate::stage::{ExitCause, Mode, StageControl};
use std::time::Duration;
use tracing::debug;

/// Owner-side supervisor for a chain of stages.
///
/// A pipeline is not a runtime entity of its own: stages are wired to one
/// another through their ports before they are handed over, and the
/// supervisor only drives their shared lifecycle — group start, cascaded
/// stop and join. Stages must be added in source-to-sink order; the stop
/// cascade walks the same order with a drain delay between neighbors so
/// in-flight items leave through the regular publish path instead of being
/// discarded by termination.
pub struct Pipeline {
    stages: Vec<Box<dyn StageControl>>,
    drain_delay: Duration,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            drain_delay: Duration::from_millis(500),
        }
    }

    /// Pause inserted between successive stops of the shutdown cascade
    pub fn drain_delay(mut self, delay: Duration) -> Self {
        self.drain_delay = delay;
        self
    }

    /// Append a stage. Wire its ports before moving it in.
    pub fn stage(mut self, stage: impl StageControl + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Start every stage thread, source to sink
    pub fn start(&mut self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        for stage in &mut self.stages {
            stage.start_thread()?;
        }
        Ok(())
    }

    /// Deliver a mode command to the stage at `index`
    pub fn send_mode(&self, index: usize, mode: Mode) -> Result<()> {
        let stage = self
            .stages
            .get(index)
            .ok_or(PipelineError::UnknownStage(index))?;
        stage.send_mode(mode);
        Ok(())
    }

    /// Block until the stage at `index` has left its loop
    pub fn wait_stage(&mut self, index: usize) -> Result<ExitCause> {
        let stage = self
            .stages
            .get_mut(index)
            .ok_or(PipelineError::UnknownStage(index))?;
        Ok(stage.wait_to_end())
    }

    /// Stop every stage in source-to-sink order, pausing between neighbors
    /// so items still in flight can drain downstream.
    pub fn stop_all(&self) {
        for (index, stage) in self.stages.iter().enumerate() {
            if index > 0 {
                std::thread::sleep(self.drain_delay);
            }
            debug!("[{}] cascading stop", stage.name());
            stage.stop();
        }
    }

    /// Join every stage, returning each name with its exit cause
    pub fn wait_all(&mut self) -> Vec<(String, ExitCause)> {
        self.stages
            .iter_mut()
            .map(|stage| (stage.name().to_string(), stage.wait_to_end()))
            .collect()
    }

    /// Cascaded stop followed by a join of every stage
    pub fn shutdown(mut self) -> Vec<(String, ExitCause)> {
        self.stop_all();
        self.wait_all()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{FnSink, FnSource, OpStatus};
    use crate::stage::{SinkStage, SourceStage};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn naturals(upto: u64) -> impl crate::operator::Source<u64> {
        let mut next = 1;
        FnSource::new("naturals", move |output: &mut u64| {
            *output = next;
            if next < upto {
                next += 1;
                OpStatus::Running
            } else {
                OpStatus::Complete
            }
        })
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let mut pipeline = Pipeline::new();
        assert!(matches!(pipeline.start(), Err(PipelineError::NoStages)));
    }

    #[test]
    fn test_unknown_stage_index() {
        let pipeline = Pipeline::new();
        assert!(matches!(
            pipeline.send_mode(3, Mode::Continuous),
            Err(PipelineError::UnknownStage(3))
        ));
    }

    #[test]
    fn test_source_to_sink_run() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&seen);

        let mut source = SourceStage::<u64>::new("numbers");
        source.add_operator(naturals(20));
        let mut sink = SinkStage::<u64>::new("collector");
        sink.add_operator(FnSink::new("collect", move |input: &mut u64| {
            store.lock().push(*input);
            OpStatus::Running
        }));
        sink.attach_input_port(source.output_port());

        let mut pipeline = Pipeline::new()
            .drain_delay(Duration::from_millis(50))
            .stage(source)
            .stage(sink);
        pipeline.start().unwrap();
        pipeline.send_mode(0, Mode::Continuous).unwrap();
        pipeline.send_mode(1, Mode::Continuous).unwrap();

        assert_eq!(pipeline.wait_stage(0).unwrap(), ExitCause::Completed);
        std::thread::sleep(Duration::from_millis(100));

        let causes = pipeline.shutdown();
        assert_eq!(causes[0].1, ExitCause::Completed);
        assert_eq!(causes[1].1, ExitCause::Stopped);

        let expected: Vec<u64> = (1..=20).collect();
        assert_eq!(*seen.lock(), expected);
    }
}
