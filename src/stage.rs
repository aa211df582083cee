use crate::buffer::Handoff;
use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::operator::{OpStatus, Sink, Source, Transform};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, trace};

/// Execution pacing of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Block at the top of each iteration until a command arrives
    Step,
    /// Run as fast as the ports allow
    Continuous,
}

/// Why a stage left its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// An operator reported `Complete`; the final item was published
    Completed,
    /// An operator reported `Error` or its invocation panicked
    Failed,
    /// The owner stopped the stage, or a peer terminated a shared port
    Stopped,
}

struct ControlState {
    mode: Mode,
    pending_command: bool,
    shutting_down: bool,
}

/// Control block shared between a stage's owner and its thread
struct Control {
    state: Mutex<ControlState>,
    cond: Condvar,
}

impl Control {
    fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                mode: Mode::Step,
                pending_command: false,
                shutting_down: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Step gate at the top of each iteration. In `Step` mode, blocks until
    /// a command or shutdown arrives. Returns false once the stage is
    /// shutting down.
    fn await_command(&self) -> bool {
        let mut state = self.state.lock();
        if state.mode == Mode::Step && !state.shutting_down {
            self.cond
                .wait_while(&mut state, |s| !s.pending_command && !s.shutting_down);
            state.pending_command = false;
        }
        !state.shutting_down
    }

    /// Record a mode command. The command itself counts as one step, so a
    /// message both switches the mode and releases a stage waiting in
    /// `Step` mode.
    fn send_mode(&self, mode: Mode) {
        let mut state = self.state.lock();
        state.mode = mode;
        state.pending_command = true;
        drop(state);
        self.cond.notify_one();
    }

    /// Mark the stage as shutting down. Returns true on the first call.
    fn begin_shutdown(&self) -> bool {
        let mut state = self.state.lock();
        let first = !state.shutting_down;
        state.shutting_down = true;
        drop(state);
        self.cond.notify_all();
        first
    }
}

/// One-shot signal fired by the stage thread when it leaves its loop
struct Completion {
    state: Mutex<Option<ExitCause>>,
    cond: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Only the first call records a cause; later calls are ignored.
    fn fire(&self, cause: ExitCause) {
        let mut state = self.state.lock();
        if state.is_none() {
            *state = Some(cause);
            self.cond.notify_all();
        }
    }

    fn wait(&self) -> ExitCause {
        let mut state = self.state.lock();
        loop {
            if let Some(cause) = *state {
                return cause;
            }
            self.cond.wait(&mut state);
        }
    }
}

/// Fires `Failed` if the stage thread unwinds before reporting a cause.
/// The regular exit path fires first, which makes this a no-op.
struct PanicFuse {
    completion: Arc<Completion>,
}

impl Drop for PanicFuse {
    fn drop(&mut self) {
        self.completion.fire(ExitCause::Failed);
    }
}

/// Name, control block, completion signal and thread handle common to the
/// three stage kinds
struct StageCore {
    name: String,
    control: Arc<Control>,
    completion: Arc<Completion>,
    metrics: Arc<StageMetrics>,
    thread: Option<JoinHandle<()>>,
}

impl StageCore {
    fn new(name: String) -> Self {
        Self {
            name,
            control: Arc::new(Control::new()),
            completion: Arc::new(Completion::new()),
            metrics: Arc::new(StageMetrics::new()),
            thread: None,
        }
    }

    fn send_mode(&self, mode: Mode) {
        debug!("[{}] mode command: {:?}", self.name, mode);
        self.control.send_mode(mode);
    }

    fn begin_shutdown(&self) {
        if self.control.begin_shutdown() {
            debug!("[{}] stop requested", self.name);
        }
    }

    fn wait_to_end(&mut self) -> ExitCause {
        let cause = self.completion.wait();
        if let Some(handle) = self.thread.take() {
            // A panicked thread has already fired `Failed` through its fuse.
            let _ = handle.join();
        }
        cause
    }

    fn spawn(
        &mut self,
        body: impl FnOnce(Arc<Control>, Arc<Completion>, Arc<StageMetrics>) + Send + 'static,
    ) -> Result<()> {
        let control = Arc::clone(&self.control);
        let completion = Arc::clone(&self.completion);
        let metrics = Arc::clone(&self.metrics);
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || body(control, completion, metrics))
            .map_err(|e| PipelineError::ThreadError(e.to_string()))?;
        self.thread = Some(handle);
        Ok(())
    }
}

/// Erased control surface of a stage, letting a
/// [`Pipeline`](crate::pipeline::Pipeline) drive stages of differing edge
/// types uniformly.
pub trait StageControl: Send {
    fn name(&self) -> &str;

    /// Spawn the stage thread
    fn start_thread(&mut self) -> Result<()>;

    /// Deliver a mode command; also advances a `Step`-mode stage by one
    /// iteration
    fn send_mode(&self, mode: Mode);

    /// Request shutdown and terminate the attached ports. Idempotent.
    fn stop(&self);

    /// Block until the stage thread has left its loop
    fn wait_to_end(&mut self) -> ExitCause;
}

/// Records the first terminal status an operator run reports. `Failed`
/// displaces `Completed`; nothing displaces `Failed`.
fn note_status(cause: &mut Option<ExitCause>, status: OpStatus, metrics: &StageMetrics) {
    match status {
        OpStatus::Running => {}
        OpStatus::Complete => {
            metrics.record_completion();
            cause.get_or_insert(ExitCause::Completed);
        }
        OpStatus::Error => {
            metrics.record_error();
            *cause = Some(ExitCause::Failed);
        }
    }
}

/// A stage executor hosting source operators; owns the head thread of a
/// pipeline and an output port.
pub struct SourceStage<O> {
    core: StageCore,
    ops: Vec<Box<dyn Source<O>>>,
    output_port: Option<Arc<Handoff<O>>>,
}

impl<O> SourceStage<O> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: StageCore::new(name.into()),
            ops: Vec::new(),
            output_port: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn metrics(&self) -> Arc<StageMetrics> {
        Arc::clone(&self.core.metrics)
    }

    /// Append an operator. Operators run in order on the stage thread;
    /// appending after `start_thread` has no effect.
    pub fn add_operator(&mut self, op: impl Source<O> + 'static) {
        self.ops.push(Box::new(op));
    }

    /// Lazily create and share this stage's output buffer so the
    /// downstream peer can attach it.
    pub fn output_port(&mut self) -> Arc<Handoff<O>>
    where
        O: Default,
    {
        let name = &self.core.name;
        Arc::clone(
            self.output_port
                .get_or_insert_with(|| Arc::new(Handoff::new(format!("{name}_output")))),
        )
    }

    /// Adopt the downstream peer's buffer, releasing any lazily created one
    pub fn attach_output_port(&mut self, port: Arc<Handoff<O>>) {
        self.output_port = Some(port);
    }

    pub fn send_mode(&self, mode: Mode) {
        self.core.send_mode(mode);
    }

    pub fn stop(&self) {
        self.core.begin_shutdown();
        if let Some(port) = &self.output_port {
            port.terminate();
        }
    }

    pub fn wait_to_end(&mut self) -> ExitCause {
        self.core.wait_to_end()
    }

    pub fn start_thread(&mut self) -> Result<()>
    where
        O: Default + Send + 'static,
    {
        if self.core.thread.is_some() {
            return Err(PipelineError::AlreadyStarted(self.core.name.clone()));
        }
        if self.ops.is_empty() {
            return Err(PipelineError::NoOperators(self.core.name.clone()));
        }
        let output = self.output_port();
        let mut ops = std::mem::take(&mut self.ops);
        let name = self.core.name.clone();
        self.core.spawn(move |control, completion, metrics| {
            let _fuse = PanicFuse {
                completion: Arc::clone(&completion),
            };
            let mut scratch = O::default();
            let mut cause: Option<ExitCause> = None;
            debug!("[{name}] thread started");
            loop {
                if !control.await_command() {
                    break;
                }
                let started = Instant::now();
                for op in &mut ops {
                    trace!("[{name}] invoking {}", op.name());
                    metrics.record_invocation();
                    note_status(&mut cause, op.produce(&mut scratch), &metrics);
                }
                if cause.is_some() {
                    control.begin_shutdown();
                }
                if output.send(&mut scratch).is_terminated() {
                    control.begin_shutdown();
                    continue;
                }
                metrics.record_published();
                metrics.record_latency(started.elapsed());
            }
            debug!("[{name}] thread exiting");
            completion.fire(cause.unwrap_or(ExitCause::Stopped));
        })
    }
}

impl<O> Drop for SourceStage<O> {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.core.thread.take() {
            let _ = handle.join();
        }
    }
}

impl<O: Default + Send + 'static> StageControl for SourceStage<O> {
    fn name(&self) -> &str {
        SourceStage::name(self)
    }

    fn start_thread(&mut self) -> Result<()> {
        SourceStage::start_thread(self)
    }

    fn send_mode(&self, mode: Mode) {
        SourceStage::send_mode(self, mode);
    }

    fn stop(&self) {
        SourceStage::stop(self);
    }

    fn wait_to_end(&mut self) -> ExitCause {
        SourceStage::wait_to_end(self)
    }
}

/// A stage executor hosting transform operators between an input and an
/// output port.
///
/// Each iteration withdraws one item into the input scratch cell, runs
/// every operator in order against the scratch pair, and publishes the
/// output scratch cell. To pipe a value through differing intermediate
/// types, compose the operators with [`Transform::then`] and append the
/// composition.
pub struct TransformStage<I, O> {
    core: StageCore,
    ops: Vec<Box<dyn Transform<I, O>>>,
    input_port: Option<Arc<Handoff<I>>>,
    output_port: Option<Arc<Handoff<O>>>,
}

impl<I, O> TransformStage<I, O> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: StageCore::new(name.into()),
            ops: Vec::new(),
            input_port: None,
            output_port: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn metrics(&self) -> Arc<StageMetrics> {
        Arc::clone(&self.core.metrics)
    }

    pub fn add_operator(&mut self, op: impl Transform<I, O> + 'static) {
        self.ops.push(Box::new(op));
    }

    pub fn input_port(&mut self) -> Arc<Handoff<I>>
    where
        I: Default,
    {
        let name = &self.core.name;
        Arc::clone(
            self.input_port
                .get_or_insert_with(|| Arc::new(Handoff::new(format!("{name}_input")))),
        )
    }

    pub fn attach_input_port(&mut self, port: Arc<Handoff<I>>) {
        self.input_port = Some(port);
    }

    pub fn output_port(&mut self) -> Arc<Handoff<O>>
    where
        O: Default,
    {
        let name = &self.core.name;
        Arc::clone(
            self.output_port
                .get_or_insert_with(|| Arc::new(Handoff::new(format!("{name}_output")))),
        )
    }

    pub fn attach_output_port(&mut self, port: Arc<Handoff<O>>) {
        self.output_port = Some(port);
    }

    pub fn send_mode(&self, mode: Mode) {
        self.core.send_mode(mode);
    }

    pub fn stop(&self) {
        self.core.begin_shutdown();
        if let Some(port) = &self.input_port {
            port.terminate();
        }
        if let Some(port) = &self.output_port {
            port.terminate();
        }
    }

    pub fn wait_to_end(&mut self) -> ExitCause {
        self.core.wait_to_end()
    }

    pub fn start_thread(&mut self) -> Result<()>
    where
        I: Default + Send + 'static,
        O: Default + Send + 'static,
    {
        if self.core.thread.is_some() {
            return Err(PipelineError::AlreadyStarted(self.core.name.clone()));
        }
        if self.ops.is_empty() {
            return Err(PipelineError::NoOperators(self.core.name.clone()));
        }
        let input = self.input_port();
        let output = self.output_port();
        let mut ops = std::mem::take(&mut self.ops);
        let name = self.core.name.clone();
        self.core.spawn(move |control, completion, metrics| {
            let _fuse = PanicFuse {
                completion: Arc::clone(&completion),
            };
            let mut input_scratch = I::default();
            let mut output_scratch = O::default();
            let mut cause: Option<ExitCause> = None;
            debug!("[{name}] thread started");
            loop {
                if !control.await_command() {
                    break;
                }
                let started = Instant::now();
                if input.receive(&mut input_scratch).is_terminated() {
                    // A termination wake is a shutdown notice, never data.
                    control.begin_shutdown();
                    continue;
                }
                metrics.record_received();
                for op in &mut ops {
                    trace!("[{name}] invoking {}", op.name());
                    metrics.record_invocation();
                    note_status(
                        &mut cause,
                        op.apply(&mut input_scratch, &mut output_scratch),
                        &metrics,
                    );
                }
                if cause.is_some() {
                    control.begin_shutdown();
                }
                if output.send(&mut output_scratch).is_terminated() {
                    control.begin_shutdown();
                    continue;
                }
                metrics.record_published();
                metrics.record_latency(started.elapsed());
            }
            debug!("[{name}] thread exiting");
            completion.fire(cause.unwrap_or(ExitCause::Stopped));
        })
    }
}

impl<I, O> Drop for TransformStage<I, O> {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.core.thread.take() {
            let _ = handle.join();
        }
    }
}

impl<I, O> StageControl for TransformStage<I, O>
where
    I: Default + Send + 'static,
    O: Default + Send + 'static,
{
    fn name(&self) -> &str {
        TransformStage::name(self)
    }

    fn start_thread(&mut self) -> Result<()> {
        TransformStage::start_thread(self)
    }

    fn send_mode(&self, mode: Mode) {
        TransformStage::send_mode(self, mode);
    }

    fn stop(&self) {
        TransformStage::stop(self);
    }

    fn wait_to_end(&mut self) -> ExitCause {
        TransformStage::wait_to_end(self)
    }
}

/// A stage executor hosting sink operators; owns the tail thread of a
/// pipeline and an input port. An item counts as consumed once the last
/// operator's invocation returns.
pub struct SinkStage<I> {
    core: StageCore,
    ops: Vec<Box<dyn Sink<I>>>,
    input_port: Option<Arc<Handoff<I>>>,
}

impl<I> SinkStage<I> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: StageCore::new(name.into()),
            ops: Vec::new(),
            input_port: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn metrics(&self) -> Arc<StageMetrics> {
        Arc::clone(&self.core.metrics)
    }

    pub fn add_operator(&mut self, op: impl Sink<I> + 'static) {
        self.ops.push(Box::new(op));
    }

    pub fn input_port(&mut self) -> Arc<Handoff<I>>
    where
        I: Default,
    {
        let name = &self.core.name;
        Arc::clone(
            self.input_port
                .get_or_insert_with(|| Arc::new(Handoff::new(format!("{name}_input")))),
        )
    }

    pub fn attach_input_port(&mut self, port: Arc<Handoff<I>>) {
        self.input_port = Some(port);
    }

    pub fn send_mode(&self, mode: Mode) {
        self.core.send_mode(mode);
    }

    pub fn stop(&self) {
        self.core.begin_shutdown();
        if let Some(port) = &self.input_port {
            port.terminate();
        }
    }

    pub fn wait_to_end(&mut self) -> ExitCause {
        self.core.wait_to_end()
    }

    pub fn start_thread(&mut self) -> Result<()>
    where
        I: Default + Send + 'static,
    {
        if self.core.thread.is_some() {
            return Err(PipelineError::AlreadyStarted(self.core.name.clone()));
        }
        if self.ops.is_empty() {
            return Err(PipelineError::NoOperators(self.core.name.clone()));
        }
        let input = self.input_port();
        let mut ops = std::mem::take(&mut self.ops);
        let name = self.core.name.clone();
        self.core.spawn(move |control, completion, metrics| {
            let _fuse = PanicFuse {
                completion: Arc::clone(&completion),
            };
            let mut scratch = I::default();
            let mut cause: Option<ExitCause> = None;
            debug!("[{name}] thread started");
            loop {
                if !control.await_command() {
                    break;
                }
                let started = Instant::now();
                if input.receive(&mut scratch).is_terminated() {
                    control.begin_shutdown();
                    continue;
                }
                metrics.record_received();
                for op in &mut ops {
                    trace!("[{name}] invoking {}", op.name());
                    metrics.record_invocation();
                    note_status(&mut cause, op.consume(&mut scratch), &metrics);
                }
                if cause.is_some() {
                    control.begin_shutdown();
                }
                metrics.record_latency(started.elapsed());
            }
            debug!("[{name}] thread exiting");
            completion.fire(cause.unwrap_or(ExitCause::Stopped));
        })
    }
}

impl<I> Drop for SinkStage<I> {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.core.thread.take() {
            let _ = handle.join();
        }
    }
}

impl<I: Default + Send + 'static> StageControl for SinkStage<I> {
    fn name(&self) -> &str {
        SinkStage::name(self)
    }

    fn start_thread(&mut self) -> Result<()> {
        SinkStage::start_thread(self)
    }

    fn send_mode(&self, mode: Mode) {
        SinkStage::send_mode(self, mode);
    }

    fn stop(&self) {
        SinkStage::stop(self);
    }

    fn wait_to_end(&mut self) -> ExitCause {
        SinkStage::wait_to_end(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{FnTransform, OpStatus, Transform};
    use std::time::Duration;

    fn scale(name: &'static str, factor: f64) -> impl Transform<i32, f32> {
        FnTransform::new(name, move |input: &mut i32, output: &mut f32| {
            *output = (f64::from(*input) * factor) as f32;
            OpStatus::Running
        })
    }

    fn floor_div(name: &'static str, divisor: f32) -> impl Transform<f32, f32> {
        FnTransform::new(name, move |input: &mut f32, output: &mut f32| {
            *output = (*input / divisor).floor();
            OpStatus::Running
        })
    }

    #[test]
    fn test_one_stage_continuous_then_step() {
        let mut stage = TransformStage::<i32, f32>::new("exec_1");
        stage.add_operator(scale("multiply_3.1", 3.1).then(floor_div("divide_3_floor", 3.0)));
        let input = stage.input_port();
        let output = stage.output_port();

        stage.start_thread().unwrap();
        stage.send_mode(Mode::Continuous);

        let mut cell = 16;
        let mut result = 0.0f32;
        assert!(input.send(&mut cell).is_swapped());
        assert!(output.receive(&mut result).is_swapped());
        assert!((result - 16.0).abs() < 1e-5);

        cell = 15;
        assert!(input.send(&mut cell).is_swapped());
        assert!(output.receive(&mut result).is_swapped());
        assert!((result - 15.0).abs() < 1e-5);

        // Switching to Step counts as one command, releasing one more
        // iteration before the stage waits.
        stage.send_mode(Mode::Step);
        cell = 13;
        assert!(input.send(&mut cell).is_swapped());
        assert!(output.receive(&mut result).is_swapped());
        assert!((result - 13.0).abs() < 1e-5);

        stage.send_mode(Mode::Step);
        cell = 12;
        assert!(input.send(&mut cell).is_swapped());
        assert!(output.receive(&mut result).is_swapped());
        assert!((result - 12.0).abs() < 1e-5);

        stage.stop();
        assert_eq!(stage.wait_to_end(), ExitCause::Stopped);

        let metrics = stage.metrics();
        assert_eq!(metrics.received(), 4);
        assert_eq!(metrics.published(), 4);
    }

    #[test]
    fn test_stop_while_blocked_receiving() {
        let mut stage = TransformStage::<i32, f32>::new("idle");
        stage.add_operator(scale("x2", 2.0));
        stage.send_mode(Mode::Continuous);
        stage.start_thread().unwrap();

        std::thread::sleep(Duration::from_millis(50));
        stage.stop();
        assert_eq!(stage.wait_to_end(), ExitCause::Stopped);
        assert_eq!(stage.metrics().received(), 0);
    }

    #[test]
    fn test_stop_while_blocked_publishing() {
        let mut stage = TransformStage::<i32, f32>::new("clogged");
        stage.add_operator(scale("x2", 2.0));
        let input = stage.input_port();
        let _output = stage.output_port();
        stage.send_mode(Mode::Continuous);
        stage.start_thread().unwrap();

        // Nobody ever withdraws, so the stage wedges in its publish.
        let mut cell = 4;
        assert!(input.send(&mut cell).is_swapped());
        std::thread::sleep(Duration::from_millis(50));

        stage.stop();
        assert_eq!(stage.wait_to_end(), ExitCause::Stopped);
        assert_eq!(stage.metrics().received(), 1);
        assert_eq!(stage.metrics().published(), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut stage = TransformStage::<i32, f32>::new("twice");
        stage.add_operator(scale("x2", 2.0));
        stage.send_mode(Mode::Continuous);
        stage.start_thread().unwrap();

        stage.stop();
        stage.stop();
        assert_eq!(stage.wait_to_end(), ExitCause::Stopped);
    }

    #[test]
    fn test_operator_error_drains_stage() {
        let mut stage = TransformStage::<i32, i32>::new("faulty");
        stage.add_operator(FnTransform::new("fail", |_: &mut i32, output: &mut i32| {
            *output = -1;
            OpStatus::Error
        }));
        let input = stage.input_port();
        let output = stage.output_port();
        stage.send_mode(Mode::Continuous);
        stage.start_thread().unwrap();

        let mut cell = 1;
        assert!(input.send(&mut cell).is_swapped());
        // The poisoned item is still published before the stage drains.
        let mut result = 0;
        assert!(output.receive(&mut result).is_swapped());
        assert_eq!(result, -1);

        assert_eq!(stage.wait_to_end(), ExitCause::Failed);
        assert_eq!(stage.metrics().errors(), 1);
    }

    #[test]
    fn test_start_errors() {
        let mut empty = TransformStage::<i32, i32>::new("empty");
        assert!(matches!(
            empty.start_thread(),
            Err(PipelineError::NoOperators(_))
        ));

        let mut stage = TransformStage::<i32, f32>::new("double_start");
        stage.add_operator(scale("x2", 2.0));
        stage.send_mode(Mode::Continuous);
        stage.start_thread().unwrap();
        assert!(matches!(
            stage.start_thread(),
            Err(PipelineError::AlreadyStarted(_))
        ));
        stage.stop();
        stage.wait_to_end();
    }

    #[test]
    fn test_peer_termination_drains_stage() {
        let mut stage = TransformStage::<i32, f32>::new("abandoned");
        stage.add_operator(scale("x2", 2.0));
        let input = stage.input_port();
        stage.send_mode(Mode::Continuous);
        stage.start_thread().unwrap();

        // The upstream peer shuts the shared buffer down on its own.
        input.terminate();
        assert_eq!(stage.wait_to_end(), ExitCause::Stopped);
    }
}
