//! Staged, multi-threaded data-processing pipelines over single-slot,
//! zero-copy hand-off buffers.
//!
//! A pipeline is a linear chain of stages, each hosting user-defined
//! operators on its own thread. Adjacent stages share exactly one
//! [`Handoff`] buffer: a depth-one rendezvous channel that moves an item by
//! swapping owned cells, so the payload is never copied and a slow neighbor
//! naturally backpressures its peer by holding the slot.
//!
//! # Features
//!
//! - Three operator shapes ([`Source`], [`Transform`], [`Sink`]) invoked
//!   strictly sequentially inside their stage's thread
//! - `then`-composition of transforms around an owned intermediate cell
//! - Step and continuous pacing per stage, switchable at runtime
//! - Graceful drain on operator completion, error, or external stop, with
//!   the cause reported through each stage's completion signal
//! - Per-stage metrics: items received and published, invocation counts,
//!   iteration latency
//!
//! # Example
//!
//! ```ignore
//! use handoff_pipeline::{FnSink, FnSource, Mode, OpStatus, Pipeline, SinkStage, SourceStage};
//!
//! let mut source = SourceStage::<u64>::new("numbers");
//! let mut next = 0;
//! source.add_operator(FnSource::new("naturals", move |out: &mut u64| {
//!     *out = next;
//!     next += 1;
//!     if next < 100 { OpStatus::Running } else { OpStatus::Complete }
//! }));
//!
//! let mut sink = SinkStage::<u64>::new("printer");
//! sink.add_operator(FnSink::new("print", |v: &mut u64| {
//!     println!("{v}");
//!     OpStatus::Running
//! }));
//! sink.attach_input_port(source.output_port());
//!
//! let mut pipeline = Pipeline::new().stage(source).stage(sink);
//! pipeline.start()?;
//! pipeline.send_mode(0, Mode::Continuous)?;
//! pipeline.send_mode(1, Mode::Continuous)?;
//! pipeline.wait_stage(0)?;
//! pipeline.shutdown();
//! ```

pub mod buffer;
pub mod error;
pub mod metrics;
pub mod operator;
pub mod pipeline;
pub mod stage;

// Re-exports for convenience
pub use buffer::{Exchange, Handoff};
pub use error::{PipelineError, Result};
pub use metrics::{LatencyStats, MetricsSnapshot, StageMetrics};
pub use operator::{Chained, FnSink, FnSource, FnTransform, Identity, OpStatus, Sink, Source, Transform};
pub use pipeline::Pipeline;
pub use stage::{ExitCause, Mode, SinkStage, SourceStage, StageControl, TransformStage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
