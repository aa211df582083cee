use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while assembling or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The stage's thread is already running
    #[error("stage '{0}' has already been started")]
    AlreadyStarted(String),

    /// The stage was started before any operator was added
    #[error("stage '{0}' has no operators")]
    NoOperators(String),

    /// No stages in the pipeline
    #[error("cannot start a pipeline with no stages")]
    NoStages,

    /// Stage index out of range
    #[error("no stage at index {0}")]
    UnknownStage(usize),

    /// Thread spawn or join error
    #[error("thread error: {0}")]
    ThreadError(String),
}
