use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job manager is missing its {0} capability")]
    MissingCapability(&'static str),

    #[error("Packet document is missing required field: {0}")]
    MissingField(&'static str),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invocation failed: {0}")]
    Invocation(String),

    #[error("Sync tracker error: {0}")]
    Sync(String),

    #[error("Invocation queue is closed")]
    QueueClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
