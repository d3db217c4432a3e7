use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("invalid task id: {0}")]
    InvalidTaskId(String),

    #[error("parameters must serialize to a JSON object, got {0}")]
    InvalidParameters(String),

    #[error("task store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("task store encoding: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid config {key}: {message}")]
    Config { key: String, message: String },

    #[error("queue is already started")]
    AlreadyStarted,
}
