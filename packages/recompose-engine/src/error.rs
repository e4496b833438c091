use std::any::Any;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Evaluating the content panicked. Surfaced as-is rather than as an internal error.
    #[error("content panicked during recomputation: {message}")]
    Content { message: String },

    #[error("engine is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame callback panicked: {0}")]
    Panicked(String),

    /// The request was withdrawn or dropped without being executed.
    #[error("frame request was dropped before it was executed")]
    Abandoned,
}

impl From<FrameError> for EngineError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::Panicked(message) => EngineError::Content { message },
            FrameError::Abandoned => EngineError::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid flush mode {0:?}, expected \"inline\" or \"background\"")]
    InvalidFlushMode(String),
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
