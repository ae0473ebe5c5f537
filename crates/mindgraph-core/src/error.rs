//! Error types shared across the MindGraph crates

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("invalid event on {topic}: {reason}")]
    InvalidEvent { topic: String, reason: String },

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    pub fn invalid_event(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEvent {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}
