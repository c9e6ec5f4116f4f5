//! The `error` module defines the error type shared by every `popq` component.
//!
//! Each variant maps to one of the error kinds a producer or consumer can
//! observe. `StoreUnavailable` and `TopicUnavailable` are transient and should
//! be retried by the caller's polling loop; `NotFound` on ack/nack is a benign
//! race with lease expiry; `DeliveryFailed` and `BatchFailed` are recovered by
//! the retry machinery.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("message store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("message not found: {id}")]
    NotFound { id: String },

    #[error("delivery to subscriber '{subscriber}' failed: {reason}")]
    DeliveryFailed { subscriber: String, reason: String },

    #[error("batch failed on message {message_id}: {reason}")]
    BatchFailed { message_id: String, reason: String },

    #[error("topic '{topic}' unavailable: {reason}")]
    TopicUnavailable { topic: String, reason: String },

    #[error("batch size {size} out of range 1..={max}")]
    InvalidBatchSize { size: usize, max: usize },

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

/// Coarse classification reported to producers and consumers alongside a
/// status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StoreUnavailable,
    NotFound,
    DeliveryFailed,
    BatchFailed,
    TopicUnavailable,
    InvalidRequest,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DeliveryFailed { .. } => ErrorKind::DeliveryFailed,
            Self::BatchFailed { .. } => ErrorKind::BatchFailed,
            Self::TopicUnavailable { .. } => ErrorKind::TopicUnavailable,
            Self::InvalidBatchSize { .. } | Self::InvalidEnvelope(_) => ErrorKind::InvalidRequest,
            Self::Serialization(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-style status code for the error kind.
    pub fn status(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::StoreUnavailable | ErrorKind::TopicUnavailable => 503,
            ErrorKind::DeliveryFailed | ErrorKind::BatchFailed | ErrorKind::Internal => 500,
        }
    }

    /// Whether the caller should retry the operation, typically with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_)
                | Self::TopicUnavailable { .. }
                | Self::DeliveryFailed { .. }
                | Self::BatchFailed { .. }
        )
    }

    pub(crate) fn not_found(id: &str) -> Self {
        Error::NotFound { id: id.to_string() }
    }
}
