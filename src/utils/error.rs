//! The `error` module defines the error taxonomy shared by every broker component.
//!
//! Queue and topic operations return these errors explicitly; none of them is fatal
//! to the broker itself. Handler failures are not represented here: handlers return
//! `anyhow::Result<()>` and the worker treats any error as "retry via nack".

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("topic not found: {topic}")]
    TopicNotFound { topic: String },

    #[error("queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("invalid or expired receipt handle: {receipt}")]
    InvalidReceipt { receipt: String },

    #[error("failed to encode message payload: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("failed to decode message payload: {0}")]
    Decoding(#[source] serde_json::Error),

    #[error(
        "publish deadline exceeded on topic '{topic}': delivered {delivered}, skipped {remaining}"
    )]
    DeadlineExceeded {
        topic: String,
        delivered: usize,
        remaining: usize,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl BrokerError {
    /// True for the "referenced by name but not registered" family.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TopicNotFound { .. } | Self::QueueNotFound { .. })
    }

    /// Errors a caller can log and move past without losing the message.
    ///
    /// An invalid receipt means the message was either already handled or will be
    /// redelivered once its lease lapses.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidReceipt { .. } => true,
            Self::DeadlineExceeded { .. } => true,
            Self::TopicNotFound { .. } => false,
            Self::QueueNotFound { .. } => false,
            Self::Encoding(_) => false,
            Self::Decoding(_) => false,
            Self::Cancelled => false,
        }
    }
}
