//! Error types for the message buffer.

use thiserror::Error;

/// Result type for buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;

#[derive(Error, Debug, Clone)]
pub enum BufferError {
    #[error("Offset not found: {0}")]
    OffsetNotFound(String),

    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    #[error("Failed to negatively acknowledge message: {0}")]
    Nack(String),

    #[error("Failed to fetch messages: {0}")]
    Fetch(String),
}
