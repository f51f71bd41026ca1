use localpipe_stores::buffer::BufferError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Failed to start service - {0}")]
    Start(String),

    #[error("Failed to stop service - {0}")]
    Stop(String),

    #[error("Producer failed after sending {sent} units - {cause}")]
    Produce { sent: usize, cause: String },

    #[error("Sink error - {0}")]
    Sink(String),

    #[error("Transport error - {0}")]
    Transport(String),

    #[error("Config error - {0}")]
    Config(String),

    #[error("Validation error - {0}")]
    Validation(String),

    #[error("Service not ready - {0}")]
    NotReady(String),

    #[error("Invalid state transition - {0}")]
    InvalidState(String),
}

impl From<BufferError> for Error {
    fn from(value: BufferError) -> Self {
        Error::Transport(value.to_string())
    }
}
