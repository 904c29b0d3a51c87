//! Error types for the recorder

use opine_core::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Recording session not started")]
    NotStarted,
}
