//! Error handling - Hierarchical, zero-cost errors

use thiserror::Error;

use crate::pgp::{DecryptionFailed, PgpError};

pub type Result<T> = std::result::Result<T, Error>;

/// Venue channel error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key material could not be loaded
    #[error("Key error: {0}")]
    Key(String),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Send-side failure (transport or envelope)
    #[error("Communication error: {0}")]
    Communication(String),

    /// Inbound message failed authentication or could not be opened
    #[error(transparent)]
    Decryption(#[from] DecryptionFailed),

    /// Clear-signed message failed verification
    #[error("Verification error: {0}")]
    Verification(#[from] PgpError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Order spec rejected before it reached the wire
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// The outbound lane no longer accepts commands
    #[error("Sequencer is shut down")]
    Shutdown,

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// True for failures that mean the payload could not be authenticated.
    pub fn is_authentication_failure(&self) -> bool {
        match self {
            Error::Verification(e) => e.is_authentication_failure(),
            Error::Decryption(e) => e.cause().is_authentication_failure(),
            _ => false,
        }
    }
}
