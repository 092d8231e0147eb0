//! OpenPGP envelope layer
//!
//! Inbound market data arrives clear-signed ([`SignatureVerifier`]); the user
//! channel is compressed, one-pass signed and encrypted in both directions
//! ([`SecureEnvelope`]). Packet handling is delegated to `sequoia-openpgp`;
//! canonicalization, recipient selection and the packet-order checks live here.

pub mod canonical;
pub mod envelope;
pub mod keys;
pub mod verifier;

use thiserror::Error;

pub use envelope::SecureEnvelope;
pub use keys::{PublicKeys, SecretKeys};
pub use verifier::{ClearSigner, SignatureVerifier};

pub type Result<T> = std::result::Result<T, PgpError>;

/// Why a payload could not be authenticated or opened
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PgpError {
    /// Armor or packet structure could not be parsed
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// None of our secret keys opens any session key
    #[error("Message is encrypted for unknown recipient")]
    UnknownRecipient,

    /// Signature did not validate against the sender's key
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Container not integrity protected, or its tag did not verify
    #[error("Integrity failure: {0}")]
    IntegrityFailure(String),

    /// The OpenPGP engine failed while producing a message
    #[error("OpenPGP engine error: {0}")]
    Engine(String),
}

impl PgpError {
    pub(crate) fn malformed(e: impl std::fmt::Display) -> Self {
        PgpError::MalformedInput(e.to_string())
    }

    pub(crate) fn engine(e: impl std::fmt::Display) -> Self {
        PgpError::Engine(e.to_string())
    }

    /// Signature and integrity failures: possible key mismatch or tampering.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, PgpError::InvalidSignature(_) | PgpError::IntegrityFailure(_))
    }
}

/// Single failure surfaced by [`SecureEnvelope::decrypt`]; the cause stays
/// available for callers that need to tell the cases apart.
#[derive(Debug, Error)]
#[error("Error decrypting message: {cause}")]
pub struct DecryptionFailed {
    #[source]
    cause: PgpError,
}

impl DecryptionFailed {
    pub fn cause(&self) -> &PgpError {
        &self.cause
    }

    pub fn into_cause(self) -> PgpError {
        self.cause
    }
}

impl From<PgpError> for DecryptionFailed {
    fn from(cause: PgpError) -> Self {
        Self { cause }
    }
}
