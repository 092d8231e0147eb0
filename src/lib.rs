//! venue-channel - Core Library
//! Secure channel and ordered delivery for a PGP-authenticated trading venue

// Public modules
pub mod core;
pub mod pgp;
pub mod listener;
pub mod cache;
pub mod sequencer;
pub mod market;
pub mod user;
pub mod feeds;

// Re-exports
pub use core::{Config, Error, Result};
pub use cache::{Keyed, LatestValue, Registration, SubscriptionCache};
pub use market::MarketStream;
pub use pgp::{ClearSigner, DecryptionFailed, PgpError, PublicKeys, SecretKeys, SecureEnvelope, SignatureVerifier};
pub use sequencer::NonceSequencer;
pub use user::{UserEvent, UserStream};
