//! Configuration - Type-safe, validated config

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    #[serde(default)]
    pub app: AppConfig,

    /// Venue endpoints and public key
    pub venue: VenueConfig,

    /// Trading account credentials
    pub account: AccountConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log filter used when RUST_LOG is unset
    pub log_level: String,

    /// Instruments the binary subscribes to on the market stream
    #[serde(default)]
    pub instruments: Vec<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info,venue_channel=debug".to_string(),
            instruments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Clear-signed public market data stream
    pub market_stream_url: String,

    /// Encrypted per-account stream
    pub user_stream_url: String,

    /// Armored public certificate of the venue
    pub public_key: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Venue account ID (must be positive)
    pub account_id: u64,

    /// Nonce group this client sequences its commands in
    #[serde(default)]
    pub nonce_group: u32,

    /// Armored secret certificate of the account
    pub secret_key: PathBuf,

    /// Environment variable holding the secret key passphrase
    pub passphrase_env: Option<String>,

    /// Encrypt outbound messages with wildcard recipient key IDs
    #[serde(default = "default_hide_recipient")]
    pub hide_recipient: bool,
}

fn default_hide_recipient() -> bool {
    true
}

impl AccountConfig {
    /// Resolve the passphrase from the configured environment variable.
    pub fn passphrase(&self) -> Result<Option<String>> {
        match &self.passphrase_env {
            None => Ok(None),
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|e| Error::Config(format!("Failed to read passphrase from ${var}: {e}"))),
        }
    }
}

impl Config {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.account_id == 0 {
            return Err(Error::Config("account_id must be > 0".to_string()));
        }
        for (name, url) in [
            ("market_stream_url", &self.venue.market_stream_url),
            ("user_stream_url", &self.venue.user_stream_url),
        ] {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(Error::Config(format!("{name} must be a ws:// or wss:// URL, got {url}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[venue]
market_stream_url = "wss://venue.example/market_stream"
user_stream_url = "wss://venue.example/user_stream"
public_key = "keys/venue.asc"

[account]
account_id = 83745263748
nonce_group = 5
secret_key = "keys/account.asc"
passphrase_env = "VENUE_KEY_PASSPHRASE"
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample_config() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.account.account_id, 83745263748);
        assert_eq!(config.account.nonce_group, 5);
        assert!(config.account.hide_recipient);
        assert_eq!(config.app.log_level, "info,venue_channel=debug");
        assert_eq!(config.venue.public_key, PathBuf::from("keys/venue.asc"));
    }

    #[test]
    fn test_rejects_zero_account_id() {
        let file = write_config(&SAMPLE.replace("83745263748", "0"));
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("account_id")));
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        let file = write_config(&SAMPLE.replace("wss://venue.example/user_stream", "https://venue.example"));
        assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load(Path::new("/nonexistent/venue-channel.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
