//! # Game Configuration
//!
//! Loaded once at startup from TOML.
//!
//! ```toml
//! frame_rate = 60
//!
//! [network]
//! host = "127.0.0.1"
//! port = 25564
//! ```

use serde::Deserialize;
use skelanim_networking::NetworkConfig;
use std::path::Path;

use crate::error::{AppError, AppResult};

/// Frames per second when none is configured.
pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Frame loop rate in Hz.
    pub frame_rate: u32,
    /// Defaults for `Connect` and `Server`.
    pub network: NetworkConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            network: NetworkConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] on malformed TOML, unknown keys, a zero
    /// frame rate, or an invalid network table.
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))?;
        if config.frame_rate == 0 {
            return Err(AppError::Config("frame_rate must be positive".to_owned()));
        }
        config
            .network
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// [`AppError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.frame_rate, 60);
        assert_eq!(config.network.port, 25564);
    }

    #[test]
    fn test_network_table() {
        let config = AppConfig::from_toml_str("frame_rate = 30\n[network]\nport = 4000\n").unwrap();
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.network.port, 4000);
        assert_eq!(config.network.host, "127.0.0.1");
    }

    #[test]
    fn test_rejects_zero_rate() {
        assert!(matches!(
            AppConfig::from_toml_str("frame_rate = 0"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_network_key() {
        assert!(AppConfig::from_toml_str("[network]\nspeed = 1\n").is_err());
    }
}
