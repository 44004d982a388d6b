//! # Endpoint Configuration
//!
//! Connection parameters shared by the client and the server, loadable from
//! TOML. Every field is optional in the file; missing fields take the
//! defaults below.
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 25564
//! retry_interval_ms = 1500
//! max_retries = 3
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{NetError, NetResult};
use crate::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_RETRY_COUNT,
    DEFAULT_RETRY_INTERVAL_MS, POLL_INTERVAL_MS,
};

/// Network endpoint configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Host the client connects to.
    pub host: String,
    /// Port the client connects to and the server listens on.
    pub port: u16,
    /// Pause between client reconnect attempts, in milliseconds.
    pub retry_interval_ms: u64,
    /// Reconnect attempts after the first one.
    pub max_retries: u32,
    /// How long a pending connect may stay in `Establishing`, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Sleep between idle I/O passes, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_retries: DEFAULT_RETRY_COUNT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            poll_interval_ms: POLL_INTERVAL_MS,
        }
    }
}

impl NetworkConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Config`] on malformed TOML, unknown keys, or any
    /// value [`validate`](Self::validate) rejects.
    pub fn from_toml_str(text: &str) -> NetResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| NetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] if the file cannot be read and
    /// [`NetError::Config`] if it does not parse.
    pub fn load(path: impl AsRef<Path>) -> NetResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Config`] describing the first bad field.
    pub fn validate(&self) -> NetResult<()> {
        if self.host.trim().is_empty() {
            return Err(NetError::Config("host must not be empty".to_owned()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(NetError::Config("connect_timeout_ms must be positive".to_owned()));
        }
        if self.poll_interval_ms == 0 {
            return Err(NetError::Config("poll_interval_ms must be positive".to_owned()));
        }
        Ok(())
    }

    /// Returns the reconnect pause.
    #[inline]
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Returns the connect timeout.
    #[inline]
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the idle poll interval.
    #[inline]
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
