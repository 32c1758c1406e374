//! Client configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Error returned when building a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment value could not be parsed.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    /// The server URL is not a `ws://` or `wss://` URL.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket URL of the server, e.g. `ws://127.0.0.1:12345`.
    pub url: String,
    /// Deadline used by calls that do not pass their own.
    pub default_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS, DEFAULT_PORT)
    }
}

impl ClientConfig {
    /// Config for a plain `ws://address:port` server.
    #[must_use]
    pub fn new(address: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{address}:{port}"),
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Config for an explicit server URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] unless the scheme is `ws` or `wss`.
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim_end_matches('/');
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(url.to_owned()));
        }
        Ok(Self {
            url: url.to_owned(),
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        })
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Build config from environment variables.
    ///
    /// - `TUI_URL`: full server URL; overrides address and port when set
    /// - `TUI_ADDRESS`: default `127.0.0.1`
    /// - `TUI_PORT`: default `12345`
    /// - `TUI_TIMEOUT_MS`: default `30000`
    ///
    /// # Errors
    ///
    /// Returns an error for unparsable ports, timeouts, or URLs.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns an error for unparsable ports, timeouts, or URLs.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let config = if let Some(url) = var("TUI_URL") {
            Self::from_url(&url)?
        } else {
            let address = var("TUI_ADDRESS").unwrap_or_else(|| DEFAULT_ADDRESS.to_owned());
            let port = match var("TUI_PORT") {
                Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                    var: "TUI_PORT",
                    value: raw.clone(),
                })?,
                None => DEFAULT_PORT,
            };
            Self::new(&address, port)
        };

        let timeout_ms = match var("TUI_TIMEOUT_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                var: "TUI_TIMEOUT_MS",
                value: raw.clone(),
            })?,
            None => DEFAULT_TIMEOUT_MS,
        };

        Ok(config.with_default_timeout(Duration::from_millis(timeout_ms)))
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
