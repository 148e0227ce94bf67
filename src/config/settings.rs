//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::correlator::TimeoutPolicy;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Client settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Price lookup settings.
    #[serde(default)]
    pub binance: BinanceConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(invalid(format!(
                "Invalid server bind address '{}'. Expected host:port, e.g. 127.0.0.1:3000",
                self.server.bind
            )));
        }

        if !(self.client.url.starts_with("ws://") || self.client.url.starts_with("wss://")) {
            return Err(invalid(format!(
                "Invalid client url '{}'. Must start with ws:// or wss://",
                self.client.url
            )));
        }

        if self.client.request_timeout_secs == 0 {
            return Err(invalid("client.request_timeout_secs must be greater than 0"));
        }

        if let Some((method, _)) = self
            .client
            .method_timeouts
            .iter()
            .find(|(_, secs)| **secs == 0)
        {
            return Err(invalid(format!(
                "client.method_timeouts.{method} must be greater than 0"
            )));
        }

        let quote = &self.binance.quote_asset;
        if quote.is_empty() || !quote.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid(format!(
                "Invalid quote asset '{quote}'. Must be non-empty and alphanumeric"
            )));
        }

        if self.binance.http_timeout_secs == 0 {
            return Err(invalid("binance.http_timeout_secs must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            )));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        message: message.into(),
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    /// Default: "127.0.0.1:3000"
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Server URL.
    /// Default: "ws://localhost:3000"
    #[serde(default = "default_url")]
    pub url: String,

    /// Deadline for requests without a per-method override, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Per-method deadlines in seconds, keyed by method name.
    #[serde(default)]
    pub method_timeouts: BTreeMap<String, u64>,
}

impl ClientConfig {
    /// The request deadlines as a correlator policy.
    #[must_use]
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.method_timeouts.iter().fold(
            TimeoutPolicy::new(Duration::from_secs(self.request_timeout_secs)),
            |policy, (method, secs)| policy.with_method(method.clone(), Duration::from_secs(*secs)),
        )
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            request_timeout_secs: default_request_timeout(),
            method_timeouts: BTreeMap::new(),
        }
    }
}

fn default_url() -> String {
    "ws://localhost:3000".to_string()
}

const fn default_request_timeout() -> u64 {
    TimeoutPolicy::DEFAULT_TIMEOUT.as_secs()
}

/// Price lookup configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinanceConfig {
    /// Base URL of the quote service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Asset prices are quoted in.
    /// Default: "USDT"
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl BinanceConfig {
    /// The HTTP request timeout.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            quote_asset: default_quote_asset(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

const fn default_http_timeout() -> u64 {
    5
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
