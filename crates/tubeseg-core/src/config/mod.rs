//! Client configuration.
//!
//! Loaded from an optional TOML file, then overridden by the environment the
//! launcher provides (`BACKEND_HOST`, `BACKEND_PORT`, `TUBESEG_APPLICATION`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rpc::{DEFAULT_MAX_ATTEMPTS, Endpoint, RetryPolicy, SessionConfig};

/// Environment variable holding the backend host.
pub const HOST_ENV: &str = "BACKEND_HOST";
/// Environment variable holding the backend port.
pub const PORT_ENV: &str = "BACKEND_PORT";
/// Environment variable overriding the application id.
pub const APPLICATION_ENV: &str = "TUBESEG_APPLICATION";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Where and how to reach the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Application id sent with the handshake.
    #[serde(default = "default_application")]
    pub application: String,
    #[serde(default = "default_secret")]
    pub secret: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_application() -> String {
    "tubetk".to_string()
}

fn default_secret() -> String {
    "wslink-secret".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            application: default_application(),
            secret: default_secret(),
        }
    }
}

/// Handshake retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total handshake attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_interval_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts(), interval_ms: default_interval_ms() }
    }
}

/// Root client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-call timeout in seconds. `0` disables it.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_call_timeout_secs() -> u64 {
    300
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            retry: RetryConfig::default(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl ClientConfig {
    /// Load from `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Apply overrides looked up through `lookup`, normally the process
    /// environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_ENV).filter(|h| !h.is_empty()) {
            self.backend.host = host;
        }
        if let Some(port) = lookup(PORT_ENV).filter(|p| !p.is_empty()) {
            self.backend.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("{}={}", PORT_ENV, port)))?;
        }
        if let Some(application) = lookup(APPLICATION_ENV).filter(|a| !a.is_empty()) {
            self.backend.application = application;
        }
        Ok(())
    }

    /// Reject values the session cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.backend.host.is_empty() {
            return Err(ConfigError::InvalidValue("backend.host is empty".to_string()));
        }
        if self.backend.port == 0 {
            return Err(ConfigError::InvalidValue("backend.port must not be 0".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Backend endpoint.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.backend.host.clone(),
            port: self.backend.port,
            application: self.backend.application.clone(),
            secret: self.backend.secret.clone(),
        }
    }

    /// Session settings derived from this configuration.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint(),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                interval: Duration::from_millis(self.retry.interval_ms),
                ..RetryPolicy::default()
            },
            call_timeout: (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs)),
        }
    }
}
