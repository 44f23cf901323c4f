//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{TimeWindow, DEFAULT_REQUESTS_PER_LIMIT};

/// Prefix for environment variable overrides, e.g. `TURNSTILE__THROTTLE__AUTH=false`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Configuration keys read from the environment as comma-separated lists.
const ENV_LIST_KEYS: &[&str] = &["throttle.exempt_paths"];

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Throttling configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Throttling configuration for one middleware instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Requests admitted per identity per window
    #[serde(default = "default_requests_per_limit", alias = "requests_per_hour")]
    pub requests_per_limit: u64,

    /// Counting window
    #[serde(default)]
    pub window: TimeWindow,

    /// Whether every request must carry an identity
    #[serde(default = "default_auth")]
    pub auth: bool,

    /// Counter store backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Paths that are never throttled, each covering its sub-paths. `/`
    /// exempts everything. From the environment, a comma-separated list:
    /// `TURNSTILE__THROTTLE__EXEMPT_PATHS=/health,/metrics`.
    #[serde(default)]
    pub exempt_paths: Vec<String>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_limit: default_requests_per_limit(),
            window: TimeWindow::default(),
            auth: default_auth(),
            backend: BackendConfig::default(),
            exempt_paths: Vec::new(),
        }
    }
}

fn default_requests_per_limit() -> u64 {
    DEFAULT_REQUESTS_PER_LIMIT
}

fn default_auth() -> bool {
    true
}

/// Counter store selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process map, private to this process
    Memory {
        /// Upper bound on live counters. Once reached, requests from subjects
        /// without a live counter fail with a store error and are answered 500
        /// until expired counters are swept.
        #[serde(default)]
        max_entries: Option<usize>,
    },
    /// Shared Redis instance
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1/`
        url: String,
        /// Per-call timeout in milliseconds
        #[serde(default = "default_redis_timeout_ms")]
        timeout_ms: u64,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory { max_entries: None }
    }
}

fn default_redis_timeout_ms() -> u64 {
    250
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration layered from an optional file and `TURNSTILE__*`
    /// environment variables, the environment taking precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(::config::File::from(path));
        }

        let mut env = ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .try_parsing(true);
        for key in ENV_LIST_KEYS {
            env = env.with_list_parse_key(key);
        }

        let config: TurnstileConfig = builder
            .add_source(env)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working throttle.
    pub fn validate(&self) -> Result<()> {
        if self.throttle.requests_per_limit == 0 {
            return Err(TurnstileError::Config(
                "throttle.requests_per_limit must be greater than zero".to_string(),
            ));
        }
        if let Some(path) = self.throttle.exempt_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(TurnstileError::Config(format!(
                "throttle.exempt_paths entry {:?} must start with '/'",
                path
            )));
        }
        if let BackendConfig::Redis { url, .. } = &self.throttle.backend {
            if url.trim().is_empty() {
                return Err(TurnstileError::Config(
                    "throttle.backend.url must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
