//! Configuration loading and typed config structures for the greenhouse
//! server.
//!
//! The configuration lives in `greenhouse-config.yaml` next to the
//! process (or wherever `GREENHOUSE_CONFIG` points). Every field has a
//! default, so a missing file, section or key falls back to the values
//! below.

use std::path::Path;

use greenhouse_sim::DEFAULT_SAMPLING_INTERVAL_MS;
use greenhouse_types::NodeSpec;
use serde::Deserialize;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "greenhouse-config.yaml";

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "GREENHOUSE_CONFIG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidOverride {
        /// The environment variable.
        key: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GreenhouseConfig {
    /// Listener and per-connection settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Sampling defaults.
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// User store settings.
    #[serde(default)]
    pub users: UsersConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Nodes created and scheduled at startup.
    #[serde(default)]
    pub seed_nodes: Vec<NodeSpec>,
}

impl GreenhouseConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `GREENHOUSE_HOST` overrides `server.host`
    /// - `GREENHOUSE_PORT` overrides `server.port`
    /// - `GREENHOUSE_USERS_FILE` overrides `users.file`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse_yaml(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    /// Environment overrides apply in both cases.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse configuration from a YAML string, without environment
    /// overrides.
    pub fn parse_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("GREENHOUSE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("GREENHOUSE_PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                key: "GREENHOUSE_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(file) = lookup("GREENHOUSE_USERS_FILE") {
            self.users.file = file;
        }
        Ok(())
    }
}

/// Listener and per-connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server name reported in `welcome`.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Capacity of each session's outbound line queue.
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,

    /// Maximum time a single socket write may take before the
    /// connection is dropped.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Longest accepted inbound line, in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            name: default_server_name(),
            session_queue_capacity: default_session_queue_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

/// Sampling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SamplingConfig {
    /// Interval given to nodes created without one, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,

    /// Capacity of the queue between the engine and the registry.
    #[serde(default = "default_update_queue_capacity")]
    pub update_queue_capacity: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: default_interval_ms(),
            update_queue_capacity: default_update_queue_capacity(),
        }
    }
}

/// User store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UsersConfig {
    /// JSON file holding registered users.
    #[serde(default = "default_users_file")]
    pub file: String,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            file: default_users_file(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG`
    /// is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
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

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    5555
}

fn default_server_name() -> String {
    String::from("greenhouse-server")
}

const fn default_session_queue_capacity() -> usize {
    256
}

const fn default_write_timeout_ms() -> u64 {
    5_000
}

const fn default_max_line_bytes() -> usize {
    65_536
}

const fn default_interval_ms() -> u64 {
    DEFAULT_SAMPLING_INTERVAL_MS
}

const fn default_update_queue_capacity() -> usize {
    1_024
}

fn default_users_file() -> String {
    String::from("users.json")
}

fn default_log_level() -> String {
    String::from("info")
}
