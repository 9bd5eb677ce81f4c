//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (`PULSE__*`, nested with `__`)
//! - Command line `--config <path>`

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tenvis_pulse_engine::EngineConfig;

/// Default locations searched when no path is given.
const CONFIG_PATHS: [&str; 3] = [
    "pulse.toml",
    "/etc/pulse/pulse.toml",
    "~/.config/pulse/pulse.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind the status endpoint to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineSection,

    /// Per-namespace channel options.
    #[serde(default)]
    pub namespaces: Vec<NamespaceConfig>,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Which engine implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// State in process memory.
    Local,
    /// State in a shared store.
    Shared,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Engine implementation.
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Presence timeout in seconds.
    #[serde(default = "default_presence_timeout")]
    pub presence_timeout_secs: u64,

    /// Retained messages per channel.
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Bound on each shared-store call in milliseconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Prefix for keys in the shared store.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Shared store URL. `memory://` selects the in-process store.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// How often expired presence is swept, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Options for one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Namespace name. Empty for the default namespace.
    pub name: String,

    /// Retain published messages in history.
    #[serde(default = "default_true")]
    pub history: bool,

    /// Allow presence tracking.
    #[serde(default = "default_true")]
    pub presence: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_backend() -> Backend {
    Backend::Local
}

fn default_presence_timeout() -> u64 {
    25
}

fn default_history_size() -> usize {
    20
}

fn default_operation_timeout() -> u64 {
    1_000
}

fn default_key_prefix() -> String {
    "pulse".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_sweep_interval() -> u64 {
    5_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            engine: EngineSection::default(),
            namespaces: Vec::new(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            presence_timeout_secs: default_presence_timeout(),
            history_size: default_history_size(),
            operation_timeout_ms: default_operation_timeout(),
            key_prefix: default_key_prefix(),
            redis_url: default_redis_url(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl EngineSection {
    /// Engine configuration derived from this section.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            presence_timeout: Duration::from_secs(self.presence_timeout_secs),
            history_size: self.history_size,
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            key_prefix: self.key_prefix.clone(),
        }
    }

    /// Interval between presence sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Config {
    /// Load configuration from the default paths, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Self::build(None)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::build(Some(&contents))
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn build(toml_source: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(source) = toml_source {
            builder = builder.add_source(::config::File::from_str(source, ::config::FileFormat::Toml));
        }

        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix("PULSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.engine.presence_timeout_secs > 0,
            "engine.presence_timeout_secs must be positive"
        );
        ensure!(
            self.engine.operation_timeout_ms > 0,
            "engine.operation_timeout_ms must be positive"
        );
        ensure!(
            self.engine.sweep_interval_ms > 0,
            "engine.sweep_interval_ms must be positive"
        );
        if self.engine.backend == Backend::Shared {
            ensure!(
                !self.engine.redis_url.is_empty(),
                "engine.redis_url is required for the shared backend"
            );
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}
