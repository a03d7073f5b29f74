//! Configuration loading and management.

use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level ipcd configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service identity.
    pub service: ServiceConfig,
    /// Network listen configuration.
    pub listen: ListenConfig,
    /// Transport tuning.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Runtime sizing.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Shutdown drain behavior.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Logical service name used for reporting and log labeling.
    pub name: String,
}

/// Network listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "127.0.0.1:7777").
    pub address: SocketAddr,
}

/// Transport tuning configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum accepted frame length in bytes.
    pub max_frame_length: usize,
    /// Arbitrary key/value transport options, applied verbatim before bind.
    /// Recognized keys: reuseaddr, recv_buffer_size, send_buffer_size,
    /// backlog, nodelay. Unknown keys are logged and skipped.
    pub options: HashMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_length: 65536,
            options: HashMap::new(),
        }
    }
}

/// Runtime sizing configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker thread count. Defaults to twice the available parallelism.
    pub workers: Option<usize>,
}

/// Shutdown drain configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Drain timeout magnitude, in whole units.
    pub timeout: u64,
    /// Drain timeout unit.
    pub unit: TimeUnit,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: 30,
            unit: TimeUnit::Seconds,
        }
    }
}

impl ShutdownConfig {
    /// The drain timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        self.unit.to_duration(self.timeout)
    }
}

/// Time unit for the shutdown timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
}

impl TimeUnit {
    pub fn to_duration(self, magnitude: u64) -> Duration {
        match self {
            Self::Milliseconds => Duration::from_millis(magnitude),
            Self::Seconds => Duration::from_secs(magnitude),
            Self::Minutes => Duration::from_secs(magnitude * 60),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.is_empty() {
            return Err(ConfigError::Invalid("service.name must not be empty".into()));
        }
        if self.transport.max_frame_length == 0 {
            return Err(ConfigError::Invalid(
                "transport.max_frame_length must be positive".into(),
            ));
        }
        if self.shutdown.timeout == 0 {
            return Err(ConfigError::Invalid(
                "shutdown.timeout must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Effective worker thread count: configured value, or twice the
    /// available parallelism.
    pub fn effective_workers(&self) -> usize {
        self.runtime.workers.unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            cpus * 2
        })
    }
}
