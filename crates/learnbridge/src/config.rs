//! Bridge configuration.
//!
//! Loads and validates the bridge configuration from a TOML file. Every key
//! is optional and falls back to the defaults below.
//!
//! ```toml
//! app_name = "org.learningbridge"
//! max_connections_per_host = 2
//! flow_timeout_secs = 5
//! stats_log_path = "/tmp/tcp_connections.log"
//! admission_mode = "strict"
//! install_failure_policy = "forward_anyway"
//! ```

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/learnbridge/learnbridge.toml";

/// How the fan-out limit is enforced between the admission check and the
/// reservation made at rule installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Reservation is an atomic check-and-insert under the per-source lock.
    /// A frame that loses a race for the last slot is blocked.
    #[default]
    Strict,
    /// Check and insert are separate steps. Concurrent frames from one
    /// source may transiently exceed the limit.
    Relaxed,
}

/// What happens to a frame whose rule installation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallFailurePolicy {
    /// Forward the frame out the chosen port and keep the admission entry.
    /// Traffic degrades to per-packet controller forwarding.
    #[default]
    ForwardAnyway,
    /// Discard the frame and give back the slot the attempt reserved.
    Drop,
}

/// Complete bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Owner application id attached to every installed rule
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Maximum concurrently-active distinct destinations per source host
    #[serde(default = "default_max_connections_per_host")]
    pub max_connections_per_host: usize,

    /// Soft (idle) timeout of installed rules, in seconds
    #[serde(default = "default_flow_timeout_secs")]
    pub flow_timeout_secs: u32,

    /// Learning table aging time in seconds (0 = never age)
    #[serde(default)]
    pub fdb_aging_secs: u64,

    /// Append-only connection stats log
    #[serde(default = "default_stats_log_path")]
    pub stats_log_path: PathBuf,

    #[serde(default)]
    pub admission_mode: AdmissionMode,

    #[serde(default)]
    pub install_failure_policy: InstallFailurePolicy,

    /// Priority of MAC-only rules
    #[serde(default = "default_plain_priority")]
    pub plain_priority: u16,

    /// Priority of rules that also match the TCP 5-tuple
    #[serde(default = "default_tcp_priority")]
    pub tcp_priority: u16,
}

fn default_app_name() -> String {
    "org.learningbridge".to_string()
}

fn default_max_connections_per_host() -> usize {
    2
}

fn default_flow_timeout_secs() -> u32 {
    5
}

fn default_stats_log_path() -> PathBuf {
    PathBuf::from("/tmp/tcp_connections.log")
}

fn default_plain_priority() -> u16 {
    10
}

fn default_tcp_priority() -> u16 {
    20
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            max_connections_per_host: default_max_connections_per_host(),
            flow_timeout_secs: default_flow_timeout_secs(),
            fdb_aging_secs: 0,
            stats_log_path: default_stats_log_path(),
            admission_mode: AdmissionMode::default(),
            install_failure_policy: InstallFailurePolicy::default(),
            plain_priority: default_plain_priority(),
            tcp_priority: default_tcp_priority(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = toml::from_str(&content).map_err(|e| {
                    BridgeError::Config(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(BridgeError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Learning table aging time, `None` when aging is disabled
    pub fn fdb_aging(&self) -> Option<Duration> {
        (self.fdb_aging_secs > 0).then(|| Duration::from_secs(self.fdb_aging_secs))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(BridgeError::Config("app_name must not be empty".to_string()));
        }

        if self.max_connections_per_host == 0 {
            return Err(BridgeError::Config(
                "max_connections_per_host must be > 0".to_string(),
            ));
        }

        if self.flow_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "flow_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.tcp_priority <= self.plain_priority {
            return Err(BridgeError::Config(format!(
                "tcp_priority ({}) must be above plain_priority ({})",
                self.tcp_priority, self.plain_priority
            )));
        }

        Ok(())
    }
}
