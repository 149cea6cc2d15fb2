//! Engine configuration.
//!
//! Validated configuration consumed from the outer config-file layer. The
//! engine itself never reads files from well-known locations; callers either
//! construct [`EngineConfig`] directly or hand it a TOML fragment they have
//! already located.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::security::SensitiveString;

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_connections() -> usize {
    10
}

fn default_max_connections_per_host() -> usize {
    1
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_concurrency_limit() -> usize {
    5
}

fn default_sudo_command() -> String {
    "sudo".to_string()
}

/// Privilege escalation defaults applied when a call requests sudo without
/// overriding them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SudoConfig {
    /// Whether privilege escalation is applied to every command by default.
    #[serde(default)]
    pub enabled: bool,

    /// Escalation binary, normally `sudo`.
    #[serde(default = "default_sudo_command")]
    pub command: String,

    /// Whether the remote sudoers grants NOPASSWD.
    #[serde(default = "default_true")]
    pub passwordless: bool,

    /// Escalation password when `passwordless` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SensitiveString>,

    /// Default user to escalate to.
    #[serde(default = "default_user")]
    pub run_as_user: String,
}

impl Default for SudoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_sudo_command(),
            passwordless: true,
            password: None,
            run_as_user: default_user(),
        }
    }
}

/// Validated configuration for the pool and the execution service.
///
/// Immutable once handed to the engine. Durations accept humantime strings in
/// TOML (`"30s"`, `"5m"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Login user applied when a host descriptor omits one.
    #[serde(default = "default_user")]
    pub default_user: String,

    /// Port applied when a host descriptor omits one.
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Host key verification policy handed to the connection factory.
    #[serde(default = "default_true")]
    pub host_key_check: bool,

    /// Deadline for establishing a connection.
    #[serde(default = "default_connection_timeout", with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Default deadline for command execution; overridable per call.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Upper bound on live connections across all hosts.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Upper bound on live connections per host. Currently pinned to 1; the
    /// pool keys connections by host identity and fails fast when the slot is
    /// busy.
    #[serde(default = "default_max_connections_per_host")]
    pub max_connections_per_host: usize,

    /// Age past which an idle connection is reclaimed by the sweep.
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Period of the idle sweep while the pool is started.
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Fan-out batch size for multi-host execution.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Privilege escalation defaults.
    #[serde(default)]
    pub sudo: SudoConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_user: default_user(),
            default_port: default_port(),
            host_key_check: true,
            connection_timeout: default_connection_timeout(),
            command_timeout: default_command_timeout(),
            max_connections: default_max_connections(),
            max_connections_per_host: default_max_connections_per_host(),
            idle_timeout: default_idle_timeout(),
            cleanup_interval: default_cleanup_interval(),
            concurrency_limit: default_concurrency_limit(),
            sudo: SudoConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the deployment-time invariants.
    ///
    /// `concurrency_limit <= max_connections` is enforced here rather than at
    /// runtime: a fan-out batch wider than the pool would make every batch
    /// fight the capacity evictor.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_connections_per_host != 1 {
            return Err(Error::Config(
                "max_connections_per_host other than 1 is not supported; connections are keyed by host identity".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(Error::Config(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.concurrency_limit > self.max_connections {
            return Err(Error::Config(format!(
                "concurrency_limit ({}) must not exceed max_connections ({})",
                self.concurrency_limit, self.max_connections
            )));
        }
        if self.cleanup_interval.is_zero() {
            return Err(Error::Config(
                "cleanup_interval must be non-zero".to_string(),
            ));
        }
        if !self.sudo.passwordless && self.sudo.password.is_none() {
            return Err(Error::Config(
                "sudo.password is required when sudo.passwordless is false".to_string(),
            ));
        }
        Ok(())
    }
}
