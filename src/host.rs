//! Host descriptors and canonical pool-key derivation.
//!
//! Descriptors are produced by inventory sources outside this crate (Bolt
//! files, PuppetDB, SSH config readers) and arrive here fully formed. The
//! engine never mutates them; it only derives the canonical pool key used to
//! slot the host's connection into the pool.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::security::SensitiveString;

/// Authentication material for a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Password authentication. Never logged; see [`SensitiveString`].
    Password(SensitiveString),
    /// Private key file on the control node.
    KeyFile(PathBuf),
    /// Defer to the local SSH agent.
    Agent,
}

impl Default for AuthMethod {
    fn default() -> Self {
        AuthMethod::Agent
    }
}

/// Transport used to reach a host.
///
/// Only SSH-shaped transports are in scope; the actual handshake is delegated
/// to the injected [`crate::connection::ConnectionFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// SSH connection (default).
    #[default]
    Ssh,
}

/// A managed remote host, as supplied by an external inventory source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDescriptor {
    /// Display name; the key under which fan-out results are reported.
    pub name: String,

    /// Address or URI the transport connects to.
    pub address: String,

    /// Login user; falls back to the configured default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Port; falls back to the configured default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Authentication material.
    #[serde(default)]
    pub auth: AuthMethod,

    /// Transport selection.
    #[serde(default)]
    pub transport: Transport,
}

impl HostDescriptor {
    /// Create a descriptor with only a name and address; everything else
    /// falls back to configured defaults.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            user: None,
            port: None,
            auth: AuthMethod::default(),
            transport: Transport::default(),
        }
    }

    /// Set the login user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the authentication material.
    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    /// Effective login user after applying configured defaults.
    pub fn effective_user<'a>(&'a self, config: &'a EngineConfig) -> &'a str {
        self.user.as_deref().unwrap_or(&config.default_user)
    }

    /// Effective port after applying configured defaults.
    pub fn effective_port(&self, config: &EngineConfig) -> u16 {
        self.port.unwrap_or(config.default_port)
    }

    /// Canonical pool key: `user@hostname:port`.
    ///
    /// Injective over distinct (user, host, port) triples; two descriptors
    /// resolving to the same triple share one connection slot.
    pub fn pool_key(&self, config: &EngineConfig) -> String {
        format!(
            "{}@{}:{}",
            self.effective_user(config),
            self.address,
            self.effective_port(config)
        )
    }
}
