//! Connection layer for remote host communication.
//!
//! This module defines the seam between the engine and the transport. The
//! engine never performs an SSH handshake itself; it receives an injected
//! [`ConnectionFactory`] and drives whatever [`Connection`]s that factory
//! produces. Everything above this seam (the pool, the execution service) is
//! transport-agnostic and fully testable with an in-memory mock.
//!
//! # Streaming
//!
//! Command output can be streamed incrementally: callers pass a
//! `tokio::sync::mpsc` sender in [`ExecuteOptions::output`], implementations
//! push [`OutputEvent`]s as chunks arrive, and completion is signaled by the
//! channel closing when the sender is dropped. The full output is still
//! accumulated into the returned [`CommandResult`].

/// Connection pooling.
pub mod pool;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::host::HostDescriptor;

/// Errors produced by the transport layer.
///
/// Implementations of [`Connection`] and [`ConnectionFactory`] map their
/// native failures onto these variants; the engine classifies them further
/// for reporting.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the initial connection to the host.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication was rejected by the remote host.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Host key verification failed under the configured policy.
    #[error("host key verification failed: {0}")]
    HostKeyVerificationFailed(String),

    /// Command execution failed at the transport level (not a non-zero exit).
    #[error("command execution failed: {0}")]
    ExecutionFailed(String),

    /// Connection or operation timed out.
    #[error("connection timeout after {0} seconds")]
    Timeout(u64),

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    Closed,

    /// I/O error during connection operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// The result of executing a command over a connection.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code of the command (0 indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a successful command result.
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a failed command result.
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }
}

/// An incremental chunk of command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A chunk of standard output.
    Stdout(String),
    /// A chunk of standard error.
    Stderr(String),
}

/// Options for command execution over a connection.
///
/// Environment variables are not part of this surface; the execution service
/// folds validated `KEY=value` prefixes into the command line itself so every
/// transport behaves identically.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Timeout in seconds (`None` for no transport-level timeout; the
    /// execution service applies its own deadline regardless).
    pub timeout: Option<u64>,
    /// Incremental output sink; chunks are pushed as they arrive and the
    /// channel closes when execution completes.
    pub output: Option<mpsc::Sender<OutputEvent>>,
}

impl ExecuteOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport-level timeout.
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach an incremental output sink.
    pub fn with_output(mut self, sender: mpsc::Sender<OutputEvent>) -> Self {
        self.output = Some(sender);
        self
    }
}

/// A live transport connection to a remote host.
///
/// Implementations are expected to be internally synchronized; the pool hands
/// out `Arc<dyn Connection>` and borrowers only run commands and close.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier for logging (hostname or address).
    fn identifier(&self) -> &str;

    /// Execute a command on the remote host.
    ///
    /// Non-zero exits are `Ok` results with `success == false`; `Err` is
    /// reserved for transport-level failures.
    async fn execute(
        &self,
        command: &str,
        options: ExecuteOptions,
    ) -> ConnectionResult<CommandResult>;

    /// Close the connection. Idempotent; later calls are no-ops.
    async fn close(&self) -> ConnectionResult<()>;
}

/// Factory for establishing transport connections.
///
/// Injected by the embedding application. Performs the connect/auth handshake
/// and applies the host-key verification policy from the engine configuration;
/// the engine treats the returned handle as opaque.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Connect and authenticate to the given host.
    async fn connect(&self, host: &HostDescriptor) -> ConnectionResult<Arc<dyn Connection>>;
}
