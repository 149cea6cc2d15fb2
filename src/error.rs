//! Error types for remex.
//!
//! Two layers of errors exist in this crate, mirroring the split between the
//! transport and the engine: [`crate::connection::ConnectionError`] covers
//! transport-level failures produced by the injected factory and by
//! [`crate::connection::Connection`] implementations, while [`Error`] covers
//! pool and execution-service failures. Command-level failures (non-zero exit,
//! command deadline expiry) are *not* errors at the service boundary; they are
//! captured into [`crate::exec::ExecutionResult`] so a fan-out can complete
//! with partial failures.

use thiserror::Error;

use crate::connection::ConnectionError;

/// Result type alias for remex operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for pool and execution-service operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The pool is at capacity and no entry could be evicted.
    #[error("connection pool at capacity ({limit} connections), no evictable slot")]
    Capacity {
        /// Configured maximum number of pooled connections
        limit: usize,
    },

    /// The sole connection for this host key is already in use.
    ///
    /// A second acquire for the same key does not queue; callers needing
    /// queuing implement it above this layer (as the fan-out batching does).
    #[error("host '{key}' is busy: its pooled connection is in use")]
    HostBusy {
        /// Canonical pool key of the busy host
        key: String,
    },

    /// The injected connection factory failed to produce a connection.
    #[error("failed to connect to '{host}': {message}")]
    Connection {
        /// Target host
        host: String,
        /// Error message from the transport layer
        message: String,
    },

    /// Establishing the connection exceeded the configured deadline.
    #[error("connection to '{host}' timed out after {timeout_secs} seconds")]
    ConnectionTimeout {
        /// Target host
        host: String,
        /// Timeout in seconds
        timeout_secs: u64,
    },

    /// A remote command exceeded its deadline.
    ///
    /// The local stream is abandoned; the remote process is not guaranteed to
    /// have stopped. The pooled connection is released, not force-closed; the
    /// pool's own health probe catches a broken one on the next acquire.
    #[error("command timed out on '{host}' after {timeout_secs} seconds")]
    CommandTimeout {
        /// Target host
        host: String,
        /// Timeout in seconds
        timeout_secs: u64,
    },

    /// An input failed validation before reaching the transport.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No supported package manager was found on the remote host.
    #[error("no supported package manager found on '{0}'")]
    UnknownPackageManager(String),

    /// Configuration is invalid or violates a deployment-time invariant.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The pool has been shut down; no further acquires are served.
    #[error("connection pool is shut down")]
    PoolClosed,
}

impl Error {
    /// Creates a connection error from a host name and a transport failure.
    pub fn connection(host: impl Into<String>, source: &ConnectionError) -> Self {
        match source {
            ConnectionError::Timeout(secs) => Error::ConnectionTimeout {
                host: host.into(),
                timeout_secs: *secs,
            },
            other => Error::Connection {
                host: host.into(),
                message: other.to_string(),
            },
        }
    }

    /// Returns true for failures the caller may retry against the same host.
    ///
    /// Capacity and busy conditions clear as in-flight work completes;
    /// validation and configuration errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Capacity { .. }
                | Error::HostBusy { .. }
                | Error::ConnectionTimeout { .. }
                | Error::CommandTimeout { .. }
        )
    }
}
