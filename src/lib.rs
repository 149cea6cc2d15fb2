//! # Remex - Bounded Remote Execution Engine
//!
//! Remex is an async-first library for running commands, scripts, and package
//! operations on fleets of remote hosts over a bounded, health-checked
//! connection pool. It owns the resource-lifecycle and concurrency-correctness
//! concerns of remote execution: bounded capacity, LRU eviction, idle
//! reclamation, reuse health probes, deadlines, privilege escalation, and
//! fan-out batching.
//!
//! ## Core Concepts
//!
//! - **Host descriptors**: immutable `(name, address, user, port, auth)`
//!   records produced by an external inventory source
//! - **Connection pool**: a bounded table of live connections keyed by the
//!   canonical `user@hostname:port` string
//! - **Execution service**: runs commands over pooled connections with
//!   deadlines, sudo rewriting, streaming, and credential redaction
//! - **Injected transport**: the SSH handshake lives behind a
//!   [`connection::ConnectionFactory`] supplied by the embedding application
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Embedding Application                    │
//! │        (routing, RBAC, inventory parsing, config files)      │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       RemoteExecutor                         │
//! │   (deadlines, sudo wrapping, redaction, fan-out batching)    │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ConnectionPool                         │
//! │      (capacity bound, LRU eviction, probes, idle sweep)      │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Injected ConnectionFactory                   │
//! │            (transport connect, auth, host keys)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use remex::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> remex::Result<()> {
//!     let config = EngineConfig::from_file("remex.toml")?;
//!     let factory: Arc<dyn ConnectionFactory> = Arc::new(MySshFactory::new());
//!
//!     let executor = RemoteExecutor::new(config, factory)?;
//!     executor.start();
//!
//!     let host = HostDescriptor::new("web01", "10.0.0.5").with_user("deploy");
//!     let result = executor
//!         .execute_command(&host, "uptime", &ExecuteRequest::new())
//!         .await?;
//!     println!("{}: {}", result.host, result.stdout);
//!
//!     executor.cleanup().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

/// Engine configuration.
pub mod config;

/// Transport seam and connection pooling.
pub mod connection;

/// Error taxonomy.
pub mod error;

/// Remote execution service.
pub mod exec;

/// Host descriptors and pool-key derivation.
pub mod host;

/// Redaction, no-log secrets, and input validation.
pub mod security;

pub use error::{Error, Result};

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of the types most integrations need.

    pub use crate::config::{EngineConfig, SudoConfig};
    pub use crate::connection::pool::{ConnectionPool, PoolConfig, PoolStats, PooledHandle};
    pub use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionFactory, ConnectionResult,
        ExecuteOptions, OutputEvent,
    };
    pub use crate::error::{Error, Result};
    pub use crate::exec::package::{
        CommandProbeDetector, PackageManager, PackageManagerDetector, PackageOp,
    };
    pub use crate::exec::sudo::SudoOptions;
    pub use crate::exec::{
        classify_error, ErrorKind, ExecuteRequest, ExecutionResult, RemoteExecutor,
    };
    pub use crate::host::{AuthMethod, HostDescriptor, Transport};
    pub use crate::security::{redact, SensitiveString};
}
