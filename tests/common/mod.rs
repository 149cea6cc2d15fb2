//! Shared test utilities for the remex test suite.
//!
//! Provides a scriptable in-memory transport: a [`MockFactory`] that hands
//! out [`MockConnection`]s whose behavior is configured per host address.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

// Each test binary compiles its own copy and uses a different subset.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use remex::prelude::*;

/// Scripted behavior for one host address.
#[derive(Debug, Clone, Default)]
pub struct HostBehavior {
    /// Fail the connect handshake with this message.
    pub fail_connect: Option<String>,
    /// Artificial latency applied to every non-canary command.
    pub command_delay: Option<Duration>,
    /// Scripted results keyed by exact command line.
    pub responses: HashMap<String, CommandResult>,
}

impl HostBehavior {
    pub fn failing_connect(message: impl Into<String>) -> Self {
        Self {
            fail_connect: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            command_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn respond(mut self, command: impl Into<String>, result: CommandResult) -> Self {
        self.responses.insert(command.into(), result);
        self
    }
}

/// An in-memory connection with scriptable command responses.
///
/// The canary (`echo test`) is answered from the `healthy` flag so tests can
/// break a cached connection between acquires. Other `echo` commands are
/// emulated; everything else returns empty success unless scripted.
pub struct MockConnection {
    identifier: String,
    behavior: HostBehavior,
    healthy: AtomicBool,
    closed: AtomicBool,
    executed: Mutex<Vec<String>>,
}

impl MockConnection {
    fn new(identifier: String, behavior: HostBehavior) -> Self {
        Self {
            identifier,
            behavior,
            healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Make the next canary probe fail, as a broken transport would.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every command line this connection has executed, canaries included.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: ExecuteOptions,
    ) -> ConnectionResult<CommandResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        self.executed.lock().push(command.to_string());

        if command == "echo test" {
            return if self.healthy.load(Ordering::SeqCst) {
                Ok(CommandResult::success("test\n".to_string(), String::new()))
            } else {
                Err(ConnectionError::Closed)
            };
        }

        if let Some(delay) = self.behavior.command_delay {
            tokio::time::sleep(delay).await;
        }

        let result = if let Some(result) = self.behavior.responses.get(command) {
            result.clone()
        } else if let Some(rest) = command.strip_prefix("echo ") {
            CommandResult::success(format!("{}\n", rest), String::new())
        } else {
            CommandResult::success(String::new(), String::new())
        };

        if let Some(sender) = options.output {
            if !result.stdout.is_empty() {
                let _ = sender.send(OutputEvent::Stdout(result.stdout.clone())).await;
            }
            if !result.stderr.is_empty() {
                let _ = sender.send(OutputEvent::Stderr(result.stderr.clone())).await;
            }
        }

        Ok(result)
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A factory handing out [`MockConnection`]s, recording every handshake.
#[derive(Default)]
pub struct MockFactory {
    behaviors: Mutex<HashMap<String, HostBehavior>>,
    created: Mutex<Vec<(String, Arc<MockConnection>)>>,
    connects: AtomicUsize,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behavior for a host address.
    pub fn set_behavior(&self, address: impl Into<String>, behavior: HostBehavior) {
        self.behaviors.lock().insert(address.into(), behavior);
    }

    /// Total successful and failed handshake attempts.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// All connections created, in creation order.
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.created.lock().iter().map(|(_, c)| Arc::clone(c)).collect()
    }

    /// The most recent connection created for an address.
    pub fn connection_for(&self, address: &str) -> Option<Arc<MockConnection>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(a, _)| a == address)
            .map(|(_, c)| Arc::clone(c))
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self, host: &HostDescriptor) -> ConnectionResult<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .get(&host.address)
            .cloned()
            .unwrap_or_default();
        if let Some(message) = &behavior.fail_connect {
            return Err(ConnectionError::ConnectionFailed(message.clone()));
        }
        let connection = Arc::new(MockConnection::new(host.address.clone(), behavior));
        self.created
            .lock()
            .push((host.address.clone(), Arc::clone(&connection)));
        Ok(connection)
    }
}

/// A descriptor named after its address, the common test shape.
pub fn host(name: &str) -> HostDescriptor {
    HostDescriptor::new(name, name)
}

/// An engine config with timings tightened for tests.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.connection_timeout = Duration::from_secs(2);
    config.command_timeout = Duration::from_secs(2);
    config.idle_timeout = Duration::from_millis(100);
    config.cleanup_interval = Duration::from_millis(25);
    config
}
