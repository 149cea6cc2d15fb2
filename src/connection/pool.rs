//! Bounded connection pool.
//!
//! The pool owns every live connection, keyed by the canonical
//! `user@hostname:port` string. It bounds total connection count, maximizes
//! reuse, verifies cached connections with a canary probe before handing them
//! back out, and reclaims idle or broken entries.
//!
//! # Concurrency
//!
//! The connection table is the one shared mutable resource in this crate. All
//! mutation goes through pool methods, and the entire acquire sequence (probe,
//! eviction, factory call, insert) runs under a single async mutex so that no
//! interleaving can violate the capacity bound or double-lease a slot. The
//! reference semantics come from a single-threaded event loop; the mutex
//! reproduces that atomicity on a multi-threaded runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{Connection, ConnectionFactory, ExecuteOptions};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::host::HostDescriptor;

/// Canary command used to verify a cached connection before reuse.
const CANARY_COMMAND: &str = "echo test";

/// Output the canary must produce, after trimming the trailing newline.
const CANARY_EXPECTED: &str = "test";

/// Deadline for the canary probe, independent of command timeouts so a stuck
/// probe cannot block a caller for a full command deadline.
const DEFAULT_HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum total connections in the pool.
    pub max_connections: usize,
    /// Maximum connections per host. Pinned to 1; see module docs.
    pub max_connections_per_host: usize,
    /// Connections idle longer than this are reclaimed by the sweep.
    pub idle_timeout: Duration,
    /// Period of the idle sweep while the pool is started.
    pub cleanup_interval: Duration,
    /// Deadline for the reuse health probe.
    pub health_probe_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_connections_per_host: 1,
            idle_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            health_probe_timeout: DEFAULT_HEALTH_PROBE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum total connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the sweep interval.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the health probe deadline.
    pub fn health_probe_timeout(mut self, timeout: Duration) -> Self {
        self.health_probe_timeout = timeout;
        self
    }
}

impl From<&EngineConfig> for PoolConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            max_connections_per_host: config.max_connections_per_host,
            idle_timeout: config.idle_timeout,
            cleanup_interval: config.cleanup_interval,
            health_probe_timeout: DEFAULT_HEALTH_PROBE_TIMEOUT,
        }
    }
}

/// Point-in-time pool counters for observability endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Total number of pooled connections.
    pub total: usize,
    /// Connections currently leased out.
    pub in_use: usize,
    /// Connections idle and available for reuse.
    pub idle: usize,
}

/// A pooled connection entry. Exclusively owned by the pool; borrowers only
/// see the `Arc<dyn Connection>` inside a [`PooledHandle`].
struct PoolEntry {
    connection: Arc<dyn Connection>,
    host: HostDescriptor,
    last_used: Instant,
    in_use: bool,
}

impl PoolEntry {
    fn new(connection: Arc<dyn Connection>, host: HostDescriptor) -> Self {
        Self {
            connection,
            host,
            last_used: Instant::now(),
            in_use: true,
        }
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

/// A borrowed connection, valid between `acquire` and `release`.
///
/// The handle does not release on drop; the execution service releases
/// explicitly on both its success and failure paths so the timestamp bump is
/// deliberate.
pub struct PooledHandle {
    key: String,
    host_name: String,
    connection: Arc<dyn Connection>,
}

impl PooledHandle {
    /// Canonical pool key of the leased slot.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Display name of the host behind the connection.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// The borrowed transport connection.
    pub fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.connection)
    }
}

struct PoolInner {
    entries: HashMap<String, PoolEntry>,
}

/// Bounded pool of live remote connections.
pub struct ConnectionPool {
    config: PoolConfig,
    engine_config: Arc<EngineConfig>,
    inner: Mutex<PoolInner>,
    shutdown: AtomicBool,
    sweep_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Create a pool sized from the engine configuration.
    pub fn new(engine_config: Arc<EngineConfig>) -> Self {
        let pool_config = PoolConfig::from(engine_config.as_ref());
        Self::with_config(engine_config, pool_config)
    }

    /// Create a pool with an explicit pool configuration.
    pub fn with_config(engine_config: Arc<EngineConfig>, config: PoolConfig) -> Self {
        debug!(
            max_connections = config.max_connections,
            idle_timeout = ?config.idle_timeout,
            cleanup_interval = ?config.cleanup_interval,
            "creating connection pool"
        );
        Self {
            config,
            engine_config,
            inner: Mutex::new(PoolInner {
                entries: HashMap::new(),
            }),
            shutdown: AtomicBool::new(false),
            sweep_task: parking_lot::Mutex::new(None),
        }
    }

    /// Acquire a connection for a host, creating one through `factory` when
    /// no healthy idle entry exists.
    ///
    /// Fails fast with [`Error::HostBusy`] when the host's slot is already
    /// leased; a second acquire never queues and never opens a parallel
    /// connection for the same key.
    pub async fn acquire(
        &self,
        host: &HostDescriptor,
        factory: &dyn ConnectionFactory,
    ) -> Result<PooledHandle> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }

        let key = host.pool_key(&self.engine_config);
        let mut inner = self.inner.lock().await;

        if let Some(entry) = inner.entries.get(&key) {
            if entry.in_use {
                trace!(key = %key, "slot busy, failing fast");
                return Err(Error::HostBusy { key });
            }

            let connection = Arc::clone(&entry.connection);
            if self.probe(&connection).await {
                let entry = inner
                    .entries
                    .get_mut(&key)
                    .expect("entry cannot vanish while the acquire lock is held");
                entry.in_use = true;
                entry.touch();
                debug!(key = %key, "reusing pooled connection");
                return Ok(PooledHandle {
                    key,
                    host_name: entry.host.name.clone(),
                    connection,
                });
            }

            // Probe failed: discard the stale entry and fall through to
            // creating a fresh connection.
            warn!(key = %key, "health probe failed, discarding cached connection");
            if let Some(stale) = inner.entries.remove(&key) {
                close_best_effort(&key, stale.connection).await;
            }
        }

        if inner.entries.len() >= self.config.max_connections {
            let victim = pick_eviction_victim(&inner.entries).ok_or(Error::Capacity {
                limit: self.config.max_connections,
            })?;
            let evicted = inner
                .entries
                .remove(&victim)
                .expect("victim key was just selected from the table");
            if evicted.in_use {
                // Degraded mode: every slot is leased, so the globally oldest
                // connection is closed under its borrower to avoid deadlock.
                warn!(key = %victim, "evicting in-use connection under capacity pressure");
            } else {
                debug!(key = %victim, "evicting least recently used idle connection");
            }
            close_best_effort(&victim, evicted.connection).await;
        }

        debug!(key = %key, "creating new connection");
        let connect_timeout = self.engine_config.connection_timeout;
        let connection =
            match tokio::time::timeout(connect_timeout, factory.connect(host)).await {
                Ok(Ok(connection)) => connection,
                Ok(Err(err)) => return Err(Error::connection(&host.address, &err)),
                Err(_) => {
                    return Err(Error::ConnectionTimeout {
                        host: host.address.clone(),
                        timeout_secs: connect_timeout.as_secs(),
                    })
                }
            };

        let entry = PoolEntry::new(Arc::clone(&connection), host.clone());
        inner.entries.insert(key.clone(), entry);
        info!(key = %key, total = inner.entries.len(), "connection added to pool");

        Ok(PooledHandle {
            key,
            host_name: host.name.clone(),
            connection,
        })
    }

    /// Return a leased connection to the pool.
    ///
    /// Marks the slot idle and bumps its timestamp. A no-op when the key has
    /// already been removed (eviction under pressure can race a release).
    pub async fn release(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.in_use = false;
                entry.touch();
                trace!(key = %key, "connection released");
            }
            None => trace!(key = %key, "release for unknown key ignored"),
        }
    }

    /// Close and remove a connection.
    ///
    /// Closing is best-effort: close failures are logged and swallowed, and
    /// the entry is deleted from the table regardless.
    pub async fn remove(&self, key: &str) {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.entries.remove(key)
        };
        match removed {
            Some(entry) => {
                close_best_effort(key, entry.connection).await;
                debug!(key = %key, "connection removed from pool");
            }
            None => trace!(key = %key, "remove for unknown key ignored"),
        }
    }

    /// Close every pooled connection and disarm the sweep. Used at shutdown.
    pub async fn close_all(&self) {
        info!("closing all pooled connections");
        self.shutdown.store(true, Ordering::SeqCst);
        self.stop_sweep();

        let drained: Vec<(String, PoolEntry)> = {
            let mut inner = self.inner.lock().await;
            inner.entries.drain().collect()
        };

        join_all(
            drained
                .into_iter()
                .map(|(key, entry)| async move { close_best_effort(&key, entry.connection).await }),
        )
        .await;
    }

    /// Point-in-time counters.
    pub async fn get_stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        let total = inner.entries.len();
        let in_use = inner.entries.values().filter(|e| e.in_use).count();
        PoolStats {
            total,
            in_use,
            idle: total - in_use,
        }
    }

    /// Arm the periodic idle sweep.
    ///
    /// The sweep removes entries that have been idle longer than the
    /// configured timeout; in-use entries are never touched. Call once at
    /// startup; [`ConnectionPool::close_all`] disarms it.
    pub fn start(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let interval = self.config.cleanup_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if pool.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                pool.sweep_idle().await;
            }
        });
        let mut slot = self.sweep_task.lock();
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Disarm the periodic sweep without closing connections.
    pub fn stop_sweep(&self) {
        if let Some(task) = self.sweep_task.lock().take() {
            task.abort();
        }
    }

    /// One pass of the idle sweep. Exposed for deterministic tests.
    pub async fn sweep_idle(&self) {
        let idle_timeout = self.config.idle_timeout;
        let now = Instant::now();

        let expired: Vec<(String, PoolEntry)> = {
            let mut inner = self.inner.lock().await;
            let keys: Vec<String> = inner
                .entries
                .iter()
                .filter(|(_, e)| !e.in_use && now.duration_since(e.last_used) > idle_timeout)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| inner.entries.remove(&k).map(|e| (k, e)))
                .collect()
        };

        if expired.is_empty() {
            return;
        }

        debug!(count = expired.len(), "idle sweep reclaiming connections");
        join_all(
            expired
                .into_iter()
                .map(|(key, entry)| async move { close_best_effort(&key, entry.connection).await }),
        )
        .await;
    }

    /// Run the canary probe against a cached connection.
    async fn probe(&self, connection: &Arc<dyn Connection>) -> bool {
        let deadline = self.config.health_probe_timeout;
        match tokio::time::timeout(
            deadline,
            connection.execute(CANARY_COMMAND, ExecuteOptions::new()),
        )
        .await
        {
            Ok(Ok(result)) => result.success && result.stdout.trim_end() == CANARY_EXPECTED,
            Ok(Err(err)) => {
                trace!(error = %err, "health probe errored");
                false
            }
            Err(_) => {
                trace!(timeout = ?deadline, "health probe timed out");
                false
            }
        }
    }
}

/// Choose the entry to evict under capacity pressure: the idle entry with the
/// oldest timestamp, or when every slot is leased, the globally oldest entry.
fn pick_eviction_victim(entries: &HashMap<String, PoolEntry>) -> Option<String> {
    entries
        .iter()
        .filter(|(_, e)| !e.in_use)
        .min_by_key(|(_, e)| e.last_used)
        .or_else(|| entries.iter().min_by_key(|(_, e)| e.last_used))
        .map(|(k, _)| k.clone())
}

/// Close a connection, logging and swallowing any error.
async fn close_best_effort(key: &str, connection: Arc<dyn Connection>) {
    if let Err(err) = connection.close().await {
        warn!(key = %key, error = %err, "error closing connection");
    }
}
