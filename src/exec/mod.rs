//! Remote execution service.
//!
//! Turns a (host, command | script | package operation) request into a
//! normalized [`ExecutionResult`] using the connection pool, enforcing
//! deadlines, privilege escalation, and fan-out concurrency limits.
//!
//! # Error boundaries
//!
//! Capacity, connection, and validation failures propagate as [`Error`];
//! retry policy belongs to the caller. Command-level failures (non-zero exit,
//! deadline expiry) are captured into the result with `success == false` so a
//! multi-host fan-out always completes with partial failures.

/// Package-manager detection and command mapping.
pub mod package;

/// Privilege escalation wrapping.
pub mod sudo;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::connection::pool::{ConnectionPool, PoolStats};
use crate::connection::{ConnectionFactory, ExecuteOptions, OutputEvent};
use crate::error::{Error, Result};
use crate::host::HostDescriptor;
use crate::security::{redact, validate_env_name};

use package::{CommandProbeDetector, PackageManagerDetector, PackageOp};
use sudo::SudoOptions;

/// Stable failure codes attached to execution results.
///
/// Classification from raw error text is best-effort substring matching, not
/// exhaustive; anything unrecognized maps to [`ErrorKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConnectionTimeout,
    CommandTimeout,
    ConnectionRefused,
    AuthenticationFailed,
    HostKeyVerificationFailed,
    PermissionDenied,
    CommandNotFound,
    NetworkError,
    CommandFailed,
    Unknown,
}

/// Map raw error text to a stable failure code.
pub fn classify_error(message: &str) -> ErrorKind {
    let message = message.to_lowercase();
    if message.contains("host key") {
        ErrorKind::HostKeyVerificationFailed
    } else if message.contains("auth") {
        ErrorKind::AuthenticationFailed
    } else if message.contains("refused") {
        ErrorKind::ConnectionRefused
    } else if message.contains("permission denied") {
        ErrorKind::PermissionDenied
    } else if message.contains("command not found") || message.contains("not recognized") {
        ErrorKind::CommandNotFound
    } else if message.contains("timed out") || message.contains("timeout") {
        if message.contains("connect") {
            ErrorKind::ConnectionTimeout
        } else {
            ErrorKind::CommandTimeout
        }
    } else if message.contains("unreachable")
        || message.contains("no route")
        || message.contains("network")
    {
        ErrorKind::NetworkError
    } else {
        ErrorKind::Unknown
    }
}

impl From<&Error> for ErrorKind {
    fn from(err: &Error) -> Self {
        match err {
            Error::CommandTimeout { .. } => ErrorKind::CommandTimeout,
            Error::ConnectionTimeout { .. } => ErrorKind::ConnectionTimeout,
            Error::Connection { message, .. } => match classify_error(message) {
                ErrorKind::Unknown => ErrorKind::NetworkError,
                kind => kind,
            },
            Error::UnknownPackageManager(_) => ErrorKind::CommandFailed,
            Error::Capacity { .. }
            | Error::HostBusy { .. }
            | Error::Validation(_)
            | Error::Config(_)
            | Error::PoolClosed => ErrorKind::Unknown,
        }
    }
}

/// Normalized outcome of a single execution on a single host.
///
/// The `command` field and both output streams are credential-redacted; the
/// raw wrapped command line (which may carry an escalation password) never
/// leaves the transport call.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Display name of the target host.
    pub host: String,
    /// The logical command, credential-redacted.
    pub command: String,
    /// Captured standard output, credential-redacted.
    pub stdout: String,
    /// Captured standard error, credential-redacted.
    pub stderr: String,
    /// Exit code; `-1` when the command never produced one.
    pub exit_code: i32,
    /// Whether the execution succeeded end to end.
    pub success: bool,
    /// Wall-clock duration of the execution, including connection acquisition.
    pub duration_ms: u64,
    /// When the execution started.
    pub timestamp: DateTime<Utc>,
    /// Human-readable failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable failure code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionResult {
    /// Build a failed result from a service-level error, for fan-out callers
    /// that need a complete result map despite per-host failures.
    pub fn from_error(host: &str, redacted_command: &str, err: &Error) -> Self {
        Self {
            host: host.to_string(),
            command: redacted_command.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            success: false,
            duration_ms: 0,
            timestamp: Utc::now(),
            error: Some(err.to_string()),
            error_kind: Some(ErrorKind::from(err)),
        }
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    /// Command deadline; defaults to the configured `command_timeout`.
    pub timeout: Option<Duration>,
    /// Override the configured sudo default for this call.
    pub sudo: Option<bool>,
    /// Run-as-user override; validated before the transport is touched.
    pub sudo_user: Option<String>,
    /// Extra environment variables, rendered as validated `KEY=value`
    /// prefixes on the command line.
    pub env: HashMap<String, String>,
    /// Incremental output sink; closed when execution completes.
    pub output: Option<mpsc::Sender<OutputEvent>>,
}

impl ExecuteRequest {
    /// Create an empty request using all configured defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the command deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Request or suppress privilege escalation for this call.
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = Some(sudo);
        self
    }

    /// Escalate to a specific user.
    pub fn with_sudo_user(mut self, user: impl Into<String>) -> Self {
        self.sudo = Some(true);
        self.sudo_user = Some(user.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Attach an incremental output sink.
    pub fn with_output(mut self, sender: mpsc::Sender<OutputEvent>) -> Self {
        self.output = Some(sender);
        self
    }
}

/// Per-execution state, surfaced as a structured tracing field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Connected,
    Executing,
    Completed,
    TimedOut,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::Executing => "executing",
            Phase::Completed => "completed",
            Phase::TimedOut => "timed_out",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The remote execution service.
///
/// Owns the connection pool; the transport handshake is delegated to the
/// injected [`ConnectionFactory`] and package-manager detection to the
/// injected [`PackageManagerDetector`].
pub struct RemoteExecutor {
    config: Arc<EngineConfig>,
    pool: Arc<ConnectionPool>,
    factory: Arc<dyn ConnectionFactory>,
    detector: Arc<dyn PackageManagerDetector>,
}

impl RemoteExecutor {
    /// Create a service over a validated configuration and transport factory.
    pub fn new(config: EngineConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let pool = Arc::new(ConnectionPool::new(Arc::clone(&config)));
        Ok(Self {
            config,
            pool,
            factory,
            detector: Arc::new(CommandProbeDetector),
        })
    }

    /// Replace the package-manager detector.
    pub fn with_detector(mut self, detector: Arc<dyn PackageManagerDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// The engine configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying pool, for observability endpoints.
    pub fn pool(&self) -> Arc<ConnectionPool> {
        Arc::clone(&self.pool)
    }

    /// Arm the pool's periodic idle sweep. Call once at startup.
    pub fn start(&self) {
        self.pool.start();
    }

    /// Acquire a connection for a host.
    ///
    /// Thin wrapper over pool acquire; most callers want
    /// [`RemoteExecutor::execute_command`] instead.
    pub async fn connect(&self, host: &HostDescriptor) -> Result<crate::connection::pool::PooledHandle> {
        self.pool.acquire(host, self.factory.as_ref()).await
    }

    /// Release a host's pooled connection.
    pub async fn disconnect(&self, host: &HostDescriptor) {
        self.pool.release(&host.pool_key(&self.config)).await;
    }

    /// Connect, run the canary, disconnect. Never errors.
    pub async fn test_connection(&self, host: &HostDescriptor) -> bool {
        let handle = match self.pool.acquire(host, self.factory.as_ref()).await {
            Ok(handle) => handle,
            Err(err) => {
                debug!(host = %host.name, error = %err, "test connection failed to acquire");
                return false;
            }
        };
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            handle.connection().execute("echo test", ExecuteOptions::new()),
        )
        .await;
        self.pool.release(handle.key()).await;
        matches!(outcome, Ok(Ok(result)) if result.success && result.stdout.trim_end() == "test")
    }

    /// Execute a command on one host.
    ///
    /// Sudo wrapping and env-name validation happen before the transport is
    /// touched. The pooled connection is always released (never removed), on
    /// success and on command-level failure alike; a connection broken by a
    /// timed-out command is caught by the pool's health probe on the next
    /// acquire.
    pub async fn execute_command(
        &self,
        host: &HostDescriptor,
        command: &str,
        request: &ExecuteRequest,
    ) -> Result<ExecutionResult> {
        trace!(host = %host.name, phase = %Phase::Idle, "execution requested");
        let sudo = self.resolve_sudo(request);
        let wire_command = build_command_line(command, &request.env, &sudo)?;
        let display_command = redact(command);
        let deadline = request.timeout.unwrap_or(self.config.command_timeout);
        let timestamp = Utc::now();
        let started = Instant::now();

        trace!(host = %host.name, phase = %Phase::Connecting, "acquiring connection");
        let handle = self.pool.acquire(host, self.factory.as_ref()).await?;
        trace!(host = %host.name, phase = %Phase::Connected, key = %handle.key(), "connection ready");

        let mut options = ExecuteOptions::new();
        if let Some(sender) = &request.output {
            options = options.with_output(sender.clone());
        }

        debug!(
            host = %host.name,
            command = %display_command,
            timeout = ?deadline,
            phase = %Phase::Executing,
            "executing command"
        );
        let outcome = tokio::time::timeout(
            deadline,
            handle.connection().execute(&wire_command, options),
        )
        .await;
        self.pool.release(handle.key()).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(result)) => {
                let phase = if result.success {
                    Phase::Completed
                } else {
                    Phase::Failed
                };
                debug!(
                    host = %host.name,
                    exit_code = result.exit_code,
                    duration_ms,
                    phase = %phase,
                    "command finished"
                );
                let (error, error_kind) = if result.success {
                    (None, None)
                } else {
                    let kind = match classify_error(&result.stderr) {
                        ErrorKind::Unknown => ErrorKind::CommandFailed,
                        kind => kind,
                    };
                    (
                        Some(format!("command exited with code {}", result.exit_code)),
                        Some(kind),
                    )
                };
                Ok(ExecutionResult {
                    host: host.name.clone(),
                    command: display_command,
                    stdout: redact(&result.stdout),
                    stderr: redact(&result.stderr),
                    exit_code: result.exit_code,
                    success: result.success,
                    duration_ms,
                    timestamp,
                    error,
                    error_kind,
                })
            }
            Ok(Err(err)) => {
                warn!(host = %host.name, error = %err, phase = %Phase::Failed, "transport failure");
                Err(Error::connection(&host.address, &err))
            }
            Err(_) => {
                // The local stream is abandoned; the remote process may still
                // be running. The connection goes back idle and the health
                // probe decides its fate on the next acquire.
                warn!(
                    host = %host.name,
                    timeout_secs = deadline.as_secs(),
                    phase = %Phase::TimedOut,
                    "command timed out"
                );
                let err = Error::CommandTimeout {
                    host: host.name.clone(),
                    timeout_secs: deadline.as_secs(),
                };
                Ok(ExecutionResult {
                    host: host.name.clone(),
                    command: display_command,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: -1,
                    success: false,
                    duration_ms,
                    timestamp,
                    error: Some(err.to_string()),
                    error_kind: Some(ErrorKind::CommandTimeout),
                })
            }
        }
    }

    /// Execute a script body through the remote shell.
    ///
    /// The body is passed quoted to `sh -c`, so no upload is needed and the
    /// script content cannot escape its argument position.
    pub async fn execute_script(
        &self,
        host: &HostDescriptor,
        script: &str,
        request: &ExecuteRequest,
    ) -> Result<ExecutionResult> {
        let command = format!("sh -c {}", shell_words::quote(script));
        self.execute_command(host, &command, request).await
    }

    /// Execute a command across many hosts in bounded batches.
    ///
    /// Hosts are partitioned into batches of `concurrency_limit`; each batch
    /// runs in parallel and is awaited in full before the next starts. Every
    /// host gets an entry in the returned map; per-host service errors are
    /// converted into failed results rather than aborting the fan-out.
    pub async fn execute_on_multiple_hosts(
        &self,
        hosts: &[HostDescriptor],
        command: &str,
        request: &ExecuteRequest,
    ) -> HashMap<String, ExecutionResult> {
        let batch_size = self.config.concurrency_limit.max(1);
        let mut results = HashMap::with_capacity(hosts.len());

        for batch in hosts.chunks(batch_size) {
            debug!(batch = batch.len(), "starting fan-out batch");
            let futures = batch.iter().map(|host| async move {
                let result = match self.execute_command(host, command, request).await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(host = %host.name, error = %err, "fan-out host failed");
                        ExecutionResult::from_error(&host.name, &redact(command), &err)
                    }
                };
                (host.name.clone(), result)
            });
            for (name, result) in join_all(futures).await {
                results.insert(name, result);
            }
        }

        results
    }

    /// Install a package using the host's detected package manager.
    pub async fn install_package(
        &self,
        host: &HostDescriptor,
        package: &str,
    ) -> Result<ExecutionResult> {
        self.package_operation(host, package, PackageOp::Install)
            .await
    }

    /// Remove a package using the host's detected package manager.
    pub async fn remove_package(
        &self,
        host: &HostDescriptor,
        package: &str,
    ) -> Result<ExecutionResult> {
        self.package_operation(host, package, PackageOp::Remove)
            .await
    }

    /// Upgrade a package using the host's detected package manager.
    pub async fn update_package(
        &self,
        host: &HostDescriptor,
        package: &str,
    ) -> Result<ExecutionResult> {
        self.package_operation(host, package, PackageOp::Update)
            .await
    }

    async fn package_operation(
        &self,
        host: &HostDescriptor,
        package: &str,
        op: PackageOp,
    ) -> Result<ExecutionResult> {
        let handle = self.pool.acquire(host, self.factory.as_ref()).await?;
        let detected = self.detector.detect(handle.connection().as_ref()).await;
        self.pool.release(handle.key()).await;

        let manager = match detected {
            Ok(Some(manager)) => manager,
            Ok(None) => {
                // Non-fatal: reported as a failed result so fan-outs over
                // mixed fleets keep going.
                let err = Error::UnknownPackageManager(host.name.clone());
                debug!(host = %host.name, "no supported package manager");
                return Ok(ExecutionResult::from_error(
                    &host.name,
                    &format!("{:?} {}", op, package).to_lowercase(),
                    &err,
                ));
            }
            Err(err) => return Err(Error::connection(&host.address, &err)),
        };

        debug!(host = %host.name, manager = %manager, ?op, package, "package operation");
        let command = manager.command_for(op, package);
        let request = ExecuteRequest::new().with_sudo(true);
        self.execute_command(host, &command, &request).await
    }

    /// Pool counters for observability endpoints.
    pub async fn get_stats(&self) -> PoolStats {
        self.pool.get_stats().await
    }

    /// Close every pooled connection and disarm the sweep.
    pub async fn cleanup(&self) {
        self.pool.close_all().await;
    }

    /// Merge per-call sudo overrides onto the configured defaults.
    fn resolve_sudo(&self, request: &ExecuteRequest) -> SudoOptions {
        let mut sudo = SudoOptions::from_config(&self.config.sudo);
        if let Some(enabled) = request.sudo {
            sudo.enabled = enabled;
        }
        if let Some(user) = &request.sudo_user {
            sudo.run_as_user = user.clone();
        }
        sudo
    }
}

/// Assemble the wire command: validated env prefixes, then sudo wrapping.
///
/// Env names are validated and values shell-quoted, so neither can break out
/// of its position; the run-as-user is validated inside
/// [`sudo::wrap_command`].
fn build_command_line(
    command: &str,
    env: &HashMap<String, String>,
    sudo: &SudoOptions,
) -> Result<String> {
    let mut line = command.to_string();
    if !env.is_empty() {
        let mut pairs: Vec<(&String, &String)> = env.iter().collect();
        pairs.sort();
        let mut prefix = String::new();
        for (key, value) in pairs {
            validate_env_name(key)?;
            prefix.push_str(&format!("{}={} ", key, shell_words::quote(value)));
        }
        line = format!("{}{}", prefix, line);
    }
    sudo::wrap_command(&line, sudo)
}
