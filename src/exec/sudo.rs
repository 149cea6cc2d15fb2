//! Injection-safe sudo command wrapping.
//!
//! Escalation rewrites the command line before it reaches the transport. The
//! run-as-user is the only escalation field a caller controls verbatim, so it
//! is validated against the POSIX username pattern first; an invalid user
//! fails before any data touches the wire.

use crate::config::SudoConfig;
use crate::error::Result;
use crate::security::{validate_run_as_user, SensitiveString};

/// Per-call privilege escalation options.
///
/// Defaults come from [`SudoConfig`]; a call can flip escalation on or pick a
/// different run-as-user without touching the engine configuration.
#[derive(Debug, Clone)]
pub struct SudoOptions {
    /// Whether to escalate at all.
    pub enabled: bool,
    /// Escalation binary, normally `sudo`.
    pub command: String,
    /// User to run the command as.
    pub run_as_user: String,
    /// Escalation password for non-NOPASSWD sudoers.
    pub password: Option<SensitiveString>,
}

impl SudoOptions {
    /// Build options from configuration defaults.
    pub fn from_config(config: &SudoConfig) -> Self {
        Self {
            enabled: config.enabled,
            command: config.command.clone(),
            run_as_user: config.run_as_user.clone(),
            password: if config.passwordless {
                None
            } else {
                config.password.clone()
            },
        }
    }

    /// Force escalation on, keeping the configured binary and user.
    pub fn forced(config: &SudoConfig) -> Self {
        let mut options = Self::from_config(config);
        options.enabled = true;
        options
    }
}

/// Rewrite a command for privilege escalation.
///
/// Returns the command unchanged when escalation is disabled. Otherwise the
/// configured binary is prefixed, with `-u <user>` for non-root targets and
/// `-S` fed from a quoted `printf` when a password is required. The run-as
/// user is validated before the command line is assembled.
pub fn wrap_command(command: &str, sudo: &SudoOptions) -> Result<String> {
    if !sudo.enabled {
        return Ok(command.to_string());
    }

    validate_run_as_user(&sudo.run_as_user)?;

    let mut prefix = sudo.command.clone();
    if let Some(password) = &sudo.password {
        // -p '' suppresses the prompt so it cannot interleave with stderr.
        prefix = format!(
            "printf '%s\\n' {} | {} -S -p ''",
            shell_words::quote(password.expose()),
            prefix
        );
    }
    if sudo.run_as_user != "root" {
        prefix = format!("{} -u {}", prefix, sudo.run_as_user);
    }

    Ok(format!("{} {}", prefix, command))
}
