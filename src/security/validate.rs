//! Input validation for values interpolated into remote command lines.
//!
//! Validation happens before any data reaches the transport; a rejected value
//! never produces network traffic. The run-as-user check is the critical one:
//! the sudo `-u` argument is the only field of a privilege-escalated command
//! that callers control verbatim.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// POSIX username: starts with a lowercase letter or underscore, then up to 31
/// lowercase letters, digits, underscores, or hyphens.
static RUN_AS_USER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("invalid username regex"));

/// Environment variable name: letter or underscore, then letters, digits,
/// underscores.
static ENV_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("invalid env name regex"));

/// Validate a run-as-user for privilege escalation.
///
/// Rejects anything outside the POSIX username pattern, which rules out every
/// shell metacharacter a command-injection payload would need.
pub fn validate_run_as_user(user: &str) -> Result<()> {
    if user.is_empty() {
        return Err(Error::Validation(
            "sudo run-as-user cannot be empty".to_string(),
        ));
    }
    if !RUN_AS_USER.is_match(user) {
        return Err(Error::Validation(format!(
            "sudo run-as-user '{}' is not a valid POSIX username",
            user
        )));
    }
    Ok(())
}

/// Validate an environment variable name supplied per call.
pub fn validate_env_name(name: &str) -> Result<()> {
    if !ENV_NAME.is_match(name) {
        return Err(Error::Validation(format!(
            "invalid environment variable name '{}'",
            name
        )));
    }
    Ok(())
}
