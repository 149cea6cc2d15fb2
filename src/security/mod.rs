//! Security controls for remote execution.
//!
//! Everything user-supplied that ends up inside a command line passes through
//! this module first:
//!
//! - **Input validation**: POSIX run-as-user and environment-variable-name
//!   checks that reject shell metacharacters before any data reaches the
//!   transport.
//! - **Credential redaction**: pattern-based scrubbing of passwords and
//!   private-key material from command text, captured output, and log lines.
//! - **No-log wrapper**: [`SensitiveString`], a string type whose `Debug`,
//!   `Display`, and `Serialize` impls always render `[REDACTED]`.

pub mod redact;
pub mod secret;
pub mod validate;

pub use redact::redact;
pub use secret::SensitiveString;
pub use validate::{validate_env_name, validate_run_as_user};
