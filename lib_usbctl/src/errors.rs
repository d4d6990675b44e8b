//! # Error Taxonomy
//!
//! Typed errors for every fallible boundary of the library:
//!
//! - [`GatewayError`]: what went wrong while running an external program.
//! - [`OperationError`]: what a bind/unbind caller gets back.
//! - [`ConfigError`]: reading or persisting the config file.
//!
//! Background polling never surfaces errors to callers; it degrades to
//! "no change this cycle" and only logs.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::gateway::commands::Verb;

#[derive(Debug, Error)]
/// # Gateway Error
///
/// Failure of a single external program invocation.
pub enum GatewayError {
    /// The program is not on the allow-list. Checked before anything is spawned.
    #[error("command not allowed: {0}")]
    NotAllowed(String),

    /// The program could not be started (missing binary, permissions, ...).
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The program ran and exited with a non-zero status.
    #[error("{program} exited with status {status}: {}", .output.trim())]
    Failed {
        program: String,
        status: i32,
        output: String,
    },

    /// The program exceeded the timeout ceiling and was killed.
    #[error("{program} did not finish within {limit:?} and was terminated")]
    Timeout { program: String, limit: Duration },
}

impl GatewayError {
    /// True when the program binary itself could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Launch { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Coarse classification of an [`OperationError`], used for diagnostics and
/// for mapping onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the caller. Never a server fault.
    Validation,
    /// The external tool failed, was missing, or is not allowed.
    ExternalTool,
    /// The external tool exceeded its timeout ceiling.
    Timeout,
    /// Another operation on the same device is still running.
    Busy,
}

#[derive(Debug, Error)]
/// # Operation Error
///
/// Returned synchronously by `bind`/`unbind`.
pub enum OperationError {
    #[error("invalid bus ID: {0:?}")]
    InvalidIdentifier(String),

    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("{message}")]
    ExternalFailure { message: String },

    #[error("failed to {verb} device: {program} timed out after {limit:?}")]
    Timeout {
        verb: Verb,
        program: String,
        limit: Duration,
    },

    #[error("device {0} is busy with another operation")]
    Busy(String),
}

impl OperationError {
    /// Maps a gateway failure for `verb` onto the operation taxonomy.
    pub fn from_gateway(verb: Verb, err: GatewayError) -> Self {
        match err {
            GatewayError::NotAllowed(program) => OperationError::CommandNotAllowed(program),
            GatewayError::Timeout { program, limit } => OperationError::Timeout { verb, program, limit },
            other => OperationError::ExternalFailure {
                message: format!("failed to {} device: {}", verb, other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OperationError::InvalidIdentifier(_) => ErrorKind::Validation,
            OperationError::CommandNotAllowed(_) | OperationError::ExternalFailure { .. } => {
                ErrorKind::ExternalTool
            }
            OperationError::Timeout { .. } => ErrorKind::Timeout,
            OperationError::Busy(_) => ErrorKind::Busy,
        }
    }
}

#[derive(Debug, Error)]
/// # Config Error
///
/// I/O failures around the persisted config file. A missing file is not an
/// error; it means "use defaults".
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to persist config {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config writer task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_timeout_maps_to_operation_timeout() {
        let err = OperationError::from_gateway(
            Verb::Bind,
            GatewayError::Timeout {
                program: "usbip".to_string(),
                limit: Duration::from_secs(10),
            },
        );
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_gateway_failure_carries_diagnostic_output() {
        let err = OperationError::from_gateway(
            Verb::Unbind,
            GatewayError::Failed {
                program: "usbip".to_string(),
                status: 1,
                output: "usbip: error: device not found\n".to_string(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
        let message = err.to_string();
        assert!(message.starts_with("failed to unbind device"));
        assert!(message.contains("device not found"));
    }

    #[test]
    fn test_not_allowed_maps_to_command_not_allowed() {
        let err = OperationError::from_gateway(Verb::Bind, GatewayError::NotAllowed("sh".into()));
        assert!(matches!(err, OperationError::CommandNotAllowed(ref p) if p == "sh"));
    }

    #[test]
    fn test_missing_binary_is_detected() {
        let err = GatewayError::Launch {
            program: "usbip".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.is_not_found());
    }
}
