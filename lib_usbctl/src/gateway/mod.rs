//! # External Command Gateway
//!
//! The only place the service touches external programs. Every invocation
//! goes through [`Gateway::exec`], which:
//!
//! 1.  rejects any program that is not on [`ALLOWED_PROGRAMS`] before
//!     anything is spawned,
//! 2.  hands the command to a [`CommandRunner`] together with the timeout
//!     ceiling (arguments are always passed individually, never through a
//!     shell) and stops waiting [`TIMEOUT_SLACK`] after that ceiling,
//! 3.  bounds the captured output to [`OUTPUT_LIMIT`] bytes and maps a
//!     non-zero exit status to [`GatewayError::Failed`].
//!
//! The runner is a trait so the registry and orchestrator can be exercised
//! without real processes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::GatewayError;

/// Platform-specific command lines for listing, binding and unbinding.
pub mod commands;
/// Bound-state detection for a single bus ID.
pub mod probe;
/// `tokio::process` backed runner.
pub mod process;

pub use commands::{CommandSet, Platform, Verb};
pub use probe::{BindProbe, SysfsProbe, UnboundProbe};
pub use process::ProcessRunner;

/// Programs the gateway will ever start.
pub const ALLOWED_PROGRAMS: &[&str] = &["usbip", "/usr/bin/usbip", "/usr/sbin/usbip", "usbipd", "lsusb"];

/// Ceiling on a single external call.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period on top of the timeout before the gateway gives up on a
/// runner that does not enforce the limit itself.
pub const TIMEOUT_SLACK: Duration = Duration::from_millis(500);

/// Ceiling on captured output, in bytes. Anything past it is discarded.
pub const OUTPUT_LIMIT: usize = 8192;

/// A program plus its individually supplied arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit status plus combined stdout/stderr of a finished program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: 0,
            output: output.into(),
        }
    }
}

/// # Command Runner
///
/// Executes one already-approved command. Implementations must honour
/// `limit` and report [`GatewayError::Timeout`] when it is exceeded; a
/// non-zero exit is *not* an error at this level.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec, limit: Duration) -> Result<CommandOutput, GatewayError>;
}

/// # Gateway
///
/// Allow-list and timeout policy in front of a [`CommandRunner`]. Cheap to
/// clone; clones share the runner.
#[derive(Clone)]
pub struct Gateway {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Gateway {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_allowed(program: &str) -> bool {
        ALLOWED_PROGRAMS.contains(&program)
    }

    /// Runs `command` and returns its (bounded) output on a zero exit status.
    pub async fn exec(&self, command: &CommandSpec) -> Result<String, GatewayError> {
        if !Self::is_allowed(&command.program) {
            warn!(program = %command.program, "refusing to run program outside the allow-list");
            return Err(GatewayError::NotAllowed(command.program.clone()));
        }

        debug!(command = %command, "executing external command");
        let result = match tokio::time::timeout(self.timeout + TIMEOUT_SLACK, self.runner.run(command, self.timeout)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %command, limit = ?self.timeout, "runner ignored the timeout, abandoning command");
                return Err(GatewayError::Timeout {
                    program: command.program.clone(),
                    limit: self.timeout,
                });
            }
        };
        let output = truncate_utf8(result.output, OUTPUT_LIMIT);

        if result.status != 0 {
            return Err(GatewayError::Failed {
                program: command.program.clone(),
                status: result.status,
                output,
            });
        }
        Ok(output)
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

/// Cuts `s` to at most `limit` bytes without splitting a character.
pub(crate) fn truncate_utf8(mut s: String, limit: usize) -> String {
    if s.len() > limit {
        let mut cut = limit;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}
