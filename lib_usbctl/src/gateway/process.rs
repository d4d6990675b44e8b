use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{trace, warn};

use crate::errors::GatewayError;

use super::{CommandOutput, CommandRunner, CommandSpec, OUTPUT_LIMIT};

/// # Process Runner
///
/// Spawns real programs with `tokio::process`. No shell is involved: the
/// program and every argument go to the OS separately. Stdout and stderr are
/// drained concurrently, each capped at [`OUTPUT_LIMIT`] bytes, and
/// concatenated in that order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        ProcessRunner
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec, limit: Duration) -> Result<CommandOutput, GatewayError> {
        let launch_error = |source: io::Error| GatewayError::Launch {
            program: command.program.clone(),
            source,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_error)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = tokio::time::timeout(limit, async {
            tokio::try_join!(
                read_bounded(stdout, OUTPUT_LIMIT),
                read_bounded(stderr, OUTPUT_LIMIT),
                child.wait(),
            )
        })
        .await;

        match finished {
            Ok(Ok((mut out, err, status))) => {
                out.extend_from_slice(&err);
                let status = status.code().unwrap_or(-1);
                trace!(command = %command, status, bytes = out.len(), "external command finished");
                Ok(CommandOutput {
                    status,
                    output: String::from_utf8_lossy(&out).into_owned(),
                })
            }
            Ok(Err(source)) => Err(launch_error(source)),
            Err(_) => {
                warn!(command = %command, ?limit, "external command timed out, killing it");
                if let Err(e) = child.start_kill() {
                    warn!(command = %command, error = %e, "failed to kill timed out command");
                }
                Err(GatewayError::Timeout {
                    program: command.program.clone(),
                    limit,
                })
            }
        }
    }
}

/// Reads up to `limit` bytes and discards the rest so the child never
/// blocks on a full pipe.
async fn read_bounded<R>(reader: Option<R>, limit: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    (&mut reader).take(limit as u64).read_to_end(&mut buf).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(buf)
}
