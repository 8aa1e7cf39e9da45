//! Bounded-time execution of external commands.
//!
//! Every process-backed capability goes through [`CommandRunner`], so no
//! external tool can hang an operation. A command that outlives its budget
//! is killed.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status.
    pub status: ExitStatus,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// Trimmed stderr, or the exit status when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.status.to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs external commands with a fixed time budget.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    /// Create a runner with the given budget per command.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The budget per command.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a command, optionally feeding `stdin`, and capture its output.
    ///
    /// A non-zero exit status is not an error here; see [`run_checked`].
    /// Spawn failures (e.g. the program is missing) surface as [`Error::Io`].
    ///
    /// [`run_checked`]: CommandRunner::run_checked
    pub async fn run(&self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<CommandOutput> {
        let line = command_line(program, args);
        debug!(command = %line, "running");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // The stdin write shares the budget: a child that never reads it
        // would otherwise block us once the pipe buffer fills.
        let exchange = async move {
            if let Some(input) = stdin
                && let Some(mut pipe) = child.stdin.take()
            {
                pipe.write_all(input.as_bytes()).await?;
                // Closing the pipe signals EOF to tools like `wg pubkey`.
                drop(pipe);
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(Error::CommandTimeout {
                    command: line,
                    timeout: self.timeout,
                });
            }
        };

        Ok(CommandOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run a command and return its trimmed stdout, failing on a non-zero
    /// exit status.
    pub async fn run_checked(&self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let output = self.run(program, args, stdin).await?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: command_line(program, args),
                detail: output.diagnostic(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
