//! External command execution with a per-command timeout.
//!
//! Every git invocation in the crate goes through [`CommandRunner`], built from an
//! argument vector rather than a shell string, so paths and URLs are never re-quoted.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as AsyncCommand;
use tokio::time::timeout;
use tracing::debug;

use crate::error::CommandError;

/// Default timeout for ordinary git operations
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the remote reachability probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A fully described command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// A git invocation that never blocks on an interactive credential prompt
    pub fn git<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("git")
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
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

/// Captured result of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Capability to run external commands
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion or until its timeout elapses
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        debug!("Running: {}", spec);

        let mut command = AsyncCommand::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &spec.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            command: spec.to_string(),
            source,
        })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        // Only a timeout kills the child. If this future is dropped instead, the
        // process is left to finish on its own so git never stops half-way.
        let waited = timeout(spec.timeout, async {
            tokio::join!(child.wait(), read_pipe(stdout_pipe), read_pipe(stderr_pipe))
        })
        .await;

        let (status, stdout, stderr) = match waited {
            Ok((Ok(status), stdout, stderr)) => (status, stdout, stderr),
            Ok((Err(e), _, _)) => {
                return Err(CommandError::Failed {
                    command: spec.to_string(),
                    stderr: e.to_string(),
                    exit_code: None,
                });
            }
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    debug!("Could not kill `{}`: {}", spec, e);
                }
                // Reap the killed child
                let _ = child.wait().await;
                return Err(CommandError::Timeout {
                    command: spec.to_string(),
                    timeout: spec.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&stderr).trim_end().to_string();
        let exit_code = status.code();

        if !status.success() {
            debug!("`{}` exited with {:?}: {}", spec, exit_code, stderr);
            // Some git subcommands report failures on stdout only
            let stderr = if stderr.is_empty() { stdout } else { stderr };
            return Err(CommandError::Failed {
                command: spec.to_string(),
                stderr,
                exit_code,
            });
        }

        if !stdout.is_empty() {
            debug!("`{}` stdout: {}", spec, stdout);
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Failed to read child output: {}", e);
        }
    }
    buf
}
