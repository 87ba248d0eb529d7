use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::CommandError;
use crate::retry::{with_retry, RetryPolicy};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, DEFAULT_COMMAND_TIMEOUT, DEFAULT_PROBE_TIMEOUT};

/// Name of the single remote the backup publishes to
pub const REMOTE_NAME: &str = "origin";

/// Repository metadata directory inside the backup
pub const METADATA_DIR: &str = ".git";

pub const DEFAULT_BRANCH: &str = "main";

/// Identity recorded on backup commits when the host has none configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

/// Tuning shared by every git operation of a run
#[derive(Debug, Clone)]
pub struct GitSettings {
    pub branch: String,
    pub command_timeout: Duration,
    pub probe_timeout: Duration,
    pub retry: RetryPolicy,
    pub author: Option<CommitAuthor>,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            branch: DEFAULT_BRANCH.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            retry: RetryPolicy::default(),
            author: None,
        }
    }
}

/// Git operations against the backup directory
///
/// Repository reconciliation lives in `repo.rs` and the commit/push gate in
/// `publish.rs`; this type holds the runner and the shared command helpers.
#[derive(Clone)]
pub struct GitClient {
    runner: Arc<dyn CommandRunner>,
    settings: GitSettings,
}

impl GitClient {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: GitSettings) -> Self {
        Self { runner, settings }
    }

    pub fn settings(&self) -> &GitSettings {
        &self.settings
    }

    pub fn branch(&self) -> &str {
        &self.settings.branch
    }

    fn spec(&self, dir: &Path, args: &[&str]) -> CommandSpec {
        CommandSpec::git(args.iter().copied())
            .current_dir(dir)
            .timeout(self.settings.command_timeout)
    }

    /// Run a git command once
    pub(crate) async fn git(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput, CommandError> {
        self.runner.execute(&self.spec(dir, args)).await
    }

    /// Run a git command under the retry policy.
    ///
    /// Timeouts are not retried; they are surfaced straight away.
    pub(crate) async fn git_with_retry(
        &self,
        dir: &Path,
        label: &str,
        args: &[&str],
    ) -> Result<CommandOutput, CommandError> {
        with_retry(self.settings.retry, label, || self.git(dir, args)).await
    }

    /// Run a git command with the short probe timeout
    pub(crate) async fn git_probe(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let spec = self.spec(dir, args).timeout(self.settings.probe_timeout);
        self.runner.execute(&spec).await
    }

    /// Resolve a ref to its commit id, `None` when it does not exist
    pub(crate) async fn resolve_ref(&self, dir: &Path, reference: &str) -> Result<Option<String>, CommandError> {
        match self.git(dir, &["rev-parse", "--verify", "--quiet", reference]).await {
            Ok(output) => Ok(Some(output.stdout)),
            Err(CommandError::Failed { .. }) => {
                debug!("{} does not exist", reference);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Currently configured URL of the backup remote
    pub(crate) async fn remote_url(&self, dir: &Path) -> Result<Option<String>, CommandError> {
        match self.git(dir, &["remote", "get-url", REMOTE_NAME]).await {
            Ok(output) if !output.stdout.is_empty() => Ok(Some(output.stdout)),
            Ok(_) | Err(CommandError::Failed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Compare remote URLs loosely, ignoring scheme spelling and a trailing `.git`
pub(crate) fn remote_urls_match(actual: &str, expected: &str) -> bool {
    let normalize = |url: &str| -> String {
        url.trim()
            .replace("git@github.com:", "https://github.com/")
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .to_lowercase()
    };

    normalize(actual) == normalize(expected)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::runner::MockCommandRunner;
    use mockall::Sequence;

    pub const REMOTE: &str = "file:///srv/backup.git";

    pub fn fast_settings() -> GitSettings {
        GitSettings {
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
            ..GitSettings::default()
        }
    }

    /// Expect one git invocation with exactly `args`, answering with `stdout`
    pub fn expect_ok(mock: &mut MockCommandRunner, seq: &mut Sequence, args: &'static [&'static str], stdout: &'static str) {
        mock.expect_execute()
            .withf(move |spec| spec.program == "git" && spec.args == args)
            .times(1)
            .in_sequence(seq)
            .returning(move |_| {
                Ok(CommandOutput {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    exit_code: Some(0),
                })
            });
    }

    /// Expect `times` git invocations with exactly `args`, each exiting with `exit_code`
    pub fn expect_fail(
        mock: &mut MockCommandRunner,
        seq: &mut Sequence,
        args: &'static [&'static str],
        exit_code: i32,
        times: usize,
    ) {
        mock.expect_execute()
            .withf(move |spec| spec.program == "git" && spec.args == args)
            .times(times)
            .in_sequence(seq)
            .returning(move |spec| {
                Err(CommandError::Failed {
                    command: spec.to_string(),
                    stderr: "fatal: simulated".to_string(),
                    exit_code: Some(exit_code),
                })
            });
    }

    /// Expect one git invocation with exactly `args` that times out
    pub fn expect_timeout(mock: &mut MockCommandRunner, seq: &mut Sequence, args: &'static [&'static str]) {
        mock.expect_execute()
            .withf(move |spec| spec.program == "git" && spec.args == args)
            .times(1)
            .in_sequence(seq)
            .returning(|spec| {
                Err(CommandError::Timeout {
                    command: spec.to_string(),
                    timeout: spec.timeout,
                })
            });
    }

    pub fn client(mock: MockCommandRunner) -> GitClient {
        GitClient::new(Arc::new(mock), fast_settings())
    }
}
