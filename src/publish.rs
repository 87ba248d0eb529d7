//! Change-Gated Publisher
//!
//! Commits and pushes the backup only when the working tree differs from the last
//! commit. A failed push is reported but does not fail the run: the commit is already
//! safe in local history and the next push carries it.

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::error::{CommandError, Error, Result};
use crate::git::{GitClient, REMOTE_NAME};

/// Working tree compared against the last commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStatus {
    Clean,
    /// Porcelain status lines, one per changed path
    Dirty(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing changed; no commit or push was attempted
    NoChange,
    /// A commit was created; `pushed` is false when the push failed
    Published { commit: String, pushed: bool },
}

/// Commit message for a backup taken at `now`
pub fn commit_message(now: DateTime<Utc>) -> String {
    format!("Backup: {}", now.to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl GitClient {
    pub async fn change_status(&self, dir: &Path) -> Result<ChangeStatus> {
        let output = self.git(dir, &["status", "--porcelain"]).await?;

        if output.stdout.trim().is_empty() {
            Ok(ChangeStatus::Clean)
        } else {
            Ok(ChangeStatus::Dirty(
                output.stdout.lines().map(str::to_string).collect(),
            ))
        }
    }

    /// Commit and push pending changes in `dir` to `branch`.
    pub async fn publish(&self, dir: &Path, branch: &str) -> Result<PublishOutcome> {
        let changes = match self.change_status(dir).await? {
            ChangeStatus::Clean => {
                info!("No changes to publish");
                self.warn_if_unpushed(dir, branch).await;
                return Ok(PublishOutcome::NoChange);
            }
            ChangeStatus::Dirty(changes) => changes,
        };

        info!("Publishing {} changed paths", changes.len());
        for change in &changes {
            debug!("  {}", change);
        }

        self.git(dir, &["add", "--all"]).await?;

        let message = commit_message(Utc::now());
        let mut args: Vec<String> = Vec::new();
        if let Some(author) = &self.settings().author {
            args.push("-c".to_string());
            args.push(format!("user.name={}", author.name));
            args.push("-c".to_string());
            args.push(format!("user.email={}", author.email));
        }
        args.extend(["commit", "--quiet", "-m", message.as_str()].map(str::to_string));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.git(dir, &args).await?;

        let commit = self.git(dir, &["rev-parse", "HEAD"]).await?.stdout;
        info!("Created commit {} ({})", commit, message);

        match self
            .git_with_retry(
                dir,
                "git push",
                &["push", "--quiet", "--set-upstream", REMOTE_NAME, branch],
            )
            .await
        {
            Ok(_) => {
                info!("Pushed {} to {}/{}", commit, REMOTE_NAME, branch);
                Ok(PublishOutcome::Published {
                    commit,
                    pushed: true,
                })
            }
            Err(e @ CommandError::Timeout { .. }) => Err(Error::Command(e)),
            Err(e) => {
                error!(
                    "Push failed, commit {} is kept locally and will be pushed on a later run: {}",
                    commit, e
                );
                Ok(PublishOutcome::Published {
                    commit,
                    pushed: false,
                })
            }
        }
    }

    /// Warn when earlier commits never reached the remote
    async fn warn_if_unpushed(&self, dir: &Path, branch: &str) {
        let range = format!("{}/{}..{}", REMOTE_NAME, branch, branch);
        if let Some(ahead) = self.count_commits(dir, &range).await {
            if ahead > 0 {
                warn!(
                    "{} is {} commit(s) ahead of {}/{}; an earlier push did not complete, push manually or wait for the next change",
                    branch, ahead, REMOTE_NAME, branch
                );
            }
            return;
        }

        // No remote-tracking branch: nothing was ever pushed
        match self.count_commits(dir, branch).await {
            Some(0) | None => {}
            Some(local) => warn!(
                "{} has {} commit(s) that never reached {}; an earlier push did not complete, push manually or wait for the next change",
                branch, local, REMOTE_NAME
            ),
        }
    }

    async fn count_commits(&self, dir: &Path, revision: &str) -> Option<u32> {
        match self.git(dir, &["rev-list", "--count", revision]).await {
            Ok(output) => match output.stdout.parse() {
                Ok(count) => Some(count),
                Err(_) => {
                    debug!("Unexpected rev-list output: {}", output.stdout);
                    None
                }
            },
            Err(e) => {
                debug!("Could not count commits in {}: {}", revision, e);
                None
            }
        }
    }
}
