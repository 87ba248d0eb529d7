//! Backup Engine - Orchestrates a single mirror-and-publish run
//!
//! One run mirrors the source tree into the backup directory, makes sure the
//! ignore manifest carries the required patterns, reconciles the repository
//! with its remote and finally commits and pushes when anything changed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, Instrument};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::git::GitClient;
use crate::ignore::ensure_ignore_patterns;
use crate::mirror::{mirror, MirrorOptions, MirrorStats};
use crate::publish::PublishOutcome;
use crate::repo::RepoState;
use crate::runner::{CommandRunner, SystemRunner};

/// What to back up and where to publish it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub source_path: PathBuf,
    pub backup_path: PathBuf,
    pub remote_url: String,
}

impl BackupTarget {
    pub fn validate(&self) -> Result<()> {
        if self.source_path.as_os_str().is_empty() {
            return Err(Error::Config("source path must not be empty".to_string()));
        }
        if self.backup_path.as_os_str().is_empty() {
            return Err(Error::Config("backup path must not be empty".to_string()));
        }
        if self.remote_url.trim().is_empty() {
            return Err(Error::Config("remote URL must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Results from a complete run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub repo_state: RepoState,
    pub mirror: MirrorStats,
    pub ignore_updated: bool,
    pub outcome: PublishOutcome,
    pub duration: Duration,
}

#[derive(Clone)]
pub struct BackupEngine {
    target: BackupTarget,
    git: GitClient,
    mirror_options: MirrorOptions,
    ignore_patterns: Vec<String>,
}

impl BackupEngine {
    pub fn new(
        target: BackupTarget,
        git: GitClient,
        mirror_options: MirrorOptions,
        ignore_patterns: Vec<String>,
    ) -> Self {
        Self {
            target,
            git,
            mirror_options,
            ignore_patterns,
        }
    }

    /// Build an engine that runs real git processes
    pub fn from_config(config: &Config) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner::new()))
    }

    pub fn with_runner(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(
            config.target(),
            GitClient::new(runner, config.git_settings()),
            config.mirror_options(),
            config.required_ignore_patterns(),
        )
    }

    pub fn target(&self) -> &BackupTarget {
        &self.target
    }

    /// Run one backup: mirror, ignore manifest, repository, publish
    pub async fn run(&self) -> Result<RunReport> {
        let span = info_span!(
            "backup",
            source = %self.target.source_path.display(),
            backup = %self.target.backup_path.display()
        );

        self.run_steps().instrument(span).await
    }

    async fn run_steps(&self) -> Result<RunReport> {
        let start_time = Instant::now();
        self.target.validate()?;

        let source = &self.target.source_path;
        let backup = &self.target.backup_path;

        let stats = mirror(source, backup, &self.mirror_options).await?;

        let ignore_updated = ensure_ignore_patterns(backup, &self.ignore_patterns).await?;

        let repo_state = self.git.reconcile(backup, &self.target.remote_url).await?;

        let outcome = self.git.publish(backup, self.git.branch()).await?;

        let report = RunReport {
            repo_state,
            mirror: stats,
            ignore_updated,
            outcome,
            duration: start_time.elapsed(),
        };

        info!(
            "Backup completed in {:.2}s: {} files ({} bytes) mirrored, {} stale entries removed, {}",
            report.duration.as_secs_f64(),
            report.mirror.files,
            report.mirror.bytes,
            report.mirror.removed,
            describe(&report.outcome)
        );

        Ok(report)
    }
}

fn describe(outcome: &PublishOutcome) -> String {
    match outcome {
        PublishOutcome::NoChange => "no changes".to_string(),
        PublishOutcome::Published { commit, pushed: true } => format!("published {}", commit),
        PublishOutcome::Published { commit, pushed: false } => {
            format!("committed {} but push failed", commit)
        }
    }
}
