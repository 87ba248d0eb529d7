//! Preflight checks behind `gitmirror doctor`
//!
//! These verify the host and the configuration without touching the backup:
//! nothing here mirrors, commits or pushes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::CommandError;
use crate::git::METADATA_DIR;
use crate::runner::{CommandRunner, CommandSpec};

const WRITE_PROBE_NAME: &str = ".gitmirror-write-probe";

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Source directory status
    pub source: CheckResult,
    /// Backup directory (or its nearest existing parent) is writable
    pub backup_dir: CheckResult,
    /// Remote answers an ls-remote within the probe timeout
    pub remote: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let settings = config.git_settings();
        let git = Self::check_git(runner.as_ref(), settings.command_timeout).await;

        // Without git the remote cannot be asked anything useful
        let remote = if git.passed {
            Self::check_remote(
                runner.as_ref(),
                &config.remote_url,
                &settings.branch,
                settings.probe_timeout,
            )
            .await
        } else {
            CheckResult::error_with_details("Remote not checked", "git is required to reach the remote")
        };

        Self {
            git,
            source: Self::check_source(Path::new(&config.source_path)),
            backup_dir: Self::check_backup_dir(Path::new(&config.backup_path)).await,
            remote,
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.source.passed && self.backup_dir.passed && self.remote.passed
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        [&self.git, &self.source, &self.backup_dir, &self.remote]
            .into_iter()
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.git, &self.source, &self.backup_dir, &self.remote]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    async fn check_git(runner: &dyn CommandRunner, timeout: Duration) -> CheckResult {
        let spec = CommandSpec::git(["--version"]).timeout(timeout);
        match runner.execute(&spec).await {
            Ok(output) => CheckResult::ok_with_details("Git installed", output.stdout),
            Err(CommandError::Spawn { .. }) => CheckResult::error_with_details(
                "Git not found in PATH",
                "Install git: https://git-scm.com/downloads",
            ),
            Err(e) => CheckResult::error_with_details("Git command failed", e.to_string()),
        }
    }

    fn check_source(path: &Path) -> CheckResult {
        if path.is_dir() {
            CheckResult::ok_with_details("Source directory exists", path.display().to_string())
        } else if path.exists() {
            CheckResult::error_with_details(
                "Source path is not a directory",
                path.display().to_string(),
            )
        } else {
            CheckResult::error_with_details(
                "Source directory does not exist",
                path.display().to_string(),
            )
        }
    }

    async fn check_backup_dir(path: &Path) -> CheckResult {
        if path.exists() && !path.is_dir() {
            return CheckResult::error_with_details(
                "Backup path is not a directory",
                path.display().to_string(),
            );
        }

        let Some(existing) = nearest_existing_dir(path) else {
            return CheckResult::error_with_details(
                "Backup directory has no existing parent",
                path.display().to_string(),
            );
        };

        let probe = existing.join(WRITE_PROBE_NAME);
        if let Err(e) = tokio::fs::write(&probe, b"").await {
            return CheckResult::error_with_details(
                "Backup directory is not writable",
                format!("{}: {}", existing.display(), e),
            );
        }
        let _ = tokio::fs::remove_file(&probe).await;

        if existing != path {
            CheckResult::ok_with_details(
                "Backup directory will be created",
                format!("{} is writable", existing.display()),
            )
        } else if !path.join(METADATA_DIR).exists() {
            CheckResult::warning_with_details(
                "Backup directory is not a repository yet",
                "It will be initialized on the next run",
            )
        } else {
            CheckResult::ok_with_details("Backup repository exists", path.display().to_string())
        }
    }

    async fn check_remote(
        runner: &dyn CommandRunner,
        url: &str,
        branch: &str,
        timeout: Duration,
    ) -> CheckResult {
        let spec = CommandSpec::git(["ls-remote", "--exit-code", "--heads", url, branch]).timeout(timeout);
        match runner.execute(&spec).await {
            Ok(_) => CheckResult::ok_with_details("Remote reachable", format!("{} has {}", url, branch)),
            Err(CommandError::Failed {
                exit_code: Some(2), ..
            }) => CheckResult::ok_with_details(
                "Remote reachable",
                format!("{} will be created on the first push", branch),
            ),
            Err(e) => CheckResult::error_with_details(
                "Remote unreachable",
                format!("{}\nCheck the URL, network access and credentials", e),
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("Git Installation", &self.git),
            ("Source Directory", &self.source),
            ("Backup Directory", &self.backup_dir),
            ("Remote", &self.remote),
        ]
    }
}

fn nearest_existing_dir(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.is_dir())
        .map(Path::to_path_buf)
}
