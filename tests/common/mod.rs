//! Common test utilities: a source tree, a backup directory and a local bare remote
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use gitmirror::Config;

pub const AUTHOR_NAME: &str = "Backup Bot";
pub const AUTHOR_EMAIL: &str = "bot@example.com";

/// Whether a usable git is on PATH; scenarios are skipped without one
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking on failure, and return trimmed stdout
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim_end().to_string()
}

/// Test layout helper
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub backup: PathBuf,
    pub remote: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let source = temp_dir.path().join("source");
        let backup = temp_dir.path().join("backup");
        let remote = temp_dir.path().join("remote.git");

        std::fs::create_dir_all(source.join("docs")).expect("Failed to create source");
        std::fs::write(source.join("notes.md"), "# Notes\n").unwrap();
        std::fs::write(source.join("docs").join("plan.txt"), "step one\n").unwrap();
        std::fs::write(source.join(".DS_Store"), "junk").unwrap();

        std::fs::create_dir_all(&remote).unwrap();
        git(&remote, &["init", "--bare", "--quiet"]);

        Self {
            temp_dir,
            source,
            backup,
            remote,
        }
    }

    pub fn remote_url(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    /// Configuration for this layout with a fixed author and fast retries
    pub fn config(&self) -> Config {
        self.config_for(&self.remote_url())
    }

    pub fn config_for(&self, remote_url: &str) -> Config {
        let mut config = Config::new(
            self.source.to_string_lossy(),
            self.backup.to_string_lossy(),
            remote_url,
        );
        config.retry_attempts = 2;
        config.retry_backoff_ms = 10;
        config.commit_author_name = Some(AUTHOR_NAME.to_string());
        config.commit_author_email = Some(AUTHOR_EMAIL.to_string());
        config
    }

    pub fn write_config(&self, config: &Config) -> PathBuf {
        let path = self.temp_dir.path().join("config.json");
        config.save(&path).expect("Failed to write test config");
        path
    }

    /// Commit subjects on the remote's main branch, newest first
    pub fn remote_subjects(&self) -> Vec<String> {
        let exists = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", "refs/heads/main"])
            .current_dir(&self.remote)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !exists {
            return Vec::new();
        }
        git(&self.remote, &["log", "--format=%s", "main"])
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Commit count on the backup's current HEAD (0 when unborn)
    pub fn local_commit_count(&self) -> usize {
        let output = Command::new("git")
            .args(["rev-list", "--count", "HEAD"])
            .current_dir(&self.backup)
            .output()
            .expect("Failed to run git");
        if !output.status.success() {
            return 0;
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(0)
    }

    /// Make the remote refuse every push
    #[cfg(unix)]
    pub fn reject_pushes(&self) {
        self.install_pre_receive_hook("echo 'pushes are disabled' >&2\nexit 1\n");
    }

    /// Makes every push hang in the remote's hook. Returns the file the hook
    /// creates once a push has started.
    #[cfg(unix)]
    pub fn slow_pushes(&self) -> PathBuf {
        let started = self.temp_dir.path().join("push-started");
        self.install_pre_receive_hook(&format!(
            "touch '{}'\nsleep 5\n",
            started.display()
        ));
        started
    }

    #[cfg(unix)]
    fn install_pre_receive_hook(&self, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let hook = self.remote.join("hooks").join("pre-receive");
        std::fs::create_dir_all(hook.parent().unwrap()).unwrap();
        std::fs::write(&hook, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
