use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::BackupTarget;
use crate::git::{CommitAuthor, GitSettings, DEFAULT_BRANCH, METADATA_DIR};
use crate::ignore::DEFAULT_IGNORE_PATTERNS;
use crate::mirror::{MirrorOptions, DEFAULT_EXCLUDE_NAMES, DEFAULT_MAX_CONCURRENT_COPIES, DEFAULT_PRESERVE_NAMES};
use crate::retry::RetryPolicy;

/// Main configuration structure, read from a JSON file
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Tree to back up
    pub source_path: String,

    /// Mirror directory that doubles as the git working tree
    pub backup_path: String,

    /// Remote repository URL
    #[serde(rename = "remoteURL")]
    pub remote_url: String,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Branch published to the remote
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Timeout for ordinary git operations in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for the remote reachability probe in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_max_concurrent_copies")]
    pub max_concurrent_copies: usize,

    /// Entry names never copied into the backup
    #[serde(default = "default_exclude_names")]
    pub exclude_names: Vec<String>,

    /// Top-level backup entries kept when the mirror clears the backup
    #[serde(default = "default_preserve_names")]
    pub preserve_names: Vec<String>,

    /// Patterns the backup's .gitignore must contain
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_author_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_author_email: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

// Default value functions
fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}
fn default_command_timeout() -> u64 {
    30
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    1000
}
fn default_max_concurrent_copies() -> usize {
    DEFAULT_MAX_CONCURRENT_COPIES
}
fn default_exclude_names() -> Vec<String> {
    DEFAULT_EXCLUDE_NAMES.iter().map(|s| s.to_string()).collect()
}
fn default_preserve_names() -> Vec<String> {
    DEFAULT_PRESERVE_NAMES.iter().map(|s| s.to_string()).collect()
}
fn default_ignore_patterns() -> Vec<String> {
    DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect()
}

impl Config {
    /// Configuration with the three required values and defaults for the rest
    pub fn new(
        source_path: impl Into<String>,
        backup_path: impl Into<String>,
        remote_url: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            backup_path: backup_path.into(),
            remote_url: remote_url.into(),
            log_level: LogLevel::default(),
            branch: default_branch(),
            command_timeout_secs: default_command_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            max_concurrent_copies: default_max_concurrent_copies(),
            exclude_names: default_exclude_names(),
            preserve_names: default_preserve_names(),
            ignore_patterns: default_ignore_patterns(),
            commit_author_name: None,
            commit_author_email: None,
        }
    }

    /// Load, validate and resolve configuration from a specific file.
    ///
    /// Relative paths resolve against the directory holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config = Self::from_json(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.expand_paths(&base_dir)?;

        Ok(config)
    }

    /// Parse and validate JSON configuration without touching paths
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let mut content =
            serde_json::to_string_pretty(self).context("Failed to serialize configuration")?;
        content.push('\n');

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("gitmirror").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_path.trim().is_empty() {
            bail!("sourcePath must not be empty");
        }
        if self.backup_path.trim().is_empty() {
            bail!("backupPath must not be empty");
        }
        if self.remote_url.trim().is_empty() {
            bail!("remoteURL must not be empty");
        }
        if self.branch.trim().is_empty() {
            bail!("branch must not be empty");
        }
        if self.command_timeout_secs == 0 || self.probe_timeout_secs == 0 {
            bail!("timeouts must be at least one second");
        }
        if self.max_concurrent_copies == 0 {
            bail!("maxConcurrentCopies must be at least 1");
        }
        if self.commit_author_name.is_some() != self.commit_author_email.is_some() {
            bail!("commitAuthorName and commitAuthorEmail must be set together");
        }
        Ok(())
    }

    /// Expand `~` and environment variables, then anchor relative paths at `base_dir`
    pub fn expand_paths(&mut self, base_dir: &Path) -> Result<()> {
        self.source_path = resolve_path(&self.source_path, base_dir)
            .context("Failed to expand sourcePath")?;
        self.backup_path = resolve_path(&self.backup_path, base_dir)
            .context("Failed to expand backupPath")?;
        Ok(())
    }

    pub fn target(&self) -> BackupTarget {
        BackupTarget {
            source_path: PathBuf::from(&self.source_path),
            backup_path: PathBuf::from(&self.backup_path),
            remote_url: self.remote_url.clone(),
        }
    }

    pub fn git_settings(&self) -> GitSettings {
        let author = match (&self.commit_author_name, &self.commit_author_email) {
            (Some(name), Some(email)) => Some(CommitAuthor {
                name: name.clone(),
                email: email.clone(),
            }),
            _ => None,
        };

        GitSettings {
            branch: self.branch.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            retry: RetryPolicy::new(
                self.retry_attempts,
                Duration::from_millis(self.retry_backoff_ms),
            ),
            author,
        }
    }

    /// Mirror rules; repository metadata is always excluded and preserved
    pub fn mirror_options(&self) -> MirrorOptions {
        let mut exclude: HashSet<String> = self.exclude_names.iter().cloned().collect();
        let mut preserve: HashSet<String> = self.preserve_names.iter().cloned().collect();
        exclude.insert(METADATA_DIR.to_string());
        preserve.insert(METADATA_DIR.to_string());

        MirrorOptions {
            exclude,
            preserve,
            max_concurrent_copies: self.max_concurrent_copies,
            preserve_mtime: true,
        }
    }

    /// Trash patterns first, then the configured ones not already listed
    pub fn required_ignore_patterns(&self) -> Vec<String> {
        let mut patterns = default_ignore_patterns();
        for pattern in &self.ignore_patterns {
            if !patterns.contains(pattern) {
                patterns.push(pattern.clone());
            }
        }
        patterns
    }
}

fn resolve_path(raw: &str, base_dir: &Path) -> Result<String> {
    let expanded = shellexpand::full(raw)?;
    let path = Path::new(expanded.as_ref());
    let anchored = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };

    Ok(path_clean::clean(anchored).to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"{
        "sourcePath": "/home/me/notes",
        "backupPath": "/var/backups/notes",
        "remoteURL": "git@example.com:me/notes-backup.git"
    }"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_json(MINIMAL).expect("Failed to parse config");

        assert_eq!(config.source_path, "/home/me/notes");
        assert_eq!(config.remote_url, "git@example.com:me/notes-backup.git");
        assert_eq!(config.log_level, LogLevel::Error);
        assert_eq!(config.branch, "main");
        assert_eq!(config.command_timeout_secs, 30);
        assert_eq!(config.probe_timeout_secs, 10);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_backoff_ms, 1000);
        assert!(config.exclude_names.contains(&".git".to_string()));
        assert!(config.preserve_names.contains(&".git".to_string()));
        assert!(config.ignore_patterns.contains(&".Trash/".to_string()));
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let err = Config::from_json(r#"{ "sourcePath": "/a", "backupPath": "/b" }"#).unwrap_err();
        assert!(err.to_string().contains("remoteURL"));
    }

    #[test]
    fn test_empty_required_field_is_rejected() {
        let err = Config::from_json(r#"{ "sourcePath": "/a", "backupPath": "/b", "remoteURL": " " }"#)
            .unwrap_err();
        assert!(err.to_string().contains("remoteURL"));
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let json = r#"{ "sourcePath": "/a", "backupPath": "/b", "remoteURL": "u", "logLevel": "verbose" }"#;
        assert!(Config::from_json(json).is_err());
    }

    #[test]
    fn test_full_config_parsing() {
        let json = r#"{
            "sourcePath": "/a",
            "backupPath": "/b",
            "remoteURL": "https://example.com/b.git",
            "logLevel": "debug",
            "branch": "backups",
            "commandTimeoutSecs": 60,
            "probeTimeoutSecs": 5,
            "retryAttempts": 5,
            "retryBackoffMs": 250,
            "maxConcurrentCopies": 4,
            "excludeNames": ["node_modules"],
            "preserveNames": [".git"],
            "ignorePatterns": ["*.log"],
            "commitAuthorName": "Backup Bot",
            "commitAuthorEmail": "bot@example.com"
        }"#;

        let config = Config::from_json(json).unwrap();
        let settings = config.git_settings();
        let options = config.mirror_options();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(settings.branch, "backups");
        assert_eq!(settings.command_timeout, Duration::from_secs(60));
        assert_eq!(settings.probe_timeout, Duration::from_secs(5));
        assert_eq!(settings.retry, RetryPolicy::new(5, Duration::from_millis(250)));
        assert_eq!(settings.author.unwrap().email, "bot@example.com");
        assert_eq!(options.max_concurrent_copies, 4);
        assert!(options.exclude.contains("node_modules"));
        assert_eq!(config.ignore_patterns, vec!["*.log".to_string()]);
    }

    #[test]
    fn test_custom_rules_extend_mandatory_ones() {
        let json = r#"{
            "sourcePath": "/a",
            "backupPath": "/b",
            "remoteURL": "u",
            "excludeNames": ["node_modules"],
            "preserveNames": [],
            "ignorePatterns": ["*.log", ".DS_Store"]
        }"#;

        let config = Config::from_json(json).unwrap();
        let options = config.mirror_options();
        let patterns = config.required_ignore_patterns();

        assert!(options.exclude.contains(".git"));
        assert!(options.exclude.contains("node_modules"));
        assert!(!options.exclude.contains(".Trash"));
        assert_eq!(options.preserve, HashSet::from([".git".to_string()]));
        assert_eq!(
            patterns,
            vec![".Trash/", ".Trashes/", "$RECYCLE.BIN/", ".trash/", ".DS_Store", "*.log"]
        );
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::from_json(include_str!("../config.example.json"))
            .expect("config.example.json should be valid");

        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.exclude_names, default_exclude_names());
        assert!(config.git_settings().author.is_some());
    }

    #[test]
    fn test_author_requires_both_fields() {
        let json = r#"{ "sourcePath": "/a", "backupPath": "/b", "remoteURL": "u", "commitAuthorName": "Bot" }"#;
        assert!(Config::from_json(json).is_err());
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{ "sourcePath": "./notes", "backupPath": "../backup/./notes", "remoteURL": "u" }"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();

        assert_eq!(
            PathBuf::from(&config.source_path),
            temp_dir.path().join("notes")
        );
        assert_eq!(
            PathBuf::from(&config.backup_path),
            temp_dir.path().parent().unwrap().join("backup").join("notes")
        );
    }

    #[test]
    #[serial]
    fn test_expand_paths_with_env() {
        env::set_var("TEST_GITMIRROR_HOME", "/test/home");

        let mut config = Config::new("${TEST_GITMIRROR_HOME}/notes", "/backup", "u");
        config
            .expand_paths(Path::new("/unused"))
            .expect("Failed to expand paths");

        assert_eq!(config.source_path, "/test/home/notes");
        assert_eq!(config.backup_path, "/backup");

        env::remove_var("TEST_GITMIRROR_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gitmirror").join("config.json");

        let mut config = Config::new("/src", "/dst", "https://example.com/r.git");
        config.log_level = LogLevel::Info;
        config.save(&config_path).expect("Failed to save config");

        let loaded = Config::load(&config_path).expect("Failed to load config");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_default_path() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("gitmirror"));
        assert!(default_path.to_string_lossy().ends_with("config.json"));
    }

    #[test]
    fn test_target_from_config() {
        let config = Config::new("/src", "/dst", "https://example.com/r.git");
        let target = config.target();

        assert_eq!(target.source_path, PathBuf::from("/src"));
        assert_eq!(target.backup_path, PathBuf::from("/dst"));
        assert_eq!(target.remote_url, "https://example.com/r.git");
    }
}
