//! Error types shared by every stage of a backup run.

use std::path::PathBuf;
use std::time::Duration;

/// Failure of a single external command
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    /// The command did not finish within its timeout and was killed
    #[error("`{command}` timed out after {}s", .timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },

    /// The command ran but exited unsuccessfully
    #[error("`{command}` failed (exit code {}): {stderr}", .exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    Failed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// The command could not be started at all
    #[error("failed to start `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout { .. })
    }
}

/// Top-level error for a backup run
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("remote {url} is unreachable, check credentials and the remote URL")]
    RemoteUnreachable {
        url: String,
        #[source]
        source: CommandError,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_timeout_message_names_command_and_limit() {
        let err = CommandError::Timeout {
            command: "git fetch origin".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "`git fetch origin` timed out after 30s");
    }

    #[test]
    fn test_failed_message_includes_exit_code() {
        let err = CommandError::Failed {
            command: "git push".to_string(),
            stderr: "rejected".to_string(),
            exit_code: Some(1),
        };
        assert!(!err.is_timeout());
        assert_matches!(err, CommandError::Failed { exit_code: Some(1), .. });
        assert_eq!(err.to_string(), "`git push` failed (exit code 1): rejected");
    }

    #[test]
    fn test_io_error_carries_path() {
        let err = Error::io(
            "/backup/file.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "I/O error on /backup/file.txt");
        assert_eq!(
            std::error::Error::source(&err).map(ToString::to_string),
            Some("denied".to_string())
        );
    }

    #[test]
    fn test_remote_unreachable_mentions_credentials() {
        let err = Error::RemoteUnreachable {
            url: "git@example.com:me/backup.git".to_string(),
            source: CommandError::Timeout {
                command: "git ls-remote".to_string(),
                timeout: Duration::from_secs(10),
            },
        };
        let message = err.to_string();
        assert!(message.contains("git@example.com:me/backup.git"));
        assert!(message.contains("credentials"));
    }
}
