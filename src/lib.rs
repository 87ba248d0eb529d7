//! gitmirror - Mirror a directory into a git working tree and publish it
//!
//! Each run copies a source tree into a backup directory, keeps the backup's
//! ignore manifest in shape, reconciles the repository with its remote and
//! commits and pushes only when something actually changed.
//!
//! ## Modules
//!
//! - [`mirror`]: Directory mirroring with exclude and preserve rules
//! - [`ignore`]: `.gitignore` pattern reconciliation
//! - [`repo`]: Repository initialization, remote binding and branch selection
//! - [`publish`]: Change-gated commit and push
//! - [`engine`]: One complete backup run
//! - [`runner`] and [`retry`]: External command execution and retry policy
//! - [`config`]: JSON configuration

pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod health;
pub mod ignore;
pub mod mirror;
pub mod publish;
pub mod repo;
pub mod retry;
pub mod runner;
pub mod shutdown;

pub use config::{Config, LogLevel};
pub use engine::{BackupEngine, BackupTarget, RunReport};
pub use error::{CommandError, Error, Result};
pub use git::{GitClient, GitSettings};
pub use health::HealthCheck;
pub use mirror::{MirrorOptions, MirrorStats};
pub use publish::{ChangeStatus, PublishOutcome};
pub use repo::RepoState;
pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
