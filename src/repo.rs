//! Repository State Reconciler
//!
//! Brings the backup directory to a state where it is a git repository bound to the
//! configured remote, on the target branch, with the remote known to be reachable.
//!
//! - A directory without metadata is **fresh**: it is initialised, HEAD is pointed at
//!   the target branch and the remote is added. Nothing is fetched.
//! - A directory with metadata is **existing**: the remote URL is rebound (the remote may
//!   have moved), the remote is fetched and the target branch is selected, creating it
//!   from the fetched state or fast-forwarding it when the remote is strictly ahead.
//!
//! Branch selection never touches the working tree, which at this point already holds
//! the freshly mirrored content; only refs and the index move.

use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{CommandError, Error, Result};
use crate::git::{remote_urls_match, GitClient, METADATA_DIR, REMOTE_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoState {
    /// No repository metadata was present; one was initialised this run
    Fresh,
    /// Repository metadata already existed
    Existing,
}

impl RepoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoState::Fresh => "fresh",
            RepoState::Existing => "existing",
        }
    }
}

/// Whether `dir` already holds repository metadata
pub async fn detect_state(dir: &Path) -> Result<RepoState> {
    let metadata = dir.join(METADATA_DIR);
    match tokio::fs::try_exists(&metadata).await {
        Ok(true) => Ok(RepoState::Existing),
        Ok(false) => Ok(RepoState::Fresh),
        Err(e) => Err(Error::io(metadata, e)),
    }
}

impl GitClient {
    /// Make `dir` a repository bound to `remote_url` and verify the remote answers.
    pub async fn reconcile(&self, dir: &Path, remote_url: &str) -> Result<RepoState> {
        let state = detect_state(dir).await?;
        info!("Repository state for {}: {}", dir.display(), state.as_str());

        match state {
            RepoState::Fresh => self.initialize(dir, remote_url).await?,
            RepoState::Existing => self.update(dir, remote_url).await?,
        }

        let present = self.probe_remote(dir, remote_url).await?;
        if present {
            debug!("Branch {} exists on {}", self.branch(), remote_url);
        } else {
            info!("Branch {} not yet on {}, first push will create it", self.branch(), remote_url);
        }

        Ok(state)
    }

    async fn initialize(&self, dir: &Path, remote_url: &str) -> Result<()> {
        info!("Initializing repository in {}", dir.display());

        self.git(dir, &["init", "--quiet"]).await?;

        let head = format!("refs/heads/{}", self.branch());
        self.git(dir, &["symbolic-ref", "HEAD", &head]).await?;

        self.git_with_retry(dir, "git remote add", &["remote", "add", REMOTE_NAME, remote_url])
            .await?;

        info!("Linked {} to {}", dir.display(), remote_url);
        Ok(())
    }

    async fn update(&self, dir: &Path, remote_url: &str) -> Result<()> {
        self.rebind_remote(dir, remote_url).await?;

        self.git_with_retry(dir, "git fetch", &["fetch", "--quiet", REMOTE_NAME])
            .await
            .map_err(|source| Error::RemoteUnreachable {
                url: remote_url.to_string(),
                source,
            })?;

        self.select_branch(dir).await
    }

    async fn rebind_remote(&self, dir: &Path, remote_url: &str) -> Result<()> {
        match self.remote_url(dir).await? {
            Some(current) => {
                if !remote_urls_match(&current, remote_url) {
                    info!("Remote moved from {} to {}", current, remote_url);
                }
                self.git_with_retry(
                    dir,
                    "git remote set-url",
                    &["remote", "set-url", REMOTE_NAME, remote_url],
                )
                .await?;
            }
            None => {
                warn!("Repository in {} had no {} remote, adding it", dir.display(), REMOTE_NAME);
                self.git_with_retry(dir, "git remote add", &["remote", "add", REMOTE_NAME, remote_url])
                    .await?;
            }
        }
        Ok(())
    }

    /// Point HEAD at the target branch and bring its ref up to the fetched state
    async fn select_branch(&self, dir: &Path) -> Result<()> {
        let branch = self.branch().to_string();
        let local_ref = format!("refs/heads/{}", branch);
        let remote_ref = format!("refs/remotes/{}/{}", REMOTE_NAME, branch);

        let local = self.resolve_ref(dir, &local_ref).await?;
        let remote = self.resolve_ref(dir, &remote_ref).await?;

        let mut refresh_index = false;

        let head = match self.git(dir, &["symbolic-ref", "--quiet", "HEAD"]).await {
            Ok(output) => Some(output.stdout),
            Err(CommandError::Failed { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        if head.as_deref() != Some(local_ref.as_str()) {
            info!("Switching {} to branch {}", dir.display(), branch);
            self.git(dir, &["symbolic-ref", "HEAD", &local_ref]).await?;
            refresh_index = local.is_some();
        }

        match (local.as_deref(), remote.as_deref()) {
            (None, Some(remote_id)) => {
                info!("Creating branch {} from {}/{}", branch, REMOTE_NAME, branch);
                self.git(dir, &["update-ref", &local_ref, remote_id]).await?;
                refresh_index = true;
            }
            (Some(local_id), Some(remote_id)) if local_id != remote_id => {
                if self.is_ancestor(dir, local_id, remote_id).await? {
                    info!("Fast-forwarding {} to {}/{}", branch, REMOTE_NAME, branch);
                    self.git(dir, &["update-ref", &local_ref, remote_id, local_id])
                        .await?;
                    refresh_index = true;
                } else {
                    warn!(
                        "Branch {} is ahead of or diverged from {}/{}, leaving it as is",
                        branch, REMOTE_NAME, branch
                    );
                }
            }
            (Some(_), _) => debug!("Branch {} is up to date", branch),
            (None, None) => debug!("Branch {} has no commits yet", branch),
        }

        if refresh_index {
            // Mixed reset to HEAD: index follows the ref, working tree is untouched
            self.git(dir, &["reset", "--quiet"]).await?;
        }

        Ok(())
    }

    async fn is_ancestor(&self, dir: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
        match self
            .git(dir, &["merge-base", "--is-ancestor", ancestor, descendant])
            .await
        {
            Ok(_) => Ok(true),
            Err(CommandError::Failed {
                exit_code: Some(1), ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Ask the remote whether the target branch exists.
    ///
    /// Returns whether the branch is present. Any failure other than "no such ref" means
    /// the remote could not be reached.
    pub async fn probe_remote(&self, dir: &Path, remote_url: &str) -> Result<bool> {
        let branch = self.branch().to_string();
        match self
            .git_probe(dir, &["ls-remote", "--exit-code", "--heads", REMOTE_NAME, &branch])
            .await
        {
            Ok(_) => Ok(true),
            // ls-remote --exit-code reports "reachable, but no matching ref" as 2
            Err(CommandError::Failed {
                exit_code: Some(2), ..
            }) => Ok(false),
            Err(source) => Err(Error::RemoteUnreachable {
                url: remote_url.to_string(),
                source,
            }),
        }
    }
}
