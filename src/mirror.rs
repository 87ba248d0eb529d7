//! Directory Mirror - one-way clear-then-copy of the source tree into the backup
//!
//! Every run empties the backup directory (keeping a small set of top-level names such
//! as the repository metadata) and copies the source tree back in, skipping excluded
//! names at any depth. File copies run in parallel under a fixed ceiling.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::git::METADATA_DIR;

/// Names never copied from the source, at any depth
pub const DEFAULT_EXCLUDE_NAMES: &[&str] = &[
    ".git",
    ".Trash",
    ".Trashes",
    "$RECYCLE.BIN",
    ".trash",
    ".DS_Store",
];

/// Top-level backup entries that survive the clear step
pub const DEFAULT_PRESERVE_NAMES: &[&str] = &[".git", "README.md", ".gitignore"];

/// Upper bound on simultaneously open copy operations
pub const DEFAULT_MAX_CONCURRENT_COPIES: usize = 16;

#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub exclude: HashSet<String>,
    pub preserve: HashSet<String>,
    pub max_concurrent_copies: usize,
    /// Carry source modification times over to the copies
    pub preserve_mtime: bool,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            exclude: DEFAULT_EXCLUDE_NAMES.iter().map(|s| s.to_string()).collect(),
            preserve: DEFAULT_PRESERVE_NAMES.iter().map(|s| s.to_string()).collect(),
            max_concurrent_copies: DEFAULT_MAX_CONCURRENT_COPIES,
            preserve_mtime: true,
        }
    }
}

/// Counts produced by a single mirror pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    /// Top-level backup entries deleted during the clear step
    pub removed: usize,
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

struct CopyPlan {
    directories: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

/// Mirror `source` into `target`.
///
/// The source is validated before the target is touched, so a missing source never
/// empties an existing backup. Partial copies are not rolled back.
pub async fn mirror(source: &Path, target: &Path, options: &MirrorOptions) -> Result<MirrorStats> {
    let source_meta = tokio::fs::metadata(source)
        .await
        .map_err(|e| Error::io(source, e))?;
    if !source_meta.is_dir() {
        return Err(Error::io(
            source,
            io::Error::new(io::ErrorKind::InvalidInput, "source is not a directory"),
        ));
    }

    check_no_overlap(source, target).await?;

    tokio::fs::create_dir_all(target)
        .await
        .map_err(|e| Error::io(target, e))?;

    info!("Mirroring {} -> {}", source.display(), target.display());

    let mut stats = MirrorStats {
        removed: clear_target(target, &options.preserve).await?,
        ..MirrorStats::default()
    };

    let plan = {
        let root = source.to_path_buf();
        let exclude = options.exclude.clone();
        tokio::task::spawn_blocking(move || plan_copy(&root, &exclude))
            .await
            .map_err(|e| Error::io(source, io::Error::other(e)))??
    };

    for dir in &plan.directories {
        let dest = target.join(dir);
        tokio::fs::create_dir_all(&dest)
            .await
            .map_err(|e| Error::io(&dest, e))?;
    }
    stats.directories = plan.directories.len();

    let (files, bytes) = copy_files(source, target, plan.files, options).await?;
    stats.files = files;
    stats.bytes = bytes;

    info!(
        "Mirror complete: {} removed, {} directories, {} files ({} bytes)",
        stats.removed, stats.directories, stats.files, stats.bytes
    );

    Ok(stats)
}

/// Refuse to mirror when one tree contains the other
async fn check_no_overlap(source: &Path, target: &Path) -> Result<()> {
    let source = resolve(source).await?;
    let target = resolve(target).await?;

    if source.starts_with(&target) || target.starts_with(&source) {
        return Err(Error::Config(format!(
            "backup path {} overlaps source path {}",
            target.display(),
            source.display()
        )));
    }

    Ok(())
}

/// Canonicalize a path whose trailing components may not exist yet
async fn resolve(path: &Path) -> Result<PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();

    loop {
        match tokio::fs::canonicalize(existing).await {
            Ok(real) => {
                return Ok(missing
                    .iter()
                    .rev()
                    .fold(real, |acc: PathBuf, part| acc.join(part)));
            }
            Err(e) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = if parent.as_os_str().is_empty() {
                        Path::new(".")
                    } else {
                        parent
                    };
                }
                _ => return Err(Error::io(path, e)),
            },
        }
    }
}

/// Delete every top-level entry of `target` not named in `preserve`.
///
/// Repository metadata is always kept, whatever `preserve` says.
async fn clear_target(target: &Path, preserve: &HashSet<String>) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(target)
        .await
        .map_err(|e| Error::io(target, e))?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io(target, e))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if name == METADATA_DIR || preserve.contains(&name) {
            debug!("Preserving {}", path.display());
            continue;
        }

        // file_type() does not follow symlinks, so links are removed as links
        let file_type = entry.file_type().await.map_err(|e| Error::io(&path, e))?;
        if file_type.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        }
        .map_err(|e| Error::io(&path, e))?;

        removed += 1;
    }

    debug!("Cleared {} entries from {}", removed, target.display());
    Ok(removed)
}

fn plan_copy(source: &Path, exclude: &HashSet<String>) -> Result<CopyPlan> {
    let mut plan = CopyPlan {
        directories: Vec::new(),
        files: Vec::new(),
    };

    let walker = WalkDir::new(source)
        .follow_links(true)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0 || (name != METADATA_DIR && !exclude.contains(&*name))
        });

    for entry in walker {
        let entry = entry.map_err(|err| {
            let message = err.to_string();
            let path = err
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| source.to_path_buf());
            let source = err
                .into_io_error()
                .unwrap_or_else(|| io::Error::other(message));
            Error::io(path, source)
        })?;

        let relative = match entry.path().strip_prefix(source) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => continue,
        };

        // With follow_links the file type is that of the link target
        let file_type = entry.file_type();
        if file_type.is_dir() {
            plan.directories.push(relative);
        } else if file_type.is_file() {
            plan.files.push(relative);
        } else {
            debug!("Skipping special file {}", entry.path().display());
        }
    }

    Ok(plan)
}

async fn copy_files(
    source: &Path,
    target: &Path,
    files: Vec<PathBuf>,
    options: &MirrorOptions,
) -> Result<(usize, u64)> {
    let semaphore = Arc::new(Semaphore::new(options.max_concurrent_copies.max(1)));
    let mut copies = FuturesUnordered::new();

    for relative in files {
        let semaphore = semaphore.clone();
        let from = source.join(&relative);
        let to = target.join(&relative);
        let preserve_mtime = options.preserve_mtime;

        copies.push(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| Error::io(&to, io::Error::other(e)))?;
            copy_one(&from, &to, preserve_mtime).await
        });
    }

    let mut count = 0;
    let mut bytes = 0;
    while let Some(result) = copies.next().await {
        bytes += result?;
        count += 1;
    }

    Ok((count, bytes))
}

async fn copy_one(from: &Path, to: &Path, preserve_mtime: bool) -> Result<u64> {
    // tokio::fs::copy opens the source path, so symlinks are dereferenced
    let bytes = tokio::fs::copy(from, to)
        .await
        .map_err(|e| Error::io(from, e))?;

    if preserve_mtime {
        let modified = tokio::fs::metadata(from)
            .await
            .and_then(|meta| meta.modified())
            .map_err(|e| Error::io(from, e))?;
        filetime::set_file_mtime(to, FileTime::from_system_time(modified))
            .map_err(|e| Error::io(to, e))?;
    }

    Ok(bytes)
}
