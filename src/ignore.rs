//! Keeps the backup's `.gitignore` carrying the required exclusion patterns.

use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const IGNORE_FILE_NAME: &str = ".gitignore";

/// Patterns every backup ignore manifest must contain
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[".Trash/", ".Trashes/", "$RECYCLE.BIN/", ".trash/", ".DS_Store"];

/// Merge `required` into existing manifest content.
///
/// Existing lines keep their order, missing required patterns are appended, blank and
/// duplicate lines are dropped, and non-empty output ends with exactly one newline.
pub fn merge_patterns<S: AsRef<str>>(existing: &str, required: &[S]) -> String {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();

    let candidates = existing
        .lines()
        .chain(required.iter().flat_map(|pattern| pattern.as_ref().lines()));

    for line in candidates {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if seen.insert(line) {
            lines.push(line);
        }
    }

    if lines.is_empty() {
        return String::new();
    }

    let mut merged = lines.join("\n");
    merged.push('\n');
    merged
}

/// Ensure `dir/.gitignore` contains every pattern in `required`.
///
/// Returns whether the file was written.
pub async fn ensure_ignore_patterns<S: AsRef<str>>(dir: &Path, required: &[S]) -> Result<bool> {
    let path = dir.join(IGNORE_FILE_NAME);

    let existing = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(Error::io(&path, e)),
    };

    let merged = merge_patterns(&existing, required);
    if merged == existing {
        debug!("{} already up to date", path.display());
        return Ok(false);
    }

    tokio::fs::write(&path, merged)
        .await
        .map_err(|e| Error::io(&path, e))?;

    info!("Updated {}", path.display());
    Ok(true)
}
