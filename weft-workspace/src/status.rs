//! Observed git workspace state: rebase/merge markers, index lock, conflicts.

use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::git::{GitError, GitRunner};

/// Snapshot of a working copy's git state. Observed, never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GitWorkspaceState {
    pub mid_rebase: bool,
    pub mid_merge: bool,
    pub index_locked: bool,
    pub has_conflicts: bool,
    pub has_uncommitted: bool,
    pub conflicting_files: Vec<String>,
    pub raw_status: String,
}

/// Porcelain XY codes that mark an unmerged path.
fn is_conflict_code(code: &str) -> bool {
    matches!(code, "UU" | "AA" | "DD" | "AU" | "UA" | "DU" | "UD")
}

/// Detects the current workspace state from on-disk markers and
/// `git status --porcelain`.
pub async fn detect(git: &GitRunner, dir: &Path) -> Result<GitWorkspaceState, GitError> {
    let git_dir = dir.join(".git");
    let mid_rebase =
        git_dir.join("rebase-merge").is_dir() || git_dir.join("rebase-apply").is_dir();
    let mid_merge = git_dir.join("MERGE_HEAD").is_file();
    let index_locked = git_dir.join("index.lock").is_file();

    let raw_status = git.run_quiet(dir, &["status", "--porcelain"]).await?;

    let mut conflicting_files = Vec::new();
    let mut has_uncommitted = false;
    for line in raw_status.lines() {
        if line.len() < 3 {
            continue;
        }
        has_uncommitted = true;
        let code = &line[..2];
        if is_conflict_code(code) {
            conflicting_files.push(line[3..].to_string());
        }
    }

    Ok(GitWorkspaceState {
        mid_rebase,
        mid_merge,
        index_locked,
        has_conflicts: !conflicting_files.is_empty(),
        has_uncommitted,
        conflicting_files,
        raw_status,
    })
}

/// Removes `.git/index.lock` when it is older than `max_age`.
///
/// A lock that old belongs to a git process that died; a live operation
/// refreshes it well inside a minute. Returns whether a lock was cleared.
pub fn clear_stale_index_lock(dir: &Path, max_age: Duration) -> std::io::Result<bool> {
    let lock = dir.join(".git").join("index.lock");
    let meta = match std::fs::metadata(&lock) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let age = meta
        .modified()
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .unwrap_or_default();
    if age < max_age {
        return Ok(false);
    }
    tracing::warn!(lock = %lock.display(), ?age, "clearing stale index lock");
    std::fs::remove_file(&lock)?;
    Ok(true)
}
