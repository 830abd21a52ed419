//! Shared bare mirror: one per repo URL, refreshed under an advisory file lock.
//!
//! All agents in the process clone from `<project_work_dir>/<mirror_dir>/<repo>.git`.
//! Concurrent `remote update --prune` runs serialize through an exclusive
//! `flock` on `<mirror>/.update.lock`; the guard releases the lock on drop,
//! so it is released on every exit path including panics.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::git::GitRunner;
use crate::WorkspaceError;

/// Name of the lock file inside the bare mirror directory.
const UPDATE_LOCK: &str = ".update.lock";

/// Derives the mirror directory name from a repo URL: last path segment,
/// `.git` suffix normalized to exactly one.
pub fn repo_name(repo_url: &str) -> String {
    let trimmed = repo_url.trim_end_matches('/');
    let last = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    let base = last.strip_suffix(".git").unwrap_or(last);
    format!("{base}.git")
}

/// Exclusive lock on a mirror's `.update.lock`. Unlocks on drop.
struct UpdateLock {
    file: File,
}

impl UpdateLock {
    /// Blocking acquire; call from `spawn_blocking` in async code.
    fn acquire(mirror: &Path) -> Result<Self, WorkspaceError> {
        let path = mirror.join(UPDATE_LOCK);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| WorkspaceError::MirrorLock(format!("{}: {e}", path.display())))?;
        // Advisory flock; blocks until the current updater finishes.
        file.lock_exclusive()
            .map_err(|e| WorkspaceError::MirrorLock(format!("{}: {e}", path.display())))?;
        Ok(Self { file })
    }

    async fn acquire_async(mirror: &Path) -> Result<Self, WorkspaceError> {
        let mirror = mirror.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire(&mirror))
            .await
            .map_err(|e| WorkspaceError::MirrorLock(e.to_string()))?
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Creates and refreshes the shared bare mirror.
#[derive(Clone, Debug)]
pub struct MirrorManager {
    git: GitRunner,
}

impl MirrorManager {
    pub fn new(git: GitRunner) -> Self {
        Self { git }
    }

    /// Path of the mirror for `repo_url` under the project work dir.
    pub fn mirror_path(project_work_dir: &Path, mirror_dir: &str, repo_url: &str) -> PathBuf {
        project_work_dir.join(mirror_dir).join(repo_name(repo_url))
    }

    /// Ensures the bare mirror exists and is current.
    ///
    /// A missing mirror is cloned with `--mirror`; an existing one is
    /// refreshed with `remote update --prune` under the update lock. Both
    /// failure modes are fatal to workspace setup.
    pub async fn ensure_fresh(
        &self,
        project_work_dir: &Path,
        mirror_dir: &str,
        repo_url: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let mirror = Self::mirror_path(project_work_dir, mirror_dir, repo_url);
        if !mirror.join("HEAD").is_file() {
            self.create(&mirror, repo_url).await?;
            return Ok(mirror);
        }
        self.update(&mirror).await?;
        Ok(mirror)
    }

    async fn create(&self, mirror: &Path, repo_url: &str) -> Result<(), WorkspaceError> {
        let parent = mirror
            .parent()
            .ok_or_else(|| WorkspaceError::MirrorCreate("mirror path has no parent".into()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| WorkspaceError::MirrorCreate(e.to_string()))?;
        tracing::info!(mirror = %mirror.display(), repo_url, "creating bare mirror");
        let mirror_str = mirror.to_string_lossy();
        self.git
            .run_with_timeout(
                parent,
                &["clone", "--mirror", repo_url, &mirror_str],
                std::time::Duration::from_secs(600),
                true,
            )
            .await
            .map_err(|e| WorkspaceError::MirrorCreate(e.to_string()))?;
        Ok(())
    }

    /// Refreshes the mirror under the exclusive update lock.
    pub async fn update(&self, mirror: &Path) -> Result<(), WorkspaceError> {
        let _lock = UpdateLock::acquire_async(mirror).await?;
        tracing::debug!(mirror = %mirror.display(), "updating mirror");
        self.git
            .run_with_timeout(
                mirror,
                &["remote", "update", "--prune"],
                std::time::Duration::from_secs(120),
                false,
            )
            .await
            .map_err(|e| WorkspaceError::MirrorUpdate(e.to_string()))?;
        Ok(())
    }
}
