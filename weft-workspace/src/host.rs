//! Host-side git operations for the merge pipeline.
//!
//! Push and fetch run on the host, never in a container: host git inherits
//! the process environment (`GITHUB_TOKEN`, credential helpers), containers
//! have no credentials by construction. Network calls carry a 2-minute
//! timeout regardless of the caller's outer deadline.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::git::{GitError, GitRunner};
use crate::status;
use crate::status::GitWorkspaceState;

const NETWORK_TIMEOUT: Duration = Duration::from_secs(120);

/// Error from a host-side git operation, classified for the merge pipeline.
#[derive(Debug, thiserror::Error)]
pub enum HostGitError {
    #[error("push rejected: {output}")]
    PushRejected { output: String },
    #[error("authentication failed: {output}")]
    Auth { output: String },
    #[error("rebase conflict in {} file(s)", conflicting_files.len())]
    RebaseConflict {
        output: String,
        conflicting_files: Vec<String>,
        git_status: String,
    },
    #[error("git: {0}")]
    Git(#[from] GitError),
}

fn classify_push_error(e: GitError) -> HostGitError {
    let output = e.output().to_string();
    let lower = output.to_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("could not read username")
        || lower.contains("403")
    {
        return HostGitError::Auth { output };
    }
    if lower.contains("[rejected]")
        || lower.contains("non-fast-forward")
        || lower.contains("fetch first")
        || lower.contains("stale info")
    {
        return HostGitError::PushRejected { output };
    }
    HostGitError::Git(e)
}

/// Host git capability consumed by the merge pipeline.
///
/// A trait seam so PREPARE_MERGE is testable without a network remote; the
/// shipped implementation is [`HostGitCli`].
#[async_trait]
pub trait HostGit: Send + Sync {
    /// `git push origin local:remote`.
    async fn push(&self, dir: &Path, local: &str, remote: &str) -> Result<(), HostGitError>;

    /// `git push --force-with-lease -u origin local:remote`.
    async fn force_push_with_lease(
        &self,
        dir: &Path,
        local: &str,
        remote: &str,
    ) -> Result<(), HostGitError>;

    /// Fetches the given refs from origin. Callers pass the target branch
    /// plus the remote story branch; when the story branch does not exist
    /// yet the implementation retries with the target alone.
    async fn fetch(&self, dir: &Path, refs: &[&str]) -> Result<(), HostGitError>;

    /// `git rebase origin/<target>`. On conflict the rebase is left in
    /// place (mid-rebase, for the coder to resolve) and
    /// [`HostGitError::RebaseConflict`] is returned; on any other failure
    /// the rebase is aborted.
    async fn rebase_onto(&self, dir: &Path, target: &str) -> Result<(), HostGitError>;

    /// `git rebase --continue` after conflicts were resolved.
    async fn continue_rebase(&self, dir: &Path) -> Result<(), HostGitError>;

    /// Commit id of `refs/heads/<branch>` on origin, `None` when absent.
    async fn remote_head(&self, dir: &Path, branch: &str) -> Result<Option<String>, HostGitError>;

    /// Observes the working copy's git state (rebase markers, conflicts).
    async fn workspace_state(&self, dir: &Path) -> Result<GitWorkspaceState, HostGitError>;
}

/// [`HostGit`] over the real git CLI.
#[derive(Clone, Debug, Default)]
pub struct HostGitCli {
    git: GitRunner,
}

impl HostGitCli {
    pub fn new(git: GitRunner) -> Self {
        Self { git }
    }
}

#[async_trait]
impl HostGit for HostGitCli {
    async fn push(&self, dir: &Path, local: &str, remote: &str) -> Result<(), HostGitError> {
        let refspec = format!("{local}:{remote}");
        self.git
            .run_with_timeout(dir, &["push", "origin", &refspec], NETWORK_TIMEOUT, true)
            .await
            .map(|_| ())
            .map_err(classify_push_error)
    }

    async fn force_push_with_lease(
        &self,
        dir: &Path,
        local: &str,
        remote: &str,
    ) -> Result<(), HostGitError> {
        let refspec = format!("{local}:{remote}");
        self.git
            .run_with_timeout(
                dir,
                &["push", "--force-with-lease", "-u", "origin", &refspec],
                NETWORK_TIMEOUT,
                true,
            )
            .await
            .map(|_| ())
            .map_err(classify_push_error)
    }

    async fn fetch(&self, dir: &Path, refs: &[&str]) -> Result<(), HostGitError> {
        let mut args = vec!["fetch", "origin"];
        args.extend_from_slice(refs);
        match self
            .git
            .run_with_timeout(dir, &args, NETWORK_TIMEOUT, false)
            .await
        {
            Ok(_) => Ok(()),
            // The story branch may not exist remotely yet; retry with the
            // first ref (the target branch) alone.
            Err(e) if refs.len() > 1 && e.output().contains("couldn't find remote ref") => {
                self.git
                    .run_with_timeout(dir, &["fetch", "origin", refs[0]], NETWORK_TIMEOUT, false)
                    .await
                    .map(|_| ())
                    .map_err(HostGitError::Git)
            }
            Err(e) => Err(classify_push_error(e)),
        }
    }

    async fn rebase_onto(&self, dir: &Path, target: &str) -> Result<(), HostGitError> {
        let onto = format!("origin/{target}");
        match self.git.run(dir, &["rebase", &onto]).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let state = status::detect(&self.git, dir).await?;
                if state.has_conflicts || state.mid_rebase {
                    // Left mid-rebase on purpose: the coder resolves it.
                    return Err(HostGitError::RebaseConflict {
                        output: e.output().to_string(),
                        conflicting_files: state.conflicting_files,
                        git_status: state.raw_status,
                    });
                }
                if let Err(abort) = self.git.run_quiet(dir, &["rebase", "--abort"]).await {
                    tracing::warn!(error = %abort, "rebase abort after non-conflict failure");
                }
                Err(HostGitError::Git(e))
            }
        }
    }

    async fn continue_rebase(&self, dir: &Path) -> Result<(), HostGitError> {
        self.git
            .run(dir, &["rebase", "--continue"])
            .await
            .map(|_| ())
            .map_err(HostGitError::Git)
    }

    async fn workspace_state(&self, dir: &Path) -> Result<GitWorkspaceState, HostGitError> {
        status::detect(&self.git, dir).await.map_err(HostGitError::Git)
    }

    async fn remote_head(&self, dir: &Path, branch: &str) -> Result<Option<String>, HostGitError> {
        let out = self
            .git
            .run_with_timeout(
                dir,
                &["ls-remote", "origin", &format!("refs/heads/{branch}")],
                NETWORK_TIMEOUT,
                false,
            )
            .await
            .map_err(HostGitError::Git)?;
        Ok(out
            .lines()
            .find_map(|l| l.split_whitespace().next())
            .map(String::from))
    }
}
