//! Git workspace management for Weft agents.
//!
//! One shared bare **mirror** per repository serves as the local object pool;
//! each agent owns an inode-stable work dir that is re-seeded from the mirror
//! at every story start and emptied (never removed) at story end. Host-side
//! push/fetch/rebase live behind the [`HostGit`] trait so the merge pipeline
//! is testable without a network remote.

mod clone;
mod git;
mod host;
mod manager;
mod mirror;
mod status;

pub use clone::{create_story_branch, empty_dir_contents, fresh_clone};
pub use git::{GitError, GitRunner};
pub use host::{HostGit, HostGitCli, HostGitError};
pub use manager::{ContainerRuntime, WorkspaceManager, WorkspaceSetup};
pub use mirror::{repo_name, MirrorManager};
pub use status::{clear_stale_index_lock, detect, GitWorkspaceState};

/// Error type for workspace provisioning and teardown.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("mirror create: {0}")]
    MirrorCreate(String),
    #[error("mirror update: {0}")]
    MirrorUpdate(String),
    #[error("mirror lock: {0}")]
    MirrorLock(String),
    #[error("clone: {0}")]
    Clone(String),
    #[error("git identity: {0}")]
    Identity(String),
    #[error("branch: {0}")]
    Branch(String),
    #[error("cleanup: {0}")]
    Cleanup(String),
}
