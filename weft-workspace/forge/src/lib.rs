//! Pull-request API clients.
//!
//! [`ForgeClient`] is the capability the merge pipeline consumes:
//! get-or-create a PR for a head/base pair. Implementations: [`GithubForge`]
//! (octocrab) and [`GiteaForge`] (plain REST). Selection is config-driven
//! via [`from_config`].

mod gitea;
mod github;

use async_trait::async_trait;
use config::ForgeConfig;

pub use gitea::GiteaForge;
pub use github::GithubForge;

/// Request to open (or find) a pull request.
#[derive(Clone, Debug)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    /// Head branch name (the story branch).
    pub head: String,
    /// Base branch name (the target branch).
    pub base: String,
}

/// An existing or newly created pull request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequestInfo {
    pub url: String,
    pub number: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// The head branch carries no commits on top of the base; the PR cannot
    /// exist. The merge pipeline hands this back to the coder instead of
    /// failing the story.
    #[error("no commits between base and head")]
    NoCommitsBetween,
    #[error("forge auth: {0}")]
    Auth(String),
    #[error("forge: {0}")]
    Api(String),
    #[error("forge config: {0}")]
    Config(String),
}

/// Messages forges use for an empty head..base range.
pub(crate) fn is_no_commits_message(body: &str) -> bool {
    body.contains("No commits between")
}

/// Pull-request capability consumed by the merge pipeline.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    /// Returns the open PR for `head` → `base` when one exists, otherwise
    /// creates it. Idempotent across merge-pipeline retries.
    async fn get_or_create_pr(&self, req: &NewPullRequest)
        -> Result<PullRequestInfo, ForgeError>;
}

/// Builds the configured forge client. `token` is the API credential from
/// the process environment (`GITHUB_TOKEN` / `GITEA_TOKEN`).
pub fn from_config(
    cfg: &ForgeConfig,
    token: &str,
) -> Result<Box<dyn ForgeClient>, ForgeError> {
    match cfg.kind.as_str() {
        "github" => Ok(Box::new(GithubForge::new(
            cfg.owner.clone(),
            cfg.repo.clone(),
            token,
        )?)),
        "gitea" => Ok(Box::new(GiteaForge::new(
            cfg.base_url.clone(),
            cfg.owner.clone(),
            cfg.repo.clone(),
            token,
        )?)),
        other => Err(ForgeError::Config(format!("unknown forge kind: {other}"))),
    }
}
