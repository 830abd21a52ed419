//! GitHub pull-request client over octocrab.

use async_trait::async_trait;

use crate::{is_no_commits_message, ForgeClient, ForgeError, NewPullRequest, PullRequestInfo};

pub struct GithubForge {
    client: octocrab::Octocrab,
    owner: String,
    repo: String,
}

impl GithubForge {
    pub fn new(owner: String, repo: String, token: &str) -> Result<Self, ForgeError> {
        let client = octocrab::Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| ForgeError::Auth(e.to_string()))?;
        Ok(Self {
            client,
            owner,
            repo,
        })
    }

    async fn find_open(&self, req: &NewPullRequest) -> Result<Option<PullRequestInfo>, ForgeError> {
        let page = self
            .client
            .pulls(&self.owner, &self.repo)
            .list()
            .head(format!("{}:{}", self.owner, req.head))
            .base(req.base.clone())
            .send()
            .await
            .map_err(|e| ForgeError::Api(e.to_string()))?;
        Ok(page.items.into_iter().next().map(|pr| PullRequestInfo {
            url: pr
                .html_url
                .map(|u| u.to_string())
                .unwrap_or_default(),
            number: pr.number,
        }))
    }
}

#[async_trait]
impl ForgeClient for GithubForge {
    async fn get_or_create_pr(
        &self,
        req: &NewPullRequest,
    ) -> Result<PullRequestInfo, ForgeError> {
        if let Some(existing) = self.find_open(req).await? {
            tracing::info!(number = existing.number, "reusing open pull request");
            return Ok(existing);
        }

        match self
            .client
            .pulls(&self.owner, &self.repo)
            .create(&req.title, &req.head, &req.base)
            .body(&req.body)
            .send()
            .await
        {
            Ok(pr) => Ok(PullRequestInfo {
                url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
                number: pr.number,
            }),
            Err(e) => {
                let msg = e.to_string();
                if is_no_commits_message(&msg) {
                    return Err(ForgeError::NoCommitsBetween);
                }
                // Lost a race with a concurrent create: fall back to lookup.
                if msg.contains("already exists") {
                    if let Some(existing) = self.find_open(req).await? {
                        return Ok(existing);
                    }
                }
                Err(ForgeError::Api(msg))
            }
        }
    }
}
