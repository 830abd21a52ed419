//! Gitea pull-request client over the v1 REST API.

use async_trait::async_trait;
use serde::Deserialize;

use crate::{is_no_commits_message, ForgeClient, ForgeError, NewPullRequest, PullRequestInfo};

#[derive(Deserialize)]
struct GiteaPr {
    number: u64,
    html_url: String,
    head: GiteaRef,
}

#[derive(Deserialize)]
struct GiteaRef {
    #[serde(rename = "ref")]
    name: String,
}

pub struct GiteaForge {
    http: reqwest::Client,
    base_url: String,
    owner: String,
    repo: String,
    token: String,
}

impl GiteaForge {
    pub fn new(
        base_url: String,
        owner: String,
        repo: String,
        token: &str,
    ) -> Result<Self, ForgeError> {
        if base_url.is_empty() {
            return Err(ForgeError::Config("gitea base_url is empty".into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            owner,
            repo,
            token: token.to_string(),
        })
    }

    fn pulls_url(&self) -> String {
        format!(
            "{}/api/v1/repos/{}/{}/pulls",
            self.base_url, self.owner, self.repo
        )
    }

    async fn find_open(&self, req: &NewPullRequest) -> Result<Option<PullRequestInfo>, ForgeError> {
        let prs: Vec<GiteaPr> = self
            .http
            .get(self.pulls_url())
            .query(&[("state", "open")])
            .header("Authorization", format!("token {}", self.token))
            .send()
            .await
            .map_err(|e| ForgeError::Api(e.to_string()))?
            .error_for_status()
            .map_err(|e| ForgeError::Api(e.to_string()))?
            .json()
            .await
            .map_err(|e| ForgeError::Api(e.to_string()))?;
        Ok(prs
            .into_iter()
            .find(|pr| pr.head.name == req.head)
            .map(|pr| PullRequestInfo {
                url: pr.html_url,
                number: pr.number,
            }))
    }
}

#[async_trait]
impl ForgeClient for GiteaForge {
    async fn get_or_create_pr(
        &self,
        req: &NewPullRequest,
    ) -> Result<PullRequestInfo, ForgeError> {
        if let Some(existing) = self.find_open(req).await? {
            tracing::info!(number = existing.number, "reusing open pull request");
            return Ok(existing);
        }

        let resp = self
            .http
            .post(self.pulls_url())
            .header("Authorization", format!("token {}", self.token))
            .json(&serde_json::json!({
                "title": req.title,
                "body": req.body,
                "head": req.head,
                "base": req.base,
            }))
            .send()
            .await
            .map_err(|e| ForgeError::Api(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let pr: GiteaPr = resp.json().await.map_err(|e| ForgeError::Api(e.to_string()))?;
            return Ok(PullRequestInfo {
                url: pr.html_url,
                number: pr.number,
            });
        }

        let body = resp.text().await.unwrap_or_default();
        if is_no_commits_message(&body) {
            return Err(ForgeError::NoCommitsBetween);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ForgeError::Auth(body));
        }
        // 409: the PR already exists; a concurrent retry beat us to it.
        if status == reqwest::StatusCode::CONFLICT {
            if let Some(existing) = self.find_open(req).await? {
                return Ok(existing);
            }
        }
        Err(ForgeError::Api(format!("{status}: {body}")))
    }
}
