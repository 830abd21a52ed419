//! PREPARE_MERGE: push the story branch, auto-rebase on rejection, open the
//! pull request, and hand the merge decision to the supervisor.
//!
//! Bounded by two counters: total attempts, and "stuck" attempts where the
//! remote target head has not moved since the previous entry. The stuck
//! check fires first. Conflicts are never resolved here; the workspace is
//! left mid-rebase and the coder gets guidance plus a resume input.

use std::time::Duration;

use weft_workspace::HostGitError;

use crate::coder::{Coder, Step};
use crate::effects::Effect;
use crate::error::AgentError;
use crate::machine::{keys, CoderState};
use crate::prompts::names;

pub const MAX_STUCK_ATTEMPTS: u32 = 2;
pub const MAX_TOTAL_ATTEMPTS: u32 = 3;

/// Age past which an `index.lock` is considered abandoned.
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeErrorKind {
    RebaseConflict,
    MergeConflict,
    PushRejected,
    AuthError,
    Unknown,
}

impl MergeErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::RebaseConflict => "rebase conflict",
            Self::MergeConflict => "merge conflict",
            Self::PushRejected => "rejected push",
            Self::AuthError => "authentication error",
            Self::Unknown => "git error",
        }
    }
}

/// Everything the coder needs to dig the workspace out of a failed merge
/// attempt.
#[derive(Clone, Debug)]
pub struct MergeConflictInfo {
    pub kind: MergeErrorKind,
    pub error_output: String,
    pub conflicting_files: Vec<String>,
    pub git_status: String,
    pub mid_rebase: bool,
    pub attempt_number: u32,
    pub max_attempts: u32,
}

/// Failures that no retry can fix: missing binaries, not a repository.
pub(crate) fn is_unrecoverable(message: &str) -> bool {
    const FATAL: [&str; 4] = [
        "not a git repository",
        "gh: command not found",
        "git: command not found",
        "no such file or directory",
    ];
    let lower = message.to_lowercase();
    FATAL.iter().any(|p| lower.contains(p))
}

impl Coder {
    pub(crate) async fn handle_prepare_merge(&mut self) -> Result<Step, AgentError> {
        let story_id = self.require_str(keys::STORY_ID)?;
        let local = self.require_str(keys::LOCAL_BRANCH_NAME)?;
        let remote = self.require_str(keys::REMOTE_BRANCH_NAME)?;
        let target = self.cfg.git.target_branch.clone();

        // Attempt accounting first, so even a crashing attempt is counted.
        let attempt = self.machine.data_mut().increment(keys::MERGE_ATTEMPT_COUNT);

        let current_head = match self.deps.host_git.remote_head(&self.work_dir, &target).await {
            Ok(head) => head,
            Err(e) => {
                return self.push_failure_step(e, attempt);
            }
        };
        let previous_head = self
            .machine
            .data()
            .get_str(keys::LAST_REMOTE_HEAD)
            .map(String::from);
        let stuck = if current_head.is_some() && current_head.as_deref() == previous_head.as_deref()
        {
            self.machine
                .data()
                .get_u32(keys::MERGE_STUCK_ATTEMPTS)
                .unwrap_or(0)
                + 1
        } else {
            0
        };
        {
            let data = self.machine.data_mut();
            data.set(keys::MERGE_STUCK_ATTEMPTS, stuck);
            data.set(keys::LAST_REMOTE_HEAD, current_head.clone());
        }
        self.machine.persist().await?;

        if stuck >= MAX_STUCK_ATTEMPTS {
            return Err(AgentError::MergeStuck(format!(
                "remote {target} head unchanged for {stuck} attempts"
            )));
        }
        if attempt >= MAX_TOTAL_ATTEMPTS {
            return Err(AgentError::MergeExhausted(format!(
                "total attempts reached {attempt}"
            )));
        }

        // Recover an interrupted workspace before touching the network.
        if let Err(e) = weft_workspace::clear_stale_index_lock(&self.work_dir, STALE_LOCK_AGE) {
            tracing::warn!(error = %e, "stale index lock check failed");
        }
        let ws = self
            .deps
            .host_git
            .workspace_state(&self.work_dir)
            .await
            .map_err(|e| AgentError::Internal(format!("workspace state: {e}")))?;
        if ws.has_conflicts {
            let info = MergeConflictInfo {
                kind: if ws.mid_rebase {
                    MergeErrorKind::RebaseConflict
                } else {
                    MergeErrorKind::MergeConflict
                },
                error_output: String::new(),
                conflicting_files: ws.conflicting_files.clone(),
                git_status: ws.raw_status.clone(),
                mid_rebase: ws.mid_rebase,
                attempt_number: attempt,
                max_attempts: MAX_TOTAL_ATTEMPTS,
            };
            return Ok(self.conflict_hand_back(info));
        }
        if ws.mid_rebase {
            if let Err(e) = self.deps.host_git.continue_rebase(&self.work_dir).await {
                return self.push_failure_step(e, attempt);
            }
        }

        // Push; on rejection, unconditionally attempt the auto-rebase.
        if let Err(push_err) = self.deps.host_git.push(&self.work_dir, &local, &remote).await {
            tracing::info!(error = %push_err, "push failed; attempting auto-rebase");
            if let Some(step) = self.auto_rebase(&target, &local, &remote, attempt).await? {
                return Ok(step);
            }
        }

        // Pull request, then the merge decision.
        let pr = match self.open_pull_request(&story_id, &remote, &target).await {
            Ok(pr) => pr,
            Err(forge::ForgeError::NoCommitsBetween) => {
                tracing::warn!("forge reports no commits between branches");
                return Ok(self.retry_hand_back(
                    "The pull request could not be created: the story branch has no commits on \
                     top of the target branch. Make sure your work is committed on the story \
                     branch, then call done again."
                        .to_string(),
                ));
            }
            Err(e) => {
                let msg = e.to_string();
                if is_unrecoverable(&msg) {
                    return Err(e.into());
                }
                return Ok(self.retry_hand_back(format!(
                    "Creating the pull request failed: {msg}\nFix what you can from the \
                     workspace and call done again."
                )));
            }
        };

        let result = self
            .deps
            .effects
            .execute(
                Effect::Merge {
                    story_id: story_id.clone(),
                    pr_url: pr.url.clone(),
                    branch: remote.clone(),
                },
                &self.deps.cancel,
            )
            .await?;

        Ok(Step::to(CoderState::AwaitMerge)
            .with(keys::PR_URL, pr.url)
            .with(keys::MERGE_RESULT, result))
    }

    /// Fetch, rebase, re-test, force push. Returns `Some(step)` when the
    /// pipeline must hand control back to CODING, `None` when the branch is
    /// pushed and PR creation may proceed.
    async fn auto_rebase(
        &mut self,
        target: &str,
        local: &str,
        remote: &str,
        attempt: u32,
    ) -> Result<Option<Step>, AgentError> {
        if let Err(e) = self
            .deps
            .host_git
            .fetch(&self.work_dir, &[target, remote])
            .await
        {
            return self.push_failure_step(e, attempt).map(Some);
        }

        match self.deps.host_git.rebase_onto(&self.work_dir, target).await {
            Ok(()) => {}
            Err(HostGitError::RebaseConflict {
                output,
                conflicting_files,
                git_status,
            }) => {
                let info = MergeConflictInfo {
                    kind: MergeErrorKind::RebaseConflict,
                    error_output: output,
                    conflicting_files,
                    git_status,
                    mid_rebase: true,
                    attempt_number: attempt,
                    max_attempts: MAX_TOTAL_ATTEMPTS,
                };
                return Ok(Some(self.conflict_hand_back(info)));
            }
            Err(e) => return self.push_failure_step(e, attempt).map(Some),
        }

        // Rebase rewrote history; prove the tests still pass before forcing.
        let report = self
            .deps
            .build
            .run_tests(&self.work_dir)
            .await
            .map_err(AgentError::Internal)?;
        if !report.passed {
            return Ok(Some(self.retry_hand_back(format!(
                "The rebase onto {target} succeeded but the tests now fail. Fix them and call \
                 done again.\n\n{}",
                report.output
            ))));
        }

        if let Err(e) = self
            .deps
            .host_git
            .force_push_with_lease(&self.work_dir, local, remote)
            .await
        {
            return self.push_failure_step(e, attempt).map(Some);
        }
        Ok(None)
    }

    async fn open_pull_request(
        &mut self,
        story_id: &str,
        remote: &str,
        target: &str,
    ) -> Result<forge::PullRequestInfo, forge::ForgeError> {
        let task = self
            .machine
            .data()
            .get_str(keys::TASK_CONTENT)
            .unwrap_or_default();
        let first_line = task.lines().next().unwrap_or_default();
        let plan = self.machine.data().get_str(keys::PLAN).unwrap_or_default();
        self.deps
            .forge
            .get_or_create_pr(&forge::NewPullRequest {
                title: format!("Story {story_id}: {first_line}"),
                body: plan.to_string(),
                head: remote.to_string(),
                base: target.to_string(),
            })
            .await
    }

    /// Classifies a host-git failure: unrecoverable ends the story,
    /// everything else goes back to CODING with guidance.
    fn push_failure_step(&mut self, error: HostGitError, attempt: u32) -> Result<Step, AgentError> {
        let message = error.to_string();
        if is_unrecoverable(&message) {
            return Err(AgentError::Internal(message));
        }
        let kind = match &error {
            HostGitError::Auth { .. } => MergeErrorKind::AuthError,
            HostGitError::PushRejected { .. } => MergeErrorKind::PushRejected,
            HostGitError::RebaseConflict { .. } => MergeErrorKind::RebaseConflict,
            HostGitError::Git(_) => MergeErrorKind::Unknown,
        };
        let info = MergeConflictInfo {
            kind,
            error_output: message,
            conflicting_files: Vec::new(),
            git_status: String::new(),
            mid_rebase: false,
            attempt_number: attempt,
            max_attempts: MAX_TOTAL_ATTEMPTS,
        };
        Ok(self.retry_hand_back(format!(
            "Preparing the merge hit a {}: {}\nInspect the workspace, fix what you can, and \
             call done again.",
            info.kind.as_str(),
            info.error_output
        )))
    }

    /// Conflict path: the rendered guidance (conflicting files, git status,
    /// `git rebase --continue` instructions) becomes the resume input that
    /// opens the next coding turn.
    fn conflict_hand_back(&mut self, info: MergeConflictInfo) -> Step {
        let guidance = self.render(
            names::MERGE_CONFLICT_GUIDANCE,
            &[
                ("KIND", info.kind.as_str().to_string()),
                ("ATTEMPT", info.attempt_number.to_string()),
                ("MAX_ATTEMPTS", info.max_attempts.to_string()),
                ("CONFLICT_FILES", info.conflicting_files.join("\n")),
                ("GIT_STATUS", info.git_status.clone()),
            ],
        );
        Step::to(CoderState::Coding).with(keys::RESUME_INPUT, guidance)
    }

    /// Non-conflict retry path: the guidance itself is the resume input.
    fn retry_hand_back(&mut self, guidance: String) -> Step {
        Step::to(CoderState::Coding).with(keys::RESUME_INPUT, guidance)
    }
}
