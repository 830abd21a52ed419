//! Coder orchestrator: one agent, one story, driven through the state graph.
//!
//! Each state has exactly one handler; a step runs the current state's
//! handler and performs at most one transition. Handlers never call back
//! into the stepper, so there are no nested processing loops; external
//! events (story delivery, effect replies) arrive over channels and are
//! observed by handlers on their next step.

mod build;
mod merge;
mod phases;
mod review;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;
use config::WeftConfig;
use forge::ForgeClient;
use weft_workspace::{
    GitRunner, HostGit, WorkspaceError, WorkspaceManager, WorkspaceSetup,
};

use crate::context::{ContextLimits, ContextManager};
use crate::effects::EffectsEngine;
use crate::error::AgentError;
use crate::llm::LlmClient;
use crate::machine::{keys, CoderState, Machine, StateTag};
use crate::prompts::PromptRenderer;
use crate::story::StoryMessage;
use crate::tools::{
    AskQuestionTool, DoneTool, SubmitPlanTool, TodosAddTool, ToolRegistry,
};

pub use build::{BuildReport, BuildService};
pub use merge::{MergeConflictInfo, MergeErrorKind};

/// What one handler decided: where to go, what data rides on the
/// transition, and whether the story is finished.
pub(crate) struct Step {
    next: CoderState,
    extra: Vec<(String, serde_json::Value)>,
    done: bool,
}

impl Step {
    fn stay(state: CoderState) -> Self {
        Self {
            next: state,
            extra: Vec::new(),
            done: false,
        }
    }

    fn to(next: CoderState) -> Self {
        Self {
            next,
            extra: Vec::new(),
            done: false,
        }
    }

    fn finished(state: CoderState) -> Self {
        Self {
            next: state,
            extra: Vec::new(),
            done: true,
        }
    }

    fn with(mut self, key: &str, value: impl serde::Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => self.extra.push((key.to_string(), v)),
            Err(e) => tracing::error!(key, error = %e, "unserializable transition data dropped"),
        }
        self
    }
}

/// Workspace provisioning capability; [`WorkspaceManager`] is the shipped
/// implementation.
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn setup_workspace(
        &self,
        agent_id: &str,
        story_id: &str,
        work_dir: &std::path::Path,
    ) -> Result<WorkspaceSetup, WorkspaceError>;

    async fn cleanup_workspace(
        &self,
        agent_id: &str,
        story_id: &str,
        work_dir: &std::path::Path,
    ) -> Result<(), WorkspaceError>;
}

#[async_trait]
impl Workspace for WorkspaceManager {
    async fn setup_workspace(
        &self,
        agent_id: &str,
        story_id: &str,
        work_dir: &std::path::Path,
    ) -> Result<WorkspaceSetup, WorkspaceError> {
        WorkspaceManager::setup_workspace(self, agent_id, story_id, work_dir).await
    }

    async fn cleanup_workspace(
        &self,
        agent_id: &str,
        story_id: &str,
        work_dir: &std::path::Path,
    ) -> Result<(), WorkspaceError> {
        WorkspaceManager::cleanup_workspace(self, agent_id, story_id, work_dir).await
    }
}

/// External capabilities the orchestrator glues together.
pub struct CoderDeps {
    pub llm: Arc<dyn LlmClient>,
    pub effects: EffectsEngine,
    pub workspace: Arc<dyn Workspace>,
    pub host_git: Arc<dyn HostGit>,
    pub forge: Arc<dyn ForgeClient>,
    pub build: Arc<dyn BuildService>,
    pub renderer: Arc<dyn PromptRenderer>,
    pub cancel: CancellationToken,
}

/// One coder agent instance, created per story assignment.
pub struct Coder {
    machine: Machine<CoderState>,
    ctx: ContextManager,
    deps: CoderDeps,
    cfg: WeftConfig,
    stories: mpsc::Receiver<StoryMessage>,
    work_dir: PathBuf,
    git: GitRunner,
    planning_tools: Arc<ToolRegistry>,
    coding_tools: Arc<ToolRegistry>,
    todo_tools: Arc<ToolRegistry>,
}

impl Coder {
    /// Builds a coder around its machine and tool sets. `planning_tools` and
    /// `coding_tools` carry the deployment's real tools (shell, file IO,
    /// …); the phase protocol tools are registered on top here.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine: Machine<CoderState>,
        cfg: WeftConfig,
        deps: CoderDeps,
        stories: mpsc::Receiver<StoryMessage>,
        work_dir: PathBuf,
        mut planning_tools: ToolRegistry,
        mut coding_tools: ToolRegistry,
    ) -> Self {
        planning_tools.register(Arc::new(SubmitPlanTool));
        planning_tools.register(Arc::new(AskQuestionTool));
        coding_tools.register(Arc::new(DoneTool));
        coding_tools.register(Arc::new(AskQuestionTool));
        let mut todo_tools = ToolRegistry::new();
        todo_tools.register(Arc::new(TodosAddTool));

        let ctx = ContextManager::new(ContextLimits {
            max_context_tokens: cfg.llm.max_context_tokens,
            reply_reserve_tokens: cfg.llm.reply_reserve_tokens,
            compaction_buffer_tokens: cfg.llm.compaction_buffer_tokens,
        });

        Self {
            machine,
            ctx,
            deps,
            cfg,
            stories,
            work_dir,
            git: GitRunner::new(),
            planning_tools: Arc::new(planning_tools),
            coding_tools: Arc::new(coding_tools),
            todo_tools: Arc::new(todo_tools),
        }
    }

    pub fn state(&self) -> CoderState {
        self.machine.state()
    }

    pub fn machine(&self) -> &Machine<CoderState> {
        &self.machine
    }

    /// Mutable machine access for hosts that seed or inspect state data.
    pub fn machine_mut(&mut self) -> &mut Machine<CoderState> {
        &mut self.machine
    }

    pub fn context(&self) -> &ContextManager {
        &self.ctx
    }

    /// Steps until the machine reaches a terminal state or the context is
    /// cancelled. Fatal errors are recorded and end in `ERROR`.
    pub async fn run(&mut self) -> Result<CoderState, AgentError> {
        loop {
            if self.deps.cancel.is_cancelled() {
                return Ok(self.machine.state());
            }
            match self.step().await {
                Ok(true) => return Ok(self.machine.state()),
                Ok(false) => {}
                Err(e) => {
                    self.fail(&e).await;
                    return Err(e);
                }
            }
        }
    }

    /// Runs exactly one handler for the current state and applies its
    /// transition. Returns whether the story is finished.
    pub async fn step(&mut self) -> Result<bool, AgentError> {
        let state = self.machine.state();
        let step = match state {
            CoderState::Waiting => self.handle_waiting().await,
            CoderState::Setup => self.handle_setup().await,
            CoderState::Planning => self.handle_planning().await,
            CoderState::PlanReview => self.handle_plan_review().await,
            CoderState::TodoCollection => self.handle_todo_collection().await,
            CoderState::Coding => self.handle_coding().await,
            CoderState::Testing => self.handle_testing().await,
            CoderState::CodeReview => self.handle_code_review().await,
            CoderState::Question => self.handle_question().await,
            CoderState::BudgetReview => self.handle_budget_review().await,
            CoderState::PrepareMerge => self.handle_prepare_merge().await,
            CoderState::AwaitMerge => self.handle_await_merge().await,
            CoderState::Done | CoderState::Error => Ok(Step::finished(state)),
        }?;

        if step.next != state {
            self.machine.transition_to(step.next, step.extra).await?;
        } else {
            self.machine.data_mut().apply(step.extra);
            self.machine.persist().await?;
        }
        Ok(step.done)
    }

    /// Canonical fatal path: record the error and move to `ERROR`.
    async fn fail(&mut self, error: &AgentError) {
        tracing::error!(agent_id = %self.machine.agent_id(), %error, "story failed");
        if !self.machine.state().is_terminal() {
            let result = self
                .machine
                .transition_to(
                    CoderState::Error,
                    vec![(
                        "error_message".to_string(),
                        serde_json::Value::from(error.to_string()),
                    )],
                )
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to persist ERROR state");
            }
        }
    }

    // WAITING: block on the inbound story channel.
    async fn handle_waiting(&mut self) -> Result<Step, AgentError> {
        let story = tokio::select! {
            _ = self.deps.cancel.cancelled() => return Ok(Step::stay(CoderState::Waiting)),
            msg = self.stories.recv() => msg.ok_or(AgentError::StoryChannelClosed)?,
        };
        tracing::info!(story_id = %story.story_id, story_type = %story.story_type, "story received");
        Ok(Step::to(CoderState::Setup)
            .with(keys::TASK_CONTENT, &story.content)
            .with(keys::STORY_ID, &story.story_id)
            .with(keys::STORY_TYPE, story.story_type))
    }

    // SETUP: provision the workspace and story branch.
    async fn handle_setup(&mut self) -> Result<Step, AgentError> {
        let story_id = self.require_str(keys::STORY_ID)?;
        let agent_id = self.machine.agent_id().to_string();
        let setup = self
            .deps
            .workspace
            .setup_workspace(&agent_id, &story_id, &self.work_dir)
            .await?;
        self.machine
            .data_mut()
            .stamp_completed(keys::SETUP_COMPLETED_AT);
        Ok(Step::to(CoderState::Planning)
            .with(keys::LOCAL_BRANCH_NAME, &setup.branch_name)
            .with(keys::REMOTE_BRANCH_NAME, &setup.branch_name))
    }

    // TESTING: run the build service; pass → CODE_REVIEW, fail → CODING.
    async fn handle_testing(&mut self) -> Result<Step, AgentError> {
        let report = self
            .deps
            .build
            .run_tests(&self.work_dir)
            .await
            .map_err(AgentError::Internal)?;
        if report.passed {
            self.machine
                .data_mut()
                .stamp_completed(keys::TESTING_COMPLETED_AT);
            let effect = self.build_code_review_effect().await;
            return Ok(Step::to(CoderState::CodeReview)
                .with(keys::PENDING_APPROVAL_REQUEST, effect));
        }
        tracing::info!("tests failed; handing output back to coding");
        Ok(Step::to(CoderState::Coding).with(
            keys::RESUME_INPUT,
            format!(
                "The test run failed. Fix the failures and call done again.\n\n{}",
                report.output
            ),
        ))
    }

    // AWAIT_MERGE: interpret the stored merge result.
    async fn handle_await_merge(&mut self) -> Result<Step, AgentError> {
        let result: crate::effects::EffectResult = self
            .machine
            .data()
            .get_as(keys::MERGE_RESULT)
            .ok_or(AgentError::MissingStateData(keys::MERGE_RESULT))?;
        match result {
            crate::effects::EffectResult::Merge {
                status: crate::effects::ApprovalStatus::Approved,
                ..
            } => {
                self.machine
                    .data_mut()
                    .stamp_completed(keys::MERGE_COMPLETED_AT);
                Ok(Step::finished(CoderState::Done))
            }
            crate::effects::EffectResult::Merge { status, feedback } => Err(AgentError::Abandoned(
                format!("merge not approved ({status:?}): {feedback}"),
            )),
            other => Err(AgentError::Internal(format!(
                "unexpected result in AWAIT_MERGE: {other:?}"
            ))),
        }
    }

    /// Builds the code-review effect from the branch diff, best effort.
    async fn build_code_review_effect(&mut self) -> crate::effects::Effect {
        let target = self.cfg.git.target_branch.clone();
        let range = format!("origin/{target}...HEAD");
        let summary = self
            .git
            .run_quiet(&self.work_dir, &["log", "--oneline", &format!("origin/{target}..HEAD")])
            .await
            .unwrap_or_else(|e| format!("(log unavailable: {e})"));
        let diff = self
            .git
            .run_quiet(&self.work_dir, &["diff", &range])
            .await
            .unwrap_or_else(|e| format!("(diff unavailable: {e})"));
        crate::effects::Effect::CodeReview { summary, diff }
    }

    fn require_str(&self, key: &'static str) -> Result<String, AgentError> {
        self.machine
            .data()
            .get_str(key)
            .map(String::from)
            .ok_or(AgentError::MissingStateData(key))
    }

    fn render(&self, name: &str, vars: &[(&'static str, String)]) -> String {
        let map: HashMap<&str, String> = vars.iter().cloned().collect();
        self.deps.renderer.render(name, &map)
    }
}
