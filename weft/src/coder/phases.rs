//! PLANNING / TODO_COLLECTION / CODING handlers: tool loops under iteration
//! budgets, with budget-review detours and question hand-offs.

use crate::coder::{Coder, Step};
use crate::effects::{Effect, Urgency};
use crate::error::AgentError;
use crate::machine::{keys, CoderState, StateTag};
use crate::prompts::names;
use crate::todo::TodoList;
use crate::toolloop::{LoopOutcome, LoopRun, ToolLoop, ToolLoopConfig};

/// Tool calls summarized into a budget-review effect.
const ACTIVITY_WINDOW: usize = 5;

impl Coder {
    pub(crate) async fn handle_planning(&mut self) -> Result<Step, AgentError> {
        let loops = self.machine.data_mut().increment(keys::PLANNING_ITERATIONS);
        if loops >= self.cfg.budgets.planning_max_loops {
            return Ok(self.budget_review_step(CoderState::Planning, loops));
        }

        if loops == 1 {
            let story_id = self.require_str(keys::STORY_ID)?;
            let story_type = self.require_str(keys::STORY_TYPE)?;
            let task = self.require_str(keys::TASK_CONTENT)?;
            let system = self.render(names::PLANNING_SYSTEM, &[]);
            let prompt = self.render(
                names::PLANNING_TASK,
                &[
                    ("STORY_ID", story_id),
                    ("STORY_TYPE", story_type),
                    ("TASK_CONTENT", task),
                ],
            );
            self.ctx.reset_for_template(system, prompt);
        }

        let tool_loop = ToolLoop::new(
            self.deps.llm.clone(),
            self.planning_tools.clone(),
            [crate::tools::TOOL_SUBMIT_PLAN.to_string()],
            ToolLoopConfig {
                max_iterations: self.cfg.budgets.planning_max_iterations,
                max_reply_tokens: self.cfg.llm.max_reply_tokens,
                session_id: None,
                on_limit: None,
            },
        );
        let run = tool_loop.run(&mut self.ctx, None).await;

        match run.outcome {
            LoopOutcome::Terminal { data, .. } => {
                let plan = extract_str(&data, "plan")?;
                let confidence = extract_str(&data, "confidence")?;
                let exploration = data["exploration_summary"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let risks: Vec<String> = data["risks"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();

                self.machine
                    .data_mut()
                    .stamp_completed(keys::PLANNING_COMPLETED_AT);
                let effect = Effect::PlanReview {
                    plan: plan.clone(),
                    confidence: confidence.clone(),
                    exploration_summary: exploration.clone(),
                    risks: risks.clone(),
                };
                Ok(Step::to(CoderState::PlanReview)
                    .with(keys::PLAN, plan)
                    .with(keys::PLAN_CONFIDENCE, confidence)
                    .with(keys::EXPLORATION_SUMMARY, exploration)
                    .with(keys::RISKS, risks)
                    .with(keys::PENDING_APPROVAL_REQUEST, effect))
            }
            LoopOutcome::ProcessEffect { signal, data }
                if signal == crate::tools::SIGNAL_QUESTION =>
            {
                Ok(self.question_step(CoderState::Planning, &data))
            }
            LoopOutcome::ProcessEffect { signal, .. } => Err(AgentError::Internal(format!(
                "unknown process effect signal: {signal}"
            ))),
            LoopOutcome::IterationLimit { .. } => {
                Ok(self.budget_review_step(CoderState::Planning, loops))
            }
            LoopOutcome::NoToolTwice => Err(AgentError::Internal(
                "planning stalled: no tool calls twice".into(),
            )),
            LoopOutcome::LlmError(msg) => Err(AgentError::Llm(msg)),
            LoopOutcome::ExtractionError(msg) => Err(AgentError::Extraction {
                what: "plan",
                detail: msg,
            }),
        }
    }

    pub(crate) async fn handle_todo_collection(&mut self) -> Result<Step, AgentError> {
        let plan = self.require_str(keys::PLAN)?;
        let system = self.render(names::TODO_SYSTEM, &[]);
        let prompt = self.render(names::TODO_TASK, &[("PLAN", plan)]);
        self.ctx.reset_for_template(system, prompt);

        let tool_loop = ToolLoop::new(
            self.deps.llm.clone(),
            self.todo_tools.clone(),
            [crate::tools::TOOL_TODOS_ADD.to_string()],
            ToolLoopConfig {
                max_iterations: self.cfg.budgets.todo_max_iterations,
                max_reply_tokens: self.cfg.llm.max_reply_tokens,
                session_id: None,
                on_limit: None,
            },
        );
        let run = tool_loop.run(&mut self.ctx, None).await;

        match run.outcome {
            LoopOutcome::Terminal { data, .. } => {
                let descriptions: Vec<String> = data["todos"]
                    .as_array()
                    .ok_or(AgentError::Extraction {
                        what: "todo list",
                        detail: "todos is not an array".into(),
                    })?
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect();
                let list = TodoList::from_descriptions(descriptions);
                self.machine
                    .data_mut()
                    .stamp_completed(keys::TODO_COLLECTION_COMPLETED_AT);
                Ok(Step::to(CoderState::Coding).with(keys::TODO_LIST, list))
            }
            other => Err(AgentError::Internal(format!(
                "todo collection did not produce a list: {other:?}"
            ))),
        }
    }

    pub(crate) async fn handle_coding(&mut self) -> Result<Step, AgentError> {
        let loops = self.machine.data_mut().increment(keys::CODING_ITERATIONS);
        if loops >= self.cfg.budgets.coding_max_loops {
            return Ok(self.budget_review_step(CoderState::Coding, loops));
        }

        if loops == 1 {
            let story_id = self.require_str(keys::STORY_ID)?;
            let task = self.require_str(keys::TASK_CONTENT)?;
            let plan = self.require_str(keys::PLAN)?;
            let todo_list: TodoList = self
                .machine
                .data()
                .get_as(keys::TODO_LIST)
                .unwrap_or_default();
            let system = self.render(names::CODING_SYSTEM, &[]);
            let prompt = self.render(
                names::CODING_TASK,
                &[
                    ("STORY_ID", story_id),
                    ("TASK_CONTENT", task),
                    ("PLAN", plan),
                    ("TODO_LIST", todo_list.render()),
                ],
            );
            self.ctx.reset_for_template(system, prompt);
        }

        // Session resume: when both the session handle and a resume input
        // are present, the resume input opens the new turn and is cleared.
        let session_id = self
            .machine
            .data()
            .get_str(keys::CODING_SESSION_ID)
            .map(String::from);
        let resume_input = self
            .machine
            .data_mut()
            .take(keys::RESUME_INPUT)
            .and_then(|v| v.as_str().map(String::from));
        if let Some(input) = &resume_input {
            self.ctx.add_user(input.clone());
        }

        let tool_loop = ToolLoop::new(
            self.deps.llm.clone(),
            self.coding_tools.clone(),
            [crate::tools::TOOL_DONE.to_string()],
            ToolLoopConfig {
                max_iterations: self.cfg.budgets.coding_max_iterations,
                max_reply_tokens: self.cfg.llm.max_reply_tokens,
                session_id,
                on_limit: None,
            },
        );
        let run = tool_loop.run(&mut self.ctx, None).await;
        self.remember_session(&run);

        match run.outcome {
            LoopOutcome::Terminal { .. } => {
                self.machine
                    .data_mut()
                    .stamp_completed(keys::CODING_COMPLETED_AT);
                Ok(Step::to(CoderState::Testing))
            }
            LoopOutcome::ProcessEffect { signal, data }
                if signal == crate::tools::SIGNAL_QUESTION =>
            {
                Ok(self.question_step(CoderState::Coding, &data))
            }
            LoopOutcome::ProcessEffect { signal, .. } => Err(AgentError::Internal(format!(
                "unknown process effect signal: {signal}"
            ))),
            LoopOutcome::IterationLimit { .. } => {
                Ok(self.budget_review_step(CoderState::Coding, loops))
            }
            LoopOutcome::NoToolTwice => Err(AgentError::Internal(
                "coding stalled: no tool calls twice".into(),
            )),
            LoopOutcome::LlmError(msg) => Err(AgentError::Llm(msg)),
            LoopOutcome::ExtractionError(msg) => Err(AgentError::Extraction {
                what: "coding result",
                detail: msg,
            }),
        }
    }

    fn remember_session(&mut self, run: &LoopRun) {
        if let Some(session) = &run.session_id {
            self.machine
                .data_mut()
                .set(keys::CODING_SESSION_ID, session);
        }
    }

    /// Builds the budget-review detour: summarize recent activity, record
    /// the origin, stash the effect, and gate on BUDGET_REVIEW.
    fn budget_review_step(&mut self, origin: CoderState, loops: u32) -> Step {
        let max_loops = match origin {
            CoderState::Planning => self.cfg.budgets.planning_max_loops,
            _ => self.cfg.budgets.coding_max_loops,
        };
        let effect = Effect::BudgetReview {
            loops,
            max_loops,
            origin_state: origin.as_str().to_string(),
            recent_activity_summary: self.recent_activity_summary(),
        };
        tracing::info!(origin = %origin, loops, "iteration budget reached; requesting review");
        Step::to(CoderState::BudgetReview)
            .with(keys::ORIGIN, origin.as_str())
            .with(keys::BUDGET_REVIEW_EFFECT, effect)
    }

    fn question_step(&mut self, origin: CoderState, data: &serde_json::Value) -> Step {
        let urgency = match data["urgency"].as_str() {
            Some("low") => Urgency::Low,
            Some("high") => Urgency::High,
            _ => Urgency::Medium,
        };
        let effect = Effect::Question {
            question: data["question"].as_str().unwrap_or_default().to_string(),
            context: data["context"].as_str().unwrap_or_default().to_string(),
            urgency,
            origin_state: origin.as_str().to_string(),
        };
        Step::to(CoderState::Question)
            .with(keys::ORIGIN, origin.as_str())
            .with(keys::QUESTION_EFFECT, effect)
    }

    /// Summary of the last few tool calls, flagging a command that keeps
    /// failing the same way.
    fn recent_activity_summary(&self) -> String {
        use crate::message::Message;

        let mut calls: Vec<(String, bool)> = Vec::new();
        let mut error_by_call: std::collections::HashMap<String, bool> =
            std::collections::HashMap::new();
        for msg in self.ctx.messages() {
            if let Message::User { tool_results, .. } = msg {
                for r in tool_results {
                    error_by_call.insert(r.tool_call_id.clone(), r.is_error);
                }
            }
        }
        for msg in self.ctx.messages() {
            if let Message::Assistant { tool_calls, .. } = msg {
                for c in tool_calls {
                    let failed = error_by_call.get(&c.id).copied().unwrap_or(false);
                    calls.push((c.name.clone(), failed));
                }
            }
        }

        let tail: Vec<(String, bool)> = calls
            .iter()
            .rev()
            .take(ACTIVITY_WINDOW)
            .rev()
            .cloned()
            .collect();
        let mut lines: Vec<String> = tail
            .iter()
            .map(|(name, failed)| {
                if *failed {
                    format!("- {name} (failed)")
                } else {
                    format!("- {name}")
                }
            })
            .collect();

        let mut failure_counts: std::collections::HashMap<&str, usize> =
            std::collections::HashMap::new();
        for (name, failed) in &tail {
            if *failed {
                *failure_counts.entry(name.as_str()).or_default() += 1;
            }
        }
        if let Some((name, count)) = failure_counts.iter().max_by_key(|(_, c)| **c) {
            if *count >= 2 {
                lines.push(format!("repeating failure: {name} failed {count} times"));
            }
        }

        if lines.is_empty() {
            "no tool calls recorded".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn extract_str(data: &serde_json::Value, field: &'static str) -> Result<String, AgentError> {
    data[field]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or(AgentError::Extraction {
            what: field,
            detail: format!("missing field {field}"),
        })
}
