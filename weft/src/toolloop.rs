//! Tool loop: the iterative LLM-call/tool-dispatch driver for one phase.
//!
//! Each iteration snapshots the context, asks the LLM for a completion with
//! the phase's tool schemas, dispatches returned calls in emitted order and
//! collates results into the pending user buffer. The loop ends when a
//! terminal tool succeeds, a tool raises a process-effect signal, the
//! iteration budget runs out, or the LLM stops calling tools twice in a row.

use std::collections::HashSet;
use std::sync::Arc;

use crate::context::ContextManager;
use crate::llm::{CompletionRequest, LlmClient};
use crate::tools::ToolRegistry;

/// Grants extra iterations when the loop hits its budget. Returning `None`
/// lets the loop end with [`LoopOutcome::IterationLimit`].
pub type OnIterationLimit = Arc<dyn Fn(u32) -> Option<u32> + Send + Sync>;

pub struct ToolLoopConfig {
    pub max_iterations: u32,
    pub max_reply_tokens: u32,
    /// Vendor session to resume, fed into the first request.
    pub session_id: Option<String>,
    pub on_limit: Option<OnIterationLimit>,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            max_reply_tokens: 4096,
            session_id: None,
            on_limit: None,
        }
    }
}

/// Why the loop ended.
#[derive(Clone, Debug)]
pub enum LoopOutcome {
    /// A terminal tool succeeded; `data` is its structured payload.
    Terminal {
        tool: String,
        data: serde_json::Value,
    },
    /// A tool raised a process-effect signal, short-circuiting the loop.
    ProcessEffect {
        signal: String,
        data: serde_json::Value,
    },
    /// The iteration budget ran out (after any escalation grant).
    IterationLimit { iterations: u32 },
    /// Two consecutive assistant turns carried no tool calls.
    NoToolTwice,
    LlmError(String),
    /// A terminal payload failed to parse into its expected shape.
    ExtractionError(String),
}

/// What one run produced, plus bookkeeping the orchestrator persists.
pub struct LoopRun {
    pub outcome: LoopOutcome,
    /// Last vendor session id observed, for later resumption.
    pub session_id: Option<String>,
    pub iterations: u32,
}

pub struct ToolLoop {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    terminal: HashSet<String>,
    cfg: ToolLoopConfig,
}

impl ToolLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        terminal: impl IntoIterator<Item = String>,
        cfg: ToolLoopConfig,
    ) -> Self {
        Self {
            llm,
            tools,
            terminal: terminal.into_iter().collect(),
            cfg,
        }
    }

    /// Drives the loop to an outcome. An optional initial prompt is pushed
    /// as a user message before the first iteration; otherwise the loop
    /// works from whatever the context already holds.
    pub async fn run(&self, ctx: &mut ContextManager, initial_prompt: Option<String>) -> LoopRun {
        if let Some(prompt) = initial_prompt {
            ctx.add_user(prompt);
        }

        let mut session_id = self.cfg.session_id.clone();
        let mut effective_max = self.cfg.max_iterations;
        let mut empty_turns = 0u32;
        let mut iteration = 0u32;

        loop {
            if iteration >= effective_max {
                if let Some(cb) = &self.cfg.on_limit {
                    if let Some(extended) = cb(iteration) {
                        tracing::info!(iteration, extended, "iteration budget extended");
                        effective_max = extended.max(effective_max);
                    }
                }
                if iteration >= effective_max {
                    return LoopRun {
                        outcome: LoopOutcome::IterationLimit { iterations: iteration },
                        session_id,
                        iterations: iteration,
                    };
                }
            }
            iteration += 1;

            let messages = ctx.snapshot();
            let response = match self
                .llm
                .complete(CompletionRequest {
                    messages,
                    tools: self.tools.specs(),
                    max_tokens: self.cfg.max_reply_tokens,
                    session_id: session_id.clone(),
                })
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    return LoopRun {
                        outcome: LoopOutcome::LlmError(e.to_string()),
                        session_id,
                        iterations: iteration,
                    };
                }
            };
            if response.session_id.is_some() {
                session_id = response.session_id.clone();
            }

            if response.tool_calls.is_empty() {
                ctx.add_message(crate::message::Message::assistant(response.content));
                empty_turns += 1;
                tracing::debug!(iteration, empty_turns, "assistant turn without tool calls");
                if empty_turns >= 2 {
                    return LoopRun {
                        outcome: LoopOutcome::NoToolTwice,
                        session_id,
                        iterations: iteration,
                    };
                }
                continue;
            }
            empty_turns = 0;

            ctx.add_assistant_with_tools(response.content, response.tool_calls.clone());

            for call in &response.tool_calls {
                let Some(tool) = self.tools.get(&call.name) else {
                    tracing::warn!(tool = %call.name, "unknown tool call");
                    ctx.add_tool_result(
                        call.id.clone(),
                        format!("unknown tool: {}", call.name),
                        true,
                    );
                    continue;
                };
                match tool.call(call.params.clone()).await {
                    Err(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "tool failed");
                        ctx.add_tool_result(call.id.clone(), e.to_string(), true);
                    }
                    Ok(output) => {
                        ctx.add_tool_result(call.id.clone(), output.content.clone(), false);
                        if let Some(effect) = output.process_effect {
                            ctx.flush_user_buffer();
                            return LoopRun {
                                outcome: LoopOutcome::ProcessEffect {
                                    signal: effect.signal,
                                    data: effect.data,
                                },
                                session_id,
                                iterations: iteration,
                            };
                        }
                        if self.terminal.contains(&call.name) {
                            ctx.flush_user_buffer();
                            return LoopRun {
                                outcome: LoopOutcome::Terminal {
                                    tool: call.name.clone(),
                                    data: output.data,
                                },
                                session_id,
                                iterations: iteration,
                            };
                        }
                    }
                }
            }

            ctx.flush_user_buffer();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::context::{ContextLimits, ContextManager};
    use crate::llm::MockLlm;
    use crate::message::Message;
    use crate::tools::{DoneTool, SubmitPlanTool, ToolRegistry, TOOL_DONE};

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(DoneTool));
        reg.register(Arc::new(SubmitPlanTool));
        reg.register(Arc::new(crate::tools::AskQuestionTool));
        Arc::new(reg)
    }

    fn ctx() -> ContextManager {
        let mut ctx = ContextManager::new(ContextLimits::default());
        ctx.add_system("you are a coder");
        ctx
    }

    fn loop_with(llm: Arc<MockLlm>, cfg: ToolLoopConfig) -> ToolLoop {
        ToolLoop::new(llm, registry(), [TOOL_DONE.to_string()], cfg)
    }

    #[tokio::test]
    async fn terminal_tool_ends_loop_with_data() {
        let llm = Arc::new(MockLlm::new());
        llm.push_tool_call("done", serde_json::json!({"summary": "all green"}));
        let mut ctx = ctx();

        let run = loop_with(llm, ToolLoopConfig::default())
            .run(&mut ctx, Some("implement the endpoint".into()))
            .await;

        match run.outcome {
            LoopOutcome::Terminal { tool, data } => {
                assert_eq!(tool, "done");
                assert_eq!(data["summary"], "all green");
            }
            other => panic!("expected terminal, got {other:?}"),
        }
        assert_eq!(run.iterations, 1);
        // The tool result was flushed into a user message.
        assert!(matches!(
            ctx.messages().last().unwrap(),
            Message::User { tool_results, .. } if tool_results.len() == 1
        ));
    }

    #[tokio::test]
    async fn two_empty_turns_end_loop() {
        let llm = Arc::new(MockLlm::new());
        llm.push_text("thinking...").push_text("still thinking...");
        let mut ctx = ctx();

        let run = loop_with(llm, ToolLoopConfig::default())
            .run(&mut ctx, None)
            .await;
        assert!(matches!(run.outcome, LoopOutcome::NoToolTwice));
        assert_eq!(run.iterations, 2);
    }

    #[tokio::test]
    async fn single_empty_turn_recovers() {
        let llm = Arc::new(MockLlm::new());
        llm.push_text("let me think");
        llm.push_tool_call("done", serde_json::json!({}));
        let mut ctx = ctx();

        let run = loop_with(llm, ToolLoopConfig::default())
            .run(&mut ctx, None)
            .await;
        assert!(matches!(run.outcome, LoopOutcome::Terminal { .. }));
    }

    #[tokio::test]
    async fn zero_budget_exits_immediately_without_llm_call() {
        let llm = Arc::new(MockLlm::new());
        let mut ctx = ctx();
        let before = ctx.len();

        let run = loop_with(
            llm.clone(),
            ToolLoopConfig {
                max_iterations: 0,
                ..Default::default()
            },
        )
        .run(&mut ctx, None)
        .await;

        assert!(matches!(
            run.outcome,
            LoopOutcome::IterationLimit { iterations: 0 }
        ));
        assert_eq!(ctx.len(), before);
        assert!(llm.seen_requests().is_empty());
    }

    #[tokio::test]
    async fn escalation_callback_extends_budget_once() {
        let llm = Arc::new(MockLlm::new());
        // Three content-free tool rounds, then the terminal.
        for _ in 0..3 {
            llm.push_tool_call("submit_plan", serde_json::json!({"bogus": true}));
        }
        llm.push_tool_call("done", serde_json::json!({}));

        let grants = Arc::new(AtomicU32::new(0));
        let grants_seen = grants.clone();
        let cfg = ToolLoopConfig {
            max_iterations: 2,
            on_limit: Some(Arc::new(move |at| {
                grants_seen.fetch_add(1, Ordering::SeqCst);
                // One grant of 4 total iterations, then give up.
                (at == 2).then_some(4)
            })),
            ..Default::default()
        };

        let mut ctx = ctx();
        let run = loop_with(llm, cfg).run(&mut ctx, None).await;
        assert!(matches!(run.outcome, LoopOutcome::Terminal { .. }));
        assert_eq!(grants.load(Ordering::SeqCst), 1);
        assert_eq!(run.iterations, 4);
    }

    #[tokio::test]
    async fn llm_transport_error_surfaces() {
        let llm = Arc::new(MockLlm::new());
        llm.push_error("connection reset");
        let mut ctx = ctx();
        let run = loop_with(llm, ToolLoopConfig::default())
            .run(&mut ctx, None)
            .await;
        match run.outcome {
            LoopOutcome::LlmError(msg) => assert!(msg.contains("connection reset")),
            other => panic!("expected llm error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_tool_records_error_result_and_continues() {
        let llm = Arc::new(MockLlm::new());
        // submit_plan with bad args fails; loop keeps going to done.
        llm.push_tool_call("submit_plan", serde_json::json!({}));
        llm.push_tool_call("done", serde_json::json!({}));
        let mut ctx = ctx();

        let run = loop_with(llm, ToolLoopConfig::default())
            .run(&mut ctx, None)
            .await;
        assert!(matches!(run.outcome, LoopOutcome::Terminal { .. }));

        let error_results: Vec<bool> = ctx
            .messages()
            .iter()
            .filter_map(|m| match m {
                Message::User { tool_results, .. } if !tool_results.is_empty() => {
                    Some(tool_results[0].is_error)
                }
                _ => None,
            })
            .collect();
        assert_eq!(error_results, vec![true, false]);
    }

    #[tokio::test]
    async fn process_effect_short_circuits() {
        let llm = Arc::new(MockLlm::new());
        llm.push_tool_call(
            "ask_question",
            serde_json::json!({"question": "deploy target?"}),
        );
        let mut ctx = ctx();

        let run = loop_with(llm, ToolLoopConfig::default())
            .run(&mut ctx, None)
            .await;
        match run.outcome {
            LoopOutcome::ProcessEffect { signal, data } => {
                assert_eq!(signal, crate::tools::SIGNAL_QUESTION);
                assert_eq!(data["question"], "deploy target?");
            }
            other => panic!("expected process effect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_id_from_config_reaches_first_request() {
        let llm = Arc::new(MockLlm::new());
        llm.push_tool_call("done", serde_json::json!({}));
        let mut ctx = ctx();

        let cfg = ToolLoopConfig {
            session_id: Some("sess-9".into()),
            ..Default::default()
        };
        loop_with(llm.clone(), cfg).run(&mut ctx, None).await;
        assert_eq!(
            llm.seen_requests()[0].session_id.as_deref(),
            Some("sess-9")
        );
    }
}
