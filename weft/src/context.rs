//! Context manager: append-only message log plus a pending user buffer.
//!
//! Tool results and interim user text accumulate in the buffer between LLM
//! turns and are flushed into the log as a single user message when the next
//! turn starts. The manager owns token accounting and the drop-oldest
//! compaction policy; other components only ever see snapshots.

use crate::message::{Message, ToolCall, ToolResult};

/// Messages at the tail of the log that compaction never drops.
const KEEP_TRAILING: usize = 4;

/// Fixed per-message token overhead added to the chars/4 estimate.
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Token limits for one context window.
#[derive(Clone, Copy, Debug)]
pub struct ContextLimits {
    pub max_context_tokens: u32,
    pub reply_reserve_tokens: u32,
    pub compaction_buffer_tokens: u32,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_context_tokens: 128_000,
            reply_reserve_tokens: 4096,
            compaction_buffer_tokens: 8192,
        }
    }
}

impl ContextLimits {
    /// Tokens the log may occupy before compaction starts dropping.
    fn budget(&self) -> usize {
        self.max_context_tokens
            .saturating_sub(self.reply_reserve_tokens)
            .saturating_sub(self.compaction_buffer_tokens) as usize
    }
}

/// Estimated tokens for one message: chars/4 rounded up, plus overhead.
fn estimate_tokens(msg: &Message) -> usize {
    msg.char_len().div_ceil(4) + PER_MESSAGE_OVERHEAD
}

/// Owns the ordered message log for one agent.
#[derive(Debug, Default)]
pub struct ContextManager {
    log: Vec<Message>,
    buffered_results: Vec<ToolResult>,
    buffered_text: Vec<String>,
    limits: ContextLimits,
}

impl ContextManager {
    pub fn new(limits: ContextLimits) -> Self {
        Self {
            log: Vec::new(),
            buffered_results: Vec::new(),
            buffered_text: Vec::new(),
            limits,
        }
    }

    pub fn add_message(&mut self, msg: Message) {
        self.log.push(msg);
    }

    pub fn add_system(&mut self, content: impl Into<String>) {
        self.log.push(Message::system(content));
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.log.push(Message::user(content));
    }

    pub fn add_assistant_with_tools(&mut self, content: String, tool_calls: Vec<ToolCall>) {
        self.log.push(Message::Assistant {
            content,
            tool_calls,
        });
    }

    /// Buffers one tool result; it reaches the log at the next flush.
    pub fn add_tool_result(&mut self, tool_call_id: String, content: String, is_error: bool) {
        self.buffered_results.push(ToolResult {
            tool_call_id,
            content,
            is_error,
        });
    }

    /// Buffers user text alongside pending tool results.
    pub fn append_user_text(&mut self, text: impl Into<String>) {
        self.buffered_text.push(text.into());
    }

    /// Moves buffered tool results plus appended user text into the log as a
    /// single user message, then clears the buffer. No-op when empty.
    pub fn flush_user_buffer(&mut self) {
        if self.buffered_results.is_empty() && self.buffered_text.is_empty() {
            return;
        }
        let content = self.buffered_text.join("\n");
        let tool_results = std::mem::take(&mut self.buffered_results);
        self.buffered_text.clear();
        self.log.push(Message::User {
            content,
            tool_results,
        });
    }

    /// Atomically replaces the log with `[system, user]` and resets the
    /// buffer; used when entering a phase with a fresh template.
    pub fn reset_for_template(&mut self, system_prompt: String, initial_prompt: String) {
        self.log.clear();
        self.buffered_results.clear();
        self.buffered_text.clear();
        self.log.push(Message::System {
            content: system_prompt,
        });
        self.log.push(Message::user(initial_prompt));
    }

    /// Immutable copy of the log for an LLM call, compacted to fit the
    /// window first.
    pub fn snapshot(&mut self) -> Vec<Message> {
        self.compact_to_fit();
        self.log.clone()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    pub fn has_buffered(&self) -> bool {
        !self.buffered_results.is_empty() || !self.buffered_text.is_empty()
    }

    fn projected_tokens(&self) -> usize {
        self.log.iter().map(estimate_tokens).sum()
    }

    /// Drops the oldest non-system messages until the projection fits.
    ///
    /// Never drops the trailing [`KEEP_TRAILING`] messages, and drops an
    /// assistant tool-call message together with the user message holding
    /// its results so the pairing survives.
    fn compact_to_fit(&mut self) {
        let budget = self.limits.budget();
        while self.projected_tokens() > budget {
            let Some(idx) = self
                .log
                .iter()
                .position(|m| !matches!(m, Message::System { .. }))
            else {
                return;
            };
            if self.log.len().saturating_sub(idx) <= KEEP_TRAILING {
                return;
            }

            let paired = matches!(
                (&self.log[idx], self.log.get(idx + 1)),
                (
                    Message::Assistant { tool_calls, .. },
                    Some(Message::User { tool_results, .. })
                ) if !tool_calls.is_empty() && !tool_results.is_empty()
            );
            if paired {
                if self.log.len() - (idx + 1) <= KEEP_TRAILING {
                    return;
                }
                tracing::debug!(dropped = 2, "compacting paired tool-call messages");
                self.log.drain(idx..=idx + 1);
            } else {
                tracing::debug!(dropped = 1, "compacting oldest message");
                self.log.remove(idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_limits(budget_tokens: u32) -> ContextLimits {
        ContextLimits {
            max_context_tokens: budget_tokens,
            reply_reserve_tokens: 0,
            compaction_buffer_tokens: 0,
        }
    }

    #[test]
    fn flush_collates_results_and_text_into_one_user_message() {
        let mut ctx = ContextManager::new(ContextLimits::default());
        ctx.add_system("sys");
        ctx.add_tool_result("c1".into(), "ok".into(), false);
        ctx.add_tool_result("c2".into(), "boom".into(), true);
        ctx.append_user_text("continue with the next todo");
        ctx.flush_user_buffer();

        assert_eq!(ctx.len(), 2);
        match &ctx.messages()[1] {
            Message::User {
                content,
                tool_results,
            } => {
                assert_eq!(content, "continue with the next todo");
                assert_eq!(tool_results.len(), 2);
                assert!(tool_results[1].is_error);
            }
            other => panic!("expected user message, got {other:?}"),
        }
        assert!(!ctx.has_buffered());
    }

    #[test]
    fn flush_on_empty_buffer_is_noop() {
        let mut ctx = ContextManager::new(ContextLimits::default());
        ctx.add_system("sys");
        ctx.flush_user_buffer();
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn reset_replaces_log_and_clears_buffer() {
        let mut ctx = ContextManager::new(ContextLimits::default());
        ctx.add_user("old");
        ctx.add_tool_result("c1".into(), "stale".into(), false);
        ctx.reset_for_template("new system".into(), "new task".into());

        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.messages()[0].role(), "system");
        assert_eq!(ctx.messages()[1].content(), "new task");
        assert!(!ctx.has_buffered());
    }

    #[test]
    fn compaction_drops_oldest_non_system_first() {
        let mut ctx = ContextManager::new(tight_limits(100));
        ctx.add_system("keep me");
        for i in 0..12 {
            ctx.add_user(format!("message {i}: {}", "x".repeat(80)));
        }
        let snap = ctx.snapshot();
        assert_eq!(snap[0].role(), "system");
        // The oldest user messages went first; the newest survive.
        assert_eq!(snap.last().unwrap().content().split(':').next(), Some("message 11"));
        assert!(snap.len() < 13);
    }

    #[test]
    fn compaction_never_drops_trailing_four() {
        let mut ctx = ContextManager::new(tight_limits(1));
        ctx.add_system("sys");
        for i in 0..4 {
            ctx.add_user(format!("tail {i}"));
        }
        let snap = ctx.snapshot();
        // Over budget, but only the system message plus the protected tail remain.
        assert_eq!(snap.len(), 5);
    }

    #[test]
    fn compaction_drops_tool_call_pairs_together() {
        let mut ctx = ContextManager::new(tight_limits(120));
        ctx.add_system("sys");
        ctx.add_assistant_with_tools(
            String::new(),
            vec![ToolCall {
                id: "c1".into(),
                name: "shell".into(),
                params: serde_json::json!({"cmd": "x".repeat(120)}),
            }],
        );
        ctx.log.push(Message::User {
            content: String::new(),
            tool_results: vec![ToolResult {
                tool_call_id: "c1".into(),
                content: "y".repeat(120),
                is_error: false,
            }],
        });
        for i in 0..6 {
            ctx.add_user(format!("later {i}"));
        }

        let snap = ctx.snapshot();
        // Neither half of the pair survives alone.
        let has_orphan_call = snap.iter().any(|m| matches!(m, Message::Assistant { tool_calls, .. } if !tool_calls.is_empty()));
        let has_orphan_result = snap.iter().any(|m| matches!(m, Message::User { tool_results, .. } if !tool_results.is_empty()));
        assert_eq!(has_orphan_call, has_orphan_result);
    }
}
