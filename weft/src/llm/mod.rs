//! LLM client abstraction for the tool loop.
//!
//! The tool loop depends on a chat-completion capability that takes the
//! context snapshot plus tool schemas and returns assistant text with
//! optional tool calls; this module defines the trait and a scripted mock.
//! The vendor client itself lives outside this crate.

mod mock;

use async_trait::async_trait;

use crate::message::{Message, ToolCall};
use crate::tools::ToolSpec;

pub use mock::MockLlm;

/// One completion request: context snapshot, tool schemas, reply budget,
/// and an optional vendor session to resume.
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
    /// Vendor session to resume, when the client supports it.
    pub session_id: Option<String>,
}

/// Assistant reply: text plus zero or more tool calls.
#[derive(Clone, Debug, Default)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Vendor session handle for later resumption.
    pub session_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm transport: {0}")]
    Transport(String),
    #[error("llm response malformed: {0}")]
    Malformed(String),
}

/// Chat-completion capability.
///
/// **Interaction**: called once per tool-loop iteration with the current
/// context snapshot; the loop dispatches the returned tool calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
