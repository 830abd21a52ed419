//! Chat message types: the context log's unit of storage.
//!
//! A message is one of System / User / Assistant; tool calls ride on
//! assistant messages, tool results on the user message that answers them.

use serde::{Deserialize, Serialize};

/// A single tool invocation emitted by the LLM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub params: serde_json::Value,
}

/// Result of one tool execution, correlated by `tool_call_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// One entry in the context log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_results: Vec<ToolResult>,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            tool_results: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content, .. }
            | Self::Assistant { content, .. } => content,
        }
    }

    /// Rough size of this message in characters, tool payloads included.
    pub fn char_len(&self) -> usize {
        match self {
            Self::System { content } => content.len(),
            Self::User {
                content,
                tool_results,
            } => {
                content.len()
                    + tool_results
                        .iter()
                        .map(|r| r.content.len() + r.tool_call_id.len())
                        .sum::<usize>()
            }
            Self::Assistant {
                content,
                tool_calls,
            } => {
                content.len()
                    + tool_calls
                        .iter()
                        .map(|c| c.name.len() + c.params.to_string().len())
                        .sum::<usize>()
            }
        }
    }
}
