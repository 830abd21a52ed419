//! Tool trait and registry.
//!
//! The core never interprets tool semantics; it dispatches calls against a
//! registry and records results. A tool may return an embedded
//! process-effect signal, which short-circuits the tool loop (used by
//! `ask_question`).

mod protocol;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use protocol::{
    AskQuestionTool, DoneTool, SubmitPlanTool, TodosAddTool, SIGNAL_QUESTION, TOOL_ASK_QUESTION,
    TOOL_DONE, TOOL_SUBMIT_PLAN, TOOL_TODOS_ADD,
};

/// Specification for one tool: name, description and JSON argument schema,
/// shipped to the LLM with every completion request.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Signal a tool can raise to divert the agent out of its current loop.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessEffect {
    pub signal: String,
    pub data: serde_json::Value,
}

/// Result of one tool execution.
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    pub content: String,
    /// Structured payload for terminal tools (plan, todos, …).
    pub data: serde_json::Value,
    pub process_effect: Option<ProcessEffect>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("execution: {0}")]
    Execution(String),
}

/// A single tool callable by the LLM.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within one registry.
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    async fn call(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Tools available in one phase, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Specs of every registered tool, in name order for stable prompts.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|n| self.tools[n].spec())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".into(),
                description: Some("echoes".into()),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn call(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(args.to_string()))
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo));
        let tool = reg.get("echo").unwrap();
        let out = tool.call(serde_json::json!({"x": 1})).await.unwrap();
        assert!(out.content.contains("\"x\":1"));
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn specs_are_name_ordered() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo));
        let specs = reg.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
    }
}
