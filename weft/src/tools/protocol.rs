//! Phase protocol tools.
//!
//! These are the terminal tools of each phase: `submit_plan` ends PLANNING,
//! `todos_add` ends TODO_COLLECTION, `done` ends CODING. `ask_question`
//! raises a process-effect signal that diverts the agent into QUESTION.
//! Each tool validates its arguments and returns them as structured data;
//! the orchestrator interprets the payloads.

use async_trait::async_trait;
use serde_json::json;

use super::{ProcessEffect, Tool, ToolError, ToolOutput, ToolSpec};

pub const TOOL_SUBMIT_PLAN: &str = "submit_plan";
pub const TOOL_TODOS_ADD: &str = "todos_add";
pub const TOOL_DONE: &str = "done";
pub const TOOL_ASK_QUESTION: &str = "ask_question";

/// Signal raised by [`AskQuestionTool`].
pub const SIGNAL_QUESTION: &str = "question";

fn require_str(args: &serde_json::Value, field: &str) -> Result<String, ToolError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing or empty '{field}'")))
}

fn optional_str(args: &serde_json::Value, field: &str) -> Option<String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(String::from)
}

fn string_array(args: &serde_json::Value, field: &str) -> Result<Vec<String>, ToolError> {
    match args.get(field) {
        None => Ok(Vec::new()),
        Some(v) => {
            let arr = v
                .as_array()
                .ok_or_else(|| ToolError::InvalidInput(format!("'{field}' must be an array")))?;
            arr.iter()
                .enumerate()
                .map(|(i, item)| {
                    item.as_str().map(String::from).ok_or_else(|| {
                        ToolError::InvalidInput(format!("{field}[{i}] must be a string"))
                    })
                })
                .collect()
        }
    }
}

/// Ends PLANNING with the plan body plus confidence, exploration notes,
/// risks and an initial todo sketch.
pub struct SubmitPlanTool;

#[async_trait]
impl Tool for SubmitPlanTool {
    fn name(&self) -> &str {
        TOOL_SUBMIT_PLAN
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_SUBMIT_PLAN.to_string(),
            description: Some(
                "Submit the implementation plan for review. Ends the planning phase.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "plan": { "type": "string" },
                    "confidence": { "type": "string", "enum": ["low", "medium", "high"] },
                    "exploration_summary": { "type": "string" },
                    "risks": { "type": "array", "items": { "type": "string" } },
                    "todos": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["plan", "confidence"]
            }),
        }
    }

    async fn call(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let plan = require_str(&args, "plan")?;
        let confidence = require_str(&args, "confidence")?;
        let exploration = optional_str(&args, "exploration_summary").unwrap_or_default();
        let risks = string_array(&args, "risks")?;
        let todos = string_array(&args, "todos")?;
        Ok(ToolOutput {
            content: "plan submitted".to_string(),
            data: json!({
                "plan": plan,
                "confidence": confidence,
                "exploration_summary": exploration,
                "risks": risks,
                "todos": todos,
            }),
            process_effect: None,
        })
    }
}

/// Replaces the todo list. The only tool enabled during TODO_COLLECTION.
pub struct TodosAddTool;

#[async_trait]
impl Tool for TodosAddTool {
    fn name(&self) -> &str {
        TOOL_TODOS_ADD
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_TODOS_ADD.to_string(),
            description: Some("Record the ordered todo list for this story.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "todos": { "type": "array", "items": { "type": "string" }, "minItems": 1 }
                },
                "required": ["todos"]
            }),
        }
    }

    async fn call(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let todos = string_array(&args, "todos")?;
        if todos.is_empty() {
            return Err(ToolError::InvalidInput("'todos' must not be empty".into()));
        }
        Ok(ToolOutput {
            content: format!("{} todo(s) recorded", todos.len()),
            data: json!({ "todos": todos }),
            process_effect: None,
        })
    }
}

/// Ends CODING; the orchestrator moves on to TESTING.
pub struct DoneTool;

#[async_trait]
impl Tool for DoneTool {
    fn name(&self) -> &str {
        TOOL_DONE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_DONE.to_string(),
            description: Some(
                "Declare the implementation complete and ready for testing.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string" }
                }
            }),
        }
    }

    async fn call(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let summary = optional_str(&args, "summary").unwrap_or_default();
        Ok(ToolOutput {
            content: "implementation marked done".to_string(),
            data: json!({ "summary": summary }),
            process_effect: None,
        })
    }
}

/// Raises a question for the supervisor; short-circuits the tool loop.
pub struct AskQuestionTool;

#[async_trait]
impl Tool for AskQuestionTool {
    fn name(&self) -> &str {
        TOOL_ASK_QUESTION
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_ASK_QUESTION.to_string(),
            description: Some(
                "Ask the supervisor a blocking question. Use sparingly.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string" },
                    "context": { "type": "string" },
                    "urgency": { "type": "string", "enum": ["low", "medium", "high"] }
                },
                "required": ["question"]
            }),
        }
    }

    async fn call(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let question = require_str(&args, "question")?;
        let context = optional_str(&args, "context").unwrap_or_default();
        let urgency = optional_str(&args, "urgency").unwrap_or_else(|| "medium".to_string());
        let data = json!({
            "question": question,
            "context": context,
            "urgency": urgency,
        });
        Ok(ToolOutput {
            content: "question raised".to_string(),
            data: data.clone(),
            process_effect: Some(ProcessEffect {
                signal: SIGNAL_QUESTION.to_string(),
                data,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_plan_requires_plan_and_confidence() {
        let tool = SubmitPlanTool;
        let err = tool.call(json!({"confidence": "high"})).await.unwrap_err();
        assert!(err.to_string().contains("plan"));

        let out = tool
            .call(json!({
                "plan": "add /health endpoint",
                "confidence": "high",
                "risks": ["route collision"],
                "todos": ["write handler", "add test"]
            }))
            .await
            .unwrap();
        assert_eq!(out.data["confidence"], "high");
        assert_eq!(out.data["todos"].as_array().unwrap().len(), 2);
        assert!(out.process_effect.is_none());
    }

    #[tokio::test]
    async fn todos_add_rejects_empty_and_non_string_items() {
        let tool = TodosAddTool;
        assert!(tool.call(json!({"todos": []})).await.is_err());
        assert!(tool.call(json!({"todos": [1, 2]})).await.is_err());
        let out = tool.call(json!({"todos": ["a", "b"]})).await.unwrap();
        assert!(out.content.contains("2 todo"));
    }

    #[tokio::test]
    async fn ask_question_raises_signal_with_default_urgency() {
        let tool = AskQuestionTool;
        let out = tool
            .call(json!({"question": "which port?"}))
            .await
            .unwrap();
        let effect = out.process_effect.unwrap();
        assert_eq!(effect.signal, SIGNAL_QUESTION);
        assert_eq!(effect.data["urgency"], "medium");
    }

    #[tokio::test]
    async fn done_accepts_missing_summary() {
        let out = DoneTool.call(json!({})).await.unwrap();
        assert_eq!(out.data["summary"], "");
    }
}
