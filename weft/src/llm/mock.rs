//! Scripted LLM mock for tests: returns queued responses in order.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError};
use crate::message::ToolCall;

/// Mock LLM that pops pre-scripted responses.
///
/// Requests beyond the script return an empty assistant turn. Received
/// requests are recorded for assertions (`seen_requests`).
#[derive(Default)]
pub struct MockLlm {
    script: Mutex<std::collections::VecDeque<Result<CompletionResponse, String>>>,
    seen: Mutex<Vec<RecordedRequest>>,
}

/// What the mock remembers about one request.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub message_count: usize,
    pub tool_names: Vec<String>,
    pub session_id: Option<String>,
    pub last_user_content: Option<String>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a plain text reply with no tool calls.
    pub fn push_text(&self, content: impl Into<String>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(CompletionResponse {
                content: content.into(),
                tool_calls: Vec::new(),
                session_id: None,
            }));
        self
    }

    /// Queues a reply carrying one tool call.
    pub fn push_tool_call(&self, name: &str, params: serde_json::Value) -> &Self {
        let mut script = self.script.lock().unwrap();
        let call_no = script.len() + 1;
        script.push_back(Ok(CompletionResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: format!("call-{call_no}"),
                    name: name.to_string(),
                    params,
                }],
                session_id: None,
            }));
        self
    }

    /// Queues a transport failure.
    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(message.into()));
        self
    }

    pub fn seen_requests(&self) -> Vec<RecordedRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let last_user_content = req
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                crate::message::Message::User { content, .. } => Some(content.clone()),
                _ => None,
            });
        self.seen.lock().unwrap().push(RecordedRequest {
            message_count: req.messages.len(),
            tool_names: req.tools.iter().map(|t| t.name.clone()).collect(),
            session_id: req.session_id.clone(),
            last_user_content,
        });

        match self.script.lock().unwrap().pop_front() {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(LlmError::Transport(msg)),
            None => Ok(CompletionResponse::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn scripted_responses_pop_in_order_then_empty() {
        let llm = MockLlm::new();
        llm.push_text("first")
            .push_tool_call("done", serde_json::json!({}));

        let req = |msgs: Vec<Message>| CompletionRequest {
            messages: msgs,
            tools: vec![],
            max_tokens: 100,
            session_id: None,
        };

        let a = llm.complete(req(vec![Message::user("hi")])).await.unwrap();
        assert_eq!(a.content, "first");
        let b = llm.complete(req(vec![])).await.unwrap();
        assert_eq!(b.tool_calls[0].name, "done");
        let c = llm.complete(req(vec![])).await.unwrap();
        assert!(c.content.is_empty() && c.tool_calls.is_empty());

        assert_eq!(llm.seen_requests().len(), 3);
        assert_eq!(
            llm.seen_requests()[0].last_user_content.as_deref(),
            Some("hi")
        );
    }

    #[tokio::test]
    async fn scripted_error_surfaces_as_transport() {
        let llm = MockLlm::new();
        llm.push_error("boom");
        let err = llm
            .complete(CompletionRequest {
                messages: vec![],
                tools: vec![],
                max_tokens: 1,
                session_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }
}
