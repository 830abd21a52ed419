//! Error type for the agent core.
//!
//! Fatal paths (mirror failure, persistence failure, abandoned task) end the
//! story in ERROR; transient externals are handed back to CODING as
//! `resume_input` and never appear here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("llm: {0}")]
    Llm(String),

    #[error("tool {name}: {message}")]
    Tool { name: String, message: String },

    #[error("extracting {what} from tool result: {detail}")]
    Extraction { what: &'static str, detail: String },

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("state data missing key {0}")]
    MissingStateData(&'static str),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("workspace: {0}")]
    Workspace(#[from] weft_workspace::WorkspaceError),

    #[error("forge: {0}")]
    Forge(#[from] forge::ForgeError),

    #[error("effect wait cancelled")]
    EffectCancelled,

    #[error("effect channel closed")]
    EffectChannelClosed,

    #[error("story channel closed while waiting")]
    StoryChannelClosed,

    #[error("task abandoned: {0}")]
    Abandoned(String),

    #[error("merge pipeline stuck: {0}")]
    MergeStuck(String),

    #[error("merge pipeline exhausted: {0}")]
    MergeExhausted(String),

    #[error("{0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_contains_context() {
        let e = AgentError::InvalidTransition {
            from: "DONE".into(),
            to: "CODING".into(),
        };
        assert!(e.to_string().contains("DONE"));
        assert!(e.to_string().contains("CODING"));

        let e = AgentError::MergeStuck("remote head unchanged".into());
        assert!(e.to_string().contains("stuck"));
    }
}
