//! Placeholder substitution for config values.
//!
//! `{STORY_ID}` appears in `git.branch_pattern`; `{AGENT_ID}` in
//! `git.git_user_name` / `git.git_user_email`. Plain literal replacement,
//! no escaping.

/// Replaces every `{STORY_ID}` in `pattern` with `story_id`.
pub fn substitute_story_id(pattern: &str, story_id: &str) -> String {
    pattern.replace("{STORY_ID}", story_id)
}

/// Replaces every `{AGENT_ID}` in `pattern` with `agent_id`.
pub fn substitute_agent_id(pattern: &str, agent_id: &str) -> String {
    pattern.replace("{AGENT_ID}", agent_id)
}
