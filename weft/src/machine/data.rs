//! Keyed state data persisted alongside the state tag.
//!
//! Values are JSON so anything serializable can ride along. Timestamp keys,
//! once set, are never cleared; iteration counters only move up within one
//! origin phase and reset to zero when the origin is re-entered with
//! approval.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Well-known state-data keys.
pub mod keys {
    pub const TASK_CONTENT: &str = "task_content";
    pub const STORY_ID: &str = "story_id";
    pub const STORY_TYPE: &str = "story_type";
    /// Which phase initiated a BUDGET_REVIEW / QUESTION detour.
    pub const ORIGIN: &str = "origin";
    pub const PLAN: &str = "plan";
    pub const PLAN_CONFIDENCE: &str = "plan_confidence";
    pub const EXPLORATION_SUMMARY: &str = "exploration_summary";
    pub const RISKS: &str = "risks";
    pub const TODO_LIST: &str = "todo_list";
    pub const PLANNING_ITERATIONS: &str = "planning_iterations";
    pub const CODING_ITERATIONS: &str = "coding_iterations";
    pub const BUDGET_REVIEW_EFFECT: &str = "budget_review_effect";
    pub const PENDING_APPROVAL_REQUEST: &str = "pending_approval_request";
    pub const QUESTION_EFFECT: &str = "question_effect";
    pub const MERGE_RESULT: &str = "merge_result";
    pub const LOCAL_BRANCH_NAME: &str = "local_branch_name";
    pub const REMOTE_BRANCH_NAME: &str = "remote_branch_name";
    pub const PR_URL: &str = "pr_url";
    pub const MERGE_ATTEMPT_COUNT: &str = "merge_attempt_count";
    pub const MERGE_STUCK_ATTEMPTS: &str = "merge_stuck_attempts";
    pub const LAST_REMOTE_HEAD: &str = "last_remote_head";
    pub const CODING_SESSION_ID: &str = "coding_session_id";
    pub const RESUME_INPUT: &str = "resume_input";

    pub const SETUP_COMPLETED_AT: &str = "setup_completed_at";
    pub const PLANNING_COMPLETED_AT: &str = "planning_completed_at";
    pub const PLAN_REVIEW_COMPLETED_AT: &str = "plan_review_completed_at";
    pub const TODO_COLLECTION_COMPLETED_AT: &str = "todo_collection_completed_at";
    pub const CODING_COMPLETED_AT: &str = "coding_completed_at";
    pub const TESTING_COMPLETED_AT: &str = "testing_completed_at";
    pub const CODE_REVIEW_COMPLETED_AT: &str = "code_review_completed_at";
    pub const BUDGET_REVIEW_COMPLETED_AT: &str = "budget_review_completed_at";
    pub const MERGE_COMPLETED_AT: &str = "merge_completed_at";
}

/// Keyed `string -> JSON` map with typed accessors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateData(serde_json::Map<String, serde_json::Value>);

impl StateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_object(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn as_object(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone())
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.0.insert(key.to_string(), v);
            }
            Err(e) => tracing::error!(key, error = %e, "unserializable state data value dropped"),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.0.get(key).and_then(|v| v.as_u64()).map(|n| n as u32)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Removes and returns a value; used for one-shot keys like
    /// `resume_input`.
    pub fn take(&mut self, key: &str) -> Option<serde_json::Value> {
        self.0.remove(key)
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    /// Applies a batch of extra entries (transition payload).
    pub fn apply(&mut self, extra: Vec<(String, serde_json::Value)>) {
        for (k, v) in extra {
            self.0.insert(k, v);
        }
    }

    /// Increments an integer counter, returning the post-increment value.
    pub fn increment(&mut self, key: &str) -> u32 {
        let next = self.get_u32(key).unwrap_or(0) + 1;
        self.set(key, next);
        next
    }

    /// Stamps `key` with the current wall clock (ms) if not already set;
    /// timestamps are never cleared.
    pub fn stamp_completed(&mut self, key: &str) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        self.0
            .entry(key.to_string())
            .or_insert_with(|| serde_json::Value::from(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let mut data = StateData::new();
        data.set(keys::STORY_ID, "050");
        data.set(keys::CODING_ITERATIONS, 3u32);
        assert_eq!(data.get_str(keys::STORY_ID), Some("050"));
        assert_eq!(data.get_u32(keys::CODING_ITERATIONS), Some(3));
        assert_eq!(data.get_u32(keys::PLANNING_ITERATIONS), None);
    }

    #[test]
    fn increment_starts_at_one() {
        let mut data = StateData::new();
        assert_eq!(data.increment(keys::PLANNING_ITERATIONS), 1);
        assert_eq!(data.increment(keys::PLANNING_ITERATIONS), 2);
    }

    #[test]
    fn take_removes_one_shot_keys() {
        let mut data = StateData::new();
        data.set(keys::RESUME_INPUT, "tests failed");
        assert!(data.take(keys::RESUME_INPUT).is_some());
        assert!(!data.contains(keys::RESUME_INPUT));
    }

    #[test]
    fn stamp_completed_is_write_once() {
        let mut data = StateData::new();
        data.set(keys::PLANNING_COMPLETED_AT, 42i64);
        data.stamp_completed(keys::PLANNING_COMPLETED_AT);
        assert_eq!(
            data.get(keys::PLANNING_COMPLETED_AT).unwrap().as_i64(),
            Some(42)
        );
    }

    #[test]
    fn object_round_trip() {
        let mut data = StateData::new();
        data.set(keys::PR_URL, "https://example.com/pr/1");
        let restored = StateData::from_object(data.as_object()).unwrap();
        assert_eq!(restored, data);
        assert!(StateData::from_object(serde_json::json!([1, 2])).is_none());
    }
}
