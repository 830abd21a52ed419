//! Generic state machine: one state tag plus keyed data, persisted on every
//! transition.
//!
//! The machine validates transitions against the tag's table, applies the
//! transition's extra data, persists the `(state, data)` pair, then publishes
//! a best-effort change notification. Handlers never recurse into the
//! machine; the orchestrator drives exactly one handler per step and feeds
//! external events in through channels or state data.

mod data;
mod state;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::persist::{PersistedState, StateStore};

pub use data::{keys, StateData};
pub use state::{CoderState, StateTag};

/// Notification published after each transition.
#[derive(Clone, Debug)]
pub struct StateChange<S> {
    pub agent_id: String,
    pub from: S,
    pub to: S,
    /// Milliseconds since Unix epoch.
    pub ts_ms: i64,
}

/// State tag + keyed data + persistence + notifications, for one agent.
pub struct Machine<S: StateTag> {
    agent_id: String,
    state: S,
    data: StateData,
    store: Arc<dyn StateStore>,
    notifier: Option<mpsc::Sender<StateChange<S>>>,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl<S: StateTag> Machine<S> {
    pub fn new(
        agent_id: impl Into<String>,
        initial: S,
        store: Arc<dyn StateStore>,
        notifier: Option<mpsc::Sender<StateChange<S>>>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            state: initial,
            data: StateData::new(),
            store,
            notifier,
        }
    }

    /// Restores a machine from its last persisted snapshot, or starts fresh
    /// at `initial` when none exists.
    pub async fn resume(
        agent_id: impl Into<String>,
        initial: S,
        store: Arc<dyn StateStore>,
        notifier: Option<mpsc::Sender<StateChange<S>>>,
    ) -> Result<Self, AgentError> {
        let agent_id = agent_id.into();
        let snapshot = store
            .load(&agent_id)
            .await
            .map_err(|e| AgentError::Persistence(e.to_string()))?;
        let mut machine = Self::new(agent_id, initial, store, notifier);
        if let Some(snapshot) = snapshot {
            let state = S::parse(&snapshot.state)
                .ok_or_else(|| AgentError::Persistence(format!("bad state tag {}", snapshot.state)))?;
            let data = StateData::from_object(snapshot.data)
                .ok_or_else(|| AgentError::Persistence("state data is not an object".into()))?;
            machine.state = state;
            machine.data = data;
            tracing::info!(agent_id = %machine.agent_id, state = %state, "resumed from persisted state");
        }
        Ok(machine)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn data(&self) -> &StateData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut StateData {
        &mut self.data
    }

    /// Validates and performs a transition: applies `extra` to state data,
    /// persists, then notifies. An illegal pair returns an error and leaves
    /// the machine untouched.
    pub async fn transition_to(
        &mut self,
        to: S,
        extra: Vec<(String, serde_json::Value)>,
    ) -> Result<(), AgentError> {
        if !self.state.can_transition(to) {
            return Err(AgentError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        let from = self.state;
        let prior_data = self.data.clone();
        self.data.apply(extra);
        self.state = to;
        if let Err(e) = self.persist().await {
            // Roll back so the in-memory view matches the last persisted one.
            self.state = from;
            self.data = prior_data;
            return Err(e);
        }
        tracing::info!(agent_id = %self.agent_id, %from, %to, "transition");
        if let Some(tx) = &self.notifier {
            let change = StateChange {
                agent_id: self.agent_id.clone(),
                from,
                to,
                ts_ms: now_ms(),
            };
            if tx.try_send(change).is_err() {
                tracing::debug!(agent_id = %self.agent_id, "state change dropped: subscriber full");
            }
        }
        Ok(())
    }

    /// Writes the current `(state, data)` pair.
    pub async fn persist(&self) -> Result<(), AgentError> {
        self.store
            .save(
                &self.agent_id,
                &PersistedState {
                    state: self.state.as_str().to_string(),
                    data: self.data.as_object(),
                },
            )
            .await
            .map_err(|e| AgentError::Persistence(e.to_string()))
    }
}
