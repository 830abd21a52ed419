//! Effects: typed requests to the supervisor that suspend the agent.
//!
//! The agent builds an [`Effect`], [`EffectsEngine::execute`] stamps it with
//! a correlation id, ships it on the outbound channel and parks the caller
//! on a reply slot. The matching [`EffectReply`] wakes exactly that caller;
//! a reply for a cancelled wait is dead-lettered.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AgentError;

/// Supervisor verdict shared by approval-shaped results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Approved,
    NeedsChanges,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Default for Urgency {
    fn default() -> Self {
        Self::Medium
    }
}

/// A request for an out-of-band supervisor decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    BudgetReview {
        loops: u32,
        max_loops: u32,
        origin_state: String,
        recent_activity_summary: String,
    },
    Question {
        question: String,
        context: String,
        urgency: Urgency,
        origin_state: String,
    },
    PlanReview {
        plan: String,
        confidence: String,
        exploration_summary: String,
        risks: Vec<String>,
    },
    CodeReview {
        summary: String,
        diff: String,
    },
    Merge {
        story_id: String,
        pr_url: String,
        branch: String,
    },
}

/// The supervisor's answer, matched to its effect by correlation id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectResult {
    BudgetReview {
        status: ApprovalStatus,
        feedback: String,
    },
    Question {
        answer: String,
    },
    Approval {
        status: ApprovalStatus,
        feedback: String,
        review_type: String,
    },
    Merge {
        status: ApprovalStatus,
        feedback: String,
    },
}

/// Outbound wire record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EffectEnvelope {
    pub correlation_id: Uuid,
    pub agent_id: String,
    pub effect: Effect,
}

/// Inbound wire record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EffectReply {
    pub correlation_id: Uuid,
    pub result: EffectResult,
}

/// Request/reply bridge between one agent and its supervisor.
#[derive(Clone)]
pub struct EffectsEngine {
    agent_id: String,
    outbound: mpsc::Sender<EffectEnvelope>,
    pending: Arc<DashMap<Uuid, oneshot::Sender<EffectResult>>>,
}

impl EffectsEngine {
    pub fn new(agent_id: impl Into<String>, outbound: mpsc::Sender<EffectEnvelope>) -> Self {
        Self {
            agent_id: agent_id.into(),
            outbound,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Ships the effect and suspends until the matching reply arrives or
    /// `cancel` fires. Cancellation removes the reply slot, so a late reply
    /// is dead-lettered by [`deliver`](Self::deliver).
    pub async fn execute(
        &self,
        effect: Effect,
        cancel: &CancellationToken,
    ) -> Result<EffectResult, AgentError> {
        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);

        tracing::info!(agent_id = %self.agent_id, %correlation_id, "effect issued");
        let envelope = EffectEnvelope {
            correlation_id,
            agent_id: self.agent_id.clone(),
            effect,
        };
        if self.outbound.send(envelope).await.is_err() {
            self.pending.remove(&correlation_id);
            return Err(AgentError::EffectChannelClosed);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                self.pending.remove(&correlation_id);
                tracing::warn!(agent_id = %self.agent_id, %correlation_id, "effect wait cancelled");
                Err(AgentError::EffectCancelled)
            }
            result = rx => result.map_err(|_| AgentError::EffectChannelClosed),
        }
    }

    /// Routes one reply to its waiting caller. Returns false when no caller
    /// waits (cancelled or duplicate): the reply is dropped.
    pub fn deliver(&self, reply: EffectReply) -> bool {
        match self.pending.remove(&reply.correlation_id) {
            Some((_, tx)) => tx.send(reply.result).is_ok(),
            None => {
                tracing::debug!(correlation_id = %reply.correlation_id, "dead-letter effect reply");
                false
            }
        }
    }

    /// Spawns a task that drains an inbound reply channel into
    /// [`deliver`](Self::deliver).
    pub fn spawn_router(&self, mut inbound: mpsc::Receiver<EffectReply>) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(reply) = inbound.recv().await {
                engine.deliver(reply);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> Effect {
        Effect::Question {
            question: "which port?".into(),
            context: String::new(),
            urgency: Urgency::Medium,
            origin_state: "CODING".into(),
        }
    }

    #[tokio::test]
    async fn execute_returns_matching_result() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let engine = EffectsEngine::new("a1", out_tx);
        let cancel = CancellationToken::new();

        let exec = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute(question(), &cancel).await })
        };

        let envelope = out_rx.recv().await.unwrap();
        assert_eq!(envelope.agent_id, "a1");
        assert!(engine.deliver(EffectReply {
            correlation_id: envelope.correlation_id,
            result: EffectResult::Question {
                answer: "8080".into()
            },
        }));

        let result = exec.await.unwrap().unwrap();
        assert_eq!(
            result,
            EffectResult::Question {
                answer: "8080".into()
            }
        );
    }

    #[tokio::test]
    async fn concurrent_effects_correlate_by_id() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let engine = EffectsEngine::new("a1", out_tx);
        let cancel = CancellationToken::new();

        let first = {
            let (engine, cancel) = (engine.clone(), cancel.clone());
            tokio::spawn(async move { engine.execute(question(), &cancel).await })
        };
        let second = {
            let (engine, cancel) = (engine.clone(), cancel.clone());
            tokio::spawn(async move { engine.execute(question(), &cancel).await })
        };

        let env1 = out_rx.recv().await.unwrap();
        let env2 = out_rx.recv().await.unwrap();

        // Answer in reverse order; each waiter gets its own reply.
        engine.deliver(EffectReply {
            correlation_id: env2.correlation_id,
            result: EffectResult::Question { answer: "two".into() },
        });
        engine.deliver(EffectReply {
            correlation_id: env1.correlation_id,
            result: EffectResult::Question { answer: "one".into() },
        });

        let results = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
        let answers: Vec<String> = results
            .into_iter()
            .map(|r| match r {
                EffectResult::Question { answer } => answer,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert!(answers.contains(&"one".to_string()));
        assert!(answers.contains(&"two".to_string()));
    }

    #[tokio::test]
    async fn cancellation_aborts_wait_and_dead_letters_late_reply() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let engine = EffectsEngine::new("a1", out_tx);
        let cancel = CancellationToken::new();

        let exec = {
            let (engine, cancel) = (engine.clone(), cancel.clone());
            tokio::spawn(async move { engine.execute(question(), &cancel).await })
        };
        let envelope = out_rx.recv().await.unwrap();

        cancel.cancel();
        let err = exec.await.unwrap().unwrap_err();
        assert!(matches!(err, AgentError::EffectCancelled));

        // The late reply finds no waiter.
        assert!(!engine.deliver(EffectReply {
            correlation_id: envelope.correlation_id,
            result: EffectResult::Question { answer: "late".into() },
        }));
    }

    #[tokio::test]
    async fn closed_outbound_channel_fails_fast() {
        let (out_tx, out_rx) = mpsc::channel(1);
        drop(out_rx);
        let engine = EffectsEngine::new("a1", out_tx);
        let err = engine
            .execute(question(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::EffectChannelClosed));
    }

    #[test]
    fn effect_serde_round_trip_for_state_data() {
        let effect = Effect::BudgetReview {
            loops: 8,
            max_loops: 8,
            origin_state: "PLANNING".into(),
            recent_activity_summary: "8 iterations, repeated failing build".into(),
        };
        let value = serde_json::to_value(&effect).unwrap();
        assert_eq!(value["type"], "budget_review");
        let back: Effect = serde_json::from_value(value).unwrap();
        assert_eq!(back, effect);
    }
}
