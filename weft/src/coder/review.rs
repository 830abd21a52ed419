//! Gating states: PLAN_REVIEW, CODE_REVIEW, QUESTION, BUDGET_REVIEW.
//!
//! Each retrieves the effect stashed by the state that initiated the detour,
//! executes it through the effects engine, clears the stash and branches on
//! the result. Entering a gating state without a stashed effect is a
//! programmer error and ends in ERROR.

use crate::coder::{Coder, Step};
use crate::effects::{ApprovalStatus, Effect, EffectResult};
use crate::error::AgentError;
use crate::machine::{keys, CoderState, StateTag};

impl Coder {
    pub(crate) async fn handle_plan_review(&mut self) -> Result<Step, AgentError> {
        let (status, feedback) = self.execute_approval(keys::PENDING_APPROVAL_REQUEST).await?;
        match status {
            ApprovalStatus::Approved => {
                self.machine
                    .data_mut()
                    .stamp_completed(keys::PLAN_REVIEW_COMPLETED_AT);
                Ok(Step::to(CoderState::TodoCollection))
            }
            ApprovalStatus::NeedsChanges => {
                self.ctx
                    .add_user(format!("Architect feedback on the plan:\n{feedback}"));
                self.machine.data_mut().set(keys::PLANNING_ITERATIONS, 0u32);
                Ok(Step::to(CoderState::Planning))
            }
            ApprovalStatus::Rejected => {
                Err(AgentError::Abandoned(format!("plan rejected: {feedback}")))
            }
        }
    }

    pub(crate) async fn handle_code_review(&mut self) -> Result<Step, AgentError> {
        let (status, feedback) = self.execute_approval(keys::PENDING_APPROVAL_REQUEST).await?;
        match status {
            ApprovalStatus::Approved => {
                self.machine
                    .data_mut()
                    .stamp_completed(keys::CODE_REVIEW_COMPLETED_AT);
                Ok(Step::to(CoderState::PrepareMerge))
            }
            ApprovalStatus::NeedsChanges => {
                self.ctx
                    .add_user(format!("Code review feedback:\n{feedback}"));
                self.machine.data_mut().set(keys::CODING_ITERATIONS, 0u32);
                Ok(Step::to(CoderState::Coding))
            }
            ApprovalStatus::Rejected => Err(AgentError::Abandoned(format!(
                "code review rejected: {feedback}"
            ))),
        }
    }

    pub(crate) async fn handle_question(&mut self) -> Result<Step, AgentError> {
        let effect: Effect = self
            .machine
            .data_mut()
            .take(keys::QUESTION_EFFECT)
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or(AgentError::MissingStateData(keys::QUESTION_EFFECT))?;
        let origin = self.origin_state()?;

        let result = self
            .deps
            .effects
            .execute(effect, &self.deps.cancel)
            .await?;
        let EffectResult::Question { answer } = result else {
            return Err(AgentError::Internal(format!(
                "unexpected result for question effect: {result:?}"
            )));
        };

        self.ctx
            .add_user(format!("Supervisor answer:\n{answer}"));
        self.machine.data_mut().remove(keys::ORIGIN);
        Ok(Step::to(origin))
    }

    pub(crate) async fn handle_budget_review(&mut self) -> Result<Step, AgentError> {
        let effect: Effect = self
            .machine
            .data_mut()
            .take(keys::BUDGET_REVIEW_EFFECT)
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or(AgentError::MissingStateData(keys::BUDGET_REVIEW_EFFECT))?;
        // An unset origin here is a programmer error; the machine has no
        // sound phase to fall back to.
        let origin = self.origin_state()?;

        let result = self
            .deps
            .effects
            .execute(effect, &self.deps.cancel)
            .await?;
        self.machine
            .data_mut()
            .stamp_completed(keys::BUDGET_REVIEW_COMPLETED_AT);
        let EffectResult::BudgetReview { status, feedback } = result else {
            return Err(AgentError::Internal(format!(
                "unexpected result for budget review effect: {result:?}"
            )));
        };

        match status {
            ApprovalStatus::Approved => {
                self.reset_counter_for(origin);
                self.ctx.add_user(format!(
                    "The supervisor approved continuing after budget review.\n{feedback}"
                ));
                self.machine.data_mut().remove(keys::ORIGIN);
                Ok(Step::to(origin))
            }
            ApprovalStatus::NeedsChanges => {
                self.ctx
                    .add_user(format!("Budget review feedback:\n{feedback}"));
                let next = match origin {
                    // A planning pivot starts the whole implementation over.
                    CoderState::Planning => {
                        self.machine.data_mut().set(keys::PLANNING_ITERATIONS, 0u32);
                        self.machine.data_mut().set(keys::CODING_ITERATIONS, 0u32);
                        CoderState::Planning
                    }
                    // An execution retry keeps the plan and planning budget.
                    _ => {
                        self.machine.data_mut().set(keys::CODING_ITERATIONS, 0u32);
                        CoderState::Coding
                    }
                };
                self.machine.data_mut().remove(keys::ORIGIN);
                Ok(Step::to(next))
            }
            ApprovalStatus::Rejected => Err(AgentError::Abandoned(format!(
                "budget review rejected: {feedback}"
            ))),
        }
    }

    /// Executes the stashed approval effect and returns `(status, feedback)`.
    async fn execute_approval(
        &mut self,
        key: &'static str,
    ) -> Result<(ApprovalStatus, String), AgentError> {
        let effect: Effect = self
            .machine
            .data_mut()
            .take(key)
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or(AgentError::MissingStateData(key))?;
        let result = self
            .deps
            .effects
            .execute(effect, &self.deps.cancel)
            .await?;
        match result {
            EffectResult::Approval {
                status, feedback, ..
            } => Ok((status, feedback)),
            other => Err(AgentError::Internal(format!(
                "unexpected result for approval effect: {other:?}"
            ))),
        }
    }

    fn origin_state(&self) -> Result<CoderState, AgentError> {
        let origin = self
            .machine
            .data()
            .get_str(keys::ORIGIN)
            .ok_or(AgentError::MissingStateData(keys::ORIGIN))?;
        match CoderState::parse(origin) {
            Some(s @ CoderState::Planning) | Some(s @ CoderState::Coding) => Ok(s),
            _ => Err(AgentError::Internal(format!(
                "origin is not a phase state: {origin}"
            ))),
        }
    }

    fn reset_counter_for(&mut self, origin: CoderState) {
        let key = match origin {
            CoderState::Planning => keys::PLANNING_ITERATIONS,
            _ => keys::CODING_ITERATIONS,
        };
        self.machine.data_mut().set(key, 0u32);
    }
}
