//! Coder lifecycle states and the legal transition table.

use serde::{Deserialize, Serialize};

/// Behavior a state tag must provide to drive a [`Machine`](super::Machine).
pub trait StateTag:
    Copy + Eq + std::fmt::Debug + std::fmt::Display + Send + Sync + 'static
{
    fn is_terminal(self) -> bool;
    fn can_transition(self, to: Self) -> bool;
    fn as_str(self) -> &'static str;
    fn parse(s: &str) -> Option<Self>;
}

/// The coder lifecycle. `Done` and `Error` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoderState {
    Waiting,
    Setup,
    Planning,
    PlanReview,
    TodoCollection,
    Coding,
    Testing,
    CodeReview,
    Question,
    BudgetReview,
    PrepareMerge,
    AwaitMerge,
    Done,
    Error,
}

impl CoderState {
    pub const ALL: [CoderState; 14] = [
        Self::Waiting,
        Self::Setup,
        Self::Planning,
        Self::PlanReview,
        Self::TodoCollection,
        Self::Coding,
        Self::Testing,
        Self::CodeReview,
        Self::Question,
        Self::BudgetReview,
        Self::PrepareMerge,
        Self::AwaitMerge,
        Self::Done,
        Self::Error,
    ];

    /// Legal successors of a state. Every state except the terminals may
    /// fail into `Error`.
    fn successors(self) -> &'static [CoderState] {
        use CoderState::*;
        match self {
            Waiting => &[Setup, Error],
            Setup => &[Planning, Error],
            Planning => &[PlanReview, BudgetReview, Question, Error],
            PlanReview => &[TodoCollection, Planning, Error],
            TodoCollection => &[Coding, Error],
            Coding => &[Testing, BudgetReview, Question, Error],
            Testing => &[CodeReview, Coding, Error],
            CodeReview => &[PrepareMerge, Coding, Error],
            Question => &[Planning, Coding, Error],
            BudgetReview => &[Planning, Coding, Error],
            PrepareMerge => &[AwaitMerge, Coding, Error],
            AwaitMerge => &[Done, Error],
            Done | Error => &[],
        }
    }
}

impl StateTag for CoderState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    fn can_transition(self, to: Self) -> bool {
        self.successors().contains(&to)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Setup => "SETUP",
            Self::Planning => "PLANNING",
            Self::PlanReview => "PLAN_REVIEW",
            Self::TodoCollection => "TODO_COLLECTION",
            Self::Coding => "CODING",
            Self::Testing => "TESTING",
            Self::CodeReview => "CODE_REVIEW",
            Self::Question => "QUESTION",
            Self::BudgetReview => "BUDGET_REVIEW",
            Self::PrepareMerge => "PREPARE_MERGE",
            Self::AwaitMerge => "AWAIT_MERGE",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

impl std::fmt::Display for CoderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_successors() {
        assert!(CoderState::Done.is_terminal());
        assert!(CoderState::Error.is_terminal());
        assert!(!CoderState::Done.can_transition(CoderState::Coding));
        assert!(!CoderState::Error.can_transition(CoderState::Waiting));
    }

    #[test]
    fn happy_path_edges_are_legal() {
        use CoderState::*;
        let trace = [
            Waiting,
            Setup,
            Planning,
            PlanReview,
            TodoCollection,
            Coding,
            Testing,
            CodeReview,
            PrepareMerge,
            AwaitMerge,
            Done,
        ];
        for pair in trace.windows(2) {
            assert!(
                pair[0].can_transition(pair[1]),
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn budget_review_returns_only_to_origin_phases() {
        use CoderState::*;
        assert!(BudgetReview.can_transition(Planning));
        assert!(BudgetReview.can_transition(Coding));
        assert!(!BudgetReview.can_transition(Testing));
    }

    #[test]
    fn every_non_terminal_may_fail_into_error() {
        for s in CoderState::ALL {
            if !s.is_terminal() {
                assert!(s.can_transition(CoderState::Error), "{s}");
            }
        }
    }

    #[test]
    fn tag_round_trips_through_str() {
        for s in CoderState::ALL {
            assert_eq!(CoderState::parse(s.as_str()), Some(s));
        }
        assert_eq!(CoderState::parse("BOGUS"), None);
        assert_eq!(CoderState::TodoCollection.as_str(), "TODO_COLLECTION");
    }
}
