//! Operation outcomes
//!
//! Faults are [`crate::EngineError`]s. Everything else an operation can end
//! with, including running out of time, is an [`Outcome`].

use crate::plan::ReconciliationPlan;
use crate::poller::PollOutcome;
use deployfish_types::{InvocationHandle, ServiceTarget, TaskDefinitionRevision};

/// How an operation ended
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Every action ran; any requested wait settled
    Completed(ExecutionReport),

    /// A stability wait ran out of time; later actions were not issued
    TimedOut(ExecutionReport),

    /// Plan computed and not executed
    DryRun(ReconciliationPlan),

    /// The operator did not confirm
    Declined,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::TimedOut(_))
    }

    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            Outcome::Completed(report) | Outcome::TimedOut(report) => Some(report),
            Outcome::DryRun(_) | Outcome::Declined => None,
        }
    }
}

/// A helper action that failed after the primary went through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperFailure {
    pub helper: String,
    pub action: String,
    pub error: String,
}

/// What an executed plan did
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Descriptions of the actions that were issued, in order
    pub applied: Vec<(ServiceTarget, String)>,

    pub helper_failures: Vec<HelperFailure>,

    /// Actions skipped because an earlier action for the same helper failed
    pub skipped: Vec<(ServiceTarget, String)>,

    pub registered: Vec<(ServiceTarget, TaskDefinitionRevision)>,

    /// Result of the last stability wait
    pub poll: Option<PollOutcome>,

    pub invocation: Option<InvocationHandle>,
}

impl ExecutionReport {
    pub fn revision_for(&self, target: &ServiceTarget) -> Option<&TaskDefinitionRevision> {
        self.registered
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, rev)| rev)
    }
}
