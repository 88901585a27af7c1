//! Persisted loop state.
//!
//! [`LoopState`] is the single snapshot written after every transition.
//! Its JSON form is versioned by [`SCHEMA_VERSION`]; older files are
//! migrated by [`crate::session::migration`].

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::ExecutionPlan;
use crate::collaborators::ResearchReport;
use crate::quality::{AnalysisResult, Discrepancy};
use crate::stagnation::{IssueFingerprint, IssuePatternDetector};

pub use crate::stagnation::IterationRecord;

/// Current persisted schema version.
pub const SCHEMA_VERSION: u32 = 3;

/// Phase of the feedback loop.
///
/// # Example
///
/// ```
/// use converge::r#loop::state::LoopPhase;
///
/// assert_eq!(LoopPhase::WaitingForPr.to_string(), "WAITING_FOR_PR");
/// assert!(LoopPhase::Timeout.is_terminal());
/// assert!(!LoopPhase::Stuck.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopPhase {
    #[default]
    Idle,
    TestingFrontend,
    WaitingForEmail,
    AnalyzingOutput,
    /// Analysis passed; awaiting optional approval.
    Passed,
    GeneratingFix,
    WaitingForPr,
    MergingPr,
    WaitingForDeploy,
    /// The same issues keep recurring; escalation pending.
    Stuck,
    Completed,
    Failed,
    Timeout,
}

impl LoopPhase {
    /// Phases after which the loop does not continue.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// Parse the persisted name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.trim().to_uppercase())).ok()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::TestingFrontend => "TESTING_FRONTEND",
            Self::WaitingForEmail => "WAITING_FOR_EMAIL",
            Self::AnalyzingOutput => "ANALYZING_OUTPUT",
            Self::Passed => "PASSED",
            Self::GeneratingFix => "GENERATING_FIX",
            Self::WaitingForPr => "WAITING_FOR_PR",
            Self::MergingPr => "MERGING_PR",
            Self::WaitingForDeploy => "WAITING_FOR_DEPLOY",
            Self::Stuck => "STUCK",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work carried between phases of the current iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingWork {
    /// Document received for this iteration.
    pub attachment_path: Option<PathBuf>,
    pub email_id: Option<String>,
    /// PR opened by the fix generator.
    pub pr_number: Option<u64>,
    /// PRs closed without merging, kept across iterations.
    pub closed_prs: Vec<u64>,
    /// Discrepancies the next fix must address.
    pub discrepancies: Vec<Discrepancy>,
    /// Latest analysis, kept for operator review.
    pub last_result: Option<AnalysisResult>,
    pub research: Option<ResearchReport>,
    pub stuck_fingerprint: Option<IssueFingerprint>,
}

impl PendingWork {
    /// Fresh pending work for a new iteration, keeping task-wide history.
    #[must_use]
    pub fn next_iteration(&self) -> Self {
        Self {
            closed_prs: self.closed_prs.clone(),
            ..Self::default()
        }
    }
}

/// Snapshot of the feedback loop.
///
/// # Example
///
/// ```
/// use converge::r#loop::state::{LoopPhase, LoopState};
///
/// let mut state = LoopState::new("invoice-service", "task-1", 50);
/// state.transition(LoopPhase::TestingFrontend);
/// assert_eq!(state.iteration, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    pub schema_version: u32,
    pub service_name: String,
    pub task_id: Option<String>,
    /// Completed or in-progress cycles; 0 before the first submission.
    pub iteration: u32,
    pub state: LoopPhase,
    pub prs_merged: u32,
    /// `issue_tracker` and `iterations_data`.
    #[serde(flatten)]
    pub issues: IssuePatternDetector,
    pub started_at: DateTime<Utc>,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub seen_email_ids: BTreeSet<String>,
    /// Unix seconds of the last healthy deployment of a fix.
    pub last_fix_deployed_epoch: Option<i64>,
    #[serde(default)]
    pub pending: PendingWork,
    #[serde(default)]
    pub cycle: ExecutionPlan,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl LoopState {
    #[must_use]
    pub fn new(service_name: impl Into<String>, task_id: impl Into<String>, history_capacity: usize) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            service_name: service_name.into(),
            task_id: Some(task_id.into()),
            iteration: 0,
            state: LoopPhase::Idle,
            prs_merged: 0,
            issues: IssuePatternDetector::new(history_capacity),
            started_at: Utc::now(),
            last_saved_at: None,
            seen_email_ids: BTreeSet::new(),
            last_fix_deployed_epoch: None,
            pending: PendingWork::default(),
            cycle: ExecutionPlan::cycle(),
            last_error: None,
        }
    }

    #[must_use]
    pub fn matches_task(&self, task_id: &str) -> bool {
        self.task_id.as_deref() == Some(task_id)
    }

    /// Same task and not finished.
    #[must_use]
    pub fn is_resumable_for(&self, task_id: &str) -> bool {
        self.matches_task(task_id) && !self.state.is_terminal()
    }

    /// Returns false if the id was already recorded.
    pub fn mark_email_seen(&mut self, email_id: impl Into<String>) -> bool {
        self.seen_email_ids.insert(email_id.into())
    }

    /// Move to `to`. Entering `TestingFrontend` from `Idle` or
    /// `WaitingForDeploy` starts a new iteration with a fresh plan.
    pub fn transition(&mut self, to: LoopPhase) {
        if to == LoopPhase::TestingFrontend
            && matches!(self.state, LoopPhase::Idle | LoopPhase::WaitingForDeploy)
        {
            self.iteration = self.iteration.saturating_add(1);
            self.cycle = ExecutionPlan::cycle();
            self.pending = self.pending.next_iteration();
        }
        self.state = to;
    }

    /// Time since the task first started.
    #[must_use]
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r#loop::plan::{CycleStep, StepStatus};

    #[test]
    fn test_phase_wire_names() {
        let json = serde_json::to_string(&LoopPhase::WaitingForEmail).unwrap();
        assert_eq!(json, "\"WAITING_FOR_EMAIL\"");
        for phase in [LoopPhase::Idle, LoopPhase::MergingPr, LoopPhase::Stuck, LoopPhase::Timeout] {
            assert_eq!(LoopPhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(LoopPhase::parse("waiting_for_deploy"), Some(LoopPhase::WaitingForDeploy));
        assert_eq!(LoopPhase::parse("SLEEPING"), None);
    }

    #[test]
    fn test_iteration_increments_once_per_cycle() {
        let mut state = LoopState::new("svc", "t", 10);
        state.transition(LoopPhase::TestingFrontend);
        for phase in [
            LoopPhase::WaitingForEmail,
            LoopPhase::AnalyzingOutput,
            LoopPhase::GeneratingFix,
            LoopPhase::WaitingForPr,
            LoopPhase::MergingPr,
            LoopPhase::WaitingForDeploy,
        ] {
            state.transition(phase);
            assert_eq!(state.iteration, 1);
        }
        state.transition(LoopPhase::TestingFrontend);
        assert_eq!(state.iteration, 2);
    }

    #[test]
    fn test_new_iteration_resets_pending_but_keeps_closed_prs() {
        let mut state = LoopState::new("svc", "t", 10);
        state.transition(LoopPhase::TestingFrontend);
        state.pending.pr_number = Some(4);
        state.pending.closed_prs.push(3);
        state
            .cycle
            .transition(CycleStep::Submit, StepStatus::Completed, None)
            .unwrap();
        state.transition(LoopPhase::WaitingForDeploy);
        state.transition(LoopPhase::TestingFrontend);

        assert_eq!(state.pending.pr_number, None);
        assert_eq!(state.pending.closed_prs, vec![3]);
        assert_eq!(state.cycle.status(CycleStep::Submit), Some(StepStatus::Pending));
    }

    #[test]
    fn test_resumable_only_for_same_unfinished_task() {
        let mut state = LoopState::new("svc", "task-a", 10);
        state.transition(LoopPhase::TestingFrontend);
        assert!(state.is_resumable_for("task-a"));
        assert!(!state.is_resumable_for("task-b"));
        state.transition(LoopPhase::Failed);
        assert!(!state.is_resumable_for("task-a"));
    }

    #[test]
    fn test_mark_email_seen() {
        let mut state = LoopState::new("svc", "t", 10);
        assert!(state.mark_email_seen("m1"));
        assert!(!state.mark_email_seen("m1"));
    }

    #[test]
    fn test_json_shape_flattens_issue_history() {
        let state = LoopState::new("svc", "t", 10);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["schema_version"], 3);
        assert_eq!(json["state"], "IDLE");
        assert!(json["issue_tracker"].is_object());
        assert!(json["iterations_data"].is_array());
    }
}
