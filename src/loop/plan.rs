//! Per-iteration execution plan.
//!
//! Each iteration of the feedback loop walks the same ordered steps. The
//! plan records how far the current iteration got; step statuses only move
//! forward (`pending -> in_progress -> completed | skipped | failed`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

impl StepStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Skipped | Self::Failed => 2,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The steps of one loop iteration, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStep {
    Submit,
    AwaitOutput,
    Analyze,
    GenerateFix,
    AwaitPr,
    Merge,
    Deploy,
}

impl CycleStep {
    pub const ALL: [CycleStep; 7] = [
        Self::Submit,
        Self::AwaitOutput,
        Self::Analyze,
        Self::GenerateFix,
        Self::AwaitPr,
        Self::Merge,
        Self::Deploy,
    ];

    /// Steps that only run when analysis fails.
    pub const FIX_STEPS: [CycleStep; 4] = [Self::GenerateFix, Self::AwaitPr, Self::Merge, Self::Deploy];
}

impl std::fmt::Display for CycleStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Submit => "submit",
            Self::AwaitOutput => "await-output",
            Self::Analyze => "analyze",
            Self::GenerateFix => "generate-fix",
            Self::AwaitPr => "await-pr",
            Self::Merge => "merge",
            Self::Deploy => "deploy",
        };
        write!(f, "{s}")
    }
}

/// A rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("plan step '{step}' cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub step: CycleStep,
    pub from: StepStatus,
    pub to: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: CycleStep,
    pub status: StepStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    steps: Vec<PlanStep>,
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self::cycle()
    }
}

impl ExecutionPlan {
    /// A fresh plan with every cycle step pending.
    #[must_use]
    pub fn cycle() -> Self {
        Self {
            steps: CycleStep::ALL
                .iter()
                .map(|&step| PlanStep {
                    step,
                    status: StepStatus::Pending,
                    updated_at: None,
                    note: None,
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    #[must_use]
    pub fn status(&self, step: CycleStep) -> Option<StepStatus> {
        self.steps.iter().find(|s| s.step == step).map(|s| s.status)
    }

    /// Move a step forward. Setting the status it already has is a no-op;
    /// moving backwards or between terminal statuses is rejected.
    pub fn transition(
        &mut self,
        step: CycleStep,
        to: StepStatus,
        note: Option<String>,
    ) -> Result<(), InvalidTransition> {
        let Some(entry) = self.steps.iter_mut().find(|s| s.step == step) else {
            return Err(InvalidTransition {
                step,
                from: StepStatus::Pending,
                to,
            });
        };
        if entry.status == to {
            return Ok(());
        }
        if to.rank() <= entry.status.rank() {
            return Err(InvalidTransition {
                step,
                from: entry.status,
                to,
            });
        }
        entry.status = to;
        entry.updated_at = Some(Utc::now());
        if note.is_some() {
            entry.note = note;
        }
        Ok(())
    }

    /// Every step is completed, skipped or failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// `(terminal steps, total steps)`.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        let done = self.steps.iter().filter(|s| s.status.is_terminal()).count();
        (done, self.steps.len())
    }

    /// First step that is not yet terminal.
    #[must_use]
    pub fn current(&self) -> Option<CycleStep> {
        self.steps
            .iter()
            .find(|s| !s.status.is_terminal())
            .map(|s| s.step)
    }
}
