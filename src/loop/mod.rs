//! Feedback loop core.
//!
//! - [`manager`] - The state machine that drives one task to convergence
//! - [`state`] - Persisted loop state and phase transitions
//! - [`plan`] - Per-iteration execution plan
//! - [`retry`] - Bounded retries with per-attempt timeouts
//! - [`progress`] - Progress updates and observers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────┐     ┌──────────────────────┐
//! │ FeedbackLoopManager  │────>│ LoopState    │────>│ LoopStatePersistence │
//! └──────────────────────┘     └──────────────┘     └──────────────────────┘
//!       │          │                  │
//!       v          v                  v
//! ┌────────────┐ ┌──────────────┐ ┌──────────────────────┐
//! │RetryExec.  │ │ Progress     │ │ IssuePatternDetector │
//! └────────────┘ └──────────────┘ └──────────────────────┘
//! ```

pub mod manager;
pub mod plan;
pub mod progress;
pub mod retry;
pub mod state;

// Re-exports for convenience
pub use manager::{FeedbackLoopManager, LoopDependencies, LoopOutcome, LoopStatus, LoopTask};
pub use plan::{CycleStep, ExecutionPlan, StepStatus};
pub use progress::{ConsoleObserver, ProgressBroadcaster, ProgressObserver, ProgressUpdate, TracingObserver};
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
pub use state::{LoopPhase, LoopState, PendingWork, SCHEMA_VERSION};
