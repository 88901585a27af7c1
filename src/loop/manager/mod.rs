//! Feedback loop manager.
//!
//! This module drives one task through the submit → analyze → fix →
//! redeploy cycle until the generated output passes, the loop gets stuck
//! and the operator aborts, or a budget runs out.
//!
//! # Architecture
//!
//! ```text
//! IDLE → TESTING_FRONTEND → WAITING_FOR_EMAIL → ANALYZING_OUTPUT ─┬→ PASSED → COMPLETED
//!              ↑                                                   ├→ STUCK ──┐ (research)
//!              │                                                   └──────────┴→ GENERATING_FIX
//!              └── WAITING_FOR_DEPLOY ← MERGING_PR ← WAITING_FOR_PR ←──────────────┘
//! ```
//!
//! Each phase handler (see `phases`) performs its external work through the
//! [`RetryExecutor`] and returns the next phase. The manager then persists
//! the state and broadcasts progress before running the next handler, so a
//! crash resumes at a well-defined phase.
//!
//! # Failure handling
//!
//! - Transient errors that survive all retries end the run as
//!   [`LoopStatus::Suspended`]; the phase is kept and the next run with the
//!   same task id resumes there.
//! - Structural errors move the loop to `FAILED`.
//! - Each phase runs under whatever is left of `loop.maxDurationSecs`,
//!   counted from the task's first start; a phase still running at the
//!   deadline is cancelled and the loop ends in `TIMEOUT`.
//!
//! # Dependency Injection
//!
//! Every collaborator is a trait object in [`LoopDependencies`], so the
//! whole loop can run against the mocks in [`crate::testing`].
//!
//! # Example
//!
//! ```rust,ignore
//! use converge::config::ConvergeConfig;
//! use converge::r#loop::manager::{FeedbackLoopManager, LoopDependencies, LoopTask};
//!
//! let config = ConvergeConfig::load(&project_dir, None)?;
//! let deps = LoopDependencies::real(&config)?;
//! let manager = FeedbackLoopManager::new(config, deps)?;
//! let outcome = manager.run(&LoopTask::new("invoice-service", "quarterly-deck", payload)).await?;
//! println!("{}", outcome.summary);
//! ```

mod phases;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::plan::{CycleStep, StepStatus};
use super::progress::{ProgressBroadcaster, ProgressObserver, ProgressUpdate};
use super::retry::{RetryExecutor, RetryPolicy};
use super::state::{LoopPhase, LoopState};
use crate::collaborators::{
    ClaudeCli, ConsoleOperator, DeploymentHealth, EmailWatcher, FixGenerator, FrontendSubmitter,
    GhPullRequests, HttpFrontend, HttpHealthCheck, InboxDirectory, Operator, PullRequests,
    Researcher, VisualGrader,
};
use crate::config::ConvergeConfig;
use crate::error::{ConvergeError, FailureCategory, Result};
use crate::quality::{AnalysisPolicy, AnalyzerRegistry, TemplateLibrary};
use crate::session::LoopStatePersistence;

// ============================================================================
// Dependencies
// ============================================================================

/// Collaborators the loop talks to.
pub struct LoopDependencies {
    pub frontend: Arc<dyn FrontendSubmitter>,
    pub email: Arc<dyn EmailWatcher>,
    pub analyzers: Arc<AnalyzerRegistry>,
    pub pull_requests: Arc<dyn PullRequests>,
    pub deployment: Arc<dyn DeploymentHealth>,
    pub fixer: Arc<dyn FixGenerator>,
    pub researcher: Arc<dyn Researcher>,
    pub operator: Arc<dyn Operator>,
    /// Optional LLM review of the rendered document.
    pub visual_grader: Option<Arc<dyn VisualGrader>>,
}

impl std::fmt::Debug for LoopDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopDependencies")
            .field("frontend", &"<dyn FrontendSubmitter>")
            .field("email", &"<dyn EmailWatcher>")
            .field("analyzers", &self.analyzers)
            .field("pull_requests", &"<dyn PullRequests>")
            .field("deployment", &"<dyn DeploymentHealth>")
            .field("fixer", &"<dyn FixGenerator>")
            .field("researcher", &"<dyn Researcher>")
            .field("operator", &"<dyn Operator>")
            .field("visual_grader", &self.visual_grader.is_some())
            .finish()
    }
}

impl LoopDependencies {
    /// Production collaborators built from configuration.
    ///
    /// Requires `frontend.url`, the `gh` CLI and the configured LLM CLI.
    pub fn real(config: &ConvergeConfig) -> Result<Self> {
        let frontend_url = config
            .frontend
            .url
            .clone()
            .ok_or_else(|| ConvergeError::invalid_config("frontend.url", "required to run the loop"))?;

        let templates = TemplateLibrary::load_dir(&config.templates_dir)?;
        let analyzers = AnalyzerRegistry::with_defaults(templates, &AnalysisPolicy::from_config(config));

        let llm_timeout = Duration::from_secs(config.timeouts.fix.max(config.timeouts.research))
            .max(Duration::from_millis(config.retry.min_timeout_ms));
        let claude = Arc::new(ClaudeCli::new(
            &config.llm.command,
            &config.llm.model,
            &config.github.repo_dir,
            llm_timeout,
        )?);

        Ok(Self {
            frontend: Arc::new(HttpFrontend::new(frontend_url)?),
            email: Arc::new(InboxDirectory::new(
                &config.email.inbox_dir,
                Duration::from_millis(config.email.poll_interval_ms),
            )),
            analyzers: Arc::new(analyzers),
            pull_requests: Arc::new(GhPullRequests::new(
                &config.github.repo_dir,
                &config.github.merge_method,
            )?),
            deployment: Arc::new(HttpHealthCheck::new()?),
            fixer: claude.clone(),
            researcher: claude.clone(),
            operator: Arc::new(ConsoleOperator::new()),
            visual_grader: config
                .llm
                .visual_grading
                .then(|| claude as Arc<dyn VisualGrader>),
        })
    }
}

// ============================================================================
// Task and outcome
// ============================================================================

/// One request to drive a service's output to convergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopTask {
    /// Identifies the task across restarts; a persisted state is resumed
    /// only when its task id matches.
    pub task_id: String,
    pub service_name: String,
    /// Form data submitted to the service frontend.
    pub payload: serde_json::Value,
    /// Template the generated document is compared against.
    pub template: String,
}

impl LoopTask {
    /// Task whose id is the service name.
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        template: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let service_name = service_name.into();
        Self {
            task_id: service_name.clone(),
            service_name,
            payload,
            template: template.into(),
        }
    }

    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Completed,
    Failed,
    Timeout,
    /// Stopped on an exhausted transient failure; resumable.
    Suspended,
}

impl LoopStatus {
    /// Process exit status for the CLI.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Failed => 1,
            Self::Timeout => 4,
            Self::Suspended => 75,
        }
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "PASSED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Suspended => write!(f, "SUSPENDED"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub status: LoopStatus,
    pub phase: LoopPhase,
    pub iterations: u32,
    pub prs_merged: u32,
    pub elapsed: Duration,
    pub summary: String,
    /// Failure category for anything but a completed run.
    pub category: Option<FailureCategory>,
}

impl LoopOutcome {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

/// Result of one phase handler.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Transition {
    pub(crate) to: LoopPhase,
    pub(crate) message: String,
    pub(crate) category: Option<FailureCategory>,
}

impl Transition {
    pub(crate) fn to(to: LoopPhase, message: impl Into<String>) -> Self {
        Self {
            to,
            message: message.into(),
            category: None,
        }
    }

    pub(crate) fn fail(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            to: LoopPhase::Failed,
            message: message.into(),
            category: Some(category),
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Drives the feedback loop state machine.
#[derive(Debug)]
pub struct FeedbackLoopManager {
    config: ConvergeConfig,
    deps: LoopDependencies,
    retry: RetryExecutor,
    persistence: LoopStatePersistence,
    observers: ProgressBroadcaster,
}

impl FeedbackLoopManager {
    /// Fails if the configuration is invalid.
    pub fn new(config: ConvergeConfig, deps: LoopDependencies) -> Result<Self> {
        config.validate()?;
        let retry = RetryExecutor::new(RetryPolicy::from_settings(&config.retry))?;
        let persistence = LoopStatePersistence::new(&config.state_file)
            .with_history_capacity(config.loop_settings.history_capacity);
        Ok(Self {
            config,
            deps,
            retry,
            persistence,
            observers: ProgressBroadcaster::new(),
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.subscribe(observer);
        self
    }

    #[must_use]
    pub fn persistence(&self) -> &LoopStatePersistence {
        &self.persistence
    }

    #[must_use]
    pub fn config(&self) -> &ConvergeConfig {
        &self.config
    }

    /// Run `task` until it completes, fails, times out or suspends.
    ///
    /// The wall-clock budget counts from the task's persisted `started_at`,
    /// so a resumed run only gets what is left of it. Each phase runs under
    /// the remaining budget and is cancelled when it runs out.
    ///
    /// Errors are returned only when state cannot be loaded or saved.
    pub async fn run(&self, task: &LoopTask) -> Result<LoopOutcome> {
        let started = Instant::now();
        let (mut state, resumed) = self.restore_or_start(task)?;
        let deadline = started + self.remaining_budget(&state);

        let opening = if resumed {
            format!("Resuming task '{}' at {}", task.task_id, state.state)
        } else {
            format!("Starting task '{}' for {}", task.task_id, task.service_name)
        };
        self.persistence.save(&mut state)?;
        self.announce(&state, &opening);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.time_out(&mut state, started);
            }

            debug!(phase = %state.state, iteration = state.iteration, "Running phase");
            let stepped = tokio::time::timeout(remaining, self.step(&mut state, task)).await;
            let Ok(stepped) = stepped else {
                return self.time_out(&mut state, started);
            };

            match stepped {
                Ok(transition) => {
                    state.last_error = None;
                    state.transition(transition.to);
                    self.persistence.save(&mut state)?;
                    self.announce(&state, &transition.message);

                    match transition.to {
                        LoopPhase::Completed => {
                            self.persistence.clear();
                            let summary = format!(
                                "Output passed after {} iteration(s): {}",
                                state.iteration, transition.message
                            );
                            info!("{}", summary);
                            return Ok(self.outcome(&state, LoopStatus::Completed, started, summary, None));
                        }
                        LoopPhase::Failed => {
                            let category = transition.category.unwrap_or(FailureCategory::Structural);
                            let summary = format!("{}: {}", category.explanation(), transition.message);
                            state.last_error = Some(summary.clone());
                            self.persistence.save(&mut state)?;
                            warn!("{}", summary);
                            return Ok(self.outcome(&state, LoopStatus::Failed, started, summary, Some(category)));
                        }
                        _ => {}
                    }
                }
                Err(_) if Instant::now() >= deadline => {
                    return self.time_out(&mut state, started);
                }
                Err(err) if err.is_transient() => {
                    let summary = format!("{err} (will resume at {})", state.state);
                    warn!("Suspending: {}", summary);
                    state.last_error = Some(err.to_string());
                    self.persistence.save(&mut state)?;
                    self.announce(&state, &format!("Suspended: {err}"));
                    return Ok(self.outcome(&state, LoopStatus::Suspended, started, summary, Some(FailureCategory::Transient)));
                }
                Err(err) => {
                    let summary = format!("{}: {err}", FailureCategory::Structural.explanation());
                    warn!("Failing: {}", summary);
                    state.last_error = Some(summary.clone());
                    state.transition(LoopPhase::Failed);
                    self.persistence.save(&mut state)?;
                    self.announce(&state, &summary);
                    return Ok(self.outcome(&state, LoopStatus::Failed, started, summary, Some(FailureCategory::Structural)));
                }
            }
        }
    }

    /// Budget left for `state`, measured from its `started_at`.
    fn remaining_budget(&self, state: &LoopState) -> Duration {
        let spent = state.age().to_std().unwrap_or_default();
        self.config.loop_settings.max_duration().saturating_sub(spent)
    }

    fn time_out(&self, state: &mut LoopState, started: Instant) -> Result<LoopOutcome> {
        let message = format!(
            "Wall-clock budget of {}s exceeded during {}",
            self.config.loop_settings.max_duration_secs, state.state
        );
        warn!("{}", message);
        state.last_error = Some(message.clone());
        state.transition(LoopPhase::Timeout);
        self.persistence.save(state)?;
        self.announce(state, &message);
        Ok(self.outcome(state, LoopStatus::Timeout, started, message, Some(FailureCategory::Transient)))
    }

    /// Resume a matching unfinished state or start fresh. A finished state
    /// for the same task donates its consumed email ids.
    fn restore_or_start(&self, task: &LoopTask) -> Result<(LoopState, bool)> {
        let capacity = self.config.loop_settings.history_capacity;
        let mut fresh = LoopState::new(&task.service_name, &task.task_id, capacity);

        match self.persistence.load()? {
            Some(mut previous) if previous.is_resumable_for(&task.task_id) => {
                info!(
                    "Resuming task '{}' at {} (iteration {})",
                    task.task_id, previous.state, previous.iteration
                );
                previous.issues.set_capacity(capacity);
                Ok((previous, true))
            }
            Some(previous) if previous.matches_task(&task.task_id) => {
                info!(
                    "Previous run of '{}' ended in {}; starting over",
                    task.task_id, previous.state
                );
                fresh.seen_email_ids = previous.seen_email_ids;
                Ok((fresh, false))
            }
            Some(previous) => {
                info!(
                    "Discarding state of task {:?}; starting '{}'",
                    previous.task_id, task.task_id
                );
                Ok((fresh, false))
            }
            None => Ok((fresh, false)),
        }
    }

    async fn step(&self, state: &mut LoopState, task: &LoopTask) -> Result<Transition> {
        match state.state {
            LoopPhase::Idle => Ok(self.idle(state)),
            LoopPhase::TestingFrontend => self.testing_frontend(state, task).await,
            LoopPhase::WaitingForEmail => self.waiting_for_email(state).await,
            LoopPhase::AnalyzingOutput => self.analyzing_output(state, task).await,
            LoopPhase::Passed => self.passed(state).await,
            LoopPhase::Stuck => self.stuck(state).await,
            LoopPhase::GeneratingFix => self.generating_fix(state, task).await,
            LoopPhase::WaitingForPr => self.waiting_for_pr(state).await,
            LoopPhase::MergingPr => self.merging_pr(state).await,
            LoopPhase::WaitingForDeploy => self.waiting_for_deploy(state).await,
            LoopPhase::Completed | LoopPhase::Failed | LoopPhase::Timeout => Err(
                ConvergeError::loop_error(format!("no handler for terminal phase {}", state.state)),
            ),
        }
    }

    fn announce(&self, state: &LoopState, message: &str) {
        let screenshot = (state.state == LoopPhase::AnalyzingOutput)
            .then(|| state.pending.attachment_path.clone())
            .flatten();
        let update = ProgressUpdate::new(state.state, state.iteration, message)
            .with_plan_progress(state.cycle.progress())
            .with_screenshot(screenshot);
        self.observers.broadcast(&update);
    }

    fn outcome(
        &self,
        state: &LoopState,
        status: LoopStatus,
        started: Instant,
        summary: String,
        category: Option<FailureCategory>,
    ) -> LoopOutcome {
        LoopOutcome {
            status,
            phase: state.state,
            iterations: state.iteration,
            prs_merged: state.prs_merged,
            elapsed: started.elapsed(),
            summary,
            category,
        }
    }

    /// Advance a plan step; out-of-order moves (a second fix attempt in the
    /// same iteration) keep the first recorded status.
    fn mark(state: &mut LoopState, step: CycleStep, status: StepStatus, note: Option<String>) {
        if let Err(e) = state.cycle.transition(step, status, note) {
            debug!("{}", e);
        }
    }
}
