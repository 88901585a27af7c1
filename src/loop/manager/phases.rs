//! One handler per non-terminal loop phase.
//!
//! Handlers do their external work through the retry executor and report
//! the next phase as a [`Transition`]; the caller applies it, persists and
//! broadcasts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{FeedbackLoopManager, LoopTask, Transition};
use crate::collaborators::{
    Approval, ChecksState, DeploymentHealth, EmailQuery, EscalationDecision, FixOutcome,
    FixRequest, FormSubmission, PrState, PrStatus, PullRequests, ServiceContext, StuckReport,
    SubmitResponse,
};
use crate::config::StuckEscalation;
use crate::error::{classify_anyhow, ConvergeError, FailureCategory, Result};
use crate::quality::{AnalysisResult, Discrepancy, Severity, VerdictPolicy};
use crate::r#loop::plan::{CycleStep, StepStatus};
use crate::r#loop::retry::RetryError;
use crate::r#loop::state::{LoopPhase, LoopState};
use crate::stagnation::{IssuePatternDetector, IterationRecord};

/// Extra time the executor allows on top of the watcher's own wait.
const EMAIL_GRACE: Duration = Duration::from_secs(5);

/// Iterations handed to the researcher.
const RESEARCH_HISTORY: usize = 5;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn is_retryable(error: &anyhow::Error) -> bool {
    classify_anyhow(error) == FailureCategory::Transient
}

fn checked_submit(response: SubmitResponse) -> anyhow::Result<SubmitResponse> {
    if response.success {
        return Ok(response);
    }
    let detail = response
        .error
        .clone()
        .unwrap_or_else(|| format!("HTTP {}", response.status_code));
    let error = if response.is_structural_failure() {
        ConvergeError::collaborator_structural("frontend", format!("submission rejected: {detail}"))
    } else {
        ConvergeError::collaborator("frontend", format!("submission failed: {detail}"))
    };
    Err(error.into())
}

fn opened_pr(outcome: FixOutcome) -> anyhow::Result<u64> {
    match outcome.pr_number {
        Some(number) if outcome.success => Ok(number),
        _ => Err(ConvergeError::collaborator(
            "fix generator",
            format!("no pull request opened: {}", outcome.summary),
        )
        .into()),
    }
}

/// Poll until the PR leaves the open-with-pending-checks state.
async fn settle_pr(prs: &dyn PullRequests, pr: u64, poll: Duration) -> anyhow::Result<PrStatus> {
    loop {
        let status = prs.status(pr).await?;
        if status.state == PrState::Open && status.checks == ChecksState::Pending {
            debug!("PR #{} checks pending", pr);
            tokio::time::sleep(poll).await;
            continue;
        }
        return Ok(status);
    }
}

/// Merge unless someone already did. Returns the PR's final state.
async fn merge_pr(prs: &dyn PullRequests, pr: u64) -> anyhow::Result<PrState> {
    let status = prs.status(pr).await?;
    if status.state != PrState::Open {
        return Ok(status.state);
    }
    if prs.merge(pr).await? {
        Ok(PrState::Merged)
    } else {
        Err(ConvergeError::not_ready("merge", format!("PR #{pr} is not mergeable yet")).into())
    }
}

async fn await_healthy(
    health: &dyn DeploymentHealth,
    url: &str,
    marker: Option<&str>,
    poll: Duration,
) -> anyhow::Result<()> {
    loop {
        if health.check(url, marker).await?.healthy {
            return Ok(());
        }
        debug!("Deployment at {} not healthy yet", url);
        tokio::time::sleep(poll).await;
    }
}

/// An unreadable document is a failed check, not a crash.
fn malformed_result(path: &Path, message: &str, policy: &VerdictPolicy) -> AnalysisResult {
    let discrepancy = Discrepancy::new(
        Severity::Critical,
        "malformed_document",
        path.display().to_string(),
        "a readable document",
        message,
    )
    .with_suggestion("Fix the generator so it writes a valid file");
    AnalysisResult::new(1, 0, vec![discrepancy], format!("{} could not be read", path.display()), policy)
}

impl FeedbackLoopManager {
    pub(super) fn idle(&self, state: &LoopState) -> Transition {
        let max = self.config.loop_settings.max_iterations;
        if state.iteration >= max {
            return Transition::fail(
                FailureCategory::Quality,
                format!("iteration limit ({max}) reached without a passing result"),
            );
        }
        Transition::to(
            LoopPhase::TestingFrontend,
            format!("Starting iteration {}", state.iteration + 1),
        )
    }

    pub(super) async fn testing_frontend(&self, state: &mut LoopState, task: &LoopTask) -> Result<Transition> {
        Self::mark(state, CycleStep::Submit, StepStatus::InProgress, None);

        let form = FormSubmission {
            service_name: task.service_name.clone(),
            payload: task.payload.clone(),
        };
        let form = &form;
        let frontend = &self.deps.frontend;
        let response = self
            .retry
            .run_if(
                "submit",
                secs(self.config.timeouts.submit),
                |_| async move { checked_submit(frontend.submit(form).await?) },
                is_retryable,
            )
            .await
            .map_err(RetryError::into_converge)?;

        let message = format!("Submitted form to {} (HTTP {})", task.service_name, response.status_code);
        Self::mark(state, CycleStep::Submit, StepStatus::Completed, Some(message.clone()));
        Ok(Transition::to(LoopPhase::WaitingForEmail, message))
    }

    pub(super) async fn waiting_for_email(&self, state: &mut LoopState) -> Result<Transition> {
        Self::mark(state, CycleStep::AwaitOutput, StepStatus::InProgress, None);

        let wait = self.retry.effective_timeout(secs(self.config.timeouts.email));
        let query = EmailQuery {
            timeout: wait,
            sender_allowlist: self.config.email.sender_allowlist.clone(),
            subject_allowlist: self.config.email.subject_allowlist.clone(),
            seen_ids: state.seen_email_ids.clone(),
        };
        let query = &query;
        let email = &self.deps.email;
        let received = self
            .retry
            .run_if(
                "email",
                wait + EMAIL_GRACE,
                |_| async move {
                    email.poll(query).await?.ok_or_else(|| {
                        anyhow::Error::from(ConvergeError::not_ready(
                            "email",
                            format!("no output email within {}s", query.timeout.as_secs()),
                        ))
                    })
                },
                is_retryable,
            )
            .await
            .map_err(RetryError::into_converge)?;

        if !state.mark_email_seen(received.email_id.clone()) {
            return Ok(Transition::to(
                LoopPhase::WaitingForEmail,
                format!("Skipping already processed email {}", received.email_id),
            ));
        }
        let Some(attachment) = received.attachment_path else {
            return Ok(Transition::to(
                LoopPhase::WaitingForEmail,
                format!("Email {} has no attachment; still waiting", received.email_id),
            ));
        };

        let message = format!("Received {} in email {}", attachment.display(), received.email_id);
        state.pending.attachment_path = Some(attachment);
        state.pending.email_id = Some(received.email_id);
        Self::mark(state, CycleStep::AwaitOutput, StepStatus::Completed, Some(message.clone()));
        Ok(Transition::to(LoopPhase::AnalyzingOutput, message))
    }

    pub(super) async fn analyzing_output(&self, state: &mut LoopState, task: &LoopTask) -> Result<Transition> {
        let Some(path) = state.pending.attachment_path.clone() else {
            return Ok(Transition::to(
                LoopPhase::WaitingForEmail,
                "No document recorded for analysis; waiting for output",
            ));
        };
        Self::mark(state, CycleStep::Analyze, StepStatus::InProgress, None);

        let timeout = secs(self.config.timeouts.analyze);
        let registry = &self.deps.analyzers;
        let (doc, template) = (&path, task.template.as_str());
        let analysis = self
            .retry
            .run_if(
                "analyze",
                timeout,
                |_| {
                    let registry = Arc::clone(registry);
                    let doc = doc.clone();
                    let template = template.to_string();
                    async move {
                        tokio::task::spawn_blocking(move || registry.analyze_output(&doc, &template))
                            .await?
                            .map_err(anyhow::Error::from)
                    }
                },
                is_retryable,
            )
            .await
            .map_err(RetryError::into_converge);

        let result = match analysis {
            Ok(mut result) => {
                if let Some(extra) = self.grade_visually(&path, &task.template, timeout).await {
                    result.merge(extra, &self.config.verdict);
                }
                result
            }
            Err(ConvergeError::MalformedDocument { path, message }) => {
                warn!("Generated document {} is malformed: {}", path.display(), message);
                malformed_result(&path, &message, &self.config.verdict)
            }
            Err(e) => return Err(e),
        };
        let headline = result.headline();
        Self::mark(state, CycleStep::Analyze, StepStatus::Completed, Some(headline.clone()));

        if result.passed {
            state.pending.last_result = Some(result);
            return Ok(Transition::to(LoopPhase::Passed, headline));
        }

        let issues = result.issue_descriptions();
        let fingerprint = IssuePatternDetector::fingerprint(&issues);
        let occurrences = state
            .issues
            .record_iteration(IterationRecord::new(state.iteration, fingerprint.clone(), issues));
        state.pending.discrepancies = result.discrepancies.clone();
        state.pending.last_result = Some(result);

        let settings = &self.config.loop_settings;
        if state.iteration >= settings.max_iterations {
            return Ok(Transition::fail(
                FailureCategory::Quality,
                format!("{headline} after {} iteration(s)", state.iteration),
            ));
        }
        if state.issues.is_stuck(&fingerprint, settings.stuck_threshold) {
            let message = format!(
                "Issue set {} has now occurred {} times",
                fingerprint.short(),
                occurrences
            );
            state.pending.stuck_fingerprint = Some(fingerprint);
            return Ok(Transition::to(LoopPhase::Stuck, message));
        }
        Ok(Transition::to(LoopPhase::GeneratingFix, headline))
    }

    /// Optional LLM review; failures are logged and ignored.
    async fn grade_visually(
        &self,
        path: &Path,
        template_name: &str,
        timeout: Duration,
    ) -> Option<Vec<Discrepancy>> {
        let grader = self.deps.visual_grader.as_ref()?;
        let template = match self.deps.analyzers.templates().get(template_name) {
            Ok(template) => template,
            Err(e) => {
                warn!("Skipping visual grading: {}", e);
                return None;
            }
        };
        match tokio::time::timeout(timeout, grader.grade(path, template)).await {
            Ok(Ok(findings)) => {
                debug!("Visual grading added {} finding(s)", findings.len());
                Some(findings)
            }
            Ok(Err(e)) => {
                warn!("Visual grading failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Visual grading timed out after {}s", timeout.as_secs());
                None
            }
        }
    }

    pub(super) async fn passed(&self, state: &mut LoopState) -> Result<Transition> {
        let Some(result) = state.pending.last_result.clone() else {
            return Ok(Transition::to(
                LoopPhase::AnalyzingOutput,
                "No analysis result recorded; analyzing again",
            ));
        };

        let approval = if self.config.loop_settings.require_approval {
            let operator = &self.deps.operator;
            let result = &result;
            self.retry
                .run_if(
                    "review",
                    secs(self.config.timeouts.review),
                    |_| async move { operator.review(result).await },
                    is_retryable,
                )
                .await
                .map_err(RetryError::into_converge)?
        } else {
            Approval::Approved
        };

        match approval {
            Approval::Approved => {
                for step in CycleStep::FIX_STEPS {
                    Self::mark(state, step, StepStatus::Skipped, Some("output passed".to_string()));
                }
                Ok(Transition::to(LoopPhase::Completed, result.headline()))
            }
            Approval::Rejected { feedback } => {
                info!("Operator rejected passing output: {}", feedback);
                if state.iteration >= self.config.loop_settings.max_iterations {
                    return Ok(Transition::fail(
                        FailureCategory::Quality,
                        format!("operator rejected the final iteration: {feedback}"),
                    ));
                }
                let mut discrepancies = result.discrepancies;
                discrepancies.push(Discrepancy::new(
                    Severity::High,
                    "approval",
                    "operator review",
                    "operator approval",
                    feedback.clone(),
                ));
                state.pending.discrepancies = discrepancies;
                Ok(Transition::to(
                    LoopPhase::GeneratingFix,
                    format!("Operator requested changes: {feedback}"),
                ))
            }
        }
    }

    pub(super) async fn stuck(&self, state: &mut LoopState) -> Result<Transition> {
        let issues = state
            .pending
            .last_result
            .as_ref()
            .map(AnalysisResult::issue_descriptions)
            .unwrap_or_default();
        let fingerprint = state
            .pending
            .stuck_fingerprint
            .clone()
            .unwrap_or_else(|| IssuePatternDetector::fingerprint(&issues));
        let occurrences = state.issues.occurrences(&fingerprint);
        let settings = &self.config.loop_settings;

        if settings.stuck_escalation == StuckEscalation::Abort {
            return Ok(Transition::fail(
                FailureCategory::Stuck,
                format!("issue set {} recurred {} times", fingerprint.short(), occurrences),
            ));
        }

        if settings.approve_escalation {
            let report = StuckReport {
                fingerprint: fingerprint.clone(),
                occurrences,
                iteration: state.iteration,
                issues,
            };
            let (operator, report) = (&self.deps.operator, &report);
            let decision = self
                .retry
                .run_if(
                    "escalate",
                    secs(self.config.timeouts.review),
                    |_| async move { operator.escalate(report).await },
                    is_retryable,
                )
                .await
                .map_err(RetryError::into_converge)?;
            if decision == EscalationDecision::Abort {
                return Ok(Transition::fail(
                    FailureCategory::Stuck,
                    format!("operator aborted after issue set {} recurred {} times", fingerprint.short(), occurrences),
                ));
            }
        }

        let history: Vec<IterationRecord> = state
            .issues
            .recent(RESEARCH_HISTORY)
            .into_iter()
            .cloned()
            .collect();
        let (researcher, history) = (&self.deps.researcher, history.as_slice());
        let report = self
            .retry
            .run_if(
                "research",
                secs(self.config.timeouts.research),
                |_| async move { researcher.research(history).await },
                is_retryable,
            )
            .await
            .map_err(RetryError::into_converge)?;

        let message = format!("Researched recurring issues: {}", report.root_cause);
        state.pending.research = Some(report);
        Ok(Transition::to(LoopPhase::GeneratingFix, message))
    }

    pub(super) async fn generating_fix(&self, state: &mut LoopState, task: &LoopTask) -> Result<Transition> {
        Self::mark(state, CycleStep::GenerateFix, StepStatus::InProgress, None);

        let request = FixRequest {
            discrepancies: state.pending.discrepancies.clone(),
            context: ServiceContext {
                service_name: task.service_name.clone(),
                template: task.template.clone(),
                iteration: state.iteration,
                repo_dir: self.config.github.repo_dir.clone(),
                abandoned_prs: state.pending.closed_prs.clone(),
            },
            research: state.pending.research.clone(),
        };
        let (fixer, request) = (&self.deps.fixer, &request);
        let pr = self
            .retry
            .run_if(
                "fix",
                secs(self.config.timeouts.fix),
                |_| async move { opened_pr(fixer.generate_fix(request).await?) },
                is_retryable,
            )
            .await
            .map_err(RetryError::into_converge)?;

        state.pending.pr_number = Some(pr);
        let message = format!("Opened PR #{pr}");
        Self::mark(state, CycleStep::GenerateFix, StepStatus::Completed, Some(message.clone()));
        Ok(Transition::to(LoopPhase::WaitingForPr, message))
    }

    pub(super) async fn waiting_for_pr(&self, state: &mut LoopState) -> Result<Transition> {
        let Some(pr) = state.pending.pr_number else {
            return Ok(Transition::to(LoopPhase::GeneratingFix, "No pull request recorded; generating a fix"));
        };
        Self::mark(state, CycleStep::AwaitPr, StepStatus::InProgress, None);

        let prs = self.deps.pull_requests.as_ref();
        let poll = self.config.loop_settings.poll_interval();
        let status = self
            .retry
            .run_if(
                "pr",
                secs(self.config.timeouts.pr),
                |_| async move { settle_pr(prs, pr, poll).await },
                is_retryable,
            )
            .await
            .map_err(RetryError::into_converge)?;

        match (status.state, status.checks) {
            (PrState::Merged, _) => {
                state.prs_merged += 1;
                Self::mark(state, CycleStep::AwaitPr, StepStatus::Completed, None);
                Self::mark(state, CycleStep::Merge, StepStatus::Skipped, Some("merged externally".to_string()));
                Ok(Transition::to(LoopPhase::WaitingForDeploy, format!("PR #{pr} was merged")))
            }
            (PrState::Open, ChecksState::Passing) => {
                Self::mark(state, CycleStep::AwaitPr, StepStatus::Completed, Some("checks passing".to_string()));
                Ok(Transition::to(LoopPhase::MergingPr, format!("PR #{pr} checks passed")))
            }
            (PrState::Closed, _) | (PrState::Open, ChecksState::Failing) => {
                let reason = if status.state == PrState::Closed {
                    "was closed without merging"
                } else {
                    "has failing checks"
                };
                Ok(self.abandon_pr(state, pr, reason))
            }
            (PrState::Open, ChecksState::Pending) => Err(ConvergeError::not_ready(
                "pr",
                format!("PR #{pr} checks still pending"),
            )),
        }
    }

    pub(super) async fn merging_pr(&self, state: &mut LoopState) -> Result<Transition> {
        let Some(pr) = state.pending.pr_number else {
            return Ok(Transition::to(LoopPhase::GeneratingFix, "No pull request recorded; generating a fix"));
        };
        Self::mark(state, CycleStep::Merge, StepStatus::InProgress, None);

        let prs = self.deps.pull_requests.as_ref();
        let outcome = self
            .retry
            .run_if(
                "merge",
                secs(self.config.timeouts.merge),
                |_| async move { merge_pr(prs, pr).await },
                is_retryable,
            )
            .await
            .map_err(RetryError::into_converge)?;

        if outcome == PrState::Merged {
            state.prs_merged += 1;
            let message = format!("Merged PR #{pr}");
            Self::mark(state, CycleStep::Merge, StepStatus::Completed, Some(message.clone()));
            Ok(Transition::to(LoopPhase::WaitingForDeploy, message))
        } else {
            Ok(self.abandon_pr(state, pr, "was closed before it could be merged"))
        }
    }

    pub(super) async fn waiting_for_deploy(&self, state: &mut LoopState) -> Result<Transition> {
        Self::mark(state, CycleStep::Deploy, StepStatus::InProgress, None);

        if let Some(url) = self.config.deploy.url.as_deref() {
            let health = self.deps.deployment.as_ref();
            let marker = self.config.deploy.expected_marker.as_deref();
            let poll = self.config.loop_settings.poll_interval();
            self.retry
                .run_if(
                    "deploy",
                    secs(self.config.timeouts.deploy),
                    |_| async move { await_healthy(health, url, marker, poll).await },
                    is_retryable,
                )
                .await
                .map_err(RetryError::into_converge)?;
        }

        state.last_fix_deployed_epoch = Some(Utc::now().timestamp());
        Self::mark(state, CycleStep::Deploy, StepStatus::Completed, None);
        Ok(Transition::to(LoopPhase::TestingFrontend, "Fix deployed; testing again"))
    }

    fn abandon_pr(&self, state: &mut LoopState, pr: u64, reason: &str) -> Transition {
        warn!("PR #{} {}; generating another fix", pr, reason);
        state.pending.closed_prs.push(pr);
        state.pending.pr_number = None;
        Self::mark(state, CycleStep::AwaitPr, StepStatus::Failed, Some(format!("PR #{pr} {reason}")));
        Transition::to(LoopPhase::GeneratingFix, format!("PR #{pr} {reason}"))
    }
}
