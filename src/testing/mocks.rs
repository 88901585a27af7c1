//! Mock collaborators.
//!
//! These mocks provide controllable test doubles for every system the loop
//! talks to, enabling deterministic end-to-end runs of the state machine.
//! Scripted responses are consumed in order; the last one repeats.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::collaborators::{
    Approval, ChecksState, DeploymentHealth, EmailQuery, EmailWatcher, EscalationDecision,
    FixGenerator, FixOutcome, FixRequest, FormSubmission, FrontendSubmitter, HealthStatus,
    Operator, PrState, PrStatus, PullRequests, ReceivedEmail, ResearchReport, Researcher,
    StuckReport, SubmitResponse, VisualGrader,
};
use crate::error::ConvergeError;
use crate::quality::{
    AnalysisResult, AnalyzerRegistry, Discrepancy, OutputAnalyzer, Severity, TemplateLibrary,
    TemplateSpec, VerdictPolicy,
};
use crate::r#loop::manager::LoopDependencies;
use crate::r#loop::progress::{ProgressObserver, ProgressUpdate};
use crate::r#loop::state::LoopPhase;
use crate::stagnation::IterationRecord;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pop the next scripted value, repeating the last one once the script runs dry.
fn next_scripted<T: Clone>(script: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut script = lock(script);
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

// ============================================================================
// Analysis results
// ============================================================================

/// A passing result with `checks` successful checks.
#[must_use]
pub fn passing_result(checks: u32) -> AnalysisResult {
    AnalysisResult::new(checks, checks, Vec::new(), "all checks passed", &VerdictPolicy::default())
}

/// A failing result with one critical content discrepancy per issue.
#[must_use]
pub fn failing_result(issues: &[&str]) -> AnalysisResult {
    let discrepancies: Vec<Discrepancy> = issues
        .iter()
        .map(|issue| Discrepancy::new(Severity::Critical, "content", *issue, "present", "missing"))
        .collect();
    let total = discrepancies.len() as u32 + 5;
    AnalysisResult::new(total, 5, discrepancies, "content mismatch", &VerdictPolicy::default())
}

// ============================================================================
// Frontend
// ============================================================================

#[derive(Debug, Clone)]
enum SubmitScript {
    Respond(SubmitResponse),
    Fail(String),
}

/// Mock frontend. Accepts every submission with HTTP 200 by default.
#[derive(Debug)]
pub struct MockFrontend {
    script: Mutex<VecDeque<SubmitScript>>,
    submissions: Mutex<Vec<FormSubmission>>,
}

impl Default for MockFrontend {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::from([SubmitScript::Respond(SubmitResponse {
                success: true,
                status_code: 200,
                response: serde_json::json!({"status": "queued"}),
                error: None,
            })])),
            submissions: Mutex::new(Vec::new()),
        }
    }
}

impl MockFrontend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the script with a single unsuccessful HTTP status.
    #[must_use]
    pub fn with_status(self, status_code: u16) -> Self {
        let response = SubmitResponse {
            success: (200..300).contains(&status_code),
            status_code,
            response: serde_json::Value::Null,
            error: None,
        };
        *lock(&self.script) = VecDeque::from([SubmitScript::Respond(response)]);
        self
    }

    /// Replace the script with a transport error.
    #[must_use]
    pub fn with_error(self, error: &str) -> Self {
        *lock(&self.script) = VecDeque::from([SubmitScript::Fail(error.to_string())]);
        self
    }

    pub fn submission_count(&self) -> usize {
        lock(&self.submissions).len()
    }

    pub fn submissions(&self) -> Vec<FormSubmission> {
        lock(&self.submissions).clone()
    }
}

#[async_trait]
impl FrontendSubmitter for MockFrontend {
    async fn submit(&self, form: &FormSubmission) -> Result<SubmitResponse> {
        lock(&self.submissions).push(form.clone());
        match next_scripted(&self.script) {
            Some(SubmitScript::Respond(response)) => Ok(response),
            Some(SubmitScript::Fail(error)) => bail!("{}", error),
            None => bail!("no scripted frontend response"),
        }
    }
}

// ============================================================================
// Email
// ============================================================================

/// Mock inbox. Every poll delivers a fresh message `msg-N` carrying the
/// configured attachment, unless queued messages or silence are scripted.
#[derive(Debug, Default)]
pub struct MockEmailWatcher {
    attachment: Option<PathBuf>,
    queued: Mutex<VecDeque<ReceivedEmail>>,
    silent: bool,
    hangs: bool,
    polls: AtomicU32,
}

impl MockEmailWatcher {
    #[must_use]
    pub fn new(attachment: impl Into<PathBuf>) -> Self {
        Self {
            attachment: Some(attachment.into()),
            ..Self::default()
        }
    }

    /// Never deliver anything.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// Every poll blocks forever, like an IMAP session that never answers.
    #[must_use]
    pub fn hanging() -> Self {
        Self {
            hangs: true,
            ..Self::default()
        }
    }

    /// Deliver `email` before any generated message.
    #[must_use]
    pub fn with_email(self, email: ReceivedEmail) -> Self {
        lock(&self.queued).push_back(email);
        self
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailWatcher for MockEmailWatcher {
    async fn poll(&self, query: &EmailQuery) -> Result<Option<ReceivedEmail>> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hangs {
            std::future::pending::<()>().await;
        }
        if let Some(email) = lock(&self.queued).pop_front() {
            return Ok(Some(email));
        }
        if self.silent {
            return Ok(None);
        }
        let email_id = format!("msg-{n}");
        if query.seen_ids.contains(&email_id) {
            return Ok(None);
        }
        Ok(Some(ReceivedEmail {
            email_id,
            from: "reports@service.test".to_string(),
            subject: "Your generated document".to_string(),
            attachment_path: self.attachment.clone(),
        }))
    }
}

// ============================================================================
// Analyzer
// ============================================================================

#[derive(Debug, Clone)]
enum AnalysisScript {
    Result(AnalysisResult),
    Malformed(String),
}

/// Mock document analyzer.
#[derive(Debug)]
pub struct MockAnalyzer {
    extensions: &'static [&'static str],
    script: Mutex<VecDeque<AnalysisScript>>,
    calls: AtomicU32,
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self {
            extensions: &["pptx"],
            script: Mutex::new(VecDeque::from([AnalysisScript::Result(passing_result(10))])),
            calls: AtomicU32::new(0),
        }
    }
}

impl MockAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: &'static [&'static str]) -> Self {
        self.extensions = extensions;
        self
    }

    /// Return these results in order; the last one repeats.
    #[must_use]
    pub fn with_results(self, results: impl IntoIterator<Item = AnalysisResult>) -> Self {
        *lock(&self.script) = results.into_iter().map(AnalysisScript::Result).collect();
        self
    }

    /// Report every document as unreadable.
    #[must_use]
    pub fn malformed(self, message: &str) -> Self {
        *lock(&self.script) = VecDeque::from([AnalysisScript::Malformed(message.to_string())]);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OutputAnalyzer for MockAnalyzer {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        self.extensions
    }

    fn analyze(&self, path: &Path, _template: &TemplateSpec) -> crate::Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match next_scripted(&self.script) {
            Some(AnalysisScript::Result(result)) => Ok(result),
            Some(AnalysisScript::Malformed(message)) => Err(ConvergeError::malformed(path, message)),
            None => Ok(passing_result(1)),
        }
    }
}

/// Registry holding only `analyzer` and an empty template named `template`.
#[must_use]
pub fn mock_registry(analyzer: Arc<MockAnalyzer>, template: &str) -> AnalyzerRegistry {
    let mut templates = TemplateLibrary::new();
    templates.insert(TemplateSpec::named(template));
    let mut registry = AnalyzerRegistry::new(templates);
    registry.register(analyzer);
    registry
}

// ============================================================================
// Pull requests
// ============================================================================

/// Mock GitHub. PRs are open with passing checks and merge cleanly by default.
#[derive(Debug)]
pub struct MockPullRequests {
    script: Mutex<VecDeque<(PrState, ChecksState)>>,
    merge_succeeds: bool,
    status_calls: AtomicU32,
    merges: AtomicU32,
}

impl Default for MockPullRequests {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::from([(PrState::Open, ChecksState::Passing)])),
            merge_succeeds: true,
            status_calls: AtomicU32::new(0),
            merges: AtomicU32::new(0),
        }
    }
}

impl MockPullRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Status sequence reported by `status`; the last one repeats.
    #[must_use]
    pub fn with_statuses(self, statuses: impl IntoIterator<Item = (PrState, ChecksState)>) -> Self {
        *lock(&self.script) = statuses.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_merge_result(mut self, succeeds: bool) -> Self {
        self.merge_succeeds = succeeds;
        self
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn merge_count(&self) -> u32 {
        self.merges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PullRequests for MockPullRequests {
    async fn status(&self, pr_number: u64) -> Result<PrStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let (state, checks) = next_scripted(&self.script).unwrap_or((PrState::Open, ChecksState::Passing));
        Ok(PrStatus {
            number: pr_number,
            state,
            checks,
            commits: vec![format!("{pr_number:07x}")],
        })
    }

    async fn merge(&self, _pr_number: u64) -> Result<bool> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        Ok(self.merge_succeeds)
    }
}

// ============================================================================
// Deployment
// ============================================================================

/// Mock deployment health check. Healthy unless told otherwise.
#[derive(Debug)]
pub struct MockDeployment {
    healthy: bool,
    checks: AtomicU32,
}

impl Default for MockDeployment {
    fn default() -> Self {
        Self {
            healthy: true,
            checks: AtomicU32::new(0),
        }
    }
}

impl MockDeployment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Self::default()
        }
    }

    pub fn check_count(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeploymentHealth for MockDeployment {
    async fn check(&self, _url: &str, _expected_marker: Option<&str>) -> Result<HealthStatus> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(HealthStatus {
            healthy: self.healthy,
            body: if self.healthy { "ok" } else { "starting" }.to_string(),
        })
    }
}

// ============================================================================
// LLM collaborators
// ============================================================================

/// Mock fix generator. Opens PRs numbered from 100 upwards.
#[derive(Debug)]
pub struct MockFixGenerator {
    next_pr: AtomicU64,
    fails: bool,
    requests: Mutex<Vec<FixRequest>>,
}

impl Default for MockFixGenerator {
    fn default() -> Self {
        Self {
            next_pr: AtomicU64::new(100),
            fails: false,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockFixGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every attempt as unsuccessful.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fails: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<FixRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl FixGenerator for MockFixGenerator {
    async fn generate_fix(&self, request: &FixRequest) -> Result<FixOutcome> {
        lock(&self.requests).push(request.clone());
        if self.fails {
            return Ok(FixOutcome {
                success: false,
                pr_number: None,
                summary: "could not find the generator code".to_string(),
            });
        }
        let pr_number = self.next_pr.fetch_add(1, Ordering::SeqCst);
        Ok(FixOutcome {
            success: true,
            pr_number: Some(pr_number),
            summary: format!("Fixed {} issue(s)", request.discrepancies.len()),
        })
    }
}

/// Mock researcher returning a fixed report.
#[derive(Debug)]
pub struct MockResearcher {
    report: ResearchReport,
    histories: Mutex<Vec<usize>>,
}

impl Default for MockResearcher {
    fn default() -> Self {
        Self {
            report: ResearchReport {
                root_cause: "layout constants are hard-coded".to_string(),
                alternatives: vec!["derive positions from the template".to_string()],
                recommended_fix: Some("read offsets from the template".to_string()),
            },
            histories: Mutex::new(Vec::new()),
        }
    }
}

impl MockResearcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.histories).len()
    }

    /// Length of the history passed to each call.
    pub fn history_lengths(&self) -> Vec<usize> {
        lock(&self.histories).clone()
    }
}

#[async_trait]
impl Researcher for MockResearcher {
    async fn research(&self, history: &[IterationRecord]) -> Result<ResearchReport> {
        lock(&self.histories).push(history.len());
        Ok(self.report.clone())
    }
}

/// Mock visual grader adding fixed findings.
#[derive(Debug, Default)]
pub struct MockVisualGrader {
    findings: Vec<Discrepancy>,
    error: Option<String>,
}

impl MockVisualGrader {
    #[must_use]
    pub fn with_findings(findings: Vec<Discrepancy>) -> Self {
        Self {
            findings,
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(error: &str) -> Self {
        Self {
            findings: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

#[async_trait]
impl VisualGrader for MockVisualGrader {
    async fn grade(&self, _path: &Path, _template: &TemplateSpec) -> Result<Vec<Discrepancy>> {
        if let Some(ref error) = self.error {
            bail!("{}", error)
        }
        Ok(self.findings.clone())
    }
}

// ============================================================================
// Operator
// ============================================================================

/// Mock operator. Approves and asks for research by default.
#[derive(Debug)]
pub struct MockOperator {
    approvals: Mutex<VecDeque<Approval>>,
    escalation: EscalationDecision,
    reviews: AtomicU32,
    escalations: Mutex<Vec<StuckReport>>,
}

impl Default for MockOperator {
    fn default() -> Self {
        Self {
            approvals: Mutex::new(VecDeque::from([Approval::Approved])),
            escalation: EscalationDecision::Research,
            reviews: AtomicU32::new(0),
            escalations: Mutex::new(Vec::new()),
        }
    }
}

impl MockOperator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Review answers in order; the last one repeats.
    #[must_use]
    pub fn with_approvals(self, approvals: impl IntoIterator<Item = Approval>) -> Self {
        *lock(&self.approvals) = approvals.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_escalation(mut self, decision: EscalationDecision) -> Self {
        self.escalation = decision;
        self
    }

    pub fn review_count(&self) -> u32 {
        self.reviews.load(Ordering::SeqCst)
    }

    pub fn escalation_count(&self) -> usize {
        lock(&self.escalations).len()
    }

    pub fn escalations(&self) -> Vec<StuckReport> {
        lock(&self.escalations).clone()
    }
}

#[async_trait]
impl Operator for MockOperator {
    async fn review(&self, _result: &AnalysisResult) -> Result<Approval> {
        self.reviews.fetch_add(1, Ordering::SeqCst);
        Ok(next_scripted(&self.approvals).unwrap_or(Approval::Approved))
    }

    async fn escalate(&self, report: &StuckReport) -> Result<EscalationDecision> {
        lock(&self.escalations).push(report.clone());
        Ok(self.escalation)
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Records every progress update.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        lock(&self.updates).clone()
    }

    pub fn phases(&self) -> Vec<LoopPhase> {
        lock(&self.updates).iter().map(|u| u.phase).collect()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, update: &ProgressUpdate) {
        lock(&self.updates).push(update.clone());
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Every mock collaborator, kept so tests can inspect them after a run.
///
/// # Example
///
/// ```rust,ignore
/// let mocks = MockCollaborators::new("out/deck.pptx")
///     .with_analyzer(MockAnalyzer::new().with_results([failing_result(&["x"]), passing_result(4)]));
/// let manager = FeedbackLoopManager::new(config, mocks.dependencies("deck"))?;
/// manager.run(&task).await?;
/// assert_eq!(mocks.fixer.call_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockCollaborators {
    pub frontend: Arc<MockFrontend>,
    pub email: Arc<MockEmailWatcher>,
    pub analyzer: Arc<MockAnalyzer>,
    pub pull_requests: Arc<MockPullRequests>,
    pub deployment: Arc<MockDeployment>,
    pub fixer: Arc<MockFixGenerator>,
    pub researcher: Arc<MockResearcher>,
    pub operator: Arc<MockOperator>,
    pub visual_grader: Option<Arc<MockVisualGrader>>,
}

impl MockCollaborators {
    /// Defaults everywhere; emails carry `attachment`.
    #[must_use]
    pub fn new(attachment: impl Into<PathBuf>) -> Self {
        Self {
            frontend: Arc::new(MockFrontend::new()),
            email: Arc::new(MockEmailWatcher::new(attachment)),
            analyzer: Arc::new(MockAnalyzer::new()),
            pull_requests: Arc::new(MockPullRequests::new()),
            deployment: Arc::new(MockDeployment::new()),
            fixer: Arc::new(MockFixGenerator::new()),
            researcher: Arc::new(MockResearcher::new()),
            operator: Arc::new(MockOperator::new()),
            visual_grader: None,
        }
    }

    #[must_use]
    pub fn with_frontend(mut self, frontend: MockFrontend) -> Self {
        self.frontend = Arc::new(frontend);
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: MockEmailWatcher) -> Self {
        self.email = Arc::new(email);
        self
    }

    #[must_use]
    pub fn with_analyzer(mut self, analyzer: MockAnalyzer) -> Self {
        self.analyzer = Arc::new(analyzer);
        self
    }

    #[must_use]
    pub fn with_pull_requests(mut self, pull_requests: MockPullRequests) -> Self {
        self.pull_requests = Arc::new(pull_requests);
        self
    }

    #[must_use]
    pub fn with_deployment(mut self, deployment: MockDeployment) -> Self {
        self.deployment = Arc::new(deployment);
        self
    }

    #[must_use]
    pub fn with_fixer(mut self, fixer: MockFixGenerator) -> Self {
        self.fixer = Arc::new(fixer);
        self
    }

    #[must_use]
    pub fn with_operator(mut self, operator: MockOperator) -> Self {
        self.operator = Arc::new(operator);
        self
    }

    #[must_use]
    pub fn with_visual_grader(mut self, grader: MockVisualGrader) -> Self {
        self.visual_grader = Some(Arc::new(grader));
        self
    }

    /// Loop dependencies backed by these mocks, with `template` registered.
    #[must_use]
    pub fn dependencies(&self, template: &str) -> LoopDependencies {
        LoopDependencies {
            frontend: self.frontend.clone(),
            email: self.email.clone(),
            analyzers: Arc::new(mock_registry(self.analyzer.clone(), template)),
            pull_requests: self.pull_requests.clone(),
            deployment: self.deployment.clone(),
            fixer: self.fixer.clone(),
            researcher: self.researcher.clone(),
            operator: self.operator.clone(),
            visual_grader: self
                .visual_grader
                .clone()
                .map(|grader| grader as Arc<dyn VisualGrader>),
        }
    }
}
