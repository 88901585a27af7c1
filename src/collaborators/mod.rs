//! External collaborators the feedback loop drives.
//!
//! The loop only sees these traits. Each one is a narrow async contract
//! around a system the loop does not own: the service frontend, the inbox
//! that receives generated documents, GitHub, the deployment, the LLM and
//! the human operator.
//!
//! - [`http`] - Frontend submission and deployment health over HTTP (reqwest)
//! - [`email`] - Inbox-directory email watcher
//! - [`github`] - Pull requests via the `gh` CLI
//! - [`claude`] - Fix generation, research and visual grading via the `claude` CLI
//! - [`operator`] - Console approval prompts
//!
//! Implementations return `anyhow::Result`. Errors that retrying cannot
//! fix should be a [`ConvergeError`](crate::error::ConvergeError) marked
//! structural so the loop fails fast instead of retrying.

pub mod claude;
pub mod email;
pub mod github;
pub mod http;
pub mod operator;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::quality::{AnalysisResult, Discrepancy, TemplateSpec};
use crate::stagnation::{IssueFingerprint, IterationRecord};

pub use claude::ClaudeCli;
pub use email::InboxDirectory;
pub use github::GhPullRequests;
pub use http::{HttpFrontend, HttpHealthCheck};
pub use operator::ConsoleOperator;

// ============================================================================
// Frontend
// ============================================================================

/// Form data sent to the service under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSubmission {
    pub service_name: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub status_code: u16,
    #[serde(default)]
    pub response: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl SubmitResponse {
    /// A client error other than request-timeout or rate-limit: resubmitting
    /// the same form will not help.
    #[must_use]
    pub fn is_structural_failure(&self) -> bool {
        !self.success
            && (400..500).contains(&self.status_code)
            && self.status_code != 408
            && self.status_code != 429
    }
}

#[async_trait]
pub trait FrontendSubmitter: Send + Sync {
    async fn submit(&self, form: &FormSubmission) -> Result<SubmitResponse>;
}

// ============================================================================
// Email
// ============================================================================

/// What to wait for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailQuery {
    pub timeout: Duration,
    pub sender_allowlist: Vec<String>,
    pub subject_allowlist: Vec<String>,
    /// Messages already consumed; a watcher must never return these.
    pub seen_ids: BTreeSet<String>,
}

impl EmailQuery {
    /// Allowlists match case-insensitively by substring; an empty list
    /// allows everything.
    #[must_use]
    pub fn accepts(&self, from: &str, subject: &str) -> bool {
        fn matches(list: &[String], value: &str) -> bool {
            let value = value.to_lowercase();
            list.is_empty() || list.iter().any(|p| value.contains(&p.to_lowercase()))
        }
        matches(&self.sender_allowlist, from) && matches(&self.subject_allowlist, subject)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedEmail {
    pub email_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub attachment_path: Option<PathBuf>,
}

#[async_trait]
pub trait EmailWatcher: Send + Sync {
    /// Wait up to `query.timeout` for a matching, unseen message.
    /// `Ok(None)` means nothing arrived in time.
    async fn poll(&self, query: &EmailQuery) -> Result<Option<ReceivedEmail>>;
}

// ============================================================================
// Pull requests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

/// Aggregate CI check state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksState {
    #[default]
    Pending,
    Passing,
    Failing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrStatus {
    pub number: u64,
    pub state: PrState,
    #[serde(default)]
    pub checks: ChecksState,
    #[serde(default)]
    pub commits: Vec<String>,
}

#[async_trait]
pub trait PullRequests: Send + Sync {
    async fn status(&self, pr_number: u64) -> Result<PrStatus>;

    /// Returns false when the PR could not be merged yet.
    async fn merge(&self, pr_number: u64) -> Result<bool>;
}

// ============================================================================
// Deployment
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    #[serde(default)]
    pub body: String,
}

#[async_trait]
pub trait DeploymentHealth: Send + Sync {
    async fn check(&self, url: &str, expected_marker: Option<&str>) -> Result<HealthStatus>;
}

// ============================================================================
// LLM-backed collaborators
// ============================================================================

/// What the fix generator is told about the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceContext {
    pub service_name: String,
    pub template: String,
    pub iteration: u32,
    pub repo_dir: PathBuf,
    /// PRs opened for this task that were closed without merging.
    #[serde(default)]
    pub abandoned_prs: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRequest {
    pub discrepancies: Vec<Discrepancy>,
    pub context: ServiceContext,
    #[serde(default)]
    pub research: Option<ResearchReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub success: bool,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub summary: String,
}

#[async_trait]
pub trait FixGenerator: Send + Sync {
    async fn generate_fix(&self, request: &FixRequest) -> Result<FixOutcome>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub root_cause: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub recommended_fix: Option<String>,
}

#[async_trait]
pub trait Researcher: Send + Sync {
    /// Investigate a recurring issue set given the recent iteration history.
    async fn research(&self, history: &[IterationRecord]) -> Result<ResearchReport>;
}

/// Optional visual review of a generated document.
#[async_trait]
pub trait VisualGrader: Send + Sync {
    async fn grade(&self, path: &Path, template: &TemplateSpec) -> Result<Vec<Discrepancy>>;
}

// ============================================================================
// Operator
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Approval {
    Approved,
    Rejected { feedback: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationDecision {
    Research,
    Abort,
}

/// Why the loop considers itself stuck.
#[derive(Debug, Clone, PartialEq)]
pub struct StuckReport {
    pub fingerprint: IssueFingerprint,
    pub occurrences: u32,
    pub iteration: u32,
    pub issues: Vec<String>,
}

#[async_trait]
pub trait Operator: Send + Sync {
    /// Review a passing result before the loop completes.
    async fn review(&self, result: &AnalysisResult) -> Result<Approval>;

    /// Decide what to do about a stuck loop.
    async fn escalate(&self, report: &StuckReport) -> Result<EscalationDecision>;
}
