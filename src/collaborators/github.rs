//! Pull-request collaborator backed by the GitHub CLI (`gh`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{ChecksState, PrState, PrStatus, PullRequests};
use crate::error::ConvergeError;

#[derive(Debug, Clone)]
pub struct GhPullRequests {
    repo_dir: PathBuf,
    merge_method: String,
}

impl GhPullRequests {
    /// Fails with [`ConvergeError::MissingTool`] when `gh` is not on PATH.
    pub fn new(repo_dir: impl Into<PathBuf>, merge_method: impl Into<String>) -> crate::Result<Self> {
        if which::which("gh").is_err() {
            return Err(ConvergeError::MissingTool {
                tool: "gh".to_string(),
            });
        }
        Ok(Self {
            repo_dir: repo_dir.into(),
            merge_method: merge_method.into(),
        })
    }

    async fn gh(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!("gh {}", args.join(" "));
        Command::new("gh")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .context("Failed to run gh")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrView {
    number: u64,
    state: String,
    #[serde(default)]
    commits: Vec<PrCommit>,
    #[serde(default)]
    status_check_rollup: Vec<CheckRun>,
}

#[derive(Debug, Deserialize)]
struct PrCommit {
    oid: String,
}

/// Check runs report `status`/`conclusion`; legacy status contexts report `state`.
#[derive(Debug, Deserialize)]
struct CheckRun {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

fn aggregate_checks(runs: &[CheckRun]) -> ChecksState {
    const FAILED: &[&str] = &["FAILURE", "CANCELLED", "TIMED_OUT", "ACTION_REQUIRED", "ERROR", "STARTUP_FAILURE"];

    let failed = runs.iter().any(|r| {
        r.conclusion.as_deref().is_some_and(|c| FAILED.contains(&c))
            || r.state.as_deref().is_some_and(|s| FAILED.contains(&s))
    });
    if failed {
        return ChecksState::Failing;
    }
    let pending = runs.iter().any(|r| {
        r.status.as_deref().is_some_and(|s| s != "COMPLETED")
            || matches!(r.state.as_deref(), Some("PENDING" | "EXPECTED"))
    });
    if pending {
        ChecksState::Pending
    } else {
        ChecksState::Passing
    }
}

/// Parse `gh pr view --json number,state,commits,statusCheckRollup` output.
pub fn parse_pr_view(json: &str) -> Result<PrStatus> {
    let view: PrView = serde_json::from_str(json).context("Unexpected gh pr view output")?;
    let state = match view.state.as_str() {
        "MERGED" => PrState::Merged,
        "CLOSED" => PrState::Closed,
        _ => PrState::Open,
    };
    Ok(PrStatus {
        number: view.number,
        state,
        checks: aggregate_checks(&view.status_check_rollup),
        commits: view.commits.into_iter().map(|c| c.oid).collect(),
    })
}

#[async_trait]
impl PullRequests for GhPullRequests {
    async fn status(&self, pr_number: u64) -> Result<PrStatus> {
        let number = pr_number.to_string();
        let output = self
            .gh(&["pr", "view", &number, "--json", "number,state,commits,statusCheckRollup"])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Could not resolve") || stderr.contains("no pull requests found") {
                return Err(ConvergeError::collaborator_structural(
                    "github",
                    format!("PR #{pr_number} not found: {}", stderr.trim()),
                )
                .into());
            }
            anyhow::bail!("gh pr view #{pr_number} failed: {}", stderr.trim());
        }
        parse_pr_view(&String::from_utf8_lossy(&output.stdout))
    }

    async fn merge(&self, pr_number: u64) -> Result<bool> {
        let number = pr_number.to_string();
        let method = format!("--{}", self.merge_method);
        let output = self.gh(&["pr", "merge", &number, &method]).await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not mergeable") || stderr.contains("required status") {
            debug!("PR #{} not mergeable yet: {}", pr_number, stderr.trim());
            return Ok(false);
        }
        anyhow::bail!("gh pr merge #{pr_number} failed: {}", stderr.trim())
    }
}
