//! LLM collaborators backed by the `claude` CLI.
//!
//! One [`ClaudeCli`] serves as fix generator, researcher and visual grader.
//! The prompt goes in on stdin; the reply must end with a fenced JSON block
//! that is parsed into the collaborator's result type.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{FixGenerator, FixOutcome, FixRequest, ResearchReport, Researcher, VisualGrader};
use crate::error::ConvergeError;
use crate::quality::{Discrepancy, Severity, TemplateSpec};
use crate::stagnation::IterationRecord;

#[derive(Debug, Clone)]
pub struct ClaudeCli {
    command: String,
    model: String,
    repo_dir: PathBuf,
    timeout: Duration,
}

impl ClaudeCli {
    /// Fails with [`ConvergeError::MissingTool`] when `command` is not on PATH.
    pub fn new(
        command: impl Into<String>,
        model: impl Into<String>,
        repo_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let command = command.into();
        if which::which(&command).is_err() {
            return Err(ConvergeError::MissingTool { tool: command });
        }
        Ok(Self {
            command,
            model: model.into(),
            repo_dir: repo_dir.into(),
            timeout,
        })
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        debug!("Running {} ({} chars prompt)", self.command, prompt.len());

        let mut child = Command::new(&self.command)
            .args(["-p", "--dangerously-skip-permissions", "--model", &self.model])
            .current_dir(&self.repo_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to stdin")?;
            stdin.flush().await.context("Failed to flush stdin")?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConvergeError::StepTimeout {
                step: self.command.clone(),
                timeout: self.timeout,
            })?
            .context("Failed to read claude output")?;

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.command,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn ask_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T> {
        let reply = self.ask(prompt).await?;
        parse_json_reply(&reply)
    }
}

/// Parse the last fenced ```json block of a reply, falling back to the
/// outermost `{...}` or `[...]` span.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    if let Some(start) = reply.rfind("```json") {
        let body = &reply[start + "```json".len()..];
        let end = body.find("```").unwrap_or(body.len());
        return serde_json::from_str(body[..end].trim()).context("Invalid JSON block in reply");
    }
    let start = reply.find(['{', '[']);
    let end = reply.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e > s => {
            serde_json::from_str(&reply[s..=e]).context("Invalid JSON in reply")
        }
        _ => anyhow::bail!("Reply contains no JSON"),
    }
}

fn fix_prompt(request: &FixRequest) -> String {
    let issues = request
        .discrepancies
        .iter()
        .map(|d| format!("- {d}"))
        .collect::<Vec<_>>()
        .join("\n");
    let research = match &request.research {
        Some(r) => format!(
            "\nRoot cause analysis: {}\nRecommended fix: {}\n",
            r.root_cause,
            r.recommended_fix.as_deref().unwrap_or("none")
        ),
        None => String::new(),
    };
    format!(
        "Service '{}' generates documents for template '{}' (iteration {}).\n\
         The latest output has these discrepancies:\n{issues}\n{research}\n\
         Fix the generator code, open a pull request with `gh pr create`, and finish with\n\
         ```json\n{{\"success\": true, \"pr_number\": <number>, \"summary\": \"...\"}}\n```",
        request.context.service_name, request.context.template, request.context.iteration
    )
}

#[async_trait]
impl FixGenerator for ClaudeCli {
    async fn generate_fix(&self, request: &FixRequest) -> Result<FixOutcome> {
        self.ask_json(&fix_prompt(request)).await
    }
}

#[async_trait]
impl Researcher for ClaudeCli {
    async fn research(&self, history: &[IterationRecord]) -> Result<ResearchReport> {
        let attempts = history
            .iter()
            .map(|r| format!("Iteration {}:\n  - {}", r.iteration, r.issues.join("\n  - ")))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Repeated fix attempts have not resolved the same issues:\n{attempts}\n\n\
             Investigate the root cause in this repository without changing code. Finish with\n\
             ```json\n{{\"root_cause\": \"...\", \"alternatives\": [\"...\"], \"recommended_fix\": \"...\"}}\n```"
        );
        self.ask_json(&prompt).await
    }
}

#[derive(Debug, Deserialize)]
struct VisualFinding {
    severity: Severity,
    #[serde(default = "visual_category")]
    category: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    expected: String,
    #[serde(default)]
    actual: String,
    #[serde(default)]
    suggestion: String,
}

fn visual_category() -> String {
    "visual".to_string()
}

impl From<VisualFinding> for Discrepancy {
    fn from(f: VisualFinding) -> Self {
        Discrepancy::new(f.severity, f.category, f.location, f.expected, f.actual)
            .with_suggestion(f.suggestion)
    }
}

#[async_trait]
impl VisualGrader for ClaudeCli {
    async fn grade(&self, path: &Path, template: &TemplateSpec) -> Result<Vec<Discrepancy>> {
        let expectations = serde_json::to_string_pretty(template)?;
        let prompt = format!(
            "Open {} and compare its visual layout against these expectations:\n{expectations}\n\n\
             Report only visible problems. Finish with a JSON array of\n\
             ```json\n[{{\"severity\": \"low|medium|high|critical\", \"category\": \"...\", \"location\": \"...\", \"expected\": \"...\", \"actual\": \"...\", \"suggestion\": \"...\"}}]\n```",
            path.display()
        );
        let findings: Vec<VisualFinding> = self.ask_json(&prompt).await?;
        Ok(findings.into_iter().map(Discrepancy::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_block_uses_last_one() {
        let reply = "Plan:\n```json\n{\"success\": false}\n```\nDone.\n```json\n{\"success\": true, \"pr_number\": 17}\n```";
        let outcome: FixOutcome = parse_json_reply(reply).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.pr_number, Some(17));
    }

    #[test]
    fn test_parse_bare_json() {
        let reply = "The root cause is clear. {\"root_cause\": \"font cache\"} thanks";
        let report: ResearchReport = parse_json_reply(reply).unwrap();
        assert_eq!(report.root_cause, "font cache");
        assert!(report.alternatives.is_empty());
    }

    #[test]
    fn test_parse_no_json_fails() {
        assert!(parse_json_reply::<FixOutcome>("nothing here").is_err());
    }

    #[test]
    fn test_visual_findings_convert() {
        let findings: Vec<VisualFinding> =
            parse_json_reply(r#"[{"severity": "high", "location": "slide 2", "actual": "logo clipped"}]"#)
                .unwrap();
        let d: Discrepancy = findings.into_iter().next().unwrap().into();
        assert_eq!(d.severity(), Severity::High);
        assert_eq!(d.category(), "visual");
        assert_eq!(d.actual(), "logo clipped");
    }
}
