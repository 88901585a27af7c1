//! Console operator: asks the human at the terminal.

use std::io::{BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use tracing::info;

use super::{Approval, EscalationDecision, Operator, StuckReport};
use crate::quality::AnalysisResult;

/// Prompts on stdout and reads answers from stdin.
///
/// When stdin is not a terminal nobody can answer, so passing results are
/// approved and escalations go to research.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOperator;

impl ConsoleOperator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn ask(question: String) -> Result<Option<String>> {
        if !std::io::stdin().is_terminal() {
            return Ok(None);
        }
        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            print!("{question} ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(Some(line.trim().to_string()))
        })
        .await
        .context("Operator prompt task failed")?
    }
}

/// Parse a review answer; anything but yes is a rejection with the answer
/// (if longer than "n") as feedback.
fn parse_review(answer: &str) -> Approval {
    match answer.to_lowercase().as_str() {
        "y" | "yes" => Approval::Approved,
        "" | "n" | "no" => Approval::Rejected {
            feedback: "Rejected by operator".to_string(),
        },
        _ => Approval::Rejected {
            feedback: answer.to_string(),
        },
    }
}

fn parse_escalation(answer: &str) -> EscalationDecision {
    match answer.to_lowercase().as_str() {
        "a" | "abort" => EscalationDecision::Abort,
        _ => EscalationDecision::Research,
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn review(&self, result: &AnalysisResult) -> Result<Approval> {
        println!("\n{} {}", "Review:".bold(), result.headline());
        for d in &result.discrepancies {
            println!("  {} {}", "-".dimmed(), d);
        }
        match Self::ask("Approve this output? [y/N, or type feedback]".to_string()).await? {
            Some(answer) => Ok(parse_review(&answer)),
            None => {
                info!("No operator terminal; approving passing result");
                Ok(Approval::Approved)
            }
        }
    }

    async fn escalate(&self, report: &StuckReport) -> Result<EscalationDecision> {
        println!(
            "\n{} the same {} issue(s) recurred {} times (iteration {})",
            "Stuck:".yellow().bold(),
            report.issues.len(),
            report.occurrences,
            report.iteration
        );
        for issue in report.issues.iter().take(10) {
            println!("  {} {}", "-".dimmed(), issue);
        }
        match Self::ask("Research root cause or abort? [R/a]".to_string()).await? {
            Some(answer) => Ok(parse_escalation(&answer)),
            None => {
                info!("No operator terminal; escalating to research");
                Ok(EscalationDecision::Research)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_review() {
        assert_eq!(parse_review("Y"), Approval::Approved);
        assert!(matches!(parse_review(""), Approval::Rejected { .. }));
        assert_eq!(
            parse_review("chart colors are wrong"),
            Approval::Rejected {
                feedback: "chart colors are wrong".into()
            }
        );
    }

    #[test]
    fn test_parse_escalation_defaults_to_research() {
        assert_eq!(parse_escalation(""), EscalationDecision::Research);
        assert_eq!(parse_escalation("ABORT"), EscalationDecision::Abort);
    }
}
