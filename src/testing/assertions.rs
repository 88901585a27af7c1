//! Custom assertions for domain-specific testing.
//!
//! Provides expressive assertions for analysis results and loop runs.

use crate::quality::{AnalysisResult, Severity};
use crate::r#loop::manager::{LoopOutcome, LoopStatus};
use crate::r#loop::state::LoopPhase;

/// Assert that an analysis passed.
///
/// # Panics
///
/// Panics with every discrepancy listed if the analysis failed.
///
/// # Example
///
/// ```rust,ignore
/// let result = registry.analyze_output(&path, "deck")?;
/// assert_analysis_passed(&result);
/// ```
pub fn assert_analysis_passed(result: &AnalysisResult) {
    assert!(
        result.passed,
        "Expected analysis to pass, but it failed: {}\nDiscrepancies:\n{}",
        result.headline(),
        result
            .issue_descriptions()
            .iter()
            .map(|d| format!("  - {d}"))
            .collect::<Vec<_>>()
            .join("\n")
    );
}

/// Assert that an analysis failed.
///
/// # Panics
///
/// Panics if the analysis passed.
pub fn assert_analysis_failed(result: &AnalysisResult) {
    assert!(
        !result.passed,
        "Expected analysis to fail, but it passed: {}",
        result.headline()
    );
}

/// Assert that a discrepancy with `category` and `severity` was reported.
///
/// # Panics
///
/// Panics if no such discrepancy exists.
pub fn assert_has_discrepancy(result: &AnalysisResult, category: &str, severity: Severity) {
    let found = result
        .discrepancies
        .iter()
        .any(|d| d.category() == category && d.severity() == severity);
    assert!(
        found,
        "Expected a {severity} '{category}' discrepancy, got:\n{:#?}",
        result.issue_descriptions()
    );
}

/// Assert that a run ended with `status`.
///
/// # Panics
///
/// Panics with the run summary otherwise.
pub fn assert_outcome(outcome: &LoopOutcome, status: LoopStatus) {
    assert_eq!(
        outcome.status, status,
        "Expected run to end {status}, got {} in {} after {} iteration(s): {}",
        outcome.status, outcome.phase, outcome.iterations, outcome.summary
    );
}

/// Assert that `expected` occurs in `phases` in order, other phases allowed
/// in between.
///
/// # Panics
///
/// Panics naming the first missing phase.
pub fn assert_phase_order(phases: &[LoopPhase], expected: &[LoopPhase]) {
    let mut remaining = phases.iter();
    for wanted in expected {
        assert!(
            remaining.any(|p| p == wanted),
            "Expected {wanted} in order {expected:?}, observed {phases:?}"
        );
    }
}
