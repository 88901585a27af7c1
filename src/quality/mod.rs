//! Output analysis: comparing generated documents against templates.
//!
//! This module provides the structured result types shared by every
//! analyzer, the pass/fail verdict, and the tolerance bands used for
//! numeric comparisons.
//!
//! # Architecture
//!
//! ```text
//! AnalyzerRegistry ──ext──> OutputAnalyzer ──extract──> Facts
//!        │                        │
//!        │                        └──evaluate(Facts, TemplateSpec)──> AnalysisResult
//!        └── TemplateLibrary (name -> TemplateSpec)
//! ```
//!
//! - [`analyzers`] - PPTX, XLSX, DOCX, PDF and HTML analyzers
//! - [`checks`] - Shared check bookkeeping and text/count checks
//! - [`registry`] - Extension dispatch
//! - [`template`] - Template expectations and the template library

pub mod analyzers;
pub mod checks;
pub mod registry;
pub mod template;

use serde::{Deserialize, Serialize};

pub use analyzers::{DocxAnalyzer, HtmlAnalyzer, PdfAnalyzer, PptxAnalyzer, XlsxAnalyzer};
pub use checks::CheckRecorder;
pub use registry::{AnalyzerRegistry, OutputAnalyzer};
pub use template::{LayoutExpectations, TemplateLibrary, TemplateSpec, TypographyExpectations};

use crate::config::{ConvergeConfig, ToleranceSettings};

// ============================================================================
// Severity and discrepancies
// ============================================================================

/// Severity of a discrepancy between output and template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    /// Any critical discrepancy fails the document.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One structured deviation of generated output from template expectation.
///
/// Immutable once created: fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    severity: Severity,
    category: String,
    location: String,
    expected: String,
    actual: String,
    suggestion: String,
}

impl Discrepancy {
    /// Create a new discrepancy.
    pub fn new(
        severity: Severity,
        category: impl Into<String>,
        location: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            location: location.into(),
            expected: expected.into(),
            actual: actual.into(),
            suggestion: String::new(),
        }
    }

    /// Add a suggested fix.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn expected(&self) -> &str {
        &self.expected
    }

    #[must_use]
    pub fn actual(&self) -> &str {
        &self.actual
    }

    #[must_use]
    pub fn suggestion(&self) -> &str {
        &self.suggestion
    }

    /// Issue description used for fingerprinting and fix prompts.
    ///
    /// Excludes the suggestion so rewording a hint does not look like a
    /// new issue.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "[{}] {} at {}: expected {}, got {}",
            self.severity, self.category, self.location, self.expected, self.actual
        )
    }
}

impl std::fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())?;
        if !self.suggestion.is_empty() {
            write!(f, " (suggestion: {})", self.suggestion)?;
        }
        Ok(())
    }
}

// ============================================================================
// Verdict
// ============================================================================

/// Rule deciding pass/fail from discrepancy counts.
///
/// A document passes when it has no critical discrepancy and at most
/// `max(min_high_allowance, total_checks * high_ratio)` high ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerdictPolicy {
    pub high_ratio: f64,
    pub min_high_allowance: u32,
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        Self {
            high_ratio: 0.1,
            min_high_allowance: 1,
        }
    }
}

impl VerdictPolicy {
    /// Number of high-severity discrepancies tolerated for `total_checks`.
    #[must_use]
    pub fn high_allowance(&self, total_checks: u32) -> f64 {
        f64::from(self.min_high_allowance).max(f64::from(total_checks) * self.high_ratio)
    }

    /// Apply the rule.
    #[must_use]
    pub fn passes(&self, discrepancies: &[Discrepancy], total_checks: u32) -> bool {
        let critical = count_severity(discrepancies, Severity::Critical);
        let high = count_severity(discrepancies, Severity::High);
        critical == 0 && (high as f64) <= self.high_allowance(total_checks)
    }
}

fn count_severity(discrepancies: &[Discrepancy], severity: Severity) -> usize {
    discrepancies
        .iter()
        .filter(|d| d.severity() == severity)
        .count()
}

// ============================================================================
// Tolerance bands
// ============================================================================

/// Two-tier absolute tolerance for numeric comparisons.
///
/// `|delta| <= pass` is fine, `pass < |delta| <= warn` is medium, anything
/// larger is high.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceBand {
    pub pass: f64,
    pub warn: f64,
}

impl ToleranceBand {
    #[must_use]
    pub const fn new(pass: f64, warn: f64) -> Self {
        Self { pass, warn }
    }

    /// `pass` must not exceed `warn` and both must be non-negative.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.pass >= 0.0 && self.pass <= self.warn
    }

    /// Severity for a measured deviation, `None` when within tolerance.
    #[must_use]
    pub fn classify(&self, delta: f64) -> Option<Severity> {
        let delta = delta.abs();
        if delta <= self.pass {
            None
        } else if delta <= self.warn {
            Some(Severity::Medium)
        } else {
            Some(Severity::High)
        }
    }
}

/// Calibration values an analyzer needs besides the template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisPolicy {
    pub verdict: VerdictPolicy,
    pub tolerances: ToleranceSettings,
}

impl AnalysisPolicy {
    #[must_use]
    pub fn from_config(config: &ConvergeConfig) -> Self {
        Self {
            verdict: config.verdict.clone(),
            tolerances: config.tolerances.clone(),
        }
    }
}

// ============================================================================
// Analysis result
// ============================================================================

/// Outcome of comparing one generated file against one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub passed: bool,
    pub total_checks: u32,
    pub passed_checks: u32,
    pub discrepancies: Vec<Discrepancy>,
    pub summary: String,
}

impl AnalysisResult {
    /// Build a result and compute its verdict.
    #[must_use]
    pub fn new(
        total_checks: u32,
        passed_checks: u32,
        discrepancies: Vec<Discrepancy>,
        summary: impl Into<String>,
        policy: &VerdictPolicy,
    ) -> Self {
        let passed = policy.passes(&discrepancies, total_checks);
        Self {
            passed,
            total_checks,
            passed_checks,
            discrepancies,
            summary: summary.into(),
        }
    }

    /// Fraction of checks that passed; 0.0 when nothing was checked.
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            f64::from(self.passed_checks) / f64::from(self.total_checks)
        }
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        count_severity(&self.discrepancies, severity)
    }

    /// Issue descriptions, one per discrepancy.
    #[must_use]
    pub fn issue_descriptions(&self) -> Vec<String> {
        self.discrepancies.iter().map(Discrepancy::describe).collect()
    }

    /// Merge extra discrepancies (e.g. from visual grading) and recompute
    /// the verdict. Each merged discrepancy counts as one failed check.
    pub fn merge(&mut self, extra: Vec<Discrepancy>, policy: &VerdictPolicy) {
        if extra.is_empty() {
            return;
        }
        self.total_checks += extra.len() as u32;
        self.discrepancies.extend(extra);
        self.passed = policy.passes(&self.discrepancies, self.total_checks);
    }

    /// One-line report for logs and progress updates.
    #[must_use]
    pub fn headline(&self) -> String {
        format!(
            "{} - {}/{} checks ({:.0}%), {} critical, {} high, {} medium, {} low",
            if self.passed { "PASSED" } else { "FAILED" },
            self.passed_checks,
            self.total_checks,
            self.pass_rate() * 100.0,
            self.count(Severity::Critical),
            self.count(Severity::High),
            self.count(Severity::Medium),
            self.count(Severity::Low),
        )
    }
}
