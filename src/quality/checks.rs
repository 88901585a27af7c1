//! Shared check bookkeeping and text/count checks.
//!
//! Every analyzer funnels its comparisons through a [`CheckRecorder`], so
//! `total_checks`, `passed_checks` and the verdict are computed the same
//! way for every document family.

use std::sync::OnceLock;

use regex::Regex;

use super::{AnalysisResult, Discrepancy, Severity, ToleranceBand, VerdictPolicy};

/// Accumulates checks and discrepancies for one analysis.
#[derive(Debug, Default)]
pub struct CheckRecorder {
    total: u32,
    passed: u32,
    discrepancies: Vec<Discrepancy>,
}

impl CheckRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a check that passed.
    pub fn pass(&mut self) {
        self.total += 1;
        self.passed += 1;
    }

    /// Record a check that failed with the given discrepancy.
    pub fn fail(&mut self, discrepancy: Discrepancy) {
        self.total += 1;
        self.discrepancies.push(discrepancy);
    }

    /// Record a check: passes when `discrepancy` is `None`.
    pub fn record(&mut self, discrepancy: Option<Discrepancy>) {
        match discrepancy {
            Some(d) => self.fail(d),
            None => self.pass(),
        }
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub fn discrepancies(&self) -> &[Discrepancy] {
        &self.discrepancies
    }

    /// Produce the final result.
    #[must_use]
    pub fn finish(self, subject: &str, policy: &VerdictPolicy) -> AnalysisResult {
        let summary = format!(
            "{}: {}/{} checks passed, {} discrepancies",
            subject,
            self.passed,
            self.total,
            self.discrepancies.len()
        );
        AnalysisResult::new(self.total, self.passed, self.discrepancies, summary, policy)
    }

    // ========================================================================
    // Shared checks
    // ========================================================================

    /// Every required phrase must appear (case-insensitive).
    pub fn check_required_text(&mut self, haystack: &str, required: &[String], location: &str) {
        let lower = haystack.to_lowercase();
        for phrase in required {
            if lower.contains(&phrase.to_lowercase()) {
                self.pass();
            } else {
                self.fail(
                    Discrepancy::new(
                        Severity::High,
                        "missing_text",
                        location,
                        format!("text containing \"{phrase}\""),
                        "not found",
                    )
                    .with_suggestion(format!("Ensure the generator emits \"{phrase}\"")),
                );
            }
        }
    }

    /// No forbidden phrase may appear (case-insensitive).
    pub fn check_forbidden_text(&mut self, haystack: &str, forbidden: &[String], location: &str) {
        let lower = haystack.to_lowercase();
        for phrase in forbidden {
            if lower.contains(&phrase.to_lowercase()) {
                self.fail(
                    Discrepancy::new(
                        Severity::Critical,
                        "forbidden_text",
                        location,
                        format!("no occurrence of \"{phrase}\""),
                        "found",
                    )
                    .with_suggestion(format!("Remove \"{phrase}\" from the generated output")),
                );
            } else {
                self.pass();
            }
        }
    }

    /// Each expected section must appear among `found` (case- and
    /// whitespace-insensitive). A missing section is high severity; sections
    /// present out of order are medium.
    pub fn check_sections(&mut self, found: &[String], expected: &[String], unit: &str) {
        let normalized: Vec<String> = found.iter().map(|s| normalize(s)).collect();
        let mut last_index: Option<usize> = None;
        for section in expected {
            let wanted = normalize(section);
            let position = normalized.iter().position(|f| f.contains(&wanted));
            match position {
                None => self.fail(
                    Discrepancy::new(
                        Severity::High,
                        "missing_section",
                        unit,
                        format!("section \"{section}\""),
                        "absent",
                    )
                    .with_suggestion(format!("Add a {unit} titled \"{section}\"")),
                ),
                Some(index) => {
                    if last_index.is_some_and(|last| index < last) {
                        self.fail(Discrepancy::new(
                            Severity::Medium,
                            "section_order",
                            unit,
                            format!("\"{section}\" after the previous expected section"),
                            format!("found at position {}", index + 1),
                        ));
                    } else {
                        self.pass();
                    }
                    last_index = Some(index);
                }
            }
        }
    }

    /// `actual` must lie within `[min, max]`. Missing content entirely
    /// (zero of something required) is critical.
    pub fn check_count(&mut self, actual: u32, min: Option<u32>, max: Option<u32>, unit: &str) {
        if let Some(min) = min {
            if actual < min {
                let severity = if actual == 0 {
                    Severity::Critical
                } else {
                    Severity::High
                };
                self.fail(Discrepancy::new(
                    severity,
                    "count",
                    unit,
                    format!("at least {min} {unit}"),
                    format!("{actual}"),
                ));
            } else {
                self.pass();
            }
        }
        if let Some(max) = max {
            if actual > max {
                self.fail(Discrepancy::new(
                    Severity::Medium,
                    "count",
                    unit,
                    format!("at most {max} {unit}"),
                    format!("{actual}"),
                ));
            } else {
                self.pass();
            }
        }
    }

    /// Unrendered template markers are high severity.
    pub fn check_placeholders(&mut self, haystack: &str, location: &str) {
        let found: Vec<&str> = placeholder_regex()
            .find_iter(haystack)
            .map(|m| m.as_str())
            .take(3)
            .collect();
        if found.is_empty() {
            self.pass();
        } else {
            self.fail(
                Discrepancy::new(
                    Severity::High,
                    "unrendered_placeholder",
                    location,
                    "all template placeholders substituted",
                    found.join(", "),
                )
                .with_suggestion("Check the template rendering context for missing variables"),
            );
        }
    }

    /// Compare a measured value against an expectation using a tolerance band.
    pub fn check_tolerance(
        &mut self,
        category: &str,
        location: &str,
        expected: f64,
        actual: f64,
        band: ToleranceBand,
        unit: &str,
    ) {
        let delta = actual - expected;
        match band.classify(delta) {
            None => self.pass(),
            Some(severity) => self.fail(
                Discrepancy::new(
                    severity,
                    category,
                    location,
                    format!("{expected:.2}{unit} (±{:.2}{unit})", band.pass),
                    format!("{actual:.2}{unit} (off by {delta:+.2}{unit})"),
                )
                .with_suggestion(format!("Adjust {category} by {:.2}{unit}", -delta)),
            ),
        }
    }
}

/// Lowercase and collapse whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{[^}]*\}\}|\{%[^%]*%\}|\$\{[^}]*\}").expect("placeholder regex is valid")
    })
}
