//! PDF analyzer.
//!
//! Text-level only: pdf-extract separates pages with form feeds, and each
//! page's non-empty lines are scanned for the expected section headings.

use std::path::Path;

use super::check_file;
use crate::error::{ConvergeError, Result};
use crate::quality::checks::CheckRecorder;
use crate::quality::registry::OutputAnalyzer;
use crate::quality::{AnalysisPolicy, AnalysisResult, Discrepancy, Severity, TemplateSpec};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfFacts {
    /// Text of each page, in order.
    pub pages: Vec<String>,
}

impl PdfFacts {
    /// Split extracted text on form feeds. A trailing empty segment after
    /// the last separator is not a page.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let mut pages: Vec<String> = text.split('\x0c').map(str::to_string).collect();
        if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
            pages.pop();
        }
        Self { pages }
    }

    fn lines(&self) -> Vec<String> {
        self.pages
            .iter()
            .flat_map(|p| p.lines())
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PdfAnalyzer {
    policy: AnalysisPolicy,
}

impl PdfAnalyzer {
    #[must_use]
    pub fn new(policy: AnalysisPolicy) -> Self {
        Self { policy }
    }

    pub fn extract(path: &Path) -> Result<PdfFacts> {
        check_file(path)?;
        let text = pdf_extract::extract_text(path)
            .map_err(|e| ConvergeError::malformed(path, format!("failed to extract PDF text: {e}")))?;
        Ok(PdfFacts::from_text(&text))
    }

    #[must_use]
    pub fn evaluate(&self, facts: &PdfFacts, template: &TemplateSpec) -> AnalysisResult {
        let mut rec = CheckRecorder::new();

        rec.check_count(
            facts.pages.len() as u32,
            template.min_count,
            template.max_count,
            "pages",
        );
        rec.check_sections(&facts.lines(), &template.expected_sections, "page heading");

        for (i, page) in facts.pages.iter().enumerate() {
            rec.record(page.trim().is_empty().then(|| {
                Discrepancy::new(
                    Severity::High,
                    "blank_page",
                    format!("page {}", i + 1),
                    "page content",
                    "no extractable text",
                )
            }));
        }

        let text = facts.pages.join("\n");
        rec.check_required_text(&text, &template.required_text, "document");
        rec.check_forbidden_text(&text, &template.forbidden_text, "document");
        if template.forbid_placeholders {
            rec.check_placeholders(&text, "document");
        }

        rec.finish(&format!("PDF ({} pages)", facts.pages.len()), &self.policy.verdict)
    }
}

impl OutputAnalyzer for PdfAnalyzer {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["pdf"]
    }

    fn analyze(&self, path: &Path, template: &TemplateSpec) -> Result<AnalysisResult> {
        let facts = Self::extract(path)?;
        Ok(self.evaluate(&facts, template))
    }
}
