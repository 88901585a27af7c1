//! Word (DOCX) analyzer.

use std::collections::BTreeSet;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{attr, mean, open_package, read_part};
use crate::error::{ConvergeError, Result};
use crate::quality::checks::CheckRecorder;
use crate::quality::registry::OutputAnalyzer;
use crate::quality::{AnalysisPolicy, AnalysisResult, Discrepancy, Severity, TemplateSpec};

/// One paragraph of the document body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Paragraph {
    /// Style id (`Heading1`, `Title`, `Normal`, ...), empty when unset.
    pub style: String,
    pub text: String,
}

impl Paragraph {
    #[must_use]
    pub fn is_heading(&self) -> bool {
        self.style.starts_with("Heading") || self.style == "Title"
    }
}

/// Facts extracted from a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocxFacts {
    pub paragraphs: Vec<Paragraph>,
    pub tables: u32,
    pub images: u32,
    pub fonts: BTreeSet<String>,
    /// Run sizes in points for non-heading paragraphs.
    pub body_sizes_pt: Vec<f64>,
}

impl DocxFacts {
    #[must_use]
    pub fn headings(&self) -> Vec<String> {
        self.paragraphs
            .iter()
            .filter(|p| p.is_heading())
            .map(|p| p.text.clone())
            .collect()
    }

    fn text(&self) -> String {
        self.paragraphs
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Analyzer for `.docx` documents.
#[derive(Debug, Clone, Default)]
pub struct DocxAnalyzer {
    policy: AnalysisPolicy,
}

impl DocxAnalyzer {
    #[must_use]
    pub fn new(policy: AnalysisPolicy) -> Self {
        Self { policy }
    }

    pub fn extract(path: &Path) -> Result<DocxFacts> {
        let mut archive = open_package(path)?;
        let xml = read_part(&mut archive, "word/document.xml", path)?
            .ok_or_else(|| ConvergeError::malformed(path, "missing word/document.xml"))?;
        parse_document(&xml).map_err(|e| ConvergeError::malformed(path, e.to_string()))
    }

    #[must_use]
    pub fn evaluate(&self, facts: &DocxFacts, template: &TemplateSpec) -> AnalysisResult {
        let mut rec = CheckRecorder::new();

        rec.check_sections(&facts.headings(), &template.expected_sections, "heading");

        let text = facts.text();
        rec.record(text.trim().is_empty().then(|| {
            Discrepancy::new(Severity::Critical, "empty_document", "document", "body text", "none")
        }));
        rec.check_required_text(&text, &template.required_text, "document");
        rec.check_forbidden_text(&text, &template.forbidden_text, "document");
        if template.forbid_placeholders {
            rec.check_placeholders(&text, "document");
        }

        rec.check_count(facts.tables, template.min_tables, None, "tables");
        rec.check_count(facts.images, template.min_images, None, "images");

        if let Some(family) = &template.typography.font_family {
            let strays: Vec<&str> = facts
                .fonts
                .iter()
                .map(String::as_str)
                .filter(|f| !f.eq_ignore_ascii_case(family))
                .collect();
            rec.record((!strays.is_empty()).then(|| {
                Discrepancy::new(Severity::Medium, "font_family", "text runs", family, strays.join(", "))
            }));
        }
        if let (Some(expected), Some(actual)) =
            (template.typography.body_size_pt, mean(&facts.body_sizes_pt))
        {
            let band = template
                .tolerances
                .font_size_pt
                .unwrap_or(self.policy.tolerances.font_size_pt);
            rec.check_tolerance("body_font_size", "document", expected, actual, band, "pt");
        }

        rec.finish(
            &format!(
                "DOCX ({} paragraphs, {} headings)",
                facts.paragraphs.len(),
                facts.headings().len()
            ),
            &self.policy.verdict,
        )
    }
}

impl OutputAnalyzer for DocxAnalyzer {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["docx"]
    }

    fn analyze(&self, path: &Path, template: &TemplateSpec) -> Result<AnalysisResult> {
        let facts = Self::extract(path)?;
        Ok(self.evaluate(&facts, template))
    }
}

fn on_element(element: &BytesStart<'_>, facts: &mut DocxFacts, current: &mut Option<Paragraph>) {
    match element.local_name().as_ref() {
        b"pStyle" => {
            if let (Some(p), Some(style)) = (current.as_mut(), attr(element, b"val")) {
                p.style = style;
            }
        }
        b"rFonts" => {
            if let Some(font) = attr(element, b"ascii") {
                facts.fonts.insert(font);
            }
        }
        b"sz" => {
            let heading = current.as_ref().is_some_and(Paragraph::is_heading);
            let size = attr(element, b"val")
                .and_then(|v| v.parse::<f64>().ok())
                .map(|half_points| half_points / 2.0);
            if let (false, Some(size)) = (heading, size) {
                facts.body_sizes_pt.push(size);
            }
        }
        b"tbl" => facts.tables += 1,
        b"drawing" | b"pict" => facts.images += 1,
        _ => {}
    }
}

/// Parse `word/document.xml`.
pub fn parse_document(xml: &str) -> std::result::Result<DocxFacts, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut facts = DocxFacts::default();
    let mut current: Option<Paragraph> = None;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                match e.local_name().as_ref() {
                    b"p" => current = Some(Paragraph::default()),
                    b"t" => in_text = true,
                    _ => {}
                }
                on_element(e, &mut facts, &mut current);
            }
            Event::Empty(ref e) => on_element(e, &mut facts, &mut current),
            Event::End(ref e) => match e.local_name().as_ref() {
                b"p" => {
                    if let Some(mut p) = current.take() {
                        p.text = p.text.trim().to_string();
                        facts.paragraphs.push(p);
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(ref e) if in_text => {
                if let Some(p) = current.as_mut() {
                    p.text.push_str(&e.unescape()?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::write_docx;
    use tempfile::TempDir;

    const DOC: &str = r#"<w:document xmlns:w="w"><w:body>
        <w:p><w:pPr><w:pStyle w:val="Title"/></w:pPr><w:r><w:t>Annual Report</w:t></w:r></w:p>
        <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Results</w:t></w:r></w:p>
        <w:p><w:r><w:rPr><w:rFonts w:ascii="Georgia"/><w:sz w:val="22"/></w:rPr><w:t xml:space="preserve">Revenue grew </w:t></w:r><w:r><w:t>8%.</w:t></w:r></w:p>
        <w:tbl><w:tr><w:tc><w:p><w:r><w:t>Cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
        <w:p><w:r><w:drawing/></w:r></w:p>
    </w:body></w:document>"#;

    #[test]
    fn test_parse_document() {
        let facts = parse_document(DOC).unwrap();
        assert_eq!(facts.headings(), vec!["Annual Report", "Results"]);
        assert_eq!(facts.paragraphs[2].text, "Revenue grew 8%.");
        assert_eq!(facts.tables, 1);
        assert_eq!(facts.images, 1);
        assert_eq!(facts.body_sizes_pt, vec![11.0]);
        assert!(facts.fonts.contains("Georgia"));
    }

    #[test]
    fn test_missing_heading_and_font() {
        let facts = parse_document(DOC).unwrap();
        let mut template = TemplateSpec::named("report").with_sections(["Results", "Appendix"]);
        template.typography.font_family = Some("Arial".to_string());
        let result = DocxAnalyzer::default().evaluate(&facts, &template);
        let cats: Vec<&str> = result.discrepancies.iter().map(|d| d.category()).collect();
        assert_eq!(cats, vec!["missing_section", "font_family"]);
    }

    #[test]
    fn test_empty_document_is_critical() {
        let result = DocxAnalyzer::default().evaluate(&DocxFacts::default(), &TemplateSpec::named("r"));
        assert!(!result.passed);
        assert_eq!(result.count(Severity::Critical), 1);
    }

    #[test]
    fn test_analyze_real_package() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("report.docx");
        write_docx(&path, &[("Heading1", "Overview"), ("", "All systems nominal.")]).unwrap();

        let template = TemplateSpec::named("report")
            .with_sections(["Overview"])
            .with_required_text(["nominal"]);
        let result = DocxAnalyzer::default().analyze(&path, &template).unwrap();
        assert!(result.passed);
        assert!(result.discrepancies.is_empty(), "{:?}", result.discrepancies);
    }
}
