//! HTML analyzer.
//!
//! Regex-based extraction is enough for generated reports: the analyzer
//! only needs the title, headings, table headers, images and visible text.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use super::check_file;
use crate::error::Result;
use crate::quality::checks::{normalize, CheckRecorder};
use crate::quality::registry::OutputAnalyzer;
use crate::quality::{AnalysisPolicy, AnalysisResult, Discrepancy, Severity, TemplateSpec};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HtmlFacts {
    pub title: Option<String>,
    /// `(level, text)` for every `h1`..`h6`.
    pub headings: Vec<(u8, String)>,
    pub table_headers: Vec<String>,
    pub tables: u32,
    pub images: u32,
    pub images_without_alt: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct HtmlAnalyzer {
    policy: AnalysisPolicy,
}

struct Patterns {
    title: Regex,
    heading: Regex,
    th: Regex,
    table: Regex,
    img: Regex,
    alt: Regex,
    script: Regex,
    tag: Regex,
}

fn patterns() -> &'static Patterns {
    static RE: OnceLock<Patterns> = OnceLock::new();
    RE.get_or_init(|| Patterns {
        title: Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"),
        heading: Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>").expect("valid regex"),
        th: Regex::new(r"(?is)<th(?:\s[^>]*)?>(.*?)</th>").expect("valid regex"),
        table: Regex::new(r"(?i)<table[\s>]").expect("valid regex"),
        img: Regex::new(r"(?is)<img\b[^>]*>").expect("valid regex"),
        alt: Regex::new(r#"(?i)\balt\s*=\s*("[^"]*\S[^"]*"|'[^']*\S[^']*')"#).expect("valid regex"),
        script: Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid regex"),
        tag: Regex::new(r"(?s)<[^>]*>").expect("valid regex"),
    })
}

/// Strip tags and decode the handful of entities generators actually emit.
fn inner_text(fragment: &str) -> String {
    let stripped = patterns().tag.replace_all(fragment, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl HtmlFacts {
    #[must_use]
    pub fn parse(html: &str) -> Self {
        let p = patterns();
        let visible = p.script.replace_all(html, " ");

        let images: Vec<&str> = p.img.find_iter(html).map(|m| m.as_str()).collect();
        Self {
            title: p
                .title
                .captures(html)
                .map(|c| inner_text(&c[1]))
                .filter(|t| !t.is_empty()),
            headings: p
                .heading
                .captures_iter(html)
                .filter_map(|c| c[1].parse::<u8>().ok().map(|level| (level, inner_text(&c[2]))))
                .collect(),
            table_headers: p.th.captures_iter(html).map(|c| inner_text(&c[1])).collect(),
            tables: p.table.find_iter(html).count() as u32,
            images: images.len() as u32,
            images_without_alt: images.iter().filter(|tag| !p.alt.is_match(tag)).count() as u32,
            text: inner_text(&visible),
        }
    }
}

impl HtmlAnalyzer {
    #[must_use]
    pub fn new(policy: AnalysisPolicy) -> Self {
        Self { policy }
    }

    pub fn extract(path: &Path) -> Result<HtmlFacts> {
        check_file(path)?;
        let bytes = std::fs::read(path)?;
        Ok(HtmlFacts::parse(&String::from_utf8_lossy(&bytes)))
    }

    #[must_use]
    pub fn evaluate(&self, facts: &HtmlFacts, template: &TemplateSpec) -> AnalysisResult {
        let mut rec = CheckRecorder::new();

        rec.record(facts.title.is_none().then(|| {
            Discrepancy::new(Severity::Low, "missing_title", "<head>", "a <title>", "none")
        }));

        let headings: Vec<String> = facts.headings.iter().map(|(_, t)| t.clone()).collect();
        rec.check_sections(&headings, &template.expected_sections, "heading");

        let headers: Vec<String> = facts.table_headers.iter().map(|h| normalize(h)).collect();
        for column in &template.expected_columns {
            rec.record((!headers.contains(&normalize(column))).then(|| {
                Discrepancy::new(
                    Severity::High,
                    "missing_column",
                    "table",
                    format!("column \"{column}\""),
                    "absent",
                )
            }));
        }

        rec.check_count(facts.tables, template.min_tables, None, "tables");
        rec.check_count(facts.images, template.min_images, None, "images");
        if facts.images > 0 {
            rec.record((facts.images_without_alt > 0).then(|| {
                Discrepancy::new(
                    Severity::Low,
                    "image_alt",
                    "img",
                    "alt text on every image",
                    format!("{} image(s) without alt", facts.images_without_alt),
                )
            }));
        }

        rec.check_required_text(&facts.text, &template.required_text, "page");
        rec.check_forbidden_text(&facts.text, &template.forbidden_text, "page");
        if template.forbid_placeholders {
            rec.check_placeholders(&facts.text, "page");
        }

        rec.finish(
            &format!("HTML ({} headings, {} tables)", facts.headings.len(), facts.tables),
            &self.policy.verdict,
        )
    }
}

impl OutputAnalyzer for HtmlAnalyzer {
    fn name(&self) -> &'static str {
        "html"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["html", "htm"]
    }

    fn analyze(&self, path: &Path, template: &TemplateSpec) -> Result<AnalysisResult> {
        let facts = Self::extract(path)?;
        Ok(self.evaluate(&facts, template))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html><html><head><title>Q3 &amp; Q4 Report</title>
        <style>h1 { color: red }</style><script>var x = "{{ hidden }}";</script></head>
        <body><h1>Overview</h1><p>Revenue &gt; plan</p>
        <h2 class="x">Details</h2>
        <table><tr><th>Region</th><th> Revenue </th></tr><tr><td>North</td><td>1</td></tr></table>
        <img src="a.png" alt="chart"><img src="b.png">
        </body></html>"#;

    #[test]
    fn test_parse_extracts_structure() {
        let facts = HtmlFacts::parse(PAGE);
        assert_eq!(facts.title.as_deref(), Some("Q3 & Q4 Report"));
        assert_eq!(
            facts.headings,
            vec![(1, "Overview".to_string()), (2, "Details".to_string())]
        );
        assert_eq!(facts.table_headers, vec!["Region", "Revenue"]);
        assert_eq!(facts.tables, 1);
        assert_eq!(facts.images, 2);
        assert_eq!(facts.images_without_alt, 1);
        assert!(facts.text.contains("Revenue > plan"));
        assert!(!facts.text.contains("hidden"));
    }

    #[test]
    fn test_thead_is_not_read_as_a_header_cell() {
        let facts = HtmlFacts::parse(
            r#"<table><thead><tr><th>Region</th><th class="num">Revenue</th></tr></thead>
            <tbody><tr><td>North</td><td>1</td></tr></tbody></table>"#,
        );
        assert_eq!(facts.table_headers, vec!["Region", "Revenue"]);
    }

    #[test]
    fn test_script_placeholders_are_ignored() {
        let facts = HtmlFacts::parse(PAGE);
        let result = HtmlAnalyzer::default().evaluate(&facts, &TemplateSpec::named("page"));
        assert!(result
            .discrepancies
            .iter()
            .all(|d| d.category() != "unrendered_placeholder"));
        assert_eq!(result.count(Severity::Low), 1);
    }

    #[test]
    fn test_missing_heading_and_column() {
        let facts = HtmlFacts::parse(PAGE);
        let template = TemplateSpec::named("page")
            .with_sections(["Overview", "Appendix"])
            .with_columns(["Region", "Margin"]);
        let result = HtmlAnalyzer::default().evaluate(&facts, &template);
        assert_eq!(result.count(Severity::High), 2);
        assert!(!result.passed);
    }
}
