//! PowerPoint (PPTX) analyzer.
//!
//! Reads slide XML parts straight out of the package and extracts titles,
//! text, shape geometry, run-level font sizes, fonts, pictures and tables.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::OnceLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use super::{attr, mean, open_package, read_part};
use crate::error::{ConvergeError, Result};
use crate::quality::checks::CheckRecorder;
use crate::quality::registry::OutputAnalyzer;
use crate::quality::{AnalysisPolicy, AnalysisResult, Discrepancy, Severity, TemplateSpec};

/// English Metric Units per inch.
const EMU_PER_INCH: f64 = 914_400.0;

/// Facts extracted from one slide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlideFacts {
    /// 1-based slide number.
    pub number: usize,
    pub title: Option<String>,
    pub title_top_in: Option<f64>,
    pub title_size_pt: Option<f64>,
    /// Top edge of the highest non-title shape that holds text.
    pub content_top_in: Option<f64>,
    pub body_sizes_pt: Vec<f64>,
    pub texts: Vec<String>,
    /// Explicit run fonts (theme references like `+mn-lt` excluded).
    pub fonts: BTreeSet<String>,
    pub images: u32,
    pub tables: u32,
}

impl SlideFacts {
    fn is_empty(&self) -> bool {
        self.texts.iter().all(|t| t.trim().is_empty()) && self.images == 0 && self.tables == 0
    }
}

/// Facts extracted from a whole presentation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PptxFacts {
    pub slides: Vec<SlideFacts>,
    /// Major and minor Latin fonts declared by the theme.
    pub theme_fonts: Vec<String>,
}

impl PptxFacts {
    fn all_text(&self) -> String {
        self.slides
            .iter()
            .flat_map(|s| s.texts.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Analyzer for `.pptx` presentations.
#[derive(Debug, Clone, Default)]
pub struct PptxAnalyzer {
    policy: AnalysisPolicy,
}

impl PptxAnalyzer {
    #[must_use]
    pub fn new(policy: AnalysisPolicy) -> Self {
        Self { policy }
    }

    /// Read slides and theme from a package on disk.
    pub fn extract(path: &Path) -> Result<PptxFacts> {
        let mut archive = open_package(path)?;

        let presentation = read_part(&mut archive, "ppt/presentation.xml", path)?;
        let rels = read_part(&mut archive, "ppt/_rels/presentation.xml.rels", path)?;
        let part_names: BTreeSet<String> = archive.file_names().map(str::to_string).collect();

        let slide_parts = match (&presentation, &rels) {
            (Some(presentation), Some(rels)) => {
                let ordered = slide_order(presentation, rels)
                    .map_err(|e| ConvergeError::malformed(path, format!("slide list: {e}")))?;
                let ordered: Vec<String> = ordered
                    .into_iter()
                    .filter(|part| part_names.contains(part))
                    .collect();
                if ordered.is_empty() {
                    slide_parts_by_name(&part_names)
                } else {
                    ordered
                }
            }
            _ => slide_parts_by_name(&part_names),
        };

        if slide_parts.is_empty() && presentation.is_none() {
            return Err(ConvergeError::malformed(path, "missing ppt/presentation.xml"));
        }

        let mut slides = Vec::with_capacity(slide_parts.len());
        for (position, part) in slide_parts.iter().enumerate() {
            let xml = read_part(&mut archive, part, path)?.unwrap_or_default();
            let slide = parse_slide(&xml, position + 1)
                .map_err(|e| ConvergeError::malformed(path, format!("{part}: {e}")))?;
            slides.push(slide);
        }

        let theme_fonts = match read_part(&mut archive, "ppt/theme/theme1.xml", path)? {
            Some(xml) => parse_theme_fonts(&xml)
                .map_err(|e| ConvergeError::malformed(path, format!("theme: {e}")))?,
            None => Vec::new(),
        };

        Ok(PptxFacts {
            slides,
            theme_fonts,
        })
    }

    /// Compare extracted facts against a template.
    #[must_use]
    pub fn evaluate(&self, facts: &PptxFacts, template: &TemplateSpec) -> AnalysisResult {
        let mut rec = CheckRecorder::new();
        let tolerances = &self.policy.tolerances;

        rec.check_count(
            facts.slides.len() as u32,
            template.min_count,
            template.max_count,
            "slides",
        );

        let titles: Vec<String> = facts
            .slides
            .iter()
            .map(|s| s.title.clone().unwrap_or_default())
            .collect();
        rec.check_sections(&titles, &template.expected_sections, "slide");

        let text = facts.all_text();
        rec.check_required_text(&text, &template.required_text, "presentation");
        rec.check_forbidden_text(&text, &template.forbidden_text, "presentation");
        if template.forbid_placeholders {
            rec.check_placeholders(&text, "presentation");
        }

        for slide in &facts.slides {
            let location = format!("slide {}", slide.number);

            rec.record(slide.is_empty().then(|| {
                Discrepancy::new(Severity::High, "empty_slide", &location, "slide content", "blank")
                    .with_suggestion("Remove the slide or populate it")
            }));
            rec.record(slide.title.is_none().then(|| {
                Discrepancy::new(Severity::Low, "missing_title", &location, "a title placeholder", "none")
            }));

            if let (Some(expected), Some(actual)) = (template.layout.title_top_in, slide.title_top_in) {
                let band = template
                    .tolerances
                    .title_offset_in
                    .unwrap_or(tolerances.title_offset_in);
                rec.check_tolerance("title_position", &location, expected, actual, band, "in");
            }
            if let (Some(expected), Some(actual)) =
                (template.layout.content_top_in, slide.content_top_in)
            {
                let band = template
                    .tolerances
                    .content_top_in
                    .unwrap_or(tolerances.content_top_in);
                rec.check_tolerance("content_top", &location, expected, actual, band, "in");
            }

            let font_band = template
                .tolerances
                .font_size_pt
                .unwrap_or(tolerances.font_size_pt);
            if let (Some(expected), Some(actual)) =
                (template.typography.title_size_pt, slide.title_size_pt)
            {
                rec.check_tolerance("title_font_size", &location, expected, actual, font_band, "pt");
            }
            if let (Some(expected), Some(actual)) =
                (template.typography.body_size_pt, mean(&slide.body_sizes_pt))
            {
                rec.check_tolerance("body_font_size", &location, expected, actual, font_band, "pt");
            }
        }

        if let Some(family) = &template.typography.font_family {
            check_font_family(&mut rec, facts, family);
        }

        let images: u32 = facts.slides.iter().map(|s| s.images).sum();
        let tables: u32 = facts.slides.iter().map(|s| s.tables).sum();
        rec.check_count(images, template.min_images, None, "images");
        rec.check_count(tables, template.min_tables, None, "tables");

        rec.finish(&format!("PPTX ({} slides)", facts.slides.len()), &self.policy.verdict)
    }
}

impl OutputAnalyzer for PptxAnalyzer {
    fn name(&self) -> &'static str {
        "pptx"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["pptx"]
    }

    fn analyze(&self, path: &Path, template: &TemplateSpec) -> Result<AnalysisResult> {
        let facts = Self::extract(path)?;
        Ok(self.evaluate(&facts, template))
    }
}

fn check_font_family(rec: &mut CheckRecorder, facts: &PptxFacts, family: &str) {
    let wanted = family.to_lowercase();
    let theme_has = facts
        .theme_fonts
        .iter()
        .any(|f| f.to_lowercase() == wanted);
    let run_fonts: BTreeSet<&str> = facts
        .slides
        .iter()
        .flat_map(|s| s.fonts.iter().map(String::as_str))
        .collect();
    let runs_have = run_fonts.iter().any(|f| f.to_lowercase() == wanted);

    rec.record((!theme_has && !runs_have).then(|| {
        Discrepancy::new(
            Severity::High,
            "font_family",
            "theme",
            family,
            if facts.theme_fonts.is_empty() {
                "no theme fonts".to_string()
            } else {
                facts.theme_fonts.join(", ")
            },
        )
        .with_suggestion(format!("Use {family} as the theme font"))
    }));

    let strays: Vec<&str> = run_fonts
        .into_iter()
        .filter(|f| f.to_lowercase() != wanted)
        .collect();
    rec.record((!strays.is_empty()).then(|| {
        Discrepancy::new(
            Severity::Medium,
            "font_family",
            "text runs",
            family,
            strays.join(", "),
        )
        .with_suggestion("Remove explicit font overrides from text runs")
    }));
}

fn slide_part_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").expect("slide regex is valid"))
}

/// Slide parts ordered by the number in their part name.
fn slide_parts_by_name(part_names: &BTreeSet<String>) -> Vec<String> {
    let mut numbered: Vec<(usize, &String)> = part_names
        .iter()
        .filter_map(|name| {
            slide_part_regex()
                .captures(name)
                .and_then(|c| c[1].parse::<usize>().ok())
                .map(|n| (n, name))
        })
        .collect();
    numbered.sort_by_key(|(n, _)| *n);
    numbered.into_iter().map(|(_, name)| name.clone()).collect()
}

/// Slide parts in presentation order: `<p:sldIdLst>` in
/// `ppt/presentation.xml`, resolved through its relationships part.
///
/// Part names keep their original numbers when slides are reordered, so
/// only this list gives the order a viewer shows.
pub fn slide_order(
    presentation_xml: &str,
    rels_xml: &str,
) -> std::result::Result<Vec<String>, quick_xml::Error> {
    let mut targets = HashMap::new();
    let mut reader = Reader::from_str(rels_xml);
    loop {
        match reader.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr(e, b"Id"), attr(e, b"Target")) {
                    targets.insert(id, resolve_target(&target));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let mut order = Vec::new();
    let mut reader = Reader::from_str(presentation_xml);
    loop {
        match reader.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"sldId" => {
                if let Some(target) = relationship_id(e).and_then(|id| targets.get(&id)) {
                    order.push(target.clone());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(order)
}

/// The namespaced `r:id` attribute; the bare `id` is the slide id.
fn relationship_id(element: &BytesStart<'_>) -> Option<String> {
    element
        .attributes()
        .filter_map(std::result::Result::ok)
        .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Relationship targets are relative to `ppt/` unless absolute.
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("ppt/{}", target.trim_start_matches("./")),
    }
}

// ============================================================================
// Slide XML parsing
// ============================================================================

#[derive(Debug, Default)]
struct ShapeCtx {
    is_title: bool,
    top_in: Option<f64>,
    texts: Vec<String>,
    sizes: Vec<f64>,
}

fn emu_attr_in(element: &BytesStart<'_>, name: &[u8]) -> Option<f64> {
    attr(element, name)
        .and_then(|v| v.parse::<f64>().ok())
        .map(|emu| emu / EMU_PER_INCH)
}

fn on_element(element: &BytesStart<'_>, slide: &mut SlideFacts, shape: &mut Option<ShapeCtx>) {
    match element.local_name().as_ref() {
        b"ph" => {
            if let Some(ctx) = shape.as_mut() {
                let kind = attr(element, b"type").unwrap_or_default();
                if kind == "title" || kind == "ctrTitle" {
                    ctx.is_title = true;
                }
            }
        }
        b"off" => {
            if let Some(ctx) = shape.as_mut() {
                if ctx.top_in.is_none() {
                    ctx.top_in = emu_attr_in(element, b"y");
                }
            }
        }
        b"rPr" => {
            let size = attr(element, b"sz")
                .and_then(|v| v.parse::<f64>().ok())
                .map(|hundredths| hundredths / 100.0);
            if let (Some(ctx), Some(size)) = (shape.as_mut(), size) {
                ctx.sizes.push(size);
            }
        }
        b"latin" => {
            if let Some(face) = attr(element, b"typeface") {
                if !face.starts_with('+') && !face.is_empty() {
                    slide.fonts.insert(face);
                }
            }
        }
        b"pic" => slide.images += 1,
        b"tbl" => slide.tables += 1,
        _ => {}
    }
}

fn finish_shape(ctx: ShapeCtx, slide: &mut SlideFacts) {
    let text = ctx.texts.join("").trim().to_string();
    if ctx.is_title && slide.title.is_none() {
        slide.title = Some(text);
        slide.title_top_in = ctx.top_in;
        slide.title_size_pt = ctx.sizes.iter().copied().reduce(f64::max);
    } else if !text.is_empty() {
        if let Some(top) = ctx.top_in {
            slide.content_top_in = Some(slide.content_top_in.map_or(top, |t| t.min(top)));
        }
        slide.body_sizes_pt.extend(ctx.sizes);
    }
}

/// Parse one `ppt/slides/slideN.xml` part.
pub fn parse_slide(xml: &str, number: usize) -> std::result::Result<SlideFacts, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut slide = SlideFacts {
        number,
        ..SlideFacts::default()
    };
    let mut shape: Option<ShapeCtx> = None;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                match e.local_name().as_ref() {
                    b"sp" => shape = Some(ShapeCtx::default()),
                    b"t" => in_text = true,
                    _ => {}
                }
                on_element(e, &mut slide, &mut shape);
            }
            Event::Empty(ref e) => on_element(e, &mut slide, &mut shape),
            Event::End(ref e) => match e.local_name().as_ref() {
                b"sp" => {
                    if let Some(ctx) = shape.take() {
                        finish_shape(ctx, &mut slide);
                    }
                }
                b"t" => in_text = false,
                b"p" => {
                    if let Some(ctx) = shape.as_mut() {
                        ctx.texts.push(" ".to_string());
                    }
                }
                _ => {}
            },
            Event::Text(ref e) if in_text => {
                let text = e.unescape()?.into_owned();
                if let Some(ctx) = shape.as_mut() {
                    ctx.texts.push(text.clone());
                }
                slide.texts.push(text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(slide)
}

/// Collect `<a:latin typeface>` values under the theme's major/minor fonts.
pub fn parse_theme_fonts(xml: &str) -> std::result::Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut in_font_scheme = false;
    let mut fonts = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(ref e) if matches!(e.local_name().as_ref(), b"majorFont" | b"minorFont") => {
                in_font_scheme = true;
            }
            Event::End(ref e) if matches!(e.local_name().as_ref(), b"majorFont" | b"minorFont") => {
                in_font_scheme = false;
            }
            Event::Empty(ref e) | Event::Start(ref e)
                if in_font_scheme && e.local_name().as_ref() == b"latin" =>
            {
                if let Some(face) = attr(e, b"typeface").filter(|f| !f.is_empty()) {
                    if !fonts.contains(&face) {
                        fonts.push(face);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(fonts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{LayoutExpectations, TypographyExpectations};
    use crate::testing::fixtures::{slide_xml, write_pptx, write_pptx_ordered, FixtureSlide};
    use tempfile::TempDir;

    fn slide(number: usize, title: &str, title_top_in: f64) -> SlideFacts {
        SlideFacts {
            number,
            title: Some(title.to_string()),
            title_top_in: Some(title_top_in),
            texts: vec![title.to_string(), "body".to_string()],
            ..SlideFacts::default()
        }
    }

    #[test]
    fn test_parse_slide_extracts_title_geometry_and_sizes() {
        let xml = slide_xml(&FixtureSlide::new("Quarterly Revenue", 0.5).with_body("Up 12% year over year", 1.5));
        let facts = parse_slide(&xml, 1).unwrap();

        assert_eq!(facts.title.as_deref(), Some("Quarterly Revenue"));
        assert!((facts.title_top_in.unwrap() - 0.5).abs() < 1e-9);
        assert!((facts.content_top_in.unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(facts.title_size_pt, Some(40.0));
        assert_eq!(facts.body_sizes_pt, vec![18.0]);
        assert!(facts.texts.iter().any(|t| t.contains("12%")));
    }

    #[test]
    fn test_parse_slide_counts_pictures_and_tables() {
        let xml = r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree>
            <p:pic><p:nvPicPr/></p:pic>
            <p:graphicFrame><a:graphic><a:graphicData><a:tbl><a:tr><a:tc><a:txBody><a:p><a:r><a:t>Cell</a:t></a:r></a:p></a:txBody></a:tc></a:tr></a:tbl></a:graphicData></a:graphic></p:graphicFrame>
        </p:spTree></p:cSld></p:sld>"#;
        let facts = parse_slide(xml, 2).unwrap();
        assert_eq!(facts.images, 1);
        assert_eq!(facts.tables, 1);
        assert!(facts.title.is_none());
        assert_eq!(facts.texts, vec!["Cell"]);
    }

    #[test]
    fn test_parse_theme_fonts() {
        let xml = r#"<a:theme xmlns:a="a"><a:themeElements><a:fontScheme>
            <a:majorFont><a:latin typeface="Montserrat"/></a:majorFont>
            <a:minorFont><a:latin typeface="Open Sans"/></a:minorFont>
        </a:fontScheme></a:themeElements></a:theme>"#;
        assert_eq!(parse_theme_fonts(xml).unwrap(), vec!["Montserrat", "Open Sans"]);
    }

    #[test]
    fn test_title_drift_two_tier_severity() {
        let analyzer = PptxAnalyzer::default();
        let facts = PptxFacts {
            slides: vec![slide(1, "A", 0.6), slide(2, "B", 0.9), slide(3, "C", 1.4)],
            theme_fonts: vec![],
        };
        let template = TemplateSpec::named("deck").with_layout(LayoutExpectations {
            title_top_in: Some(0.5),
            content_top_in: None,
        });

        let result = analyzer.evaluate(&facts, &template);
        let drift: Vec<(&str, Severity)> = result
            .discrepancies
            .iter()
            .filter(|d| d.category() == "title_position")
            .map(|d| (d.location(), d.severity()))
            .collect();
        assert_eq!(
            drift,
            vec![("slide 2", Severity::Medium), ("slide 3", Severity::High)]
        );
    }

    #[test]
    fn test_template_tolerance_override_wins() {
        let analyzer = PptxAnalyzer::default();
        let facts = PptxFacts {
            slides: vec![slide(1, "A", 0.9)],
            theme_fonts: vec![],
        };
        let mut template = TemplateSpec::named("deck").with_layout(LayoutExpectations {
            title_top_in: Some(0.5),
            content_top_in: None,
        });
        template.tolerances.title_offset_in = Some(crate::quality::ToleranceBand::new(0.5, 1.0));

        let result = analyzer.evaluate(&facts, &template);
        assert!(result
            .discrepancies
            .iter()
            .all(|d| d.category() != "title_position"));
    }

    #[test]
    fn test_missing_slides_is_critical() {
        let analyzer = PptxAnalyzer::default();
        let template = TemplateSpec::named("deck").with_count_range(Some(5), None);
        let result = analyzer.evaluate(&PptxFacts::default(), &template);
        assert!(!result.passed);
        assert_eq!(result.count(Severity::Critical), 1);
    }

    #[test]
    fn test_font_family_mismatch() {
        let analyzer = PptxAnalyzer::default();
        let mut s = slide(1, "A", 0.5);
        s.fonts.insert("Comic Sans MS".to_string());
        let facts = PptxFacts {
            slides: vec![s],
            theme_fonts: vec!["Calibri".to_string()],
        };
        let template = TemplateSpec::named("deck").with_typography(TypographyExpectations {
            font_family: Some("Montserrat".to_string()),
            ..TypographyExpectations::default()
        });
        let result = analyzer.evaluate(&facts, &template);
        let fonts: Vec<Severity> = result
            .discrepancies
            .iter()
            .filter(|d| d.category() == "font_family")
            .map(|d| d.severity())
            .collect();
        assert_eq!(fonts, vec![Severity::High, Severity::Medium]);
    }

    #[test]
    fn test_analyze_real_package() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("deck.pptx");
        write_pptx(
            &path,
            &[
                FixtureSlide::new("Summary", 0.5).with_body("Revenue grew", 1.5),
                FixtureSlide::new("Outlook", 0.5).with_body("Hello {{ name }}", 1.5),
            ],
        )
        .unwrap();

        let template = TemplateSpec::named("deck")
            .with_sections(["Summary", "Outlook"])
            .with_count_range(Some(2), Some(4));
        let result = PptxAnalyzer::default().analyze(&path, &template).unwrap();

        assert_eq!(result.count(Severity::Critical), 0);
        assert_eq!(result.count(Severity::High), 1);
        assert!(result
            .discrepancies
            .iter()
            .any(|d| d.category() == "unrendered_placeholder"));
        // 1 high out of the checks run is within the allowance
        assert!(result.passed);
    }

    #[test]
    fn test_analyze_rejects_non_zip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.pptx");
        std::fs::write(&path, "not a zip").unwrap();
        let err = PptxAnalyzer::default()
            .analyze(&path, &TemplateSpec::named("deck"))
            .unwrap_err();
        assert!(matches!(err, ConvergeError::MalformedDocument { .. }));
    }

    #[test]
    fn test_slides_follow_presentation_order_not_part_names() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reordered.pptx");
        // slide1.xml holds "Appendix" but the deck shows it last
        write_pptx_ordered(
            &path,
            &[
                FixtureSlide::new("Appendix", 0.5).with_body("Sources", 1.5),
                FixtureSlide::new("Summary", 0.5).with_body("Revenue grew", 1.5),
                FixtureSlide::new("Outlook", 0.5).with_body("Steady demand", 1.5),
            ],
            &[1, 2, 0],
        )
        .unwrap();

        let facts = PptxAnalyzer::extract(&path).unwrap();
        let titles: Vec<&str> = facts
            .slides
            .iter()
            .filter_map(|s| s.title.as_deref())
            .collect();
        assert_eq!(titles, vec!["Summary", "Outlook", "Appendix"]);
        let numbers: Vec<usize> = facts.slides.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let template = TemplateSpec::named("deck").with_sections(["Summary", "Outlook", "Appendix"]);
        let result = PptxAnalyzer::default().evaluate(&facts, &template);
        assert!(!result
            .discrepancies
            .iter()
            .any(|d| d.category() == "section_order"));
    }

    #[test]
    fn test_slide_order_resolves_relative_and_absolute_targets() {
        let presentation = r#"<p:presentation xmlns:p="p" xmlns:r="r"><p:sldIdLst><p:sldId id="256" r:id="rId7"/><p:sldId id="257" r:id="rId3"/><p:sldId id="258" r:id="rId9"/></p:sldIdLst></p:presentation>"#;
        let rels = r#"<Relationships><Relationship Id="rId3" Type="slide" Target="slides/slide1.xml"/><Relationship Id="rId7" Type="slide" Target="/ppt/slides/slide4.xml"/><Relationship Id="rId8" Type="theme" Target="theme/theme1.xml"/></Relationships>"#;

        let order = slide_order(presentation, rels).unwrap();

        // rId9 has no relationship and is skipped
        assert_eq!(order, vec!["ppt/slides/slide4.xml", "ppt/slides/slide1.xml"]);
    }
}
