//! Minimal Office Open XML packages for analyzer tests.
//!
//! The packages carry only the parts the analyzers read, written
//! uncompressed with the `zip` writer.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use quick_xml::escape::escape;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const EMU_PER_INCH: f64 = 914_400.0;

const NS_PRESENTATION: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const NS_DRAWING: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_WORDPROCESSING: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_SPREADSHEET: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_RELATIONSHIPS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PACKAGE_RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// One slide: a title shape and optional body text boxes.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureSlide {
    pub title: String,
    pub title_top_in: f64,
    /// `(text, top edge in inches)`
    pub bodies: Vec<(String, f64)>,
}

impl FixtureSlide {
    #[must_use]
    pub fn new(title: impl Into<String>, title_top_in: f64) -> Self {
        Self {
            title: title.into(),
            title_top_in,
            bodies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_body(mut self, text: impl Into<String>, top_in: f64) -> Self {
        self.bodies.push((text.into(), top_in));
        self
    }
}

fn emu(inches: f64) -> i64 {
    (inches * EMU_PER_INCH).round() as i64
}

fn shape(id: usize, placeholder: &str, top_in: f64, size_hundredths: u32, text: &str) -> String {
    format!(
        r#"<p:sp><p:nvSpPr><p:cNvPr id="{id}" name="Shape {id}"/><p:cNvSpPr/><p:nvPr>{placeholder}</p:nvPr></p:nvSpPr><p:spPr><a:xfrm><a:off x="457200" y="{y}"/><a:ext cx="8229600" cy="914400"/></a:xfrm></p:spPr><p:txBody><a:bodyPr/><a:p><a:r><a:rPr lang="en-US" sz="{size_hundredths}"/><a:t>{text}</a:t></a:r></a:p></p:txBody></p:sp>"#,
        y = emu(top_in),
        text = escape(text),
    )
}

/// Slide XML with a 40pt title placeholder and 18pt body boxes.
#[must_use]
pub fn slide_xml(slide: &FixtureSlide) -> String {
    let mut shapes = shape(2, r#"<p:ph type="title"/>"#, slide.title_top_in, 4000, &slide.title);
    for (i, (text, top)) in slide.bodies.iter().enumerate() {
        shapes.push_str(&shape(i + 3, "", *top, 1800, text));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:sld xmlns:p="{NS_PRESENTATION}" xmlns:a="{NS_DRAWING}" xmlns:r="{NS_RELATIONSHIPS}"><p:cSld><p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr>{shapes}</p:spTree></p:cSld></p:sld>"#
    )
}

fn write_package(path: &Path, parts: &[(String, String)]) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, content) in parts {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(content.as_bytes())?;
    }
    zip.finish()?;
    Ok(())
}

fn content_types(overrides: &[(String, &str)]) -> String {
    let overrides: String = overrides
        .iter()
        .map(|(part, ct)| format!(r#"<Override PartName="/{part}" ContentType="{ct}"/>"#))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>{overrides}</Types>"#
    )
}

fn root_rels(target: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{NS_PACKAGE_RELS}"><Relationship Id="rId1" Type="{NS_RELATIONSHIPS}/officeDocument" Target="{target}"/></Relationships>"#
    )
}

/// Write a `.pptx` with one slide part per fixture slide.
pub fn write_pptx(path: &Path, slides: &[FixtureSlide]) -> Result<()> {
    let order: Vec<usize> = (0..slides.len()).collect();
    write_pptx_ordered(path, slides, &order)
}

/// Write a `.pptx` whose slide list shows the parts in `order`.
///
/// `slides[i]` is stored as `ppt/slides/slide{i + 1}.xml`; `order` holds
/// indices into `slides`, the way a reordered deck keeps its part names.
pub fn write_pptx_ordered(path: &Path, slides: &[FixtureSlide], order: &[usize]) -> Result<()> {
    let slide_ids: String = order
        .iter()
        .enumerate()
        .map(|(position, i)| format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 256 + position, i + 2))
        .collect();
    let slide_rels: String = (0..slides.len())
        .map(|i| {
            format!(
                r#"<Relationship Id="rId{}" Type="{NS_RELATIONSHIPS}/slide" Target="slides/slide{}.xml"/>"#,
                i + 2,
                i + 1
            )
        })
        .collect();
    let mut overrides = vec![(
        "ppt/presentation.xml".to_string(),
        "application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml",
    )];
    let mut parts = vec![
        ("_rels/.rels".to_string(), root_rels("ppt/presentation.xml")),
        (
            "ppt/presentation.xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:presentation xmlns:p="{NS_PRESENTATION}" xmlns:r="{NS_RELATIONSHIPS}"><p:sldIdLst>{slide_ids}</p:sldIdLst></p:presentation>"#
            ),
        ),
        (
            "ppt/_rels/presentation.xml.rels".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{NS_PACKAGE_RELS}">{slide_rels}</Relationships>"#
            ),
        ),
    ];
    for (i, slide) in slides.iter().enumerate() {
        let name = format!("ppt/slides/slide{}.xml", i + 1);
        overrides.push((
            name.clone(),
            "application/vnd.openxmlformats-officedocument.presentationml.slide+xml",
        ));
        parts.push((name, slide_xml(slide)));
    }
    parts.insert(0, ("[Content_Types].xml".to_string(), content_types(&overrides)));
    write_package(path, &parts)
}

/// Write a `.docx`; each paragraph is `(style id, text)`, empty style for body text.
pub fn write_docx(path: &Path, paragraphs: &[(&str, &str)]) -> Result<()> {
    let body: String = paragraphs
        .iter()
        .map(|(style, text)| {
            let ppr = if style.is_empty() {
                String::new()
            } else {
                format!(r#"<w:pPr><w:pStyle w:val="{style}"/></w:pPr>"#)
            };
            format!(
                r#"<w:p>{ppr}<w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
                escape(*text)
            )
        })
        .collect();
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="{NS_WORDPROCESSING}"><w:body>{body}</w:body></w:document>"#
    );
    let overrides = vec![(
        "word/document.xml".to_string(),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml",
    )];
    write_package(
        path,
        &[
            ("[Content_Types].xml".to_string(), content_types(&overrides)),
            ("_rels/.rels".to_string(), root_rels("word/document.xml")),
            ("word/document.xml".to_string(), document),
        ],
    )
}

fn column_letters(mut col: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (col % 26) as u8) as char);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    letters.iter().rev().collect()
}

fn sheet_xml(rows: &[Vec<&str>]) -> String {
    let rows: String = rows
        .iter()
        .enumerate()
        .map(|(r, cells)| {
            let cells: String = cells
                .iter()
                .enumerate()
                .map(|(c, value)| {
                    let reference = format!("{}{}", column_letters(c), r + 1);
                    if value.parse::<f64>().is_ok() {
                        format!(r#"<c r="{reference}"><v>{value}</v></c>"#)
                    } else {
                        format!(
                            r#"<c r="{reference}" t="inlineStr"><is><t>{}</t></is></c>"#,
                            escape(*value)
                        )
                    }
                })
                .collect();
            format!(r#"<row r="{}">{cells}</row>"#, r + 1)
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="{NS_SPREADSHEET}"><sheetData>{rows}</sheetData></worksheet>"#
    )
}

/// Write an `.xlsx`; each sheet is `(name, rows of cell values)`.
/// Numeric-looking values become number cells, the rest inline strings.
pub fn write_xlsx(path: &Path, sheets: &[(&str, Vec<Vec<&str>>)]) -> Result<()> {
    let sheet_entries: String = sheets
        .iter()
        .enumerate()
        .map(|(i, (name, _))| {
            format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape(*name),
                i + 1,
                i + 1
            )
        })
        .collect();
    let workbook_rels: String = (0..sheets.len())
        .map(|i| {
            format!(
                r#"<Relationship Id="rId{}" Type="{NS_RELATIONSHIPS}/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                i + 1,
                i + 1
            )
        })
        .collect();

    let mut overrides = vec![
        (
            "xl/workbook.xml".to_string(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml",
        ),
        (
            "xl/styles.xml".to_string(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml",
        ),
    ];
    let mut parts = vec![
        ("_rels/.rels".to_string(), root_rels("xl/workbook.xml")),
        (
            "xl/workbook.xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="{NS_SPREADSHEET}" xmlns:r="{NS_RELATIONSHIPS}"><sheets>{sheet_entries}</sheets></workbook>"#
            ),
        ),
        (
            "xl/_rels/workbook.xml.rels".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{NS_PACKAGE_RELS}">{workbook_rels}</Relationships>"#
            ),
        ),
        (
            "xl/styles.xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><styleSheet xmlns="{NS_SPREADSHEET}"><cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellXfs></styleSheet>"#
            ),
        ),
    ];
    for (i, (_, rows)) in sheets.iter().enumerate() {
        let name = format!("xl/worksheets/sheet{}.xml", i + 1);
        overrides.push((
            name.clone(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml",
        ));
        parts.push((name, sheet_xml(rows)));
    }
    parts.insert(0, ("[Content_Types].xml".to_string(), content_types(&overrides)));
    write_package(path, &parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
    }

    #[test]
    fn test_slide_xml_escapes_text() {
        let xml = slide_xml(&FixtureSlide::new("R&D <draft>", 0.5));
        assert!(xml.contains("R&amp;D &lt;draft&gt;"));
        assert!(xml.contains(r#"y="457200""#));
    }
}
