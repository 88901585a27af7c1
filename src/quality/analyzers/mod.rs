//! Document analyzers, one per output family.
//!
//! Each analyzer splits its work into `extract` (read the file into plain
//! facts) and `evaluate` (compare facts against a [`TemplateSpec`]). Only
//! `extract` touches the file system, so the comparison rules are tested
//! without binary fixtures.
//!
//! - [`PptxAnalyzer`] - slides, titles, geometry, typography (zip + quick-xml)
//! - [`XlsxAnalyzer`] - sheets, headers, rows, formula errors (calamine)
//! - [`DocxAnalyzer`] - headings, paragraphs, tables, images (zip + quick-xml)
//! - [`PdfAnalyzer`] - pages and text (pdf-extract)
//! - [`HtmlAnalyzer`] - title, headings, tables, images (regex)
//!
//! [`TemplateSpec`]: super::TemplateSpec

pub mod docx;
pub mod html;
pub mod pdf;
pub mod pptx;
pub mod xlsx;

pub use docx::DocxAnalyzer;
pub use html::HtmlAnalyzer;
pub use pdf::PdfAnalyzer;
pub use pptx::PptxAnalyzer;
pub use xlsx::XlsxAnalyzer;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::events::BytesStart;
use zip::ZipArchive;

use crate::error::{ConvergeError, Result};

/// Maximum file size accepted for analysis (100MB)
const MAX_DOC_SIZE: u64 = 100 * 1024 * 1024;

/// Reject files that are missing or too large to analyze.
pub(crate) fn check_file(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ConvergeError::malformed(path, format!("cannot read metadata: {e}")))?;
    let size = metadata.len();
    if size > MAX_DOC_SIZE {
        return Err(ConvergeError::malformed(
            path,
            format!(
                "file too large: {:.1} MB (max {:.1} MB)",
                size as f64 / (1024.0 * 1024.0),
                MAX_DOC_SIZE as f64 / (1024.0 * 1024.0)
            ),
        ));
    }
    Ok(size)
}

/// Open an Office Open XML package.
pub(crate) fn open_package(path: &Path) -> Result<ZipArchive<File>> {
    check_file(path)?;
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|e| ConvergeError::malformed(path, format!("not a zip package: {e}")))
}

/// Read one package part as UTF-8, `None` when the part is absent.
pub(crate) fn read_part(
    archive: &mut ZipArchive<File>,
    name: &str,
    path: &Path,
) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ConvergeError::malformed(path, format!("{name}: {e}"))),
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| ConvergeError::malformed(path, format!("{name}: {e}")))?;
    Ok(Some(content))
}

/// Value of the attribute with the given local name (namespace prefix ignored).
pub(crate) fn attr(element: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    element
        .attributes()
        .filter_map(std::result::Result::ok)
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Arithmetic mean, `None` for an empty slice.
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
