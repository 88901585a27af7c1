//! Template expectations and the template library.
//!
//! A template is a named set of structural and quality expectations that
//! every analyzer consumes through the same [`TemplateSpec`] type. Each
//! analyzer reads the fields that make sense for its format and ignores
//! the rest (an HTML analyzer has no use for slide geometry).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use super::ToleranceBand;
use crate::error::{ConvergeError, Result};

/// Expected typography, in points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypographyExpectations {
    /// Font family the document should use (theme or run level).
    pub font_family: Option<String>,
    pub title_size_pt: Option<f64>,
    pub body_size_pt: Option<f64>,
}

/// Expected slide geometry, in inches from the top edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutExpectations {
    pub title_top_in: Option<f64>,
    pub content_top_in: Option<f64>,
}

/// Per-template override of the configured tolerance bands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToleranceOverrides {
    pub title_offset_in: Option<ToleranceBand>,
    pub content_top_in: Option<ToleranceBand>,
    pub font_size_pt: Option<ToleranceBand>,
}

/// Expectations for one kind of generated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateSpec {
    pub name: String,
    pub description: String,
    /// Slide titles, headings, sheet names or page headings, in order.
    pub expected_sections: Vec<String>,
    /// Spreadsheet header cells or table header cells.
    pub expected_columns: Vec<String>,
    pub required_text: Vec<String>,
    pub forbidden_text: Vec<String>,
    /// Minimum slides / sheets / pages.
    pub min_count: Option<u32>,
    /// Maximum slides / sheets / pages.
    pub max_count: Option<u32>,
    pub min_images: Option<u32>,
    pub min_tables: Option<u32>,
    /// Minimum data rows per sheet (spreadsheets only).
    pub min_rows: Option<u32>,
    pub typography: TypographyExpectations,
    pub layout: LayoutExpectations,
    pub tolerances: ToleranceOverrides,
    /// Flag leftover `{{ }}`, `{% %}` and `${ }` markers.
    pub forbid_placeholders: bool,
}

impl Default for TemplateSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            expected_sections: Vec::new(),
            expected_columns: Vec::new(),
            required_text: Vec::new(),
            forbidden_text: Vec::new(),
            min_count: None,
            max_count: None,
            min_images: None,
            min_tables: None,
            min_rows: None,
            typography: TypographyExpectations::default(),
            layout: LayoutExpectations::default(),
            tolerances: ToleranceOverrides::default(),
            forbid_placeholders: true,
        }
    }
}

impl TemplateSpec {
    /// Create an empty template with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sections<S: Into<String>>(mut self, sections: impl IntoIterator<Item = S>) -> Self {
        self.expected_sections = sections.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.expected_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_required_text<S: Into<String>>(mut self, text: impl IntoIterator<Item = S>) -> Self {
        self.required_text = text.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_forbidden_text<S: Into<String>>(
        mut self,
        text: impl IntoIterator<Item = S>,
    ) -> Self {
        self.forbidden_text = text.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_count_range(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_count = min;
        self.max_count = max;
        self
    }

    #[must_use]
    pub fn with_layout(mut self, layout: LayoutExpectations) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn with_typography(mut self, typography: TypographyExpectations) -> Self {
        self.typography = typography;
        self
    }

    /// Load a template from a JSON file. The file stem is used as the name
    /// when the file does not set one.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut spec: TemplateSpec =
            serde_json::from_str(&content).map_err(|e| ConvergeError::InvalidTemplate {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        if spec.name.trim().is_empty() {
            spec.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(spec)
    }
}

/// Named templates available to the analyzers.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, TemplateSpec>,
    source: Option<PathBuf>,
}

impl TemplateLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` file directly inside `dir`.
    ///
    /// A missing directory yields an empty library; a malformed template
    /// file is an error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut library = Self {
            templates: BTreeMap::new(),
            source: Some(dir.to_path_buf()),
        };
        if !dir.exists() {
            debug!("Template directory {} does not exist", dir.display());
            return Ok(library);
        }

        for entry in WalkDir::new(dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            let is_json = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if entry.file_type().is_file() && is_json {
                let spec = TemplateSpec::from_file(path)?;
                debug!("Loaded template '{}' from {}", spec.name, path.display());
                library.insert(spec);
            }
        }
        Ok(library)
    }

    /// Add or replace a template.
    pub fn insert(&mut self, spec: TemplateSpec) {
        self.templates.insert(spec.name.clone(), spec);
    }

    /// Look up a template by name.
    pub fn get(&self, name: &str) -> Result<&TemplateSpec> {
        self.templates
            .get(name)
            .ok_or_else(|| ConvergeError::TemplateNotFound {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateSpec> {
        self.templates.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Directory the library was loaded from, if any.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_template_defaults_forbid_placeholders() {
        let spec: TemplateSpec = serde_json::from_str(r#"{ "name": "q" }"#).unwrap();
        assert!(spec.forbid_placeholders);
        assert!(spec.expected_sections.is_empty());
    }

    #[test]
    fn test_template_parses_camel_case_fields() {
        let json = r#"{
            "name": "quarterly",
            "expectedSections": ["Summary", "Revenue"],
            "minCount": 3,
            "layout": { "titleTopIn": 0.4 },
            "tolerances": { "titleOffsetIn": { "pass": 0.1, "warn": 0.3 } }
        }"#;
        let spec: TemplateSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.expected_sections, vec!["Summary", "Revenue"]);
        assert_eq!(spec.min_count, Some(3));
        assert_eq!(spec.layout.title_top_in, Some(0.4));
        assert_eq!(
            spec.tolerances.title_offset_in,
            Some(ToleranceBand::new(0.1, 0.3))
        );
    }

    #[test]
    fn test_library_load_dir_uses_file_stem_as_name() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("deck.json"), r#"{ "minCount": 2 }"#).unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let library = TemplateLibrary::load_dir(temp.path()).unwrap();
        assert_eq!(library.len(), 1);
        assert_eq!(library.get("deck").unwrap().min_count, Some(2));
    }

    #[test]
    fn test_library_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let library = TemplateLibrary::load_dir(&temp.path().join("missing")).unwrap();
        assert!(library.is_empty());
    }

    #[test]
    fn test_library_rejects_malformed_template() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("bad.json"), "{ nope").unwrap();
        let err = TemplateLibrary::load_dir(temp.path()).unwrap_err();
        assert!(matches!(err, ConvergeError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_library_unknown_template() {
        let library = TemplateLibrary::new();
        assert!(matches!(
            library.get("nope"),
            Err(ConvergeError::TemplateNotFound { .. })
        ));
    }
}
