//! Extension-keyed analyzer dispatch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::analyzers::{DocxAnalyzer, HtmlAnalyzer, PdfAnalyzer, PptxAnalyzer, XlsxAnalyzer};
use super::{AnalysisPolicy, AnalysisResult, TemplateLibrary, TemplateSpec};
use crate::error::{ConvergeError, Result};

/// A document analyzer for one or more file extensions.
///
/// Analysis is synchronous and CPU-bound; the loop runs it on a blocking
/// thread.
pub trait OutputAnalyzer: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Lowercase extensions without the dot.
    fn supported_extensions(&self) -> &'static [&'static str];

    /// Compare the file at `path` against `template`.
    fn analyze(&self, path: &Path, template: &TemplateSpec) -> Result<AnalysisResult>;
}

/// Maps file extensions to analyzers and owns the template library.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Arc<dyn OutputAnalyzer>>,
    templates: TemplateLibrary,
}

impl std::fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerRegistry")
            .field("extensions", &self.extensions())
            .field("templates", &self.templates.len())
            .finish()
    }
}

impl AnalyzerRegistry {
    /// Empty registry with the given templates.
    #[must_use]
    pub fn new(templates: TemplateLibrary) -> Self {
        Self {
            analyzers: HashMap::new(),
            templates,
        }
    }

    /// Registry with the PPTX, XLSX, DOCX, PDF and HTML analyzers.
    #[must_use]
    pub fn with_defaults(templates: TemplateLibrary, policy: &AnalysisPolicy) -> Self {
        let mut registry = Self::new(templates);
        registry.register(Arc::new(PptxAnalyzer::new(policy.clone())));
        registry.register(Arc::new(XlsxAnalyzer::new(policy.clone())));
        registry.register(Arc::new(DocxAnalyzer::new(policy.clone())));
        registry.register(Arc::new(PdfAnalyzer::new(policy.clone())));
        registry.register(Arc::new(HtmlAnalyzer::new(policy.clone())));
        registry
    }

    /// Register an analyzer for every extension it supports. A later
    /// registration for the same extension replaces the earlier one.
    pub fn register(&mut self, analyzer: Arc<dyn OutputAnalyzer>) {
        for ext in analyzer.supported_extensions() {
            let key = ext.trim_start_matches('.').to_lowercase();
            if let Some(previous) = self.analyzers.insert(key.clone(), Arc::clone(&analyzer)) {
                debug!(
                    "Analyzer '{}' replaces '{}' for .{}",
                    analyzer.name(),
                    previous.name(),
                    key
                );
            }
        }
    }

    /// Analyzer for a path, by lowercased extension.
    #[must_use]
    pub fn analyzer_for(&self, path: &Path) -> Option<Arc<dyn OutputAnalyzer>> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        self.analyzers.get(&ext).cloned()
    }

    /// Analyze `path` against the named template.
    pub fn analyze_output(&self, path: &Path, template_name: &str) -> Result<AnalysisResult> {
        let analyzer = self.analyzer_for(path).ok_or_else(|| ConvergeError::UnsupportedExtension {
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
        })?;
        let template = self.templates.get(template_name)?;

        debug!(
            "Analyzing {} with '{}' against template '{}'",
            path.display(),
            analyzer.name(),
            template_name
        );
        let result = analyzer.analyze(path, template)?;
        info!("{}: {}", path.display(), result.headline());
        Ok(result)
    }

    #[must_use]
    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    /// Registered extensions, sorted.
    #[must_use]
    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.analyzers.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }
}
