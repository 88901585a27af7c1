//! Custom error types for converge.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the feedback loop.
//! Every error belongs to one [`FailureCategory`], which decides whether
//! the loop retries, suspends, or fails.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a failure should be treated by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Timeouts, flaky network, CI still pending. Retried locally.
    Transient,
    /// Malformed state, unsupported file, unknown template. Fails fast.
    Structural,
    /// The analyzer found discrepancies. Drives the next iteration.
    Quality,
    /// The same issues keep coming back without resolution.
    Stuck,
}

impl FailureCategory {
    /// Short human-readable explanation used in terminal summaries.
    #[must_use]
    pub fn explanation(&self) -> &'static str {
        match self {
            Self::Transient => "transient external failure (retries exhausted)",
            Self::Structural => "structural failure (cannot make forward progress)",
            Self::Quality => "quality failure (output still does not match the template)",
            Self::Stuck => "no progress (the same issues keep recurring)",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Structural => write!(f, "structural"),
            Self::Quality => write!(f, "quality"),
            Self::Stuck => write!(f, "stuck"),
        }
    }
}

/// Main error type for converge operations
#[derive(Error, Debug)]
pub enum ConvergeError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Stored state was written by a newer version of the tool
    #[error(
        "State file {path} has schema version {found}, newer than supported version {supported}"
    )]
    SchemaTooNew {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    /// State could not be written
    #[error("Failed to persist loop state to {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    // =========================================================================
    // Analysis Errors
    // =========================================================================
    /// No analyzer is registered for a file extension
    #[error("No analyzer registered for extension '{extension}' ({path})")]
    UnsupportedExtension { extension: String, path: PathBuf },

    /// Template name is not known to the library
    #[error("Unknown template: {name}")]
    TemplateNotFound { name: String },

    /// Template definition could not be parsed
    #[error("Invalid template {path}: {message}")]
    InvalidTemplate { path: PathBuf, message: String },

    /// Generated document could not be read or parsed
    #[error("Malformed document {path}: {message}")]
    MalformedDocument { path: PathBuf, message: String },

    // =========================================================================
    // Loop Execution Errors
    // =========================================================================
    /// A loop step exceeded its per-attempt timeout
    #[error("Step '{step}' timed out after {}s", timeout.as_secs_f64())]
    StepTimeout { step: String, timeout: Duration },

    /// An external step has not produced its result yet
    #[error("Step '{step}' not ready: {reason}")]
    NotReady { step: String, reason: String },

    /// Loop execution failed
    #[error("Loop execution error: {message}")]
    Loop { message: String },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// A collaborator reported a failure
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
        structural: bool,
    },

    /// Missing required tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConvergeError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a loop error
    pub fn loop_error(message: impl Into<String>) -> Self {
        Self::Loop {
            message: message.into(),
        }
    }

    /// Create a "not ready yet" error for a polling step
    pub fn not_ready(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotReady {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Create a transient collaborator error
    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator: collaborator.into(),
            message: message.into(),
            structural: false,
        }
    }

    /// Create a collaborator error that retrying cannot fix
    pub fn collaborator_structural(
        collaborator: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Collaborator {
            collaborator: collaborator.into(),
            message: message.into(),
            structural: true,
        }
    }

    /// Create a malformed document error
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            path: path.into(),
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if retrying (now or on a later resume) may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StepTimeout { .. } | Self::NotReady { .. } | Self::Loop { .. } => true,
            Self::Collaborator { structural, .. } => !structural,
            Self::Io(_) => true,
            Self::Other(e) => classify_anyhow(e) == FailureCategory::Transient,
            _ => false,
        }
    }

    /// Check if this error means no forward progress is possible
    pub fn is_structural(&self) -> bool {
        !self.is_transient()
    }

    /// Failure category for this error
    pub fn category(&self) -> FailureCategory {
        if self.is_transient() {
            FailureCategory::Transient
        } else {
            FailureCategory::Structural
        }
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SchemaTooNew { .. } | Self::Persistence { .. } => 3,
            Self::MissingTool { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::UnsupportedExtension { .. }
            | Self::TemplateNotFound { .. }
            | Self::InvalidTemplate { .. }
            | Self::MalformedDocument { .. } => 8,
            _ => 1,
        }
    }
}

/// Classify an error returned by a collaborator.
///
/// Collaborators speak `anyhow`; anything that is not a [`ConvergeError`]
/// is assumed transient.
pub fn classify_anyhow(error: &anyhow::Error) -> FailureCategory {
    match error.downcast_ref::<ConvergeError>() {
        Some(ConvergeError::Other(inner)) => classify_anyhow(inner),
        Some(e) => e.category(),
        None => FailureCategory::Transient,
    }
}

/// Type alias for converge results
pub type Result<T> = std::result::Result<T, ConvergeError>;

/// Extension trait for converting foreign errors to ConvergeError
pub trait IntoConvergeError<T> {
    fn into_converge_config(self) -> Result<T>;
    fn into_converge_loop(self) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoConvergeError<T> for std::result::Result<T, E> {
    fn into_converge_config(self) -> Result<T> {
        self.map_err(|e| ConvergeError::config(e.into().to_string()))
    }

    fn into_converge_loop(self) -> Result<T> {
        self.map_err(|e| ConvergeError::loop_error(e.into().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConvergeError::SchemaTooNew {
            path: PathBuf::from("state.json"),
            found: 9,
            supported: 3,
        };
        assert!(err.to_string().contains("9"));
        assert!(err.to_string().contains("3"));
    }

    #[test]
    fn test_timeouts_and_not_ready_are_transient() {
        let timeout = ConvergeError::StepTimeout {
            step: "email".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(timeout.is_transient());
        assert!(ConvergeError::not_ready("pr", "ci pending").is_transient());
        assert_eq!(timeout.category(), FailureCategory::Transient);
    }

    #[test]
    fn test_structural_errors() {
        let err = ConvergeError::UnsupportedExtension {
            extension: "odt".into(),
            path: PathBuf::from("out.odt"),
        };
        assert!(err.is_structural());
        assert!(ConvergeError::TemplateNotFound { name: "x".into() }.is_structural());
        assert!(ConvergeError::invalid_config("retry.maxRetries", "must be >= 1").is_structural());
    }

    #[test]
    fn test_collaborator_structural_flag() {
        assert!(ConvergeError::collaborator("frontend", "503").is_transient());
        assert!(ConvergeError::collaborator_structural("frontend", "400").is_structural());
    }

    #[test]
    fn test_classify_anyhow_defaults_to_transient() {
        let plain = anyhow::anyhow!("connection reset");
        assert_eq!(classify_anyhow(&plain), FailureCategory::Transient);

        let typed: anyhow::Error = ConvergeError::TemplateNotFound { name: "q".into() }.into();
        assert_eq!(classify_anyhow(&typed), FailureCategory::Structural);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ConvergeError::config("test").exit_code(), 7);
        assert_eq!(
            ConvergeError::TemplateNotFound { name: "t".into() }.exit_code(),
            8
        );
        assert_eq!(ConvergeError::loop_error("x").exit_code(), 1);
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/test/settings.json");
        let err = ConvergeError::config_with_path("failed to parse", path.clone());
        if let ConvergeError::Config {
            message,
            path: opt_path,
        } = err
        {
            assert_eq!(message, "failed to parse");
            assert_eq!(opt_path, Some(path));
        } else {
            panic!("Wrong error variant");
        }
    }

    #[test]
    fn test_into_converge_error_trait() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        if let Err(ConvergeError::Config { message, .. }) = result.into_converge_config() {
            assert!(message.contains("file not found"));
        } else {
            panic!("Wrong error variant after conversion");
        }
    }

    #[test]
    fn test_failure_category_display() {
        assert_eq!(FailureCategory::Stuck.to_string(), "stuck");
        assert!(FailureCategory::Quality.explanation().contains("template"));
    }
}
