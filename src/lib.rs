//! Converge - Output-Quality Feedback Loop
//!
//! Drives a document-generating service until its output matches a
//! reference template: submit the form, wait for the emailed document,
//! analyze it, have an LLM open a fix PR, merge, wait for the redeploy,
//! and test again.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`r#loop`] - The feedback loop state machine, retry executor and progress
//! - [`session`] - Crash-recoverable, versioned loop state persistence
//! - [`stagnation`] - Recurring-issue detection
//! - [`quality`] - Document analyzers (PPTX, XLSX, DOCX, PDF, HTML) and templates
//! - [`collaborators`] - Frontend, inbox, GitHub, deployment, LLM and operator
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and failure categories
//! - [`testing`] - Mocks, fixtures and assertions
//!
//! # Example
//!
//! ```rust,ignore
//! use converge::{ConvergeConfig, FeedbackLoopManager, LoopDependencies, LoopTask};
//!
//! let config = ConvergeConfig::load(Path::new("."), None)?;
//! let deps = LoopDependencies::real(&config)?;
//! let manager = FeedbackLoopManager::new(config, deps)?;
//!
//! let task = LoopTask::new("invoice-service", "quarterly-deck", payload);
//! let outcome = manager.run(&task).await?;
//! std::process::exit(outcome.exit_code());
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod r#loop;
pub mod quality;
pub mod session;
pub mod stagnation;
pub mod testing;

// Re-export commonly used types
pub use error::{ConvergeError, FailureCategory, IntoConvergeError, Result};

// Re-export config types
pub use config::{ConvergeConfig, LoopSettings, RetrySettings, StepTimeouts, StuckEscalation};

// Re-export loop types
pub use r#loop::{
    FeedbackLoopManager, LoopDependencies, LoopOutcome, LoopPhase, LoopState, LoopStatus,
    LoopTask, ProgressObserver, ProgressUpdate, RetryExecutor, RetryPolicy,
};

// Re-export persistence and stagnation types
pub use session::LoopStatePersistence;
pub use stagnation::{IssueFingerprint, IssuePatternDetector, IterationRecord};

// Re-export analysis types
pub use quality::{
    AnalysisPolicy, AnalysisResult, AnalyzerRegistry, Discrepancy, OutputAnalyzer, Severity,
    TemplateLibrary, TemplateSpec,
};
