//! Testing infrastructure for converge.
//!
//! This module provides mocks, fixtures, and assertions for exercising the
//! feedback loop and the analyzers without real external systems.
//!
//! # Architecture
//!
//! - **Mocks**: Test doubles for every collaborator trait, with scripted behavior
//! - **Fixtures**: Writers for minimal but valid PPTX, DOCX and XLSX files
//! - **Assertions**: Custom assertions for analysis results and loop runs
//!
//! # Example
//!
//! ```rust,ignore
//! use converge::testing::{failing_result, passing_result, MockAnalyzer, MockCollaborators};
//!
//! let mocks = MockCollaborators::new(dir.join("deck.pptx")).with_analyzer(
//!     MockAnalyzer::new().with_results([failing_result(&["Slide 2 title"]), passing_result(8)]),
//! );
//! let manager = FeedbackLoopManager::new(config, mocks.dependencies("deck"))?;
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mocks;

// Re-export commonly used types
pub use assertions::*;
pub use fixtures::*;
pub use mocks::*;
