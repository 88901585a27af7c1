//! Stagnation detection.
//!
//! This module recognizes when the loop keeps producing the same issues,
//! which is the signal for escalating to research instead of attempting
//! another identical fix.

pub mod detector;

pub use detector::{
    IssueFingerprint, IssuePatternDetector, IterationRecord, DEFAULT_HISTORY_CAPACITY,
};
