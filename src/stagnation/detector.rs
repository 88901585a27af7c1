//! Issue-pattern detection across loop iterations.
//!
//! Every iteration's issue list is reduced to an [`IssueFingerprint`]: the
//! SHA-256 of the normalized, sorted, de-duplicated issue descriptions. The
//! detector counts how often each fingerprint has been seen and keeps a
//! bounded history of per-iteration records.
//!
//! # Example
//!
//! ```rust,ignore
//! use converge::stagnation::{IssuePatternDetector, IterationRecord};
//!
//! let mut detector = IssuePatternDetector::new(50);
//! let issues = vec!["[critical] count at slides: expected 5, got 0".to_string()];
//! let fp = IssuePatternDetector::fingerprint(&issues);
//! detector.record_iteration(IterationRecord::new(1, fp.clone(), issues));
//! assert!(!detector.is_stuck(&fp, 3));
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Default number of iteration records kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Full-length hex SHA-256 of a normalized issue set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueFingerprint(String);

impl IssueFingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines only.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for IssueFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for IssueFingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What happened in one iteration, as far as recurrence tracking cares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub fingerprint: IssueFingerprint,
    /// Issue descriptions as reported (not normalized).
    pub issues: Vec<String>,
    pub passed: bool,
    pub recorded_at: DateTime<Utc>,
}

impl IterationRecord {
    #[must_use]
    pub fn new(iteration: u32, fingerprint: IssueFingerprint, issues: Vec<String>) -> Self {
        Self {
            iteration,
            fingerprint,
            issues,
            passed: false,
            recorded_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn passed(mut self, passed: bool) -> Self {
        self.passed = passed;
        self
    }
}

/// Counts recurring issue sets and keeps a bounded iteration history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuePatternDetector {
    issue_tracker: BTreeMap<IssueFingerprint, u32>,
    iterations_data: VecDeque<IterationRecord>,
    #[serde(skip, default = "default_capacity")]
    capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for IssuePatternDetector {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl IssuePatternDetector {
    /// Create an empty detector keeping at most `capacity` records (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            issue_tracker: BTreeMap::new(),
            iterations_data: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Rebuild a detector from persisted parts, trimming history to capacity.
    #[must_use]
    pub fn from_parts(
        issue_tracker: BTreeMap<IssueFingerprint, u32>,
        history: impl IntoIterator<Item = IterationRecord>,
        capacity: usize,
    ) -> Self {
        let mut detector = Self::new(capacity);
        detector.issue_tracker = issue_tracker;
        detector.iterations_data = history.into_iter().collect();
        detector.evict();
        detector
    }

    /// Fingerprint an issue list.
    ///
    /// Each description is trimmed, lowercased and has internal whitespace
    /// collapsed; blanks are dropped; the rest is sorted and de-duplicated
    /// before hashing. The full 256-bit digest is kept.
    #[must_use]
    pub fn fingerprint<S: AsRef<str>>(issues: &[S]) -> IssueFingerprint {
        let normalized: BTreeSet<String> = issues
            .iter()
            .map(|issue| {
                issue
                    .as_ref()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase()
            })
            .filter(|issue| !issue.is_empty())
            .collect();

        let joined = normalized.into_iter().collect::<Vec<_>>().join("\n");
        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        IssueFingerprint(hex::encode(hasher.finalize()))
    }

    /// Append a record and bump its fingerprint's count. Returns the new count.
    pub fn record_iteration(&mut self, record: IterationRecord) -> u32 {
        let count = self
            .issue_tracker
            .entry(record.fingerprint.clone())
            .or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;

        debug!(
            fingerprint = record.fingerprint.short(),
            iteration = record.iteration,
            occurrences = count,
            "Recorded iteration issues"
        );
        self.iterations_data.push_back(record);
        self.evict();
        count
    }

    fn evict(&mut self) {
        while self.iterations_data.len() > self.capacity {
            self.iterations_data.pop_front();
        }
    }

    /// Times this fingerprint has been recorded.
    #[must_use]
    pub fn occurrences(&self, fingerprint: &IssueFingerprint) -> u32 {
        self.issue_tracker.get(fingerprint).copied().unwrap_or(0)
    }

    /// True once the fingerprint has been seen `threshold` times.
    #[must_use]
    pub fn is_stuck(&self, fingerprint: &IssueFingerprint, threshold: u32) -> bool {
        self.occurrences(fingerprint) >= threshold
    }

    #[must_use]
    pub fn tracker(&self) -> &BTreeMap<IssueFingerprint, u32> {
        &self.issue_tracker
    }

    /// Iteration records, oldest first.
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &IterationRecord> + ExactSizeIterator {
        self.iterations_data.iter()
    }

    /// Most recent `n` records, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<&IterationRecord> {
        let skip = self.iterations_data.len().saturating_sub(n);
        self.iterations_data.iter().skip(skip).collect()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the history cap, evicting oldest records if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict();
    }
}
