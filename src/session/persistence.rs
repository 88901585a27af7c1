//! Atomic, versioned storage of [`LoopState`].

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::migration;
use crate::error::{ConvergeError, Result};
use crate::r#loop::state::{LoopState, SCHEMA_VERSION};
use crate::stagnation::DEFAULT_HISTORY_CAPACITY;

/// Temporary files older than this are assumed abandoned by a crashed writer.
pub const ORPHAN_GRACE: Duration = Duration::from_secs(10 * 60);

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Loop state persistence manager.
///
/// Writes go to a uniquely named temporary file in the target directory,
/// are synced, then renamed over the target, so concurrent writers never
/// share a temp file and readers never see a partial write.
#[derive(Debug, Clone)]
pub struct LoopStatePersistence {
    path: PathBuf,
    history_capacity: usize,
}

impl LoopStatePersistence {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    /// History cap applied to loaded issue histories.
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "loop_state.json".to_string())
    }

    fn tmp_prefix(&self) -> String {
        format!(".{}.", self.file_name())
    }

    fn persistence_error(&self, message: impl std::fmt::Display) -> ConvergeError {
        ConvergeError::Persistence {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    /// Save state atomically. Sets `last_saved_at` and the schema version.
    pub fn save(&self, state: &mut LoopState) -> Result<()> {
        let dir = self.dir();
        fs::create_dir_all(&dir).map_err(|e| self.persistence_error(e))?;

        state.schema_version = SCHEMA_VERSION;
        state.last_saved_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(state)?;

        let tmp_path = dir.join(format!(
            "{}{}{}",
            self.tmp_prefix(),
            Uuid::new_v4().simple(),
            TMP_SUFFIX
        ));
        let written = File::create(&tmp_path).and_then(|mut tmp_file| {
            tmp_file.write_all(&json)?;
            tmp_file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp_path, &self.path)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(self.persistence_error(e));
        }

        // Make the rename itself durable where the platform allows it.
        if let Ok(dir_handle) = File::open(&dir) {
            let _ = dir_handle.sync_all();
        }

        debug!(
            "Saved loop state ({}, iteration {}) to {}",
            state.state,
            state.iteration,
            self.path.display()
        );
        Ok(())
    }

    /// Load state.
    ///
    /// Returns `Ok(None)` for a missing, empty or unparseable file. Fails
    /// only when the file was written by a newer schema or cannot be read.
    pub fn load(&self) -> Result<Option<LoopState>> {
        self.sweep_orphans();

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.persistence_error(e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            warn!("State file {} is empty; starting fresh", self.path.display());
            return Ok(None);
        }

        let value: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "State file {} is not valid JSON ({}); starting fresh",
                    self.path.display(),
                    e
                );
                return Ok(None);
            }
        };
        if !value.is_object() {
            warn!(
                "State file {} does not hold an object; starting fresh",
                self.path.display()
            );
            return Ok(None);
        }

        migration::migrate(value, &self.path, self.history_capacity).map(Some)
    }

    /// Delete the state file. Missing files and delete failures are not errors.
    pub fn clear(&self) -> bool {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Cleared loop state at {}", self.path.display());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to clear {}: {}", self.path.display(), e);
                false
            }
        }
    }

    /// Remove abandoned temporary files older than [`ORPHAN_GRACE`].
    pub fn sweep_orphans(&self) -> usize {
        self.sweep_orphans_older_than(ORPHAN_GRACE)
    }

    /// Remove this file's temporary siblings older than `grace`.
    pub fn sweep_orphans_older_than(&self, grace: Duration) -> usize {
        let Ok(entries) = fs::read_dir(self.dir()) else {
            return 0;
        };
        let prefix = self.tmp_prefix();
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.filter_map(std::result::Result::ok) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !(name.starts_with(&prefix) && name.ends_with(TMP_SUFFIX)) {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < grace {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    warn!("Removed orphaned state temp file {}", name);
                    removed += 1;
                }
                Err(e) => debug!("Could not remove {}: {}", name, e),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r#loop::state::LoopPhase;
    use crate::stagnation::{IssuePatternDetector, IterationRecord};
    use tempfile::TempDir;

    fn test_persistence() -> (LoopStatePersistence, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let persistence = LoopStatePersistence::new(temp_dir.path().join(".converge/loop_state.json"));
        (persistence, temp_dir)
    }

    fn sample_state() -> LoopState {
        let mut state = LoopState::new("invoice-service", "task-42", DEFAULT_HISTORY_CAPACITY);
        state.transition(LoopPhase::TestingFrontend);
        state.transition(LoopPhase::WaitingForEmail);
        state.prs_merged = 2;
        state.mark_email_seen("msg-1");
        state.last_fix_deployed_epoch = Some(1_767_225_600);
        let issues = vec!["Slide 2: missing title".to_string()];
        let fp = IssuePatternDetector::fingerprint(&issues);
        state.issues.record_iteration(IterationRecord::new(1, fp, issues));
        state.pending.pr_number = Some(17);
        state
    }

    #[test]
    fn test_load_returns_none_when_missing() {
        let (persistence, _temp_dir) = test_persistence();
        assert!(persistence.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (persistence, _temp_dir) = test_persistence();
        let mut state = sample_state();

        persistence.save(&mut state).expect("save should succeed");
        assert!(state.last_saved_at.is_some());

        let loaded = persistence.load().unwrap().expect("state should load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_no_tmp_file_after_save() {
        let (persistence, temp_dir) = test_persistence();
        persistence.save(&mut sample_state()).unwrap();

        let leftovers: Vec<_> = fs::read_dir(temp_dir.path().join(".converge"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(TMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_empty_and_corrupt_files_yield_none() {
        let (persistence, _temp_dir) = test_persistence();
        fs::create_dir_all(persistence.path().parent().unwrap()).unwrap();

        fs::write(persistence.path(), "").unwrap();
        assert!(persistence.load().unwrap().is_none());

        fs::write(persistence.path(), "{\"iteration\": 3, ").unwrap();
        assert!(persistence.load().unwrap().is_none());

        fs::write(persistence.path(), "[1, 2, 3]").unwrap();
        assert!(persistence.load().unwrap().is_none());
    }

    #[test]
    fn test_newer_schema_fails_loudly() {
        let (persistence, _temp_dir) = test_persistence();
        fs::create_dir_all(persistence.path().parent().unwrap()).unwrap();
        fs::write(persistence.path(), r#"{"schema_version": 99, "iteration": 1}"#).unwrap();

        let err = persistence.load().unwrap_err();
        assert!(matches!(err, ConvergeError::SchemaTooNew { found: 99, .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_older_schema_is_migrated() {
        let (persistence, _temp_dir) = test_persistence();
        fs::create_dir_all(persistence.path().parent().unwrap()).unwrap();
        fs::write(
            persistence.path(),
            r#"{"service_name": "svc", "iteration": 4, "state": "MERGING_PR", "prs_merged": 3}"#,
        )
        .unwrap();

        let state = persistence.load().unwrap().unwrap();
        assert_eq!(state.schema_version, SCHEMA_VERSION);
        assert_eq!(state.state, LoopPhase::MergingPr);
        assert_eq!(state.iteration, 4);
        assert!(state.task_id.is_none());
    }

    #[test]
    fn test_clear_is_best_effort() {
        let (persistence, _temp_dir) = test_persistence();
        assert!(!persistence.clear());
        persistence.save(&mut sample_state()).unwrap();
        assert!(persistence.clear());
        assert!(!persistence.exists());
    }

    #[test]
    fn test_sweep_removes_only_own_old_temp_files() {
        let (persistence, temp_dir) = test_persistence();
        let dir = temp_dir.path().join(".converge");
        fs::create_dir_all(&dir).unwrap();
        let orphan = dir.join(".loop_state.json.deadbeef.tmp");
        let unrelated = dir.join(".other.json.deadbeef.tmp");
        fs::write(&orphan, "{").unwrap();
        fs::write(&unrelated, "{").unwrap();

        assert_eq!(persistence.sweep_orphans(), 0, "fresh temp files are kept");
        assert_eq!(persistence.sweep_orphans_older_than(Duration::ZERO), 1);
        assert!(!orphan.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_concurrent_writers_leave_one_complete_state() {
        let (persistence, temp_dir) = test_persistence();

        let writers: Vec<_> = (0..8u32)
            .map(|writer| {
                let persistence = persistence.clone();
                std::thread::spawn(move || {
                    let mut state =
                        LoopState::new("invoice-service", format!("task-{writer}"), DEFAULT_HISTORY_CAPACITY);
                    state.iteration = writer;
                    for _ in 0..25 {
                        persistence.save(&mut state).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let loaded = persistence.load().unwrap().expect("a complete state survives");
        let task_id = loaded.task_id.clone().unwrap();
        assert_eq!(task_id, format!("task-{}", loaded.iteration));
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);

        let leftovers: Vec<_> = fs::read_dir(temp_dir.path().join(".converge"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(&persistence.tmp_prefix()) || name.ends_with(TMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }
}
