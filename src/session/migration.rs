//! Schema migrations and defensive decoding of persisted loop state.
//!
//! Stored JSON is upgraded one version at a time by additive steps, then
//! decoded field by field. A field with the wrong shape is coerced or reset
//! with a warning instead of failing the whole load.
//!
//! | From | To | Adds |
//! |------|----|------|
//! | 1 | 2 | `task_id: null`, `seen_email_ids: []` |
//! | 2 | 3 | `last_fix_deployed_epoch: null`, `pending: {}`, `cycle: <fresh plan>`, `last_error: null` |
//!
//! A blob without `schema_version` is version 1.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{ConvergeError, Result};
use crate::r#loop::plan::ExecutionPlan;
use crate::r#loop::state::{LoopPhase, LoopState, PendingWork, SCHEMA_VERSION};
use crate::stagnation::{IssueFingerprint, IssuePatternDetector, IterationRecord};

type Migration = fn(&mut Map<String, Value>);

/// `MIGRATIONS[n]` upgrades version `n + 1` to `n + 2`.
const MIGRATIONS: [Migration; (SCHEMA_VERSION - 1) as usize] = [v1_to_v2, v2_to_v3];

fn v1_to_v2(obj: &mut Map<String, Value>) {
    obj.entry("task_id").or_insert(Value::Null);
    obj.entry("seen_email_ids").or_insert_with(|| json!([]));
}

fn v2_to_v3(obj: &mut Map<String, Value>) {
    obj.entry("last_fix_deployed_epoch").or_insert(Value::Null);
    obj.entry("pending").or_insert_with(|| json!({}));
    obj.entry("cycle")
        .or_insert_with(|| serde_json::to_value(ExecutionPlan::cycle()).unwrap_or_default());
    obj.entry("last_error").or_insert(Value::Null);
}

/// Stored schema version; missing or unreadable means 1.
fn stored_version(obj: &Map<String, Value>) -> u32 {
    match obj.get("schema_version") {
        None | Some(Value::Null) => 1,
        Some(value) => match as_u32(value) {
            Some(0) => 1,
            Some(v) => v,
            None => {
                warn!("Unreadable schema_version {}; treating as 1", value);
                1
            }
        },
    }
}

/// Upgrade a parsed state blob to the current schema and decode it.
///
/// Fails only when the blob comes from a newer schema.
pub fn migrate(value: Value, source: &Path, history_capacity: usize) -> Result<LoopState> {
    let Value::Object(mut obj) = value else {
        return Err(ConvergeError::Persistence {
            path: source.to_path_buf(),
            message: "state is not a JSON object".to_string(),
        });
    };

    let version = stored_version(&obj);
    if version > SCHEMA_VERSION {
        return Err(ConvergeError::SchemaTooNew {
            path: source.to_path_buf(),
            found: version,
            supported: SCHEMA_VERSION,
        });
    }
    for step in &MIGRATIONS[(version - 1) as usize..] {
        step(&mut obj);
    }
    if version < SCHEMA_VERSION {
        tracing::info!(
            "Migrated {} from schema v{} to v{}",
            source.display(),
            version,
            SCHEMA_VERSION
        );
    }
    obj.insert("schema_version".to_string(), json!(SCHEMA_VERSION));

    Ok(decode(&obj, history_capacity))
}

// ============================================================================
// Defensive decoding
// ============================================================================

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn u32_field(obj: &Map<String, Value>, key: &str) -> u32 {
    match obj.get(key) {
        None | Some(Value::Null) => 0,
        Some(value) => as_u32(value).unwrap_or_else(|| {
            warn!(field = key, "Invalid value {} in state file; resetting to 0", value);
            0
        }),
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            warn!(field = key, "Expected a string, found {}; ignoring", other);
            None
        }
    }
}

fn time_field(obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let raw = string_field(obj, key)?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            warn!(field = key, "Invalid timestamp '{}': {}; ignoring", raw, e);
            None
        }
    }
}

fn typed_field<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    let value = obj.get(key).filter(|v| !v.is_null())?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(field = key, "Invalid {} in state file: {}; using default", key, e);
            None
        }
    }
}

fn epoch_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Null => None,
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok().or_else(|| {
            warn!(field = key, "Invalid epoch '{}'; ignoring", s);
            None
        }),
        other => {
            warn!(field = key, "Invalid epoch {}; ignoring", other);
            None
        }
    }
}

fn phase_field(obj: &Map<String, Value>) -> LoopPhase {
    match string_field(obj, "state") {
        None => LoopPhase::Idle,
        Some(name) => LoopPhase::parse(&name).unwrap_or_else(|| {
            warn!("Unknown loop state '{}'; restarting from IDLE", name);
            LoopPhase::Idle
        }),
    }
}

fn tracker_field(obj: &Map<String, Value>) -> BTreeMap<IssueFingerprint, u32> {
    let Some(Value::Object(map)) = obj.get("issue_tracker") else {
        if obj.get("issue_tracker").is_some_and(|v| !v.is_null()) {
            warn!("issue_tracker is not an object; resetting");
        }
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(fingerprint, count)| match as_u32(count) {
            Some(c) => Some((IssueFingerprint::from(fingerprint.clone()), c)),
            None => {
                warn!("Dropping issue_tracker entry {} with count {}", fingerprint, count);
                None
            }
        })
        .collect()
}

fn history_field(obj: &Map<String, Value>) -> Vec<IterationRecord> {
    let Some(Value::Array(items)) = obj.get("iterations_data") else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<IterationRecord>(item.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Dropping unreadable iteration record: {}", e);
                None
            }
        })
        .collect()
}

fn seen_ids_field(obj: &Map<String, Value>) -> BTreeSet<String> {
    let Some(Value::Array(items)) = obj.get("seen_email_ids") else {
        return BTreeSet::new();
    };
    items
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Build a [`LoopState`] from a current-schema object.
fn decode(obj: &Map<String, Value>, history_capacity: usize) -> LoopState {
    let service_name = string_field(obj, "service_name").unwrap_or_else(|| {
        warn!("State file has no service_name");
        String::new()
    });

    LoopState {
        schema_version: SCHEMA_VERSION,
        service_name,
        task_id: string_field(obj, "task_id"),
        iteration: u32_field(obj, "iteration"),
        state: phase_field(obj),
        prs_merged: u32_field(obj, "prs_merged"),
        issues: IssuePatternDetector::from_parts(
            tracker_field(obj),
            history_field(obj),
            history_capacity,
        ),
        started_at: time_field(obj, "started_at").unwrap_or_else(Utc::now),
        last_saved_at: time_field(obj, "last_saved_at"),
        seen_email_ids: seen_ids_field(obj),
        last_fix_deployed_epoch: epoch_field(obj, "last_fix_deployed_epoch"),
        pending: typed_field::<PendingWork>(obj, "pending").unwrap_or_default(),
        cycle: typed_field::<ExecutionPlan>(obj, "cycle").unwrap_or_default(),
        last_error: string_field(obj, "last_error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stagnation::DEFAULT_HISTORY_CAPACITY;
    use std::path::PathBuf;

    fn path() -> PathBuf {
        PathBuf::from("state.json")
    }

    #[test]
    fn test_v1_blob_gains_v3_fields() {
        let v1 = json!({
            "service_name": "invoice",
            "iteration": 2,
            "state": "WAITING_FOR_EMAIL",
            "prs_merged": 1,
            "issue_tracker": { "abc": 2 },
            "iterations_data": [],
            "started_at": "2026-01-05T10:00:00Z"
        });
        let state = migrate(v1, &path(), DEFAULT_HISTORY_CAPACITY).unwrap();

        assert_eq!(state.schema_version, SCHEMA_VERSION);
        assert_eq!(state.iteration, 2);
        assert_eq!(state.state, LoopPhase::WaitingForEmail);
        assert_eq!(state.task_id, None);
        assert!(state.seen_email_ids.is_empty());
        assert_eq!(state.last_fix_deployed_epoch, None);
        assert_eq!(state.pending, PendingWork::default());
        assert_eq!(state.cycle, ExecutionPlan::cycle());
        assert_eq!(state.issues.occurrences(&IssueFingerprint::from("abc".to_string())), 2);
    }

    #[test]
    fn test_v2_keeps_existing_fields() {
        let v2 = json!({
            "schema_version": 2,
            "service_name": "invoice",
            "task_id": "t-9",
            "seen_email_ids": ["m1", "m2"],
            "state": "IDLE"
        });
        let state = migrate(v2, &path(), 10).unwrap();
        assert_eq!(state.task_id.as_deref(), Some("t-9"));
        assert_eq!(state.seen_email_ids.len(), 2);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let err = migrate(json!({ "schema_version": 4 }), &path(), 10).unwrap_err();
        assert!(matches!(
            err,
            ConvergeError::SchemaTooNew {
                found: 4,
                supported: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_primitives_are_coerced() {
        let blob = json!({
            "schema_version": "3",
            "service_name": "svc",
            "iteration": "7",
            "prs_merged": "many",
            "state": "DANCING",
            "started_at": "yesterday",
            "last_fix_deployed_epoch": "1767225600",
            "seen_email_ids": ["a", 5, null],
            "issue_tracker": { "x": "3", "y": -1 },
            "pending": "oops"
        });
        let state = migrate(blob, &path(), 10).unwrap();
        assert_eq!(state.iteration, 7);
        assert_eq!(state.prs_merged, 0);
        assert_eq!(state.state, LoopPhase::Idle);
        assert_eq!(state.last_fix_deployed_epoch, Some(1_767_225_600));
        assert_eq!(
            state.seen_email_ids.into_iter().collect::<Vec<_>>(),
            vec!["5".to_string(), "a".to_string()]
        );
        assert_eq!(state.issues.tracker().len(), 1);
        assert_eq!(state.pending, PendingWork::default());
    }

    #[test]
    fn test_non_integer_iteration_resets_to_zero() {
        let state = migrate(json!({ "iteration": [1] }), &path(), 10).unwrap();
        assert_eq!(state.iteration, 0);
        let state = migrate(json!({ "iteration": -3 }), &path(), 10).unwrap();
        assert_eq!(state.iteration, 0);
    }

    #[test]
    fn test_history_trimmed_to_capacity() {
        let records: Vec<Value> = (1..=5)
            .map(|i| {
                serde_json::to_value(IterationRecord::new(
                    i,
                    IssueFingerprint::from(format!("f{i}")),
                    vec![],
                ))
                .unwrap()
            })
            .collect();
        let state = migrate(json!({ "iterations_data": records }), &path(), 3).unwrap();
        let kept: Vec<u32> = state.issues.history().map(|r| r.iteration).collect();
        assert_eq!(kept, vec![3, 4, 5]);
    }
}
