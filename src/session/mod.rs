//! Crash-recoverable loop state.
//!
//! # Architecture
//!
//! ```text
//! LoopStatePersistence
//!   ├── save()  - temp file (unique name) → fsync → rename
//!   ├── load()  - sweep orphans → parse → migrate → coerce
//!   └── clear() - best-effort delete
//! ```
//!
//! # Forward Compatibility
//!
//! Every file carries `schema_version`:
//! - Older versions are migrated additively (see [`migration`])
//! - Newer versions are refused with [`ConvergeError::SchemaTooNew`](crate::error::ConvergeError::SchemaTooNew)
//! - Empty or corrupt files are treated as "no prior state"

pub mod migration;
pub mod persistence;

pub use persistence::{LoopStatePersistence, ORPHAN_GRACE};
