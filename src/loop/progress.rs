//! Progress broadcasting.
//!
//! The manager emits one [`ProgressUpdate`] per transition to every
//! registered [`ProgressObserver`]. Observers are synchronous and must not
//! block; the host decides where updates go (terminal, logs, a UI).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::state::LoopPhase;

/// One structured progress message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub phase: LoopPhase,
    pub iteration: u32,
    pub message: String,
    /// `(terminal plan steps, total plan steps)` for the current iteration.
    pub plan_progress: (usize, usize),
    pub timestamp: DateTime<Utc>,
    /// Screenshot or generated document the update refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(phase: LoopPhase, iteration: u32, message: impl Into<String>) -> Self {
        Self {
            phase,
            iteration,
            message: message.into(),
            plan_progress: (0, 0),
            timestamp: Utc::now(),
            screenshot: None,
        }
    }

    #[must_use]
    pub fn with_plan_progress(mut self, progress: (usize, usize)) -> Self {
        self.plan_progress = progress;
        self
    }

    #[must_use]
    pub fn with_screenshot(mut self, path: Option<PathBuf>) -> Self {
        self.screenshot = path;
        self
    }
}

/// Receives progress updates.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

/// Logs every update through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_progress(&self, update: &ProgressUpdate) {
        info!(
            phase = %update.phase,
            iteration = update.iteration,
            plan_done = update.plan_progress.0,
            plan_total = update.plan_progress.1,
            "{}",
            update.message
        );
    }
}

/// Prints a colored line per update.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleObserver;

impl ConsoleObserver {
    fn phase_label(phase: LoopPhase) -> colored::ColoredString {
        let label = format!("{phase:<18}");
        match phase {
            LoopPhase::Completed | LoopPhase::Passed => label.green().bold(),
            LoopPhase::Failed | LoopPhase::Timeout => label.red().bold(),
            LoopPhase::Stuck => label.yellow().bold(),
            _ => label.cyan(),
        }
    }
}

impl ProgressObserver for ConsoleObserver {
    fn on_progress(&self, update: &ProgressUpdate) {
        let (done, total) = update.plan_progress;
        println!(
            "{} {} {} {}",
            format!("[{}]", update.timestamp.format("%H:%M:%S")).dimmed(),
            Self::phase_label(update.phase),
            format!("iter {} · {}/{}", update.iteration, done, total).dimmed(),
            update.message
        );
    }
}

/// Fan-out to several observers.
#[derive(Clone, Default)]
pub struct ProgressBroadcaster {
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl std::fmt::Debug for ProgressBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBroadcaster")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ProgressBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn subscribe(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    pub fn broadcast(&self, update: &ProgressUpdate) {
        for observer in &self.observers {
            observer.on_progress(update);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}
