//! Configuration management for the converge feedback loop.
//!
//! Settings are read from `.converge/settings.json` in the project
//! directory (camelCase keys, every field optional). The configuration is
//! an explicit value handed to constructors; nothing in the crate reads
//! ambient global state.
//!
//! # Example settings.json
//!
//! ```json
//! {
//!   "loop": { "maxIterations": 8, "stuckThreshold": 3 },
//!   "retry": { "maxRetries": 4, "initialDelayMs": 500 },
//!   "tolerances": { "titleOffsetIn": { "pass": 0.2, "warn": 0.5 } },
//!   "email": { "inboxDir": "inbox", "senderAllowlist": ["reports@example.com"] }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConvergeError, Result};
use crate::quality::{ToleranceBand, VerdictPolicy};

/// Environment variable that overrides the state file location.
pub const STATE_FILE_ENV: &str = "CONVERGE_STATE_FILE";

/// Environment variable that selects the settings file.
pub const CONFIG_FILE_ENV: &str = "CONVERGE_CONFIG";

/// Directory (relative to the project) holding converge's files.
pub const CONVERGE_DIR: &str = ".converge";

// ============================================================================
// Loop settings
// ============================================================================

/// What to do when the same issues keep recurring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StuckEscalation {
    /// Ask the research collaborator for a root cause, then try again.
    #[default]
    Research,
    /// Stop the loop.
    Abort,
}

/// Iteration limits and escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopSettings {
    /// Maximum number of submit/analyze/fix cycles.
    pub max_iterations: u32,
    /// Wall-clock budget for one run, in seconds.
    pub max_duration_secs: u64,
    /// Occurrences of one issue fingerprint that count as "stuck".
    pub stuck_threshold: u32,
    /// Number of iteration records kept in the issue history.
    pub history_capacity: usize,
    /// Ask the operator to approve a passing result before completing.
    pub require_approval: bool,
    /// Default escalation when stuck.
    pub stuck_escalation: StuckEscalation,
    /// Whether the operator must confirm the escalation.
    pub approve_escalation: bool,
    /// Delay between polls while waiting on CI or a deployment.
    pub poll_interval_ms: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_duration_secs: 4 * 60 * 60,
            stuck_threshold: 3,
            history_capacity: 50,
            require_approval: false,
            stuck_escalation: StuckEscalation::Research,
            approve_escalation: true,
            poll_interval_ms: 15_000,
        }
    }
}

impl LoopSettings {
    /// Wall-clock budget as a duration.
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Retry/backoff settings shared by every externally-fallible step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    /// Timeout used when a step timeout is configured as zero.
    pub min_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            min_timeout_ms: 5_000,
        }
    }
}

/// Per-step attempt timeouts, in seconds. Zero means "use the minimum timeout".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepTimeouts {
    pub submit: u64,
    pub email: u64,
    pub analyze: u64,
    pub fix: u64,
    pub pr: u64,
    pub merge: u64,
    pub deploy: u64,
    pub research: u64,
    pub review: u64,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            submit: 60,
            email: 15 * 60,
            analyze: 5 * 60,
            fix: 30 * 60,
            pr: 10 * 60,
            merge: 2 * 60,
            deploy: 15 * 60,
            research: 20 * 60,
            review: 60 * 60,
        }
    }
}

/// Absolute tolerance bands for geometric/typographic comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToleranceSettings {
    /// Title Y-position drift, inches.
    pub title_offset_in: ToleranceBand,
    /// Top margin of the first content shape, inches.
    pub content_top_in: ToleranceBand,
    /// Font size delta, points.
    pub font_size_pt: ToleranceBand,
}

impl Default for ToleranceSettings {
    fn default() -> Self {
        Self {
            title_offset_in: ToleranceBand::new(0.25, 0.6),
            content_top_in: ToleranceBand::new(0.25, 0.6),
            font_size_pt: ToleranceBand::new(1.0, 3.0),
        }
    }
}

// ============================================================================
// Collaborator settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailSettings {
    /// Directory the mail bridge drops JSON manifests into.
    pub inbox_dir: PathBuf,
    pub sender_allowlist: Vec<String>,
    pub subject_allowlist: Vec<String>,
    pub poll_interval_ms: u64,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            inbox_dir: PathBuf::from(CONVERGE_DIR).join("inbox"),
            sender_allowlist: Vec::new(),
            subject_allowlist: Vec::new(),
            poll_interval_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrontendSettings {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploySettings {
    pub url: Option<String>,
    pub expected_marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GithubSettings {
    /// Checkout the `gh` CLI runs in.
    pub repo_dir: PathBuf,
    pub merge_method: String,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("."),
            merge_method: "squash".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    /// CLI executable used for fix generation, research and visual grading.
    pub command: String,
    pub model: String,
    /// Grade rendered output visually in addition to structural checks.
    pub visual_grading: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            model: "opus".to_string(),
            visual_grading: false,
        }
    }
}

// ============================================================================
// Top-level configuration
// ============================================================================

/// Complete configuration for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvergeConfig {
    #[serde(rename = "loop")]
    pub loop_settings: LoopSettings,
    pub retry: RetrySettings,
    pub timeouts: StepTimeouts,
    pub verdict: VerdictPolicy,
    pub tolerances: ToleranceSettings,
    pub email: EmailSettings,
    pub frontend: FrontendSettings,
    pub deploy: DeploySettings,
    pub github: GithubSettings,
    pub llm: LlmSettings,
    pub state_file: PathBuf,
    pub templates_dir: PathBuf,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            loop_settings: LoopSettings::default(),
            retry: RetrySettings::default(),
            timeouts: StepTimeouts::default(),
            verdict: VerdictPolicy::default(),
            tolerances: ToleranceSettings::default(),
            email: EmailSettings::default(),
            frontend: FrontendSettings::default(),
            deploy: DeploySettings::default(),
            github: GithubSettings::default(),
            llm: LlmSettings::default(),
            state_file: PathBuf::from(CONVERGE_DIR).join("loop_state.json"),
            templates_dir: PathBuf::from(CONVERGE_DIR).join("templates"),
        }
    }
}

impl ConvergeConfig {
    /// Load configuration for a project directory.
    ///
    /// Uses `explicit` if given, then `CONVERGE_CONFIG`, then
    /// `.converge/settings.json`. A missing file yields defaults. Relative
    /// paths in the result are resolved against `project_dir`, and
    /// `CONVERGE_STATE_FILE` overrides the state file location.
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        let settings_path = explicit
            .map(Path::to_path_buf)
            .or(env_path)
            .unwrap_or_else(|| Self::settings_path(project_dir));

        let mut config = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<ConvergeConfig>(&content).map_err(|e| {
                ConvergeError::config_with_path(e.to_string(), settings_path.clone())
            })?
        } else {
            Self::default()
        };

        if let Some(state_file) = std::env::var_os(STATE_FILE_ENV) {
            config.state_file = PathBuf::from(state_file);
        }

        config.resolve_paths(project_dir);
        config.validate()?;
        Ok(config)
    }

    /// Get the settings.json path for a project
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONVERGE_DIR).join("settings.json")
    }

    /// Make every relative path absolute with respect to `project_dir`.
    pub fn resolve_paths(&mut self, project_dir: &Path) {
        for path in [
            &mut self.state_file,
            &mut self.templates_dir,
            &mut self.email.inbox_dir,
            &mut self.github.repo_dir,
        ] {
            if path.is_relative() {
                *path = project_dir.join(&*path);
            }
        }
    }

    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries < 1 {
            return Err(ConvergeError::invalid_config(
                "retry.maxRetries",
                "must be at least 1",
            ));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(ConvergeError::invalid_config(
                "retry.backoffFactor",
                "must be at least 1.0",
            ));
        }
        if self.retry.min_timeout_ms == 0 {
            return Err(ConvergeError::invalid_config(
                "retry.minTimeoutMs",
                "must be greater than 0",
            ));
        }
        if self.loop_settings.stuck_threshold < 1 {
            return Err(ConvergeError::invalid_config(
                "loop.stuckThreshold",
                "must be at least 1",
            ));
        }
        if self.loop_settings.history_capacity < 1 {
            return Err(ConvergeError::invalid_config(
                "loop.historyCapacity",
                "must be at least 1",
            ));
        }
        if self.verdict.high_ratio < 0.0 {
            return Err(ConvergeError::invalid_config(
                "verdict.highRatio",
                "must not be negative",
            ));
        }
        for (field, band) in [
            ("tolerances.titleOffsetIn", &self.tolerances.title_offset_in),
            ("tolerances.contentTopIn", &self.tolerances.content_top_in),
            ("tolerances.fontSizePt", &self.tolerances.font_size_pt),
        ] {
            if !band.is_valid() {
                return Err(ConvergeError::invalid_config(
                    field,
                    format!("pass ({}) must be <= warn ({})", band.pass, band.warn),
                ));
            }
        }
        Ok(())
    }
}
