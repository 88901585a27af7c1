//! End-to-end feedback loop tests with the real document analyzers.
//!
//! The external systems are mocked; the generated deck is a real PPTX on
//! disk that a scripted fix generator rewrites, as a merged PR would.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use converge::collaborators::{FixGenerator, FixOutcome, FixRequest};
use converge::testing::{assert_outcome, write_pptx, FixtureSlide, MockCollaborators};
use converge::{
    AnalysisPolicy, AnalyzerRegistry, ConvergeConfig, FailureCategory, FeedbackLoopManager,
    LoopDependencies, LoopStatus, LoopTask, TemplateLibrary, TemplateSpec,
};
use tempfile::TempDir;

const TEMPLATE: &str = "quarterly-deck";

fn template() -> TemplateSpec {
    let mut spec = TemplateSpec::named(TEMPLATE);
    spec.expected_sections = vec!["Quarterly Results".to_string(), "Revenue".to_string()];
    spec.forbidden_text = vec!["lorem ipsum".to_string()];
    spec.min_count = Some(2);
    spec
}

fn write_deck(path: &Path, revenue_body: &str) {
    write_pptx(
        path,
        &[
            FixtureSlide::new("Quarterly Results", 0.5).with_body("Prepared for the board", 1.5),
            FixtureSlide::new("Revenue", 0.5).with_body(revenue_body, 1.5),
        ],
    )
    .unwrap();
}

fn config(dir: &Path) -> ConvergeConfig {
    let mut config = ConvergeConfig::default();
    config.state_file = dir.join("loop_state.json");
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.loop_settings.poll_interval_ms = 10;
    config.timeouts.email = 1;
    config
}

/// Mock collaborators, but with the real analyzer registry.
fn dependencies(mocks: &MockCollaborators, fixer: Arc<dyn FixGenerator>) -> LoopDependencies {
    let mut templates = TemplateLibrary::new();
    templates.insert(template());
    let mut deps = mocks.dependencies(TEMPLATE);
    deps.analyzers = Arc::new(AnalyzerRegistry::with_defaults(
        templates,
        &AnalysisPolicy::default(),
    ));
    deps.fixer = fixer;
    deps
}

fn task() -> LoopTask {
    LoopTask::new("deck-service", TEMPLATE, serde_json::json!({"quarter": "Q3"}))
}

/// Fix generator that rewrites the deck when `repairs` is set.
struct DeckFixer {
    deck: PathBuf,
    repairs: bool,
    calls: AtomicU32,
    categories: Mutex<Vec<String>>,
}

impl DeckFixer {
    fn new(deck: PathBuf, repairs: bool) -> Self {
        Self {
            deck,
            repairs,
            calls: AtomicU32::new(0),
            categories: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixGenerator for DeckFixer {
    async fn generate_fix(&self, request: &FixRequest) -> Result<FixOutcome> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.categories.lock().unwrap().extend(
            request
                .discrepancies
                .iter()
                .map(|d| d.category().to_string()),
        );
        if self.repairs {
            write_deck(&self.deck, "Revenue grew 12% year over year");
        }
        Ok(FixOutcome {
            success: true,
            pr_number: Some(200 + u64::from(n)),
            summary: "Replace placeholder copy".to_string(),
        })
    }
}

#[tokio::test]
async fn test_fix_repairs_generated_deck() {
    let temp_dir = TempDir::new().unwrap();
    let deck = temp_dir.path().join("deck.pptx");
    write_deck(&deck, "Lorem ipsum dolor sit amet");

    let mocks = MockCollaborators::new(&deck);
    let fixer = Arc::new(DeckFixer::new(deck.clone(), true));
    let manager =
        FeedbackLoopManager::new(config(temp_dir.path()), dependencies(&mocks, fixer.clone()))
            .unwrap();

    let outcome = manager.run(&task()).await.unwrap();

    assert_outcome(&outcome, LoopStatus::Completed);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.prs_merged, 1);
    assert_eq!(fixer.call_count(), 1);
    assert_eq!(mocks.pull_requests.merge_count(), 1);
    assert!(fixer
        .categories
        .lock()
        .unwrap()
        .iter()
        .any(|c| c == "forbidden_text"));
    assert!(!manager.persistence().exists());
}

#[tokio::test]
async fn test_unchanged_deck_is_detected_as_stuck() {
    let temp_dir = TempDir::new().unwrap();
    let deck = temp_dir.path().join("deck.pptx");
    write_deck(&deck, "Lorem ipsum dolor sit amet");

    let mocks = MockCollaborators::new(&deck);
    let fixer = Arc::new(DeckFixer::new(deck.clone(), false));
    let mut config = config(temp_dir.path());
    config.loop_settings.max_iterations = 4;
    let manager = FeedbackLoopManager::new(config, dependencies(&mocks, fixer.clone())).unwrap();

    let outcome = manager.run(&task()).await.unwrap();

    assert_outcome(&outcome, LoopStatus::Failed);
    assert_eq!(outcome.category, Some(FailureCategory::Quality));
    assert_eq!(outcome.iterations, 4);
    assert_eq!(mocks.researcher.call_count(), 1);
    assert_eq!(mocks.operator.escalation_count(), 1);
    assert_eq!(mocks.operator.escalations()[0].occurrences, 3);
    assert_eq!(fixer.call_count(), 3);

    let state = manager.persistence().load().unwrap().unwrap();
    assert_eq!(state.issues.tracker().len(), 1, "one recurring issue set");
}
