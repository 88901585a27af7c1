//! Integration tests for the converge CLI

use std::fs;
use std::path::Path;

use assert_cmd::cargo;
use assert_cmd::Command;
use converge::testing::{write_pptx, FixtureSlide};
use converge::{LoopPhase, LoopState, LoopStatePersistence};
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the converge binary
fn converge() -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("converge"));
    cmd.env_remove("CONVERGE_CONFIG")
        .env_remove("CONVERGE_STATE_FILE")
        .env_remove("RUST_LOG");
    cmd
}

const DECK_TEMPLATE: &str = r#"{
    "name": "quarterly-deck",
    "description": "Quarterly results presentation",
    "expectedSections": ["Quarterly Results", "Revenue"],
    "forbiddenText": ["lorem ipsum"],
    "minCount": 2
}"#;

fn project_with_template() -> TempDir {
    let temp = TempDir::new().unwrap();
    let templates = temp.path().join(".converge/templates");
    fs::create_dir_all(&templates).unwrap();
    fs::write(templates.join("quarterly-deck.json"), DECK_TEMPLATE).unwrap();
    temp
}

fn write_deck(path: &Path, body: &str) {
    write_pptx(
        path,
        &[
            FixtureSlide::new("Quarterly Results", 0.5).with_body("Prepared for the board", 1.5),
            FixtureSlide::new("Revenue", 0.5).with_body(body, 1.5),
        ],
    )
    .unwrap();
}

#[test]
fn test_help() {
    converge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submit, analyze, fix, redeploy, retest"));
}

#[test]
fn test_version() {
    converge()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_templates_lists_loaded_templates() {
    let temp = project_with_template();

    converge()
        .arg("--project")
        .arg(temp.path())
        .arg("templates")
        .assert()
        .success()
        .stdout(predicate::str::contains("quarterly-deck - Quarterly results presentation"));
}

#[test]
fn test_templates_empty_directory() {
    let temp = TempDir::new().unwrap();

    converge()
        .arg("--project")
        .arg(temp.path())
        .arg("templates")
        .assert()
        .success()
        .stdout(predicate::str::contains("No templates"));
}

#[test]
fn test_analyze_passing_document() {
    let temp = project_with_template();
    write_deck(&temp.path().join("deck.pptx"), "Revenue grew 12%");

    converge()
        .arg("--project")
        .arg(temp.path())
        .args(["analyze", "deck.pptx", "--template", "quarterly-deck"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASSED"));
}

#[test]
fn test_analyze_failing_document_exits_one() {
    let temp = project_with_template();
    write_deck(&temp.path().join("deck.pptx"), "Lorem ipsum dolor sit amet");

    converge()
        .arg("--project")
        .arg(temp.path())
        .args(["analyze", "deck.pptx", "--template", "quarterly-deck"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED"))
        .stdout(predicate::str::contains("forbidden_text"));
}

#[test]
fn test_analyze_json_output() {
    let temp = project_with_template();
    write_deck(&temp.path().join("deck.pptx"), "Revenue grew 12%");

    let output = converge()
        .arg("--project")
        .arg(temp.path())
        .args(["analyze", "deck.pptx", "--template", "quarterly-deck", "--json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["passed"], true);
    assert!(result["total_checks"].as_u64().unwrap() > 0);
}

#[test]
fn test_analyze_unknown_template() {
    let temp = project_with_template();
    write_deck(&temp.path().join("deck.pptx"), "Revenue grew 12%");

    converge()
        .arg("--project")
        .arg(temp.path())
        .args(["analyze", "deck.pptx", "--template", "annual-report"])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("Unknown template: annual-report"));
}

#[test]
fn test_analyze_unsupported_extension() {
    let temp = project_with_template();
    fs::write(temp.path().join("notes.txt"), "hello").unwrap();

    converge()
        .arg("--project")
        .arg(temp.path())
        .args(["analyze", "notes.txt", "--template", "quarterly-deck"])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("No analyzer registered for extension 'txt'"));
}

#[test]
fn test_status_without_state() {
    let temp = TempDir::new().unwrap();

    converge()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No loop state"));
}

#[test]
fn test_status_and_clear_saved_state() {
    let temp = TempDir::new().unwrap();
    let persistence = LoopStatePersistence::new(temp.path().join(".converge/loop_state.json"));
    let mut state = LoopState::new("invoice-service", "task-7", 50);
    state.transition(LoopPhase::TestingFrontend);
    state.transition(LoopPhase::WaitingForPr);
    state.pending.pr_number = Some(42);
    persistence.save(&mut state).unwrap();

    converge()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("invoice-service"))
        .stdout(predicate::str::contains("WAITING_FOR_PR"))
        .stdout(predicate::str::contains("#42"));

    converge()
        .arg("--project")
        .arg(temp.path())
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared"));

    assert!(!persistence.exists());
}

#[test]
fn test_status_refuses_newer_schema() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(".converge");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("loop_state.json"), r#"{"schema_version": 99}"#).unwrap();

    converge()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("newer than supported"));
}

#[test]
fn test_run_requires_frontend_url() {
    let temp = project_with_template();

    converge()
        .arg("--project")
        .arg(temp.path())
        .args(["run", "invoice-service", "--template", "quarterly-deck"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("frontend.url"));
}

#[test]
fn test_run_rejects_invalid_payload() {
    let temp = project_with_template();

    converge()
        .arg("--project")
        .arg(temp.path())
        .args(["run", "invoice-service", "--template", "quarterly-deck", "--payload", "{not json"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("--payload"));
}

#[test]
fn test_invalid_settings_file() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(".converge");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("settings.json"), r#"{"retry": {"maxRetries": 0}}"#).unwrap();

    converge()
        .arg("--project")
        .arg(temp.path())
        .arg("status")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("retry.maxRetries"));
}
