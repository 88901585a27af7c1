//! Benchmark suite for converge subsystems.
//!
//! This module provides performance benchmarks for:
//! - Issue fingerprinting and recurrence tracking
//! - Loop state persistence (save/load of the versioned state file)
//! - Document analysis (PPTX and XLSX against a template)
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Save baseline for comparison
//! cargo bench -- --save-baseline main
//!
//! # Compare against baseline
//! cargo bench -- --baseline main
//! ```
//!
//! Criterion writes estimates and HTML reports to `target/criterion/`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

use converge::testing::{write_pptx, write_xlsx, FixtureSlide};
use converge::{
    AnalysisPolicy, AnalyzerRegistry, IssuePatternDetector, IterationRecord, LoopState,
    LoopStatePersistence, TemplateLibrary, TemplateSpec,
};

// ============================================================================
// Stagnation Benchmarks
// ============================================================================

fn issue_descriptions(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("[high] missing_section at slide {i}: expected Section {i}, got none"))
        .collect()
}

/// Benchmark fingerprinting of issue sets of various sizes.
fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for size in [5, 50, 500] {
        let issues = issue_descriptions(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("issues", size), &issues, |b, issues| {
            b.iter(|| black_box(IssuePatternDetector::fingerprint(black_box(issues))));
        });
    }

    group.finish();
}

/// Benchmark recording iterations into a full history.
fn bench_record_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_iteration");

    for capacity in [10, 50, 200] {
        let issues = issue_descriptions(10);
        let fingerprint = IssuePatternDetector::fingerprint(&issues);
        group.bench_with_input(
            BenchmarkId::new("capacity", capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let mut detector = IssuePatternDetector::new(capacity);
                    for iteration in 1..=(capacity as u32 * 2) {
                        detector.record_iteration(IterationRecord::new(
                            iteration,
                            fingerprint.clone(),
                            issues.clone(),
                        ));
                    }
                    black_box(detector.occurrences(&fingerprint))
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Persistence Benchmarks
// ============================================================================

fn state_with_history(iterations: u32) -> LoopState {
    let mut state = LoopState::new("invoice-service", "task-1", iterations as usize);
    for iteration in 1..=iterations {
        let issues = issue_descriptions(8);
        let fingerprint = IssuePatternDetector::fingerprint(&issues);
        state
            .issues
            .record_iteration(IterationRecord::new(iteration, fingerprint, issues));
    }
    state
}

/// Benchmark atomic save followed by load of loop state.
fn bench_state_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_persistence");

    for iterations in [1, 20, 100] {
        let temp_dir = TempDir::new().unwrap();
        let persistence = LoopStatePersistence::new(temp_dir.path().join("loop_state.json"))
            .with_history_capacity(iterations as usize);
        let state = state_with_history(iterations);

        group.bench_with_input(
            BenchmarkId::new("save_load", iterations),
            &state,
            |b, state| {
                b.iter(|| {
                    let mut state = state.clone();
                    persistence.save(&mut state).unwrap();
                    black_box(persistence.load().unwrap())
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Analysis Benchmarks
// ============================================================================

fn registry() -> AnalyzerRegistry {
    let mut deck = TemplateSpec::named("deck");
    deck.expected_sections = vec!["Section 0".to_string(), "Section 1".to_string()];
    deck.forbidden_text = vec!["lorem ipsum".to_string()];

    let mut sheet = TemplateSpec::named("sheet");
    sheet.expected_columns = vec!["Region".to_string(), "Revenue".to_string()];
    sheet.min_rows = Some(1);

    let mut templates = TemplateLibrary::new();
    templates.insert(deck);
    templates.insert(sheet);
    AnalyzerRegistry::with_defaults(templates, &AnalysisPolicy::default())
}

/// Benchmark PPTX analysis for decks of various sizes.
fn bench_pptx_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("pptx_analysis");
    let registry = registry();

    for slides in [2, 20, 100] {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("deck.pptx");
        let titles: Vec<String> = (0..slides).map(|i| format!("Section {i}")).collect();
        let fixture: Vec<FixtureSlide> = titles
            .iter()
            .map(|title| FixtureSlide::new(title, 0.5).with_body("Revenue grew 12%", 1.5))
            .collect();
        write_pptx(&path, &fixture).unwrap();

        group.throughput(Throughput::Elements(slides as u64));
        group.bench_with_input(BenchmarkId::new("slides", slides), &path, |b, path| {
            b.iter(|| black_box(registry.analyze_output(black_box(path), "deck").unwrap()));
        });
    }

    group.finish();
}

/// Benchmark XLSX analysis for sheets of various sizes.
fn bench_xlsx_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("xlsx_analysis");
    let registry = registry();

    for rows in [10, 100, 1000] {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("report.xlsx");
        let amounts: Vec<String> = (0..rows).map(|i| (i * 100).to_string()).collect();
        let mut data = vec![vec!["Region", "Revenue"]];
        data.extend(amounts.iter().map(|amount| vec!["EMEA", amount.as_str()]));
        write_xlsx(&path, &[("Summary", data)]).unwrap();

        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::new("rows", rows), &path, |b, path| {
            b.iter(|| black_box(registry.analyze_output(black_box(path), "sheet").unwrap()));
        });
    }

    group.finish();
}

criterion_group!(stagnation_benches, bench_fingerprint, bench_record_iteration);

criterion_group!(persistence_benches, bench_state_roundtrip);

criterion_group!(analysis_benches, bench_pptx_analysis, bench_xlsx_analysis);

criterion_main!(stagnation_benches, persistence_benches, analysis_benches);
