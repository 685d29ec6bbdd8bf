//! Criterion benchmark for the Aider fuzzy-match hot path — the normalized
//! Levenshtein scoring loop `AiderStrategy::compute_changes` runs once per
//! candidate window, and the end-to-end strategy call over a realistic file.
//!
//! Run with:
//!   cargo bench --bench aider_match

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gasmcpd::local_mirror::LocalMirror;
use gasmcpd::strategy::aider::{AiderEdit, AiderStrategy};
use gasmcpd::strategy::{FileOperationStrategy, StrategyContext};
use strsim::normalized_levenshtein;

fn repeated_function_source(n: usize) -> String {
    let mut out = String::new();
    for i in 0..n {
        out.push_str(&format!(
            "function helper{i}(a, b) {{\n  return a + b + {i};\n}}\n\n"
        ));
    }
    out
}

fn bench_levenshtein_scoring(c: &mut Criterion) {
    let haystack = "function add(a, b) {\n  return a + b;\n}";
    let needle = "function add(a, b) {\n return a+b;\n}";

    c.bench_function("normalized_levenshtein_small_window", |b| {
        b.iter(|| {
            let score = normalized_levenshtein(black_box(haystack), black_box(needle));
            black_box(score);
        });
    });
}

fn bench_aider_compute_changes(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let source = repeated_function_source(200);

    c.bench_function("aider_compute_changes_200_functions", |b| {
        b.iter(|| {
            rt.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let mirror = LocalMirror::new(dir.path().to_path_buf());
                mirror.write("Big.js", source.as_bytes()).await.unwrap();
                let ctx = StrategyContext {
                    mirror: &mirror,
                    similarity_threshold: 0.8,
                };
                let strategy = AiderStrategy::new(
                    "Big.js",
                    vec![AiderEdit {
                        search: "function helper150(a, b) {\n return a+b+150;\n}".to_string(),
                        replace: "function helper150(a, b) {\n  return a + b + 999;\n}".to_string(),
                    }],
                );
                let changes = strategy.compute_changes(&ctx).await.unwrap();
                black_box(changes);
            });
        });
    });
}

criterion_group!(benches, bench_levenshtein_scoring, bench_aider_compute_changes);
criterion_main!(benches);
