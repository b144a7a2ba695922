//! Criterion benchmarks for index building and search
//!
//! Run with: cargo bench
//! View HTML report: target/criterion/report/index.html
//!
//! Uses a synthetic corpus and the hashing encoder so numbers reflect
//! index work rather than model inference.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use snippet_search::corpus::{Difficulty, DifficultyFilter, Snippet};
use snippet_search::encoder::HashingEncoder;
use snippet_search::index::{BuildOptions, IndexStore, View};
use snippet_search::search::SearchService;
use std::sync::OnceLock;
use std::time::Duration;
use tempfile::TempDir;

const DEFAULT_NUM_SNIPPETS: usize = 2_000;
const DIM: usize = 384;

const VERBS: [&str; 6] = ["plot", "group", "filter", "merge", "sort", "describe"];
const NOUNS: [&str; 6] = ["sales", "prices", "customers", "orders", "revenue", "ratings"];

/// Cached service for benchmarks that don't need varying corpus sizes
static CACHED_SERVICE: OnceLock<(SearchService, TempDir)> = OnceLock::new();

fn get_or_create_service() -> &'static (SearchService, TempDir) {
    CACHED_SERVICE.get_or_init(|| {
        let dir = TempDir::new().expect("temp dir");
        let service = build_service(generate_corpus(DEFAULT_NUM_SNIPPETS), &dir);
        (service, dir)
    })
}

fn generate_corpus(n: usize) -> Vec<Snippet> {
    (0..n)
        .map(|i| {
            let verb = VERBS[i % VERBS.len()];
            let noun = NOUNS[(i / VERBS.len()) % NOUNS.len()];
            Snippet {
                question: format!("How do I {} the {} table, variant {}?", verb, noun, i),
                code: format!("df_{}.{}(by='{}_{}')", i, verb, noun, i % 17),
                tags: vec![verb.to_string(), noun.to_string()],
                category: noun.to_string(),
                difficulty: Difficulty::ALL[i % 3],
                extra: Default::default(),
            }
        })
        .collect()
}

fn build_service(corpus: Vec<Snippet>, dir: &TempDir) -> SearchService {
    let encoder = HashingEncoder::new(DIM).expect("encoder");
    let store = IndexStore::build_or_load(corpus, &encoder, dir.path(), BuildOptions::default())
        .expect("build store");
    SearchService::new(Box::new(encoder), store).expect("service")
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(10);

    for n in [250, 1_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("fresh", n), &n, |b, &n| {
            b.iter_with_setup(
                || (generate_corpus(n), TempDir::new().expect("temp dir")),
                |(corpus, dir)| black_box(build_service(corpus, &dir)),
            );
        });
    }

    let dir = TempDir::new().expect("temp dir");
    build_service(generate_corpus(1_000), &dir);
    group.bench_function("cached_1000", |b| {
        b.iter(|| black_box(build_service(generate_corpus(1_000), &dir)));
    });

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(50);
    let (service, _) = get_or_create_service();

    for view in View::ALL {
        group.bench_with_input(BenchmarkId::new("top3", view), &view, |b, &view| {
            b.iter(|| {
                service
                    .search(black_box("group the sales table"), view, 3, DifficultyFilter::All)
                    .expect("search")
            });
        });
    }

    for top_k in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("code_top_k", top_k), &top_k, |b, &k| {
            b.iter(|| {
                service
                    .search(black_box("merge orders"), View::Code, k, DifficultyFilter::All)
                    .expect("search")
            });
        });
    }

    group.bench_function("filtered_hard", |b| {
        b.iter(|| {
            service
                .search(
                    black_box("plot revenue"),
                    View::Question,
                    10,
                    DifficultyFilter::Only(Difficulty::Hard),
                )
                .expect("search")
        });
    });

    group.finish();
}

fn bench_corpus_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_corpus_size");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(30);

    // Crosses the parallel scoring threshold
    for n in [1_000, 8_000] {
        let dir = TempDir::new().expect("temp dir");
        let service = build_service(generate_corpus(n), &dir);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                service
                    .search(black_box("sort customers"), View::Tags, 5, DifficultyFilter::All)
                    .expect("search")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_search, bench_corpus_size);
criterion_main!(benches);
