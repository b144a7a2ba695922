//! End-to-end retrieval properties over a built index store
//!
//! Every test builds a fresh cache directory with the hashing encoder, so
//! results are deterministic.

use anyhow::Result;
use snippet_search::corpus::{parse_corpus, Difficulty, DifficultyFilter, Snippet};
use snippet_search::encoder::{normalize, HashingEncoder, TextEncoder};
use snippet_search::index::{BuildOptions, IndexBuilder, IndexStore, View};
use snippet_search::search::SearchService;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const DIM: usize = 384;

const TWO_SNIPPETS: &str = r#"{"question": "plot a barplot", "code": "df.plot.bar()", "tags": [], "category": "viz", "difficulty": "easy"}
{"question": "compute mean", "code": "df.mean()", "tags": [], "category": "stats", "difficulty": "hard"}
"#;

const CORPUS: &str = r#"{"question": "How do I read a CSV file?", "code": "df = pd.read_csv('data.csv')", "tags": ["io", "csv"], "category": "io", "difficulty": "easy"}
{"question": "Count missing values per column", "code": "df.isna().sum()", "tags": ["missing", "clean"], "category": "cleaning", "difficulty": "easy"}
{"question": "Fill missing values with the median", "code": "df['age'] = df['age'].fillna(df['age'].median())", "tags": ["missing", "impute"], "category": "cleaning", "difficulty": "medium"}
{"question": "Average sales per region", "code": "df.groupby('region')['sales'].mean()", "tags": ["groupby", "aggregate"], "category": "aggregation", "difficulty": "medium"}
{"question": "Plot monthly revenue as a line chart", "code": "monthly = df.resample('M', on='date')['revenue'].sum()\nmonthly.plot()", "tags": ["plot", "time series"], "category": "viz", "difficulty": "hard"}
{"question": "", "code": "pivot = df.pivot_table(index='store', columns='month', values='sales', aggfunc='sum')", "tags": ["pivot"], "category": "aggregation", "difficulty": "hard"}
{"question": "Correlation heatmap", "code": "sns.heatmap(df.corr(numeric_only=True), annot=True)", "tags": ["plot", "correlation"], "category": "viz", "difficulty": "medium"}
{"question": "Drop duplicate rows", "code": "df = df.drop_duplicates()", "tags": ["clean"], "category": "cleaning", "difficulty": "easy"}
"#;

/// Counts how many texts reach the wrapped encoder
struct CountingEncoder {
    inner: HashingEncoder,
    encoded: Arc<AtomicUsize>,
}

impl TextEncoder for CountingEncoder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn embedding_dim(&self) -> usize {
        self.inner.embedding_dim()
    }

    fn encode_batch(&self, texts: &[&str]) -> snippet_search::Result<Vec<Vec<f32>>> {
        self.encoded.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.encode_batch(texts)
    }
}

fn corpus(text: &str) -> Vec<Snippet> {
    parse_corpus(text.as_bytes()).expect("corpus parses")
}

fn service(text: &str, dir: &TempDir) -> Result<SearchService> {
    let encoder = HashingEncoder::new(DIM)?;
    let store = IndexStore::build_or_load(corpus(text), &encoder, dir.path(), BuildOptions::default())?;
    Ok(SearchService::new(Box::new(encoder), store)?)
}

#[test]
fn test_code_view_self_similarity() -> Result<()> {
    let dir = TempDir::new()?;
    let service = service(CORPUS, &dir)?;

    for (id, snippet) in service.store().metadata().iter().enumerate() {
        let results = service.search(&snippet.code, View::Code, 3, DifficultyFilter::All)?;
        assert_eq!(results[0].id, id, "snippet {} did not rank itself first", id);
        assert!(
            (results[0].score - 1.0).abs() < 1e-4,
            "self score for {} was {}",
            id,
            results[0].score
        );
    }
    Ok(())
}

#[test]
fn test_filtered_results_match_difficulty() -> Result<()> {
    let dir = TempDir::new()?;
    let service = service(CORPUS, &dir)?;

    for view in View::ALL {
        for difficulty in Difficulty::ALL {
            for top_k in [1, 3, 8] {
                let results = service.search(
                    "missing values plot",
                    view,
                    top_k,
                    DifficultyFilter::Only(difficulty),
                )?;
                assert!(results.len() <= top_k);
                assert!(results.iter().all(|r| r.snippet.difficulty == difficulty));
            }
        }
    }
    Ok(())
}

#[test]
fn test_prefix_consistency() -> Result<()> {
    let dir = TempDir::new()?;
    let service = service(CORPUS, &dir)?;
    let n = service.store().len();

    for view in View::ALL {
        for query in ["sales per region", "plot", "zzz unmatched"] {
            let full = service.search(query, view, n, DifficultyFilter::All)?;
            for k in 1..n {
                let prefix = service.search(query, view, k, DifficultyFilter::All)?;
                let ids: Vec<usize> = prefix.iter().map(|r| r.id).collect();
                let expected: Vec<usize> = full[..k].iter().map(|r| r.id).collect();
                assert_eq!(ids, expected, "view {} query {:?} k {}", view, query, k);
            }
        }
    }
    Ok(())
}

#[test]
fn test_build_is_idempotent_once_cached() -> Result<()> {
    let dir = TempDir::new()?;
    let encoded = Arc::new(AtomicUsize::new(0));
    let encoder = CountingEncoder {
        inner: HashingEncoder::new(DIM)?,
        encoded: encoded.clone(),
    };
    let snippets = corpus(CORPUS);
    let texts: Vec<String> = snippets.iter().map(|s| s.code.clone()).collect();
    let builder = IndexBuilder::new(&encoder, BuildOptions::default());

    let first = builder.build_or_load(View::Code, &texts, dir.path())?;
    assert!(!first.cache_hit);
    assert_eq!(encoded.load(Ordering::SeqCst), texts.len());

    let (index_path, npy_path) = IndexBuilder::artifact_paths(View::Code, dir.path());
    let index_bytes = std::fs::read(&index_path)?;
    let npy_bytes = std::fs::read(&npy_path)?;

    let second = builder.build_or_load(View::Code, &texts, dir.path())?;
    assert!(second.cache_hit);
    assert_eq!(encoded.load(Ordering::SeqCst), texts.len(), "cache hit re-encoded");
    assert_eq!(std::fs::read(&index_path)?, index_bytes);
    assert_eq!(std::fs::read(&npy_path)?, npy_bytes);
    assert_eq!(first.index, second.index);
    Ok(())
}

#[test]
fn test_store_reload_does_not_encode() -> Result<()> {
    let dir = TempDir::new()?;
    let encoded = Arc::new(AtomicUsize::new(0));
    let encoder = CountingEncoder {
        inner: HashingEncoder::new(DIM)?,
        encoded: encoded.clone(),
    };

    IndexStore::build_or_load(corpus(CORPUS), &encoder, dir.path(), BuildOptions::default())?;
    let after_build = encoded.load(Ordering::SeqCst);
    assert_eq!(after_build, 3 * corpus(CORPUS).len());

    IndexStore::build_or_load(corpus(CORPUS), &encoder, dir.path(), BuildOptions::default())?;
    assert_eq!(encoded.load(Ordering::SeqCst), after_build);
    Ok(())
}

#[test]
fn test_batch_size_does_not_change_embeddings() -> Result<()> {
    let encoder = HashingEncoder::new(DIM)?;
    let texts: Vec<String> = corpus(CORPUS).iter().map(|s| s.question.clone()).collect();

    let small = TempDir::new()?;
    let large = TempDir::new()?;
    let by_one = IndexBuilder::new(
        &encoder,
        BuildOptions {
            batch_size: 1,
            ..BuildOptions::default()
        },
    )
    .build_or_load(View::Question, &texts, small.path())?;
    let by_many = IndexBuilder::new(&encoder, BuildOptions::default())
        .build_or_load(View::Question, &texts, large.path())?;

    assert_eq!(by_one.embeddings, by_many.embeddings);
    Ok(())
}

#[test]
fn test_normalize_gives_unit_norm() {
    let cases: [&[f32]; 4] = [&[3.0, 4.0], &[1e-6, -2e-6, 3e-6], &[-250.0, 0.5, 12.0, 7.0], &[1.0]];
    for case in cases {
        let mut v = case.to_vec();
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm of {:?} was {}", case, norm);
    }
}

#[test]
fn test_barplot_query_ranks_barplot_first() -> Result<()> {
    let dir = TempDir::new()?;
    let service = service(TWO_SNIPPETS, &dir)?;

    let results = service.search_str("barplot with pandas", "question", 2, "all")?;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].snippet.question, "plot a barplot");
    assert!(results[0].score > results[1].score);
    Ok(())
}

#[test]
fn test_hard_filter_keeps_only_mean_snippet() -> Result<()> {
    let dir = TempDir::new()?;
    let service = service(TWO_SNIPPETS, &dir)?;

    // top_k=1 ranks the barplot snippet first, so post-filtering leaves nothing
    let top_one = service.search_str("barplot with pandas", "question", 1, "hard")?;
    assert!(top_one.is_empty());

    let top_two = service.search_str("barplot with pandas", "question", 2, "hard")?;
    assert_eq!(top_two.len(), 1);
    assert_eq!(top_two[0].snippet.question, "compute mean");
    assert_eq!(top_two[0].snippet.difficulty, Difficulty::Hard);

    // a query the mean snippet wins returns it alone at top_k=1
    let direct = service.search_str("compute the mean", "question", 1, "hard")?;
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].snippet.code, "df.mean()");
    Ok(())
}
