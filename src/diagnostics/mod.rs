//! Diagnostics and self-test module for snippet_search
//!
//! Provides health checks, retrieval self-tests, and index information for
//! the `/api/diagnostics` endpoint.

use crate::config::Config;
use crate::corpus::{Difficulty, DifficultyFilter};
use crate::encoder::dot;
use crate::index::{IndexBuilder, View};
use crate::search::SearchService;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Server start time (set once at startup)
static SERVER_START_TIME: AtomicU64 = AtomicU64::new(0);

/// Scores are inner products of unit vectors; allow for rounding
const SCORE_TOLERANCE: f32 = 1e-4;

/// Initialize server start time. Call this once at server startup.
pub fn init_server_start_time() {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    SERVER_START_TIME.store(now, Ordering::SeqCst);
}

/// Get server uptime in seconds
pub fn get_uptime_secs() -> u64 {
    let start = SERVER_START_TIME.load(Ordering::SeqCst);
    if start == 0 {
        return 0;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    now.saturating_sub(start)
}

/// Format uptime as human-readable string
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Format bytes for human readability (e.g., 1048576 -> "1.00 MB")
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Get current timestamp as ISO 8601 string
pub fn get_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let datetime = chrono::DateTime::from_timestamp(secs as i64, 0)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);
    datetime.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some non-critical issues detected
    Degraded,
    /// Critical issues, service may be unusable
    Unhealthy,
}

impl HealthStatus {
    /// Healthy with no failures, unhealthy when more than half failed
    pub fn from_summary(summary: &TestSummary) -> Self {
        if summary.failed == 0 {
            HealthStatus::Healthy
        } else if summary.failed <= summary.total / 2 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Result of a single self-test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: f64,
    pub message: String,
    /// Optional details (e.g., which snippet failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl TestResult {
    pub fn passed(name: impl Into<String>, duration: Duration, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            duration_ms: duration.as_secs_f64() * 1000.0,
            message: message.into(),
            details: None,
        }
    }

    pub fn failed(name: impl Into<String>, duration: Duration, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            duration_ms: duration.as_secs_f64() * 1000.0,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Summary of test results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub total_duration_ms: f64,
}

impl TestSummary {
    pub fn from_results(results: &[TestResult]) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        let total_duration_ms: f64 = results.iter().map(|r| r.duration_ms).sum();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            total_duration_ms,
        }
    }
}

/// Common diagnostics query parameters
#[derive(Debug, Deserialize)]
pub struct DiagnosticsQuery {
    /// Number of random snippets to sample for self-tests (default: 5)
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
}

fn default_sample_count() -> usize {
    5
}

/// Configuration summary for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_path: Option<String>,
    pub cache_dir: String,
    pub encoder_backend: String,
    pub verify_fingerprint: bool,
    pub max_top_k: usize,
    pub default_mode: String,
    pub explain_configured: bool,
    pub run_configured: bool,
}

impl From<&Config> for ConfigSummary {
    fn from(config: &Config) -> Self {
        Self {
            corpus_path: config.corpus.path.clone(),
            cache_dir: config.index.cache_dir.clone(),
            encoder_backend: format!("{:?}", config.encoder.backend).to_lowercase(),
            verify_fingerprint: config.index.verify_fingerprint,
            max_top_k: config.server.max_top_k,
            default_mode: config.index.default_mode.to_string(),
            explain_configured: config.upstream.explain_url.is_some(),
            run_configured: config.upstream.run_url.is_some(),
        }
    }
}

/// Index store diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDiagnostics {
    pub num_snippets: usize,
    pub embedding_dim: usize,
    pub model_id: String,
    pub by_difficulty: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    /// Bytes of `*.index`, `*.npy` and `metadata.json` on disk
    pub cache_size_bytes: u64,
    pub cache_size_human: String,
    /// Random questions from the corpus (for verification)
    pub sample_questions: Vec<String>,
}

/// Diagnostics response for the snippet search server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetDiagnosticsResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub uptime_human: String,
    pub generated_at: String,
    pub config: ConfigSummary,
    pub index: IndexDiagnostics,
    pub self_tests: Vec<TestResult>,
    pub test_summary: TestSummary,
}

/// Gather index information and run every self-test. Blocking.
pub fn collect(
    service: &SearchService,
    config: &Config,
    sample_count: usize,
) -> SnippetDiagnosticsResponse {
    let store = service.store();
    let stats = store.stats();
    let sample_count = sample_count.clamp(1, 20);

    let mut rng = rand::rng();
    let sample_questions: Vec<String> = store
        .metadata()
        .iter()
        .filter(|s| !s.question.is_empty())
        .map(|s| s.question.clone())
        .choose_multiple(&mut rng, sample_count);

    let cache_size_bytes = cache_size_on_disk(store.cache_dir());

    let self_tests = run_self_tests(service, sample_count);
    let test_summary = TestSummary::from_results(&self_tests);
    let uptime = get_uptime_secs();

    SnippetDiagnosticsResponse {
        status: HealthStatus::from_summary(&test_summary),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
        uptime_human: format_uptime(uptime),
        generated_at: get_timestamp(),
        config: ConfigSummary::from(config),
        index: IndexDiagnostics {
            num_snippets: stats.num_snippets,
            embedding_dim: stats.embedding_dim,
            model_id: stats.model_id,
            by_difficulty: stats.by_difficulty,
            by_category: stats.by_category,
            cache_size_bytes,
            cache_size_human: format_bytes(cache_size_bytes),
            sample_questions,
        },
        self_tests,
        test_summary,
    }
}

fn cache_size_on_disk(cache_dir: &std::path::Path) -> u64 {
    let mut paths: Vec<std::path::PathBuf> = View::ALL
        .iter()
        .flat_map(|view| {
            let (index, npy) = IndexBuilder::artifact_paths(*view, cache_dir);
            [index, npy]
        })
        .collect();
    paths.push(cache_dir.join(crate::index::persistence::METADATA_FILE));

    paths
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

/// Run the retrieval self-tests against a live service
pub fn run_self_tests(service: &SearchService, sample_count: usize) -> Vec<TestResult> {
    vec![
        test_embedding_generation(service),
        test_index_integrity(service),
        test_self_similarity(service, sample_count),
        test_score_range(service),
        test_difficulty_filter(service),
    ]
}

fn test_embedding_generation(service: &SearchService) -> TestResult {
    let start = Instant::now();
    let encoder = service.encoder();
    match encoder.encode("plot a bar chart of value counts") {
        Ok(v) if v.len() != encoder.embedding_dim() => TestResult::failed(
            "embedding_generation",
            start.elapsed(),
            format!(
                "Encoder returned {} dimensions, expected {}",
                v.len(),
                encoder.embedding_dim()
            ),
        ),
        Ok(v) if v.iter().any(|x| !x.is_finite()) => TestResult::failed(
            "embedding_generation",
            start.elapsed(),
            "Encoder returned non-finite values",
        ),
        Ok(_) => TestResult::passed(
            "embedding_generation",
            start.elapsed(),
            format!("Generated a {}-dimension query embedding", encoder.embedding_dim()),
        )
        .with_details(encoder.model_id().to_string()),
        Err(e) => TestResult::failed(
            "embedding_generation",
            start.elapsed(),
            format!("Failed to generate embedding: {}", e),
        ),
    }
}

fn test_index_integrity(service: &SearchService) -> TestResult {
    let start = Instant::now();
    let store = service.store();
    match store.validate() {
        Ok(()) => TestResult::passed(
            "index_integrity",
            start.elapsed(),
            format!(
                "3 views x {} vectors agree with the metadata",
                store.len()
            ),
        ),
        Err(e) => TestResult::failed("index_integrity", start.elapsed(), e.to_string()),
    }
}

/// Searching the code view with a snippet's own code should rank it first,
/// or rank an exact duplicate first.
fn test_self_similarity(service: &SearchService, sample_count: usize) -> TestResult {
    let start = Instant::now();
    let store = service.store();
    if store.is_empty() {
        return TestResult::passed("self_similarity", start.elapsed(), "No snippets to test");
    }

    let index = match store.get_index(View::Code) {
        Ok(index) => index,
        Err(e) => return TestResult::failed("self_similarity", start.elapsed(), e.to_string()),
    };

    let mut rng = rand::rng();
    let ids: Vec<usize> = store
        .metadata()
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.code.trim().is_empty())
        .map(|(id, _)| id)
        .choose_multiple(&mut rng, sample_count);

    let mut misses = Vec::new();
    for &id in &ids {
        let Some(snippet) = store.snippet(id) else {
            continue;
        };
        let results = match service.search(&snippet.code, View::Code, 1, DifficultyFilter::All) {
            Ok(results) => results,
            Err(e) => {
                return TestResult::failed(
                    "self_similarity",
                    start.elapsed(),
                    format!("Search failed for snippet {}: {}", id, e),
                )
            }
        };
        let Some(top) = results.first() else {
            misses.push(id);
            continue;
        };
        if top.id == id {
            continue;
        }
        let own_score = match (index.vector(id), index.vector(top.id)) {
            (Some(own), Some(other)) => dot(own, other),
            _ => f32::NEG_INFINITY,
        };
        if (own_score - 1.0).abs() > SCORE_TOLERANCE {
            misses.push(id);
        }
    }

    if misses.is_empty() {
        TestResult::passed(
            "self_similarity",
            start.elapsed(),
            format!("{} sampled snippets ranked themselves first", ids.len()),
        )
    } else {
        TestResult::failed(
            "self_similarity",
            start.elapsed(),
            format!("{} of {} sampled snippets were outranked", misses.len(), ids.len()),
        )
        .with_details(format!("ids: {:?}", misses))
    }
}

fn test_score_range(service: &SearchService) -> TestResult {
    let start = Instant::now();
    let mut checked = 0;
    for view in View::ALL {
        let results =
            match service.search("group rows and plot the mean", view, 10, DifficultyFilter::All) {
                Ok(results) => results,
                Err(e) => {
                    return TestResult::failed(
                        "score_range",
                        start.elapsed(),
                        format!("Search on {} view failed: {}", view, e),
                    )
                }
            };

        let out_of_range: Vec<f32> = results
            .iter()
            .map(|r| r.score)
            .filter(|s| !s.is_finite() || s.abs() > 1.0 + SCORE_TOLERANCE)
            .collect();
        if !out_of_range.is_empty() {
            return TestResult::failed(
                "score_range",
                start.elapsed(),
                format!("{} view returned scores outside [-1, 1]", view),
            )
            .with_details(format!("{:?}", out_of_range));
        }
        if results.windows(2).any(|w| w[0].score < w[1].score) {
            return TestResult::failed(
                "score_range",
                start.elapsed(),
                format!("{} view results are not in descending score order", view),
            );
        }
        checked += results.len();
    }

    TestResult::passed(
        "score_range",
        start.elapsed(),
        format!("All {} result scores in [-1, 1] and descending", checked),
    )
}

fn test_difficulty_filter(service: &SearchService) -> TestResult {
    let start = Instant::now();
    for difficulty in Difficulty::ALL {
        let results = match service.search(
            "read a csv file",
            View::Question,
            10,
            DifficultyFilter::Only(difficulty),
        ) {
            Ok(results) => results,
            Err(e) => {
                return TestResult::failed(
                    "difficulty_filter",
                    start.elapsed(),
                    format!("Filtered search failed: {}", e),
                )
            }
        };
        if let Some(bad) = results.iter().find(|r| r.snippet.difficulty != difficulty) {
            return TestResult::failed(
                "difficulty_filter",
                start.elapsed(),
                format!(
                    "Filter '{}' let through snippet {} ({})",
                    difficulty, bad.id, bad.snippet.difficulty
                ),
            );
        }
    }
    TestResult::passed(
        "difficulty_filter",
        start.elapsed(),
        "Every filtered result matched its difficulty",
    )
}
