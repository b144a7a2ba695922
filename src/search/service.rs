//! Query-time retrieval
//!
//! Encodes the query, ranks one view's index by inner product, joins each
//! hit to its snippet, and only then applies the difficulty filter. Because
//! filtering happens after top-k selection a filtered search can return fewer
//! than `top_k` results, or none.

use crate::config::Config;
use crate::corpus::{load_corpus, DifficultyFilter, Snippet};
use crate::encoder::{self, normalize, TextEncoder};
use crate::error::{Result, RetrievalError};
use crate::index::{BuildOptions, IndexStore, View};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// A ranked snippet, serialized flat as `{id, <snippet fields>, score}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: usize,
    #[serde(flatten)]
    pub snippet: Snippet,
    pub score: f32,
}

/// Read-only after construction; share it behind an `Arc`.
pub struct SearchService {
    encoder: Box<dyn TextEncoder>,
    store: IndexStore,
}

impl SearchService {
    pub fn new(encoder: Box<dyn TextEncoder>, store: IndexStore) -> Result<Self> {
        if encoder.embedding_dim() != store.embedding_dim() {
            return Err(RetrievalError::CacheCorruption(format!(
                "encoder '{}' produces {} dimensions but the index store holds {}",
                encoder.model_id(),
                encoder.embedding_dim(),
                store.embedding_dim()
            )));
        }
        if encoder.model_id() != store.model_id() {
            tracing::warn!(
                encoder = encoder.model_id(),
                store = store.model_id(),
                "Index store was built with a different model"
            );
        }
        Ok(Self { encoder, store })
    }

    /// Construct the configured encoder, then build or load the store from
    /// the configured corpus. Without a corpus path the cache directory is
    /// opened as is.
    pub fn from_config(config: &Config, options: BuildOptions) -> anyhow::Result<Self> {
        let encoder = encoder::from_config(&config.encoder).context("Failed to create encoder")?;
        let cache_dir = Path::new(&config.index.cache_dir);

        let store = match &config.corpus.path {
            Some(corpus_path) => {
                let corpus = load_corpus(Path::new(corpus_path))
                    .with_context(|| format!("Failed to load corpus: {}", corpus_path))?;
                IndexStore::build_or_load(corpus, encoder.as_ref(), cache_dir, options)
                    .with_context(|| {
                        format!("Failed to build indexes in {}", cache_dir.display())
                    })?
            }
            None => IndexStore::open(cache_dir).with_context(|| {
                format!(
                    "No corpus configured and no usable cache in {}",
                    cache_dir.display()
                )
            })?,
        };

        Ok(Self::new(encoder, store)?)
    }

    pub fn search(
        &self,
        query: &str,
        mode: View,
        top_k: usize,
        difficulty: DifficultyFilter,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "query must not be empty".to_string(),
            ));
        }
        let index = self.store.get_index(mode)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let mut query_vector = self.encoder.encode(query)?;
        normalize(&mut query_vector);

        let hits = index.search(&query_vector, top_k)?;
        let ranked = hits.len();

        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|(id, score)| {
                self.store.snippet(id).map(|snippet| SearchResult {
                    id,
                    snippet: snippet.clone(),
                    score,
                })
            })
            .filter(|result| difficulty.matches(result.snippet.difficulty))
            .collect();

        debug!(ranked, kept = results.len(), "Applied difficulty filter");
        info!(
            mode = %mode,
            top_k,
            difficulty = %difficulty,
            results = results.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Search completed"
        );
        Ok(results)
    }

    /// Like [`search`](Self::search) with `mode` and `difficulty` given as strings
    pub fn search_str(
        &self,
        query: &str,
        mode: &str,
        top_k: usize,
        difficulty: &str,
    ) -> Result<Vec<SearchResult>> {
        let mode: View = mode.parse()?;
        let difficulty: DifficultyFilter = difficulty.parse()?;
        self.search(query, mode, top_k, difficulty)
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn encoder(&self) -> &dyn TextEncoder {
        self.encoder.as_ref()
    }
}
