//! The three view indexes plus the shared snippet metadata
//!
//! All three indexes and the metadata array share ordering and cardinality:
//! row `i` of every index is snippet `i`. The store refuses to come up when
//! they disagree.

use super::builder::{BuildOptions, IndexBuilder};
use super::persistence::{PersistedMetadata, METADATA_FILE};
use super::vector_index::VectorIndex;
use super::View;
use crate::corpus::{corpus_fingerprint, Difficulty, Snippet};
use crate::encoder::TextEncoder;
use crate::error::{Result, RetrievalError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct IndexStore {
    views: BTreeMap<View, VectorIndex>,
    metadata: Vec<Snippet>,
    embedding_dim: usize,
    model_id: String,
    cache_dir: PathBuf,
}

/// Summary of a loaded store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub num_snippets: usize,
    pub embedding_dim: usize,
    pub model_id: String,
    pub cache_dir: String,
    pub by_difficulty: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

impl IndexStore {
    /// Build or load every view for `corpus` and persist the metadata artifact.
    ///
    /// An existing `metadata.json` is reused rather than rewritten; with
    /// fingerprint verification on, it is only reused when it matches `corpus`.
    /// The reused snippets are then the source of every view's texts.
    pub fn build_or_load(
        corpus: Vec<Snippet>,
        encoder: &dyn TextEncoder,
        cache_dir: &Path,
        options: BuildOptions,
    ) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let metadata = Self::resolve_metadata(corpus, cache_dir, &options)?;

        let builder = IndexBuilder::new(encoder, options);
        let mut views = BTreeMap::new();
        for view in View::ALL {
            let texts: Vec<String> = metadata.iter().map(|s| s.view_text(view)).collect();
            let built = builder.build_or_load(view, &texts, cache_dir)?;
            views.insert(view, built.index);
        }

        let store = Self {
            views,
            metadata,
            embedding_dim: encoder.embedding_dim(),
            model_id: encoder.model_id().to_string(),
            cache_dir: cache_dir.to_path_buf(),
        };
        store.validate()?;

        info!(
            snippets = store.len(),
            embedding_dim = store.embedding_dim,
            cache_dir = %cache_dir.display(),
            "Index store ready"
        );
        Ok(store)
    }

    /// Load a complete cache directory without a corpus file
    pub fn open(cache_dir: &Path) -> Result<Self> {
        let metadata_path = cache_dir.join(METADATA_FILE);
        let metadata = PersistedMetadata::load(&metadata_path)
            .map_err(|e| RetrievalError::CacheCorruption(format!("{:#}", e)))?
            .snippets;

        let mut views = BTreeMap::new();
        let mut model_id = String::new();
        let mut embedding_dim = None;
        for view in View::ALL {
            let cached = IndexBuilder::load_view(view, cache_dir)?;
            embedding_dim.get_or_insert(cached.built.index.embedding_dim());
            if model_id.is_empty() {
                model_id = cached.model_id;
            } else if model_id != cached.model_id {
                return Err(RetrievalError::CacheCorruption(format!(
                    "{} view was built with '{}' but other views with '{}'",
                    view, cached.model_id, model_id
                )));
            }
            views.insert(view, cached.built.index);
        }

        let store = Self {
            views,
            metadata,
            embedding_dim: embedding_dim.unwrap_or(0),
            model_id,
            cache_dir: cache_dir.to_path_buf(),
        };
        store.validate()?;

        info!(
            snippets = store.len(),
            model = %store.model_id,
            cache_dir = %cache_dir.display(),
            "Opened index store from cache"
        );
        Ok(store)
    }

    fn resolve_metadata(
        corpus: Vec<Snippet>,
        cache_dir: &Path,
        options: &BuildOptions,
    ) -> Result<Vec<Snippet>> {
        let path = cache_dir.join(METADATA_FILE);
        let fingerprint = corpus_fingerprint(&corpus)?;

        if path.exists() && !options.force_rebuild {
            let cached = PersistedMetadata::load(&path)
                .map_err(|e| RetrievalError::CacheCorruption(format!("{:#}", e)))?;

            if !options.verify_fingerprint || cached.fingerprint == fingerprint {
                info!(path = %path.display(), snippets = cached.snippets.len(), "Using cached metadata");
                return Ok(cached.snippets);
            }
            warn!(path = %path.display(), "Cached metadata does not match the corpus, rewriting");
        }

        PersistedMetadata::new(fingerprint, corpus.clone())
            .save(&path)
            .map_err(|e| RetrievalError::Persistence(format!("{:#}", e)))?;
        info!(path = %path.display(), snippets = corpus.len(), "Saved metadata");
        Ok(corpus)
    }

    /// Every view present, every index as long as the metadata, one dimension
    pub fn validate(&self) -> Result<()> {
        for view in View::ALL {
            let index = self.views.get(&view).ok_or_else(|| {
                RetrievalError::CacheCorruption(format!("{} index is missing", view))
            })?;

            if index.len() != self.metadata.len() {
                return Err(RetrievalError::CacheCorruption(format!(
                    "{} index has {} vectors but metadata has {} snippets",
                    view,
                    index.len(),
                    self.metadata.len()
                )));
            }
            if index.embedding_dim() != self.embedding_dim {
                return Err(RetrievalError::CacheCorruption(format!(
                    "{} index has dimension {} but the store expects {}",
                    view,
                    index.embedding_dim(),
                    self.embedding_dim
                )));
            }
        }
        Ok(())
    }

    /// Index for a search mode
    pub fn get_index(&self, mode: View) -> Result<&VectorIndex> {
        self.views
            .get(&mode)
            .ok_or_else(|| RetrievalError::InvalidMode(format!("no index for mode '{}'", mode)))
    }

    pub fn snippet(&self, id: usize) -> Option<&Snippet> {
        self.metadata.get(id)
    }

    pub fn metadata(&self) -> &[Snippet] {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Model the stored vectors were built with
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn stats(&self) -> StoreStats {
        let mut by_difficulty: BTreeMap<String, usize> = Difficulty::ALL
            .iter()
            .map(|d| (d.to_string(), 0))
            .collect();
        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
        for snippet in &self.metadata {
            *by_difficulty.entry(snippet.difficulty.to_string()).or_default() += 1;
            if !snippet.category.is_empty() {
                *by_category.entry(snippet.category.clone()).or_default() += 1;
            }
        }

        StoreStats {
            num_snippets: self.metadata.len(),
            embedding_dim: self.embedding_dim,
            model_id: self.model_id.clone(),
            cache_dir: self.cache_dir.display().to_string(),
            by_difficulty,
            by_category,
        }
    }
}
