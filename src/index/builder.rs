//! Build-or-load for a single view's index
//!
//! A cache hit needs both `<view>.index` and `<view>.npy` in the cache
//! directory. On a miss every text is encoded in corpus order, normalized,
//! inserted so that row == snippet id, and both artifacts are written.

use super::npy;
use super::persistence::{view_fingerprint, PersistedVectorIndex};
use super::vector_index::VectorIndex;
use super::View;
use crate::encoder::{encode_normalized, TextEncoder};
use crate::error::{Result, RetrievalError};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Tunables for building indexes
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Texts per encoder call; never affects results
    pub batch_size: usize,
    /// Rebuild when the cached fingerprint disagrees with the inputs
    pub verify_fingerprint: bool,
    /// Ignore any existing cache
    pub force_rebuild: bool,
    /// Draw a terminal progress bar while encoding
    pub show_progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            verify_fingerprint: true,
            force_rebuild: false,
            show_progress: false,
        }
    }
}

/// A view's index together with its raw embedding matrix
#[derive(Debug, Clone)]
pub struct BuiltIndex {
    pub index: VectorIndex,
    /// `len x dim` normalized embeddings, identical rows to `index`
    pub embeddings: Array2<f32>,
    /// Whether the artifacts came from disk
    pub cache_hit: bool,
}

/// Artifacts read back from disk along with their build provenance
#[derive(Debug, Clone)]
pub struct CachedView {
    pub fingerprint: String,
    pub model_id: String,
    pub built: BuiltIndex,
}

pub struct IndexBuilder<'a> {
    encoder: &'a dyn TextEncoder,
    options: BuildOptions,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(encoder: &'a dyn TextEncoder, options: BuildOptions) -> Self {
        Self { encoder, options }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Paths of the two artifacts for a view
    pub fn artifact_paths(view: View, cache_dir: &Path) -> (PathBuf, PathBuf) {
        let stem = view.file_stem();
        (
            cache_dir.join(format!("{}.index", stem)),
            cache_dir.join(format!("{}.npy", stem)),
        )
    }

    /// Load the view's cached index, or encode `texts` and persist a new one
    pub fn build_or_load(
        &self,
        view: View,
        texts: &[String],
        cache_dir: &Path,
    ) -> Result<BuiltIndex> {
        let (index_path, npy_path) = Self::artifact_paths(view, cache_dir);
        let fingerprint = view_fingerprint(self.encoder.model_id(), view, texts);

        if !self.options.force_rebuild && index_path.exists() && npy_path.exists() {
            if let Some(built) = self.load_cached(view, cache_dir, &fingerprint)? {
                return Ok(built);
            }
        }

        self.build(view, texts, &index_path, &npy_path, fingerprint)
    }

    /// Read a view's artifacts without checking them against any inputs.
    /// Row count and dimension of the index and embeddings must agree.
    pub fn load_view(view: View, cache_dir: &Path) -> Result<CachedView> {
        let (index_path, npy_path) = Self::artifact_paths(view, cache_dir);
        info!(view = %view, path = %index_path.display(), "Loading cached index");

        let persisted = PersistedVectorIndex::load(&index_path)
            .map_err(|e| RetrievalError::CacheCorruption(format!("{:#}", e)))?;
        let fingerprint = persisted.fingerprint.clone();
        let model_id = persisted.model_id.clone();
        let index = persisted.into_index()?;

        let embeddings = npy::read_npy(&npy_path)
            .map_err(|e| RetrievalError::CacheCorruption(format!("{:#}", e)))?;
        let (rows, cols) = embeddings.dim();
        if rows != index.len() || cols != index.embedding_dim() {
            return Err(RetrievalError::CacheCorruption(format!(
                "{} view: index holds {} x {} but embeddings are {} x {}",
                view,
                index.len(),
                index.embedding_dim(),
                rows,
                cols
            )));
        }

        Ok(CachedView {
            fingerprint,
            model_id,
            built: BuiltIndex {
                index,
                embeddings,
                cache_hit: true,
            },
        })
    }

    /// `Ok(None)` means the cache is stale and should be rebuilt
    fn load_cached(
        &self,
        view: View,
        cache_dir: &Path,
        fingerprint: &str,
    ) -> Result<Option<BuiltIndex>> {
        let cached = Self::load_view(view, cache_dir)?;

        if self.options.verify_fingerprint && cached.fingerprint != fingerprint {
            warn!(
                view = %view,
                cached_model = %cached.model_id,
                "Cached index does not match the current corpus or model, rebuilding"
            );
            return Ok(None);
        }

        debug!(view = %view, vectors = cached.built.index.len(), "Cache hit");
        Ok(Some(cached.built))
    }

    fn build(
        &self,
        view: View,
        texts: &[String],
        index_path: &Path,
        npy_path: &Path,
        fingerprint: String,
    ) -> Result<BuiltIndex> {
        let start = Instant::now();
        let dim = self.encoder.embedding_dim();
        info!(view = %view, items = texts.len(), "Generating embeddings");

        let progress = if self.options.show_progress {
            let pb = ProgressBar::new(texts.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb.set_message(format!("Encoding {} view", view));
            pb
        } else {
            ProgressBar::hidden()
        };

        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = encode_normalized(self.encoder, &refs, self.options.batch_size, |n| {
            progress.inc(n as u64)
        })?;
        progress.finish_and_clear();

        let mut index = VectorIndex::new(dim);
        for vector in &vectors {
            index.add(vector)?;
        }
        let embeddings = Array2::from_shape_vec((index.len(), dim), index.as_flat().to_vec())
            .map_err(|e| RetrievalError::Encoding(e.to_string()))?;

        if let Some(parent) = index_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        npy::write_npy(npy_path, &embeddings)
            .map_err(|e| RetrievalError::Persistence(format!("{:#}", e)))?;
        PersistedVectorIndex::new(view, fingerprint, self.encoder.model_id().to_string(), &index)
            .save(index_path)
            .map_err(|e| RetrievalError::Persistence(format!("{:#}", e)))?;

        info!(
            view = %view,
            vectors = index.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            index = %index_path.display(),
            embeddings = %npy_path.display(),
            "Saved index and embeddings"
        );

        Ok(BuiltIndex {
            index,
            embeddings,
            cache_hit: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::HashingEncoder;
    use tempfile::TempDir;

    fn texts() -> Vec<String> {
        vec![
            "plot a barplot".to_string(),
            String::new(),
            "compute mean".to_string(),
        ]
    }

    #[test]
    fn test_build_writes_both_artifacts() {
        let dir = TempDir::new().unwrap();
        let encoder = HashingEncoder::new(32).unwrap();
        let builder = IndexBuilder::new(&encoder, BuildOptions::default());

        let built = builder.build_or_load(View::Question, &texts(), dir.path()).unwrap();
        assert!(!built.cache_hit);
        assert_eq!(built.index.len(), 3);
        assert_eq!(built.embeddings.dim(), (3, 32));
        assert!(dir.path().join("query.index").exists());
        assert!(dir.path().join("query.npy").exists());

        // the empty question still occupies its row
        assert!(built.index.vector(1).unwrap().iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_second_call_hits_cache() {
        let dir = TempDir::new().unwrap();
        let encoder = HashingEncoder::new(32).unwrap();
        let builder = IndexBuilder::new(&encoder, BuildOptions::default());

        let first = builder.build_or_load(View::Code, &texts(), dir.path()).unwrap();
        let second = builder.build_or_load(View::Code, &texts(), dir.path()).unwrap();
        assert!(second.cache_hit);
        assert_eq!(first.index, second.index);
        assert_eq!(first.embeddings, second.embeddings);
    }

    #[test]
    fn test_stale_cache_rebuilt_when_verifying() {
        let dir = TempDir::new().unwrap();
        let encoder = HashingEncoder::new(32).unwrap();
        let builder = IndexBuilder::new(&encoder, BuildOptions::default());
        builder.build_or_load(View::Tags, &texts(), dir.path()).unwrap();

        let mut changed = texts();
        changed.push("extra snippet".to_string());
        let rebuilt = builder.build_or_load(View::Tags, &changed, dir.path()).unwrap();
        assert!(!rebuilt.cache_hit);
        assert_eq!(rebuilt.index.len(), 4);
    }

    #[test]
    fn test_stale_cache_wins_without_verification() {
        let dir = TempDir::new().unwrap();
        let encoder = HashingEncoder::new(32).unwrap();
        let options = BuildOptions {
            verify_fingerprint: false,
            ..BuildOptions::default()
        };
        let builder = IndexBuilder::new(&encoder, options);
        builder.build_or_load(View::Tags, &texts(), dir.path()).unwrap();

        let mut changed = texts();
        changed.push("extra snippet".to_string());
        let loaded = builder.build_or_load(View::Tags, &changed, dir.path()).unwrap();
        assert!(loaded.cache_hit);
        assert_eq!(loaded.index.len(), 3);
    }

    #[test]
    fn test_mismatched_artifacts_are_corruption() {
        let dir = TempDir::new().unwrap();
        let encoder = HashingEncoder::new(32).unwrap();
        let builder = IndexBuilder::new(&encoder, BuildOptions::default());
        builder.build_or_load(View::Code, &texts(), dir.path()).unwrap();

        let (_, npy_path) = IndexBuilder::artifact_paths(View::Code, dir.path());
        npy::write_npy(&npy_path, &Array2::zeros((2, 32))).unwrap();

        let result = builder.build_or_load(View::Code, &texts(), dir.path());
        assert!(matches!(result, Err(RetrievalError::CacheCorruption(_))));
    }

    #[test]
    fn test_force_rebuild_ignores_cache() {
        let dir = TempDir::new().unwrap();
        let encoder = HashingEncoder::new(32).unwrap();
        IndexBuilder::new(&encoder, BuildOptions::default())
            .build_or_load(View::Code, &texts(), dir.path())
            .unwrap();

        let options = BuildOptions {
            force_rebuild: true,
            ..BuildOptions::default()
        };
        let built = IndexBuilder::new(&encoder, options)
            .build_or_load(View::Code, &texts(), dir.path())
            .unwrap();
        assert!(!built.cache_hit);
    }
}
