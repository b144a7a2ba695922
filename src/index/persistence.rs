//! Persistent index and metadata artifacts
//!
//! `<view>.index` holds a bincode-encoded [`PersistedVectorIndex`];
//! `metadata.json` holds the snippet array. Both carry a format version and
//! a content fingerprint. Writes take an exclusive file lock, reads a shared
//! lock (multiple readers allowed).

use super::vector_index::VectorIndex;
use super::View;
use crate::corpus::Snippet;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// File name of the shared metadata artifact
pub const METADATA_FILE: &str = "metadata.json";

/// Serialized form of one view's index
#[derive(Serialize, Deserialize)]
pub struct PersistedVectorIndex {
    /// Version for forward compatibility
    pub version: u32,
    pub view: View,
    /// Fingerprint of (model id, view, texts) at build time
    pub fingerprint: String,
    pub model_id: String,
    pub embedding_dim: usize,
    /// Row-major unit vectors, one row per snippet
    pub vectors: Vec<f32>,
}

impl PersistedVectorIndex {
    /// Current persistence format version (bump this when format changes)
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(view: View, fingerprint: String, model_id: String, index: &VectorIndex) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            view,
            fingerprint,
            model_id,
            embedding_dim: index.embedding_dim(),
            vectors: index.as_flat().to_vec(),
        }
    }

    /// Save the index to a file with exclusive lock
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = create_locked(path)?;
        let mut writer = BufWriter::new(&file);
        bincode::serialize_into(&mut writer, self)
            .with_context(|| format!("Failed to serialize index: {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write index: {}", path.display()))?;
        Ok(())
    }

    /// Load an index from a file with shared lock
    pub fn load(path: &Path) -> Result<Self> {
        let file = open_locked(path)?;
        let index: Self = bincode::deserialize_from(BufReader::new(&file))
            .with_context(|| format!("Failed to deserialize index: {}", path.display()))?;

        if index.version != Self::CURRENT_VERSION {
            anyhow::bail!(
                "Index version mismatch in {}: found {}, expected {}",
                path.display(),
                index.version,
                Self::CURRENT_VERSION
            );
        }
        Ok(index)
    }

    pub fn into_index(self) -> crate::error::Result<VectorIndex> {
        VectorIndex::from_flat(self.embedding_dim, self.vectors)
    }
}

/// Serialized snippet array shared by all three views
#[derive(Serialize, Deserialize)]
pub struct PersistedMetadata {
    pub version: u32,
    /// Corpus fingerprint at build time
    pub fingerprint: String,
    pub snippets: Vec<Snippet>,
}

impl PersistedMetadata {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(fingerprint: String, snippets: Vec<Snippet>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            fingerprint,
            snippets,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = create_locked(path)?;
        let mut writer = BufWriter::new(&file);
        serde_json::to_writer(&mut writer, self)
            .with_context(|| format!("Failed to serialize metadata: {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write metadata: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = open_locked(path)?;
        let mut metadata: Self = serde_json::from_reader(BufReader::new(&file))
            .with_context(|| format!("Failed to deserialize metadata: {}", path.display()))?;

        if metadata.version != Self::CURRENT_VERSION {
            anyhow::bail!(
                "Metadata version mismatch in {}: found {}, expected {}",
                path.display(),
                metadata.version,
                Self::CURRENT_VERSION
            );
        }
        for snippet in &mut metadata.snippets {
            snippet.strip_reserved_fields();
        }
        Ok(metadata)
    }
}

/// SHA-256 over the model id, view name and every text (length-prefixed)
pub fn view_fingerprint(model_id: &str, view: View, texts: &[String]) -> String {
    let mut hasher = Sha256::new();
    for part in [model_id, view.as_str()] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.update((texts.len() as u64).to_le_bytes());
    for text in texts {
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn create_locked(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create cache file: {}", path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("Failed to acquire exclusive lock on: {}", path.display()))?;
    Ok(file)
}

fn open_locked(path: &Path) -> Result<std::fs::File> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open cache file: {}", path.display()))?;
    file.lock_shared()
        .with_context(|| format!("Failed to acquire shared lock on: {}", path.display()))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Difficulty;
    use tempfile::TempDir;

    #[test]
    fn test_persisted_index_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("code.index");

        let mut index = VectorIndex::new(2);
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();

        PersistedVectorIndex::new(View::Code, "abc".to_string(), "m".to_string(), &index)
            .save(&path)
            .expect("Failed to save index");

        let loaded = PersistedVectorIndex::load(&path).expect("Failed to load index");
        assert_eq!(loaded.view, View::Code);
        assert_eq!(loaded.fingerprint, "abc");
        assert_eq!(loaded.into_index().unwrap(), index);
    }

    #[test]
    fn test_metadata_round_trip_keeps_extra_fields() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join(METADATA_FILE);

        let mut extra = serde_json::Map::new();
        extra.insert("core_category".to_string(), "viz".into());
        let snippet = Snippet {
            question: "plot a barplot".to_string(),
            code: "df.plot.bar()".to_string(),
            tags: vec!["pandas".to_string()],
            category: "plotting".to_string(),
            difficulty: Difficulty::Easy,
            extra,
        };

        PersistedMetadata::new("fp".to_string(), vec![snippet.clone()])
            .save(&path)
            .unwrap();
        let loaded = PersistedMetadata::load(&path).unwrap();
        assert_eq!(loaded.fingerprint, "fp");
        assert_eq!(loaded.snippets, vec![snippet]);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tags.index");
        std::fs::write(&path, b"not an index").unwrap();
        assert!(PersistedVectorIndex::load(&path).is_err());
    }

    #[test]
    fn test_view_fingerprint_sensitivity() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let base = view_fingerprint("m", View::Code, &texts);

        assert_eq!(base, view_fingerprint("m", View::Code, &texts));
        assert_ne!(base, view_fingerprint("other", View::Code, &texts));
        assert_ne!(base, view_fingerprint("m", View::Tags, &texts));
        let joined = vec!["ab".to_string()];
        assert_ne!(base, view_fingerprint("m", View::Code, &joined));
    }
}
