//! Feature-hashing text encoder
//!
//! Maps word tokens and character trigrams into a fixed number of buckets
//! using a SHA-256 digest of each feature, so bucket assignment is the same on
//! every platform and release. Needs no model files, so it is the default
//! backend and the one used throughout the test suite.

use super::TextEncoder;
use crate::error::{Result, RetrievalError};
use sha2::{Digest, Sha256};

/// Weight of a whole-word feature
const WORD_WEIGHT: f32 = 1.0;
/// Weight of a character trigram feature
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic bag-of-features encoder
pub struct HashingEncoder {
    embedding_dim: usize,
    model_id: String,
}

impl HashingEncoder {
    pub fn new(embedding_dim: usize) -> Result<Self> {
        if embedding_dim == 0 {
            return Err(RetrievalError::Encoding(
                "hashing encoder needs a non-zero embedding dimension".to_string(),
            ));
        }

        Ok(Self {
            embedding_dim,
            model_id: format!("hashing-v2-{}", embedding_dim),
        })
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.embedding_dim];

        for word in tokenize(text) {
            embedding[self.bucket(b"w:", word.as_bytes())] += WORD_WEIGHT;

            let chars: Vec<char> = word.chars().collect();
            if chars.len() > 3 {
                let mut buf = String::with_capacity(12);
                for tri in chars.windows(3) {
                    buf.clear();
                    buf.extend(tri);
                    embedding[self.bucket(b"t:", buf.as_bytes())] += TRIGRAM_WEIGHT;
                }
            }
        }

        embedding
    }

    fn bucket(&self, prefix: &[u8], feature: &[u8]) -> usize {
        let digest = Sha256::new()
            .chain_update(prefix)
            .chain_update(feature)
            .finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.embedding_dim as u64) as usize
    }
}

/// Lowercase alphanumeric runs of at least two characters
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.chars().count() >= 2)
        .map(|s| s.to_lowercase())
}

impl TextEncoder for HashingEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}
