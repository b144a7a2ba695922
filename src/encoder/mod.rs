//! Text embedding encoders
//!
//! Every encoder maps text to a fixed-dimension vector and is a pure
//! function of (model snapshot, input text). Normalization to unit length is
//! a separate post-step applied uniformly by callers through [`normalize`].

pub mod hashing;
#[cfg(feature = "ml-models")]
pub mod model_download;
#[cfg(feature = "ml-models")]
pub mod onnx;

pub use hashing::HashingEncoder;
#[cfg(feature = "ml-models")]
pub use model_download::{default_cache_dir, ModelDownloader, ModelInfo};
#[cfg(feature = "ml-models")]
pub use onnx::OnnxEncoder;

use crate::config::{EncoderBackend, EncoderConfig};
use crate::error::{Result, RetrievalError};

/// A deterministic text embedding model
pub trait TextEncoder: Send + Sync {
    /// Identifies the model snapshot; part of every cache fingerprint
    fn model_id(&self) -> &str;

    /// Output vector dimension
    fn embedding_dim(&self) -> usize;

    /// Encode texts, returning one vector per input in the same order
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Encode a single text
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_batch(&[text])?
            .pop()
            .ok_or_else(|| RetrievalError::Encoding("encoder returned no vector".to_string()))
    }
}

impl<E: TextEncoder + ?Sized> TextEncoder for Box<E> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn embedding_dim(&self) -> usize {
        (**self).embedding_dim()
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        (**self).encode_batch(texts)
    }
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left as is.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

/// Inner product of two equal-length vectors
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Encode `texts` in batches of `batch_size`, normalize each vector and check
/// its dimension. `on_batch` is called with the number of texts finished.
pub fn encode_normalized(
    encoder: &dyn TextEncoder,
    texts: &[&str],
    batch_size: usize,
    mut on_batch: impl FnMut(usize),
) -> Result<Vec<Vec<f32>>> {
    let dim = encoder.embedding_dim();
    let mut vectors = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        let encoded = encoder.encode_batch(batch)?;
        if encoded.len() != batch.len() {
            return Err(RetrievalError::Encoding(format!(
                "encoder returned {} vectors for {} texts",
                encoded.len(),
                batch.len()
            )));
        }

        for mut vector in encoded {
            if vector.len() != dim {
                return Err(RetrievalError::Encoding(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    dim,
                    vector.len()
                )));
            }
            normalize(&mut vector);
            vectors.push(vector);
        }
        on_batch(batch.len());
    }

    Ok(vectors)
}

/// Construct the encoder selected by configuration
pub fn from_config(config: &EncoderConfig) -> anyhow::Result<Box<dyn TextEncoder>> {
    match config.backend {
        EncoderBackend::Hashing => Ok(Box::new(HashingEncoder::new(config.embedding_dim)?)),
        #[cfg(feature = "ml-models")]
        EncoderBackend::Onnx => Ok(Box::new(OnnxEncoder::from_config(config)?)),
        #[cfg(not(feature = "ml-models"))]
        EncoderBackend::Onnx => anyhow::bail!(
            "Encoder backend 'onnx' requires building with `--features ml-models`"
        ),
    }
}
