//! ONNX Runtime sentence-embedding encoder
//!
//! Runs a sentence-transformers model exported to ONNX and mean-pools the
//! last hidden state over the attention mask. Output is not normalized;
//! callers apply [`super::normalize`].

use super::model_download::{default_cache_dir, ModelDownloader, ModelInfo};
use super::TextEncoder;
use crate::config::EncoderConfig;
use crate::error::{Result, RetrievalError};
use anyhow::Context;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::info;

/// Sentence-embedding model backed by an ONNX session
pub struct OnnxEncoder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model_id: String,
    embedding_dim: usize,
    uses_token_type_ids: bool,
}

impl OnnxEncoder {
    /// Load the configured model, downloading it first when allowed
    pub fn from_config(config: &EncoderConfig) -> anyhow::Result<Self> {
        let model_dir = match &config.model_dir {
            Some(dir) => PathBuf::from(dir),
            None => {
                let downloader = ModelDownloader::new(default_cache_dir()?);
                let info = ModelInfo::sentence_transformers(&config.model_name);
                if config.auto_download {
                    downloader.ensure_model(&info)?
                } else {
                    downloader.get_model_path(&info.name)?
                }
            }
        };

        Self::load(
            &model_dir,
            &config.model_name,
            config.embedding_dim,
            config.max_length,
        )
    }

    /// Load `model.onnx` and `tokenizer.json` from a model directory
    pub fn load(
        model_dir: &Path,
        model_name: &str,
        embedding_dim: usize,
        max_length: usize,
    ) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .commit_from_file(&model_path)
            .with_context(|| format!("Failed to load ONNX model: {}", model_path.display()))?;

        let uses_token_type_ids = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            anyhow::anyhow!("Failed to load tokenizer {}: {}", tokenizer_path.display(), e)
        })?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Invalid truncation settings: {}", e))?;

        info!(
            model = model_name,
            dir = %model_dir.display(),
            embedding_dim,
            "Loaded ONNX sentence-embedding model"
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_id: format!("onnx:{}", model_name),
            embedding_dim,
            uses_token_type_ids,
        })
    }

    fn run_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let batch = encodings.len();
        let seq_len = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);

        let mut ids = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);
        let mut type_ids = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            ids.extend(encoding.get_ids().iter().map(|&x| x as i64));
            mask.extend(encoding.get_attention_mask().iter().map(|&x| x as i64));
            type_ids.extend(encoding.get_type_ids().iter().map(|&x| x as i64));
        }

        let shape = [batch, seq_len];
        let input_ids =
            Tensor::from_array((shape, ids)).context("Failed to create input_ids tensor")?;
        let attention_mask = Tensor::from_array((shape, mask.clone()))
            .context("Failed to create attention_mask tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("ONNX session lock poisoned"))?;
        let outputs = if self.uses_token_type_ids {
            let token_type_ids = Tensor::from_array((shape, type_ids))
                .context("Failed to create token_type_ids tensor")?;
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
            ])
        }
        .context("ONNX inference failed")?;

        // last_hidden_state: [batch, seq_len, hidden]
        let (out_shape, hidden) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract output tensor")?;

        let hidden_dim = *out_shape
            .last()
            .context("ONNX output has no hidden dimension")? as usize;
        if hidden_dim != self.embedding_dim {
            anyhow::bail!(
                "Model produces {}-dimensional embeddings but {} was configured",
                hidden_dim,
                self.embedding_dim
            );
        }

        Ok(mean_pool(hidden, &mask, batch, seq_len, hidden_dim))
    }
}

/// Average token embeddings where the attention mask is set
fn mean_pool(
    hidden: &[f32],
    mask: &[i64],
    batch: usize,
    seq_len: usize,
    hidden_dim: usize,
) -> Vec<Vec<f32>> {
    (0..batch)
        .map(|b| {
            let mut pooled = vec![0.0f32; hidden_dim];
            let mut count = 0.0f32;
            for t in 0..seq_len {
                if mask[b * seq_len + t] == 0 {
                    continue;
                }
                let offset = (b * seq_len + t) * hidden_dim;
                for (acc, v) in pooled.iter_mut().zip(&hidden[offset..offset + hidden_dim]) {
                    *acc += v;
                }
                count += 1.0;
            }
            if count > 0.0 {
                pooled.iter_mut().for_each(|v| *v /= count);
            }
            pooled
        })
        .collect()
}

impl TextEncoder for OnnxEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run_batch(texts)
            .map_err(|e| RetrievalError::Encoding(format!("{:#}", e)))
    }
}
