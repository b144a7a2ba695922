//! Sentence-embedding model download and caching
//!
//! Fetches the ONNX export, tokenizer and config of a HuggingFace model once
//! and keeps them under `<cache_dir>/models/<org>-<name>/`.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECS: u64 = 2;

/// Model metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub onnx_url: String,
    pub tokenizer_url: String,
    pub config_url: String,
    pub expected_sha256: Option<String>,
}

impl ModelInfo {
    /// Files for a sentence-transformers repository that ships an `onnx/` export
    pub fn sentence_transformers(name: &str) -> Self {
        let base = format!("https://huggingface.co/{}/resolve/main", name);
        Self {
            name: name.to_string(),
            onnx_url: format!("{}/onnx/model.onnx", base),
            tokenizer_url: format!("{}/tokenizer.json", base),
            config_url: format!("{}/config.json", base),
            expected_sha256: None,
        }
    }

    /// all-MiniLM-L6-v2: 384-dimensional general purpose sentence embeddings
    pub fn all_minilm_l6_v2() -> Self {
        Self::sentence_transformers("sentence-transformers/all-MiniLM-L6-v2")
    }
}

/// Model downloader with progress tracking and retry logic
pub struct ModelDownloader {
    cache_dir: PathBuf,
}

impl ModelDownloader {
    /// Create new downloader with cache directory
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Get model directory path
    fn model_dir(&self, model_name: &str) -> PathBuf {
        let safe_name = model_name.replace('/', "-");
        self.cache_dir.join("models").join(safe_name)
    }

    /// Check if model is cached
    pub fn is_cached(&self, model_name: &str) -> bool {
        let model_dir = self.model_dir(model_name);
        model_dir.join("model.onnx").exists()
            && model_dir.join("tokenizer.json").exists()
            && model_dir.join("config.json").exists()
    }

    /// Get path to cached model
    pub fn get_model_path(&self, model_name: &str) -> Result<PathBuf> {
        let model_dir = self.model_dir(model_name);
        if !self.is_cached(model_name) {
            anyhow::bail!(
                "Model '{}' not found in cache at {}. Set `encoder.auto_download = true` or run `snippet_search build` once with network access.",
                model_name,
                model_dir.display()
            );
        }
        Ok(model_dir)
    }

    /// Download model if not cached
    pub fn ensure_model(&self, model_info: &ModelInfo) -> Result<PathBuf> {
        if self.is_cached(&model_info.name) {
            info!(model = %model_info.name, "Model found in cache");
            return self.get_model_path(&model_info.name);
        }

        info!(model = %model_info.name, "Downloading model files");
        self.download_model(model_info)?;
        self.get_model_path(&model_info.name)
    }

    /// Fetch every model file, then verify the ONNX checksum when one is known
    fn download_model(&self, model_info: &ModelInfo) -> Result<()> {
        let model_dir = self.model_dir(&model_info.name);
        fs::create_dir_all(&model_dir).with_context(|| {
            format!(
                "Failed to create model cache directory: {}",
                model_dir.display()
            )
        })?;

        info!(
            model = %model_info.name,
            dir = %model_dir.display(),
            "Downloading sentence-embedding model (one-time)"
        );

        let files = [
            (&model_info.onnx_url, "model.onnx", "ONNX model"),
            (&model_info.tokenizer_url, "tokenizer.json", "tokenizer"),
            (&model_info.config_url, "config.json", "model config"),
        ];
        for (url, file_name, description) in files {
            self.download_file_with_retry(url, &model_dir.join(file_name), description)?;
        }

        match self.resolve_expected_sha256(model_info)? {
            Some(expected_hash) => {
                let model_path = model_dir.join("model.onnx");
                if !self.verify_checksum(&model_path, &expected_hash)? {
                    fs::remove_file(&model_path).ok();
                    anyhow::bail!(
                        "Checksum mismatch for {}; the corrupted file was removed",
                        model_path.display()
                    );
                }
                info!("Model checksum verified");
            }
            None => warn!(
                model = %model_info.name,
                "No SHA256 configured; set SNIPPET_SEARCH_MODEL_SHA256 or SNIPPET_SEARCH_MODEL_SHA256_{} to verify downloads",
                Self::env_model_suffix(&model_info.name)
            ),
        }

        Ok(())
    }

    /// Download with up to `MAX_RETRIES` attempts
    fn download_file_with_retry(&self, url: &str, path: &Path, description: &str) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.download_file(url, path, description) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_RETRIES => {
                    warn!(
                        attempt,
                        max_attempts = MAX_RETRIES,
                        error = %e,
                        "Download of {} failed, retrying in {}s",
                        description,
                        RETRY_DELAY_SECS
                    );
                    std::thread::sleep(Duration::from_secs(RETRY_DELAY_SECS));
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to download {} after {} attempts", description, MAX_RETRIES)
                    });
                }
            }
        }
    }

    /// Stream a file from URL to path with a progress bar. The body is written
    /// to `<path>.part` first and renamed once complete.
    fn download_file(&self, url: &str, path: &Path, description: &str) -> Result<()> {
        debug!(url = %url, path = %path.display(), "Downloading {}", description);

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let mut response = client
            .get(url)
            .send()
            .with_context(|| format!("Failed to connect to {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Failed to download {}: HTTP {} from {}",
                description,
                response.status(),
                url
            );
        }

        let pb = match response.content_length() {
            Some(total) if total > 0 => ProgressBar::new(total),
            _ => ProgressBar::new_spinner(),
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );
        pb.set_message(format!("Downloading {}", description));

        let partial = path.with_extension("part");
        let file = fs::File::create(&partial)
            .with_context(|| format!("Failed to create file: {}", partial.display()))?;
        let mut writer = pb.wrap_write(std::io::BufWriter::new(file));

        let written = std::io::copy(&mut response, &mut writer)
            .with_context(|| format!("Failed to read response from {}", url))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write file: {}", partial.display()))?;
        drop(writer);

        fs::rename(&partial, path)
            .with_context(|| format!("Failed to move download into {}", path.display()))?;
        pb.finish_with_message(format!("Downloaded {}", description));

        debug!(path = %path.display(), size = written, "{} downloaded", description);
        Ok(())
    }

    /// Compare the SHA-256 of a file against an expected lowercase hex digest
    fn verify_checksum(&self, path: &Path, expected_hash: &str) -> Result<bool> {
        let mut file =
            fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(format!("{:x}", hasher.finalize()) == expected_hash)
    }

    /// Checksum from the model info, then the global env var, then the
    /// model-scoped env var
    fn resolve_expected_sha256(&self, model_info: &ModelInfo) -> Result<Option<String>> {
        let scoped_var = format!(
            "SNIPPET_SEARCH_MODEL_SHA256_{}",
            Self::env_model_suffix(&model_info.name)
        );
        let candidate = model_info
            .expected_sha256
            .clone()
            .or_else(|| non_empty_env("SNIPPET_SEARCH_MODEL_SHA256"))
            .or_else(|| non_empty_env(&scoped_var));

        candidate.map(|v| Self::normalize_sha256(&v)).transpose()
    }

    fn normalize_sha256(value: &str) -> Result<String> {
        let trimmed = value.trim();
        if trimmed.len() != 64 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!(
                "Invalid SHA256 value '{}'. Expected 64 hex characters.",
                trimmed
            );
        }
        Ok(trimmed.to_lowercase())
    }

    fn env_model_suffix(model_name: &str) -> String {
        model_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>()
            .to_uppercase()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Default directory for downloaded models
pub fn default_cache_dir() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .context(
            "Failed to determine cache directory. \
             On Linux, ensure $HOME is set. On Windows, ensure %LOCALAPPDATA% is set.",
        )?
        .join("snippet_search");

    Ok(cache_dir)
}
