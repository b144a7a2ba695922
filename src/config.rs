//! Configuration management for snippet_search
//!
//! Supports loading configuration from TOML files with CLI overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::index::{BuildOptions, View};

/// Telemetry / OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Enable OpenTelemetry trace export (default: false)
    /// Can be overridden by env var SNIPPET_SEARCH_TRACING_ENABLED or OTEL_SDK_DISABLED
    #[serde(default)]
    pub enabled: bool,

    /// OTLP exporter endpoint (default: http://localhost:4317)
    /// Can be overridden by env var OTEL_EXPORTER_OTLP_ENDPOINT
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,

    /// Service name reported to the collector (default: snippet_search)
    /// Can be overridden by env var OTEL_SERVICE_NAME
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "snippet_search".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
        }
    }
}

impl TelemetryConfig {
    /// Apply environment variable overrides.
    /// Env vars take precedence over TOML config values.
    pub fn with_env_overrides(mut self) -> Self {
        // OTEL_SDK_DISABLED=true → disabled (official OTel convention)
        if let Ok(val) = std::env::var("OTEL_SDK_DISABLED") {
            if val.eq_ignore_ascii_case("true") {
                self.enabled = false;
            }
        }
        if let Ok(val) = std::env::var("SNIPPET_SEARCH_TRACING_ENABLED") {
            self.enabled = val.eq_ignore_ascii_case("true") || val == "1";
        }
        if let Ok(val) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            if !val.is_empty() {
                self.otlp_endpoint = val;
            }
        }
        if let Ok(val) = std::env::var("OTEL_SERVICE_NAME") {
            if !val.is_empty() {
                self.service_name = val;
            }
        }
        self
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub corpus: CorpusConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP/Web UI server to
    #[serde(default = "default_web_address")]
    pub web_address: String,

    /// Serve the search page at `/`
    #[serde(default = "default_true")]
    pub enable_web_ui: bool,

    /// Upper bound for `top_k` on search requests
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Serve the web UI from this directory instead of the embedded copy
    #[serde(default)]
    pub static_dir: Option<String>,
}

/// Where the snippet corpus lives
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorpusConfig {
    /// JSON Lines file, one snippet per line. When absent the server opens
    /// a previously built cache directory instead.
    #[serde(default)]
    pub path: Option<String>,
}

/// Index build and search defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding `*.index`, `*.npy` and `metadata.json`
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Texts per encoder call while building
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rebuild cached artifacts whose fingerprint no longer matches the corpus.
    /// When false a stale cache is used as is.
    #[serde(default = "default_true")]
    pub verify_fingerprint: bool,

    /// `top_k` used when a request omits it
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Search view used when a request omits `mode`
    #[serde(default = "default_mode")]
    pub default_mode: View,
}

/// Encoder backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderBackend {
    /// Feature-hashing encoder, no model files needed
    Hashing,
    /// Sentence-transformer model through ONNX Runtime (`ml-models` feature)
    Onnx,
}

/// Embedding encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_backend")]
    pub backend: EncoderBackend,

    /// HuggingFace model name for the onnx backend
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Output dimension (must match the model for the onnx backend)
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Directory containing `model.onnx` and `tokenizer.json`; defaults to
    /// the user cache directory
    #[serde(default)]
    pub model_dir: Option<String>,

    /// Download missing model files from the HuggingFace Hub
    #[serde(default = "default_true")]
    pub auto_download: bool,

    /// Token limit per text for the onnx backend
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

/// Endpoints the explain/run actions are delegated to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Receives `{code}`, answers `{explanation}`
    #[serde(default)]
    pub explain_url: Option<String>,

    /// Receives `{code}`, answers `{stdout, last_expression, plots, error}`
    #[serde(default)]
    pub run_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

fn default_web_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_top_k() -> usize {
    10
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_top_k() -> usize {
    3
}

fn default_mode() -> View {
    View::Question
}

fn default_backend() -> EncoderBackend {
    EncoderBackend::Hashing
}

fn default_model_name() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_embedding_dim() -> usize {
    384
}

fn default_max_length() -> usize {
    256
}

fn default_upstream_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            web_address: default_web_address(),
            enable_web_ui: true,
            max_top_k: default_max_top_k(),
            static_dir: None,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            batch_size: default_batch_size(),
            verify_fingerprint: true,
            default_top_k: default_top_k(),
            default_mode: default_mode(),
        }
    }
}

impl IndexConfig {
    /// Builder options derived from this section
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            batch_size: self.batch_size,
            verify_fingerprint: self.verify_fingerprint,
            ..BuildOptions::default()
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model_name: default_model_name(),
            embedding_dim: default_embedding_dim(),
            model_dir: None,
            auto_download: true,
            max_length: default_max_length(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            explain_url: None,
            run_url: None,
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from default locations
    ///
    /// Search order:
    /// 1. SNIPPET_SEARCH_CONFIG environment variable
    /// 2. ./snippet_search.toml (current directory)
    /// 3. ~/.config/snippet_search/config.toml (user config)
    pub fn from_default_locations() -> Result<Option<(Self, PathBuf)>> {
        if let Ok(env_path) = std::env::var("SNIPPET_SEARCH_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                let config = Self::from_file(&path)?;
                return Ok(Some((config, path)));
            }
        }

        let local_path = PathBuf::from("snippet_search.toml");
        if local_path.exists() {
            let config = Self::from_file(&local_path)?;
            return Ok(Some((config, local_path)));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_path = config_dir.join("snippet_search").join("config.toml");
            if user_path.exists() {
                let config = Self::from_file(&user_path)?;
                return Ok(Some((config, user_path)));
            }
        }

        Ok(None)
    }

    /// Load from `explicit` if given, else from the default locations, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }
        Ok(match Self::from_default_locations()? {
            Some((config, path)) => (config, Some(path)),
            None => (Self::default(), None),
        })
    }

    /// Generate a template configuration file
    pub fn generate_template() -> String {
        r#"# Snippet Search Configuration
# Generated template - customize as needed

[server]
# Address to bind the HTTP server and web UI to
web_address = "0.0.0.0:8080"
enable_web_ui = true

# Largest top_k a search request may ask for (larger values are clamped)
max_top_k = 10

[corpus]
# JSON Lines file, one snippet per line:
# {"question": "...", "code": "...", "tags": [...], "category": "...", "difficulty": "easy"}
# Comment out to serve a previously built cache directory without a corpus
path = "data/snippets.jsonl"

[index]
# Directory for query/code/tags .index + .npy files and metadata.json
cache_dir = "cache"

# Texts per encoder call while building (does not affect results)
batch_size = 32

# Rebuild cached indexes when the corpus or model changed (default: true)
# When false, an existing cache is always used even if it is stale
verify_fingerprint = true

# Defaults for requests that omit them
default_top_k = 3
default_mode = "question"  # question | code | tags

[encoder]
# "hashing" needs no model files; "onnx" requires --features ml-models
backend = "hashing"
embedding_dim = 384

# Settings for the onnx backend
model_name = "sentence-transformers/all-MiniLM-L6-v2"
# model_dir = "/var/lib/snippet_search/models"
auto_download = true
max_length = 256

[upstream]
# Endpoints the Explain and Run buttons are delegated to (optional)
# explain_url = "http://localhost:9000/explain"
# run_url = "http://localhost:9001/run"
timeout_secs = 30

[telemetry]
# Enable OpenTelemetry trace export (default: false)
# Set to true to enable OTLP export (console logging is always active)
# Env overrides: OTEL_SDK_DISABLED=true, SNIPPET_SEARCH_TRACING_ENABLED=true
enabled = false

# OTLP gRPC exporter endpoint (default: http://localhost:4317)
# Env override: OTEL_EXPORTER_OTLP_ENDPOINT
otlp_endpoint = "http://localhost:4317"

# Service name reported to the collector
# Env override: OTEL_SERVICE_NAME
service_name = "snippet_search"
"#
        .to_string()
    }

    /// Write template config to the specified path
    pub fn write_template(path: &Path) -> Result<()> {
        let template = Self::generate_template();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, template)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Merge CLI overrides into the configuration
    pub fn with_overrides(
        mut self,
        address: Option<String>,
        corpus: Option<String>,
        cache_dir: Option<String>,
    ) -> Self {
        if let Some(addr) = address {
            self.server.web_address = addr;
        }
        if let Some(path) = corpus {
            self.corpus.path = Some(path);
        }
        if let Some(dir) = cache_dir {
            self.index.cache_dir = dir;
        }
        self
    }

    /// Clamp a requested result count into `1..=max_top_k`
    pub fn clamp_top_k(&self, requested: Option<usize>) -> usize {
        let max = self.server.max_top_k.max(1);
        requested
            .unwrap_or(self.index.default_top_k)
            .clamp(1, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.web_address, "0.0.0.0:8080");
        assert_eq!(config.server.max_top_k, 10);
        assert_eq!(config.index.batch_size, 32);
        assert!(config.index.verify_fingerprint);
        assert_eq!(config.encoder.backend, EncoderBackend::Hashing);
        assert!(config.upstream.explain_url.is_none());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[server]
web_address = "127.0.0.1:9090"

[index]
cache_dir = "/tmp/snippets"
default_mode = "tags"

[encoder]
backend = "onnx"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.web_address, "127.0.0.1:9090");
        assert_eq!(config.index.cache_dir, "/tmp/snippets");
        assert_eq!(config.index.default_mode, View::Tags);
        assert_eq!(config.encoder.backend, EncoderBackend::Onnx);
        assert_eq!(config.encoder.embedding_dim, 384);
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let template = Config::generate_template();
        let config: Config = toml::from_str(&template).unwrap();
        assert_eq!(config.server.max_top_k, 10);
        assert_eq!(config.corpus.path.as_deref(), Some("data/snippets.jsonl"));
        assert_eq!(config.index.default_top_k, 3);
        assert_eq!(config.index.default_mode, View::Question);
        assert_eq!(config.telemetry.service_name, "snippet_search");
    }

    #[test]
    fn test_overrides() {
        let config = Config::default().with_overrides(
            Some("127.0.0.1:1".to_string()),
            Some("corpus.jsonl".to_string()),
            None,
        );
        assert_eq!(config.server.web_address, "127.0.0.1:1");
        assert_eq!(config.corpus.path.as_deref(), Some("corpus.jsonl"));
        assert_eq!(config.index.cache_dir, "cache");
    }

    #[test]
    fn test_clamp_top_k() {
        let config = Config::default();
        assert_eq!(config.clamp_top_k(None), 3);
        assert_eq!(config.clamp_top_k(Some(0)), 1);
        assert_eq!(config.clamp_top_k(Some(7)), 7);
        assert_eq!(config.clamp_top_k(Some(500)), 10);
    }

    #[test]
    fn test_write_template() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::write_template(&path).unwrap();
        assert!(Config::from_file(&path).is_ok());
    }
}
