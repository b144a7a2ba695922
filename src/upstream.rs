//! Delegation of the explain and run actions to external services
//!
//! Each call is an independent HTTP POST of `{code}` with its own timeout.
//! Nothing here touches the index store.

use crate::config::UpstreamConfig;
use crate::error::{Result, RetrievalError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainResponse {
    pub explanation: String,
}

/// Captured output of executing a snippet. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_expression: Option<String>,
    /// Base64-encoded PNG images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plots: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    explain_url: Option<String>,
    run_url: Option<String>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| RetrievalError::Upstream(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            explain_url: config.explain_url.clone().filter(|u| !u.is_empty()),
            run_url: config.run_url.clone().filter(|u| !u.is_empty()),
        })
    }

    pub async fn explain(&self, code: &str) -> Result<ExplainResponse> {
        let url = self
            .explain_url
            .as_deref()
            .ok_or(RetrievalError::UpstreamNotConfigured("explain"))?;
        self.post(url, code).await
    }

    pub async fn run(&self, code: &str) -> Result<RunResponse> {
        let url = self
            .run_url
            .as_deref()
            .ok_or(RetrievalError::UpstreamNotConfigured("run"))?;
        self.post(url, code).await
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, url: &str, code: &str) -> Result<T> {
        debug!(url, code_len = code.len(), "Delegating to upstream");

        let response = self
            .http
            .post(url)
            .json(&CodeRequest {
                code: code.to_string(),
            })
            .send()
            .await
            .map_err(|e| {
                warn!(url, error = %e, "Upstream request failed");
                RetrievalError::Upstream(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url, status = %status, "Upstream returned an error status");
            return Err(RetrievalError::Upstream(format!(
                "{} returned {}: {}",
                url,
                status,
                body.trim()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RetrievalError::Upstream(format!("invalid response from {}: {}", url, e)))
    }
}
