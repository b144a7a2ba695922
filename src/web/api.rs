//! REST API handlers for snippet_search

use super::WebState;
use crate::diagnostics::{self, DiagnosticsQuery, SnippetDiagnosticsResponse};
use crate::error::RetrievalError;
use crate::index::StoreStats;
use crate::search::SearchResult;
use crate::upstream::{CodeRequest, ExplainResponse, RunResponse};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

/// Error surfaced to HTTP clients as `{"error": message}`
#[derive(Debug)]
pub enum ApiError {
    Retrieval(RetrievalError),
    /// The request body or query string could not be extracted
    Rejected(StatusCode, String),
    Internal(String),
}

impl From<RetrievalError> for ApiError {
    fn from(err: RetrievalError) -> Self {
        ApiError::Retrieval(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("search task failed: {}", err))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Retrieval(RetrievalError::InvalidMode(_))
            | ApiError::Retrieval(RetrievalError::InvalidQuery(_)) => StatusCode::BAD_REQUEST,
            ApiError::Retrieval(RetrievalError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Retrieval(RetrievalError::UpstreamNotConfigured(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Rejected(status, _) => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Retrieval(e) => e.to_string(),
            ApiError::Rejected(_, msg) | ApiError::Internal(msg) => msg.clone(),
        };
        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %message, "Rejected request");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Body of `POST /search`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Query parameters of `GET /api/search`
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    difficulty: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query: String,
    pub mode: String,
    pub total_results: usize,
    pub elapsed_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub snippets: usize,
}

/// Resolve defaults and run the search on the blocking pool
async fn run_search(
    state: &WebState,
    query: String,
    mode: Option<String>,
    top_k: Option<usize>,
    difficulty: Option<String>,
) -> Result<(Vec<SearchResult>, String), ApiError> {
    let mode = mode.unwrap_or_else(|| state.config.index.default_mode.to_string());
    let difficulty = difficulty.unwrap_or_else(|| "all".to_string());
    let top_k = state.config.clamp_top_k(top_k);

    let service = state.service.clone();
    let mode_for_task = mode.clone();
    let results = tokio::task::spawn_blocking(move || {
        service.search_str(&query, &mode_for_task, top_k, &difficulty)
    })
    .await??;

    Ok((results, mode))
}

/// `POST /search`: ranked results as a plain JSON array
pub async fn search_handler(
    State(state): State<WebState>,
    request: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let Json(request) = request?;
    let (results, _) = run_search(
        &state,
        request.query,
        request.mode,
        request.top_k,
        request.difficulty,
    )
    .await?;
    Ok(Json(results))
}

/// `GET /api/search`: results wrapped with timing information
pub async fn api_search_handler(
    State(state): State<WebState>,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Query(params) = params?;
    let start = Instant::now();
    let query = params.q.clone();
    let (results, mode) =
        run_search(&state, params.q, params.mode, params.top_k, params.difficulty).await?;

    Ok(Json(SearchResponse {
        total_results: results.len(),
        results,
        query,
        mode,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    }))
}

pub async fn explain_handler(
    State(state): State<WebState>,
    request: Result<Json<CodeRequest>, JsonRejection>,
) -> Result<Json<ExplainResponse>, ApiError> {
    let Json(request) = request?;
    Ok(Json(state.upstream.explain(&request.code).await?))
}

pub async fn run_handler(
    State(state): State<WebState>,
    request: Result<Json<CodeRequest>, JsonRejection>,
) -> Result<Json<RunResponse>, ApiError> {
    let Json(request) = request?;
    Ok(Json(state.upstream.run(&request.code).await?))
}

pub async fn stats_handler(State(state): State<WebState>) -> Json<StoreStats> {
    Json(state.service.store().stats())
}

pub async fn health_handler(State(state): State<WebState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        snippets: state.service.store().len(),
    })
}

/// `GET /api/diagnostics`: index details plus self-tests
pub async fn diagnostics_handler(
    State(state): State<WebState>,
    params: Result<Query<DiagnosticsQuery>, QueryRejection>,
) -> Result<Json<SnippetDiagnosticsResponse>, ApiError> {
    let Query(params) = params?;
    let service = state.service.clone();
    let config = state.config.clone();
    let report = tokio::task::spawn_blocking(move || {
        diagnostics::collect(&service, &config, params.sample_count)
    })
    .await?;
    Ok(Json(report))
}
