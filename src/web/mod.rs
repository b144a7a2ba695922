//! HTTP API and search page for snippet_search

mod api;

pub use api::{ApiError, SearchRequest, SearchResponse};

use crate::config::Config;
use crate::search::SearchService;
use crate::upstream::UpstreamClient;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use rust_embed::RustEmbed;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticAssets;

/// Shared, read-only application state. Cloned per request.
#[derive(Clone)]
pub struct WebState {
    pub service: Arc<SearchService>,
    pub upstream: UpstreamClient,
    pub config: Arc<Config>,
    /// When set, static files are served from this directory on disk instead of
    /// the embedded assets. Intended for development use only.
    pub static_dir: Option<PathBuf>,
}

impl WebState {
    pub fn new(service: Arc<SearchService>, upstream: UpstreamClient, config: Config) -> Self {
        let static_dir = config.server.static_dir.as_ref().map(PathBuf::from);
        Self {
            service,
            upstream,
            config: Arc::new(config),
            static_dir,
        }
    }
}

/// Create the web router with all routes
pub fn create_router(state: WebState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/search", post(api::search_handler))
        .route("/explain", post(api::explain_handler))
        .route("/run", post(api::run_handler))
        .route("/api/search", get(api::api_search_handler))
        .route("/api/stats", get(api::stats_handler))
        .route("/api/health", get(api::health_handler))
        .route("/api/diagnostics", get(api::diagnostics_handler));

    if state.config.server.enable_web_ui {
        router = router
            .route("/", get(index_handler))
            .route("/{*file}", get(static_handler));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler(State(state): State<WebState>) -> Response {
    serve_static_file("index.html", state.static_dir.as_deref())
}

async fn static_handler(
    State(state): State<WebState>,
    axum::extract::Path(path): axum::extract::Path<String>,
) -> Response {
    serve_static_file(&path, state.static_dir.as_deref())
}

fn serve_static_file(path: &str, static_dir: Option<&std::path::Path>) -> Response {
    let path = path.trim_start_matches('/');
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    if let Some(dir) = static_dir {
        if path.contains("..") {
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }

        let file_path = dir.join(path);
        return match std::fs::read(&file_path) {
            Ok(data) => (
                [
                    (header::CONTENT_TYPE, mime.as_ref().to_string()),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                ],
                data,
            )
                .into_response(),
            Err(e) => {
                tracing::warn!(
                    path = %file_path.display(),
                    error = %e,
                    "Failed to read static file from disk"
                );
                (StatusCode::NOT_FOUND, "Not Found").into_response()
            }
        };
    }

    match StaticAssets::get(path) {
        Some(content) => {
            let etag = format!("\"{:x}\"", md5::compute(&content.data));
            (
                [
                    (header::CONTENT_TYPE, mime.as_ref().to_string()),
                    (
                        header::CACHE_CONTROL,
                        "public, max-age=3600, must-revalidate".to_string(),
                    ),
                    (header::ETAG, etag),
                ],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}
