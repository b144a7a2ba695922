use anyhow::{Context, Result};
use clap::Parser;
use snippet_search::config::Config;
use snippet_search::diagnostics;
use snippet_search::search::SearchService;
use snippet_search::telemetry;
use snippet_search::upstream::UpstreamClient;
use snippet_search::web::{self, WebState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

/// Snippet Search Server - semantic code snippet retrieval over HTTP
#[derive(Parser, Debug)]
#[command(name = "snippet_search_server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config file)
    #[arg(short, long, value_name = "ADDR")]
    address: Option<String>,

    /// Corpus JSON Lines file (overrides config file)
    #[arg(long, value_name = "FILE")]
    corpus: Option<String>,

    /// Index cache directory (overrides config file)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Generate a template configuration file and exit
    #[arg(long, value_name = "FILE")]
    init: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --init flag: generate template config and exit
    if let Some(init_path) = args.init {
        let path = if init_path.as_os_str().is_empty() {
            PathBuf::from("snippet_search.toml")
        } else {
            init_path
        };

        if path.exists() {
            anyhow::bail!(
                "Config file already exists: {}\nRemove it first or choose a different path.",
                path.display()
            );
        }

        Config::write_template(&path)?;
        println!("✓ Generated config file: {}", path.display());
        println!("\nSet the corpus path, then start the server with:");
        println!("  snippet_search_server --config {}", path.display());
        return Ok(());
    }

    if let Some(ref path) = args.config {
        if !path.exists() {
            anyhow::bail!(
                "Config file not found: {}\nUse --init {} to generate a template.",
                path.display(),
                path.display()
            );
        }
    }
    let (config, config_path) = Config::load(args.config.as_deref())?;
    let mut config = config.with_overrides(args.address, args.corpus, args.cache_dir);
    config.telemetry = config.telemetry.with_env_overrides();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_telemetry(&config.telemetry, log_level)?;
    diagnostics::init_server_start_time();

    match &config_path {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("No config file found, using defaults"),
    }
    info!(
        web_address = %config.server.web_address,
        corpus = ?config.corpus.path,
        cache_dir = %config.index.cache_dir,
        encoder = ?config.encoder.backend,
        "Configuration loaded"
    );

    let mut options = config.index.build_options();
    options.show_progress = true;
    let build_config = config.clone();
    let service =
        tokio::task::spawn_blocking(move || SearchService::from_config(&build_config, options))
            .await
            .context("Index build task panicked")??;
    let service = Arc::new(service);

    let upstream = UpstreamClient::new(&config.upstream)?;
    let web_addr = config.server.web_address.clone();
    let telemetry_config = config.telemetry.clone();
    let router = web::create_router(WebState::new(service.clone(), upstream, config));

    let listener = tokio::net::TcpListener::bind(&web_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", web_addr))?;
    info!(
        address = %web_addr,
        snippets = service.store().len(),
        "Snippet search available at http://{}",
        web_addr
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    telemetry::shutdown_telemetry(&telemetry_config);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
