//! Snippet Search command line tool
//!
//! Builds the index cache ahead of time, runs one-off queries against it and
//! prints store statistics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snippet_search::config::{Config, TelemetryConfig};
use snippet_search::corpus::DifficultyFilter;
use snippet_search::index::View;
use snippet_search::search::SearchService;
use snippet_search::telemetry;
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "snippet_search")]
#[command(author, version, about = "Build and query code snippet indexes", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Corpus JSON Lines file (overrides config file)
    #[arg(long, value_name = "FILE", global = true)]
    corpus: Option<String>,

    /// Index cache directory (overrides config file)
    #[arg(long, value_name = "DIR", global = true)]
    cache_dir: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode the corpus and write all index artifacts
    Build {
        /// Rebuild even when a matching cache exists
        #[arg(long)]
        force: bool,
    },
    /// Search the indexes and print ranked snippets
    Query {
        /// Natural-language query
        text: String,

        /// View to search: question, code or tags (or 1, 2, 3)
        #[arg(short, long)]
        mode: Option<String>,

        /// Number of results before difficulty filtering
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// easy, medium, hard or all
        #[arg(short, long, default_value = "all")]
        difficulty: String,

        /// Print results as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print corpus and index statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    // Console only; span export is for the long-running server
    telemetry::init_telemetry(&TelemetryConfig::default(), log_level)?;

    let (config, _) = Config::load(cli.config.as_deref())?;
    let config = config.with_overrides(None, cli.corpus, cli.cache_dir);

    match cli.command {
        Command::Build { force } => build(&config, force),
        Command::Query {
            text,
            mode,
            top_k,
            difficulty,
            json,
        } => query(&config, &text, mode, top_k, &difficulty, json),
        Command::Stats => stats(&config),
    }
}

fn build(config: &Config, force: bool) -> Result<()> {
    if config.corpus.path.is_none() {
        anyhow::bail!("No corpus configured; pass --corpus or set [corpus] path");
    }
    let mut options = config.index.build_options();
    options.force_rebuild = force;
    options.show_progress = true;

    let service = SearchService::from_config(config, options)?;
    let stats = service.store().stats();
    println!(
        "✓ Indexed {} snippets ({} dimensions, model {}) into {}",
        stats.num_snippets, stats.embedding_dim, stats.model_id, stats.cache_dir
    );
    Ok(())
}

fn query(
    config: &Config,
    text: &str,
    mode: Option<String>,
    top_k: Option<usize>,
    difficulty: &str,
    json: bool,
) -> Result<()> {
    let mode: View = match mode {
        Some(m) => m.parse()?,
        None => config.index.default_mode,
    };
    let difficulty: DifficultyFilter = difficulty.parse()?;
    let top_k = top_k.unwrap_or(config.index.default_top_k);

    let service = SearchService::from_config(config, config.index.build_options())?;
    let results = service.search(text, mode, top_k, difficulty)?;

    if json {
        let out = serde_json::to_string_pretty(&results).context("Failed to serialize results")?;
        println!("{}", out);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
    }
    for r in &results {
        println!("Category: {}, Score: {:.3}", r.snippet.category, r.score);
        println!("Question: {}", r.snippet.question);
        println!("Difficulty: {}", r.snippet.difficulty);
        println!("Code:\n{}", r.snippet.code.replace("\\n", "\n"));
        println!("{}\n", "-".repeat(50));
    }
    Ok(())
}

fn stats(config: &Config) -> Result<()> {
    let service = SearchService::from_config(config, config.index.build_options())?;
    let stats = service.store().stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
