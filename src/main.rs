//! # Codebase Indexer CLI (`cbi`)
//!
//! ## Usage
//!
//! ```bash
//! cbi [--config ./config/cbi.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cbi projects` | List the projects a scan would cover |
//! | `cbi index` | Re-index into a new generation and move the alias |
//! | `cbi search "<query>"` | Full-text search through the alias |
//! | `cbi stats` | Document counts and sizes behind the alias |
//! | `cbi ingest` | Embed every project into the vector store |
//! | `cbi similar "<query>"` | Nearest chunks from the vector store |
//!
//! Logs go to stderr and are filtered by `RUST_LOG`, falling back to
//! `--log-level`. Ctrl-C cancels a running scan; an interrupted `index`
//! leaves the alias where it was.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use codebase_indexer::config::{self, Config};
use codebase_indexer::discover;
use codebase_indexer::ingest;
use codebase_indexer::progress::{ProgressMode, ScanProgressReporter};
use codebase_indexer::reindex;
use codebase_indexer::search;
use codebase_indexer::stats;

/// Codebase Indexer: scan source projects into a search index or a vector
/// store, replacing live indices without downtime.
#[derive(Parser)]
#[command(name = "cbi", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Progress on stderr: off, human or json. Defaults to human on a TTY.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    /// Worker count, overriding `pipeline.workers`.
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Documents per bulk write, overriding `pipeline.batch_size`.
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every project root discovered under the scan root.
    Projects {
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Build a new index generation and atomically move the alias to it.
    ///
    /// The previous generation stays live until the new one is complete.
    /// On failure the new generation is left for inspection and the alias
    /// is untouched.
    Index {
        #[arg(long)]
        root: Option<PathBuf>,

        /// Elasticsearch URL, overriding `search.url`.
        #[arg(long)]
        es_url: Option<String>,

        /// Alias to swap, overriding `search.alias`.
        #[arg(long)]
        alias: Option<String>,

        /// Run the full cycle against an in-memory backend.
        #[arg(long)]
        dry_run: bool,
    },

    /// Full-text search through the alias.
    Search {
        query: String,

        /// Only return documents from this project.
        #[arg(long)]
        project: Option<String>,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        es_url: Option<String>,

        #[arg(long)]
        alias: Option<String>,
    },

    /// Document counts by project, extension and language, and size stats.
    Stats {
        /// Only include this project.
        #[arg(long, short = 'p')]
        project: Option<String>,

        #[arg(long)]
        es_url: Option<String>,

        #[arg(long)]
        alias: Option<String>,
    },

    /// Embed every project under the root into the vector store.
    Ingest {
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Nearest chunks to a query from the vector store.
    Similar {
        query: String,

        #[arg(long, short = 'k', default_value_t = 5)]
        k: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let mut cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    if let Some(workers) = cli.workers {
        cfg.pipeline.workers = Some(workers);
    }
    if let Some(batch_size) = cli.batch_size {
        cfg.pipeline.batch_size = batch_size;
    }

    let progress: Arc<dyn ScanProgressReporter> = Arc::from(
        cli.progress
            .unwrap_or_else(ProgressMode::default_for_tty)
            .reporter(),
    );

    match cli.command {
        Commands::Projects { root } => {
            cfg.validate()?;
            let root = resolve_root(root, &cfg)?;
            discover::list_projects(&cfg, &root)?;
        }
        Commands::Index {
            root,
            es_url,
            alias,
            dry_run,
        } => {
            apply_search_overrides(&mut cfg, es_url, alias);
            cfg.validate()?;
            let root = resolve_root(root, &cfg)?;
            let cancel = cancel_on_ctrl_c();
            reindex::run_reindex(&cfg, &root, dry_run, cancel, progress).await?;
        }
        Commands::Search {
            query,
            project,
            limit,
            es_url,
            alias,
        } => {
            apply_search_overrides(&mut cfg, es_url, alias);
            cfg.validate()?;
            search::run_search(&cfg, &query, project, limit).await?;
        }
        Commands::Stats {
            project,
            es_url,
            alias,
        } => {
            apply_search_overrides(&mut cfg, es_url, alias);
            cfg.validate()?;
            stats::run_stats(&cfg, project).await?;
        }
        Commands::Ingest { root } => {
            cfg.validate()?;
            let root = resolve_root(root, &cfg)?;
            let cancel = cancel_on_ctrl_c();
            ingest::run_ingest(&cfg, &root, cancel, progress).await?;
        }
        Commands::Similar { query, k } => {
            cfg.validate()?;
            ingest::run_similar(&cfg, &query, k).await?;
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn apply_search_overrides(cfg: &mut Config, es_url: Option<String>, alias: Option<String>) {
    if let Some(url) = es_url {
        cfg.search.url = url;
    }
    if let Some(alias) = alias {
        cfg.search.alias = alias;
    }
}

/// `--root`, then `scan.root`, then the working directory.
fn resolve_root(flag: Option<PathBuf>, cfg: &Config) -> Result<PathBuf> {
    let root = flag
        .or_else(|| cfg.scan.root.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    canonical(&root)
}

fn canonical(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path)
        .with_context(|| format!("Scan root not found: {}", path.display()))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
    cancel
}
