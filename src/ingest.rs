//! Vector-store ingest.
//!
//! Same scan pipeline as the search index, but documents carry the
//! self-describing header and land in the SQLite vector store through
//! [`VectorStoreSink`]. The collection is cleared first unless
//! `vector.pre_delete_collection` is off.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db;
use crate::discover::ProjectDiscoverer;
use crate::document::DocumentBuilder;
use crate::embedding::{create_embedder, Embedder};
use crate::filter::PathFilter;
use crate::models::ScanReport;
use crate::progress::{format_number, ScanProgressReporter};
use crate::scan::ScanCoordinator;
use crate::sink::VectorStoreSink;
use crate::vector_store::SqliteVectorStore;

/// Open the configured vector store with the configured embedder.
pub async fn open_store(config: &Config) -> Result<SqliteVectorStore> {
    if !config.embedding.is_enabled() {
        bail!("Embeddings are disabled (embedding.provider = \"disabled\")");
    }
    let embedder = create_embedder(&config.embedding)?;
    open_store_with(config, embedder).await
}

/// Like [`open_store`] with an explicit embedder.
pub async fn open_store_with(
    config: &Config,
    embedder: Arc<dyn Embedder>,
) -> Result<SqliteVectorStore> {
    let pool = db::connect(&config.vector.db_path)
        .await
        .with_context(|| format!("Failed to open {}", config.vector.db_path.display()))?;
    SqliteVectorStore::open(
        pool,
        &config.vector.collection,
        embedder,
        config.embedding.batch_size,
    )
    .await
}

/// `cbi ingest`: embed every project under `root` into the vector store.
pub async fn run_ingest(
    config: &Config,
    root: &Path,
    cancel: CancellationToken,
    progress: Arc<dyn ScanProgressReporter>,
) -> Result<ScanReport> {
    let store = Arc::new(open_store(config).await?);
    let report = ingest_into(config, root, store.clone(), cancel, progress).await?;

    println!("ingest {}", root.display());
    println!("  collection: {}", store.collection());
    println!("  projects: {}", report.projects);
    println!("  files scanned: {}", format_number(report.files_scanned));
    println!("  files skipped: {}", format_number(report.files_skipped));
    println!(
        "  documents embedded: {}",
        format_number(report.documents_written)
    );
    println!("  stored vectors: {}", format_number(store.count().await?));
    println!("ok");
    Ok(report)
}

/// Scan `root` into `store`. Separated from [`run_ingest`] so callers can
/// supply their own store.
pub async fn ingest_into(
    config: &Config,
    root: &Path,
    store: Arc<SqliteVectorStore>,
    cancel: CancellationToken,
    progress: Arc<dyn ScanProgressReporter>,
) -> Result<ScanReport> {
    if !root.is_dir() {
        bail!("Scan root does not exist or is not a directory: {}", root.display());
    }

    if config.vector.pre_delete_collection {
        store.delete_collection().await?;
    }

    let builder = DocumentBuilder::new(&config.chunking)?.with_embedded_header(true);
    let scanner = ScanCoordinator::from_config(config, builder)?
        .with_progress(progress)
        .with_cancellation(cancel);
    let discoverer = ProjectDiscoverer::new(PathFilter::from_config(&config.scan)?)
        .follow_symlinks(config.scan.follow_symlinks);

    let report = scanner
        .scan_root(root, &discoverer, Arc::new(VectorStoreSink::new(store)))
        .await?;
    Ok(report)
}

/// `cbi similar`: nearest stored chunks to `query`.
pub async fn run_similar(config: &Config, query: &str, k: usize) -> Result<()> {
    let store = open_store(config).await?;
    let matches = store.similarity_search(query, k).await?;

    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        let project = m.metadata["project"].as_str().unwrap_or("");
        let path = m.metadata["path"].as_str().unwrap_or("");
        println!("{}. [{:.3}] {} / {}", i + 1, m.score, project, path);
        let excerpt: String = m
            .content
            .lines()
            .filter(|l| !l.starts_with("// "))
            .collect::<Vec<_>>()
            .join(" ");
        let excerpt: String = excerpt.chars().take(160).collect();
        println!("    excerpt: \"{}\"", excerpt.trim());
        println!();
    }
    Ok(())
}
