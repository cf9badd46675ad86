//! Zero-downtime re-indexing.
//!
//! Each cycle builds a complete new generation next to the live one and only
//! then moves the alias:
//!
//! ```text
//! Created ──▶ Populating ──▶ Verifying ──▶ Swapped ──▶ Cleaned
//!    │            │                           │
//!    └────────────┴──────────▶ Failed ◀───────┘
//! ```
//!
//! - **Created**: a new physical index `{alias}-{micros}` with the fixed
//!   schema. Nothing old has been touched yet.
//! - **Populating**: one full scan into the new index. On failure or
//!   cancellation the new index is left in place for inspection and the
//!   alias is not moved.
//! - **Verifying**: document count, logged only. An empty generation is
//!   still allowed through.
//! - **Swapped**: the previous alias targets are resolved, then removed and
//!   the new index added in a single `update_aliases` request.
//! - **Cleaned**: previous targets are deleted one request per index, so a
//!   failure names the generation it concerns. Failures are logged and
//!   reported but never undo the swap.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::elastic::ElasticBackend;
use crate::backend::memory::InMemoryBackend;
use crate::backend::schema::index_schema;
use crate::backend::SearchBackend;
use crate::config::Config;
use crate::discover::ProjectDiscoverer;
use crate::document::DocumentBuilder;
use crate::error::{SwapError, SwapState};
use crate::filter::PathFilter;
use crate::models::ScanReport;
use crate::progress::{format_number, ScanProgressReporter};
use crate::scan::ScanCoordinator;
use crate::sink::SearchIndexSink;

static LAST_GENERATION: AtomicI64 = AtomicI64::new(0);

/// `{alias}-{unix micros}`, strictly increasing within the process.
pub fn generation_name(alias: &str) -> String {
    let now = chrono::Utc::now().timestamp_micros();
    let mut last = LAST_GENERATION.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_GENERATION.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return format!("{}-{}", alias, next),
            Err(current) => last = current,
        }
    }
}

/// Outcome of a successful cycle.
#[derive(Debug, Clone)]
pub struct SwapReport {
    pub alias: String,
    /// Generation now behind the alias.
    pub index: String,
    pub scan: ScanReport,
    /// Count observed while verifying; `None` when the count query failed.
    pub document_count: Option<u64>,
    /// Generations the alias pointed at before the swap.
    pub previous: Vec<String>,
    /// Previous generations that could not be deleted.
    pub cleanup_errors: Vec<String>,
    pub transitions: Vec<SwapState>,
}

pub struct IndexSwapCoordinator {
    backend: Arc<dyn SearchBackend>,
    alias: String,
    schema: Value,
    cancel: CancellationToken,
}

impl IndexSwapCoordinator {
    pub fn new(backend: Arc<dyn SearchBackend>, alias: impl Into<String>) -> Self {
        Self {
            backend,
            alias: alias.into(),
            schema: index_schema(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one full cycle: build a new generation from every project under
    /// `root`, then move the alias to it.
    pub async fn run(
        &self,
        scanner: &ScanCoordinator,
        discoverer: &ProjectDiscoverer,
        root: &Path,
    ) -> Result<SwapReport, SwapError> {
        let mut transitions = Vec::new();

        // Created
        if self.cancel.is_cancelled() {
            return Err(self.fail(SwapState::Created, None, anyhow::anyhow!("cancelled")));
        }
        let index = generation_name(&self.alias);
        self.backend
            .create_index(&index, &self.schema)
            .await
            .map_err(|e| self.fail(SwapState::Created, None, e))?;
        self.enter(&mut transitions, SwapState::Created, &index);

        // Populating
        self.enter(&mut transitions, SwapState::Populating, &index);
        let sink = Arc::new(SearchIndexSink::new(self.backend.clone(), index.clone()));
        let scan = match scanner.scan_root(root, discoverer, sink).await {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    index = %index,
                    alias = %self.alias,
                    "population failed, new generation left orphaned and alias unchanged"
                );
                return Err(self.fail(SwapState::Populating, Some(index), e));
            }
        };

        // Verifying
        self.enter(&mut transitions, SwapState::Verifying, &index);
        let document_count = match self.backend.count(&index).await {
            Ok(count) => {
                info!(
                    index = %index,
                    count,
                    written = scan.documents_written,
                    "generation populated"
                );
                if count == 0 {
                    warn!(index = %index, "new generation is empty");
                }
                Some(count)
            }
            Err(e) => {
                warn!(index = %index, error = %e, "could not count new generation, continuing");
                None
            }
        };

        if self.cancel.is_cancelled() {
            warn!(index = %index, "cancelled before swap, alias unchanged");
            return Err(self.fail(
                SwapState::Verifying,
                Some(index),
                anyhow::anyhow!("cancelled"),
            ));
        }

        // Swapped
        let previous: Vec<String> = self
            .backend
            .alias_targets(&self.alias)
            .await
            .map_err(|e| self.fail(SwapState::Swapped, Some(index.clone()), e))?
            .into_iter()
            .filter(|name| name != &index)
            .collect();
        if previous.len() > 1 {
            warn!(alias = %self.alias, targets = ?previous, "alias had several targets, removing all");
        }
        self.backend
            .update_aliases(&self.alias, &previous, &index)
            .await
            .map_err(|e| self.fail(SwapState::Swapped, Some(index.clone()), e))?;
        self.enter(&mut transitions, SwapState::Swapped, &index);

        // Cleaned
        let mut cleanup_errors = Vec::new();
        for old in &previous {
            if let Err(e) = self.backend.delete_indices(std::slice::from_ref(old)).await {
                warn!(index = %old, error = %e, "failed to delete previous generation");
                cleanup_errors.push(format!("{}: {}", old, e));
            }
        }
        self.enter(&mut transitions, SwapState::Cleaned, &index);

        Ok(SwapReport {
            alias: self.alias.clone(),
            index,
            scan,
            document_count,
            previous,
            cleanup_errors,
            transitions,
        })
    }

    fn enter(&self, transitions: &mut Vec<SwapState>, state: SwapState, index: &str) {
        info!(state = %state, index = %index, alias = %self.alias, "re-index");
        transitions.push(state);
    }

    fn fail(
        &self,
        phase: SwapState,
        index: Option<String>,
        source: impl Into<crate::error::BoxError>,
    ) -> SwapError {
        let err = SwapError::new(phase, index, source);
        warn!(state = %SwapState::Failed, alias = %self.alias, error = %err, "re-index");
        err
    }
}

/// `cbi index`: one full re-index cycle of `root` into Elasticsearch, or
/// into an in-memory backend when `dry_run` is set.
pub async fn run_reindex(
    config: &Config,
    root: &Path,
    dry_run: bool,
    cancel: CancellationToken,
    progress: Arc<dyn ScanProgressReporter>,
) -> Result<SwapReport> {
    if !root.is_dir() {
        bail!("Scan root does not exist or is not a directory: {}", root.display());
    }

    let backend: Arc<dyn SearchBackend> = if dry_run {
        Arc::new(InMemoryBackend::new())
    } else {
        Arc::new(ElasticBackend::new(&config.search)?)
    };

    let builder = DocumentBuilder::new(&config.chunking)?;
    let scanner = ScanCoordinator::from_config(config, builder)?
        .with_progress(progress)
        .with_cancellation(cancel.clone());
    let discoverer = ProjectDiscoverer::new(PathFilter::from_config(&config.scan)?)
        .follow_symlinks(config.scan.follow_symlinks);

    let coordinator =
        IndexSwapCoordinator::new(backend, config.search.alias.clone()).with_cancellation(cancel);
    let report = coordinator.run(&scanner, &discoverer, root).await?;

    print_report(&report, dry_run);
    Ok(report)
}

fn print_report(report: &SwapReport, dry_run: bool) {
    if dry_run {
        println!("Dry run (in-memory backend):");
    } else {
        println!("Re-indexed:");
    }
    println!("  alias: {} → {}", report.alias, report.index);
    println!("  projects: {}", report.scan.projects);
    println!("  files scanned: {}", format_number(report.scan.files_scanned));
    println!("  files skipped: {}", format_number(report.scan.files_skipped));
    println!(
        "  documents written: {}",
        format_number(report.scan.documents_written)
    );
    match report.document_count {
        Some(count) => println!("  index count: {}", format_number(count)),
        None => println!("  index count: unknown"),
    }
    if report.previous.is_empty() {
        println!("  previous generations: none");
    } else {
        println!("  previous generations: {}", report.previous.join(", "));
    }
    for err in &report.cleanup_errors {
        println!("  cleanup failed: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_names_are_prefixed_and_increasing() {
        let names: Vec<String> = (0..50).map(|_| generation_name("codebase")).collect();
        let stamps: Vec<i64> = names
            .iter()
            .map(|n| {
                assert!(n.starts_with("codebase-"));
                n["codebase-".len()..].parse().unwrap()
            })
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }
}
