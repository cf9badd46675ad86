//! Concurrent scan pipeline.
//!
//! ```text
//!  walk thread (spawn_blocking)          worker tasks (tokio)
//!  ┌──────────────────────────┐          ┌───────────────────┐
//!  │ discover → filter → build│──mpsc──▶ │ batch → sink.flush│ × N
//!  └──────────────────────────┘ bounded  └───────────────────┘
//! ```
//!
//! The walk is single-threaded and blocks when the queue is full, so a slow
//! sink slows the walk instead of growing memory. Workers share one
//! receiver, each keeps its own batch, and each flushes its partial batch
//! when the queue closes.
//!
//! A failed flush stops only that worker. Its siblings keep draining, the
//! first error is kept in a single mutex-guarded slot, and it is returned
//! once every worker has finished. A panicked worker is reported the same
//! way, after its siblings. Documents from different files may be
//! written in any order; chunks of one file are enqueued in order.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, PipelineConfig};
use crate::discover::ProjectDiscoverer;
use crate::document::{relative_path, DocumentBuilder};
use crate::error::ScanError;
use crate::filter::{extension_of, PathFilter};
use crate::models::{Document, ProjectRoot, ScanReport};
use crate::progress::{NoProgress, ScanProgressEvent, ScanProgressReporter};
use crate::sink::BatchSink;

/// Sizing of the worker pool and the queue in front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub queue_capacity: usize,
}

impl ScanOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            workers: config.worker_count().max(1),
            batch_size: config.batch_size.max(1),
            queue_capacity: config.queue_capacity().max(1),
        }
    }
}

#[derive(Default)]
struct Counters {
    projects: AtomicU64,
    files_scanned: AtomicU64,
    files_skipped: AtomicU64,
    documents_enqueued: AtomicU64,
    documents_written: AtomicU64,
    batches_flushed: AtomicU64,
    failed_batches: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ScanReport {
        ScanReport {
            projects: self.projects.load(Ordering::Relaxed),
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            documents_enqueued: self.documents_enqueued.load(Ordering::Relaxed),
            documents_written: self.documents_written.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
        }
    }
}

enum ProjectSource {
    One(ProjectRoot),
    Discover {
        root: PathBuf,
        discoverer: ProjectDiscoverer,
    },
}

pub struct ScanCoordinator {
    filter: PathFilter,
    builder: DocumentBuilder,
    options: ScanOptions,
    follow_symlinks: bool,
    progress: Arc<dyn ScanProgressReporter>,
    cancel: CancellationToken,
}

impl ScanCoordinator {
    pub fn new(filter: PathFilter, builder: DocumentBuilder, options: ScanOptions) -> Self {
        Self {
            filter,
            builder,
            options,
            follow_symlinks: false,
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &Config, builder: DocumentBuilder) -> Result<Self> {
        Ok(Self::new(
            PathFilter::from_config(&config.scan)?,
            builder,
            ScanOptions::from_config(&config.pipeline),
        )
        .follow_symlinks(config.scan.follow_symlinks))
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ScanProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Stops the walk and the workers when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> ScanOptions {
        self.options
    }

    /// Scan a single project into `sink`.
    pub async fn scan(
        &self,
        project: &ProjectRoot,
        sink: Arc<dyn BatchSink>,
    ) -> Result<ScanReport, ScanError> {
        self.run(ProjectSource::One(project.clone()), sink).await
    }

    /// Scan every project discovered under `root`. When no project marker
    /// is found anywhere, `root` itself is scanned as one project.
    pub async fn scan_root(
        &self,
        root: &Path,
        discoverer: &ProjectDiscoverer,
        sink: Arc<dyn BatchSink>,
    ) -> Result<ScanReport, ScanError> {
        let source = ProjectSource::Discover {
            root: root.to_path_buf(),
            discoverer: discoverer.clone(),
        };
        self.run(source, sink).await
    }

    async fn run(
        &self,
        source: ProjectSource,
        sink: Arc<dyn BatchSink>,
    ) -> Result<ScanReport, ScanError> {
        let counters = Arc::new(Counters::default());
        let first_error: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));

        let (tx, rx) = mpsc::channel::<Document>(self.options.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(self.options.workers);
        for id in 0..self.options.workers {
            let worker = Worker {
                id,
                batch_size: self.options.batch_size,
                sink: sink.clone(),
                counters: counters.clone(),
                first_error: first_error.clone(),
                progress: self.progress.clone(),
                cancel: self.cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run(rx.clone())));
        }
        // Workers hold the only receivers, so the walk sees a closed
        // channel once all of them have stopped.
        drop(rx);

        let walker = Walker {
            filter: self.filter.clone(),
            builder: self.builder.clone(),
            follow_symlinks: self.follow_symlinks,
            counters: counters.clone(),
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
        };
        let walked = tokio::task::spawn_blocking(move || walker.run(source, tx)).await;

        let mut join_error = None;
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "scan worker panicked or was aborted");
                join_error.get_or_insert(e);
            }
        }
        if let Some(e) = join_error {
            return Err(ScanError::Worker(e));
        }
        walked?;

        let report = counters.snapshot();
        if self.cancel.is_cancelled() {
            return Err(ScanError::Cancelled { report });
        }
        let first = first_error.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(err) = first {
            return Err(ScanError::Sink {
                failed_batches: report.failed_batches,
                report,
                source: err.into(),
            });
        }

        info!(
            projects = report.projects,
            files = report.files_scanned,
            skipped = report.files_skipped,
            documents = report.documents_written,
            batches = report.batches_flushed,
            "scan complete"
        );
        Ok(report)
    }
}

/// Producer side. Runs on a blocking thread.
struct Walker {
    filter: PathFilter,
    builder: DocumentBuilder,
    follow_symlinks: bool,
    counters: Arc<Counters>,
    progress: Arc<dyn ScanProgressReporter>,
    cancel: CancellationToken,
}

impl Walker {
    fn run(&self, source: ProjectSource, tx: mpsc::Sender<Document>) {
        match source {
            ProjectSource::One(project) => {
                let _ = self.walk_project(&project, &tx);
            }
            ProjectSource::Discover { root, discoverer } => {
                let mut found = false;
                for project in discoverer.discover(&root) {
                    found = true;
                    if self.walk_project(&project, &tx).is_break() {
                        return;
                    }
                }
                if !found && !self.cancel.is_cancelled() {
                    info!(root = %root.display(), "no project markers found, scanning root as one project");
                    let path = std::fs::canonicalize(&root).unwrap_or(root);
                    let _ = self.walk_project(&ProjectRoot::new(path), &tx);
                }
            }
        }
    }

    /// Enqueue every document of one project, then its table of contents.
    /// Breaks when cancelled or when no worker is left to receive.
    fn walk_project(&self, project: &ProjectRoot, tx: &mpsc::Sender<Document>) -> ControlFlow<()> {
        self.counters.projects.fetch_add(1, Ordering::Relaxed);
        self.progress.report(ScanProgressEvent::Project {
            name: project.name.clone(),
        });
        info!(project = %project.name, path = %project.path.display(), "scanning project");

        let mut scanned: Vec<String> = Vec::new();
        let mut walker = WalkDir::new(&project.path)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            if self.cancel.is_cancelled() {
                return ControlFlow::Break(());
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                    warn!(project = %project.name, path = %path, error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            let relative = path.strip_prefix(&project.path).unwrap_or(path);

            if entry.file_type().is_dir() {
                if entry.depth() > 0 && !self.filter.should_descend(relative) {
                    walker.skip_current_dir();
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(extension) = extension_of(path) else {
                continue;
            };
            if !self.filter.should_process(relative, &extension) {
                continue;
            }

            let docs = match self.builder.build(project, path) {
                Ok(docs) => docs,
                Err(e) => {
                    self.counters.files_skipped.fetch_add(1, Ordering::Relaxed);
                    warn!(project = %project.name, error = %e, "skipping file");
                    continue;
                }
            };
            self.counters.files_scanned.fetch_add(1, Ordering::Relaxed);
            scanned.push(relative_path(&project.path, path));

            for doc in docs {
                self.send(tx, doc)?;
            }
        }

        if !scanned.is_empty() {
            let toc = self.builder.table_of_contents(project, &scanned);
            self.send(tx, toc)?;
        }
        debug!(project = %project.name, files = scanned.len(), "project walk finished");
        ControlFlow::Continue(())
    }

    fn send(&self, tx: &mpsc::Sender<Document>, doc: Document) -> ControlFlow<()> {
        if self.cancel.is_cancelled() {
            return ControlFlow::Break(());
        }
        if tx.blocking_send(doc).is_err() {
            warn!("all workers stopped, ending walk");
            return ControlFlow::Break(());
        }
        self.counters.documents_enqueued.fetch_add(1, Ordering::Relaxed);
        ControlFlow::Continue(())
    }
}

/// Consumer side. One per pool slot.
struct Worker {
    id: usize,
    batch_size: usize,
    sink: Arc<dyn BatchSink>,
    counters: Arc<Counters>,
    first_error: Arc<Mutex<Option<anyhow::Error>>>,
    progress: Arc<dyn ScanProgressReporter>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Document>>>) {
        let mut batch: Vec<Document> = Vec::with_capacity(self.batch_size);

        loop {
            let next = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    doc = rx.recv() => doc,
                }
            };
            let Some(doc) = next else {
                break;
            };

            batch.push(doc);
            if batch.len() >= self.batch_size && !self.flush(&mut batch).await {
                return;
            }
        }

        if self.cancel.is_cancelled() {
            if !batch.is_empty() {
                debug!(worker = self.id, dropped = batch.len(), "cancelled, partial batch abandoned");
            }
            return;
        }
        if !batch.is_empty() {
            self.flush(&mut batch).await;
        }
    }

    /// Write and clear `batch`. False means this worker must stop.
    async fn flush(&self, batch: &mut Vec<Document>) -> bool {
        let size = batch.len() as u64;
        match self.sink.flush(batch).await {
            Ok(()) => {
                batch.clear();
                self.counters.batches_flushed.fetch_add(1, Ordering::Relaxed);
                let written = self
                    .counters
                    .documents_written
                    .fetch_add(size, Ordering::Relaxed)
                    + size;
                self.progress.report(ScanProgressEvent::Flushed { written });
                true
            }
            Err(e) => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                warn!(worker = self.id, documents = size, error = %e, "batch write failed, worker stopping");
                let mut slot = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
                if slot.is_none() {
                    *slot = Some(e);
                }
                false
            }
        }
    }
}
