use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use codebase_indexer::backend::memory::InMemoryBackend;
use codebase_indexer::backend::{BulkOutcome, IndexStats, SearchBackend, SearchHit, SearchQuery};
use codebase_indexer::config::Config;
use codebase_indexer::discover::ProjectDiscoverer;
use codebase_indexer::document::DocumentBuilder;
use codebase_indexer::error::SwapState;
use codebase_indexer::filter::PathFilter;
use codebase_indexer::models::{Document, DocumentKind};
use codebase_indexer::reindex::IndexSwapCoordinator;
use codebase_indexer::scan::ScanCoordinator;

/// In-memory backend whose individual operations can be made to fail.
#[derive(Default)]
struct FlakyBackend {
    inner: InMemoryBackend,
    fail_create: AtomicBool,
    fail_bulk: AtomicBool,
    fail_delete: AtomicBool,
}

#[async_trait]
impl SearchBackend for FlakyBackend {
    async fn create_index(&self, name: &str, schema: &Value) -> Result<()> {
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("cluster is read-only");
        }
        self.inner.create_index(name, schema).await
    }

    async fn bulk_index(&self, index: &str, docs: &[Document]) -> Result<BulkOutcome> {
        if self.fail_bulk.load(Ordering::SeqCst) {
            bail!("bulk rejected: 429 Too Many Requests");
        }
        self.inner.bulk_index(index, docs).await
    }

    async fn count(&self, index: &str) -> Result<u64> {
        self.inner.count(index).await
    }

    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>> {
        self.inner.alias_targets(alias).await
    }

    async fn update_aliases(&self, alias: &str, remove: &[String], add: &str) -> Result<()> {
        self.inner.update_aliases(alias, remove, add).await
    }

    async fn delete_indices(&self, names: &[String]) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            bail!("delete timed out");
        }
        self.inner.delete_indices(names).await
    }

    async fn search(&self, target: &str, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.inner.search(target, query).await
    }

    async fn stats(&self, target: &str, project: Option<&str>) -> Result<IndexStats> {
        self.inner.stats(target, project).await
    }
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn config(workers: usize, batch_size: usize) -> Config {
    let mut config = Config::default();
    config.pipeline.workers = Some(workers);
    config.pipeline.batch_size = batch_size;
    config
}

fn scanner(config: &Config) -> (ScanCoordinator, ProjectDiscoverer) {
    let builder = DocumentBuilder::new(&config.chunking).unwrap();
    let scanner = ScanCoordinator::from_config(config, builder).unwrap();
    let discoverer = ProjectDiscoverer::new(PathFilter::from_config(&config.scan).unwrap());
    (scanner, discoverer)
}

/// `api/` with a 2 KB `a.go` and a 120 KB `b.go`.
fn two_file_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write(&tmp.path().join("api/go.mod"), "module api\n");
    write(&tmp.path().join("api/a.go"), &"a".repeat(2_000));
    write(&tmp.path().join("api/b.go"), &"b".repeat(120_000));
    tmp
}

#[tokio::test]
async fn small_file_is_one_document_large_file_is_chunked() {
    let tmp = two_file_project();
    let config = config(4, 5);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(InMemoryBackend::new());

    let report = IndexSwapCoordinator::new(backend.clone(), "codebase")
        .run(&scanner, &discoverer, tmp.path())
        .await
        .unwrap();

    let docs = backend.documents(&report.index);
    let a: Vec<&Document> = docs.iter().filter(|d| d.rel_path == "a.go").collect();
    let b: Vec<&Document> = docs.iter().filter(|d| d.rel_path == "b.go").collect();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].kind, DocumentKind::File);
    // ceil((120000 - 200) / (4000 - 200))
    assert_eq!(b.len(), 32);
    assert!(b.iter().all(|d| d.kind == DocumentKind::Chunk));
    assert!(a.iter().chain(b.iter()).all(|d| d.language == "go"));
    assert!(b.iter().all(|d| d.content.chars().count() <= 4000));

    let mut indices: Vec<usize> = b.iter().filter_map(|d| d.chunk_index).collect();
    indices.sort();
    assert_eq!(indices, (0..32).collect::<Vec<_>>());

    // 33 file documents plus the table of contents
    assert_eq!(report.scan.documents_written, 34);
    assert_eq!(report.document_count, Some(34));
    assert_eq!(
        report.transitions,
        vec![
            SwapState::Created,
            SwapState::Populating,
            SwapState::Verifying,
            SwapState::Swapped,
            SwapState::Cleaned,
        ]
    );
}

#[tokio::test]
async fn alias_points_at_exactly_the_new_generation() {
    let tmp = two_file_project();
    let config = config(2, 3);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(InMemoryBackend::new());

    let report = IndexSwapCoordinator::new(backend.clone(), "codebase")
        .run(&scanner, &discoverer, tmp.path())
        .await
        .unwrap();

    assert!(report.index.starts_with("codebase-"));
    assert_eq!(
        backend.alias_targets("codebase").await.unwrap(),
        vec![report.index.clone()]
    );
    assert!(report.previous.is_empty());
}

#[tokio::test]
async fn consecutive_cycles_leave_one_live_generation() {
    let tmp = two_file_project();
    let config = config(3, 7);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(InMemoryBackend::new());
    let coordinator = IndexSwapCoordinator::new(backend.clone(), "codebase");

    let first = coordinator.run(&scanner, &discoverer, tmp.path()).await.unwrap();
    let second = coordinator.run(&scanner, &discoverer, tmp.path()).await.unwrap();

    assert_ne!(first.index, second.index);
    assert_eq!(second.previous, vec![first.index.clone()]);
    assert_eq!(backend.indices(), vec![second.index.clone()]);
    assert_eq!(
        backend.alias_targets("codebase").await.unwrap(),
        vec![second.index.clone()]
    );
    assert_eq!(backend.count(&second.index).await.unwrap(), 34);
}

#[tokio::test]
async fn failed_population_keeps_previous_alias_and_orphans_new_index() {
    let tmp = two_file_project();
    let config = config(2, 4);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(FlakyBackend::default());
    let coordinator = IndexSwapCoordinator::new(backend.clone(), "codebase");

    let live = coordinator.run(&scanner, &discoverer, tmp.path()).await.unwrap();

    backend.fail_bulk.store(true, Ordering::SeqCst);
    let err = coordinator
        .run(&scanner, &discoverer, tmp.path())
        .await
        .unwrap_err();

    assert_eq!(err.phase, SwapState::Populating);
    let orphan = err.index.clone().expect("generation was created");
    assert_eq!(
        backend.alias_targets("codebase").await.unwrap(),
        vec![live.index.clone()]
    );
    let mut expected = vec![live.index.clone(), orphan];
    expected.sort();
    assert_eq!(backend.inner.indices(), expected);
    assert_eq!(backend.count(&live.index).await.unwrap(), 34);
}

#[tokio::test]
async fn create_failure_touches_nothing() {
    let tmp = two_file_project();
    let config = config(2, 4);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(FlakyBackend::default());
    let coordinator = IndexSwapCoordinator::new(backend.clone(), "codebase");

    let live = coordinator.run(&scanner, &discoverer, tmp.path()).await.unwrap();

    backend.fail_create.store(true, Ordering::SeqCst);
    let err = coordinator
        .run(&scanner, &discoverer, tmp.path())
        .await
        .unwrap_err();

    assert_eq!(err.phase, SwapState::Created);
    assert!(err.index.is_none());
    assert_eq!(backend.inner.indices(), vec![live.index.clone()]);
    assert_eq!(
        backend.alias_targets("codebase").await.unwrap(),
        vec![live.index]
    );
}

#[tokio::test]
async fn cleanup_failure_does_not_revert_swap() {
    let tmp = two_file_project();
    let config = config(2, 4);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(FlakyBackend::default());
    let coordinator = IndexSwapCoordinator::new(backend.clone(), "codebase");

    let first = coordinator.run(&scanner, &discoverer, tmp.path()).await.unwrap();

    backend.fail_delete.store(true, Ordering::SeqCst);
    let second = coordinator.run(&scanner, &discoverer, tmp.path()).await.unwrap();

    assert_eq!(second.cleanup_errors.len(), 1);
    assert!(second.cleanup_errors[0].starts_with(&first.index));
    assert_eq!(
        backend.alias_targets("codebase").await.unwrap(),
        vec![second.index.clone()]
    );
    assert!(backend.inner.indices().contains(&first.index));
}

#[tokio::test]
async fn cancelled_population_leaves_alias_unchanged() {
    let tmp = two_file_project();
    let config = config(2, 4);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(InMemoryBackend::new());

    let live = IndexSwapCoordinator::new(backend.clone(), "codebase")
        .run(&scanner, &discoverer, tmp.path())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let cancelled_scanner = {
        let builder = DocumentBuilder::new(&config.chunking).unwrap();
        ScanCoordinator::from_config(&config, builder)
            .unwrap()
            .with_cancellation(cancel)
    };
    let err = IndexSwapCoordinator::new(backend.clone(), "codebase")
        .run(&cancelled_scanner, &discoverer, tmp.path())
        .await
        .unwrap_err();

    assert_eq!(err.phase, SwapState::Populating);
    assert_eq!(
        backend.alias_targets("codebase").await.unwrap(),
        vec![live.index]
    );
}

#[tokio::test]
async fn empty_root_still_swaps() {
    let tmp = TempDir::new().unwrap();
    write(&tmp.path().join("assets/logo.png"), "binary");
    let config = config(2, 4);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(InMemoryBackend::new());

    let report = IndexSwapCoordinator::new(backend.clone(), "codebase")
        .run(&scanner, &discoverer, tmp.path())
        .await
        .unwrap();

    assert_eq!(report.document_count, Some(0));
    assert_eq!(
        backend.alias_targets("codebase").await.unwrap(),
        vec![report.index]
    );
}

#[tokio::test]
async fn every_stale_alias_target_is_replaced() {
    let tmp = two_file_project();
    let config = config(2, 4);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(InMemoryBackend::new());
    for name in ["codebase-1", "codebase-2"] {
        backend.create_index(name, &serde_json::json!({})).await.unwrap();
        backend.update_aliases("codebase", &[], name).await.unwrap();
    }

    let report = IndexSwapCoordinator::new(backend.clone(), "codebase")
        .run(&scanner, &discoverer, tmp.path())
        .await
        .unwrap();

    assert_eq!(report.previous, vec!["codebase-1", "codebase-2"]);
    assert_eq!(backend.indices(), vec![report.index.clone()]);
    assert_eq!(
        backend.alias_targets("codebase").await.unwrap(),
        vec![report.index]
    );
}

#[tokio::test]
async fn searches_through_alias_after_swap() {
    let tmp = TempDir::new().unwrap();
    write(&tmp.path().join("api/go.mod"), "module api\n");
    write(
        &tmp.path().join("api/auth/token.go"),
        "package auth\n\nfunc RefreshToken() {}\n",
    );
    write(&tmp.path().join("web/package.json"), "{}");
    write(
        &tmp.path().join("web/src/token.ts"),
        "export function refreshToken() {}\n",
    );

    let config = config(2, 2);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(InMemoryBackend::new());
    IndexSwapCoordinator::new(backend.clone(), "codebase")
        .run(&scanner, &discoverer, tmp.path())
        .await
        .unwrap();

    let hits = codebase_indexer::search::search_alias(
        backend.as_ref(),
        "codebase",
        "refreshtoken",
        Some("api".to_string()),
        10,
    )
    .await
    .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.rel_path, "auth/token.go");
    assert!(!hits[0].document.is_test);
}

#[tokio::test]
async fn projects_sharing_a_name_keep_their_own_documents() {
    let tmp = TempDir::new().unwrap();
    for dir in ["apps/api", "services/api"] {
        write(&tmp.path().join(dir).join("go.mod"), "module api\n");
        write(
            &tmp.path().join(dir).join("main.go"),
            &format!("package main // {}\n", dir),
        );
    }
    let config = config(2, 1);
    let (scanner, discoverer) = scanner(&config);
    let backend = Arc::new(InMemoryBackend::new());

    let report = IndexSwapCoordinator::new(backend.clone(), "codebase")
        .run(&scanner, &discoverer, tmp.path())
        .await
        .unwrap();

    // two main.go files + two tables of contents
    assert_eq!(report.scan.projects, 2);
    assert_eq!(report.scan.documents_written, 4);
    assert_eq!(report.document_count, Some(4));

    let docs = backend.documents(&report.index);
    assert!(docs.iter().all(|d| d.project == "api"));
    let mut keys: Vec<&str> = docs
        .iter()
        .filter(|d| d.kind == DocumentKind::File)
        .map(|d| d.project_path.as_str())
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["apps/api", "services/api"]);
    assert!(docs
        .iter()
        .any(|d| d.content.contains("// services/api")));
}
