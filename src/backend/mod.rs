//! Search-index backend abstraction.
//!
//! The [`SearchBackend`] trait is the write/admin surface the pipeline and the
//! swap protocol need from a full-text search engine: physical indices, bulk
//! writes, counts, aggregations and an alias that can be repointed
//! atomically.
//!
//! | Implementation | Purpose |
//! |----------------|---------|
//! | [`elastic::ElasticBackend`] | Elasticsearch over HTTP |
//! | [`memory::InMemoryBackend`] | dry runs and tests |

pub mod elastic;
pub mod memory;
pub mod schema;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::Document;

/// Result of one bulk write. Items are reported individually by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub indexed: usize,
    pub failures: Vec<BulkFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub id: String,
    pub reason: String,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Parameters for a full-text query against an alias or index.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub project: Option<String>,
    pub limit: usize,
}

/// Document count for one value of a keyword field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermCount {
    pub key: String,
    pub count: u64,
}

/// Min/max/avg/sum over the `size` field. All zero for an empty index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SizeStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sum: f64,
}

/// Aggregations over everything behind an alias. Buckets are ordered by
/// count, highest first, then by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub by_project: Vec<TermCount>,
    pub by_extension: Vec<TermCount>,
    pub by_language: Vec<TermCount>,
    pub size: SizeStats,
}

/// Bucket limits for [`IndexStats`].
pub const PROJECT_BUCKETS: usize = 50;
pub const EXTENSION_BUCKETS: usize = 20;
pub const LANGUAGE_BUCKETS: usize = 20;

/// One search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f64,
    pub document: Document,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Create an empty physical index with the given settings and mappings.
    async fn create_index(&self, name: &str, schema: &serde_json::Value) -> Result<()>;

    /// Write `docs` into `index` in a single request.
    async fn bulk_index(&self, index: &str, docs: &[Document]) -> Result<BulkOutcome>;

    /// Number of documents visible in `index`.
    async fn count(&self, index: &str) -> Result<u64>;

    /// Physical indices currently behind `alias`, sorted. Empty when the
    /// alias does not exist.
    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>>;

    /// In one atomic request, remove `alias` from every index in `remove`
    /// and add it to `add`.
    async fn update_aliases(&self, alias: &str, remove: &[String], add: &str) -> Result<()>;

    /// Delete physical indices. An empty slice is a no-op.
    async fn delete_indices(&self, names: &[String]) -> Result<()>;

    /// Full-text query over `target` (an alias or index).
    async fn search(&self, target: &str, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    /// Counts by project, extension and language plus size statistics over
    /// `target`, optionally limited to one project.
    async fn stats(&self, target: &str, project: Option<&str>) -> Result<IndexStats>;
}
