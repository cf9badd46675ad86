//! Batch destinations for the scan pipeline.
//!
//! A [`BatchSink`] receives the documents one worker has accumulated. The
//! pipeline does not care whether they land in a search index or a vector
//! store.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::backend::SearchBackend;
use crate::models::Document;
use crate::vector_store::VectorStore;

#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Write one batch. An error marks the whole batch as failed.
    async fn flush(&self, batch: &[Document]) -> Result<()>;
}

/// Bulk-writes batches into one physical search index.
pub struct SearchIndexSink {
    backend: Arc<dyn SearchBackend>,
    index: String,
}

impl SearchIndexSink {
    pub fn new(backend: Arc<dyn SearchBackend>, index: impl Into<String>) -> Self {
        Self {
            backend,
            index: index.into(),
        }
    }
}

#[async_trait]
impl BatchSink for SearchIndexSink {
    async fn flush(&self, batch: &[Document]) -> Result<()> {
        let outcome = self.backend.bulk_index(&self.index, batch).await?;
        if !outcome.is_complete() {
            for failure in outcome.failures.iter().take(5) {
                warn!(index = %self.index, id = %failure.id, reason = %failure.reason, "bulk item rejected");
            }
            bail!(
                "{} of {} documents rejected by '{}'",
                outcome.failures.len(),
                batch.len(),
                self.index
            );
        }
        Ok(())
    }
}

/// Embeds batches into a vector store.
pub struct VectorStoreSink {
    store: Arc<dyn VectorStore>,
}

impl VectorStoreSink {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BatchSink for VectorStoreSink {
    async fn flush(&self, batch: &[Document]) -> Result<()> {
        self.store.add_documents(batch).await?;
        Ok(())
    }
}
