//! In-memory [`SearchBackend`] for dry runs and tests.
//!
//! All state lives behind one `RwLock`, so alias updates are atomic the same
//! way they are on a real search engine: readers see either the old target
//! set or the new one. Search is a case-insensitive term count over content.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::Document;

use super::{
    BulkOutcome, IndexStats, SearchBackend, SearchHit, SearchQuery, SizeStats, TermCount,
    EXTENSION_BUCKETS, LANGUAGE_BUCKETS, PROJECT_BUCKETS,
};

#[derive(Default)]
struct State {
    indices: BTreeMap<String, BTreeMap<String, Document>>,
    aliases: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: RwLock<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every physical index, sorted.
    pub fn indices(&self) -> Vec<String> {
        self.read().indices.keys().cloned().collect()
    }

    /// Every document stored in `index`, ordered by id.
    pub fn documents(&self, index: &str) -> Vec<Document> {
        self.read()
            .indices
            .get(index)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn resolve<'a>(state: &'a State, target: &str) -> Vec<&'a BTreeMap<String, Document>> {
    if let Some(docs) = state.indices.get(target) {
        return vec![docs];
    }
    state
        .aliases
        .get(target)
        .map(|names| names.iter().filter_map(|n| state.indices.get(n)).collect())
        .unwrap_or_default()
}

/// Terms-aggregation ordering: count descending, then key.
fn top_terms<'a>(values: impl Iterator<Item = &'a str>, limit: usize) -> Vec<TermCount> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    let mut terms: Vec<TermCount> = counts
        .into_iter()
        .map(|(key, count)| TermCount {
            key: key.to_string(),
            count,
        })
        .collect();
    terms.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    terms.truncate(limit);
    terms
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn create_index(&self, name: &str, _schema: &serde_json::Value) -> Result<()> {
        let mut state = self.write();
        if state.indices.contains_key(name) || state.aliases.contains_key(name) {
            bail!("index '{}' already exists", name);
        }
        state.indices.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn bulk_index(&self, index: &str, docs: &[Document]) -> Result<BulkOutcome> {
        let mut state = self.write();
        let Some(stored) = state.indices.get_mut(index) else {
            bail!("no such index: '{}'", index);
        };
        for doc in docs {
            stored.insert(doc.id(), doc.clone());
        }
        Ok(BulkOutcome {
            indexed: docs.len(),
            failures: Vec::new(),
        })
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let state = self.read();
        match state.indices.get(index) {
            Some(docs) => Ok(docs.len() as u64),
            None => bail!("no such index: '{}'", index),
        }
    }

    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>> {
        Ok(self
            .read()
            .aliases
            .get(alias)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_aliases(&self, alias: &str, remove: &[String], add: &str) -> Result<()> {
        let mut state = self.write();
        if !state.indices.contains_key(add) {
            bail!("no such index: '{}'", add);
        }
        if state.indices.contains_key(alias) {
            bail!("'{}' is an index and cannot be used as an alias", alias);
        }
        let targets = state.aliases.entry(alias.to_string()).or_default();
        for name in remove {
            targets.remove(name);
        }
        targets.insert(add.to_string());
        Ok(())
    }

    async fn delete_indices(&self, names: &[String]) -> Result<()> {
        let mut state = self.write();
        if let Some(missing) = names.iter().find(|n| !state.indices.contains_key(*n)) {
            bail!("no such index: '{}'", missing);
        }
        for name in names {
            state.indices.remove(name);
            for targets in state.aliases.values_mut() {
                targets.remove(name);
            }
        }
        state.aliases.retain(|_, targets| !targets.is_empty());
        Ok(())
    }

    async fn search(&self, target: &str, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let terms: Vec<String> = query
            .text
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.read();
        let mut hits: Vec<SearchHit> = resolve(&state, target)
            .into_iter()
            .flat_map(|docs| docs.values())
            .filter(|doc| {
                query
                    .project
                    .as_deref()
                    .map_or(true, |p| doc.project.eq_ignore_ascii_case(p))
            })
            .filter_map(|doc| {
                let haystack = format!("{}\n{}", doc.name, doc.content).to_lowercase();
                if !terms.iter().all(|t| haystack.contains(t.as_str())) {
                    return None;
                }
                let score: usize = terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum();
                Some(SearchHit {
                    score: score as f64,
                    document: doc.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.rel_path.cmp(&b.document.rel_path))
        });
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn stats(&self, target: &str, project: Option<&str>) -> Result<IndexStats> {
        let state = self.read();
        let docs: Vec<&Document> = resolve(&state, target)
            .into_iter()
            .flat_map(|docs| docs.values())
            .filter(|doc| project.map_or(true, |p| doc.project.eq_ignore_ascii_case(p)))
            .collect();

        let mut size = SizeStats::default();
        if !docs.is_empty() {
            let sizes: Vec<f64> = docs.iter().map(|d| d.size as f64).collect();
            size.count = sizes.len() as u64;
            size.sum = sizes.iter().sum();
            size.min = sizes.iter().cloned().fold(f64::INFINITY, f64::min);
            size.max = sizes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            size.avg = size.sum / size.count as f64;
        }

        Ok(IndexStats {
            by_project: top_terms(docs.iter().map(|d| d.project.as_str()), PROJECT_BUCKETS),
            by_extension: top_terms(docs.iter().map(|d| d.extension.as_str()), EXTENSION_BUCKETS),
            by_language: top_terms(docs.iter().map(|d| d.language.as_str()), LANGUAGE_BUCKETS),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKind;
    use chrono::Utc;

    fn doc(project: &str, path: &str, content: &str) -> Document {
        Document {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            project: project.to_string(),
            project_path: project.to_string(),
            rel_path: path.to_string(),
            dir: ".".to_string(),
            extension: "go".to_string(),
            language: "go".to_string(),
            is_test: false,
            content: content.to_string(),
            size: content.len() as u64,
            updated_at: Utc::now(),
            kind: DocumentKind::File,
            chunk_index: None,
        }
    }

    #[tokio::test]
    async fn alias_moves_atomically() {
        let backend = InMemoryBackend::new();
        backend.create_index("code-1", &serde_json::json!({})).await.unwrap();
        backend.create_index("code-2", &serde_json::json!({})).await.unwrap();

        backend.update_aliases("code", &[], "code-1").await.unwrap();
        assert_eq!(backend.alias_targets("code").await.unwrap(), vec!["code-1"]);

        backend
            .update_aliases("code", &["code-1".to_string()], "code-2")
            .await
            .unwrap();
        assert_eq!(backend.alias_targets("code").await.unwrap(), vec!["code-2"]);
    }

    #[tokio::test]
    async fn duplicate_index_is_rejected() {
        let backend = InMemoryBackend::new();
        backend.create_index("code-1", &serde_json::json!({})).await.unwrap();
        assert!(backend.create_index("code-1", &serde_json::json!({})).await.is_err());
    }

    #[tokio::test]
    async fn bulk_overwrites_by_id() {
        let backend = InMemoryBackend::new();
        backend.create_index("code-1", &serde_json::json!({})).await.unwrap();
        let d = doc("api", "main.go", "package main");
        backend.bulk_index("code-1", &[d.clone()]).await.unwrap();
        backend.bulk_index("code-1", &[d]).await.unwrap();
        assert_eq!(backend.count("code-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleting_an_index_drops_it_from_aliases() {
        let backend = InMemoryBackend::new();
        backend.create_index("code-1", &serde_json::json!({})).await.unwrap();
        backend.update_aliases("code", &[], "code-1").await.unwrap();
        backend.delete_indices(&["code-1".to_string()]).await.unwrap();
        assert!(backend.alias_targets("code").await.unwrap().is_empty());
        assert!(backend.indices().is_empty());
    }

    #[tokio::test]
    async fn search_through_alias_with_project_filter() {
        let backend = InMemoryBackend::new();
        backend.create_index("code-1", &serde_json::json!({})).await.unwrap();
        backend
            .bulk_index(
                "code-1",
                &[
                    doc("api", "auth.go", "func Login() { token := issueToken() }"),
                    doc("web", "auth.ts", "export function login() { return token }"),
                    doc("api", "db.go", "func Open() {}"),
                ],
            )
            .await
            .unwrap();
        backend.update_aliases("code", &[], "code-1").await.unwrap();

        let query = SearchQuery {
            text: "token".to_string(),
            project: Some("api".to_string()),
            limit: 10,
        };
        let hits = backend.search("code", &query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.rel_path, "auth.go");
    }

    #[tokio::test]
    async fn stats_count_buckets_and_sizes() {
        let backend = InMemoryBackend::new();
        backend.create_index("code-1", &serde_json::json!({})).await.unwrap();
        let mut readme = doc("web", "README.md", "# web");
        readme.extension = "md".to_string();
        readme.language = "markdown".to_string();
        backend
            .bulk_index(
                "code-1",
                &[
                    doc("api", "a.go", "1234"),
                    doc("api", "b.go", "12345678"),
                    doc("web", "c.go", "12"),
                    readme,
                ],
            )
            .await
            .unwrap();
        backend.update_aliases("code", &[], "code-1").await.unwrap();

        let stats = backend.stats("code", None).await.unwrap();
        let projects: Vec<(&str, u64)> = stats
            .by_project
            .iter()
            .map(|t| (t.key.as_str(), t.count))
            .collect();
        assert_eq!(projects, vec![("api", 2), ("web", 2)]);
        assert_eq!(stats.by_extension[0].key, "go");
        assert_eq!(stats.by_extension[0].count, 3);
        assert_eq!(stats.size.count, 4);
        assert_eq!(stats.size.min, 2.0);
        assert_eq!(stats.size.max, 8.0);
        assert_eq!(stats.size.sum, 19.0);

        let api = backend.stats("code", Some("api")).await.unwrap();
        assert_eq!(api.by_project.len(), 1);
        assert_eq!(api.size.avg, 6.0);

        let none = backend.stats("code", Some("billing")).await.unwrap();
        assert!(none.by_project.is_empty());
        assert_eq!(none.size, SizeStats::default());
    }
}
