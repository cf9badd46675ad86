//! Elasticsearch backend over its REST API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create index | `PUT /{index}` with settings + mappings |
//! | bulk write | `POST /{index}/_bulk` (NDJSON, `_id` = [`Document::id`]) |
//! | count | `POST /{index}/_refresh`, then `GET /{index}/_count` |
//! | alias targets | `GET /_alias/{alias}` (404 means none) |
//! | swap | `POST /_aliases` with every remove and the add in one body |
//! | delete | `DELETE /{a},{b},...` |
//! | search | `POST /{alias}/_search` |
//! | stats | `POST /{alias}/_search` with `size: 0` and aggregations |
//!
//! # Retry Strategy
//!
//! Transient failures are retried with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - connection errors → retry
//! - backoff: 1s, 2s, 4s, ... (capped at 2^5)

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::models::Document;

use super::{
    BulkFailure, BulkOutcome, IndexStats, SearchBackend, SearchHit, SearchQuery, SizeStats,
    TermCount, EXTENSION_BUCKETS, LANGUAGE_BUCKETS, PROJECT_BUCKETS,
};

pub struct ElasticBackend {
    client: Client,
    base_url: String,
    max_retries: u32,
}

impl ElasticBackend {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, retrying transient failures. `build` is called once
    /// per attempt. Non-success responses that are not retryable are
    /// returned to the caller unchanged.
    async fn send(&self, what: &str, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, what, "retrying search backend request");
                tokio::time::sleep(delay).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("{} failed with {}: {}", what, status, body));
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    last_err = Some(anyhow!(
                        "{} failed (is Elasticsearch running at {}?): {}",
                        what,
                        self.base_url,
                        e
                    ));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{} failed after retries", what)))
    }
}

async fn ensure_success(what: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{} failed with {}: {}", what, status, body)
}

/// NDJSON body for `_bulk`: an action line and a source line per document.
pub fn bulk_body(docs: &[Document]) -> Result<String> {
    let mut body = String::new();
    for doc in docs {
        body.push_str(&serde_json::to_string(&json!({ "index": { "_id": doc.id() } }))?);
        body.push('\n');
        body.push_str(&serde_json::to_string(doc)?);
        body.push('\n');
    }
    Ok(body)
}

/// Per-item results of a `_bulk` response.
pub fn parse_bulk_response(json: &Value) -> Result<BulkOutcome> {
    let items = json
        .get("items")
        .and_then(|i| i.as_array())
        .ok_or_else(|| anyhow!("Invalid bulk response: missing items array"))?;

    let mut outcome = BulkOutcome::default();
    for item in items {
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        match result.get("error") {
            Some(error) => outcome.failures.push(BulkFailure {
                id: result
                    .get("_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                reason: error
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            }),
            None => outcome.indexed += 1,
        }
    }
    Ok(outcome)
}

/// Body for `POST /_aliases`: every remove plus the add, one request.
pub fn alias_actions(alias: &str, remove: &[String], add: &str) -> Value {
    let mut actions: Vec<Value> = remove
        .iter()
        .map(|index| json!({ "remove": { "index": index, "alias": alias } }))
        .collect();
    actions.push(json!({ "add": { "index": add, "alias": alias } }));
    json!({ "actions": actions })
}

pub fn search_body(query: &SearchQuery) -> Value {
    let mut filter = Vec::new();
    if let Some(project) = &query.project {
        filter.push(json!({ "term": { "project": { "value": project } } }));
    }
    json!({
        "size": query.limit,
        "query": {
            "bool": {
                "must": [{
                    "multi_match": {
                        "query": query.text,
                        "fields": ["content^4", "content.ngram^2", "name^2"],
                        "type": "best_fields",
                        "operator": "and",
                        "fuzziness": "AUTO"
                    }
                }],
                "filter": filter
            }
        }
    })
}

/// Aggregation-only query: terms on `project`, `extension`, `language` and
/// `stats` on `size`.
pub fn stats_body(project: Option<&str>) -> Value {
    let mut filter = Vec::new();
    if let Some(project) = project {
        filter.push(json!({ "term": { "project": { "value": project } } }));
    }
    json!({
        "size": 0,
        "track_total_hits": true,
        "query": { "bool": { "filter": filter } },
        "aggs": {
            "by_project": { "terms": { "field": "project", "size": PROJECT_BUCKETS } },
            "by_extension": { "terms": { "field": "extension", "size": EXTENSION_BUCKETS } },
            "by_language": { "terms": { "field": "language", "size": LANGUAGE_BUCKETS } },
            "size_stats": { "stats": { "field": "size" } }
        }
    })
}

fn parse_buckets(aggs: &Value, name: &str) -> Result<Vec<TermCount>> {
    let buckets = aggs
        .pointer(&format!("/{}/buckets", name))
        .and_then(|b| b.as_array())
        .ok_or_else(|| anyhow!("Invalid stats response: missing {}", name))?;
    Ok(buckets
        .iter()
        .map(|b| TermCount {
            key: match &b["key"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            count: b["doc_count"].as_u64().unwrap_or(0),
        })
        .collect())
}

/// Read the aggregations of a [`stats_body`] response. `stats` reports
/// `null` min/max/avg on an empty index; those become zero.
pub fn parse_stats_response(json: &Value) -> Result<IndexStats> {
    let aggs = json
        .get("aggregations")
        .ok_or_else(|| anyhow!("Invalid stats response: missing aggregations"))?;
    let size = &aggs["size_stats"];
    Ok(IndexStats {
        by_project: parse_buckets(aggs, "by_project")?,
        by_extension: parse_buckets(aggs, "by_extension")?,
        by_language: parse_buckets(aggs, "by_language")?,
        size: SizeStats {
            count: size["count"].as_u64().unwrap_or(0),
            min: size["min"].as_f64().unwrap_or(0.0),
            max: size["max"].as_f64().unwrap_or(0.0),
            avg: size["avg"].as_f64().unwrap_or(0.0),
            sum: size["sum"].as_f64().unwrap_or(0.0),
        },
    })
}

#[async_trait]
impl SearchBackend for ElasticBackend {
    async fn create_index(&self, name: &str, schema: &Value) -> Result<()> {
        let what = format!("create index '{}'", name);
        let response = self
            .send(&what, || self.client.put(self.url(name)).json(schema))
            .await?;
        ensure_success(&what, response).await?;
        Ok(())
    }

    async fn bulk_index(&self, index: &str, docs: &[Document]) -> Result<BulkOutcome> {
        if docs.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let body = bulk_body(docs)?;
        let what = format!("bulk write of {} documents to '{}'", docs.len(), index);
        let response = self
            .send(&what, || {
                self.client
                    .post(self.url(&format!("{}/_bulk", index)))
                    .header("Content-Type", "application/x-ndjson")
                    .body(body.clone())
            })
            .await?;
        let response = ensure_success(&what, response).await?;
        let json: Value = response.json().await?;
        parse_bulk_response(&json)
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let what = format!("refresh '{}'", index);
        let response = self
            .send(&what, || self.client.post(self.url(&format!("{}/_refresh", index))))
            .await?;
        ensure_success(&what, response).await?;

        let what = format!("count '{}'", index);
        let response = self
            .send(&what, || self.client.get(self.url(&format!("{}/_count", index))))
            .await?;
        let json: Value = ensure_success(&what, response).await?.json().await?;
        json.get("count")
            .and_then(|c| c.as_u64())
            .ok_or_else(|| anyhow!("Invalid count response: {}", json))
    }

    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>> {
        let what = format!("resolve alias '{}'", alias);
        let response = self
            .send(&what, || self.client.get(self.url(&format!("_alias/{}", alias))))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let json: Value = ensure_success(&what, response).await?.json().await?;
        let mut names: Vec<String> = json
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn update_aliases(&self, alias: &str, remove: &[String], add: &str) -> Result<()> {
        let body = alias_actions(alias, remove, add);
        let what = format!("point alias '{}' at '{}'", alias, add);
        let response = self
            .send(&what, || self.client.post(self.url("_aliases")).json(&body))
            .await?;
        ensure_success(&what, response).await?;
        Ok(())
    }

    async fn delete_indices(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let joined = names.join(",");
        let what = format!("delete '{}'", joined);
        let response = self
            .send(&what, || self.client.delete(self.url(&joined)))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!(indices = %joined, "indices already gone");
            return Ok(());
        }
        ensure_success(&what, response).await?;
        Ok(())
    }

    async fn search(&self, target: &str, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let body = search_body(query);
        let what = format!("search '{}'", target);
        let response = self
            .send(&what, || {
                self.client
                    .post(self.url(&format!("{}/_search", target)))
                    .json(&body)
            })
            .await?;
        let json: Value = ensure_success(&what, response).await?.json().await?;

        let hits = json
            .pointer("/hits/hits")
            .and_then(|h| h.as_array())
            .ok_or_else(|| anyhow!("Invalid search response: missing hits"))?;
        hits.iter()
            .map(|hit| {
                let document: Document = serde_json::from_value(
                    hit.get("_source").cloned().unwrap_or(Value::Null),
                )
                .context("Invalid search hit")?;
                Ok(SearchHit {
                    score: hit.get("_score").and_then(|s| s.as_f64()).unwrap_or(0.0),
                    document,
                })
            })
            .collect()
    }

    async fn stats(&self, target: &str, project: Option<&str>) -> Result<IndexStats> {
        let body = stats_body(project);
        let what = format!("aggregate '{}'", target);
        let response = self
            .send(&what, || {
                self.client
                    .post(self.url(&format!("{}/_search", target)))
                    .json(&body)
            })
            .await?;
        let json: Value = ensure_success(&what, response).await?.json().await?;
        parse_stats_response(&json)
    }
}
