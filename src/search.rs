//! `cbi search`: full-text query against the live alias.

use anyhow::{bail, Result};

use crate::backend::elastic::ElasticBackend;
use crate::backend::{SearchBackend, SearchHit, SearchQuery};
use crate::config::Config;

pub async fn run_search(
    config: &Config,
    query: &str,
    project: Option<String>,
    limit: usize,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Search query must not be empty");
    }
    let backend = ElasticBackend::new(&config.search)?;
    let hits = search_alias(&backend, &config.search.alias, query, project, limit).await?;
    print_hits(&hits);
    Ok(())
}

pub async fn search_alias(
    backend: &dyn SearchBackend,
    alias: &str,
    query: &str,
    project: Option<String>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let query = SearchQuery {
        text: query.to_string(),
        project,
        limit: limit.max(1),
    };
    backend.search(alias, &query).await
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }

    for (i, hit) in hits.iter().enumerate() {
        let doc = &hit.document;
        let location = match doc.chunk_index {
            Some(chunk) => format!("{} (chunk {})", doc.rel_path, chunk),
            None => doc.rel_path.clone(),
        };
        println!("{}. [{:.2}] {} / {}", i + 1, hit.score, doc.project, location);
        println!("    language: {}", doc.language);
        println!("    size: {} bytes", doc.size);
        println!("    updated: {}", doc.updated_at.format("%Y-%m-%d"));
        println!();
    }
}
