//! Index statistics through the live alias.
//!
//! `cbi stats` answers "what is actually in the index": document counts per
//! project, extension and language, plus size figures, optionally for a
//! single project. Everything is computed by the backend's aggregations; no
//! documents are fetched.

use std::fmt::Write;

use anyhow::Result;

use crate::backend::elastic::ElasticBackend;
use crate::backend::{IndexStats, SearchBackend, TermCount};
use crate::config::Config;
use crate::progress::format_number;

/// Run the stats command against `search.alias` and print the summary.
pub async fn run_stats(config: &Config, project: Option<String>) -> Result<()> {
    let backend = ElasticBackend::new(&config.search)?;
    let stats = backend
        .stats(&config.search.alias, project.as_deref())
        .await?;
    print!(
        "{}",
        render_stats(&config.search.alias, project.as_deref(), &stats)
    );
    Ok(())
}

pub fn render_stats(alias: &str, project: Option<&str>, stats: &IndexStats) -> String {
    let mut out = String::new();
    let scope = match project {
        Some(p) => format!("{} (project {})", alias, p),
        None => alias.to_string(),
    };
    let _ = writeln!(out, "Index stats: {}", scope);
    let _ = writeln!(out, "  Documents:   {}", format_number(stats.size.count));

    section(&mut out, "By project", "PROJECT", &stats.by_project);
    section(&mut out, "By extension", "EXTENSION", &stats.by_extension);
    section(&mut out, "By language", "LANGUAGE", &stats.by_language);

    let size = &stats.size;
    let _ = writeln!(out);
    let _ = writeln!(out, "  Document size:");
    let _ = writeln!(out, "    min   {}", format_bytes(size.min));
    let _ = writeln!(out, "    max   {}", format_bytes(size.max));
    let _ = writeln!(out, "    avg   {}", format_bytes(size.avg));
    let _ = writeln!(out, "    total {}", format_bytes(size.sum));
    out
}

fn section(out: &mut String, title: &str, column: &str, terms: &[TermCount]) {
    if terms.is_empty() {
        return;
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "  {}:", title);
    let _ = writeln!(out, "  {:<32} {:>10}", column, "DOCS");
    let _ = writeln!(out, "  {}", "-".repeat(43));
    for term in terms {
        let key = if term.key.is_empty() { "(none)" } else { term.key.as_str() };
        let _ = writeln!(out, "  {:<32} {:>10}", key, format_number(term.count));
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: f64) -> String {
    if bytes < 1024.0 {
        format!("{:.0} B", bytes)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    }
}
