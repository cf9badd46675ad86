//! TOML configuration.
//!
//! Every section and key has a default, so an empty (or absent) file yields a
//! runnable configuration. The parsed [`Config`] is passed explicitly to the
//! components that need it; nothing here is global.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Directory to scan. Usually supplied on the command line instead.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: None,
            ignored_dirs: default_ignored_dirs(),
            allowed_extensions: default_allowed_extensions(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_ignored_dirs() -> Vec<String> {
    [
        "node_modules",
        ".git",
        ".idea",
        "dist",
        "build",
        "out",
        ".next",
        "target",
        "vendor",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "go", "js", "jsx", "mjs", "ts", "tsx", "md", "yaml", "yml", "env", "example", "json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length, in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Files at or below this size are emitted as a single document.
    #[serde(default = "default_whole_file_max_bytes")]
    pub whole_file_max_bytes: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            whole_file_max_bytes: default_whole_file_max_bytes(),
        }
    }
}

fn default_chunk_size() -> usize {
    4000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_whole_file_max_bytes() -> u64 {
    50_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Worker count. Defaults to twice the available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_pipeline_batch_size")]
    pub batch_size: usize,
    /// Bounded queue length between the walk and the workers.
    /// Defaults to `workers * batch_size`.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            batch_size: default_pipeline_batch_size(),
            queue_capacity: None,
        }
    }
}

fn default_pipeline_batch_size() -> usize {
    100
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4)
        })
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| self.worker_count() * self.batch_size)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_url")]
    pub url: String,
    /// Stable name clients query; generations are named `{alias}-{micros}`.
    #[serde(default = "default_alias")]
    pub alias: String,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_search_max_retries")]
    pub max_retries: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            alias: default_alias(),
            timeout_secs: default_search_timeout_secs(),
            max_retries: default_search_max_retries(),
        }
    }
}

fn default_search_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_alias() -> String {
    "codebase".to_string()
}
fn default_search_timeout_secs() -> u64 {
    30
}
fn default_search_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Clear the collection before each ingest run.
    #[serde(default = "default_pre_delete")]
    pub pre_delete_collection: bool,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            db_path: default_vector_db_path(),
            collection: default_collection(),
            pre_delete_collection: default_pre_delete(),
        }
    }
}

fn default_vector_db_path() -> PathBuf {
    PathBuf::from("./data/vectors.sqlite")
}
fn default_collection() -> String {
    "codebase".to_string()
}
fn default_pre_delete() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            url: default_embedding_url(),
            batch_size: default_embedding_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "bge-m3".to_string()
}
fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.pipeline.batch_size == 0 {
            bail!("pipeline.batch_size must be > 0");
        }
        if self.pipeline.workers == Some(0) {
            bail!("pipeline.workers must be > 0");
        }
        if self.pipeline.queue_capacity == Some(0) {
            bail!("pipeline.queue_capacity must be > 0");
        }

        validate_alias(&self.search.alias)?;

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be ollama or disabled.",
                other
            ),
        }

        Ok(())
    }
}

/// Alias names double as the prefix of generation names, so they must be
/// valid index names too.
pub fn validate_alias(alias: &str) -> Result<()> {
    if alias.is_empty() {
        bail!("search.alias must not be empty");
    }
    if alias.starts_with(['-', '_', '+']) {
        bail!("search.alias must not start with '-', '_' or '+': '{}'", alias);
    }
    if let Some(bad) = alias
        .chars()
        .find(|c| c.is_uppercase() || c.is_whitespace() || "*,\\/?\"<>|#:".contains(*c))
    {
        bail!("search.alias contains invalid character {:?}: '{}'", bad, alias);
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
