//! Core data types that flow through the scan pipeline.
//!
//! A [`ProjectRoot`] is discovered, its files become [`Document`]s, and the
//! documents are written to a backend in batches. Counters for one run are
//! collected in a [`ScanReport`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A directory recognized as the root of one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    pub path: PathBuf,
    /// Directory name, used as the `project` field of every document.
    /// Not unique: `apps/api` and `services/api` are both `api`.
    pub name: String,
    /// Path relative to the scan root, `/`-separated. Unique within one
    /// scan and part of every document id.
    pub key: String,
}

impl ProjectRoot {
    /// A project scanned on its own; the key is the directory name.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            key: name.clone(),
            path,
            name,
        }
    }

    /// A project found under `scan_root`, keyed by its relative path.
    pub fn under(scan_root: &Path, path: impl Into<PathBuf>) -> Self {
        let mut project = Self::new(path);
        let key = project
            .path
            .strip_prefix(scan_root)
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();
        if !key.is_empty() {
            project.key = key;
        }
        project
    }
}

/// What a [`Document`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// A whole source file.
    File,
    /// One slice of a file above the whole-file threshold.
    Chunk,
    /// Synthetic listing of every file scanned in a project.
    Toc,
}

/// One normalized unit of content, ready for a backend.
///
/// Serializes to the search-index field names (`relPath`, `updatedAt`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    pub project: String,
    /// [`ProjectRoot::key`] of the owning project.
    #[serde(default)]
    pub project_path: String,
    pub rel_path: String,
    pub dir: String,
    pub extension: String,
    pub language: String,
    pub is_test: bool,
    pub content: String,
    pub size: u64,
    pub updated_at: DateTime<Utc>,
    pub kind: DocumentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

impl Document {
    /// Stable identifier: the same file slice always maps to the same id, so
    /// re-sending a batch overwrites instead of duplicating.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.project_path.as_bytes());
        hasher.update([0]);
        hasher.update(self.rel_path.as_bytes());
        hasher.update([0]);
        hasher.update(format!("{:?}", self.kind).as_bytes());
        hasher.update(self.chunk_index.unwrap_or(0).to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Metadata without the content, for backends that store fields apart
    /// from the embedded text.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "project": self.project,
            "projectPath": self.project_path,
            "path": self.rel_path,
            "dir": self.dir,
            "fileName": self.name,
            "ext": self.extension,
            "language": self.language,
            "isTest": self.is_test,
            "kind": self.kind,
            "chunkIndex": self.chunk_index,
            "size": self.size,
            "updatedAt": self.updated_at,
        })
    }
}

/// Counters for one scan run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub projects: u64,
    pub files_scanned: u64,
    pub files_skipped: u64,
    pub documents_enqueued: u64,
    pub documents_written: u64,
    pub batches_flushed: u64,
    pub failed_batches: u64,
}
