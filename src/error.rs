//! Typed errors for the places where callers need to tell cases apart.
//!
//! Everything else in the crate returns `anyhow::Result`.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::ScanReport;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to turn one file into documents. Scoped to that file only.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    Decode { path: PathBuf },
}

/// Outcome of a scan that did not complete cleanly.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("scan cancelled after {} documents were enqueued", .report.documents_enqueued)]
    Cancelled { report: ScanReport },

    #[error("{failed_batches} batch write(s) failed; first error: {source}")]
    Sink {
        report: ScanReport,
        failed_batches: u64,
        #[source]
        source: BoxError,
    },

    #[error("scan task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl ScanError {
    /// Counters gathered before the scan stopped, when available.
    pub fn report(&self) -> Option<&ScanReport> {
        match self {
            ScanError::Cancelled { report } | ScanError::Sink { report, .. } => Some(report),
            ScanError::Worker(_) => None,
        }
    }
}

/// Phases of one re-index cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Created,
    Populating,
    Verifying,
    Swapped,
    Cleaned,
    Failed,
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwapState::Created => "created",
            SwapState::Populating => "populating",
            SwapState::Verifying => "verifying",
            SwapState::Swapped => "swapped",
            SwapState::Cleaned => "cleaned",
            SwapState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A re-index cycle that ended in [`SwapState::Failed`]. The alias was not
/// moved.
#[derive(Error, Debug)]
#[error("re-index failed during {phase}{}: {source}", .index.as_deref().map(|i| format!(" (generation {})", i)).unwrap_or_default())]
pub struct SwapError {
    /// State the cycle was in when it failed.
    pub phase: SwapState,
    /// Generation created by this cycle, left in place for inspection.
    pub index: Option<String>,
    #[source]
    pub source: BoxError,
}

impl SwapError {
    pub fn new(phase: SwapState, index: Option<String>, source: impl Into<BoxError>) -> Self {
        Self {
            phase,
            index,
            source: source.into(),
        }
    }
}
