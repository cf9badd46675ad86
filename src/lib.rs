//! # Codebase Indexer
//!
//! Scans a directory tree of source projects and keeps a queryable index of
//! them: a full-text search index behind a stable alias, or a vector store
//! for retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Discover   │──▶│ Walk+Filter  │──▶│  N workers   │──▶│ Search index │
//! │  projects   │   │ Build docs   │   │ batch+flush  │   │ or vectors   │
//! └─────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//!                          bounded queue (backpressure)
//! ```
//!
//! Search-index runs are wrapped in a blue-green cycle: a new generation is
//! built next to the live one, and the alias moves only once it is complete.
//!
//! ## Quick Start
//!
//! ```bash
//! cbi projects --root ~/code          # what would be indexed
//! cbi index --root ~/code             # re-index into Elasticsearch
//! cbi index --root ~/code --dry-run   # same cycle, in memory
//! cbi search "parseConfig" --project api
//! cbi ingest --root ~/code            # embed into the vector store
//! cbi similar "where are tokens refreshed?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`filter`] | Directory and extension predicates |
//! | [`discover`] | Project root discovery |
//! | [`chunk`] | Text chunking |
//! | [`document`] | File → documents |
//! | [`scan`] | Walk, bounded queue and worker pool |
//! | [`sink`] | Batch destinations |
//! | [`backend`] | Search-index backends and schema |
//! | [`reindex`] | Alias swap protocol |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | SQLite vector store |
//! | [`db`] | Database connection |
//! | [`ingest`] | Vector-store ingest command |
//! | [`search`] | Full-text search command |
//! | [`stats`] | Aggregations over the alias |
//! | [`progress`] | Progress reporting |
//! | [`error`] | Typed errors |

pub mod backend;
pub mod chunk;
pub mod config;
pub mod db;
pub mod discover;
pub mod document;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod models;
pub mod progress;
pub mod reindex;
pub mod scan;
pub mod search;
pub mod sink;
pub mod stats;
pub mod vector_store;
