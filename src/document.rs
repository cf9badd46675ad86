//! Turning one source file into [`Document`]s.
//!
//! Small files become a single document. Files above the whole-file
//! threshold are split with [`TextSplitter`] and become one document per
//! chunk, all sharing the file's metadata.
//!
//! When the destination is a context store for a generative model, every
//! document's content is prefixed with a short header naming the file, its
//! directory, language, extension and whether it looks like a test. A
//! retrieved chunk then describes itself without a side lookup.

use std::path::{Component, Path};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::chunk::TextSplitter;
use crate::config::ChunkingConfig;
use crate::error::BuildError;
use crate::filter::extension_of;
use crate::models::{Document, DocumentKind, ProjectRoot};

#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    splitter: TextSplitter,
    whole_file_max_bytes: u64,
    embed_header: bool,
}

impl DocumentBuilder {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        Ok(Self {
            splitter: TextSplitter::new(config.chunk_size, config.chunk_overlap)?,
            whole_file_max_bytes: config.whole_file_max_bytes,
            embed_header: false,
        })
    }

    /// Prefix each document's content with the self-describing header.
    pub fn with_embedded_header(mut self, embed: bool) -> Self {
        self.embed_header = embed;
        self
    }

    pub fn build(&self, project: &ProjectRoot, path: &Path) -> Result<Vec<Document>, BuildError> {
        let metadata = std::fs::metadata(path).map_err(|source| BuildError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        let bytes = std::fs::read(path).map_err(|source| BuildError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|_| BuildError::Decode {
            path: path.to_path_buf(),
        })?;

        let updated_at: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let rel_path = relative_path(&project.path, path);
        let dir = match rel_path.rfind('/') {
            Some(i) => rel_path[..i].to_string(),
            None => ".".to_string(),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = extension_of(path).unwrap_or_default();

        let template = Document {
            name,
            project: project.name.clone(),
            project_path: project.key.clone(),
            is_test: rel_path.to_lowercase().contains("test"),
            rel_path,
            dir,
            language: infer_language(&extension).to_string(),
            extension,
            content: String::new(),
            size: metadata.len(),
            updated_at,
            kind: DocumentKind::File,
            chunk_index: None,
        };

        let docs = if metadata.len() <= self.whole_file_max_bytes {
            vec![self.finish(&template, text, DocumentKind::File, None)]
        } else {
            self.splitter
                .split(&text)
                .into_iter()
                .enumerate()
                .map(|(i, chunk)| self.finish(&template, chunk, DocumentKind::Chunk, Some(i)))
                .collect()
        };

        Ok(docs)
    }

    fn finish(
        &self,
        template: &Document,
        body: String,
        kind: DocumentKind,
        chunk_index: Option<usize>,
    ) -> Document {
        let content = if self.embed_header {
            format!("{}{}", header(template), body)
        } else {
            body
        };
        Document {
            content,
            kind,
            chunk_index,
            ..template.clone()
        }
    }

    /// Synthetic document listing every file scanned in `project`, so that
    /// retrieval can recover the project layout even when content hits are
    /// sparse.
    pub fn table_of_contents(&self, project: &ProjectRoot, rel_paths: &[String]) -> Document {
        let content = format!("// PROJECT TOC: {}\n{}", project.name, rel_paths.join("\n"));
        Document {
            name: "TOC".to_string(),
            project: project.name.clone(),
            project_path: project.key.clone(),
            rel_path: String::new(),
            dir: ".".to_string(),
            extension: String::new(),
            language: "toc".to_string(),
            is_test: false,
            size: content.len() as u64,
            content,
            updated_at: Utc::now(),
            kind: DocumentKind::Toc,
            chunk_index: None,
        }
    }
}

fn header(doc: &Document) -> String {
    format!(
        "// FILE: {}\n// DIR: {}\n// LANG: {}\n// EXTENSION: {}\n// TEST: {}\n\n",
        doc.name, doc.dir, doc.language, doc.extension, doc.is_test
    )
}

/// Path of `file` under `root`, always with `/` separators.
pub fn relative_path(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn infer_language(extension: &str) -> &'static str {
    match extension {
        "go" => "go",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "md" | "markdown" => "markdown",
        "env" => "env",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "rs" => "rust",
        "py" => "python",
        "toml" => "toml",
        _ => "unknown",
    }
}
