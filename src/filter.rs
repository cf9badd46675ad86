//! Path predicates shared by project discovery and the scan walk.
//!
//! [`PathFilter`] answers two questions without touching the filesystem:
//! whether a directory should be walked into, and whether a file should be
//! turned into documents.

use std::collections::HashSet;
use std::path::{Component, Path};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::ScanConfig;

#[derive(Debug, Clone)]
pub struct PathFilter {
    ignored_dirs: HashSet<String>,
    allowed_extensions: HashSet<String>,
    excludes: GlobSet,
}

impl PathFilter {
    pub fn new<I, E>(ignored_dirs: I, allowed_extensions: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            ignored_dirs: ignored_dirs
                .into_iter()
                .map(|d| d.as_ref().to_string())
                .collect(),
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| normalize_extension(e.as_ref()))
                .collect(),
            excludes: GlobSet::empty(),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        Self::new(&config.ignored_dirs, &config.allowed_extensions)
            .with_excludes(&config.exclude_globs)
    }

    /// Adds glob patterns; any path matching one is neither walked nor
    /// processed.
    pub fn with_excludes(mut self, patterns: &[String]) -> Result<Self> {
        self.excludes = build_globset(patterns)?;
        Ok(self)
    }

    /// False when any segment of `path` is an ignored directory name, or the
    /// path matches an exclude glob.
    ///
    /// Walkers pass paths relative to the scan root, so directories above the
    /// root never count.
    pub fn should_descend(&self, path: &Path) -> bool {
        let ignored = path.components().any(|c| match c {
            Component::Normal(seg) => seg
                .to_str()
                .is_some_and(|s| self.ignored_dirs.contains(s)),
            _ => false,
        });
        !ignored && !self.excludes.is_match(path)
    }

    /// True only for allow-listed extensions. Depth does not matter.
    pub fn should_process(&self, path: &Path, extension: &str) -> bool {
        self.allowed_extensions
            .contains(&normalize_extension(extension))
            && !self.excludes.is_match(path)
    }
}

/// Extension of a file name, lowercased and without the dot.
///
/// Dotfiles count: `.env` has extension `env`, which is what an allow-list
/// of config files expects. Returns `None` when the name has no dot.
pub fn extension_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let dot = name.rfind('.')?;
    let ext = &name[dot + 1..];
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn default_filter() -> PathFilter {
        PathFilter::from_config(&ScanConfig::default()).unwrap()
    }

    #[test]
    fn ignored_segments_block_descent() {
        let filter = default_filter();
        assert!(filter.should_descend(Path::new("/code/api/src")));
        assert!(!filter.should_descend(Path::new("/code/web/node_modules")));
        assert!(!filter.should_descend(Path::new("/code/web/node_modules/react/lib")));
        assert!(!filter.should_descend(Path::new("/code/api/.git/objects")));
    }

    #[test]
    fn segment_match_is_exact() {
        let filter = default_filter();
        // "out" is ignored, "layout" is not.
        assert!(filter.should_descend(Path::new("/code/web/src/layout")));
        assert!(!filter.should_descend(Path::new("/code/web/out")));
    }

    #[test]
    fn allow_list_is_independent_of_depth() {
        let filter = default_filter();
        let allowed = ["go", "js", "jsx", "mjs", "ts", "tsx", "md", "yaml", "yml", "env", "example", "json"];
        let rejected = ["rs", "py", "png", "lock", "sum", "", "exe"];

        let mut dir = PathBuf::from("/code");
        for depth in 0..6 {
            for ext in allowed {
                let file = dir.join(format!("f.{}", ext));
                assert!(filter.should_process(&file, ext), "{} at depth {}", ext, depth);
            }
            for ext in rejected {
                let file = dir.join(format!("f.{}", ext));
                assert!(!filter.should_process(&file, ext), "{} at depth {}", ext, depth);
            }
            dir.push(format!("level{}", depth));
        }
    }

    #[test]
    fn extension_accepts_leading_dot_and_case() {
        let filter = default_filter();
        assert!(filter.should_process(Path::new("a/B.GO"), ".GO"));
    }

    #[test]
    fn exclude_globs_apply_to_files_and_dirs() {
        let filter = default_filter()
            .with_excludes(&["**/generated/**".to_string()])
            .unwrap();
        assert!(!filter.should_descend(Path::new("/code/api/generated/pb")));
        assert!(!filter.should_process(Path::new("/code/api/generated/pb/x.go"), "go"));
        assert!(filter.should_process(Path::new("/code/api/x.go"), "go"));
    }

    #[test]
    fn extension_of_handles_dotfiles() {
        assert_eq!(extension_of(Path::new("a/.env")), Some("env".to_string()));
        assert_eq!(
            extension_of(Path::new(".env.example")),
            Some("example".to_string())
        );
        assert_eq!(extension_of(Path::new("main.Go")), Some("go".to_string()));
        assert_eq!(extension_of(Path::new("Makefile")), None);
        assert_eq!(extension_of(Path::new("trailing.")), None);
    }
}
