//! Project discovery.
//!
//! Walks a root directory and yields every directory that looks like the
//! root of a single project: it holds a manifest (`package.json`, `go.mod`,
//! `Cargo.toml`, `pyproject.toml`) and is not a workspace aggregator
//! (`turbo.json`, `nx.json`, `lerna.json`, `pnpm-workspace.yaml`, `go.work`,
//! or a `Cargo.toml` with a `[workspace]` table).
//!
//! Aggregators are skipped and their members are discovered individually.
//! Once a project root is yielded the walk does not enter it; its files are
//! the scan stage's business.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::filter::PathFilter;
use crate::models::ProjectRoot;

const MANIFESTS: &[&str] = &["package.json", "go.mod", "Cargo.toml", "pyproject.toml"];

const AGGREGATORS: &[&str] = &[
    "turbo.json",
    "nx.json",
    "lerna.json",
    "pnpm-workspace.yaml",
    "go.work",
];

/// How a single directory is treated by the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirKind {
    Project,
    Aggregator,
    Plain,
}

pub fn classify(dir: &Path) -> DirKind {
    let is_aggregator = AGGREGATORS.iter().any(|m| dir.join(m).is_file())
        || is_cargo_workspace(&dir.join("Cargo.toml"));
    if is_aggregator {
        return DirKind::Aggregator;
    }
    if MANIFESTS.iter().any(|m| dir.join(m).is_file()) {
        DirKind::Project
    } else {
        DirKind::Plain
    }
}

fn is_cargo_workspace(manifest: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(manifest) else {
        return false;
    };
    match content.parse::<toml::Table>() {
        Ok(table) => table.contains_key("workspace"),
        Err(e) => {
            debug!(path = %manifest.display(), error = %e, "unparseable Cargo.toml");
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectDiscoverer {
    filter: PathFilter,
    follow_symlinks: bool,
}

impl ProjectDiscoverer {
    pub fn new(filter: PathFilter) -> Self {
        Self {
            filter,
            follow_symlinks: false,
        }
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Starts a fresh walk of `root`. Each call is independent.
    pub fn discover(&self, root: &Path) -> Projects<'_> {
        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter();
        Projects {
            filter: &self.filter,
            root: root.to_path_buf(),
            walker,
        }
    }
}

/// Lazy sequence of project roots under one directory.
pub struct Projects<'a> {
    filter: &'a PathFilter,
    root: PathBuf,
    walker: walkdir::IntoIter,
}

impl Iterator for Projects<'_> {
    type Item = ProjectRoot;

    fn next(&mut self) -> Option<ProjectRoot> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                    warn!(path = %path, error = %e, "skipping unreadable directory");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            if entry.depth() > 0 && !self.filter.should_descend(relative) {
                self.walker.skip_current_dir();
                continue;
            }

            match classify(path) {
                DirKind::Project => {
                    self.walker.skip_current_dir();
                    return Some(ProjectRoot::under(&self.root, path));
                }
                DirKind::Aggregator => {
                    debug!(path = %path.display(), "workspace aggregator, descending into members");
                }
                DirKind::Plain => {}
            }
        }
    }
}

/// Prints every project that a scan of `root` would cover.
pub fn list_projects(config: &Config, root: &Path) -> Result<()> {
    let filter = PathFilter::from_config(&config.scan)?;
    let discoverer = ProjectDiscoverer::new(filter).follow_symlinks(config.scan.follow_symlinks);

    println!("{:<32} PATH", "PROJECT");
    let mut count = 0usize;
    for project in discoverer.discover(root) {
        println!("{:<32} {}", project.name, project.path.display());
        count += 1;
    }
    println!("  projects found: {}", count);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use std::fs;

    fn discoverer() -> ProjectDiscoverer {
        ProjectDiscoverer::new(PathFilter::from_config(&ScanConfig::default()).unwrap())
    }

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn finds_projects_and_does_not_enter_them() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("api/go.mod"), "module api");
        // A nested manifest inside a project is not a separate project.
        touch(&root.join("api/tools/gen/go.mod"), "module gen");
        touch(&root.join("web/package.json"), "{}");

        let names: Vec<String> = discoverer().discover(root).map(|p| p.name).collect();
        assert_eq!(names, vec!["api", "web"]);
    }

    #[test]
    fn aggregators_are_skipped_members_indexed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("mono/package.json"), "{}");
        touch(&root.join("mono/turbo.json"), "{}");
        touch(&root.join("mono/apps/site/package.json"), "{}");
        touch(&root.join("mono/packages/ui/package.json"), "{}");
        touch(&root.join("svc/go.work"), "go 1.22");
        touch(&root.join("svc/go.mod"), "module svc");
        touch(&root.join("svc/auth/go.mod"), "module auth");
        touch(
            &root.join("crates-ws/Cargo.toml"),
            "[workspace]\nmembers = [\"core\"]\n",
        );
        touch(
            &root.join("crates-ws/core/Cargo.toml"),
            "[package]\nname = \"core\"\n",
        );

        let names: Vec<String> = discoverer().discover(root).map(|p| p.name).collect();
        assert_eq!(names, vec!["core", "site", "ui", "auth"]);
    }

    #[test]
    fn ignored_directories_are_not_searched() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("node_modules/left-pad/package.json"), "{}");
        touch(&root.join("app/package.json"), "{}");

        let names: Vec<String> = discoverer().discover(root).map(|p| p.name).collect();
        assert_eq!(names, vec!["app"]);
    }

    #[test]
    fn root_that_is_a_project_is_yielded_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("solo");
        touch(&root.join("go.mod"), "module solo");
        touch(&root.join("sub/package.json"), "{}");

        let projects: Vec<ProjectRoot> = discoverer().discover(&root).collect();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].path, root);
    }

    #[test]
    fn no_yielded_root_is_an_ancestor_of_another() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for dir in ["a", "a/b", "a/b/c", "d/e", "d/e/f", "g", "g/h/i"] {
            touch(&root.join(dir).join("package.json"), "{}");
        }
        touch(&root.join("g/lerna.json"), "{}");

        let projects: Vec<ProjectRoot> = discoverer().discover(root).collect();
        assert!(!projects.is_empty());
        for a in &projects {
            for b in &projects {
                if a != b {
                    assert!(
                        !b.path.starts_with(&a.path),
                        "{} is nested in {}",
                        b.path.display(),
                        a.path.display()
                    );
                }
            }
        }
    }

    #[test]
    fn discover_is_restartable() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("x/go.mod"), "module x");
        let d = discoverer();
        assert_eq!(d.discover(tmp.path()).count(), 1);
        assert_eq!(d.discover(tmp.path()).count(), 1);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(discoverer().discover(&tmp.path().join("nope")).count(), 0);
    }
}
