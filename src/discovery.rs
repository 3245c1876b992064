//! Source file enumeration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use globset::GlobSet;
use tracing::warn;
use walkdir::WalkDir;

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &[
    "__pycache__",
    "venv",
    ".venv",
    "site-packages",
    "node_modules",
];

/// Directory names that hold tests.
const TEST_DIRS: &[&str] = &["test", "tests"];

/// Which files of a project tree are analyzed.
pub struct SourceFilter<'a> {
    root: &'a Path,
    skip_tests: bool,
    excluded: &'a GlobSet,
    cache_root: Option<&'a Path>,
}

impl<'a> SourceFilter<'a> {
    pub fn new(root: &'a Path, skip_tests: bool, excluded: &'a GlobSet) -> Self {
        Self {
            root,
            skip_tests,
            excluded,
            cache_root: None,
        }
    }

    /// Never descend into this directory (the analysis cache).
    pub fn cache_root(mut self, cache_root: &'a Path) -> Self {
        self.cache_root = Some(cache_root);
        self
    }

    fn relative<'p>(&self, path: &'p Path) -> &'p Path {
        path.strip_prefix(self.root).unwrap_or(path)
    }

    fn keep_dir(&self, path: &Path, name: &str) -> bool {
        if path == self.root {
            return true;
        }
        if name.starts_with('.') || SKIPPED_DIRS.contains(&name) {
            return false;
        }
        if self.cache_root.map_or(false, |c| path.starts_with(c)) {
            return false;
        }
        if self.skip_tests && TEST_DIRS.contains(&name) {
            return false;
        }
        !self.excluded.is_match(self.relative(path))
    }

    /// Whether a file is analyzed.
    pub fn keep_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if !name.ends_with(".py") || name.starts_with("__") {
            return false;
        }
        if self.skip_tests && is_test_file(name) {
            return false;
        }
        !self.excluded.is_match(self.relative(path))
    }

    /// Every analyzed file under the root, sorted.
    ///
    /// Only an unreadable root is an error. A source path that cannot be
    /// inspected (a dangling symlink) is still returned so its extraction
    /// fails and is reported for that file alone; other walk errors are
    /// logged and the entry is left out.
    pub fn collect(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(self.root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| {
                if e.file_type().is_dir() {
                    let name = e.file_name().to_string_lossy();
                    return self.keep_dir(e.path(), &name);
                }
                true
            })
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(e).with_context(|| format!("reading {}", self.root.display()));
                }
                Err(e) => {
                    match e.path() {
                        Some(path) if self.keep_file(path) => files.push(path.to_path_buf()),
                        _ => warn!("skipping unreadable entry: {}", e),
                    }
                    continue;
                }
            };
            if entry.file_type().is_file() && self.keep_file(entry.path()) {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }
}

/// `test_*.py` or `*_test.py`.
pub fn is_test_file(name: &str) -> bool {
    name.starts_with("test_") || name.ends_with("_test.py")
}
