//! Content-addressed analysis cache.
//!
//! One cache root per project holds three independently invalidated entries:
//!
//! ```text
//! <cache_dir or project>/.codeanalyzer/
//! ├── symbol_table.checksum      DigestRecord (JSON)
//! ├── analysis.msgpack           cached PyApplication
//! ├── codeql/<project>-db/       semantic database
//! │   └── .checksum              tree digest (hex)
//! └── <project>/virtualenv/      provisioned environment
//! ```
//!
//! Invalidation is whole-tree: any byte change in any source file changes
//! the digest and every entry keyed by it is rebuilt.

mod checksum;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::PyApplication;
use crate::config::AnalysisOptions;

pub use checksum::{digest_str, digest_tree, TreeDigest};

/// Name of the cache root directory.
pub const CACHE_DIR_NAME: &str = ".codeanalyzer";

/// Paths inside one project's cache root.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
    project_name: String,
}

impl CacheLayout {
    pub fn new(project_root: &Path, cache_dir: Option<&Path>) -> Self {
        let base = cache_dir.unwrap_or(project_root);
        let project_name = project_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string());
        Self {
            root: base.join(CACHE_DIR_NAME),
            project_name,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn symbol_table_checksum(&self) -> PathBuf {
        self.root.join("symbol_table.checksum")
    }

    pub fn artifact(&self) -> PathBuf {
        self.root.join("analysis.msgpack")
    }

    pub fn database_dir(&self) -> PathBuf {
        self.root
            .join("codeql")
            .join(format!("{}-db", self.project_name))
    }

    pub fn database_checksum(&self) -> PathBuf {
        self.database_dir().join(".checksum")
    }

    pub fn virtualenv_dir(&self) -> PathBuf {
        self.root.join(&self.project_name).join("virtualenv")
    }

    pub fn ensure(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating cache root {}", self.root.display()))
    }

    /// Remove the whole cache root.
    pub fn clear(&self) -> anyhow::Result<()> {
        if self.root.exists() {
            info!(path = %self.root.display(), "clearing cache directory");
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("removing cache root {}", self.root.display()))?;
        }
        Ok(())
    }
}

/// Lifecycle of one cache entry.
///
/// `Absent → Rebuilding → Fresh` on first use, `Fresh → Stale → Rebuilding
/// → Fresh` after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Fresh,
    Stale,
    Rebuilding,
}

impl CacheState {
    /// Whether the cached entry can be reused as is.
    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheState::Fresh)
    }

    /// Start a rebuild. A fresh entry stays fresh.
    pub fn begin_rebuild(self) -> Self {
        match self {
            CacheState::Absent | CacheState::Stale => CacheState::Rebuilding,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Absent => "absent",
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
            CacheState::Rebuilding => "rebuilding",
        }
    }
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted digest of the symbol-table cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestRecord {
    pub digest: String,
    /// Fingerprint of the options that shape the artifact.
    pub settings: String,
}

/// Fingerprint of the options that change the produced application.
pub fn settings_fingerprint(options: &AnalysisOptions, resolution: &str) -> String {
    let mut excluded = options.excluded_paths.clone();
    excluded.sort();
    let canonical = format!(
        "level={};skip_tests={};file={};exclude={};resolution={}",
        options.analysis_level,
        options.skip_tests,
        options
            .file_name
            .as_ref()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default(),
        excluded.join(","),
        resolution,
    );
    digest_str(&canonical)
}

/// Decide the state of a plain-text digest file against the current digest.
pub fn digest_file_state(path: &Path, current: &TreeDigest, eager: bool) -> CacheState {
    let Ok(stored) = fs::read_to_string(path) else {
        return CacheState::Absent;
    };
    if eager || !current.is_complete() || stored.trim() != current.digest {
        CacheState::Stale
    } else {
        CacheState::Fresh
    }
}

/// Persist a plain-text digest; incomplete digests are never written.
pub fn write_digest_file(path: &Path, current: &TreeDigest) -> anyhow::Result<()> {
    if !current.is_complete() {
        debug!(path = %path.display(), "not persisting incomplete digest");
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &current.digest).with_context(|| format!("writing {}", path.display()))
}

/// The symbol-table cache entry: digest record plus cached artifact.
pub struct ChecksumCache {
    layout: CacheLayout,
}

impl ChecksumCache {
    pub fn new(layout: CacheLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    fn read_record(&self) -> Option<DigestRecord> {
        let content = fs::read_to_string(self.layout.symbol_table_checksum()).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Compare the current digest against the persisted record.
    pub fn evaluate(&self, current: &TreeDigest, settings: &str, eager: bool) -> CacheState {
        let Some(record) = self.read_record() else {
            return CacheState::Absent;
        };
        if eager || !current.is_complete() {
            return CacheState::Stale;
        }
        if record.digest == current.digest && record.settings == settings {
            CacheState::Fresh
        } else {
            CacheState::Stale
        }
    }

    /// The cached application, if present and decodable.
    pub fn load_artifact(&self) -> Option<PyApplication> {
        let path = self.layout.artifact();
        let bytes = fs::read(&path).ok()?;
        match PyApplication::from_msgpack(&bytes) {
            Ok(app) => Some(app),
            Err(e) => {
                debug!(path = %path.display(), "cached artifact unusable: {:#}", e);
                None
            }
        }
    }

    /// Persist the artifact, then the record that vouches for it.
    ///
    /// Returns false when nothing was stored because the digest is incomplete.
    pub fn store(
        &self,
        current: &TreeDigest,
        settings: &str,
        app: &PyApplication,
    ) -> anyhow::Result<bool> {
        if !current.is_complete() {
            debug!(
                unreadable = current.unreadable.len(),
                "digest incomplete, cache entry not persisted"
            );
            return Ok(false);
        }
        self.layout.ensure()?;

        let artifact = self.layout.artifact();
        fs::write(&artifact, app.to_msgpack()?)
            .with_context(|| format!("writing {}", artifact.display()))?;

        let record = DigestRecord {
            digest: current.digest.clone(),
            settings: settings.to_string(),
        };
        let record_path = self.layout.symbol_table_checksum();
        fs::write(&record_path, serde_json::to_string_pretty(&record)?)
            .with_context(|| format!("writing {}", record_path.display()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn digest(value: &str) -> TreeDigest {
        TreeDigest {
            digest: value.to_string(),
            file_count: 1,
            unreadable: Vec::new(),
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = CacheLayout::new(Path::new("/work/myproj"), None);
        assert_eq!(layout.root(), Path::new("/work/myproj/.codeanalyzer"));
        assert_eq!(
            layout.database_dir(),
            Path::new("/work/myproj/.codeanalyzer/codeql/myproj-db")
        );
        assert_eq!(
            layout.virtualenv_dir(),
            Path::new("/work/myproj/.codeanalyzer/myproj/virtualenv")
        );

        let custom = CacheLayout::new(Path::new("/work/myproj"), Some(Path::new("/tmp/c")));
        assert_eq!(custom.root(), Path::new("/tmp/c/.codeanalyzer"));
    }

    #[test]
    fn test_state_machine() {
        let temp = TempDir::new().unwrap();
        let cache = ChecksumCache::new(CacheLayout::new(temp.path(), None));
        let app = PyApplication::default();

        assert_eq!(cache.evaluate(&digest("aaa"), "s", false), CacheState::Absent);
        assert_eq!(CacheState::Absent.begin_rebuild(), CacheState::Rebuilding);

        assert!(cache.store(&digest("aaa"), "s", &app).unwrap());
        assert_eq!(cache.evaluate(&digest("aaa"), "s", false), CacheState::Fresh);
        assert_eq!(cache.load_artifact(), Some(app));

        assert_eq!(cache.evaluate(&digest("bbb"), "s", false), CacheState::Stale);
        assert_eq!(cache.evaluate(&digest("aaa"), "other", false), CacheState::Stale);
        assert_eq!(cache.evaluate(&digest("aaa"), "s", true), CacheState::Stale);
    }

    #[test]
    fn test_incomplete_digest_forces_stale_and_is_not_stored() {
        let temp = TempDir::new().unwrap();
        let cache = ChecksumCache::new(CacheLayout::new(temp.path(), None));
        cache.store(&digest("aaa"), "s", &PyApplication::default()).unwrap();

        let mut incomplete = digest("aaa");
        incomplete.unreadable.push(PathBuf::from("locked.py"));
        assert_eq!(cache.evaluate(&incomplete, "s", false), CacheState::Stale);

        let mut other = digest("ccc");
        other.unreadable.push(PathBuf::from("locked.py"));
        assert!(!cache.store(&other, "s", &PyApplication::default()).unwrap());
        assert_eq!(cache.evaluate(&digest("aaa"), "s", false), CacheState::Fresh);
    }

    #[test]
    fn test_corrupt_artifact_is_unusable() {
        let temp = TempDir::new().unwrap();
        let cache = ChecksumCache::new(CacheLayout::new(temp.path(), None));
        cache.store(&digest("aaa"), "s", &PyApplication::default()).unwrap();
        fs::write(cache.layout().artifact(), b"not msgpack").unwrap();
        assert!(cache.load_artifact().is_none());
    }

    #[test]
    fn test_digest_file_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db").join(".checksum");
        assert_eq!(digest_file_state(&path, &digest("x"), false), CacheState::Absent);
        write_digest_file(&path, &digest("x")).unwrap();
        assert_eq!(digest_file_state(&path, &digest("x"), false), CacheState::Fresh);
        assert_eq!(digest_file_state(&path, &digest("y"), false), CacheState::Stale);
        assert_eq!(digest_file_state(&path, &digest("x"), true), CacheState::Stale);
    }

    #[test]
    fn test_clear_removes_root() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path(), None);
        layout.ensure().unwrap();
        fs::write(layout.root().join("junk"), "x").unwrap();
        layout.clear().unwrap();
        assert!(!layout.root().exists());
    }
}
