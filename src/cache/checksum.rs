//! Whole-tree content digest.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// SHA-256 over the bytes of every Python file under a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDigest {
    /// Lowercase hex digest.
    pub digest: String,
    /// Number of files fed into the hash.
    pub file_count: usize,
    /// Files that could not be read. A non-empty list makes the digest
    /// incomplete: it must never be persisted or treated as a match.
    pub unreadable: Vec<PathBuf>,
}

impl TreeDigest {
    pub fn is_complete(&self) -> bool {
        self.unreadable.is_empty()
    }
}

/// Hash every `*.py` file under `root`, in lexicographic order of the
/// path relative to `root`. Anything under `skip` (the cache root) is ignored.
pub fn digest_tree(root: &Path, skip: Option<&Path>) -> TreeDigest {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let mut unreadable = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|e| match skip {
        Some(skip) => !e.path().starts_with(skip),
        None => true,
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!(path = %path.display(), "cannot walk while hashing: {}", e);
                unreadable.push(path);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        files.push((relative, path.to_path_buf()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    let mut file_count = 0;
    for (_, path) in &files {
        match std::fs::read(path) {
            Ok(bytes) => {
                hasher.update(&bytes);
                file_count += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), "cannot read while hashing: {}", e);
                unreadable.push(path.clone());
            }
        }
    }

    let digest = format!("{:x}", hasher.finalize());
    debug!(root = %root.display(), files = file_count, digest = %digest, "computed tree digest");

    TreeDigest {
        digest,
        file_count,
        unreadable,
    }
}

/// Hex SHA-256 of a string.
pub fn digest_str(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("pkg")).unwrap();
        std::fs::write(temp.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(temp.path().join("pkg").join("b.py"), "y = 2\n").unwrap();
        std::fs::write(temp.path().join("README.md"), "docs\n").unwrap();
        temp
    }

    #[test]
    fn test_digest_is_stable() {
        let temp = project();
        let first = digest_tree(temp.path(), None);
        let second = digest_tree(temp.path(), None);
        assert_eq!(first, second);
        assert_eq!(first.file_count, 2);
        assert!(first.is_complete());
        assert_eq!(first.digest.len(), 64);
    }

    #[test]
    fn test_single_byte_change_changes_digest() {
        let temp = project();
        let before = digest_tree(temp.path(), None);
        std::fs::write(temp.path().join("pkg").join("b.py"), "y = 3\n").unwrap();
        let after = digest_tree(temp.path(), None);
        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn test_non_python_files_ignored() {
        let temp = project();
        let before = digest_tree(temp.path(), None);
        std::fs::write(temp.path().join("README.md"), "changed\n").unwrap();
        assert_eq!(before, digest_tree(temp.path(), None));
    }

    #[test]
    fn test_skip_dir_ignored() {
        let temp = project();
        let before = digest_tree(temp.path(), Some(&temp.path().join(".codeanalyzer")));
        std::fs::create_dir_all(temp.path().join(".codeanalyzer")).unwrap();
        std::fs::write(temp.path().join(".codeanalyzer").join("venv.py"), "z = 1\n").unwrap();
        let after = digest_tree(temp.path(), Some(&temp.path().join(".codeanalyzer")));
        assert_eq!(before.digest, after.digest);
    }

    #[test]
    fn test_digest_str() {
        assert_eq!(
            digest_str(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
