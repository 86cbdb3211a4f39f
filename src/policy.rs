//! Path allow/deny gate applied at every file-read boundary and at
//! directory traversal in the resource-listing endpoints.

use std::path::{Path, PathBuf};

const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;
const DENIED_EXTENSIONS: &[&str] = &["env", "key", "pem"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    DeniedExtension,
    DeniedSize,
    DeniedRoot,
    NotFound,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Holds the set of roots a request is allowed to touch, canonicalized once
/// at construction so every check is a cheap prefix comparison.
#[derive(Debug, Clone)]
pub struct PolicyFilter {
    allowed_roots: Vec<PathBuf>,
}

impl PolicyFilter {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let allowed_roots = roots
            .into_iter()
            .filter_map(|r| std::fs::canonicalize(&r).ok().or(Some(r)))
            .collect();
        PolicyFilter { allowed_roots }
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    fn is_denied_extension(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| DENIED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    fn is_contained(&self, canonical: &Path) -> bool {
        self.allowed_roots.iter().any(|root| canonical.starts_with(root))
    }

    /// Full decision for an absolute path, checking extension, size, and
    /// root containment. Used at read time.
    pub fn check(&self, abs_path: &Path) -> Decision {
        if Self::is_denied_extension(abs_path) {
            return Decision::DeniedExtension;
        }

        let canonical = match std::fs::canonicalize(abs_path) {
            Ok(c) => c,
            Err(_) if !abs_path.exists() => return Decision::NotFound,
            Err(_) => return Decision::DeniedRoot,
        };

        if !self.is_contained(&canonical) {
            return Decision::DeniedRoot;
        }

        if let Ok(meta) = std::fs::metadata(&canonical) {
            if meta.len() > MAX_FILE_BYTES {
                return Decision::DeniedSize;
            }
        }

        Decision::Allow
    }

    /// Cheaper check for listing contexts where the file may not exist yet
    /// or where a metadata stat is unnecessary; missing files are treated as
    /// deny rather than error.
    pub fn allow_for_listing(&self, abs_path: &Path) -> bool {
        if Self::is_denied_extension(abs_path) {
            return false;
        }
        match std::fs::canonicalize(abs_path) {
            Ok(canonical) => self.is_contained(&canonical),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_secret_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let filter = PolicyFilter::new([dir.path().to_path_buf()]);
        let secret = dir.path().join(".env");
        std::fs::write(&secret, "SECRET=1").unwrap();
        assert_eq!(filter.check(&secret), Decision::DeniedExtension);
    }

    #[test]
    fn denies_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let filter = PolicyFilter::new([dir.path().to_path_buf()]);
        let outside = other.path().join("secret.rs");
        std::fs::write(&outside, "fn main() {}").unwrap();
        assert_eq!(filter.check(&outside), Decision::DeniedRoot);
    }

    #[test]
    fn allows_files_within_root() {
        let dir = tempfile::tempdir().unwrap();
        let filter = PolicyFilter::new([dir.path().to_path_buf()]);
        let file = dir.path().join("lib.rs");
        std::fs::write(&file, "fn main() {}").unwrap();
        assert_eq!(filter.check(&file), Decision::Allow);
    }

    #[test]
    fn denies_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let filter = PolicyFilter::new([dir.path().to_path_buf()]);
        let file = dir.path().join("big.bin");
        let f = std::fs::File::create(&file).unwrap();
        f.set_len(MAX_FILE_BYTES + 1).unwrap();
        assert_eq!(filter.check(&file), Decision::DeniedSize);
    }

    #[test]
    fn missing_file_denied_not_errored() {
        let dir = tempfile::tempdir().unwrap();
        let filter = PolicyFilter::new([dir.path().to_path_buf()]);
        let missing = dir.path().join("nope.rs");
        assert!(!filter.allow_for_listing(&missing));
    }

    #[test]
    fn missing_file_within_root_is_not_found_not_denied_root() {
        let dir = tempfile::tempdir().unwrap();
        let filter = PolicyFilter::new([dir.path().to_path_buf()]);
        let missing = dir.path().join("nope.rs");
        assert_eq!(filter.check(&missing), Decision::NotFound);
    }
}
