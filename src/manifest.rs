//! Two serialized documents rewritten atomically at the end of an indexing
//! pass: `index.json` (FileMeta[]) and `semantic_entries.json`
//! (SemanticEntry[]). Readers tolerate a missing or malformed file by
//! treating it as empty.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::model::{Edge, FileMeta, SemanticEntry};

pub struct SnippetManifest {
    data_dir: PathBuf,
}

fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| format!("serialize: {e}"))?;
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut f = std::fs::File::create(&tmp_path).map_err(|e| format!("create temp: {e}"))?;
        f.write_all(&json).map_err(|e| format!("write temp: {e}"))?;
        f.sync_all().ok();
    }
    std::fs::rename(&tmp_path, path).map_err(|e| format!("rename: {e}"))?;
    Ok(())
}

fn load_or_empty<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

impl SnippetManifest {
    pub fn new(data_dir: PathBuf) -> Self {
        SnippetManifest { data_dir }
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.json")
    }

    pub fn semantic_entries_path(&self) -> PathBuf {
        self.data_dir.join("semantic_entries.json")
    }

    pub fn edges_debug_path(&self) -> PathBuf {
        self.data_dir.join("edges.json")
    }

    pub fn load_files(&self) -> Vec<FileMeta> {
        load_or_empty(&self.index_path())
    }

    pub fn load_semantic_entries(&self) -> Vec<SemanticEntry> {
        load_or_empty(&self.semantic_entries_path())
    }

    /// Rewrite both documents atomically (each via its own temp-then-rename;
    /// a crash between the two leaves one updated and one stale, which the
    /// next indexing pass reconciles — acceptable since the graph store
    /// commit, not this write, is the authoritative happens-before boundary).
    pub fn write(&self, files: &[FileMeta], entries: &[SemanticEntry]) -> Result<(), String> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| format!("create data dir: {e}"))?;
        atomic_write_json(&self.index_path(), files)?;
        atomic_write_json(&self.semantic_entries_path(), entries)?;
        Ok(())
    }

    /// Debug dump of the import graph; not authoritative, never read back.
    pub fn write_edges_debug(&self, edges: &[Edge]) -> Result<(), String> {
        #[derive(serde::Serialize)]
        struct Pair<'a> {
            from: &'a str,
            to: &'a str,
        }
        let pairs: Vec<Pair> = edges.iter().map(|e| Pair { from: &e.from, to: &e.to }).collect();
        atomic_write_json(&self.edges_debug_path(), &pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SymbolKind;

    #[test]
    fn round_trips_files_and_entries() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = SnippetManifest::new(dir.path().to_path_buf());

        let files = vec![FileMeta {
            path: "a.rs".into(),
            content: "fn main() {}".into(),
            mtime_ms: 1000,
            symbols: vec![crate::model::Symbol {
                name: "main".into(),
                kind: SymbolKind::Function,
                file: "a.rs".into(),
                start_line: 1,
                end_line: 1,
            }],
            namespace: None,
            tenant: None,
            metadata: Default::default(),
        }];
        let entries = vec![SemanticEntry {
            id: "a.rs:main".into(),
            file: "a.rs".into(),
            symbol: "main".into(),
            start_line: 1,
            end_line: 1,
            text: "fn main() {}".into(),
            namespace: None,
            tenant: None,
            metadata: Default::default(),
        }];

        manifest.write(&files, &entries).unwrap();

        let loaded_files = manifest.load_files();
        let loaded_entries = manifest.load_semantic_entries();
        assert_eq!(loaded_files.len(), 1);
        assert_eq!(loaded_entries.len(), 1);
        assert_eq!(loaded_files[0].path, "a.rs");
    }

    #[test]
    fn missing_files_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = SnippetManifest::new(dir.path().to_path_buf());
        assert!(manifest.load_files().is_empty());
        assert!(manifest.load_semantic_entries().is_empty());
    }

    #[test]
    fn malformed_file_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = SnippetManifest::new(dir.path().to_path_buf());
        std::fs::write(manifest.index_path(), "not json").unwrap();
        assert!(manifest.load_files().is_empty());
    }
}
