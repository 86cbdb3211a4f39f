//! Layered configuration: built-in defaults → optional `.codecontext.toml`
//! in the index root → environment variables → CLI flags (applied by the
//! caller after [`Config::load`] returns), in ascending priority.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::chunk::{DEFAULT_CHARS_PER_TOKEN, DEFAULT_CHUNK_TOKEN_LIMIT, DEFAULT_OVERLAP_TOKENS};

pub const DEFAULT_HTTP_PORT: u16 = 7450;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub index_root: PathBuf,
    pub data_dir: PathBuf,
    pub sqlite_db: PathBuf,
    pub engine_url: Option<String>,
    pub reranker_url: Option<String>,
    pub ann_sink_url: Option<String>,
    pub http_port: u16,
    pub fast_start: bool,
    pub mode: IndexMode,
    pub namespace: Option<String>,
    pub tenant: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub extensions: Vec<String>,
    pub skip_dirs: Vec<String>,
    pub chunk_token_limit: usize,
    pub overlap_tokens: usize,
    pub chars_per_token: usize,
    /// Fan index jobs out through the durable `jobs.jsonl` queue sink
    /// instead of invoking the indexer purely in-process.
    pub queue_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        let index_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let data_dir = index_root.join(".codecontext");
        Config {
            sqlite_db: data_dir.join("graph.db"),
            data_dir,
            index_root,
            engine_url: None,
            reranker_url: None,
            ann_sink_url: None,
            http_port: DEFAULT_HTTP_PORT,
            fast_start: false,
            mode: IndexMode::Incremental,
            namespace: None,
            tenant: None,
            metadata: BTreeMap::new(),
            extensions: default_extensions(),
            skip_dirs: default_skip_dirs(),
            chunk_token_limit: DEFAULT_CHUNK_TOKEN_LIMIT,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            queue_enabled: false,
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "pyi", "go", "java"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_skip_dirs() -> Vec<String> {
    ["node_modules", "target", ".git", "dist", "build", "vendor", "__pycache__", ".codecontext"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// Load defaults, overlay `.codecontext.toml` from `index_root` if
    /// present, then overlay environment variables. CLI flags are applied
    /// by the caller on top of the returned `Config`.
    pub fn load(index_root: Option<PathBuf>) -> Self {
        let mut cfg = Config::default();
        if let Some(root) = index_root {
            cfg.index_root = root;
            cfg.data_dir = cfg.index_root.join(".codecontext");
            cfg.sqlite_db = cfg.data_dir.join("graph.db");
        }

        cfg.apply_toml_file(&cfg.index_root.join(".codecontext.toml").clone());
        cfg.apply_env();
        cfg
    }

    fn apply_toml_file(&mut self, path: &Path) {
        let Ok(content) = std::fs::read_to_string(path) else { return };
        let Ok(table) = content.parse::<toml::Table>() else {
            tracing::warn!(path = %path.display(), "malformed .codecontext.toml, ignoring");
            return;
        };

        if let Some(exts) = table.get("extensions").and_then(|v| v.as_array()) {
            self.extensions =
                exts.iter().filter_map(|v| v.as_str().map(|s| s.trim_start_matches('.').to_string())).collect();
        }
        if let Some(dirs) = table.get("skip_dirs").and_then(|v| v.as_array()) {
            self.skip_dirs = dirs.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect();
        }
        if let Some(v) = table.get("chunk_token_limit").and_then(|v| v.as_integer()) {
            self.chunk_token_limit = v.max(1) as usize;
        }
        if let Some(v) = table.get("overlap_tokens").and_then(|v| v.as_integer()) {
            self.overlap_tokens = v.max(0) as usize;
        }
        if let Some(v) = table.get("reranker_url").and_then(|v| v.as_str()) {
            self.reranker_url = Some(v.to_string());
        }
        if let Some(v) = table.get("ann_sink_url").and_then(|v| v.as_str()) {
            self.ann_sink_url = Some(v.to_string());
        }
        if let Some(v) = table.get("queue_enabled").and_then(|v| v.as_bool()) {
            self.queue_enabled = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("INDEX_ROOT") {
            self.index_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SQLITE_DB") {
            self.sqlite_db = PathBuf::from(v);
        } else {
            self.sqlite_db = self.data_dir.join("graph.db");
        }
        if let Ok(v) = std::env::var("ENGINE_URL") {
            self.engine_url = Some(v);
        }
        if let Ok(v) = std::env::var("ANN_SINK_URL") {
            self.ann_sink_url = Some(v);
        }
        if let Ok(v) = std::env::var("MCP_HTTP_PORT") {
            if let Ok(port) = v.parse() {
                self.http_port = port;
            }
        }
        if let Ok(v) = std::env::var("MCP_FAST_START") {
            self.fast_start = v == "1";
        }
        if let Ok(v) = std::env::var("INDEX_MODE") {
            self.mode = if v == "full" { IndexMode::Full } else { IndexMode::Incremental };
        }
        if let Ok(v) = std::env::var("INDEX_NAMESPACE") {
            self.namespace = Some(v);
        }
        if let Ok(v) = std::env::var("INDEX_TENANT") {
            self.tenant = Some(v);
        }
        if let Ok(v) = std::env::var("MCP_QUEUE_ENABLED") {
            self.queue_enabled = v == "1";
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.http_port, DEFAULT_HTTP_PORT);
        assert!(cfg.extensions.contains(&"rs".to_string()));
        assert_eq!(cfg.mode, IndexMode::Incremental);
    }

    #[test]
    fn toml_file_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".codecontext.toml"),
            "extensions = [\"rs\"]\nchunk_token_limit = 50\n",
        )
        .unwrap();
        let cfg = Config::load(Some(dir.path().to_path_buf()));
        assert_eq!(cfg.extensions, vec!["rs".to_string()]);
        assert_eq!(cfg.chunk_token_limit, 50);
    }

    #[test]
    fn missing_toml_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(Some(dir.path().to_path_buf()));
        assert!(cfg.extensions.len() > 1);
    }

    #[test]
    fn queue_enabled_defaults_to_false_and_is_overridable_via_toml() {
        let cfg = Config::default();
        assert!(!cfg.queue_enabled);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".codecontext.toml"), "queue_enabled = true\n").unwrap();
        let cfg = Config::load(Some(dir.path().to_path_buf()));
        assert!(cfg.queue_enabled);
    }
}
