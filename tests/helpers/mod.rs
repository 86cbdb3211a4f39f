//! Test harness for end-to-end JSON-RPC integration tests.
//!
//! Builds a real `GraphStore` + `SnippetManifest` from fixture files copied
//! into a temp dir, runs one indexing pass, then dispatches JSON-RPC
//! requests via `dispatch_request()` directly (no subprocess, no HTTP).

pub mod fixtures;

use codecontext_server::config::{Config, IndexMode};
use codecontext_server::engine::{EngineHandle, FallbackEngine};
use codecontext_server::indexer;
use codecontext_server::manifest::SnippetManifest;
use codecontext_server::orchestrator::Orchestrator;
use codecontext_server::policy::PolicyFilter;
use codecontext_server::rpc::{dispatch_request, AppState, ShutdownHandle};
use codecontext_server::store::GraphStore;
use codecontext_server::weights::WeightManager;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestHarness {
    pub state: Arc<AppState>,
    _temp_dir: Option<TempDir>,
}

impl TestHarness {
    /// Create a harness from a named fixture directory: copies the fixture
    /// into a temp dir, runs a full index pass, starts the fallback
    /// semantic engine over the resulting snippet manifest, and constructs
    /// an `AppState` ready to dispatch requests against.
    pub fn from_fixture(name: &str) -> Self {
        let fixture_src =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
        assert!(fixture_src.exists(), "Fixture '{name}' not found at {}", fixture_src.display());

        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fixtures::copy_dir_recursive(&fixture_src, temp_dir.path());
        let mut harness = Self::from_dir(temp_dir.path());
        harness._temp_dir = Some(temp_dir);
        harness
    }

    /// Create a harness directly over an existing directory (e.g. a bare
    /// `tempfile::tempdir()` the caller keeps alive), without copying in any
    /// fixture files. Used for empty-repository boundary tests.
    pub fn from_dir(root: &std::path::Path) -> Self {
        let mut cfg = Config::default();
        cfg.index_root = root.to_path_buf();
        cfg.data_dir = root.join(".codecontext");
        cfg.sqlite_db = cfg.data_dir.join("graph.db");
        cfg.mode = IndexMode::Full;
        std::fs::create_dir_all(&cfg.data_dir).expect("create data dir");

        let graph = Arc::new(GraphStore::open(&cfg.sqlite_db).expect("open graph store"));
        let manifest = SnippetManifest::new(cfg.data_dir.clone());
        indexer::run_index(&cfg, &graph, &manifest).expect("index pass failed");

        let policy = PolicyFilter::new(vec![cfg.index_root.clone(), cfg.data_dir.clone()]);
        let weights = Arc::new(WeightManager::load(WeightManager::default_path(&cfg.data_dir)));
        let entries = manifest.load_semantic_entries();
        let engine = Arc::new(EngineHandle::Fallback(FallbackEngine::new(entries)));

        let orchestrator = Arc::new(Orchestrator {
            graph,
            manifest,
            engine,
            policy,
            weights: weights.clone(),
            index_root: cfg.index_root.clone(),
            reranker: None,
        });

        let state = Arc::new(AppState {
            orchestrator,
            weights,
            server_name: "codecontext".to_string(),
            server_version: "0.0.0-test".to_string(),
            shutdown: ShutdownHandle::inert(),
        });

        TestHarness { state, _temp_dir: None }
    }

    /// Dispatch a JSON-RPC request object; `None` for notifications.
    pub async fn dispatch(&self, msg: Value) -> Option<Value> {
        dispatch_request(&self.state, &msg).await
    }

    /// Call an MCP tool by name with the given arguments. Returns
    /// `(parsed_text_payload, is_error)`.
    pub async fn call_tool(&self, tool: &str, args: Value) -> (Value, bool) {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": tool, "arguments": args }
        });
        let resp = self.dispatch(msg).await.expect("expected response for tools/call");
        let is_error = resp["result"]["isError"].as_bool().unwrap_or(false);
        let text = resp["result"]["content"][0]["text"].as_str().unwrap_or("").to_string();
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        (parsed, is_error)
    }

    pub async fn initialize(&self) -> Value {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": { "name": "probe" } }
        });
        self.dispatch(msg).await.expect("expected initialize response")
    }
}
