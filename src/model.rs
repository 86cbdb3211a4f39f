//! Core data entities shared across the indexer, graph store, and ranker.
//!
//! All paths are repo-relative and forward-slash normalized; callers are
//! responsible for normalizing before constructing these types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A symbol's structural role. Only top-level functions, classes, and class
/// methods are ever recorded — everything else (enums, traits, constants,
/// type aliases) is dropped during indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Unknown,
}

impl SymbolKind {
    pub fn label(self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
            SymbolKind::Unknown => "unknown",
        }
    }
}

/// `{ name, kind, file, startLine, endLine }`. Lines are 1-based inclusive.
/// Method names are qualified `Class.method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// `{ path, content, mtimeMs, symbols[], namespace?, tenant?, metadata{} }`.
/// Unique by `path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub path: String,
    pub content: String,
    pub mtime_ms: u64,
    pub symbols: Vec<Symbol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// `{ from, to, kind="import" }`. `UNIQUE(from, to, kind)`; self-loops excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default = "default_edge_kind")]
    pub kind: String,
}

fn default_edge_kind() -> String {
    "import".to_string()
}

/// `{ id, file, symbol, startLine, endLine, text, namespace?, tenant?, metadata{} }`.
/// `id = "<file>:<symbol>" | "<file>:<symbol>:chunk<N>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticEntry {
    pub id: String,
    pub file: String,
    pub symbol: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// `{ semantic, lexical, graph, reranker }`, always summing to 1 after
/// normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub semantic: f64,
    pub lexical: f64,
    pub graph: f64,
    pub reranker: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Weights { semantic: 0.6, lexical: 0.25, graph: 0.1, reranker: 0.05 }
    }
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.semantic + self.lexical + self.graph + self.reranker
    }

    /// Renormalize so the four components sum to 1, clamping each to [0,1] first.
    pub fn normalize(&mut self) {
        self.semantic = self.semantic.clamp(0.0, 1.0);
        self.lexical = self.lexical.clamp(0.0, 1.0);
        self.graph = self.graph.clamp(0.0, 1.0);
        self.reranker = self.reranker.clamp(0.0, 1.0);
        let total = self.sum();
        if total > 0.0 {
            self.semantic /= total;
            self.lexical /= total;
            self.graph /= total;
            self.reranker /= total;
        } else {
            *self = Weights::default();
        }
    }
}

/// Query-intent classification, driving token budget + effective top-K.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Refactor,
    Test,
    Performance,
    Docs,
    Dataflow,
    General,
}

impl Intent {
    pub fn label(self) -> &'static str {
        match self {
            Intent::Refactor => "refactor",
            Intent::Test => "test",
            Intent::Performance => "performance",
            Intent::Docs => "docs",
            Intent::Dataflow => "dataflow",
            Intent::General => "general",
        }
    }
}

/// `{ intent, tokenBudget, requestedTopK, effectiveTopK, notes[] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextProfile {
    pub intent: Intent,
    pub token_budget: usize,
    pub requested_top_k: usize,
    pub effective_top_k: usize,
    pub notes: Vec<String>,
}

/// A single search hit as it flows through the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub file: String,
    pub symbol: String,
    pub start_line: usize,
    pub end_line: usize,
    pub snippet: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signals: Option<Signals>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Signals {
    pub semantic: f64,
    pub lexical: f64,
    pub graph: f64,
    pub reranker: f64,
}
