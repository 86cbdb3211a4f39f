//! Composes the semantic engine, ranker, and profiler into the two
//! operations the RPC surface actually needs: `search` and `get_file`.
//! Constructed once at startup and shared behind an `Arc` by both the
//! stdio and HTTP transports.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::{EngineHandle, RerankerClient};
use crate::manifest::SnippetManifest;
use crate::model::{ContextProfile, SearchResult, Symbol};
use crate::policy::{Decision, PolicyFilter};
use crate::profiler;
use crate::ranker;
use crate::store::GraphStore;
use crate::weights::WeightManager;

/// Distinguishes the three request-path failure modes the RPC layer maps to
/// distinct JSON-RPC error codes (-32001/-32002/-32003); anything else is
/// an internal error (-32000).
#[derive(Debug)]
pub enum OrchestratorError {
    RootNotAllowed(String),
    PolicyDenied(String),
    ReadFailure(String),
    Internal(String),
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::RootNotAllowed(m)
            | OrchestratorError::PolicyDenied(m)
            | OrchestratorError::ReadFailure(m)
            | OrchestratorError::Internal(m) => write!(f, "{m}"),
        }
    }
}

pub struct FileView {
    pub path: String,
    pub preview: String,
    pub truncated: bool,
    pub symbols: Vec<Symbol>,
    pub imports: Vec<String>,
    pub dependents: Vec<String>,
}

const FILE_PREVIEW_MAX_LINES: usize = 40;

pub struct Orchestrator {
    pub graph: Arc<GraphStore>,
    pub manifest: SnippetManifest,
    pub engine: Arc<EngineHandle>,
    pub policy: PolicyFilter,
    pub weights: Arc<WeightManager>,
    pub index_root: PathBuf,
    /// Optional rerank collaborator (§4.6). `None` when no `reranker_url` is
    /// configured; the ranker then falls back to the `semantic` signal.
    pub reranker: Option<Arc<RerankerClient>>,
}

impl Orchestrator {
    /// `search(query, top_k)`: classify intent → fetch candidates from the
    /// semantic engine → compute graph degrees → rank → pack to the
    /// profile's token budget. Packing strategy defaults to
    /// greedy-with-diversity; callers needing MMR go through
    /// [`Orchestrator::search_with_strategy`].
    pub async fn search(&self, query: &str, requested_top_k: Option<usize>) -> Result<(Vec<SearchResult>, ContextProfile), OrchestratorError> {
        self.search_with_strategy(query, requested_top_k, PackStrategy::Greedy).await
    }

    pub async fn search_with_strategy(
        &self,
        query: &str,
        requested_top_k: Option<usize>,
        strategy: PackStrategy,
    ) -> Result<(Vec<SearchResult>, ContextProfile), OrchestratorError> {
        let profile = profiler::build_profile(query, requested_top_k);
        let candidates = self.engine.search(query, profile.effective_top_k.max(8)).await;

        let mut degree_by_file: HashMap<String, u64> = HashMap::new();
        for c in &candidates {
            if !degree_by_file.contains_key(&c.file) {
                let degree = self.graph.degree(&c.file).unwrap_or(0);
                degree_by_file.insert(c.file.clone(), degree);
            }
        }

        let reranker_scores = self.rerank_candidates(query, profile.effective_top_k, &candidates).await;

        let weights = self.weights.current();
        let ranked = ranker::rank(candidates, query, &weights, &degree_by_file, reranker_scores.as_ref());

        let packed = match strategy {
            PackStrategy::Greedy => {
                ranker::pack_greedy(&ranked, profile.token_budget, crate::chunk::DEFAULT_CHARS_PER_TOKEN, profile.effective_top_k)
            }
            PackStrategy::Mmr => ranker::pack_mmr(
                &ranked,
                profile.token_budget,
                ranker::DEFAULT_MMR_LAMBDA,
                crate::chunk::DEFAULT_CHARS_PER_TOKEN,
                profile.effective_top_k,
            ),
        };
        let packed = packed.into_iter().take(profile.effective_top_k.max(1)).collect::<Vec<_>>();

        Ok((packed, profile))
    }

    /// Optional rerank pass (§4.6): POST candidates to the configured
    /// reranker, keyed back to `"file:symbol"` ids the same way
    /// `ranker::rank` does. Any failure — no client configured, request
    /// error, or a response whose length doesn't match — yields `None`, and
    /// the ranker falls back to the `semantic` signal for every candidate.
    async fn rerank_candidates(
        &self,
        query: &str,
        top_k: usize,
        candidates: &[crate::engine::Candidate],
    ) -> Option<HashMap<String, f64>> {
        let reranker = self.reranker.as_ref()?;
        if candidates.is_empty() {
            return None;
        }
        let payload: Vec<(&str, serde_json::Value)> = candidates
            .iter()
            .map(|c| (c.snippet.as_str(), serde_json::json!({ "file": c.file, "symbol": c.symbol })))
            .collect();
        let results = reranker.rerank(query, top_k.max(1), &payload).await?;
        if results.len() != candidates.len() {
            return None;
        }
        Some(
            candidates
                .iter()
                .zip(results.iter())
                .map(|(c, r)| (format!("{}:{}", c.file, c.symbol), r.score))
                .collect(),
        )
    }

    /// Resolve `rel_path` under the index root, enforce the policy filter,
    /// and assemble file preview + local symbols + imports + dependents.
    pub fn get_file(&self, rel_path: &str) -> Result<FileView, OrchestratorError> {
        let abs_path = self.index_root.join(rel_path);
        let canonical_root = self
            .policy
            .allowed_roots()
            .first()
            .cloned()
            .unwrap_or_else(|| self.index_root.clone());

        match self.policy.check(&abs_path) {
            Decision::Allow => {}
            Decision::DeniedRoot => {
                return Err(OrchestratorError::RootNotAllowed(format!(
                    "{} is outside the allowed root {}",
                    rel_path,
                    canonical_root.display()
                )))
            }
            Decision::DeniedExtension | Decision::DeniedSize => {
                return Err(OrchestratorError::PolicyDenied(format!("{rel_path} is denied by policy")))
            }
            Decision::NotFound => {}
        }

        let normalized = normalize(rel_path);
        let files = self.manifest.load_files();
        let meta = files.into_iter().find(|f| f.path == normalized);

        let content = match meta {
            Some(f) => f.content,
            None => std::fs::read_to_string(&abs_path)
                .map_err(|e| OrchestratorError::ReadFailure(format!("failed to read {rel_path}: {e}")))?,
        };

        let (preview, truncated) = preview_lines(&content, FILE_PREVIEW_MAX_LINES);
        let symbols = self.graph.list_symbols(Some(&normalized)).map_err(OrchestratorError::Internal)?;
        let imports = self.graph.list_imports(&normalized).map_err(OrchestratorError::Internal)?;
        let dependents = self.graph.list_dependents(&normalized).map_err(OrchestratorError::Internal)?;

        Ok(FileView { path: normalized, preview, truncated, symbols, imports, dependents })
    }

    /// Full file content for `resources/read`, enforcing the same policy
    /// check as `get_file` but without truncating to the preview window.
    pub fn read_resource(&self, rel_path: &str) -> Result<String, OrchestratorError> {
        self.full_content(rel_path).map(|(_, _, content)| content)
    }

    /// File paths known to the manifest, for `resources/list`.
    pub fn list_files(&self) -> Vec<String> {
        self.manifest.load_files().into_iter().map(|f| f.path).collect()
    }

    pub fn architecture_summary(&self) -> Result<(u64, u64, u64), OrchestratorError> {
        self.graph.counts().map_err(OrchestratorError::Internal)
    }

    pub fn find_refs(&self, symbol_name: &str) -> Result<Vec<String>, OrchestratorError> {
        self.graph.find_refs(symbol_name).map_err(OrchestratorError::Internal)
    }

    pub fn list_symbols(&self, file: Option<&str>) -> Result<Vec<Symbol>, OrchestratorError> {
        self.graph.list_symbols(file).map_err(OrchestratorError::Internal)
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        vec![self.index_root.clone(), self.manifest.index_path().parent().map(Path::to_path_buf).unwrap_or_default()]
    }

    /// Policy-checked full file content, shared by `read_resource` and the
    /// literal find/replace patch tools.
    fn full_content(&self, rel_path: &str) -> Result<(String, PathBuf, String), OrchestratorError> {
        let abs_path = self.index_root.join(rel_path);
        match self.policy.check(&abs_path) {
            Decision::Allow => {}
            Decision::DeniedRoot => return Err(OrchestratorError::RootNotAllowed(format!("{rel_path} is outside the allowed root"))),
            Decision::DeniedExtension | Decision::DeniedSize => {
                return Err(OrchestratorError::PolicyDenied(format!("{rel_path} is denied by policy")))
            }
            Decision::NotFound => {}
        }
        let normalized = normalize(rel_path);
        let files = self.manifest.load_files();
        let content = match files.into_iter().find(|f| f.path == normalized) {
            Some(f) => f.content,
            None => std::fs::read_to_string(&abs_path)
                .map_err(|e| OrchestratorError::ReadFailure(format!("failed to read {rel_path}: {e}")))?,
        };
        Ok((normalized, abs_path, content))
    }

    /// Literal find/replace preview, per the spec's "patches are literal
    /// find/replace" non-goal — no AST-aware rewriting.
    pub fn gen_patch(&self, rel_path: &str, find: &str, replace: &str) -> Result<PatchPreview, OrchestratorError> {
        let (normalized, _abs, content) = self.full_content(rel_path)?;
        let occurrences = content.matches(find).count();
        let preview = content.replacen(find, replace, occurrences.max(1));
        Ok(PatchPreview {
            path: normalized,
            occurrences,
            diff: format!("--- find\n{find}\n+++ replace\n{replace}\n"),
            applied: false,
            preview_excerpt: excerpt_around(&preview, find, replace),
        })
    }

    /// Same literal substitution as [`Orchestrator::gen_patch`], but writes
    /// the result back to disk.
    pub fn apply_patch(&self, rel_path: &str, find: &str, replace: &str) -> Result<PatchPreview, OrchestratorError> {
        let (normalized, abs_path, content) = self.full_content(rel_path)?;
        let occurrences = content.matches(find).count();
        if occurrences == 0 {
            return Err(OrchestratorError::Internal(format!("pattern not found in {normalized}")));
        }
        let updated = content.replace(find, replace);
        std::fs::write(&abs_path, &updated).map_err(|e| OrchestratorError::ReadFailure(format!("failed to write {rel_path}: {e}")))?;
        Ok(PatchPreview {
            path: normalized,
            occurrences,
            diff: format!("--- find\n{find}\n+++ replace\n{replace}\n"),
            applied: true,
            preview_excerpt: excerpt_around(&updated, find, replace),
        })
    }

    /// A refactor plan: local symbols annotated with span length plus the
    /// import/dependent edges a rewrite would need to preserve.
    pub fn plan_refactor(&self, rel_path: &str) -> Result<RefactorPlan, OrchestratorError> {
        let view = self.get_file(rel_path)?;
        let mut steps = Vec::new();
        for sym in &view.symbols {
            let span = sym.end_line.saturating_sub(sym.start_line) + 1;
            if span > LONG_SYMBOL_LINES {
                steps.push(format!("{} ({:?}, {span} lines) is long; consider splitting it", sym.name, sym.kind));
            }
        }
        if steps.is_empty() {
            steps.push("no symbol exceeds the length threshold; refactor opportunistically".to_string());
        }
        Ok(RefactorPlan {
            path: view.path,
            symbols: view.symbols.into_iter().map(|s| s.name).collect(),
            imports: view.imports,
            dependents: view.dependents,
            steps,
        })
    }

    /// Heuristic performance notes: long symbols and naive nested-loop
    /// detection by indentation-insensitive keyword counting.
    pub fn analyze_performance(&self, rel_path: &str) -> Result<PerfReport, OrchestratorError> {
        let (normalized, _abs, content) = self.full_content(rel_path)?;
        let symbols = self.graph.list_symbols(Some(&normalized)).map_err(OrchestratorError::Internal)?;
        let mut notes = Vec::new();
        for sym in &symbols {
            let span = sym.end_line.saturating_sub(sym.start_line) + 1;
            if span > LONG_SYMBOL_LINES {
                notes.push(format!("{} spans {span} lines; long functions are harder for the optimizer and reviewer alike", sym.name));
            }
        }
        let nested_loops = count_nested_loops(&content);
        if nested_loops > 0 {
            notes.push(format!("{nested_loops} potential nested-loop site(s) detected; check for O(n^2) behavior"));
        }
        if notes.is_empty() {
            notes.push("no obvious hotspots from static heuristics".to_string());
        }
        Ok(PerfReport { path: normalized, nested_loops, long_symbols: symbols.iter().filter(|s| s.end_line.saturating_sub(s.start_line) + 1 > LONG_SYMBOL_LINES).count(), notes })
    }

    /// Heuristic smell detection: long functions, duplicate symbol names,
    /// and outstanding TODO/FIXME markers.
    pub fn detect_smells(&self, rel_path: &str) -> Result<SmellReport, OrchestratorError> {
        let (normalized, _abs, content) = self.full_content(rel_path)?;
        let symbols = self.graph.list_symbols(Some(&normalized)).map_err(OrchestratorError::Internal)?;
        let mut smells = Vec::new();

        for sym in &symbols {
            let span = sym.end_line.saturating_sub(sym.start_line) + 1;
            if span > LONG_SYMBOL_LINES {
                smells.push(format!("long function: {} ({span} lines)", sym.name));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for sym in &symbols {
            if !seen.insert(&sym.name) {
                smells.push(format!("duplicate symbol name: {}", sym.name));
            }
        }
        let todo_count = content.matches("TODO").count() + content.matches("FIXME").count();
        if todo_count > 0 {
            smells.push(format!("{todo_count} outstanding TODO/FIXME marker(s)"));
        }
        Ok(SmellReport { path: normalized, smells })
    }

    /// Per-symbol test suggestions, seeded from the file's own functions and
    /// methods (mirrors the `test` prompt's enrichment, but structured).
    pub fn suggest_tests(&self, rel_path: &str) -> Result<Vec<TestSuggestion>, OrchestratorError> {
        let view = self.get_file(rel_path)?;
        Ok(view
            .symbols
            .iter()
            .filter(|s| matches!(s.kind, crate::model::SymbolKind::Function | crate::model::SymbolKind::Method))
            .map(|s| TestSuggestion {
                symbol: s.name.clone(),
                suggestion: format!("cover {}'s behavior at lines {}-{}, including its edge cases", s.name, s.start_line, s.end_line),
            })
            .collect())
    }

    /// Line-level diff between two indexed/on-disk files. Not a structural
    /// diff — set-based line comparison, matching the spec's "literal"
    /// treatment of patch/compare tooling.
    pub fn compare_versions(&self, path_a: &str, path_b: &str) -> Result<VersionDiff, OrchestratorError> {
        let (norm_a, _, content_a) = self.full_content(path_a)?;
        let (norm_b, _, content_b) = self.full_content(path_b)?;
        let lines_a: std::collections::HashSet<&str> = content_a.lines().collect();
        let lines_b: std::collections::HashSet<&str> = content_b.lines().collect();
        let added: Vec<String> = lines_b.difference(&lines_a).take(20).map(|s| s.to_string()).collect();
        let removed: Vec<String> = lines_a.difference(&lines_b).take(20).map(|s| s.to_string()).collect();
        Ok(VersionDiff { path_a: norm_a, path_b: norm_b, added_count: lines_b.difference(&lines_a).count(), removed_count: lines_a.difference(&lines_b).count(), added, removed })
    }
}

const LONG_SYMBOL_LINES: usize = 60;

fn count_nested_loops(content: &str) -> usize {
    let lines: Vec<&str> = content.lines().collect();
    let is_loop = |l: &str| {
        let t = l.trim_start();
        t.starts_with("for ") || t.starts_with("for(") || t.starts_with("while ") || t.starts_with("while(")
    };
    let mut count = 0;
    for (i, line) in lines.iter().enumerate() {
        if !is_loop(line) {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        for later in &lines[i + 1..] {
            if later.trim().is_empty() {
                continue;
            }
            let later_indent = later.len() - later.trim_start().len();
            if later_indent <= indent {
                break;
            }
            if is_loop(later) {
                count += 1;
                break;
            }
        }
    }
    count
}

fn excerpt_around(text: &str, find: &str, replace: &str) -> String {
    let anchor = if replace.is_empty() { find } else { replace };
    match text.find(anchor) {
        Some(pos) => {
            let start = text[..pos].rfind('\n').map(|p| p + 1).unwrap_or(0);
            let end = text[pos..].find('\n').map(|p| pos + p).unwrap_or(text.len());
            text[start..end].to_string()
        }
        None => String::new(),
    }
}

pub struct PatchPreview {
    pub path: String,
    pub occurrences: usize,
    pub diff: String,
    pub applied: bool,
    pub preview_excerpt: String,
}

pub struct RefactorPlan {
    pub path: String,
    pub symbols: Vec<String>,
    pub imports: Vec<String>,
    pub dependents: Vec<String>,
    pub steps: Vec<String>,
}

pub struct PerfReport {
    pub path: String,
    pub nested_loops: usize,
    pub long_symbols: usize,
    pub notes: Vec<String>,
}

pub struct SmellReport {
    pub path: String,
    pub smells: Vec<String>,
}

pub struct TestSuggestion {
    pub symbol: String,
    pub suggestion: String,
}

pub struct VersionDiff {
    pub path_a: String,
    pub path_b: String,
    pub added_count: usize,
    pub removed_count: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum PackStrategy {
    Greedy,
    Mmr,
}

fn normalize(p: &str) -> String {
    p.replace('\\', "/")
}

fn preview_lines(content: &str, max_lines: usize) -> (String, bool) {
    let mut lines = content.lines();
    let preview: Vec<&str> = lines.by_ref().take(max_lines).collect();
    let truncated = lines.next().is_some();
    (preview.join("\n"), truncated)
}
