//! Parse source, extract symbols, derive the import graph, chunk snippets,
//! write the Graph Store and Snippet Manifest atomically.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use ignore::WalkBuilder;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::ann::AnnSink;
use crate::ast::{self, SymbolKind as AstSymbolKind};
use crate::chunk::{chunk_symbol, DEFAULT_CHARS_PER_TOKEN, DEFAULT_CHUNK_TOKEN_LIMIT, DEFAULT_OVERLAP_TOKENS};
use crate::config::{Config, IndexMode};
use crate::importgraph;
use crate::manifest::SnippetManifest;
use crate::model::{Edge, FileMeta, SemanticEntry, Symbol, SymbolKind};
use crate::policy::PolicyFilter;
use crate::store::GraphStore;

const MAX_REBUILD_ATTEMPTS: u32 = 3;

/// A file eligible for indexing: repo-relative path, absolute path, extension.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub ext: String,
}

#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub files: usize,
    pub symbols: usize,
    pub edges: usize,
    pub entries: usize,
    pub duration_ms: u64,
}

fn normalize_rel_path(p: &std::path::Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

/// Enumerate eligible source files under `root`, honoring the extension
/// allow-list, configured skip directories, and the policy filter.
pub fn enumerate_files(cfg: &Config, policy: &PolicyFilter) -> Vec<ScannedFile> {
    let exts: std::collections::HashSet<&str> = cfg.extensions.iter().map(|s| s.as_str()).collect();
    let mut builder = WalkBuilder::new(&cfg.index_root);
    builder.hidden(false).git_ignore(true);
    for dir in &cfg.skip_dirs {
        let dir = dir.clone();
        builder.filter_entry(move |e| e.file_name().to_str() != Some(dir.as_str()));
    }

    let mut out = Vec::new();
    for entry in builder.build().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_string(),
            None => continue,
        };
        if !exts.contains(ext.as_str()) {
            continue;
        }
        if !policy.allow_for_listing(path) {
            continue;
        }
        let Ok(rel) = path.strip_prefix(&cfg.index_root) else { continue };
        out.push(ScannedFile { rel_path: normalize_rel_path(rel), abs_path: path.to_path_buf(), ext });
    }
    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    out
}

fn mtime_ms(path: &std::path::Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn map_ast_kind(kind: AstSymbolKind, has_parent: bool) -> Option<SymbolKind> {
    match kind {
        AstSymbolKind::Function if has_parent => Some(SymbolKind::Method),
        AstSymbolKind::Function => Some(SymbolKind::Function),
        AstSymbolKind::Method => Some(SymbolKind::Method),
        AstSymbolKind::Class => Some(SymbolKind::Class),
        // Only top-level functions, classes, and class methods are recorded;
        // everything else (structs, enums, traits, impls, aliases, consts)
        // is dropped per the data model.
        _ => None,
    }
}

/// Parse a single file's content and return (Symbols, raw AST import
/// strings). Returns empty symbols (not an error) on parse failure — a
/// single file's parse error demotes it to "no symbols" but never fails
/// the pass.
fn parse_one(rel_path: &str, content: &str, ext: &str) -> (Vec<Symbol>, Vec<String>) {
    let ast_imports = ast::extract_ast_imports(content, ext);
    let Some(file_ast) = ast::parse_file(content, ext) else {
        return (Vec::new(), ast_imports);
    };

    let mut symbols = Vec::with_capacity(file_ast.symbols.len());
    for sym in &file_ast.symbols {
        let has_parent = sym.parent_idx.is_some();
        let Some(kind) = map_ast_kind(sym.kind, has_parent) else { continue };
        let name = if kind == SymbolKind::Method {
            match sym.parent_idx.and_then(|idx| file_ast.symbols.get(idx)) {
                Some(parent) if !parent.name.is_empty() => format!("{}.{}", parent.name, sym.name),
                _ => sym.name.clone(),
            }
        } else {
            sym.name.clone()
        };
        if name.is_empty() || sym.start_line == 0 {
            continue;
        }
        symbols.push(Symbol {
            name,
            kind,
            file: rel_path.to_string(),
            start_line: sym.start_line,
            end_line: sym.end_line.max(sym.start_line),
        });
    }
    (symbols, ast_imports)
}

fn entries_for_symbol(cfg: &Config, file: &FileMeta, sym: &Symbol) -> Vec<SemanticEntry> {
    let lines: Vec<&str> = file.content.lines().collect();
    if sym.start_line == 0 || sym.start_line > lines.len() {
        return Vec::new();
    }
    let end = sym.end_line.min(lines.len());
    let slice = &lines[sym.start_line - 1..end];
    let chunks = chunk_symbol(
        slice,
        sym.start_line,
        cfg.chunk_token_limit.max(1),
        cfg.overlap_tokens,
        cfg.chars_per_token.max(1),
    );

    let multi = chunks.len() > 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, c)| SemanticEntry {
            id: if multi {
                format!("{}:{}:chunk{}", sym.file, sym.name, i)
            } else {
                format!("{}:{}", sym.file, sym.name)
            },
            file: sym.file.clone(),
            symbol: sym.name.clone(),
            start_line: c.start_line,
            end_line: c.end_line,
            text: c.text,
            namespace: cfg.namespace.clone(),
            tenant: cfg.tenant.clone(),
            metadata: cfg.metadata.clone(),
        })
        .collect()
}

/// Run one complete indexing pass: enumerate, parse (or reuse incrementally),
/// derive edges, chunk, and write the Graph Store + Snippet Manifest
/// atomically. Returns summary statistics.
pub fn run_index(
    cfg: &Config,
    graph: &GraphStore,
    manifest: &SnippetManifest,
) -> Result<IndexStats, String> {
    let start = Instant::now();
    let policy = PolicyFilter::new([cfg.index_root.clone()]);
    let scanned = enumerate_files(cfg, &policy);

    let (prev_files, prev_entries) = if cfg.mode == IndexMode::Incremental {
        (manifest.load_files(), manifest.load_semantic_entries())
    } else {
        (Vec::new(), Vec::new())
    };
    let prev_by_path: BTreeMap<&str, &FileMeta> = prev_files.iter().map(|f| (f.path.as_str(), f)).collect();
    let mut prev_entries_by_path: BTreeMap<&str, Vec<&SemanticEntry>> = BTreeMap::new();
    for e in &prev_entries {
        prev_entries_by_path.entry(e.file.as_str()).or_default().push(e);
    }

    struct Built {
        file: FileMeta,
        entries: Vec<SemanticEntry>,
        ast_imports: Vec<String>,
    }

    let built: Vec<Built> = scanned
        .par_iter()
        .filter_map(|sf| {
            let mtime = mtime_ms(&sf.abs_path);

            if let Some(prev) = prev_by_path.get(sf.rel_path.as_str()) {
                if prev.mtime_ms == mtime {
                    let mut reused_file = (*prev).clone();
                    reused_file.namespace = cfg.namespace.clone();
                    reused_file.tenant = cfg.tenant.clone();
                    reused_file.metadata = cfg.metadata.clone();
                    let reused_entries: Vec<SemanticEntry> = prev_entries_by_path
                        .get(sf.rel_path.as_str())
                        .into_iter()
                        .flatten()
                        .map(|e| {
                            let mut e = (*e).clone();
                            e.namespace = cfg.namespace.clone();
                            e.tenant = cfg.tenant.clone();
                            e.metadata = cfg.metadata.clone();
                            e
                        })
                        .collect();
                    return Some(Built { file: reused_file, entries: reused_entries, ast_imports: Vec::new() });
                }
            }

            let content = match std::fs::read_to_string(&sf.abs_path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = sf.rel_path.as_str(), error = %e, "failed to read file, skipping");
                    return None;
                }
            };

            let (symbols, ast_imports) = parse_one(&sf.rel_path, &content, &sf.ext);
            let file = FileMeta {
                path: sf.rel_path.clone(),
                content,
                mtime_ms: mtime,
                symbols,
                namespace: cfg.namespace.clone(),
                tenant: cfg.tenant.clone(),
                metadata: cfg.metadata.clone(),
            };
            let mut entries = Vec::new();
            for sym in &file.symbols {
                entries.extend(entries_for_symbol(cfg, &file, sym));
            }
            Some(Built { file, entries, ast_imports })
        })
        .collect();

    let files: Vec<FileMeta> = built.iter().map(|b| b.file.clone()).collect();
    let all_symbols: Vec<Symbol> = files.iter().flat_map(|f| f.symbols.clone()).collect();
    let entries: Vec<SemanticEntry> = built.iter().flat_map(|b| b.entries.clone()).collect();

    let ast_imports_map: BTreeMap<String, Vec<String>> = built
        .iter()
        .filter(|b| !b.ast_imports.is_empty())
        .map(|b| (b.file.path.clone(), b.ast_imports.clone()))
        .collect();
    let edges = importgraph::build_edges(&scanned, &ast_imports_map);

    let file_paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();

    rebuild_with_retry(graph, &file_paths, &all_symbols, &edges)?;
    manifest.write(&files, &entries)?;
    manifest.write_edges_debug(&edges).ok();

    if let Some(url) = &cfg.ann_sink_url {
        AnnSink::new(url.clone()).upsert_all(&entries);
    }

    let stats = IndexStats {
        files: files.len(),
        symbols: all_symbols.len(),
        edges: edges.len(),
        entries: entries.len(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    debug!(
        files = stats.files,
        symbols = stats.symbols,
        edges = stats.edges,
        entries = stats.entries,
        time_ms = stats.duration_ms,
        "index pass complete"
    );
    Ok(stats)
}

fn rebuild_with_retry(
    graph: &GraphStore,
    files: &[String],
    symbols: &[Symbol],
    edges: &[Edge],
) -> Result<(), String> {
    let mut last_err = String::new();
    for attempt in 0..MAX_REBUILD_ATTEMPTS {
        match graph.rebuild(files, symbols, edges) {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_err = e;
                if attempt + 1 < MAX_REBUILD_ATTEMPTS {
                    std::thread::sleep(std::time::Duration::from_millis(50 * (attempt as u64 + 1)));
                }
            }
        }
    }
    Err(format!("graph store rebuild failed after {MAX_REBUILD_ATTEMPTS} attempts: {last_err}"))
}

#[allow(dead_code)]
const _DEFAULTS_DOC: (usize, usize, usize) =
    (DEFAULT_CHUNK_TOKEN_LIMIT, DEFAULT_OVERLAP_TOKENS, DEFAULT_CHARS_PER_TOKEN);

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &std::path::Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn full_index_pass_populates_stores() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "src/a.rs",
            "pub fn foo() {\n    1\n}\n\npub struct Widget;\n\nimpl Widget {\n    pub fn bar(&self) {}\n}\n",
        );
        write(dir.path(), "src/b.rs", "use crate::a;\nfn main() {}\n");

        let mut cfg = Config::default();
        cfg.index_root = dir.path().to_path_buf();
        cfg.data_dir = dir.path().join(".codecontext");
        cfg.mode = IndexMode::Full;

        let graph = GraphStore::open_in_memory().unwrap();
        let manifest = SnippetManifest::new(cfg.data_dir.clone());

        let stats = run_index(&cfg, &graph, &manifest).unwrap();
        assert_eq!(stats.files, 2);
        assert!(stats.symbols >= 2, "expected foo + bar at least: {stats:?}");

        let files = manifest.load_files();
        assert_eq!(files.len(), 2);
        let entries = manifest.load_semantic_entries();
        assert!(!entries.is_empty());

        let (f, _s, e) = graph.counts().unwrap();
        assert_eq!(f, 2);
        assert!(e >= 1, "expected at least one import edge a<-b");
    }

    #[test]
    fn incremental_pass_reuses_unchanged_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.rs", "pub fn foo() {}\n");
        write(dir.path(), "src/b.rs", "pub fn bar() {}\n");

        let mut cfg = Config::default();
        cfg.index_root = dir.path().to_path_buf();
        cfg.data_dir = dir.path().join(".codecontext");
        cfg.mode = IndexMode::Full;

        let graph = GraphStore::open_in_memory().unwrap();
        let manifest = SnippetManifest::new(cfg.data_dir.clone());
        run_index(&cfg, &graph, &manifest).unwrap();
        let pass1_entries = manifest.load_semantic_entries();

        // Modify only b.rs's content (and therefore its mtime-affecting body).
        write(dir.path(), "src/b.rs", "pub fn bar() { /* changed */ }\n");
        cfg.mode = IndexMode::Incremental;
        run_index(&cfg, &graph, &manifest).unwrap();
        let pass2_entries = manifest.load_semantic_entries();

        let a1 = pass1_entries.iter().find(|e| e.file == "src/a.rs").unwrap();
        let a2 = pass2_entries.iter().find(|e| e.file == "src/a.rs").unwrap();
        assert_eq!(a1.text, a2.text, "unchanged file's entries should be reused verbatim");
    }

    #[test]
    fn ann_sink_failure_does_not_fail_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.rs", "pub fn foo() {}\n");

        let mut cfg = Config::default();
        cfg.index_root = dir.path().to_path_buf();
        cfg.data_dir = dir.path().join(".codecontext");
        cfg.mode = IndexMode::Full;
        // Port 0 never accepts connections; the sink must swallow this.
        cfg.ann_sink_url = Some("http://127.0.0.1:0/upsert".to_string());

        let graph = GraphStore::open_in_memory().unwrap();
        let manifest = SnippetManifest::new(cfg.data_dir.clone());
        let stats = run_index(&cfg, &graph, &manifest).unwrap();
        assert_eq!(stats.files, 1);
    }

    #[test]
    fn parse_errors_demote_file_to_no_symbols_without_failing_pass() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/weird.rs", "fn totally ( not valid rust {{{{ ");
        write(dir.path(), "src/ok.rs", "pub fn good() {}\n");

        let mut cfg = Config::default();
        cfg.index_root = dir.path().to_path_buf();
        cfg.data_dir = dir.path().join(".codecontext");
        cfg.mode = IndexMode::Full;

        let graph = GraphStore::open_in_memory().unwrap();
        let manifest = SnippetManifest::new(cfg.data_dir.clone());
        let stats = run_index(&cfg, &graph, &manifest).unwrap();
        assert_eq!(stats.files, 2, "both files still get indexed");
    }
}
