//! Import-edge derivation: two complementary passes unioned together.
//!
//! Pass (a) lives in [`crate::ast`] — tree-sitter import/re-export node
//! extraction, precise where the grammar supports it. Pass (b) lives here —
//! a best-effort, regex-based scan that resolves import strings by filename,
//! used both as the primary signal for languages tree-sitter doesn't parse
//! for imports and as a robustness net when the AST pass finds nothing.
//! Both passes emit raw import strings; this module resolves them to
//! in-tree files and unions + dedups + drops self-loops.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};

use crate::indexer::ScannedFile;
use crate::model::Edge;

fn regex_patterns() -> Vec<(HashSet<&'static str>, regex::Regex)> {
    vec![
        (
            ["c", "h", "cpp", "cc", "cxx", "hpp", "hh", "hxx"].into_iter().collect(),
            regex::Regex::new(r#"#include\s+"([^"]+)""#).unwrap(),
        ),
        (
            ["py", "pyi"].into_iter().collect(),
            regex::Regex::new(r"(?m)(?:from\s+([\w.]+)\s+import|^import\s+([\w.]+))").unwrap(),
        ),
        (
            ["js", "jsx", "ts", "tsx", "mjs", "cjs"].into_iter().collect(),
            regex::Regex::new(r#"(?:from\s+['"]([^'"]+)['"]|require\s*\(\s*['"]([^'"]+)['"]\s*\))"#)
                .unwrap(),
        ),
        (
            ["rs"].into_iter().collect(),
            regex::Regex::new(r"(?:use\s+(?:crate|super)::([\w]+)|mod\s+([\w]+)\s*;)").unwrap(),
        ),
        (
            ["go"].into_iter().collect(),
            regex::Regex::new(r#"import\s+(?:\(\s*)?(?:"([^"]+)")"#).unwrap(),
        ),
        (
            ["java"].into_iter().collect(),
            regex::Regex::new(r"(?m)^import\s+(?:static\s+)?([\w.]+)\s*;").unwrap(),
        ),
    ]
}

/// Raw import strings found in `content` via regex for the given extension.
pub fn extract_regex_imports(content: &str, ext: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (exts, re) in regex_patterns() {
        if !exts.contains(ext) {
            continue;
        }
        for cap in re.captures_iter(content) {
            if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
                let s = m.as_str();
                if !s.is_empty() {
                    out.push(s.to_string());
                }
            }
        }
    }
    out
}

struct FilenameIndex {
    by_full_name: BTreeMap<String, Vec<String>>,
    by_stem: BTreeMap<String, Vec<String>>,
}

impl FilenameIndex {
    fn build(files: &[ScannedFile]) -> Self {
        let mut by_full_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut by_stem: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for f in files {
            let full = f.rel_path.rsplit('/').next().unwrap_or(&f.rel_path);
            by_full_name.entry(full.to_string()).or_default().push(f.rel_path.clone());
            let stem = full.rsplit_once('.').map(|(s, _)| s).unwrap_or(full);
            by_stem.entry(stem.to_string()).or_default().push(f.rel_path.clone());
        }
        FilenameIndex { by_full_name, by_stem }
    }

    /// Resolve a raw import string to an in-tree file path, when unambiguous
    /// or when one candidate's path ends with the import string.
    fn resolve(&self, import_str: &str) -> Option<String> {
        let filename = import_str.rsplit('/').next().unwrap_or(import_str);
        if let Some(candidates) = self.by_full_name.get(filename) {
            if candidates.len() == 1 {
                return Some(candidates[0].clone());
            }
            if let Some(best) = candidates.iter().find(|c| c.ends_with(import_str)) {
                return Some(best.clone());
            }
            return candidates.first().cloned();
        }

        let last = import_str.rsplit(['.', '/']).next().unwrap_or(import_str);
        if let Some(candidates) = self.by_stem.get(last) {
            if candidates.len() == 1 {
                return Some(candidates[0].clone());
            }
            return candidates.first().cloned();
        }

        None
    }
}

/// Build the full edge set for `files`: regex pass (b) plus AST pass (a)
/// import strings supplied by the caller per file, unioned and deduplicated,
/// self-loops dropped.
pub fn build_edges(files: &[ScannedFile], ast_imports: &BTreeMap<String, Vec<String>>) -> Vec<Edge> {
    let index = FilenameIndex::build(files);

    let pairs: Vec<(String, String)> = files
        .par_iter()
        .flat_map_iter(|f| {
            let mut raw: Vec<String> = Vec::new();
            if let Ok(content) = std::fs::read_to_string(&f.abs_path) {
                raw.extend(extract_regex_imports(&content, &f.ext));
            }
            if let Some(ast_raw) = ast_imports.get(&f.rel_path) {
                raw.extend(ast_raw.iter().cloned());
            }
            let from = f.rel_path.clone();
            raw.into_iter()
                .filter_map(move |s| index.resolve(&s))
                .map(move |to| (from.clone(), to))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut edges = Vec::new();
    for (from, to) in pairs {
        if from == to {
            continue;
        }
        if seen.insert((from.clone(), to.clone())) {
            edges.push(Edge { from, to, kind: "import".to_string() });
        }
    }
    edges.sort_by(|a, b| (a.from.as_str(), a.to.as_str()).cmp(&(b.from.as_str(), b.to.as_str())));
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_python_import_to_unique_file() {
        let files = vec![
            ScannedFile { rel_path: "a.py".into(), abs_path: "/tmp/a.py".into(), ext: "py".into() },
            ScannedFile { rel_path: "util.py".into(), abs_path: "/tmp/util.py".into(), ext: "py".into() },
        ];
        let raw = extract_regex_imports("import util\n", "py");
        assert_eq!(raw, vec!["util".to_string()]);
        let index = FilenameIndex::build(&files);
        assert_eq!(index.resolve("util"), Some("util.py".to_string()));
    }

    #[test]
    fn self_loops_are_excluded() {
        let files = vec![ScannedFile {
            rel_path: "a.rs".into(),
            abs_path: std::env::temp_dir().join("importgraph_a.rs"),
            ext: "rs".into(),
        }];
        std::fs::write(&files[0].abs_path, "mod a;\n").unwrap();
        let mut ast_imports = BTreeMap::new();
        ast_imports.insert("a.rs".to_string(), vec!["a".to_string()]);
        let edges = build_edges(&files, &ast_imports);
        assert!(edges.is_empty(), "self-loop must be dropped: {edges:?}");
    }

    #[test]
    fn duplicate_raw_imports_deduplicate() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rs");
        let b = dir.path().join("util.rs");
        std::fs::write(&a, "use crate::util;\nmod util;\n").unwrap();
        std::fs::write(&b, "pub fn f() {}\n").unwrap();
        let files = vec![
            ScannedFile { rel_path: "a.rs".into(), abs_path: a, ext: "rs".into() },
            ScannedFile { rel_path: "util.rs".into(), abs_path: b, ext: "rs".into() },
        ];
        let edges = build_edges(&files, &BTreeMap::new());
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, "a.rs");
        assert_eq!(edges[0].to, "util.rs");
    }
}
