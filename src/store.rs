//! Persistent relational store of Files/Symbols/Edges (`graph.db`).
//!
//! Each rebuild runs as a single transaction that clears edges → symbols →
//! files, then inserts in that order reversed (files → symbols → edges), so a
//! reader that opens a connection mid-rebuild still sees the pre-rebuild
//! snapshot until the transaction commits.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::model::{Edge, Symbol, SymbolKind};

pub struct GraphStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY,
    file_id INTEGER NOT NULL REFERENCES files(id),
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS edges (
    from_file INTEGER NOT NULL REFERENCES files(id),
    to_file INTEGER NOT NULL REFERENCES files(id),
    kind TEXT NOT NULL,
    UNIQUE(from_file, to_file, kind)
);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_file);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_file);
";

impl GraphStore {
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("open graph.db: {e}"))?;
        conn.execute_batch(SCHEMA).map_err(|e| format!("init schema: {e}"))?;
        Ok(GraphStore { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("open graph.db: {e}"))?;
        conn.execute_batch(SCHEMA).map_err(|e| format!("init schema: {e}"))?;
        Ok(GraphStore { conn: Mutex::new(conn) })
    }

    /// Rebuild the entire store from a fresh indexing pass. `files` is the
    /// complete set of repo-relative paths; `symbols`/`edges` must reference
    /// only paths present in `files` (I1/I4) and contain no duplicate
    /// `(from,to,kind)` tuples (I3) — both are enforced here regardless, as
    /// a second line of defense.
    pub fn rebuild(
        &self,
        files: &[String],
        symbols: &[Symbol],
        edges: &[Edge],
    ) -> Result<(), String> {
        let mut conn = self.conn.lock().map_err(|_| "graph store lock poisoned".to_string())?;
        let tx = conn.transaction().map_err(|e| format!("begin transaction: {e}"))?;

        tx.execute("DELETE FROM edges", []).map_err(|e| e.to_string())?;
        tx.execute("DELETE FROM symbols", []).map_err(|e| e.to_string())?;
        tx.execute("DELETE FROM files", []).map_err(|e| e.to_string())?;

        {
            let mut stmt = tx
                .prepare("INSERT INTO files(path) VALUES (?1)")
                .map_err(|e| e.to_string())?;
            for path in files {
                stmt.execute(params![path]).map_err(|e| e.to_string())?;
            }
        }

        let file_id = |tx: &rusqlite::Transaction, path: &str| -> Result<Option<i64>, String> {
            tx.query_row("SELECT id FROM files WHERE path = ?1", params![path], |r| r.get(0))
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other.to_string()),
                })
        };

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO symbols(file_id, name, kind, start_line, end_line) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(|e| e.to_string())?;
            for sym in symbols {
                if let Some(fid) = file_id(&tx, &sym.file)? {
                    stmt.execute(params![
                        fid,
                        sym.name,
                        sym.kind.label(),
                        sym.start_line as i64,
                        sym.end_line as i64
                    ])
                    .map_err(|e| e.to_string())?;
                }
            }
        }

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO edges(from_file, to_file, kind) VALUES (?1, ?2, ?3)",
                )
                .map_err(|e| e.to_string())?;
            for edge in edges {
                if edge.from == edge.to {
                    continue;
                }
                let from_id = file_id(&tx, &edge.from)?;
                let to_id = file_id(&tx, &edge.to)?;
                if let (Some(f), Some(t)) = (from_id, to_id) {
                    stmt.execute(params![f, t, edge.kind]).map_err(|e| e.to_string())?;
                }
            }
        }

        tx.commit().map_err(|e| format!("commit: {e}"))?;
        Ok(())
    }

    pub fn list_symbols(&self, file: Option<&str>) -> Result<Vec<Symbol>, String> {
        let conn = self.conn.lock().map_err(|_| "graph store lock poisoned".to_string())?;
        let sql = match file {
            Some(_) => {
                "SELECT f.path, s.name, s.kind, s.start_line, s.end_line \
                 FROM symbols s JOIN files f ON f.id = s.file_id \
                 WHERE f.path = ?1 ORDER BY f.path, s.start_line"
            }
            None => {
                "SELECT f.path, s.name, s.kind, s.start_line, s.end_line \
                 FROM symbols s JOIN files f ON f.id = s.file_id \
                 ORDER BY f.path, s.start_line"
            }
        };
        let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
        let rows = |r: &rusqlite::Row| -> rusqlite::Result<Symbol> {
            let path: String = r.get(0)?;
            let name: String = r.get(1)?;
            let kind: String = r.get(2)?;
            let start: i64 = r.get(3)?;
            let end: i64 = r.get(4)?;
            Ok(Symbol {
                name,
                kind: parse_kind(&kind),
                file: path,
                start_line: start as usize,
                end_line: end as usize,
            })
        };
        let out = match file {
            Some(f) => stmt
                .query_map(params![f], rows)
                .map_err(|e| e.to_string())?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?,
            None => stmt
                .query_map([], rows)
                .map_err(|e| e.to_string())?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?,
        };
        Ok(out)
    }

    pub fn list_imports(&self, file: &str) -> Result<Vec<String>, String> {
        let conn = self.conn.lock().map_err(|_| "graph store lock poisoned".to_string())?;
        let mut stmt = conn
            .prepare(
                "SELECT t.path FROM edges e \
                 JOIN files f ON f.id = e.from_file \
                 JOIN files t ON t.id = e.to_file \
                 WHERE f.path = ?1 AND e.kind = 'import' ORDER BY t.path",
            )
            .map_err(|e| e.to_string())?;
        stmt.query_map(params![file], |r| r.get(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())
    }

    pub fn list_dependents(&self, file: &str) -> Result<Vec<String>, String> {
        let conn = self.conn.lock().map_err(|_| "graph store lock poisoned".to_string())?;
        let mut stmt = conn
            .prepare(
                "SELECT f.path FROM edges e \
                 JOIN files f ON f.id = e.from_file \
                 JOIN files t ON t.id = e.to_file \
                 WHERE t.path = ?1 AND e.kind = 'import' ORDER BY f.path",
            )
            .map_err(|e| e.to_string())?;
        stmt.query_map(params![file], |r| r.get(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())
    }

    /// Files that import any file containing a symbol whose name matches
    /// `%name%` (substring, case-sensitive, deduplicated). Kept literal per
    /// the spec's own Open Question — not upgraded to exact match.
    pub fn find_refs(&self, symbol_name: &str) -> Result<Vec<String>, String> {
        let conn = self.conn.lock().map_err(|_| "graph store lock poisoned".to_string())?;
        let pattern = format!("%{symbol_name}%");
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT f.path FROM edges e \
                 JOIN files f ON f.id = e.from_file \
                 JOIN files t ON t.id = e.to_file \
                 JOIN symbols s ON s.file_id = t.id \
                 WHERE s.name LIKE ?1 AND e.kind = 'import' ORDER BY f.path",
            )
            .map_err(|e| e.to_string())?;
        stmt.query_map(params![pattern], |r| r.get(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())
    }

    /// `out-edges + in-edges` for `file`.
    pub fn degree(&self, file: &str) -> Result<u64, String> {
        let conn = self.conn.lock().map_err(|_| "graph store lock poisoned".to_string())?;
        let out: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM edges e JOIN files f ON f.id = e.from_file WHERE f.path = ?1",
                params![file],
                |r| r.get(0),
            )
            .map_err(|e| e.to_string())?;
        let inn: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM edges e JOIN files f ON f.id = e.to_file WHERE f.path = ?1",
                params![file],
                |r| r.get(0),
            )
            .map_err(|e| e.to_string())?;
        Ok((out + inn) as u64)
    }

    pub fn counts(&self) -> Result<(u64, u64, u64), String> {
        let conn = self.conn.lock().map_err(|_| "graph store lock poisoned".to_string())?;
        let files: i64 =
            conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0)).map_err(|e| e.to_string())?;
        let symbols: i64 = conn
            .query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))
            .map_err(|e| e.to_string())?;
        let edges: i64 =
            conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0)).map_err(|e| e.to_string())?;
        Ok((files as u64, symbols as u64, edges as u64))
    }
}

fn parse_kind(s: &str) -> SymbolKind {
    match s {
        "function" => SymbolKind::Function,
        "class" => SymbolKind::Class,
        "method" => SymbolKind::Method,
        _ => SymbolKind::Unknown,
    }
}
