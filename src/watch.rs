//! Recursive file watcher with 500ms trailing-edge debounce feeding the
//! indexer. Only one index job runs at a time per root; jobs arriving while
//! one is in flight coalesce into a single pending follow-up (intermediate
//! bursts are dropped, not queued individually).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::indexer;
use crate::manifest::SnippetManifest;
use crate::queue::{Job, JobQueue};
use crate::store::GraphStore;

const DEBOUNCE_MS: u64 = 500;

/// Coalescing trigger: ensures only one indexing pass runs at a time per
/// root, with at most one pending follow-up pass queued behind it.
pub struct IndexTrigger {
    cfg: Mutex<Config>,
    graph: Arc<GraphStore>,
    manifest: SnippetManifest,
    queue: Option<JobQueue>,
    running: AtomicBool,
    pending: AtomicBool,
}

impl IndexTrigger {
    pub fn new(cfg: Config, graph: Arc<GraphStore>, manifest: SnippetManifest, queue: Option<JobQueue>) -> Self {
        IndexTrigger {
            cfg: Mutex::new(cfg),
            graph,
            manifest,
            queue,
            running: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        }
    }

    /// Fire a debounced change signal. If a pass is already running, marks a
    /// pending follow-up and returns immediately; otherwise runs (and keeps
    /// running while new signals arrive mid-pass) synchronously.
    pub fn fire(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            self.pending.store(true, Ordering::SeqCst);
            return;
        }

        loop {
            self.pending.store(false, Ordering::SeqCst);
            if let Some(queue) = &self.queue {
                let job = Job {
                    id: uuid::Uuid::new_v4().to_string(),
                    reason: "debounced file change".to_string(),
                    enqueued_at_ms: now_ms(),
                    done: false,
                };
                if let Err(e) = queue.enqueue(&job) {
                    warn!(error = %e, "failed to enqueue durable job, indexing in-process anyway");
                }
            }

            let cfg = self.cfg.lock().unwrap().clone();
            match indexer::run_index(&cfg, &self.graph, &self.manifest) {
                Ok(stats) => info!(
                    files = stats.files,
                    symbols = stats.symbols,
                    edges = stats.edges,
                    time_ms = stats.duration_ms,
                    "watcher-triggered index pass complete"
                ),
                Err(e) => warn!(error = %e, "watcher-triggered index pass failed"),
            }

            if !self.pending.swap(false, Ordering::SeqCst) {
                break;
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Live handle to a watcher + its debounce thread. Dropping `watcher` stops
/// new filesystem events from being observed; `close` additionally signals
/// the debounce thread to flush any changes it is still sitting on (one
/// last, best-effort index pass) and stop.
pub struct WatcherHandle {
    watcher: RecommendedWatcher,
    shutdown: Arc<AtomicBool>,
}

impl WatcherHandle {
    /// Stop observing new events and ask the debounce thread to flush
    /// whatever it has pending, then exit. The flush is best-effort: the
    /// thread only notices on its next `recv_timeout` wakeup (at most
    /// `DEBOUNCE_MS` later), and the process may exit before it finishes.
    pub fn close(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        drop(self.watcher);
    }
}

/// Start a recursive watcher on `root`. Returns the watcher handle — it must
/// be kept alive; dropping or closing it stops the watcher.
pub fn start_watcher(root: PathBuf, trigger: Arc<IndexTrigger>) -> Option<WatcherHandle> {
    let (tx, rx) = mpsc::channel::<Event>();

    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create file watcher");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
        warn!(root = %root.display(), error = %e, "failed to watch root");
        return None;
    }
    info!(root = %root.display(), "watching for changes");

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_loop = shutdown.clone();
    std::thread::spawn(move || debounce_loop(rx, trigger, shutdown_for_loop));
    Some(WatcherHandle { watcher, shutdown })
}

fn debounce_loop(rx: mpsc::Receiver<Event>, trigger: Arc<IndexTrigger>, shutdown: Arc<AtomicBool>) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        match rx.recv_timeout(Duration::from_millis(DEBOUNCE_MS)) {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                    let now = Instant::now();
                    for path in event.paths {
                        pending.insert(path, now);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    if !pending.is_empty() {
                        debug!(count = pending.len(), "shutdown requested, flushing pending debounced changes");
                        pending.clear();
                        trigger.fire();
                    }
                    break;
                }
                if pending.is_empty() {
                    continue;
                }
                let cutoff = Instant::now() - Duration::from_millis(DEBOUNCE_MS);
                let ready: Vec<PathBuf> =
                    pending.iter().filter(|(_, t)| **t <= cutoff).map(|(p, _)| p.clone()).collect();
                if ready.is_empty() {
                    continue;
                }
                for p in &ready {
                    pending.remove(p);
                }
                debug!(count = ready.len(), "debounce window elapsed, triggering index pass");
                trigger.fire();
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexMode;

    #[test]
    fn trigger_runs_index_pass_and_clears_running_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "pub fn f() {}\n").unwrap();

        let mut cfg = Config::default();
        cfg.index_root = dir.path().to_path_buf();
        cfg.data_dir = dir.path().join(".codecontext");
        cfg.mode = IndexMode::Full;

        let graph = Arc::new(GraphStore::open_in_memory().unwrap());
        let manifest = SnippetManifest::new(cfg.data_dir.clone());
        let trigger = Arc::new(IndexTrigger::new(cfg, graph, manifest, None));

        trigger.fire();
        assert!(!trigger.running.load(Ordering::SeqCst));
    }

    #[test]
    fn concurrent_fire_coalesces_into_one_followup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "pub fn f() {}\n").unwrap();

        let mut cfg = Config::default();
        cfg.index_root = dir.path().to_path_buf();
        cfg.data_dir = dir.path().join(".codecontext");
        cfg.mode = IndexMode::Full;

        let graph = Arc::new(GraphStore::open_in_memory().unwrap());
        let manifest = SnippetManifest::new(cfg.data_dir.clone());
        let trigger = Arc::new(IndexTrigger::new(cfg, graph, manifest, None));

        trigger.running.store(true, Ordering::SeqCst);
        trigger.fire(); // should only mark pending, not run reentrantly
        assert!(trigger.pending.load(Ordering::SeqCst));
        trigger.running.store(false, Ordering::SeqCst);
        trigger.pending.store(false, Ordering::SeqCst);
    }
}
