//! `codecontext` binary: a minimal CLI over the [`codecontext_server`] library —
//! an index-only invocation and a launch-server invocation. All eleven
//! components (config, policy, graph store, manifest, indexer, watcher,
//! semantic engine, ranker, profiler, weight manager, RPC surface) are
//! constructed once here at startup and shared via `Arc`; there is no
//! per-request construction.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use codecontext_server::config::Config;
use codecontext_server::engine::startup_sequence;
use codecontext_server::http::build_router;
use codecontext_server::indexer;
use codecontext_server::manifest::SnippetManifest;
use codecontext_server::orchestrator::Orchestrator;
use codecontext_server::policy::PolicyFilter;
use codecontext_server::queue::JobQueue;
use codecontext_server::rpc::{dispatch_request, AppState, ShutdownHandle};
use codecontext_server::store::GraphStore;
use codecontext_server::watch::{start_watcher, IndexTrigger};
use codecontext_server::weights::WeightManager;

#[derive(Parser)]
#[command(name = "codecontext", version, about = "Local code-context indexer and hybrid search server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Root directory to index (default: current directory, or $INDEX_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single index pass over the root and exit.
    Index,
    /// Launch the RPC server (stdio and HTTP), watching the root for changes.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("codecontext=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn run_index_pass(cfg: &Config, graph: &GraphStore, manifest: &SnippetManifest) -> Result<(), i32> {
    match indexer::run_index(cfg, graph, manifest) {
        Ok(stats) => {
            info!(files = stats.files, symbols = stats.symbols, edges = stats.edges, entries = stats.entries, time_ms = stats.duration_ms, "index pass complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "index pass failed");
            Err(1)
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let cfg = Config::load(cli.root.clone());

    let graph = match GraphStore::open(&cfg.sqlite_db) {
        Ok(g) => Arc::new(g),
        Err(e) => {
            error!(error = %e, "failed to open graph store");
            std::process::exit(1);
        }
    };
    let manifest = SnippetManifest::new(cfg.data_dir.clone());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Index => {
            if let Err(code) = run_index_pass(&cfg, &graph, &manifest) {
                std::process::exit(code);
            }
        }
        Command::Serve => serve(cfg, graph, manifest).await,
    }
}

async fn serve(cfg: Config, graph: Arc<GraphStore>, manifest: SnippetManifest) {
    let policy = PolicyFilter::new(vec![cfg.index_root.clone(), cfg.data_dir.clone()]);

    if cfg.fast_start {
        info!("MCP_FAST_START set, deferring initial index pass to a background task");
        let cfg_bg = cfg.clone();
        let graph_bg = graph.clone();
        let manifest_bg = manifest.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = indexer::run_index(&cfg_bg, &graph_bg, &manifest_bg) {
                warn!(error = %e, "background initial index pass failed");
            }
        });
    } else if let Err(code) = run_index_pass(&cfg, &graph, &manifest) {
        std::process::exit(code);
    }

    let engine = Arc::new(startup_sequence(cfg.engine_url.as_deref(), manifest.load_semantic_entries()).await);
    let weights = Arc::new(WeightManager::load(WeightManager::default_path(&cfg.data_dir)));
    let reranker = cfg.reranker_url.clone().map(|url| Arc::new(codecontext_server::engine::RerankerClient::new(url)));

    let orchestrator = Arc::new(Orchestrator {
        graph: graph.clone(),
        manifest: manifest.clone(),
        engine,
        policy,
        weights: weights.clone(),
        reranker,
        index_root: cfg.index_root.clone(),
    });

    let queue = if cfg.queue_enabled {
        info!(path = %cfg.data_dir.join("jobs.jsonl").display(), "durable watcher job queue enabled");
        Some(JobQueue::new(cfg.data_dir.clone()))
    } else {
        None
    };
    let trigger = Arc::new(IndexTrigger::new(cfg.clone(), graph.clone(), manifest.clone(), queue));
    let watcher = start_watcher(cfg.index_root.clone(), trigger);

    let shutdown = ShutdownHandle { notify: Arc::new(tokio::sync::Notify::new()), watcher: Arc::new(std::sync::Mutex::new(watcher)) };

    let app_state = Arc::new(AppState {
        orchestrator,
        weights,
        server_name: "codecontext".to_string(),
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        shutdown,
    });

    let http_state = app_state.clone();
    let http_port = cfg.http_port;
    let http_task = tokio::spawn(async move {
        let router = build_router(http_state);
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], http_port));
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(%addr, "HTTP JSON-RPC listening");
                if let Err(e) = axum::serve(listener, router).await {
                    error!(error = %e, "HTTP server exited with an error");
                }
            }
            Err(e) => error!(%addr, error = %e, "failed to bind HTTP port"),
        }
    });

    let stdio_state = app_state.clone();
    let stdio_task = tokio::spawn(async move { run_stdio_loop(stdio_state).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = app_state.shutdown.notify.notified() => {
            info!("shutdown requested via RPC");
        }
        _ = http_task => {}
        _ = stdio_task => {}
    }
}

/// One JSON object per newline-terminated line on stdin; responses
/// one-per-line on stdout. Diagnostics never touch stdout.
async fn run_stdio_loop(state: Arc<AppState>) {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdio read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let parsed: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                let err = serde_json::json!({ "jsonrpc": "2.0", "id": null, "error": { "code": -32700, "message": "parse error" } });
                let _ = stdout.write_all(format!("{err}\n").as_bytes()).await;
                continue;
            }
        };
        if let Some(resp) = dispatch_request(&state, &parsed).await {
            let _ = stdout.write_all(format!("{resp}\n").as_bytes()).await;
            let _ = stdout.flush().await;
        }
    }
}
