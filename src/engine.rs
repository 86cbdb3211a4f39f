//! Semantic engine client: an out-of-process HTTP collaborator with an
//! in-process fallback. The orchestrator and ranker treat both identically
//! through the [`SemanticEngine`] trait.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::SemanticEntry;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_millis(500);
const HEALTH_PROBE_BUDGET: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub file: String,
    pub symbol: String,
    #[serde(rename = "startLine")]
    pub start_line: usize,
    #[serde(rename = "endLine")]
    pub end_line: usize,
    pub score: f64,
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[allow(dead_code)]
    query: String,
    results: Vec<Candidate>,
}

#[derive(Debug, Serialize)]
struct RerankCandidate<'a> {
    text: &'a str,
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    top_k: usize,
    candidates: Vec<RerankCandidate<'a>>,
}

#[derive(Debug, Deserialize)]
pub struct RerankResult {
    #[allow(dead_code)]
    pub text: String,
    #[allow(dead_code)]
    pub metadata: serde_json::Value,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

/// Outcome of a single `/health` probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthProbe {
    Healthy,
    /// Nothing is listening at all (connection refused/unreachable).
    ConnectionRefused,
    /// Reachable but not (yet) reporting healthy.
    Unhealthy,
}

/// HTTP client for the external semantic engine.
pub struct HttpEngineClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpEngineClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_default();
        HttpEngineClient { base_url, client }
    }

    pub async fn health(&self) -> bool {
        matches!(self.health_detailed().await, HealthProbe::Healthy)
    }

    /// Like [`health`](Self::health) but distinguishes "nothing is listening"
    /// from "reachable but unhealthy/erroring", so the startup sequence can
    /// tell a decisively absent engine from one that's merely slow to come up.
    pub async fn health_detailed(&self) -> HealthProbe {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        match self.client.get(&url).timeout(REQUEST_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => HealthProbe::Healthy,
            Ok(_) => HealthProbe::Unhealthy,
            Err(e) if e.is_connect() => HealthProbe::ConnectionRefused,
            Err(_) => HealthProbe::Unhealthy,
        }
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Vec<Candidate> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let result = self
            .client
            .get(&url)
            .query(&[("q", query), ("top_k", &top_k.to_string())])
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<SearchResponse>().await {
                Ok(body) => body.results,
                Err(e) => {
                    warn!(error = %e, "semantic engine returned unparseable response");
                    Vec::new()
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "semantic engine returned non-2xx");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "semantic engine request failed");
                Vec::new()
            }
        }
    }
}

/// In-process fallback engine: term-frequency scoring over the snippet
/// manifest. Score is normalized to `[0,1]` as `matched_terms / query_terms`
/// so a full match scores 1.0, satisfying the ranker's monotonicity
/// property without a corpus-wide IDF pass.
pub struct FallbackEngine {
    entries: Arc<RwLock<Vec<SemanticEntry>>>,
}

impl FallbackEngine {
    pub fn new(entries: Vec<SemanticEntry>) -> Self {
        FallbackEngine { entries: Arc::new(RwLock::new(entries)) }
    }

    pub fn reload(&self, entries: Vec<SemanticEntry>) {
        *self.entries.write().unwrap() = entries;
    }

    fn query_terms(query: &str) -> Vec<String> {
        query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect()
    }

    pub async fn health(&self) -> bool {
        true
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Vec<Candidate> {
        let terms = Self::query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let term_set: BTreeSet<&str> = terms.iter().map(|s| s.as_str()).collect();

        let entries = self.entries.read().unwrap();
        let mut scored: Vec<Candidate> = entries
            .iter()
            .filter_map(|e| {
                let lower = e.text.to_lowercase();
                let matched = term_set.iter().filter(|t| lower.contains(**t)).count();
                if matched == 0 {
                    return None;
                }
                let score = matched as f64 / terms.len() as f64;
                Some(Candidate {
                    file: e.file.clone(),
                    symbol: e.symbol.clone(),
                    start_line: e.start_line,
                    end_line: e.end_line,
                    score,
                    snippet: e.text.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.file.cmp(&b.file))
        });
        scored.truncate(top_k.max(1));
        scored
    }
}

/// Either the HTTP client or the in-process fallback; the orchestrator
/// treats both uniformly.
pub enum EngineHandle {
    Http(HttpEngineClient),
    Fallback(FallbackEngine),
}

impl EngineHandle {
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<Candidate> {
        match self {
            EngineHandle::Http(c) => c.search(query, top_k).await,
            EngineHandle::Fallback(f) => f.search(query, top_k).await,
        }
    }
}

/// Startup sequence: probe `engine_url`'s `/health` up to the 20s/40-probe
/// budget, falling back immediately if the first probe is refused outright
/// (nothing is listening) rather than burning the full budget against a
/// target that can't come up. Falls back to the in-process engine if
/// `engine_url` is `None` or the probe budget is exhausted.
pub async fn startup_sequence(engine_url: Option<&str>, fallback_entries: Vec<SemanticEntry>) -> EngineHandle {
    let Some(url) = engine_url else {
        info!("no ENGINE_URL configured, using in-process fallback engine");
        return EngineHandle::Fallback(FallbackEngine::new(fallback_entries));
    };

    let client = HttpEngineClient::new(url.to_string());
    let deadline = std::time::Instant::now() + HEALTH_PROBE_BUDGET;
    let mut first_attempt = true;

    loop {
        match client.health_detailed().await {
            HealthProbe::Healthy => {
                info!(url = %url, "semantic engine healthy");
                return EngineHandle::Http(client);
            }
            HealthProbe::ConnectionRefused if first_attempt => {
                // Nothing is listening at all; a pointless 20s stall against a
                // target that can't come up serves no one.
                debug!(url = %url, "semantic engine not reachable on first probe, falling back immediately");
                return EngineHandle::Fallback(FallbackEngine::new(fallback_entries));
            }
            HealthProbe::ConnectionRefused | HealthProbe::Unhealthy => {}
        }
        first_attempt = false;
        if std::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(HEALTH_PROBE_INTERVAL).await;
    }

    warn!(url = %url, "semantic engine did not become healthy within budget, using fallback");
    EngineHandle::Fallback(FallbackEngine::new(fallback_entries))
}

/// Optional reranker client. Failures are swallowed — callers fall back to
/// the `semantic` signal.
pub struct RerankerClient {
    endpoint: String,
    client: reqwest::Client,
}

impl RerankerClient {
    pub fn new(endpoint: String) -> Self {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_default();
        RerankerClient { endpoint, client }
    }

    pub async fn rerank(&self, query: &str, top_k: usize, candidates: &[(&str, serde_json::Value)]) -> Option<Vec<RerankResult>> {
        let body = RerankRequest {
            query,
            top_k,
            candidates: candidates.iter().map(|(text, meta)| RerankCandidate { text, metadata: meta.clone() }).collect(),
        };
        let resp = self.client.post(&self.endpoint).json(&body).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<RerankResponse>().await.ok().map(|r| r.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(file: &str, symbol: &str, text: &str) -> SemanticEntry {
        SemanticEntry {
            id: format!("{file}:{symbol}"),
            file: file.into(),
            symbol: symbol.into(),
            start_line: 1,
            end_line: 2,
            text: text.into(),
            namespace: None,
            tenant: None,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn fallback_scores_full_match_as_one() {
        let engine = FallbackEngine::new(vec![
            entry("a.rs", "createOrder", "fn createOrder(items)"),
            entry("b.rs", "unrelated", "fn totallyDifferent()"),
        ]);
        let results = engine.search("createOrder", 10).await;
        assert!(!results.is_empty());
        assert_eq!(results[0].file, "a.rs");
        assert!((results[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fallback_returns_empty_for_no_match() {
        let engine = FallbackEngine::new(vec![entry("a.rs", "foo", "fn foo()")]);
        let results = engine.search("zzz_nonexistent", 10).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn startup_falls_back_when_no_engine_url() {
        let handle = startup_sequence(None, vec![entry("a.rs", "foo", "fn foo()")]).await;
        matches!(handle, EngineHandle::Fallback(_));
    }

    #[tokio::test]
    async fn startup_falls_back_immediately_on_connection_refused() {
        // Port 1 is reserved and nothing should be listening there.
        let handle = startup_sequence(Some("http://127.0.0.1:1"), vec![]).await;
        assert!(matches!(handle, EngineHandle::Fallback(_)));
    }

    /// A reachable-but-initially-unhealthy engine must keep being probed
    /// within the budget and succeed once it reports healthy, rather than
    /// falling back after the first non-2xx response.
    #[tokio::test]
    async fn startup_keeps_probing_a_slow_engine_until_healthy() {
        use axum::routing::get;
        use axum::{http::StatusCode, Router};
        use std::sync::atomic::{AtomicUsize, Ordering};

        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_for_handler = attempts.clone();
        let health_handler = move || {
            let attempts = attempts_for_handler.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                }
            }
        };
        let router = Router::new().route("/health", get(health_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        let handle = startup_sequence(Some(&format!("http://{addr}")), vec![]).await;
        assert!(matches!(handle, EngineHandle::Http(_)), "expected the engine to recover within the probe budget");
        assert!(attempts.load(Ordering::SeqCst) >= 2, "expected more than one probe");
    }
}
