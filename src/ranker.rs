//! Hybrid scoring (semantic + lexical + graph + reranker signals) and
//! token-budget-aware context packing (greedy-with-diversity or MMR).

use std::collections::{HashMap, HashSet};

use crate::engine::Candidate;
use crate::model::{SearchResult, Signals, Weights};
use crate::tokenizer::estimate_tokens;

pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;
pub const DEFAULT_MMR_LAMBDA: f64 = 0.5;

fn query_tokens(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// Share of query terms present as substrings of the lowercased snippet.
/// `hits/len(tokens)`, or 0 if the query has no tokens.
pub fn lexical_signal(query: &str, snippet: &str) -> f64 {
    let tokens = query_tokens(query);
    if tokens.is_empty() {
        return 0.0;
    }
    let lower = snippet.to_lowercase();
    let hits = tokens.iter().filter(|t| lower.contains(t.as_str())).count();
    hits as f64 / tokens.len() as f64
}

/// `degree(file) / max_degree_in_result_set`, floor 1 for the denominator.
pub fn graph_signal(file: &str, degree_by_file: &HashMap<String, u64>, max_degree: u64) -> f64 {
    let degree = degree_by_file.get(file).copied().unwrap_or(0);
    degree as f64 / max_degree.max(1) as f64
}

/// Compute the four signals for one candidate.
pub fn compute_signals(
    candidate: &Candidate,
    query: &str,
    degree_by_file: &HashMap<String, u64>,
    max_degree: u64,
    reranker_score: Option<f64>,
) -> Signals {
    let semantic = candidate.score.clamp(0.0, 1.0);
    Signals {
        semantic,
        lexical: lexical_signal(query, &candidate.snippet),
        graph: graph_signal(&candidate.file, degree_by_file, max_degree),
        reranker: reranker_score.unwrap_or(semantic),
    }
}

fn composite(weights: &Weights, signals: &Signals) -> f64 {
    weights.semantic * signals.semantic
        + weights.lexical * signals.lexical
        + weights.graph * signals.graph
        + weights.reranker * signals.reranker
}

/// Score and sort candidates. Ties break by original semantic score, then
/// file, then startLine, for determinism.
pub fn rank(
    candidates: Vec<Candidate>,
    query: &str,
    weights: &Weights,
    degree_by_file: &HashMap<String, u64>,
    reranker_scores: Option<&HashMap<String, f64>>,
) -> Vec<SearchResult> {
    let max_degree = candidates
        .iter()
        .map(|c| degree_by_file.get(&c.file).copied().unwrap_or(0))
        .max()
        .unwrap_or(0)
        .max(1);

    let mut results: Vec<SearchResult> = candidates
        .into_iter()
        .map(|c| {
            let id = format!("{}:{}", c.file, c.symbol);
            let reranker_score = reranker_scores.and_then(|m| m.get(&id).copied());
            let signals = compute_signals(&c, query, degree_by_file, max_degree, reranker_score);
            let score = composite(weights, &signals);
            SearchResult {
                file: c.file,
                symbol: c.symbol,
                start_line: c.start_line,
                end_line: c.end_line,
                snippet: c.snippet,
                score,
                signals: Some(signals),
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let sa = a.signals.map(|s| s.semantic).unwrap_or(0.0);
                let sb = b.signals.map(|s| s.semantic).unwrap_or(0.0);
                sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    results
}

fn token_cost(text: &str, chars_per_token: usize) -> usize {
    estimate_tokens(text, chars_per_token)
}

/// Greedy-with-per-file-diversity packer (default strategy): select in rank
/// order, skipping files already present, until the budget is exhausted;
/// then a second pass fills remaining budget ignoring the one-per-file rule.
pub fn pack_greedy(
    ranked: &[SearchResult],
    budget_tokens: usize,
    chars_per_token: usize,
    effective_top_k: usize,
) -> Vec<SearchResult> {
    let mut out: Vec<SearchResult> = Vec::new();
    let mut used_tokens = 0usize;
    let mut seen_files: HashSet<&str> = HashSet::new();
    let mut taken: HashSet<usize> = HashSet::new();

    for (i, r) in ranked.iter().enumerate() {
        if seen_files.contains(r.file.as_str()) {
            continue;
        }
        let cost = token_cost(&r.snippet, chars_per_token);
        if used_tokens + cost > budget_tokens {
            continue;
        }
        used_tokens += cost;
        seen_files.insert(r.file.as_str());
        taken.insert(i);
        out.push(r.clone());
    }

    for (i, r) in ranked.iter().enumerate() {
        if taken.contains(&i) {
            continue;
        }
        let cost = token_cost(&r.snippet, chars_per_token);
        if used_tokens + cost > budget_tokens {
            continue;
        }
        used_tokens += cost;
        out.push(r.clone());
    }

    finalize_pack(out, ranked, effective_top_k)
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// MMR packer: iteratively pick the candidate maximizing
/// `λ·score − (1−λ)·max_{c∈chosen} jaccard(snippet, c.snippet)`, skipping
/// candidates whose token cost exceeds remaining budget, until no candidate
/// fits or the pool is empty.
pub fn pack_mmr(
    ranked: &[SearchResult],
    budget_tokens: usize,
    lambda: f64,
    chars_per_token: usize,
    effective_top_k: usize,
) -> Vec<SearchResult> {
    let word_sets: Vec<HashSet<String>> = ranked.iter().map(|r| word_set(&r.snippet)).collect();
    let costs: Vec<usize> = ranked.iter().map(|r| token_cost(&r.snippet, chars_per_token)).collect();

    let mut chosen_idx: Vec<usize> = Vec::new();
    let mut remaining: HashSet<usize> = (0..ranked.len()).collect();
    let mut used_tokens = 0usize;

    loop {
        let mut best: Option<(usize, f64)> = None;
        for &i in remaining.iter() {
            if used_tokens + costs[i] > budget_tokens {
                continue;
            }
            let diversity_penalty = chosen_idx
                .iter()
                .map(|&c| jaccard(&word_sets[i], &word_sets[c]))
                .fold(0.0_f64, f64::max);
            let mmr_score = lambda * ranked[i].score - (1.0 - lambda) * diversity_penalty;
            if best.map(|(_, s)| mmr_score > s).unwrap_or(true) {
                best = Some((i, mmr_score));
            }
        }

        match best {
            Some((i, _)) => {
                used_tokens += costs[i];
                chosen_idx.push(i);
                remaining.remove(&i);
            }
            None => break,
        }
    }

    let out: Vec<SearchResult> = chosen_idx.into_iter().map(|i| ranked[i].clone()).collect();
    finalize_pack(out, ranked, effective_top_k)
}

/// Never produce an empty output when at least one ranked result exists —
/// fall back to `ranked.slice(0, effectiveTopK)` per the packer's own
/// contract (§4.7).
fn finalize_pack(out: Vec<SearchResult>, ranked: &[SearchResult], effective_top_k: usize) -> Vec<SearchResult> {
    if out.is_empty() && !ranked.is_empty() {
        return ranked.iter().take(effective_top_k.max(1)).cloned().collect();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(file: &str, score: f64, snippet: &str) -> Candidate {
        Candidate { file: file.into(), symbol: "sym".into(), start_line: 1, end_line: 2, score, snippet: snippet.into() }
    }

    #[test]
    fn s4_hybrid_ranking_scenario() {
        let candidates = vec![candidate("a", 0.6, "alpha beta"), candidate("b", 0.5, "beta gamma")];
        let weights = Weights { semantic: 0.6, lexical: 0.3, graph: 0.1, reranker: 0.0 };
        let mut degree_by_file = HashMap::new();
        degree_by_file.insert("a".to_string(), 1u64);
        degree_by_file.insert("b".to_string(), 2u64);

        let ranked = rank(candidates, "beta", &weights, &degree_by_file, None);
        assert_eq!(ranked[0].file, "a");
        assert!((ranked[0].score - 0.71).abs() < 1e-9, "got {}", ranked[0].score);
        assert!((ranked[1].score - 0.70).abs() < 1e-9, "got {}", ranked[1].score);
    }

    #[test]
    fn p5_semantic_only_weights_preserve_input_order() {
        let candidates = vec![candidate("a", 0.9, "x"), candidate("b", 0.4, "y"), candidate("c", 0.6, "z")];
        let weights = Weights { semantic: 1.0, lexical: 0.0, graph: 0.0, reranker: 0.0 };
        let ranked = rank(candidates, "q", &weights, &HashMap::new(), None);
        assert_eq!(ranked.iter().map(|r| r.file.as_str()).collect::<Vec<_>>(), vec!["a", "c", "b"]);
    }

    #[test]
    fn p5_lexical_only_weights_favor_full_match() {
        let candidates = vec![candidate("a", 0.1, "nothing relevant here"), candidate("b", 0.1, "alpha beta gamma")];
        let weights = Weights { semantic: 0.0, lexical: 1.0, graph: 0.0, reranker: 0.0 };
        let ranked = rank(candidates, "alpha beta gamma", &weights, &HashMap::new(), None);
        assert_eq!(ranked[0].file, "b");
    }

    #[test]
    fn greedy_pack_never_empty_when_results_exist() {
        let ranked = rank(vec![candidate("a", 0.9, "x".repeat(10000).as_str())], "q", &Weights::default(), &HashMap::new(), None);
        let packed = pack_greedy(&ranked, 1, DEFAULT_CHARS_PER_TOKEN, 5);
        assert_eq!(packed.len(), 1, "must fall back to ranked.slice(0, effectiveTopK) even when nothing fits the budget");
    }

    #[test]
    fn greedy_pack_fallback_slice_respects_effective_top_k() {
        let ranked = rank(
            vec![
                candidate("a", 0.9, &"x".repeat(10_000)),
                candidate("b", 0.8, &"y".repeat(10_000)),
                candidate("c", 0.7, &"z".repeat(10_000)),
            ],
            "q",
            &Weights::default(),
            &HashMap::new(),
            None,
        );
        let packed = pack_greedy(&ranked, 1, DEFAULT_CHARS_PER_TOKEN, 2);
        assert_eq!(packed.len(), 2, "fallback slice should take effectiveTopK, not just 1");
        assert_eq!(packed[0].file, "a");
        assert_eq!(packed[1].file, "b");
    }

    #[test]
    fn p6_mmr_diversity_picks_cross_file_second() {
        let ranked = rank(
            vec![
                candidate("a", 0.9, "createOrder items price total"),
                candidate("a", 0.85, "createOrder items price total checkout"),
                candidate("b", 0.7, "completely different snippet text here"),
            ],
            "createOrder",
            &Weights { semantic: 1.0, lexical: 0.0, graph: 0.0, reranker: 0.0 },
            &HashMap::new(),
            None,
        );
        let packed = pack_mmr(&ranked, 10_000, 0.5, DEFAULT_CHARS_PER_TOKEN, 5);
        assert!(packed.len() >= 2);
        assert_ne!(packed[0].file, packed[1].file, "second pick should diversify across files");
    }

    #[test]
    fn lexical_signal_is_zero_for_empty_query() {
        assert_eq!(lexical_signal("", "anything"), 0.0);
    }

    #[test]
    fn graph_signal_is_zero_with_no_graph_store() {
        assert_eq!(graph_signal("a", &HashMap::new(), 0), 0.0);
    }
}
