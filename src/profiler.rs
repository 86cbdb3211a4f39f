//! Intent classification and per-intent budget/topK presets.
//!
//! Intent drives how much context the packer is allowed to spend and how
//! many results the ranker should aim to return before packing trims them
//! down further. Classification is ordered-regex, first match wins.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::{ContextProfile, Intent};

struct IntentRule {
    intent: Intent,
    pattern: &'static str,
}

const RULES: &[IntentRule] = &[
    IntentRule { intent: Intent::Refactor, pattern: r"(?i)\b(refactor|rename|extract|restructure|clean ?up)\b" },
    IntentRule { intent: Intent::Test, pattern: r"(?i)\b(test|spec|unit test|coverage|assert)\b" },
    IntentRule { intent: Intent::Performance, pattern: r"(?i)\b(perf|performance|optimi[sz]e|slow|latency|bottleneck)\b" },
    IntentRule { intent: Intent::Docs, pattern: r"(?i)\b(doc|docs|documentation|readme|comment)\b" },
    IntentRule { intent: Intent::Dataflow, pattern: r"(?i)\b(dataflow|data flow|pipeline|trace|call graph|dependency)\b" },
];

fn compiled_rules() -> &'static Vec<(Intent, Regex)> {
    static CELL: OnceLock<Vec<(Intent, Regex)>> = OnceLock::new();
    CELL.get_or_init(|| {
        RULES
            .iter()
            .map(|r| (r.intent, Regex::new(r.pattern).expect("static intent pattern must compile")))
            .collect()
    })
}

pub fn classify_intent(query: &str) -> Intent {
    for (intent, re) in compiled_rules() {
        if re.is_match(query) {
            return *intent;
        }
    }
    Intent::General
}

struct Preset {
    token_budget: usize,
    top_k: usize,
}

fn preset_for(intent: Intent) -> Preset {
    match intent {
        Intent::Refactor => Preset { token_budget: 1200, top_k: 10 },
        Intent::Test => Preset { token_budget: 800, top_k: 8 },
        Intent::Performance => Preset { token_budget: 1000, top_k: 8 },
        Intent::Docs => Preset { token_budget: 500, top_k: 4 },
        Intent::Dataflow => Preset { token_budget: 1500, top_k: 12 },
        Intent::General => Preset { token_budget: 600, top_k: 5 },
    }
}

/// Build a [`ContextProfile`] for `query`, honoring a caller-requested
/// `top_k` when present: `effectiveTopK = clamp(1, requested_or_preset,
/// preset.topK)`, so a request can only narrow the preset, never widen it.
pub fn build_profile(query: &str, requested_top_k: Option<usize>) -> ContextProfile {
    let intent = classify_intent(query);
    let preset = preset_for(intent);
    // A requested topK of 0 is treated the same as "no requested value" —
    // it yields the preset's topK rather than clamping up to 1.
    let requested = requested_top_k.filter(|&k| k != 0).unwrap_or(preset.top_k);
    let effective_top_k = requested.clamp(1, preset.top_k);

    ContextProfile {
        intent,
        token_budget: preset.token_budget,
        requested_top_k: requested_top_k.unwrap_or(effective_top_k),
        effective_top_k,
        notes: vec![format!("intent={intent:?} preset_top_k={} preset_budget={}", preset.top_k, preset.token_budget)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_refactor_intent() {
        assert_eq!(classify_intent("please refactor this module"), Intent::Refactor);
    }

    #[test]
    fn classifies_test_intent() {
        assert_eq!(classify_intent("write a unit test for this"), Intent::Test);
    }

    #[test]
    fn classifies_performance_intent() {
        assert_eq!(classify_intent("why is this so slow"), Intent::Performance);
    }

    #[test]
    fn classifies_docs_intent() {
        assert_eq!(classify_intent("update the README"), Intent::Docs);
    }

    #[test]
    fn classifies_dataflow_intent() {
        assert_eq!(classify_intent("trace the data flow through this pipeline"), Intent::Dataflow);
    }

    #[test]
    fn falls_back_to_general_intent() {
        assert_eq!(classify_intent("find the order service"), Intent::General);
    }

    #[test]
    fn general_fallback_budget_and_topk() {
        let profile = build_profile("find the order service", None);
        assert_eq!(profile.token_budget, 600);
        assert_eq!(profile.effective_top_k, 5);
    }

    #[test]
    fn requested_top_k_can_only_narrow_the_preset() {
        let profile = build_profile("refactor this", Some(3));
        assert_eq!(profile.effective_top_k, 3);

        let profile = build_profile("refactor this", Some(999));
        assert_eq!(profile.effective_top_k, 10, "request above preset clamps down to preset.topK");
    }

    #[test]
    fn requested_top_k_zero_behaves_like_unset_and_yields_preset() {
        let profile = build_profile("refactor this", Some(0));
        assert_eq!(profile.effective_top_k, 10, "topK=0 should yield the refactor preset's topK, like no request at all");
    }

    #[test]
    fn first_matching_rule_wins_when_query_matches_multiple() {
        // "test performance" matches both Test and Performance rules; Test is
        // ordered first and should win.
        assert_eq!(classify_intent("test performance of this function"), Intent::Test);
    }
}
