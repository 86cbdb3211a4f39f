//! Pluggable token-cost estimation, used by the chunker, ranker, and context
//! packer wherever a text's token cost must be estimated without an exact
//! BPE count. Default backend matches the spec's own estimator —
//! `max(1, ceil(len/charsPerToken))` — with `tiktoken` as an optional,
//! feature-gated exact backend for callers that want it.

use std::sync::Arc;

pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
    fn name(&self) -> &str;
}

/// `max(1, ceil(len/charsPerToken))`, `charsPerToken` defaulting to 4.
pub struct EstimateTokenizer {
    chars_per_token: usize,
}

impl EstimateTokenizer {
    pub fn new(chars_per_token: usize) -> Self {
        EstimateTokenizer { chars_per_token: chars_per_token.max(1) }
    }
}

impl Default for EstimateTokenizer {
    fn default() -> Self {
        EstimateTokenizer::new(4)
    }
}

impl Tokenizer for EstimateTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(self.chars_per_token).max(1)
    }
    fn name(&self) -> &str {
        "estimate"
    }
}

/// Tiktoken-based tokenizer (requires the `tiktoken` feature).
#[cfg(feature = "tiktoken")]
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenTokenizer {
    pub fn new() -> Self {
        Self { bpe: tiktoken_rs::cl100k_base().unwrap() }
    }
}

#[cfg(feature = "tiktoken")]
impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len().max(1)
    }
    fn name(&self) -> &str {
        "tiktoken"
    }
}

/// Create a tokenizer by name. Falls back to the estimate backend for
/// unknown names or when `tiktoken` wasn't compiled in.
pub fn create_tokenizer(name: &str, chars_per_token: usize) -> Arc<dyn Tokenizer> {
    match name {
        #[cfg(feature = "tiktoken")]
        "tiktoken" => Arc::new(TiktokenTokenizer::new()),
        _ => Arc::new(EstimateTokenizer::new(chars_per_token)),
    }
}

/// Token-cost helper used directly by call sites that don't want to thread
/// a `Tokenizer` object through (e.g. the packer's per-candidate cost).
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.len().div_ceil(chars_per_token.max(1)).max(1)
}
