//! Optional ANN (approximate nearest-neighbour) sink for the Snippet
//! Manifest (§4.3): each `SemanticEntry`'s text is embedded into a
//! deterministic hash-bucket vector and upserted to an external vector
//! service. Best-effort — a sink failure must never fail the index pass,
//! so every error here is logged at debug and swallowed.

use crate::model::SemanticEntry;

pub const VECTOR_DIM: usize = 96;

/// FNV-1a, the same small non-cryptographic hash the teacher's fuzzy
/// matcher reached for — deterministic across runs, which is the only
/// requirement for a hash-bucket embedding.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Deterministic hash-bucket embedding of `text`, normalized to unit L2.
/// Each whitespace/punctuation-delimited token increments the bucket its
/// hash falls into; buckets are then L2-normalized so cosine similarity
/// between two embeddings is just their dot product.
pub fn embed(text: &str) -> [f32; VECTOR_DIM] {
    let mut v = [0f32; VECTOR_DIM];
    for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        let bucket = (fnv1a(token.as_bytes()) % VECTOR_DIM as u64) as usize;
        v[bucket] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Thin blocking HTTP client to an external vector service. Blocking
/// because the indexer itself runs synchronously (on a `spawn_blocking`
/// thread when invoked from the async server); a sink call here must not
/// pull in a second async runtime.
pub struct AnnSink {
    url: String,
    client: reqwest::blocking::Client,
}

impl AnnSink {
    pub fn new(url: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        AnnSink { url, client }
    }

    /// Upsert every entry's embedding to the configured service. Never
    /// returns an error — each failed upsert is logged at debug and
    /// skipped, per §4.3's "failure of the sink must not fail the index
    /// pass."
    pub fn upsert_all(&self, entries: &[SemanticEntry]) {
        for entry in entries {
            let vector = embed(&entry.text);
            let body = serde_json::json!({
                "id": entry.id,
                "file": entry.file,
                "symbol": entry.symbol,
                "vector": vector.to_vec(),
            });
            if let Err(e) = self.client.post(&self.url).json(&body).send() {
                tracing::debug!(error = %e, id = %entry.id, "ANN sink upsert failed, continuing");
            }
        }
    }
}
