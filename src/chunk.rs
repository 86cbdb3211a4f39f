//! Token-bounded chunking of a symbol's source lines into overlapping
//! windows, used to derive `SemanticEntry` records beyond the first chunk.

pub const DEFAULT_CHUNK_TOKEN_LIMIT: usize = 200;
pub const DEFAULT_OVERLAP_TOKENS: usize = 20;
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// One chunk of a symbol's snippet: 1-based inclusive line range plus text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

fn line_tokens(line: &str, chars_per_token: usize) -> usize {
    ((line.len() + chars_per_token - 1) / chars_per_token).max(1)
}

/// Split `lines` (already sliced to `[start_line, end_line]` of the
/// enclosing file, 1-based) into token-bounded, possibly-overlapping chunks.
/// Every chunk advances at least one line past the previous chunk's start.
pub fn chunk_symbol(
    lines: &[&str],
    start_line: usize,
    chunk_token_limit: usize,
    overlap_tokens: usize,
    chars_per_token: usize,
) -> Vec<Chunk> {
    if lines.is_empty() {
        return Vec::new();
    }

    let token_costs: Vec<usize> = lines.iter().map(|l| line_tokens(l, chars_per_token)).collect();
    let total_tokens: usize = token_costs.iter().sum();

    if total_tokens <= chunk_token_limit {
        return vec![Chunk {
            start_line,
            end_line: start_line + lines.len() - 1,
            text: lines.join("\n"),
        }];
    }

    let mut chunks = Vec::new();
    let mut i = 0usize;
    while i < lines.len() {
        let mut j = i;
        let mut tokens = 0usize;
        while j < lines.len() && (tokens == 0 || tokens + token_costs[j] <= chunk_token_limit) {
            tokens += token_costs[j];
            j += 1;
        }
        // j is exclusive end of this chunk's line range (at least i+1).
        let chunk_lines = &lines[i..j];
        chunks.push(Chunk {
            start_line: start_line + i,
            end_line: start_line + j - 1,
            text: chunk_lines.join("\n"),
        });

        if j >= lines.len() {
            break;
        }

        // Walk back from j to build `overlap_tokens` worth of overlap for
        // the next chunk's start, but always advance at least one line.
        let mut back = j;
        let mut overlap = 0usize;
        while back > i + 1 && overlap < overlap_tokens {
            back -= 1;
            overlap += token_costs[back];
        }
        i = back.max(i + 1);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_symbol_is_a_single_chunk() {
        let lines = vec!["fn a() {", "  1", "}"];
        let chunks = chunk_symbol(&lines, 10, DEFAULT_CHUNK_TOKEN_LIMIT, DEFAULT_OVERLAP_TOKENS, 4);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 10);
        assert_eq!(chunks[0].end_line, 12);
    }

    #[test]
    fn long_symbol_splits_with_overlap_and_always_advances() {
        let long_line = "x".repeat(40); // 10 tokens at 4 chars/token
        let lines: Vec<&str> = std::iter::repeat(long_line.as_str()).take(30).collect();
        let chunks = chunk_symbol(&lines, 1, 50, 10, 4);
        assert!(chunks.len() > 1);
        for w in chunks.windows(2) {
            assert!(w[1].start_line > w[0].start_line, "chunk must advance at least one line");
        }
        // Last chunk should reach the final line.
        assert_eq!(chunks.last().unwrap().end_line, 30);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let lines: Vec<&str> = vec![];
        assert!(chunk_symbol(&lines, 1, 100, 10, 4).is_empty());
    }

    #[test]
    fn single_oversized_line_still_advances() {
        let huge = "y".repeat(10_000);
        let lines = vec![huge.as_str(), "short"];
        let chunks = chunk_symbol(&lines, 1, 50, 10, 4);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[1].start_line, 2);
    }
}
