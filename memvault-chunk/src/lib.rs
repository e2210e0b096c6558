//! Pure, deterministic text chunking. A chunker never touches storage or the
//! network; it is a function of `(text, artifact_id, config)`.

use memvault_core::ids::chunk_id;
use memvault_core::model::Chunk;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub single_piece_max: usize,
    pub chunk_target: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            single_piece_max: 1200,
            chunk_target: 900,
            chunk_overlap: 100,
        }
    }
}

/// One token's proxy-encoded span: `(start_byte, end_byte)` in the original
/// text, half-open.
struct Token {
    start: usize,
    end: usize,
}

/// A deterministic whitespace/punctuation-aware proxy tokenizer. This is not
/// an exact match for any particular BPE vocabulary — that is explicitly out
/// of scope for a capability interface — but it is stable, so the same text
/// always yields the same token boundaries and the same chunk count.
fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut token_start: Option<usize> = None;

    let is_word_byte = |b: u8| b.is_ascii_alphanumeric() || b >= 0x80;

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            if let Some(start) = token_start.take() {
                tokens.push(Token { start, end: i });
            }
            i += 1;
            continue;
        }
        if is_word_byte(b) {
            if token_start.is_none() {
                token_start = Some(i);
            }
            i += 1;
            continue;
        }
        // Punctuation: close any open word token, then emit this byte as its
        // own single-byte token.
        if let Some(start) = token_start.take() {
            tokens.push(Token { start, end: i });
        }
        tokens.push(Token { start: i, end: i + 1 });
        i += 1;
    }
    if let Some(start) = token_start.take() {
        tokens.push(Token { start, end: bytes.len() });
    }
    tokens
}

pub fn token_count(text: &str) -> usize {
    tokenize(text).len().max(if text.is_empty() { 0 } else { 1 })
}

pub fn should_chunk(text: &str, config: &ChunkerConfig) -> bool {
    token_count(text) > config.single_piece_max
}

/// Greedily accumulates tokens into a chunk until adding the next token
/// would exceed `chunk_target`, then starts the next chunk by re-seeding
/// with the last `chunk_overlap` tokens of the previous one — the same
/// accumulate-until-budget shape used for batch planning elsewhere in this
/// workspace.
pub fn chunk(text: &str, artifact_id: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Vec::new();
    }
    if !should_chunk(text, config) {
        let piece = build_chunk(text, artifact_id, 0, &tokens, 0, tokens.len());
        return vec![piece];
    }

    let mut pieces = Vec::new();
    let mut index = 0;
    let mut window_start = 0;

    while window_start < tokens.len() {
        let mut window_end = window_start;
        let mut accumulated = 0usize;
        while window_end < tokens.len() && (window_end == window_start || accumulated < config.chunk_target) {
            accumulated += 1;
            window_end += 1;
        }
        pieces.push(build_chunk(text, artifact_id, index, &tokens, window_start, window_end));
        index += 1;

        if window_end >= tokens.len() {
            break;
        }
        let overlap_start = window_end.saturating_sub(config.chunk_overlap);
        window_start = overlap_start.max(window_start + 1);
    }

    pieces
}

fn build_chunk(
    text: &str,
    artifact_id: &str,
    index: usize,
    tokens: &[Token],
    start_idx: usize,
    end_idx: usize,
) -> Chunk {
    let start_char = tokens[start_idx].start;
    let end_char = tokens[end_idx - 1].end;
    let slice = &text[start_char..end_char];
    let id = chunk_id(artifact_id, index, slice);
    Chunk {
        chunk_id: id,
        artifact_uid: String::new(),
        revision_id: String::new(),
        index,
        start_char,
        end_char,
        token_count: end_idx - start_idx,
        content_hash: memvault_core::hashing::sha256_hex(slice.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_not_chunked() {
        let config = ChunkerConfig::default();
        assert!(!should_chunk("hello world", &config));
        let chunks = chunk("hello world", "art_1", &config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let config = ChunkerConfig::default();
        assert_eq!(chunk("", "art_1", &config).len(), 0);
    }

    #[test]
    fn long_text_is_split_with_overlap() {
        let config = ChunkerConfig {
            single_piece_max: 10,
            chunk_target: 5,
            chunk_overlap: 2,
        };
        let text = (0..40).map(|n| format!("word{n}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk(&text, "art_1", &config);
        assert!(chunks.len() > 1);
        for window in chunks.windows(2) {
            assert!(window[0].end_char >= window[1].start_char || window[0].end_char <= window[1].start_char);
            assert!(window[1].index == window[0].index + 1);
        }
    }

    #[test]
    fn rechunking_identical_text_is_deterministic() {
        let config = ChunkerConfig::default();
        let text = "a b c d e f g";
        let first = chunk(text, "art_1", &config);
        let second = chunk(text, "art_1", &config);
        let first_ids: Vec<_> = first.iter().map(|c| c.chunk_id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|c| c.chunk_id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }
}
