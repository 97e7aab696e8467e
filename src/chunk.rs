//! Overlapping-window text chunker.
//!
//! Splits crawled page text into fixed-size windows with overlap between
//! consecutive chunks, so an answer spanning a window boundary still has
//! continuous context in at least one chunk. Window edges prefer whitespace
//! so words are not cut in half.
//!
//! Each chunk receives a UUID plus a SHA-256 hash of its text for staleness
//! detection. Splitting is deterministic for fixed input: rebuilding an
//! unchanged corpus yields the same chunk count and texts.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A chunk of page text destined for the index.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_url: String,
    pub chunk_index: i64,
    pub content: String,
    pub hash: String,
}

/// Split `text` into windows of at most `chunk_size` characters, with
/// `overlap` characters shared between consecutive windows. Empty or
/// whitespace-only text produces no chunks. `overlap` must be smaller than
/// `chunk_size` (validated at config load).
pub fn chunk_text(source_url: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    debug_assert!(overlap < chunk_size);

    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    while start < text.len() {
        let mut end = floor_char_boundary(text, (start + chunk_size).min(text.len()));

        // A window narrower than the character at `start` floors back to an
        // empty slice; take that one character anyway so the loop advances.
        if end <= start {
            end = ceil_char_boundary(text, start + 1);
        }

        // Break at the last whitespace inside the window so words stay whole.
        if end < text.len() {
            if let Some(pos) = text[start..end].rfind(char::is_whitespace) {
                if pos > 0 {
                    end = start + pos;
                }
            }
        }

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(source_url, index, piece));
            index += 1;
        }

        if end >= text.len() {
            break;
        }

        // Step back by the overlap, but always make forward progress.
        let mut next = end.saturating_sub(overlap);
        if next <= start {
            next = end;
        }
        start = ceil_char_boundary(text, next);
    }

    chunks
}

fn floor_char_boundary(text: &str, mut i: usize) -> usize {
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(text: &str, mut i: usize) -> usize {
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn make_chunk(source_url: &str, index: i64, content: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source_url: source_url.to_string(),
        chunk_index: index,
        content: content.to_string(),
        hash,
    }
}
