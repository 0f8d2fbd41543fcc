//! Paragraph-boundary text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters.
//! Splitting occurs on paragraph boundaries (`\n\n`) where possible; a
//! paragraph longer than the limit is split on line or word boundaries, and
//! only as a last resort in the middle of a word. Sizes are counted in
//! characters, so multi-byte text is never cut inside a code point.
//!
//! With a non-zero `chunk_overlap`, every chunk after the first begins with
//! the tail of its predecessor.
//!
//! Each chunk receives a UUID v5 derived from its source and index, so
//! re-ingesting a document overwrites its points instead of duplicating them,
//! plus a SHA-256 hash of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Split text into chunks. Returns chunks with contiguous indices starting
/// at 0, or no chunks at all when the text is blank.
pub fn chunk_text(source: &str, text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = chunk_overlap.min(chunk_size - 1);
    // Leave room for the carried-over tail.
    let piece_max = chunk_size - overlap;

    let pieces = split_pieces(text, piece_max);

    let mut chunks = Vec::with_capacity(pieces.len());
    let mut previous: Option<&str> = None;
    for (index, piece) in pieces.iter().enumerate() {
        let text = match previous {
            Some(prev) if overlap > 0 => {
                let budget = chunk_size.saturating_sub(char_len(piece) + 1).min(overlap);
                let tail = overlap_tail(prev, budget);
                if tail.is_empty() {
                    piece.clone()
                } else {
                    format!("{} {}", tail, piece)
                }
            }
            _ => piece.clone(),
        };
        chunks.push(make_chunk(source, index as i64, &text));
        previous = Some(piece);
    }

    chunks
}

/// Deterministic chunk id: UUID v5 over `"<source>#<index>"`.
pub fn chunk_id(source: &str, index: i64) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{}#{}", source, index).as_bytes()).to_string()
}

fn split_pieces(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current_buf = String::new();
    let mut current_chars = 0usize;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_chars = char_len(trimmed);

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            para_chars
        } else {
            current_chars + 2 + para_chars
        };
        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
            current_chars = 0;
        }

        if para_chars > max_chars {
            pieces.extend(split_long(trimmed, max_chars));
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
                current_chars += 2;
            }
            current_buf.push_str(trimmed);
            current_chars += para_chars;
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
}

/// Split a single oversized paragraph, preferring newline then space boundaries.
fn split_long(text: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if char_len(remaining) <= max_chars {
            out.push(remaining.trim().to_string());
            break;
        }
        let limit = byte_offset(remaining, max_chars);
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&pos| pos > 0)
            .map(|pos| pos + 1)
            .unwrap_or(limit);

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }

    out
}

/// The last `max_chars` characters of `text`, advanced past the first
/// whitespace so the carried-over text starts on a word.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    let total = char_len(text);
    let start = byte_offset(text, total.saturating_sub(max_chars));
    let tail = &text[start..];
    if start == 0 {
        return tail.trim();
    }
    match tail.find(char::is_whitespace) {
        Some(pos) if !tail[pos..].trim().is_empty() => tail[pos..].trim(),
        _ => tail.trim(),
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`-th character, or `s.len()` if there are fewer.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

fn make_chunk(source: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(source, index),
        source: source.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
