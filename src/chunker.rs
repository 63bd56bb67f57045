//! Overlapping character-window chunker.
//!
//! Splits a validated file's text into windows of `chunk_size` characters,
//! each subsequent window starting `chunk_size - overlap` characters after
//! the previous start, until the file is exhausted. The final chunk may be
//! shorter. Offsets are character offsets, so multi-byte text never splits
//! inside a code point.
//!
//! Chunking is deterministic: identical input and configuration always
//! yield identical boundaries. Each chunk's id is derived from its source
//! path and ordinal, so a re-ingested file maps onto the same ids.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::{Chunk, SourceFile};

/// Split a source file into ordered chunks with contiguous ordinals
/// starting at 0.
///
/// Fails fast with [`Error::InvalidChunkConfig`] when `chunk_size` is zero
/// or `overlap` is not strictly smaller than `chunk_size`.
pub fn chunk_file(file: &SourceFile, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(Error::InvalidChunkConfig {
            chunk_size,
            overlap,
        });
    }

    let chars: Vec<char> = file.text.chars().collect();

    if chars.is_empty() {
        return Ok(vec![make_chunk(&file.path, 0, String::new(), 0, 0, false)]);
    }

    let stride = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal = 0i64;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let text: String = chars[start..end].iter().collect();
        let overlaps_previous = ordinal > 0 && overlap > 0;
        chunks.push(make_chunk(
            &file.path,
            ordinal,
            text,
            start,
            end,
            overlaps_previous,
        ));

        if end == chars.len() {
            break;
        }
        start += stride;
        ordinal += 1;
    }

    Ok(chunks)
}

/// Deterministic chunk id: SHA-256 over `"{source_path}#{ordinal}"`.
pub fn chunk_id(source_path: &str, ordinal: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(b"#");
    hasher.update(ordinal.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(
    source_path: &str,
    ordinal: i64,
    text: String,
    start_char: usize,
    end_char: usize,
    overlaps_previous: bool,
) -> Chunk {
    Chunk {
        id: chunk_id(source_path, ordinal),
        source_path: source_path.to_string(),
        ordinal,
        text,
        start_char,
        end_char,
        overlaps_previous,
    }
}
