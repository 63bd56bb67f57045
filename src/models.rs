//! Core data types that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A validated source file, ready for chunking.
///
/// Immutable once created; identity is `path` + `hash`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Path relative to the ingestion root.
    pub path: String,
    /// Decoded UTF-8 content.
    pub text: String,
    /// Size of the raw bytes.
    pub size: u64,
    /// SHA-256 of the raw bytes, hex-encoded.
    pub hash: String,
}

/// A bounded slice of a source file's text, the unit of retrieval.
///
/// The id is derived deterministically from the source path and ordinal, so
/// re-ingesting a file replaces its entries instead of duplicating them.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub source_path: String,
    /// Position within the file; contiguous starting at 0.
    pub ordinal: i64,
    pub text: String,
    /// Character (not byte) offset of the first character.
    pub start_char: usize,
    /// Character offset one past the last character.
    pub end_char: usize,
    /// Whether this chunk's head repeats the tail of the previous chunk.
    pub overlaps_previous: bool,
}

/// The persisted tuple owned by the vector index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    /// Identifier of the embedding model that produced the vector.
    pub model: String,
    pub created_at: i64,
}

/// An index entry paired with its similarity to a query vector.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// One question/answer exchange recorded in conversation memory.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub id: String,
    pub question: String,
    pub answer: String,
    /// Ids of the chunks that made it into the prompt context.
    pub chunk_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// A retrieved source reference attached to an answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub path: String,
    pub ordinal: i64,
    pub score: f32,
}

/// The result of asking a question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    /// False when no retrieved context backed the answer.
    pub grounded: bool,
}

/// A file that ingestion refused or failed to process.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Summary of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub files_indexed: u64,
    pub chunks_indexed: u64,
    pub skipped: Vec<SkippedFile>,
    /// True when the run was cancelled before all files were processed.
    pub cancelled: bool,
}
