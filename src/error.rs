//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Four classes of failure flow through the crate:
//! - [`Error::Rejected`] / [`Error::Blocked`] — bad input (file or question),
//!   reported to the caller, never retried.
//! - [`Error::Transient`] — the embedding or generation service timed out or
//!   rate-limited after bounded retries.
//! - [`Error::Config`] — invalid configuration, fatal at startup.
//! - [`Error::IndexConsistency`] — model/dimension mismatch or corrupted
//!   persistence; fatal for the affected operation, not the process.
//!
//! Reject and block reasons are distinguishable enum variants. Their
//! `Display` output is safe to show to a user: no stack traces, no internal
//! paths, and a blocked question is never echoed back.

use std::path::PathBuf;
use thiserror::Error;

/// Why a file was refused during ingestion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Extension is not in the configured allowlist.
    #[error("unsupported file extension")]
    UnsupportedExtension,

    /// File exceeds the configured size limit.
    #[error("file too large ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    /// File content is not valid UTF-8.
    #[error("file is not valid UTF-8")]
    EncodingError,

    /// Path resolves outside the ingestion root.
    #[error("path escapes the ingestion root")]
    OutsideRoot,
}

/// Why a question was refused by the query guard.
///
/// `HarmfulContent` deliberately does not carry the matched pattern or the
/// offending substring.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    #[error("question is empty")]
    Empty,

    #[error("question too long ({len} characters, limit {max})")]
    TooLong { len: usize, max: usize },

    #[error("question matches a blocked content pattern")]
    HarmfulContent,
}

#[derive(Error, Debug)]
pub enum Error {
    /// A file failed validation during ingestion.
    #[error("file rejected: {0}")]
    Rejected(#[from] RejectReason),

    /// A question failed the query guard.
    #[error("question blocked: {0}")]
    Blocked(#[from] BlockReason),

    /// Chunker configuration where overlap does not leave a positive stride.
    #[error("invalid chunk configuration: overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidChunkConfig { chunk_size: usize, overlap: usize },

    /// An external service kept failing with retryable errors (timeout, rate
    /// limit, 5xx) until the attempt budget ran out.
    #[error("{service} unavailable after {attempts} attempts: {message}")]
    Transient {
        service: &'static str,
        attempts: u32,
        message: String,
    },

    /// An external service failed with a non-retryable error.
    #[error("{service} request failed: {message}")]
    Service {
        service: &'static str,
        message: String,
    },

    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The vector index and the configured embedding model disagree.
    #[error("index inconsistency: {0}")]
    IndexConsistency(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("index store error: {0}")]
    Store(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
