//! Vector index abstraction and implementations.
//!
//! The [`VectorIndex`] trait wraps the similarity-search store behind four
//! operations — upsert, k-nearest query, delete-by-source, delete-all —
//! so the pipeline can run against an in-memory fake in tests and a
//! durable SQLite store in production.
//!
//! Every index holds exactly one embedding-model partition: entries carry
//! the model identifier that produced their vector, and an entry or query
//! from a different model (or with a different dimensionality) is an
//! [`Error::IndexConsistency`]. Switching models means clearing the index
//! and re-ingesting.
//!
//! Similarity search is brute-force cosine over the stored vectors, which
//! are persisted as little-endian f32 BLOBs.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::db;
use crate::error::{Error, Result};
use crate::models::{IndexEntry, ScoredEntry};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries, keyed by chunk id. Idempotent:
    /// re-upserting an id replaces its vector, text, and metadata.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// The `k` entries most similar to `vector`, descending similarity.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>>;

    /// Remove all entries for one source path. Returns the removed count.
    async fn delete_by_source(&self, source_path: &str) -> Result<u64>;

    /// Clear the entire index. Destructive; logged at warn.
    async fn delete_all(&self) -> Result<u64>;

    /// Number of stored entries.
    async fn count(&self) -> Result<u64>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; 0.0 for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

fn check_entry(model: &str, dims: usize, entry: &IndexEntry) -> Result<()> {
    if entry.model != model {
        return Err(Error::IndexConsistency(format!(
            "entry for {} was embedded with model '{}' but the index holds '{}'",
            entry.chunk.source_path, entry.model, model
        )));
    }
    if entry.vector.len() != dims {
        return Err(Error::IndexConsistency(format!(
            "entry for {} has {} dimensions, index expects {}",
            entry.chunk.source_path,
            entry.vector.len(),
            dims
        )));
    }
    Ok(())
}

fn check_query(dims: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != dims {
        return Err(Error::IndexConsistency(format!(
            "query vector has {} dimensions, index expects {}",
            vector.len(),
            dims
        )));
    }
    Ok(())
}

// ============ In-memory index ============

/// In-memory [`VectorIndex`] for tests and ephemeral sessions.
pub struct InMemoryIndex {
    model: String,
    dims: usize,
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            model: model.to_string(),
            dims,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        for entry in entries {
            check_entry(&self.model, self.dims, entry)?;
        }
        let mut stored = self.entries.write().unwrap();
        for entry in entries {
            stored.insert(entry.chunk.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>> {
        check_query(self.dims, vector)?;
        let stored = self.entries.read().unwrap();
        let mut scored: Vec<ScoredEntry> = stored
            .values()
            .map(|entry| ScoredEntry {
                score: cosine_similarity(vector, &entry.vector),
                entry: entry.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_by_source(&self, source_path: &str) -> Result<u64> {
        let mut stored = self.entries.write().unwrap();
        let before = stored.len();
        stored.retain(|_, e| e.chunk.source_path != source_path);
        Ok((before - stored.len()) as u64)
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut stored = self.entries.write().unwrap();
        let removed = stored.len() as u64;
        stored.clear();
        tracing::warn!(removed, "cleared in-memory vector index");
        Ok(removed)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.read().unwrap().len() as u64)
    }
}

// ============ Durable SQLite index ============

/// SQLite-backed [`VectorIndex`] that survives process restarts.
///
/// On open, the store's recorded embedding model is compared against the
/// configured one; a mismatch is rejected so stale vectors from an old
/// model can never answer queries for a new one.
pub struct SqliteIndex {
    pool: SqlitePool,
    model: String,
    dims: usize,
}

impl SqliteIndex {
    pub async fn open(path: &Path, model: &str, dims: usize) -> Result<Self> {
        let pool = db::connect(path).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_entries (
                chunk_id TEXT PRIMARY KEY,
                source_path TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                text TEXT NOT NULL,
                start_char INTEGER NOT NULL,
                end_char INTEGER NOT NULL,
                overlaps_previous INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                model TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_source ON index_entries(source_path)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let stored_model: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'embedding_model'")
                .fetch_optional(&pool)
                .await?;

        if let Some(stored) = stored_model {
            if stored != model {
                return Err(Error::IndexConsistency(format!(
                    "index at {} was built with embedding model '{}' but '{}' is configured; \
                     clear the index and re-ingest",
                    path.display(),
                    stored,
                    model
                )));
            }
        } else {
            sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES ('embedding_model', ?)")
                .bind(model)
                .execute(&pool)
                .await?;
            sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES ('embedding_dims', ?)")
                .bind(dims.to_string())
                .execute(&pool)
                .await?;
        }

        Ok(Self {
            pool,
            model: model.to_string(),
            dims,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        for entry in entries {
            check_entry(&self.model, self.dims, entry)?;
        }

        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO index_entries
                    (chunk_id, source_path, ordinal, text, start_char, end_char,
                     overlaps_previous, embedding, model, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    source_path = excluded.source_path,
                    ordinal = excluded.ordinal,
                    text = excluded.text,
                    start_char = excluded.start_char,
                    end_char = excluded.end_char,
                    overlaps_previous = excluded.overlaps_previous,
                    embedding = excluded.embedding,
                    model = excluded.model,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&entry.chunk.id)
            .bind(&entry.chunk.source_path)
            .bind(entry.chunk.ordinal)
            .bind(&entry.chunk.text)
            .bind(entry.chunk.start_char as i64)
            .bind(entry.chunk.end_char as i64)
            .bind(i64::from(entry.chunk.overlaps_previous))
            .bind(vec_to_blob(&entry.vector))
            .bind(&entry.model)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>> {
        check_query(self.dims, vector)?;

        let rows = sqlx::query(
            "SELECT chunk_id, source_path, ordinal, text, start_char, end_char, \
             overlaps_previous, embedding, model, created_at FROM index_entries",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredEntry> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                let entry = IndexEntry {
                    chunk: crate::models::Chunk {
                        id: row.get("chunk_id"),
                        source_path: row.get("source_path"),
                        ordinal: row.get("ordinal"),
                        text: row.get("text"),
                        start_char: row.get::<i64, _>("start_char") as usize,
                        end_char: row.get::<i64, _>("end_char") as usize,
                        overlaps_previous: row.get::<i64, _>("overlaps_previous") != 0,
                    },
                    vector: stored,
                    model: row.get("model"),
                    created_at: row.get("created_at"),
                };
                ScoredEntry {
                    score: cosine_similarity(vector, &entry.vector),
                    entry,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_by_source(&self, source_path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM index_entries WHERE source_path = ?")
            .bind(source_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM index_entries")
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected();
        tracing::warn!(removed, "cleared vector index store");
        Ok(removed)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
