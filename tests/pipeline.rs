//! End-to-end pipeline tests over the library, using a deterministic fake
//! embedder, a fake generator, and the in-memory index — no network, no
//! API key.

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use codeask::assistant::Assistant;
use codeask::config::Config;
use codeask::embedding::Embedder;
use codeask::error::{BlockReason, Error, Result};
use codeask::generate::Generator;
use codeask::index::{InMemoryIndex, SqliteIndex, VectorIndex};
use codeask::ingest::ingest_directory;
use codeask::models::{Chunk, IndexEntry};

const DIMS: usize = 64;
const MODEL: &str = "fake-model";

/// Deterministic bag-of-words embedder: each token is FNV-hashed into a
/// bucket, then the vector is L2-normalized. Shared vocabulary means
/// higher cosine similarity, which is all retrieval needs here.
struct FakeEmbedder {
    calls: AtomicUsize,
}

impl FakeEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIMS];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in token.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash % DIMS as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        MODEL
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
    }
}

struct FakeGenerator {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, system: &str, question: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Service {
                service: "generation service",
                message: "canned failure".to_string(),
            });
        }
        Ok(format!(
            "answer to '{question}' using {} context chars",
            system.len()
        ))
    }
}

fn write_sample_project(dir: &Path) {
    fs::write(
        dir.join("a.rs"),
        "/// foo is defined here\nfn foo() -> u32 { 41 }\n",
    )
    .unwrap();
    fs::write(dir.join("b.rs"), "fn bar() -> u32 { 2 }\n").unwrap();
    fs::write(
        dir.join("c.rs"),
        "struct Widget { size: usize }\nimpl Widget { fn grow(&mut self) {} }\n",
    )
    .unwrap();
}

struct Harness {
    _tmp: TempDir,
    config: Config,
    embedder: Arc<FakeEmbedder>,
    index: Arc<InMemoryIndex>,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        write_sample_project(tmp.path());
        Self {
            _tmp: tmp,
            config: Config::default(),
            embedder: Arc::new(FakeEmbedder::new()),
            index: Arc::new(InMemoryIndex::new(MODEL, DIMS)),
        }
    }

    fn root(&self) -> &Path {
        self._tmp.path()
    }

    async fn ingest(&self) -> codeask::models::IngestReport {
        ingest_directory(
            &self.config,
            self.embedder.clone(),
            self.index.clone(),
            self.root(),
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    fn assistant(&self, generator: Arc<FakeGenerator>) -> Assistant {
        Assistant::new(
            &self.config,
            self.embedder.clone(),
            self.index.clone(),
            generator,
        )
        .unwrap()
    }
}

#[tokio::test]
async fn test_ingest_then_ask_finds_foo_definition() {
    let harness = Harness::new();
    let report = harness.ingest().await;

    assert_eq!(report.files_indexed, 3);
    assert!(report.skipped.is_empty());
    assert!(!report.cancelled);
    assert_eq!(harness.index.count().await.unwrap(), report.chunks_indexed);

    // The top retrieved chunk for a foo question must come from a.rs.
    let query = FakeEmbedder::embed_text("where is foo defined");
    let hits = harness.index.query(&query, 3).await.unwrap();
    assert_eq!(hits[0].entry.chunk.source_path, "a.rs");

    let generator = Arc::new(FakeGenerator::new());
    let assistant = harness.assistant(generator.clone());
    let answer = assistant.ask("where is foo defined").await.unwrap();

    assert!(answer.grounded);
    assert_eq!(answer.sources[0].path, "a.rs");
    assert_eq!(generator.calls(), 1);
    assert_eq!(assistant.history_len().await, 1);
}

#[tokio::test]
async fn test_blocked_question_makes_no_service_calls() {
    let harness = Harness::new();
    let generator = Arc::new(FakeGenerator::new());
    let assistant = harness.assistant(generator.clone());

    let err = assistant.ask("   ").await.unwrap_err();
    assert!(matches!(err, Error::Blocked(BlockReason::Empty)));

    assert_eq!(harness.embedder.calls(), 0);
    assert_eq!(generator.calls(), 0);
    assert_eq!(assistant.history_len().await, 0);
}

#[tokio::test]
async fn test_empty_index_answer_is_ungrounded() {
    let harness = Harness::new();
    let generator = Arc::new(FakeGenerator::new());
    let assistant = harness.assistant(generator.clone());

    let answer = assistant.ask("what does this project do?").await.unwrap();
    assert!(!answer.grounded);
    assert!(answer.sources.is_empty());
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_failed_generation_appends_no_turn() {
    let harness = Harness::new();
    harness.ingest().await;
    let assistant = harness.assistant(Arc::new(FakeGenerator::failing()));

    let err = assistant.ask("where is foo defined").await.unwrap_err();
    assert!(matches!(err, Error::Service { .. }));
    assert_eq!(assistant.history_len().await, 0);
}

#[tokio::test]
async fn test_delete_all_then_query_returns_nothing() {
    let harness = Harness::new();
    harness.ingest().await;
    assert!(harness.index.count().await.unwrap() > 0);

    harness.index.delete_all().await.unwrap();

    let query = FakeEmbedder::embed_text("where is foo defined");
    assert!(harness.index.query(&query, 5).await.unwrap().is_empty());
    assert_eq!(harness.index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reingest_replaces_instead_of_duplicating() {
    let harness = Harness::new();
    let first = harness.ingest().await;
    let count_after_first = harness.index.count().await.unwrap();

    let second = harness.ingest().await;
    assert_eq!(first.files_indexed, second.files_indexed);
    assert_eq!(harness.index.count().await.unwrap(), count_after_first);
}

#[tokio::test]
async fn test_bad_file_is_skipped_and_reported() {
    let harness = Harness::new();
    fs::write(harness.root().join("bad.rs"), [0xff, 0xfe, 0x01]).unwrap();
    fs::write(harness.root().join("notes.bin"), "not eligible").unwrap();

    let report = harness.ingest().await;

    assert_eq!(report.files_indexed, 3);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].path, "bad.rs");
    assert!(report.skipped[0].reason.contains("UTF-8"));
}

#[tokio::test]
async fn test_cancelled_ingest_writes_nothing() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = ingest_directory(
        &harness.config,
        harness.embedder.clone(),
        harness.index.clone(),
        harness.root(),
        true,
        &cancel,
    )
    .await
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.files_indexed, 0);
    assert_eq!(harness.index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_conversation_context_flows_into_later_questions() {
    let harness = Harness::new();
    harness.ingest().await;
    let generator = Arc::new(FakeGenerator::new());
    let assistant = harness.assistant(generator.clone());

    assistant.ask("where is foo defined").await.unwrap();
    assistant.ask("and what does it return").await.unwrap();

    let history = assistant.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].question, "where is foo defined");

    assistant.clear_history().await;
    assert_eq!(assistant.history_len().await, 0);
    // Clearing history must not touch the index.
    assert!(harness.index.count().await.unwrap() > 0);
}

fn entry(id: &str, source: &str, vector: Vec<f32>) -> IndexEntry {
    IndexEntry {
        chunk: Chunk {
            id: id.to_string(),
            source_path: source.to_string(),
            ordinal: 0,
            text: "fn foo() {}".to_string(),
            start_char: 0,
            end_char: 11,
            overlaps_previous: false,
        },
        vector,
        model: MODEL.to_string(),
        created_at: 0,
    }
}

#[tokio::test]
async fn test_sqlite_index_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("index.sqlite");

    let mut vector = vec![0.0f32; DIMS];
    vector[0] = 1.0;

    {
        let index = SqliteIndex::open(&db_path, MODEL, DIMS).await.unwrap();
        index.upsert(&[entry("c1", "a.rs", vector.clone())]).await.unwrap();
    }

    let reopened = SqliteIndex::open(&db_path, MODEL, DIMS).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 1);

    let hits = reopened.query(&vector, 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.chunk.source_path, "a.rs");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn test_sqlite_index_rejects_model_change() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("index.sqlite");

    SqliteIndex::open(&db_path, MODEL, DIMS).await.unwrap();

    let result = SqliteIndex::open(&db_path, "other-model", DIMS).await;
    assert!(matches!(result, Err(Error::IndexConsistency(_))));
}

#[tokio::test]
async fn test_sqlite_upsert_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("index.sqlite");
    let index = SqliteIndex::open(&db_path, MODEL, DIMS).await.unwrap();

    let mut vector = vec![0.0f32; DIMS];
    vector[1] = 1.0;

    let mut first = entry("c1", "a.rs", vector.clone());
    first.chunk.text = "old text".to_string();
    index.upsert(&[first]).await.unwrap();

    let mut second = entry("c1", "a.rs", vector.clone());
    second.chunk.text = "new text".to_string();
    index.upsert(&[second]).await.unwrap();

    assert_eq!(index.count().await.unwrap(), 1);
    let hits = index.query(&vector, 5).await.unwrap();
    assert_eq!(hits[0].entry.chunk.text, "new text");
}
