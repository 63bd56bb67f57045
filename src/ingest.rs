//! Ingestion pipeline orchestration.
//!
//! Walks a directory, validates and chunks each eligible file, embeds the
//! chunks, and upserts them into the vector index. Files are independent:
//! one bad file is skipped and reported, not a fatal abort. Writes are
//! serialized per source path — each file's delete + upsert happens inside
//! its own task, so re-ingesting is last-writer-wins at file granularity.
//!
//! Cancellation is cooperative: the token is checked between pipeline
//! stages, and a file whose upsert was interrupted is rolled back via
//! `delete_by_source` so the index never keeps a partial file.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunker::chunk_file;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::{IndexEntry, IngestReport, SkippedFile};
use crate::validator::FileValidator;

enum FileOutcome {
    Indexed { chunks: u64 },
    Skipped { reason: String },
    Cancelled,
}

/// Ingest every eligible file under `root` into the vector index.
pub async fn ingest_directory(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    root: &Path,
    recursive: bool,
    cancel: &CancellationToken,
) -> Result<IngestReport> {
    let validator = Arc::new(FileValidator::new(root, &config.ingest)?);
    let files = collect_files(&validator, &config.ingest.exclude_globs, recursive)?;

    info!(count = files.len(), root = %root.display(), "found candidate files");

    let mut report = IngestReport::default();
    let file_slots = Arc::new(Semaphore::new(config.embedding.max_concurrency.max(1)));
    let mut tasks: JoinSet<(String, Result<FileOutcome>)> = JoinSet::new();

    for (abs_path, rel_path) in files {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let permit = file_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Cancelled)?;

        let validator = validator.clone();
        let embedder = embedder.clone();
        let index = index.clone();
        let cancel = cancel.clone();
        let chunk_size = config.chunking.chunk_size;
        let overlap = config.chunking.overlap;

        tasks.spawn(async move {
            let _permit = permit;
            let outcome = process_file(
                &validator, &*embedder, &*index, &abs_path, chunk_size, overlap, &cancel,
            )
            .await;
            (rel_path, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (rel_path, outcome) = joined.map_err(|e| Error::Service {
            service: "ingestion",
            message: e.to_string(),
        })?;

        match outcome? {
            FileOutcome::Indexed { chunks } => {
                debug!(path = %rel_path, chunks, "indexed file");
                report.files_indexed += 1;
                report.chunks_indexed += chunks;
            }
            FileOutcome::Skipped { reason } => {
                warn!(path = %rel_path, %reason, "skipped file");
                report.skipped.push(SkippedFile {
                    path: rel_path,
                    reason,
                });
            }
            FileOutcome::Cancelled => {
                report.cancelled = true;
            }
        }
    }

    report.skipped.sort_by(|a, b| a.path.cmp(&b.path));

    info!(
        files = report.files_indexed,
        chunks = report.chunks_indexed,
        skipped = report.skipped.len(),
        cancelled = report.cancelled,
        "ingestion finished"
    );

    Ok(report)
}

/// Walk the tree and return (absolute, root-relative) paths for files that
/// pass the extension allowlist and exclude globs, sorted for
/// deterministic ordering.
fn collect_files(
    validator: &FileValidator,
    extra_excludes: &[String],
    recursive: bool,
) -> Result<Vec<(PathBuf, String)>> {
    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/.*/**".to_string(),
    ];
    default_excludes.extend(extra_excludes.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let root = validator.root().to_path_buf();
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).max_depth(max_depth).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io {
            path: root.clone(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !validator.has_supported_extension(path) {
            continue;
        }

        files.push((path.to_path_buf(), rel_str));
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

async fn process_file(
    validator: &FileValidator,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    abs_path: &Path,
    chunk_size: usize,
    overlap: usize,
    cancel: &CancellationToken,
) -> Result<FileOutcome> {
    if cancel.is_cancelled() {
        return Ok(FileOutcome::Cancelled);
    }

    let bytes = match tokio::fs::read(abs_path).await {
        Ok(b) => b,
        Err(e) => {
            return Ok(FileOutcome::Skipped {
                reason: format!("unreadable: {e}"),
            })
        }
    };

    let source = match validator.validate(abs_path, &bytes) {
        Ok(s) => s,
        Err(reason) => {
            return Ok(FileOutcome::Skipped {
                reason: reason.to_string(),
            })
        }
    };

    if source.text.trim().is_empty() {
        return Ok(FileOutcome::Skipped {
            reason: "empty file".to_string(),
        });
    }

    let chunks = chunk_file(&source, chunk_size, overlap)?;
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

    if cancel.is_cancelled() {
        return Ok(FileOutcome::Cancelled);
    }

    // A batch that failed after exhausted retries fails the whole file;
    // the file is skipped and reported rather than aborting the run.
    let vectors = match embedder.embed(&texts).await {
        Ok(v) => v,
        Err(e @ (Error::Transient { .. } | Error::Service { .. })) => {
            return Ok(FileOutcome::Skipped {
                reason: e.to_string(),
            })
        }
        Err(e) => return Err(e),
    };

    let now = chrono::Utc::now().timestamp();
    let model = embedder.model_name().to_string();
    let entries: Vec<IndexEntry> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexEntry {
            chunk,
            vector,
            model: model.clone(),
            created_at: now,
        })
        .collect();

    if cancel.is_cancelled() {
        return Ok(FileOutcome::Cancelled);
    }

    // Replace any previous entries for this file, then write the new ones.
    index.delete_by_source(&source.path).await?;

    match index.upsert(&entries).await {
        Ok(()) => {}
        Err(e) => {
            // Roll back so the index never holds a partial file.
            let _ = index.delete_by_source(&source.path).await;
            return Err(e);
        }
    }

    if cancel.is_cancelled() {
        // Rollback-on-abort: drop this file's writes entirely.
        index.delete_by_source(&source.path).await?;
        return Ok(FileOutcome::Cancelled);
    }

    Ok(FileOutcome::Indexed {
        chunks: entries.len() as u64,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| Error::Config(format!("invalid exclude glob {pattern:?}: {e}")))?,
        );
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid exclude globs: {e}")))
}
