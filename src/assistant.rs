//! Retrieval orchestrator.
//!
//! [`Assistant::ask`] runs a question through the full query path: guard →
//! embed → nearest-neighbor retrieval → bounded context assembly →
//! generation → conversation memory append. One `Assistant` is one
//! session: it owns the conversation memory and holds shared handles to
//! the gateway, index, and generation client.
//!
//! `ask` is safe to call concurrently; retrieval and generation overlap
//! freely and only the memory append is serialized. A failed ask appends
//! nothing, so memory never records half-finished turns.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::generate::Generator;
use crate::guard::QueryGuard;
use crate::index::VectorIndex;
use crate::memory::ConversationMemory;
use crate::models::{Answer, ConversationTurn, ScoredEntry, SourceRef};

/// Approximate chars-per-token ratio used for the context budget.
pub(crate) const CHARS_PER_TOKEN: usize = 4;

const SYSTEM_PROMPT: &str = "You are a code assistant that helps developers understand and work \
with their codebase. Answer using the provided context. If the context does not contain enough \
information to answer, say so. Be specific and reference files by path where possible.";

pub struct Assistant {
    guard: QueryGuard,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn Generator>,
    memory: ConversationMemory,
    top_k: usize,
    history_turns: usize,
    max_context_tokens: usize,
}

impl Assistant {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        Ok(Self {
            guard: QueryGuard::new(&config.guard)?,
            embedder,
            index,
            generator,
            memory: ConversationMemory::new(&config.memory),
            top_k: config.retrieval.top_k,
            history_turns: config.retrieval.history_turns,
            max_context_tokens: config.retrieval.max_context_tokens,
        })
    }

    /// Answer a question from the indexed codebase.
    ///
    /// A guard rejection returns before any embedding or generation call
    /// is made. An empty index still produces an answer, flagged
    /// `grounded = false`.
    pub async fn ask(&self, raw_question: &str) -> Result<Answer> {
        let question = self.guard.check(raw_question)?;

        let query_vector = self.embedder.embed_one(&question).await?;
        let hits = self.index.query(&query_vector, self.top_k).await?;
        let turns = self.memory.recent(self.history_turns).await;

        let (context, used_chunk_ids) =
            assemble_context(&hits, &turns, self.max_context_tokens);
        let grounded = !used_chunk_ids.is_empty();

        let system = if context.is_empty() {
            format!(
                "{SYSTEM_PROMPT}\n\nNo indexed code was relevant to this question; \
                 say that the index had nothing to offer before answering generally."
            )
        } else {
            format!("{SYSTEM_PROMPT}\n\n{context}")
        };

        let answer_text = self.generator.generate(&system, &question).await?;

        let sources: Vec<SourceRef> = hits
            .iter()
            .filter(|h| used_chunk_ids.contains(&h.entry.chunk.id))
            .map(|h| SourceRef {
                path: h.entry.chunk.source_path.clone(),
                ordinal: h.entry.chunk.ordinal,
                score: h.score,
            })
            .collect();

        self.memory
            .append(ConversationTurn {
                id: Uuid::new_v4().to_string(),
                question,
                answer: answer_text.clone(),
                chunk_ids: used_chunk_ids,
                timestamp: Utc::now(),
            })
            .await;

        Ok(Answer {
            text: answer_text,
            sources,
            grounded,
        })
    }

    /// All retained conversation turns, oldest first.
    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.memory.all().await
    }

    /// Forget the conversation. Leaves the vector index untouched.
    pub async fn clear_history(&self) {
        self.memory.clear().await;
    }

    pub async fn history_len(&self) -> usize {
        self.memory.len().await
    }
}

/// Assemble the prompt context from retrieved chunks and recent turns,
/// under a token budget.
///
/// `hits` must be sorted by descending similarity and `turns` most recent
/// first. When the rendered context would exceed the budget, older
/// conversation turns are dropped first, then the lowest-similarity
/// chunks, until it fits. Returns the rendered context and the ids of the
/// chunks that survived.
pub(crate) fn assemble_context(
    hits: &[ScoredEntry],
    turns: &[ConversationTurn],
    max_context_tokens: usize,
) -> (String, Vec<String>) {
    let budget_chars = max_context_tokens * CHARS_PER_TOKEN;

    let mut kept_turns: Vec<&ConversationTurn> = turns.iter().collect();
    let mut kept_hits: Vec<&ScoredEntry> = hits.iter().collect();

    loop {
        let rendered = render_context(&kept_turns, &kept_hits);
        if rendered.chars().count() <= budget_chars {
            let used = kept_hits
                .iter()
                .map(|h| h.entry.chunk.id.clone())
                .collect();
            return (rendered, used);
        }

        // Oldest turn is last (turns are most recent first); lowest
        // similarity chunk is last (hits are descending).
        if kept_turns.pop().is_none() && kept_hits.pop().is_none() {
            return (String::new(), Vec::new());
        }
    }
}

fn render_context(turns: &[&ConversationTurn], hits: &[&ScoredEntry]) -> String {
    let mut out = String::new();

    if !turns.is_empty() {
        out.push_str("Conversation so far:\n");
        for turn in turns.iter().rev() {
            out.push_str("Q: ");
            out.push_str(&turn.question);
            out.push_str("\nA: ");
            out.push_str(&turn.answer);
            out.push('\n');
        }
    }

    if !hits.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("Context from the codebase:\n");
        for hit in hits {
            out.push_str(&format!(
                "--- {} (part {}) ---\n{}\n",
                hit.entry.chunk.source_path, hit.entry.chunk.ordinal, hit.entry.chunk.text
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, IndexEntry};

    fn hit(id: &str, score: f32, text: &str) -> ScoredEntry {
        ScoredEntry {
            entry: IndexEntry {
                chunk: Chunk {
                    id: id.to_string(),
                    source_path: format!("{id}.rs"),
                    ordinal: 0,
                    text: text.to_string(),
                    start_char: 0,
                    end_char: text.chars().count(),
                    overlaps_previous: false,
                },
                vector: vec![score],
                model: "test-model".to_string(),
                created_at: 0,
            },
            score,
        }
    }

    fn turn(question: &str, answer: &str) -> ConversationTurn {
        ConversationTurn {
            id: question.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            chunk_ids: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_everything_fits_within_budget() {
        let hits = vec![hit("a", 0.9, "alpha"), hit("b", 0.5, "beta")];
        let turns = vec![turn("q1", "a1")];

        let (context, used) = assemble_context(&hits, &turns, 10_000);
        assert_eq!(used, vec!["a".to_string(), "b".to_string()]);
        assert!(context.contains("Conversation so far:"));
        assert!(context.contains("alpha"));
        assert!(context.contains("beta"));
    }

    #[test]
    fn test_turns_render_oldest_to_newest() {
        // recent() hands turns most recent first
        let turns = vec![turn("newest", "n"), turn("oldest", "o")];
        let (context, _) = assemble_context(&[], &turns, 10_000);
        let oldest_pos = context.find("oldest").unwrap();
        let newest_pos = context.find("newest").unwrap();
        assert!(oldest_pos < newest_pos);
    }

    #[test]
    fn test_over_budget_drops_oldest_turns_before_chunks() {
        let hits = vec![hit("a", 0.9, &"x".repeat(200))];
        let turns = vec![
            turn("newest", &"n".repeat(200)),
            turn("oldest", &"o".repeat(200)),
        ];

        // Budget fits one chunk and one turn, not both turns.
        let budget_tokens = 150; // 600 chars
        let (context, used) = assemble_context(&hits, &turns, budget_tokens);

        assert_eq!(used, vec!["a".to_string()]);
        assert!(context.contains("newest"));
        assert!(!context.contains("oldest"));
    }

    #[test]
    fn test_over_budget_then_drops_lowest_similarity_chunks() {
        let hits = vec![
            hit("high", 0.9, &"h".repeat(300)),
            hit("low", 0.2, &"l".repeat(300)),
        ];
        let turns = vec![turn("q", &"a".repeat(300))];

        // Fits one chunk only: both turns and the low chunk must go.
        let budget_tokens = 100; // 400 chars
        let (context, used) = assemble_context(&hits, &turns, budget_tokens);

        assert_eq!(used, vec!["high".to_string()]);
        assert!(!context.contains("Conversation so far:"));
        assert!(context.contains(&"h".repeat(300)));
    }

    #[test]
    fn test_nothing_fits_yields_empty_context() {
        let hits = vec![hit("a", 0.9, &"x".repeat(1000))];
        let (context, used) = assemble_context(&hits, &[], 10);
        assert!(context.is_empty());
        assert!(used.is_empty());
    }
}
