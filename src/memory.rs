//! Bounded conversation memory.
//!
//! An ordered log of question/answer turns, capped at a configured length
//! with oldest-first eviction. Appends are serialized behind an async
//! mutex so concurrent `ask` calls on one session preserve turn ordering;
//! reads take a snapshot.

use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::config::MemoryConfig;
use crate::models::ConversationTurn;

pub struct ConversationMemory {
    cap: usize,
    turns: Mutex<VecDeque<ConversationTurn>>,
}

impl ConversationMemory {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            cap: config.max_turns.max(1),
            turns: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a turn, evicting the oldest when at capacity.
    pub async fn append(&self, turn: ConversationTurn) {
        let mut turns = self.turns.lock().await;
        if turns.len() == self.cap {
            turns.pop_front();
        }
        turns.push_back(turn);
    }

    /// The `n` most recent turns, most recent first.
    pub async fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let turns = self.turns.lock().await;
        turns.iter().rev().take(n).cloned().collect()
    }

    /// All retained turns, oldest first.
    pub async fn all(&self) -> Vec<ConversationTurn> {
        let turns = self.turns.lock().await;
        turns.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.turns.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.turns.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.turns.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(question: &str) -> ConversationTurn {
        ConversationTurn {
            id: uuid::Uuid::new_v4().to_string(),
            question: question.to_string(),
            answer: format!("answer to {question}"),
            chunk_ids: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    fn memory(cap: usize) -> ConversationMemory {
        ConversationMemory::new(&MemoryConfig { max_turns: cap })
    }

    #[tokio::test]
    async fn test_never_exceeds_cap_and_evicts_oldest() {
        let memory = memory(3);
        for q in ["one", "two", "three", "four"] {
            memory.append(turn(q)).await;
        }

        assert_eq!(memory.len().await, 3);
        let all = memory.all().await;
        assert_eq!(all[0].question, "two");
        assert_eq!(all[2].question, "four");
    }

    #[tokio::test]
    async fn test_recent_returns_most_recent_first() {
        let memory = memory(10);
        for q in ["one", "two", "three"] {
            memory.append(turn(q)).await;
        }

        let recent = memory.recent(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question, "three");
        assert_eq!(recent[1].question, "two");
    }

    #[tokio::test]
    async fn test_clear_empties_memory() {
        let memory = memory(5);
        memory.append(turn("one")).await;
        memory.clear().await;
        assert!(memory.is_empty().await);
        assert!(memory.recent(5).await.is_empty());
    }
}
