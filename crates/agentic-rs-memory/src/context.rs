//! Conversation buffer and token-bounded context assembly.

use crate::model::{MemoryType, ScoredRecord};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Who said a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    /// Label used when rendering context.
    pub fn label(self) -> &'static str {
        match self {
            Speaker::User => "User",
            Speaker::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Single utterance in the recent conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded ring buffer of recent turns; the oldest turn is evicted first.
#[derive(Debug)]
pub struct ConversationBuffer {
    capacity: usize,
    turns: Mutex<VecDeque<ConversationTurn>>,
}

impl ConversationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            turns: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a turn, evicting the oldest when full.
    pub fn push(&self, turn: ConversationTurn) {
        if self.capacity == 0 {
            return;
        }
        let mut turns = self.turns.lock();
        while turns.len() >= self.capacity {
            turns.pop_front();
        }
        turns.push_back(turn);
    }

    /// Up to `limit` most recent turns, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ConversationTurn> {
        let turns = self.turns.lock();
        let start = turns.len().saturating_sub(limit);
        turns.iter().skip(start).cloned().collect()
    }

    /// Every buffered turn, oldest first.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.lock().is_empty()
    }

    pub fn clear(&self) {
        self.turns.lock().clear();
    }
}

/// Counts tokens in a fragment of text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Approximates tokens as `ceil(chars / chars_per_token)`.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioCounter {
    chars_per_token: usize,
}

impl CharRatioCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for CharRatioCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}

/// Where a context fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "tag", rename_all = "lowercase")]
pub enum FragmentSource {
    Conversation(Speaker),
    Memory(MemoryType),
}

/// One whole item included in an assembled context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextFragment {
    pub source: FragmentSource,
    pub text: String,
    pub tokens: usize,
    /// Record id for memory fragments.
    pub record_id: Option<Uuid>,
    /// Ranking score for memory fragments.
    pub score: Option<f32>,
}

/// Ordered, budget-bounded context handed to response generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPayload {
    pub fragments: Vec<ContextFragment>,
    pub total_tokens: usize,
    pub max_tokens: usize,
    /// Candidates discarded once the budget was reached.
    pub dropped: usize,
}

impl ContextPayload {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Conversation fragments in order.
    pub fn conversation(&self) -> impl Iterator<Item = &ContextFragment> {
        self.fragments
            .iter()
            .filter(|fragment| matches!(fragment.source, FragmentSource::Conversation(_)))
    }

    /// Memory fragments in rank order.
    pub fn memories(&self) -> impl Iterator<Item = &ContextFragment> {
        self.fragments
            .iter()
            .filter(|fragment| matches!(fragment.source, FragmentSource::Memory(_)))
    }

    /// Render as prompt text; empty sections are omitted.
    pub fn render(&self) -> String {
        let mut sections = Vec::new();
        let conversation: Vec<String> = self
            .conversation()
            .filter_map(|fragment| match fragment.source {
                FragmentSource::Conversation(speaker) => {
                    Some(format!("{}: {}", speaker.label(), fragment.text))
                }
                FragmentSource::Memory(_) => None,
            })
            .collect();
        if !conversation.is_empty() {
            sections.push(format!("Recent conversation:\n{}", conversation.join("\n")));
        }
        let memories: Vec<String> = self
            .memories()
            .filter_map(|fragment| match fragment.source {
                FragmentSource::Memory(kind) => Some(format!("[{}] {}", kind.label(), fragment.text)),
                FragmentSource::Conversation(_) => None,
            })
            .collect();
        if !memories.is_empty() {
            sections.push(format!("Relevant memories:\n{}", memories.join("\n")));
        }
        sections.join("\n\n")
    }
}

/// Merges recent turns and ranked memories under a token budget.
///
/// Items are taken in order (conversation oldest first, then memories by
/// rank) and accumulation stops at the first item that would overflow the
/// budget. Items are never split.
#[derive(Clone)]
pub struct ContextAssembler {
    max_tokens: usize,
    history_length: usize,
    counter: Arc<dyn TokenCounter>,
}

impl fmt::Debug for ContextAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextAssembler")
            .field("max_tokens", &self.max_tokens)
            .field("history_length", &self.history_length)
            .finish()
    }
}

impl ContextAssembler {
    pub fn new(max_tokens: usize, history_length: usize) -> Self {
        Self {
            max_tokens,
            history_length,
            counter: Arc::new(CharRatioCounter::default()),
        }
    }

    /// Replace the token counter.
    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn history_length(&self) -> usize {
        self.history_length
    }

    /// Build the payload from turns (oldest first) and ranked memories.
    pub fn assemble(&self, turns: &[ConversationTurn], memories: &[ScoredRecord]) -> ContextPayload {
        let start = turns.len().saturating_sub(self.history_length);
        let candidates = turns[start..]
            .iter()
            .map(|turn| {
                (
                    FragmentSource::Conversation(turn.speaker),
                    turn.text.as_str(),
                    None::<Uuid>,
                    None::<f32>,
                )
            })
            .chain(memories.iter().map(|scored| {
                (
                    FragmentSource::Memory(scored.record.memory_type),
                    scored.record.content.as_str(),
                    Some(scored.record.id),
                    Some(scored.score),
                )
            }));
        let total_candidates = turns.len() - start + memories.len();

        let mut fragments = Vec::new();
        let mut total_tokens = 0usize;
        for (source, text, record_id, score) in candidates {
            let tokens = self.counter.count(text);
            match total_tokens.checked_add(tokens) {
                Some(sum) if sum <= self.max_tokens => total_tokens = sum,
                _ => break,
            }
            fragments.push(ContextFragment {
                source,
                text: text.to_string(),
                tokens,
                record_id,
                score,
            });
        }
        ContextPayload {
            dropped: total_candidates - fragments.len(),
            fragments,
            total_tokens,
            max_tokens: self.max_tokens,
        }
    }
}
