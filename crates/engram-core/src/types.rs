// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the normalizer, state manager, adapters, and middleware.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::EngramError;

/// Identifier of a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Canonical speaker role of a turn.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One message exchanged in a conversation thread.
///
/// `seq` is zero until the state manager stamps the turn on append; after
/// that `(thread_id, seq)` identifies the turn and it is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub thread_id: ThreadId,
    pub seq: u64,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Creates an unsequenced turn.
    pub fn new(
        thread_id: ThreadId,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            thread_id,
            seq: 0,
            role,
            content: content.into(),
            timestamp,
        }
    }

    /// Reference to this turn usable as a record source.
    pub fn turn_ref(&self) -> TurnRef {
        TurnRef {
            thread_id: self.thread_id.clone(),
            seq: self.seq,
        }
    }
}

/// Stable identity of a persisted turn, rendered as `turn:<thread>:<seq>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnRef {
    pub thread_id: ThreadId,
    pub seq: u64,
}

impl fmt::Display for TurnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn:{}:{}", self.thread_id, self.seq)
    }
}

impl std::str::FromStr for TurnRef {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("turn:")
            .ok_or_else(|| EngramError::Internal(format!("not a turn reference: {s}")))?;
        // Thread ids may contain ':' so the sequence is taken from the right.
        let (thread, seq) = rest
            .rsplit_once(':')
            .ok_or_else(|| EngramError::Internal(format!("not a turn reference: {s}")))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|e| EngramError::Internal(format!("bad turn sequence in {s}: {e}")))?;
        Ok(TurnRef {
            thread_id: ThreadId::new(thread),
            seq,
        })
    }
}

/// Opaque pointer from a memory record back to where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "ref", rename_all = "lowercase")]
pub enum SourceRef {
    /// The record is a direct projection of a persisted turn.
    Turn(TurnRef),
    /// The record is a graph element derived from one or more turn episodes.
    Graph(String),
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Turn(r) => write!(f, "{r}"),
            SourceRef::Graph(uuid) => write!(f, "graph:{uuid}"),
        }
    }
}

/// Shape of a memory record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Embedded copy of a turn (vector backend).
    Turn,
    /// Entity node summary (graph backend).
    Entity,
    /// Relationship fact between entities (graph backend).
    Fact,
    /// Raw episode (graph backend).
    Episode,
}

/// Backend-specific persisted projection of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    /// Thread (or shared namespace owner) the record was written under.
    pub thread_id: ThreadId,
    pub source: SourceRef,
    pub kind: RecordKind,
    pub role: Option<Role>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Outcome of one retrieval. Produced fresh per turn and never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// Records ordered by descending relevance.
    pub records: Vec<MemoryRecord>,
    /// Relevance score of `records[i]`; always the same length as `records`.
    pub relevance_scores: Vec<f32>,
    pub backend_latency: Duration,
    /// True when the backend failed and the result is empty by substitution.
    pub degraded: bool,
    /// Name of the adapter that produced the result.
    pub backend: String,
    /// State version the query was computed for, if known.
    pub checkpoint_version: Option<u64>,
}

impl RetrievalResult {
    /// An empty, healthy result.
    pub fn empty(backend: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            relevance_scores: Vec::new(),
            backend_latency: Duration::ZERO,
            degraded: false,
            backend: backend.into(),
            checkpoint_version: None,
        }
    }

    /// An empty result substituted for a failed backend call.
    pub fn degraded(backend: impl Into<String>, latency: Duration) -> Self {
        Self {
            degraded: true,
            backend_latency: latency,
            ..Self::empty(backend)
        }
    }

    /// Builds a result from `(record, score)` pairs, keeping their order.
    pub fn from_scored(
        backend: impl Into<String>,
        scored: Vec<(MemoryRecord, f32)>,
        latency: Duration,
    ) -> Self {
        let (records, relevance_scores) = scored.into_iter().unzip();
        Self {
            records,
            relevance_scores,
            backend_latency: latency,
            degraded: false,
            backend: backend.into(),
            checkpoint_version: None,
        }
    }

    pub fn with_checkpoint(mut self, version: u64) -> Self {
        self.checkpoint_version = Some(version);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates `(record, score)` pairs in ranking order.
    pub fn scored(&self) -> impl Iterator<Item = (&MemoryRecord, f32)> {
        self.records
            .iter()
            .zip(self.relevance_scores.iter().copied())
    }

    /// Consumes the result into `(record, score)` pairs.
    pub fn into_scored(self) -> Vec<(MemoryRecord, f32)> {
        self.records
            .into_iter()
            .zip(self.relevance_scores)
            .collect()
    }
}

/// Per-thread conversation state.
///
/// Fields are private and the mutators are crate-private: outside this crate
/// a state changes only through
/// [`ConversationStateManager`](crate::state::ConversationStateManager).
/// Middleware receives `&ConversationState` and can only read it.
///
/// ```compile_fail
/// let mut state = engram_core::ConversationState::new("t1".into());
/// state.apply_clear();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    thread_id: ThreadId,
    history: Vec<Turn>,
    checkpoint_version: u64,
    next_seq: u64,
    pending_clear: bool,
}

impl ConversationState {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            history: Vec::new(),
            checkpoint_version: 0,
            next_seq: 1,
            pending_clear: false,
        }
    }

    /// Rebuilds a state from a checkpoint.
    ///
    /// Turns are re-stamped onto `thread_id` in the given order; turns that
    /// carry no sequence number receive fresh ones.
    pub fn restore(thread_id: ThreadId, history: Vec<Turn>, checkpoint_version: u64) -> Self {
        let mut next_seq = history.iter().map(|t| t.seq).max().unwrap_or(0) + 1;
        let history = history
            .into_iter()
            .map(|mut turn| {
                turn.thread_id = thread_id.clone();
                if turn.seq == 0 {
                    turn.seq = next_seq;
                    next_seq += 1;
                }
                turn
            })
            .collect();
        Self {
            thread_id,
            history,
            checkpoint_version,
            next_seq,
            pending_clear: false,
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Turns in append order.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn checkpoint_version(&self) -> u64 {
        self.checkpoint_version
    }

    pub fn pending_clear(&self) -> bool {
        self.pending_clear
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.history.last()
    }

    /// The last `n` turns in chronological order.
    pub fn window(&self, n: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Stamps and appends a turn, returning the stamped copy.
    ///
    /// Equal timestamps are accepted; only a strictly earlier one is out of order.
    pub(crate) fn apply_append(
        &mut self,
        mut turn: Turn,
        allow_out_of_order: bool,
    ) -> Result<Turn, EngramError> {
        if let Some(last) = self.history.last() {
            if !allow_out_of_order && turn.timestamp < last.timestamp {
                return Err(EngramError::OutOfOrderTurn {
                    thread_id: self.thread_id.to_string(),
                    last: last.timestamp,
                    attempted: turn.timestamp,
                });
            }
        }

        turn.thread_id = self.thread_id.clone();
        turn.seq = self.next_seq;
        self.next_seq += 1;
        self.history.push(turn.clone());
        self.checkpoint_version += 1;
        Ok(turn)
    }

    /// Marks a clear as started.
    pub(crate) fn begin_clear(&mut self) {
        self.pending_clear = true;
    }

    /// Empties the history and bumps the version. Sequence numbers keep counting.
    pub(crate) fn apply_clear(&mut self) -> u64 {
        self.history.clear();
        self.checkpoint_version += 1;
        self.pending_clear = false;
        self.checkpoint_version
    }
}

/// Native message representation of the agent framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

impl ProviderMessage {
    /// A message holding a single text block.
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text("user", text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text("assistant", text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text("system", text)
    }
}

/// A content block inside a [`ProviderMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Image {
        media_type: String,
        data: String,
    },
}

/// The prompt handed to the language model: system prompt plus messages.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentContext {
    pub system_prompt: Option<String>,
    pub messages: Vec<ProviderMessage>,
    /// State version this context was built from.
    pub checkpoint_version: u64,
}

/// Input for an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    pub texts: Vec<String>,
}

/// Output from an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub embeddings: Vec<Vec<f32>>,
    pub dimensions: usize,
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

/// Which family of memory backend an adapter talks to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Vector,
    Graph,
    Hybrid,
    /// Anything else, such as in-process test doubles.
    Custom,
}
