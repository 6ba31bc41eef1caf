// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Knowledge-graph memory backend.
//!
//! Every turn becomes one episode named after its [`TurnRef`]; the graph
//! service extracts entities and relationships from it. Retrieval blends the
//! service's own relevance ranking with recency.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use engram_config::model::EngramConfig;
use engram_core::{
    BackendKind, EngramError, HealthStatus, MemoryAdapter, MemoryBackend, MemoryRecord,
    RecordKind, RetrievalResult, Role, SourceRef, ThreadId, Turn, TurnRef, turn_text,
};

use crate::mcp::{EpisodeInput, GraphClient, GraphEpisode, GraphFact, GraphNode, McpGraphClient};
use crate::pool::ConnectionPool;
use crate::retry::write_with_retry;
use crate::types::namespace_for;

const BACKEND_NAME: &str = "graph";

/// Episodes requested by the first page of a group scan.
pub const EPISODE_PAGE: usize = 1000;

/// Largest window a group scan asks for before giving up as truncated.
pub const EPISODE_SCAN_CAP: usize = 256_000;

/// Episodes of a group, and whether the service returned all of them.
struct EpisodeScan {
    episodes: Vec<GraphEpisode>,
    complete: bool,
}

/// Memory backend over a temporal knowledge graph.
pub struct GraphMemory {
    client: Arc<dyn GraphClient>,
    shared_memory: bool,
    max_facts: usize,
    max_nodes: usize,
    relevance_weight: f32,
}

impl GraphMemory {
    pub fn new(client: Arc<dyn GraphClient>, shared_memory: bool) -> Self {
        Self {
            client,
            shared_memory,
            max_facts: 10,
            max_nodes: 10,
            relevance_weight: 0.7,
        }
    }

    pub fn with_limits(mut self, max_facts: usize, max_nodes: usize) -> Self {
        self.max_facts = max_facts;
        self.max_nodes = max_nodes;
        self
    }

    /// Weight of service relevance against recency, clamped to `[0, 1]`.
    pub fn with_relevance_weight(mut self, weight: f32) -> Self {
        self.relevance_weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn from_config(config: &EngramConfig, pool: &ConnectionPool) -> Result<Self, EngramError> {
        let client = McpGraphClient::new(pool.http()?, config.graph.mcp_url.clone());
        Ok(Self::new(Arc::new(client), config.retrieval.shared_memory)
            .with_limits(config.graph.max_facts, config.graph.max_nodes)
            .with_relevance_weight(config.graph.relevance_weight as f32))
    }

    /// Searches facts and entity nodes for `text` in the thread's group.
    pub async fn search(
        &self,
        thread_id: &ThreadId,
        text: &str,
        limit: usize,
    ) -> Result<Vec<(MemoryRecord, f32)>, EngramError> {
        if limit == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let group = namespace_for(thread_id, self.shared_memory);

        let facts_fut = async {
            if self.max_facts == 0 {
                return Ok(Vec::new());
            }
            self.client.search_facts(text, &group, self.max_facts).await
        };
        let nodes_fut = async {
            if self.max_nodes == 0 {
                return Ok(Vec::new());
            }
            self.client.search_nodes(text, &group, self.max_nodes).await
        };
        let (facts, nodes): (Result<Vec<GraphFact>, EngramError>, Result<Vec<GraphNode>, EngramError>) =
            tokio::join!(facts_fut, nodes_fut);

        // Ungrouped items cannot be attributed to a thread outside shared memory.
        let shared = self.shared_memory;
        let in_group = |g: &Option<String>| match g.as_deref() {
            Some(g) => g == group,
            None => shared,
        };
        let facts: Vec<GraphFact> = facts?
            .into_iter()
            .filter(|f| in_group(&f.group_id) && f.invalid_at.is_none())
            .collect();
        let nodes: Vec<GraphNode> = nodes?
            .into_iter()
            .filter(|n| in_group(&n.group_id))
            .collect();

        let mut candidates: Vec<(MemoryRecord, f32)> = Vec::with_capacity(facts.len() + nodes.len());
        let fact_count = facts.len();
        for (rank, fact) in facts.into_iter().enumerate() {
            candidates.push((fact_record(thread_id, fact), rank_relevance(rank, fact_count)));
        }
        let node_count = nodes.len();
        for (rank, node) in nodes.into_iter().enumerate() {
            candidates.push((node_record(thread_id, node), rank_relevance(rank, node_count)));
        }

        let mut scored = blend_with_recency(candidates, self.relevance_weight);
        scored.truncate(limit);
        debug!(thread_id = %thread_id, group = %group, hits = scored.len(), "graph search complete");
        Ok(scored)
    }

    /// Episodes of the group that were written for `thread_id`.
    ///
    /// The service only returns the newest `max_episodes`, so the window
    /// doubles until a page comes back short.
    async fn thread_episodes(
        &self,
        thread_id: &ThreadId,
        group: &str,
    ) -> Result<EpisodeScan, EngramError> {
        let mut window = EPISODE_PAGE;
        let (episodes, complete) = loop {
            let page = self.client.get_episodes(group, window).await?;
            if page.len() < window {
                break (page, true);
            }
            if window >= EPISODE_SCAN_CAP {
                warn!(group = %group, window, "episode scan truncated");
                break (page, false);
            }
            window = (window * 2).min(EPISODE_SCAN_CAP);
        };
        if !self.shared_memory {
            return Ok(EpisodeScan { episodes, complete });
        }
        Ok(EpisodeScan {
            episodes: episodes
                .into_iter()
                .filter(|e| belongs_to(e, thread_id))
                .collect(),
            complete,
        })
    }

    async fn persist(&self, group: &str, turn: &Turn) -> Result<(), EngramError> {
        let episode = EpisodeInput {
            name: turn.turn_ref().to_string(),
            body: format!("{}: {}", turn.role, turn_text(turn)),
            group_id: group.to_string(),
            source: "message".to_string(),
            source_description: format!("conversation {}", turn.thread_id),
        };
        self.client.add_episode(episode).await
    }

    /// Deletes the thread's episodes and rescans for what is left.
    async fn purge(&self, thread_id: &ThreadId, group: &str) -> Result<EpisodeScan, EngramError> {
        if !self.shared_memory {
            self.client.clear_graph(group).await?;
        } else {
            for episode in self.thread_episodes(thread_id, group).await?.episodes {
                self.client.delete_episode(&episode.uuid).await?;
            }
        }
        self.thread_episodes(thread_id, group).await
    }
}

fn belongs_to(episode: &GraphEpisode, thread_id: &ThreadId) -> bool {
    episode
        .name
        .parse::<TurnRef>()
        .is_ok_and(|r| &r.thread_id == thread_id)
}

/// Service rank normalized to (0, 1]; the top item scores 1.
fn rank_relevance(rank: usize, count: usize) -> f32 {
    if count == 0 {
        return 0.0;
    }
    (count - rank) as f32 / count as f32
}

/// Scores candidates with `w·relevance + (1−w)·recency` and sorts them.
///
/// Recency is the created-at rank across all candidates normalized to
/// `[0, 1]`, newest = 1. Ties keep newer items first, then input order.
fn blend_with_recency(candidates: Vec<(MemoryRecord, f32)>, weight: f32) -> Vec<(MemoryRecord, f32)> {
    let m = candidates.len();
    let mut by_age: Vec<usize> = (0..m).collect();
    by_age.sort_by(|&a, &b| candidates[a].0.timestamp.cmp(&candidates[b].0.timestamp));
    let mut recency = vec![1.0f32; m];
    if m > 1 {
        for (position, &index) in by_age.iter().enumerate() {
            recency[index] = position as f32 / (m - 1) as f32;
        }
    }

    let mut scored: Vec<(MemoryRecord, f32)> = candidates
        .into_iter()
        .zip(recency)
        .map(|((record, relevance), recency)| {
            let score = weight * relevance + (1.0 - weight) * recency;
            (record, score)
        })
        .collect();
    scored.sort_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then_with(|| b.timestamp.cmp(&a.timestamp)));
    scored
}

/// Lenient timestamp parsing: RFC 3339, or naive ISO 8601 taken as UTC.
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn fact_record(thread_id: &ThreadId, fact: GraphFact) -> MemoryRecord {
    let timestamp = parse_timestamp(fact.created_at.as_deref())
        .or_else(|| parse_timestamp(fact.valid_at.as_deref()))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    MemoryRecord {
        id: fact.uuid.clone(),
        thread_id: thread_id.clone(),
        source: SourceRef::Graph(fact.uuid),
        kind: RecordKind::Fact,
        role: None,
        content: fact.fact,
        timestamp,
        metadata: serde_json::json!({
            "name": fact.name,
            "group_id": fact.group_id,
            "valid_at": fact.valid_at,
            "episodes": fact.episodes,
        }),
    }
}

fn node_record(thread_id: &ThreadId, node: GraphNode) -> MemoryRecord {
    let timestamp = parse_timestamp(node.created_at.as_deref()).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let content = match node.summary.as_deref().map(str::trim) {
        Some(summary) if !summary.is_empty() => format!("{}: {summary}", node.name),
        _ => node.name.clone(),
    };
    MemoryRecord {
        id: node.uuid.clone(),
        thread_id: thread_id.clone(),
        source: SourceRef::Graph(node.uuid),
        kind: RecordKind::Entity,
        role: None,
        content,
        timestamp,
        metadata: serde_json::json!({
            "name": node.name,
            "labels": node.labels,
            "group_id": node.group_id,
        }),
    }
}

/// Text the graph is searched with: the latest user turn, else the whole window.
fn query_text(context: &[Turn]) -> String {
    if let Some(turn) = context.iter().rev().find(|t| t.role == Role::User) {
        let text = turn_text(turn);
        if !text.trim().is_empty() {
            return text;
        }
    }
    context
        .iter()
        .map(turn_text)
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl MemoryAdapter for GraphMemory {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    async fn health_check(&self) -> Result<HealthStatus, EngramError> {
        match self.client.ping().await {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), EngramError> {
        Ok(())
    }
}

#[async_trait]
impl MemoryBackend for GraphMemory {
    async fn query(
        &self,
        thread_id: &ThreadId,
        context: &[Turn],
        top_k: usize,
    ) -> Result<RetrievalResult, EngramError> {
        let started = Instant::now();
        let text = query_text(context);
        let hits = self.search(thread_id, &text, top_k).await?;
        Ok(RetrievalResult::from_scored(BACKEND_NAME, hits, started.elapsed()))
    }

    async fn write(&self, thread_id: &ThreadId, turn: &Turn) -> Result<(), EngramError> {
        let group = namespace_for(thread_id, self.shared_memory);
        let group = group.as_str();
        let this = self;
        write_with_retry(BACKEND_NAME, thread_id, move || this.persist(group, turn)).await?;
        debug!(thread_id = %thread_id, seq = turn.seq, "episode added");
        Ok(())
    }

    async fn clear(&self, thread_id: &ThreadId) -> Result<(), EngramError> {
        let group = namespace_for(thread_id, self.shared_memory);
        let not_confirmed = |reason: String| EngramError::ClearNotConfirmed {
            backend: BACKEND_NAME.to_string(),
            thread_id: thread_id.to_string(),
            reason,
        };
        let remaining = self
            .purge(thread_id, &group)
            .await
            .map_err(|e| not_confirmed(e.to_string()))?;
        if !remaining.episodes.is_empty() {
            return Err(not_confirmed(format!(
                "{} episodes remain after clear",
                remaining.episodes.len()
            )));
        }
        if !remaining.complete {
            return Err(not_confirmed(format!(
                "group {group} holds more than {EPISODE_SCAN_CAP} episodes"
            )));
        }
        debug!(thread_id = %thread_id, group = %group, "graph memory cleared");
        Ok(())
    }

    async fn count(&self, thread_id: &ThreadId) -> Result<usize, EngramError> {
        let group = namespace_for(thread_id, self.shared_memory);
        Ok(self.thread_episodes(thread_id, &group).await?.episodes.len())
    }
}
