// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Knowledge-graph service double.
//!
//! Every episode yields one fact whose text is the episode body without its
//! `role:` prefix. Fact search ranks by keyword overlap; entity nodes are
//! only returned when added with [`InMemoryGraph::add_node`].

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use engram_core::EngramError;
use engram_memory::GraphClient;
use engram_memory::mcp::{EpisodeInput, GraphEpisode, GraphFact, GraphNode, MCP_BACKEND};

use crate::keyword_overlap;

#[derive(Default)]
pub struct InMemoryGraph {
    episodes: Mutex<Vec<GraphEpisode>>,
    nodes: Mutex<Vec<GraphNode>>,
    next_id: AtomicU64,
    down: AtomicBool,
    ignore_deletes: AtomicBool,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every call with `BackendUnavailable` while set.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Acknowledges deletes without removing anything.
    pub fn set_ignore_deletes(&self, ignore: bool) {
        self.ignore_deletes.store(ignore, Ordering::SeqCst);
    }

    pub fn add_node(&self, group_id: &str, name: &str, summary: &str) {
        let uuid = self.uuid("node");
        if let Ok(mut nodes) = self.nodes.lock() {
            nodes.push(GraphNode {
                uuid,
                name: name.to_string(),
                labels: vec!["Entity".to_string()],
                summary: Some(summary.to_string()),
                group_id: Some(group_id.to_string()),
                created_at: Some(Utc::now().to_rfc3339()),
            });
        }
    }

    /// Episodes of every group, oldest first.
    pub fn episodes(&self) -> Vec<GraphEpisode> {
        self.episodes.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn uuid(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_up(&self) -> Result<(), EngramError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(EngramError::unavailable(MCP_BACKEND, "connection refused"));
        }
        Ok(())
    }
}

/// Episode body without the `role: ` prefix the graph backend writes.
fn fact_text(body: &str) -> &str {
    body.split_once(": ").map(|(_, rest)| rest).unwrap_or(body)
}

fn poisoned() -> EngramError {
    EngramError::Internal("in-memory graph lock poisoned".into())
}

#[async_trait]
impl GraphClient for InMemoryGraph {
    async fn add_episode(&self, episode: EpisodeInput) -> Result<(), EngramError> {
        self.check_up()?;
        let uuid = self.uuid("episode");
        let mut episodes = self.episodes.lock().map_err(|_| poisoned())?;
        episodes.push(GraphEpisode {
            uuid,
            name: episode.name,
            content: Some(episode.body),
            group_id: Some(episode.group_id),
            source: Some(episode.source),
            source_description: Some(episode.source_description),
            created_at: Some(Utc::now().to_rfc3339()),
        });
        Ok(())
    }

    async fn search_facts(
        &self,
        query: &str,
        group_id: &str,
        max_facts: usize,
    ) -> Result<Vec<GraphFact>, EngramError> {
        self.check_up()?;
        let episodes = self.episodes.lock().map_err(|_| poisoned())?;
        let mut scored: Vec<(usize, GraphFact)> = episodes
            .iter()
            .filter(|e| e.group_id.as_deref() == Some(group_id))
            .filter_map(|e| {
                let text = fact_text(e.content.as_deref().unwrap_or_default());
                let overlap = keyword_overlap(query, text);
                (overlap > 0).then(|| {
                    let fact = GraphFact {
                        uuid: format!("fact-{}", e.uuid),
                        name: "MENTIONS".to_string(),
                        fact: text.to_string(),
                        group_id: e.group_id.clone(),
                        created_at: e.created_at.clone(),
                        valid_at: e.created_at.clone(),
                        invalid_at: None,
                        source_node_uuid: None,
                        target_node_uuid: None,
                        episodes: vec![e.uuid.clone()],
                    };
                    (overlap, fact)
                })
            })
            .collect();
        // Stable sort keeps insertion order among equal overlaps.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(max_facts)
            .map(|(_, fact)| fact)
            .collect())
    }

    async fn search_nodes(
        &self,
        query: &str,
        group_id: &str,
        max_nodes: usize,
    ) -> Result<Vec<GraphNode>, EngramError> {
        self.check_up()?;
        let nodes = self.nodes.lock().map_err(|_| poisoned())?;
        Ok(nodes
            .iter()
            .filter(|n| n.group_id.as_deref() == Some(group_id))
            .filter(|n| {
                let text = format!("{} {}", n.name, n.summary.as_deref().unwrap_or_default());
                keyword_overlap(query, &text) > 0
            })
            .take(max_nodes)
            .cloned()
            .collect())
    }

    async fn get_episodes(
        &self,
        group_id: &str,
        max_episodes: usize,
    ) -> Result<Vec<GraphEpisode>, EngramError> {
        self.check_up()?;
        let episodes = self.episodes.lock().map_err(|_| poisoned())?;
        Ok(episodes
            .iter()
            .rev()
            .filter(|e| e.group_id.as_deref() == Some(group_id))
            .take(max_episodes)
            .cloned()
            .collect())
    }

    async fn delete_episode(&self, uuid: &str) -> Result<(), EngramError> {
        self.check_up()?;
        if self.ignore_deletes.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut episodes = self.episodes.lock().map_err(|_| poisoned())?;
        episodes.retain(|e| e.uuid != uuid);
        Ok(())
    }

    async fn clear_graph(&self, group_id: &str) -> Result<(), EngramError> {
        self.check_up()?;
        if self.ignore_deletes.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.episodes
            .lock()
            .map_err(|_| poisoned())?
            .retain(|e| e.group_id.as_deref() != Some(group_id));
        self.nodes
            .lock()
            .map_err(|_| poisoned())?
            .retain(|n| n.group_id.as_deref() != Some(group_id));
        Ok(())
    }

    async fn ping(&self) -> Result<(), EngramError> {
        self.check_up()
    }
}
