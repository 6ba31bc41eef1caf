// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid backend: one vector and one graph adapter behind a single interface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use engram_core::{
    BackendKind, EngramError, HealthStatus, MemoryAdapter, MemoryBackend, MemoryRecord,
    RetrievalResult, ThreadId, Turn,
};

use crate::types::normalize_content;

const BACKEND_NAME: &str = "hybrid";

/// RRF constant (standard value from the literature).
const RRF_K: f32 = 60.0;

/// Queries both adapters concurrently and fuses their rankings.
///
/// Writes and clears fan out to both adapters; any failure is surfaced.
pub struct HybridMemory {
    vector: Arc<dyn MemoryBackend>,
    graph: Arc<dyn MemoryBackend>,
}

impl HybridMemory {
    pub fn new(vector: Arc<dyn MemoryBackend>, graph: Arc<dyn MemoryBackend>) -> Self {
        Self { vector, graph }
    }
}

/// Reciprocal Rank Fusion over two ranked record lists.
///
/// Records with identical normalized content are merged: scores are summed
/// and the first occurrence (vector list first) is kept. Ties are broken by
/// newer timestamp, then by record id.
pub fn reciprocal_rank_fusion(
    first: Vec<MemoryRecord>,
    second: Vec<MemoryRecord>,
) -> Vec<(MemoryRecord, f32)> {
    let mut fused: Vec<(MemoryRecord, f32)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for list in [first, second] {
        for (rank, record) in list.into_iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
            let key = normalize_content(&record.content);
            match index.get(&key) {
                Some(&i) => fused[i].1 += contribution,
                None => {
                    index.insert(key, fused.len());
                    fused.push((record, contribution));
                }
            }
        }
    }

    fused.sort_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}

#[async_trait]
impl MemoryAdapter for HybridMemory {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Hybrid
    }

    async fn health_check(&self) -> Result<HealthStatus, EngramError> {
        let (vector, graph) = tokio::join!(self.vector.health_check(), self.graph.health_check());
        let describe = |name: &str, status: Result<HealthStatus, EngramError>| match status {
            Ok(HealthStatus::Healthy) => None,
            Ok(HealthStatus::Degraded(msg)) | Ok(HealthStatus::Unhealthy(msg)) => {
                Some(format!("{name}: {msg}"))
            }
            Err(e) => Some(format!("{name}: {e}")),
        };
        let problems: Vec<String> = [
            describe(self.vector.name(), vector),
            describe(self.graph.name(), graph),
        ]
        .into_iter()
        .flatten()
        .collect();
        Ok(match problems.len() {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Degraded(problems.join("; ")),
            _ => HealthStatus::Unhealthy(problems.join("; ")),
        })
    }

    async fn shutdown(&self) -> Result<(), EngramError> {
        let (vector, graph) = tokio::join!(self.vector.shutdown(), self.graph.shutdown());
        vector?;
        graph
    }
}

#[async_trait]
impl MemoryBackend for HybridMemory {
    async fn query(
        &self,
        thread_id: &ThreadId,
        context: &[Turn],
        top_k: usize,
    ) -> Result<RetrievalResult, EngramError> {
        let started = Instant::now();
        let (vector, graph) = tokio::join!(
            self.vector.query(thread_id, context, top_k),
            self.graph.query(thread_id, context, top_k)
        );

        let (vector_records, graph_records, latency) = match (vector, graph) {
            (Ok(v), Ok(g)) => {
                let latency = v.backend_latency.max(g.backend_latency);
                (v.records, g.records, latency)
            }
            (Ok(v), Err(e)) => {
                warn!(thread_id = %thread_id, backend = self.graph.name(), error = %e, "hybrid query continuing without graph results");
                let latency = v.backend_latency;
                (v.records, Vec::new(), latency)
            }
            (Err(e), Ok(g)) => {
                warn!(thread_id = %thread_id, backend = self.vector.name(), error = %e, "hybrid query continuing without vector results");
                let latency = g.backend_latency;
                (Vec::new(), g.records, latency)
            }
            (Err(vector_err), Err(graph_err)) => {
                warn!(thread_id = %thread_id, error = %graph_err, "graph query failed alongside vector query");
                return Err(vector_err);
            }
        };

        let mut fused = reciprocal_rank_fusion(vector_records, graph_records);
        fused.truncate(top_k);
        debug!(thread_id = %thread_id, hits = fused.len(), "hybrid query fused");
        let latency = latency.max(started.elapsed());
        Ok(RetrievalResult::from_scored(BACKEND_NAME, fused, latency))
    }

    async fn write(&self, thread_id: &ThreadId, turn: &Turn) -> Result<(), EngramError> {
        let (vector, graph) = tokio::join!(
            self.vector.write(thread_id, turn),
            self.graph.write(thread_id, turn)
        );
        vector?;
        graph
    }

    async fn clear(&self, thread_id: &ThreadId) -> Result<(), EngramError> {
        let (vector, graph) = tokio::join!(self.vector.clear(thread_id), self.graph.clear(thread_id));
        vector?;
        graph
    }

    async fn count(&self, thread_id: &ThreadId) -> Result<usize, EngramError> {
        let (vector, graph) = tokio::join!(self.vector.count(thread_id), self.graph.count(thread_id));
        Ok(vector? + graph?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use engram_core::{RecordKind, SourceRef};

    fn record(id: &str, content: &str, secs: i64) -> MemoryRecord {
        MemoryRecord {
            id: id.into(),
            thread_id: "t1".into(),
            source: SourceRef::Graph(id.into()),
            kind: RecordKind::Fact,
            role: None,
            content: content.into(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn rrf_sums_duplicates_and_keeps_first_occurrence() {
        let vector = vec![record("v1", "My dog is Rex", 1), record("v2", "pasta", 2)];
        let graph = vec![record("g1", "my  DOG is rex", 3), record("g2", "lisbon", 4)];
        let fused = reciprocal_rank_fusion(vector, graph);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].0.id, "v1");
        let expected = 2.0 / 61.0;
        assert!((fused[0].1 - expected).abs() < 1e-6);
    }

    #[test]
    fn rrf_ties_prefer_newer_then_id() {
        let vector = vec![record("b", "x", 1)];
        let graph = vec![record("a", "y", 5)];
        let fused = reciprocal_rank_fusion(vector, graph);
        assert_eq!(fused[0].0.id, "a");

        let vector = vec![record("b", "x", 1)];
        let graph = vec![record("a", "y", 1)];
        let fused = reciprocal_rank_fusion(vector, graph);
        assert_eq!(fused[0].0.id, "a");
    }

    #[test]
    fn rrf_empty_inputs() {
        assert!(reciprocal_rank_fusion(Vec::new(), Vec::new()).is_empty());
    }
}
