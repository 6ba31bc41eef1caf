// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector-search memory backend.
//!
//! Turns are embedded on write. A query ranks the namespace by cosine
//! similarity; with a reranker configured it over-fetches candidates and
//! keeps the ones the cross-encoder scores highest.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use engram_config::model::{EmbeddingKind, EngramConfig};
use engram_core::{
    BackendKind, EmbeddingAdapter, EmbeddingInput, EngramError, HealthStatus, MemoryAdapter,
    MemoryBackend, MemoryRecord, RecordKind, Reranker, RetrievalResult, SourceRef, ThreadId, Turn,
    TurnRef, turn_text,
};

use crate::embedder::{OnnxEmbedder, OpenAiEmbedder};
use crate::model_manager::{EMBEDDING_MODEL, ModelManager, RERANK_MODEL};
use crate::pool::ConnectionPool;
use crate::rerank::OnnxReranker;
use crate::retry::write_with_retry;
use crate::store::VectorStore;
use crate::types::{StoredVector, cosine_similarity, namespace_for};

const BACKEND_NAME: &str = "vector";

/// Models used instead of the ones the configuration would load.
#[derive(Clone, Default)]
pub struct ModelOverrides {
    pub embedder: Option<Arc<dyn EmbeddingAdapter>>,
    pub reranker: Option<Arc<dyn Reranker>>,
}

/// Embeds turns and ranks them by cosine similarity within a namespace.
pub struct VectorMemory {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingAdapter>,
    reranker: Option<Arc<dyn Reranker>>,
    rerank_candidates: usize,
    shared_memory: bool,
    min_similarity: f32,
}

impl VectorMemory {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingAdapter>,
        shared_memory: bool,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker: None,
            rerank_candidates: 0,
            shared_memory,
            min_similarity: 0.0,
        }
    }

    /// Drops search hits whose similarity is below `threshold`.
    pub fn with_min_similarity(mut self, threshold: f32) -> Self {
        self.min_similarity = threshold;
        self
    }

    /// Reranks the best `candidates` similarity hits before truncating.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>, candidates: usize) -> Self {
        self.reranker = Some(reranker);
        self.rerank_candidates = candidates;
        self
    }

    /// Builds the adapter from configuration, opening the pool's collection.
    ///
    /// Local ONNX models are downloaded on first use unless overridden.
    pub async fn from_config(
        config: &EngramConfig,
        pool: &ConnectionPool,
        overrides: ModelOverrides,
    ) -> Result<Self, EngramError> {
        let models = ModelManager::from_config(config);
        let embedder: Arc<dyn EmbeddingAdapter> = match overrides.embedder {
            Some(embedder) => embedder,
            None => match config.vector.embedding {
                EmbeddingKind::Onnx => {
                    let dir = models.ensure(&EMBEDDING_MODEL).await?;
                    Arc::new(OnnxEmbedder::load(&dir)?)
                }
                EmbeddingKind::OpenAi => Arc::new(OpenAiEmbedder::new(
                    pool.http()?,
                    config.vector.embedding_endpoint.clone(),
                    config.vector.embedding_model.clone(),
                    config.vector.embedding_api_key.clone(),
                    config.vector.embedding_dimensions,
                )),
            },
        };
        let store: Arc<dyn VectorStore> = pool.vector_store().await?;
        let mut memory = Self::new(store, embedder, config.retrieval.shared_memory)
            .with_min_similarity(config.vector.min_similarity as f32);

        if config.vector.rerank {
            let reranker: Arc<dyn Reranker> = match overrides.reranker {
                Some(reranker) => reranker,
                None => {
                    let dir = models.ensure(&RERANK_MODEL).await?;
                    Arc::new(OnnxReranker::load(&dir)?)
                }
            };
            memory = memory.with_reranker(reranker, config.vector.rerank_candidates);
        }
        Ok(memory)
    }

    async fn embed_one(&self, text: String) -> Result<Vec<f32>, EngramError> {
        let output = self
            .embedder
            .embed(EmbeddingInput { texts: vec![text] })
            .await?;
        output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EngramError::Internal("embedder returned no vectors".into()))
    }

    /// Manual similarity search over the thread's namespace.
    ///
    /// Results are ordered by descending score, newer turns first on ties.
    /// The score is the reranker's when one is set, else cosine similarity.
    pub async fn search(
        &self,
        thread_id: &ThreadId,
        text: &str,
        limit: usize,
    ) -> Result<Vec<(MemoryRecord, f32)>, EngramError> {
        if limit == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embed_one(text.to_string()).await?;
        let namespace = namespace_for(thread_id, self.shared_memory);
        let candidates = self.store.scan(&namespace).await?;

        let mut scored: Vec<(StoredVector, f32)> = candidates
            .into_iter()
            .map(|v| {
                let score = cosine_similarity(&query, &v.embedding);
                (v, score)
            })
            .filter(|(_, score)| *score >= self.min_similarity)
            .collect();
        sort_hits(&mut scored);

        let hits: Vec<(MemoryRecord, f32)> = match &self.reranker {
            Some(reranker) if !scored.is_empty() => {
                scored.truncate(self.rerank_candidates.max(limit));
                let documents: Vec<String> = scored.iter().map(|(v, _)| v.content.clone()).collect();
                let scores = reranker.rerank(text, &documents).await?;
                if scores.len() != documents.len() {
                    return Err(EngramError::Internal(format!(
                        "reranker {} returned {} scores for {} documents",
                        reranker.name(),
                        scores.len(),
                        documents.len()
                    )));
                }
                let mut reranked: Vec<(StoredVector, f32, f32)> = scored
                    .into_iter()
                    .zip(scores)
                    .map(|((v, similarity), score)| (v, similarity, score))
                    .collect();
                reranked.sort_by(|(a, _, sa), (b, _, sb)| {
                    sb.total_cmp(sa)
                        .then_with(|| b.timestamp.cmp(&a.timestamp))
                        .then_with(|| b.seq.cmp(&a.seq))
                });
                reranked.truncate(limit);
                reranked
                    .into_iter()
                    .map(|(v, similarity, score)| (to_record(v, similarity, Some(score)), score))
                    .collect()
            }
            _ => {
                scored.truncate(limit);
                scored
                    .into_iter()
                    .map(|(v, similarity)| (to_record(v, similarity, None), similarity))
                    .collect()
            }
        };

        debug!(
            thread_id = %thread_id,
            namespace = %namespace,
            hits = hits.len(),
            reranked = self.reranker.is_some(),
            "vector search complete"
        );
        Ok(hits)
    }

    async fn persist(&self, namespace: &str, turn: &Turn) -> Result<(), EngramError> {
        let content = turn_text(turn);
        let embedding = self.embed_one(content.clone()).await?;
        let vector = StoredVector {
            id: turn.turn_ref().to_string(),
            namespace: namespace.to_string(),
            thread_id: turn.thread_id.clone(),
            seq: turn.seq,
            role: turn.role,
            content,
            embedding,
            timestamp: turn.timestamp,
        };
        self.store.insert(&vector).await
    }

    fn clear_error(thread_id: &ThreadId, reason: impl Into<String>) -> EngramError {
        EngramError::ClearNotConfirmed {
            backend: BACKEND_NAME.to_string(),
            thread_id: thread_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Descending similarity, newer turns first on ties.
fn sort_hits(hits: &mut [(StoredVector, f32)]) {
    hits.sort_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| b.seq.cmp(&a.seq))
    });
}

fn to_record(vector: StoredVector, similarity: f32, rerank_score: Option<f32>) -> MemoryRecord {
    MemoryRecord {
        id: vector.id,
        source: SourceRef::Turn(TurnRef {
            thread_id: vector.thread_id.clone(),
            seq: vector.seq,
        }),
        thread_id: vector.thread_id,
        kind: RecordKind::Turn,
        role: Some(vector.role),
        content: vector.content,
        timestamp: vector.timestamp,
        metadata: serde_json::json!({
            "namespace": vector.namespace,
            "similarity": similarity,
            "rerank_score": rerank_score,
        }),
    }
}

#[async_trait]
impl MemoryAdapter for VectorMemory {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Vector
    }

    async fn health_check(&self) -> Result<HealthStatus, EngramError> {
        match self.store.ping().await {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), EngramError> {
        Ok(())
    }
}

#[async_trait]
impl MemoryBackend for VectorMemory {
    async fn query(
        &self,
        thread_id: &ThreadId,
        context: &[Turn],
        top_k: usize,
    ) -> Result<RetrievalResult, EngramError> {
        let started = Instant::now();
        let text = context
            .iter()
            .map(turn_text)
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let hits = self.search(thread_id, &text, top_k).await?;
        Ok(RetrievalResult::from_scored(
            BACKEND_NAME,
            hits,
            started.elapsed(),
        ))
    }

    async fn write(&self, thread_id: &ThreadId, turn: &Turn) -> Result<(), EngramError> {
        let namespace = namespace_for(thread_id, self.shared_memory);
        let ns = namespace.as_str();
        let this = self;
        write_with_retry(BACKEND_NAME, thread_id, move || this.persist(ns, turn)).await?;
        debug!(thread_id = %thread_id, seq = turn.seq, "turn embedded");
        Ok(())
    }

    async fn clear(&self, thread_id: &ThreadId) -> Result<(), EngramError> {
        let namespace = namespace_for(thread_id, self.shared_memory);
        let removed = self
            .store
            .delete(&namespace, thread_id)
            .await
            .map_err(|e| Self::clear_error(thread_id, e.to_string()))?;
        let remaining = self
            .store
            .count(&namespace, thread_id)
            .await
            .map_err(|e| Self::clear_error(thread_id, e.to_string()))?;
        if remaining > 0 {
            return Err(Self::clear_error(
                thread_id,
                format!("{remaining} records remain after delete"),
            ));
        }
        debug!(thread_id = %thread_id, removed, "vector memory cleared");
        Ok(())
    }

    async fn count(&self, thread_id: &ThreadId) -> Result<usize, EngramError> {
        let namespace = namespace_for(thread_id, self.shared_memory);
        self.store.count(&namespace, thread_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteVectorStore;
    use chrono::{TimeZone, Utc};
    use engram_core::Role;
    use engram_test_utils::{HashingEmbedder, KeywordReranker};

    async fn memory(shared: bool) -> VectorMemory {
        let store = Arc::new(SqliteVectorStore::open_in_memory().await.unwrap());
        VectorMemory::new(store, Arc::new(HashingEmbedder::default()), shared)
    }

    /// Scores documents by position, preferring the last candidate.
    struct ReverseReranker;

    #[async_trait]
    impl Reranker for ReverseReranker {
        fn name(&self) -> &str {
            "reverse"
        }

        async fn rerank(&self, _: &str, documents: &[String]) -> Result<Vec<f32>, EngramError> {
            Ok((0..documents.len()).map(|i| i as f32).collect())
        }
    }

    fn turn(thread: &str, seq: u64, role: Role, content: &str) -> Turn {
        Turn {
            thread_id: thread.into(),
            seq,
            role,
            content: content.into(),
            timestamp: Utc.timestamp_opt(1_700_000_000 + seq as i64, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn query_finds_related_turn() {
        let mem = memory(false).await;
        let t1: ThreadId = "t1".into();
        mem.write(&t1, &turn("t1", 1, Role::User, "My dog is named Rex"))
            .await
            .unwrap();
        mem.write(&t1, &turn("t1", 2, Role::User, "I had pasta for lunch"))
            .await
            .unwrap();

        let result = mem
            .query(&t1, &[turn("t1", 3, Role::User, "What is my dog's name?")], 1)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.records[0].content.contains("Rex"));
        assert_eq!(result.records[0].source.to_string(), "turn:t1:1");
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn threads_are_isolated_without_shared_memory() {
        let mem = memory(false).await;
        mem.write(&"a".into(), &turn("a", 1, Role::User, "alpha secret"))
            .await
            .unwrap();
        let result = mem
            .query(&"b".into(), &[turn("b", 1, Role::User, "alpha secret")], 5)
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn shared_memory_sees_other_threads_but_clears_per_thread() {
        let mem = memory(true).await;
        mem.write(&"a".into(), &turn("a", 1, Role::User, "alpha secret"))
            .await
            .unwrap();
        mem.write(&"b".into(), &turn("b", 1, Role::User, "beta secret"))
            .await
            .unwrap();
        let result = mem
            .query(&"b".into(), &[turn("b", 2, Role::User, "alpha")], 5)
            .await
            .unwrap();
        assert!(result.records.iter().any(|r| r.thread_id.as_str() == "a"));

        mem.clear(&"a".into()).await.unwrap();
        assert_eq!(mem.count(&"a".into()).await.unwrap(), 0);
        assert_eq!(mem.count(&"b".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ties_prefer_newer_turns() {
        let mem = memory(false).await;
        let t1: ThreadId = "t1".into();
        mem.write(&t1, &turn("t1", 1, Role::User, "same words"))
            .await
            .unwrap();
        mem.write(&t1, &turn("t1", 2, Role::User, "same words"))
            .await
            .unwrap();
        let hits = mem.search(&t1, "same words", 2).await.unwrap();
        assert_eq!(hits[0].0.id, "turn:t1:2");
        assert_eq!(hits[1].0.id, "turn:t1:1");
    }

    #[tokio::test]
    async fn min_similarity_filters_weak_hits() {
        let mem = memory(false).await.with_min_similarity(0.99);
        let t1: ThreadId = "t1".into();
        mem.write(&t1, &turn("t1", 1, Role::User, "My dog is named Rex"))
            .await
            .unwrap();
        let hits = mem.search(&t1, "dog", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn reranker_reorders_the_over_fetched_candidates() {
        let mem = memory(false)
            .await
            .with_reranker(Arc::new(ReverseReranker), 3);
        let t1: ThreadId = "t1".into();
        mem.write(&t1, &turn("t1", 1, Role::User, "dog dog dog"))
            .await
            .unwrap();
        mem.write(&t1, &turn("t1", 2, Role::User, "dog cat"))
            .await
            .unwrap();
        mem.write(&t1, &turn("t1", 3, Role::User, "lunch was pasta"))
            .await
            .unwrap();

        // Three candidates go to the reranker; the one it likes best is the
        // weakest cosine match.
        let hits = mem.search(&t1, "dog", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.content, "lunch was pasta");
        assert_eq!(hits[0].1, 2.0);
        assert_eq!(hits[0].0.metadata["rerank_score"], 2.0);
    }

    #[tokio::test]
    async fn rerank_candidates_bound_what_the_reranker_sees() {
        let mem = memory(false)
            .await
            .with_reranker(Arc::new(KeywordReranker), 1);
        let t1: ThreadId = "t1".into();
        mem.write(&t1, &turn("t1", 1, Role::User, "my sister lives in Porto"))
            .await
            .unwrap();
        mem.write(&t1, &turn("t1", 2, Role::User, "my sister my sister"))
            .await
            .unwrap();

        let hits = mem.search(&t1, "where does my sister live", 5).await.unwrap();
        // Candidates are at least `limit`, so both reach the reranker.
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(r, _)| r.metadata["rerank_score"].is_number()));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let mem = memory(false).await;
        let t1: ThreadId = "t1".into();
        mem.write(&t1, &turn("t1", 1, Role::User, "hello"))
            .await
            .unwrap();
        mem.clear(&t1).await.unwrap();
        mem.clear(&t1).await.unwrap();
        assert_eq!(mem.count(&t1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_context_returns_empty_result() {
        let mem = memory(false).await;
        let result = mem.query(&"t1".into(), &[], 5).await.unwrap();
        assert!(result.is_empty());
        assert!(!result.degraded);
    }
}
