// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector backend persistence tests over an on-disk SQLite collection.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use engram_config::EngramConfig;
use engram_core::{MemoryBackend, Role, ThreadId, Turn};
use engram_memory::{ConnectionPool, ModelOverrides, SqliteVectorStore, VectorMemory};
use engram_test_utils::{HashingEmbedder, KeywordReranker};

fn turn(thread: &str, seq: u64, content: &str) -> Turn {
    Turn {
        thread_id: thread.into(),
        seq,
        role: Role::User,
        content: content.into(),
        timestamp: Utc.timestamp_opt(1_700_000_000 + seq as i64, 0).unwrap(),
    }
}

#[tokio::test]
async fn records_survive_reopening_the_collection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    let t1: ThreadId = "t1".into();

    {
        let store = Arc::new(SqliteVectorStore::open(&path).await.unwrap());
        let mem = VectorMemory::new(store.clone(), Arc::new(HashingEmbedder::default()), false);
        mem.write(&t1, &turn("t1", 1, "My dog is named Rex"))
            .await
            .unwrap();
        store.checkpoint().await.unwrap();
    }

    let store = Arc::new(SqliteVectorStore::open(&path).await.unwrap());
    let mem = VectorMemory::new(store, Arc::new(HashingEmbedder::default()), false);
    assert_eq!(mem.count(&t1).await.unwrap(), 1);
    let result = mem
        .query(&t1, &[turn("t1", 2, "What is my dog's name?")], 1)
        .await
        .unwrap();
    assert!(result.records[0].content.contains("Rex"));
}

#[tokio::test]
async fn from_config_uses_pool_collection() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngramConfig::default();
    config.vector.database_path = dir
        .path()
        .join("engram.db")
        .to_string_lossy()
        .into_owned();

    let pool = ConnectionPool::from_config(&config).unwrap();
    pool.initialize().await.unwrap();
    let overrides = ModelOverrides {
        embedder: Some(Arc::new(HashingEmbedder::default())),
        reranker: Some(Arc::new(KeywordReranker)),
    };
    let mem = VectorMemory::from_config(&config, &pool, overrides).await.unwrap();

    let t1: ThreadId = "t1".into();
    mem.write(&t1, &turn("t1", 1, "hello world")).await.unwrap();
    let result = mem
        .query(&t1, &[turn("t1", 2, "hello again")], 3)
        .await
        .unwrap();
    assert!(result.records[0].metadata["rerank_score"].is_number());
    assert_eq!(mem.count(&t1).await.unwrap(), 1);
    mem.clear(&t1).await.unwrap();
    assert_eq!(mem.count(&t1).await.unwrap(), 0);

    pool.shutdown().await.unwrap();
}

/// Over-fetched candidates are cut down to `top_k` after reranking.
#[tokio::test]
async fn rerank_keeps_top_k_of_the_candidates() {
    let store = Arc::new(SqliteVectorStore::open_in_memory().await.unwrap());
    let mem = VectorMemory::new(store, Arc::new(HashingEmbedder::default()), false)
        .with_reranker(Arc::new(KeywordReranker), 20);
    let t1: ThreadId = "t1".into();
    for (seq, text) in [
        "my sister lives in Porto",
        "the sister city of Porto",
        "my favourite food is pasta",
        "I walked my dog today",
    ]
    .iter()
    .enumerate()
    {
        mem.write(&t1, &turn("t1", seq as u64 + 1, text)).await.unwrap();
    }

    let result = mem
        .query(&t1, &[turn("t1", 9, "where does my sister live in Porto")], 2)
        .await
        .unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.records.iter().all(|r| r.content.contains("Porto")));
}
