// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared helpers and storage types for the memory backends.

use chrono::{DateTime, Utc};
use engram_core::{Role, ThreadId};

/// Namespace used by every thread when memory is shared.
pub const GLOBAL_NAMESPACE: &str = "global";

/// Namespace that scopes a thread's records.
pub fn namespace_for(thread_id: &ThreadId, shared_memory: bool) -> String {
    if shared_memory {
        GLOBAL_NAMESPACE.to_string()
    } else {
        thread_id.to_string()
    }
}

/// One embedded turn as persisted by a [`VectorStore`](crate::store::VectorStore).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    /// Source turn reference, `turn:<thread>:<seq>`; unique per store.
    pub id: String,
    pub namespace: String,
    pub thread_id: ThreadId,
    pub seq: u64,
    pub role: Role,
    /// Plain text that was embedded.
    pub content: String,
    pub embedding: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}

/// Serialize an f32 vector to little-endian bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a BLOB back to an f32 vector. Trailing partial chunks are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity of two vectors; 0.0 when either is all zeros or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Canonical form of record content used to detect duplicates across backends.
pub fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_to_blob_roundtrip() {
        let original = vec![1.0f32, -2.5, 0.0, 3.25];
        let blob = vec_to_blob(&original);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vec(&blob), original);
    }

    #[test]
    fn cosine_similarity_orthogonal() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_similarity_handles_zero_and_mismatched_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn namespaces() {
        let thread = ThreadId::new("t1");
        assert_eq!(namespace_for(&thread, false), "t1");
        assert_eq!(namespace_for(&thread, true), GLOBAL_NAMESPACE);
    }

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(normalize_content("  My dog\n is   Rex "), "my dog is rex");
    }
}
