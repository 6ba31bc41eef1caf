// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-encoder reranking of vector search candidates.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use engram_core::{EngramError, Reranker};

use crate::onnx::BertSession;

/// MS MARCO cross-encoder scoring each `(query, document)` pair jointly.
///
/// Scores are the sigmoid of the model's relevance logit, in `(0, 1)`.
pub struct OnnxReranker {
    model: BertSession,
}

impl OnnxReranker {
    /// Loads `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EngramError> {
        let model = BertSession::load(model_dir)?;
        debug!(dir = %model_dir.display(), "onnx reranker loaded");
        Ok(Self { model })
    }

    pub fn score(&self, query: &str, document: &str) -> Result<f32, EngramError> {
        let output = self.model.infer((query, document))?;
        // Shape [1, 1].
        let logit = output
            .data
            .first()
            .copied()
            .ok_or_else(|| EngramError::Internal("reranker produced no logits".into()))?;
        Ok(sigmoid(logit))
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[async_trait]
impl Reranker for OnnxReranker {
    fn name(&self) -> &str {
        "onnx-cross-encoder"
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, EngramError> {
        documents
            .iter()
            .map(|doc| self.score(query, doc))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_monotonic_and_centered() {
        assert!((sigmoid(0.0) - 0.5).abs() < f32::EPSILON);
        assert!(sigmoid(4.0) > sigmoid(1.0));
        assert!(sigmoid(-8.0) > 0.0);
        assert!(sigmoid(8.0) < 1.0);
    }

    #[test]
    fn missing_model_files_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OnnxReranker::load(dir.path()).is_err());
    }
}
