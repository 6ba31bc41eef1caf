// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding adapters for the vector backend.
//!
//! [`OnnxEmbedder`] runs all-MiniLM-L6-v2 locally with zero external API
//! calls. [`OpenAiEmbedder`] calls an OpenAI-compatible `/embeddings`
//! endpoint.

use std::path::Path;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use engram_core::{EmbeddingAdapter, EmbeddingInput, EmbeddingOutput, EngramError};

use crate::onnx::BertSession;

/// Embedding width of all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Local sentence embedder: mean-pooled, L2-normalized MiniLM output.
pub struct OnnxEmbedder {
    model: BertSession,
}

impl OnnxEmbedder {
    /// Loads `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EngramError> {
        let model = BertSession::load(model_dir)?;
        debug!(dir = %model_dir.display(), "onnx embedder loaded");
        Ok(Self { model })
    }

    /// Embed a single text string, returning a 384-dim vector.
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>, EngramError> {
        let output = self.model.infer(text)?;
        // Shape [1, seq_len, hidden].
        let hidden_size = output.shape.last().copied().unwrap_or(0);
        if hidden_size != EMBEDDING_DIM {
            return Err(EngramError::Internal(format!(
                "embedding model produced width {hidden_size}, expected {EMBEDDING_DIM}"
            )));
        }
        let seq_len = output.attention_mask.len();
        let pooled = mean_pool_with_attention(&output.data, &output.attention_mask, seq_len, hidden_size);
        Ok(l2_normalize(&pooled))
    }
}

/// Averages token embeddings over positions whose attention mask is set.
fn mean_pool_with_attention(
    embeddings: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_size];
    let mut count = 0.0f32;
    for (i, _) in attention_mask.iter().enumerate().take(seq_len).filter(|(_, m)| **m > 0) {
        let token = &embeddings[i * hidden_size..(i + 1) * hidden_size];
        for (acc, value) in sum.iter_mut().zip(token) {
            *acc += value;
        }
        count += 1.0;
    }
    if count > 0.0 {
        for value in &mut sum {
            *value /= count;
        }
    }
    sum
}

fn l2_normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}

#[async_trait]
impl EmbeddingAdapter for OnnxEmbedder {
    fn name(&self) -> &str {
        "onnx-embedder"
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, EngramError> {
        let mut embeddings = Vec::with_capacity(input.texts.len());
        for text in &input.texts {
            embeddings.push(self.embed_text(text)?);
        }
        Ok(EmbeddingOutput {
            embeddings,
            dimensions: EMBEDDING_DIM,
        })
    }
}

const EMBEDDER_NAME: &str = "openai-embeddings";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedder backed by an OpenAI-compatible embeddings API.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    dimensions: usize,
}

impl OpenAiEmbedder {
    /// Creates an embedder that posts to `{endpoint}/embeddings`.
    ///
    /// When `api_key` is `None` the `OPENAI_API_KEY` environment variable is
    /// consulted; requests are sent unauthenticated if neither is set.
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .map(SecretString::from);
        Self {
            client,
            base_url: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            dimensions,
        }
    }

    /// Overrides the base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmbeddingAdapter for OpenAiEmbedder {
    fn name(&self) -> &str {
        EMBEDDER_NAME
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, EngramError> {
        if input.texts.is_empty() {
            return Ok(EmbeddingOutput {
                embeddings: Vec::new(),
                dimensions: self.dimensions,
            });
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: &input.texts,
            dimensions: self.dimensions,
        };
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngramError::unavailable(EMBEDDER_NAME, e))?;
        let status = response.status();
        debug!(status = %status, texts = input.texts.len(), "embedding response received");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngramError::unavailable(
                EMBEDDER_NAME,
                format!("API returned {status}: {body}"),
            ));
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| EngramError::Provider {
                message: format!("failed to parse embedding response: {e}"),
                source: Some(Box::new(e)),
            })?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        if data.len() != input.texts.len() {
            return Err(EngramError::Provider {
                message: format!(
                    "expected {} embeddings, got {}",
                    input.texts.len(),
                    data.len()
                ),
                source: None,
            });
        }
        if let Some(bad) = data.iter().find(|d| d.embedding.len() != self.dimensions) {
            return Err(EngramError::Provider {
                message: format!(
                    "embedding width {} does not match configured {}",
                    bad.embedding.len(),
                    self.dimensions
                ),
                source: None,
            });
        }

        Ok(EmbeddingOutput {
            embeddings: data.into_iter().map(|d| d.embedding).collect(),
            dimensions: self.dimensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn l2_normalize_general_vector() {
        let n = l2_normalize(&[3.0, 4.0]);
        assert!((n[0] - 0.6).abs() < 0.001);
        assert!((n[1] - 0.8).abs() < 0.001);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn mean_pool_skips_masked_tokens() {
        // 3 tokens, hidden size 2, last one is padding.
        let embeddings = vec![1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
        let pooled = mean_pool_with_attention(&embeddings, &[1, 1, 0], 3, 2);
        assert_eq!(pooled, vec![2.0, 3.0]);
    }

    #[test]
    fn mean_pool_of_fully_masked_input_is_zero() {
        let pooled = mean_pool_with_attention(&[5.0, 5.0], &[0], 1, 2);
        assert_eq!(pooled, vec![0.0, 0.0]);
    }

    #[test]
    fn missing_model_files_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            OnnxEmbedder::load(dir.path()),
            Err(EngramError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn openai_embedder_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(
            reqwest::Client::new(),
            "http://unused",
            "text-embedding-3-small",
            Some("sk-test".into()),
            2,
        )
        .with_base_url(server.uri());
        let out = embedder
            .embed(EmbeddingInput {
                texts: vec!["a".into(), "b".into()],
            })
            .await
            .unwrap();
        assert_eq!(out.embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn openai_embedder_maps_server_errors_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(
            reqwest::Client::new(),
            server.uri(),
            "m",
            Some("k".into()),
            2,
        );
        let err = embedder
            .embed(EmbeddingInput {
                texts: vec!["a".into()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn openai_embedder_rejects_wrong_width() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(reqwest::Client::new(), server.uri(), "m", Some("k".into()), 2);
        let err = embedder
            .embed(EmbeddingInput {
                texts: vec!["a".into()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::Provider { .. }));
    }
}
