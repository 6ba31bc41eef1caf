// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ONNX Runtime session plus tokenizer for BERT-style models.
//!
//! Shared by the local embedder and the cross-encoder reranker. All inference
//! runs on CPU with a single intra-op thread.

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array2;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;
use tokenizers::{EncodeInput, Tokenizer, TruncationParams};

use engram_core::EngramError;

/// Longest token sequence the bundled models accept.
const MAX_TOKENS: usize = 512;

/// Raw output of one forward pass: the first output's shape and values.
pub(crate) struct ModelOutput {
    pub(crate) shape: Vec<usize>,
    pub(crate) data: Vec<f32>,
    pub(crate) attention_mask: Vec<i64>,
}

pub(crate) struct BertSession {
    /// Running a session needs `&mut`; one inference at a time.
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl BertSession {
    /// Loads `model.onnx` and `tokenizer.json` from `model_dir`.
    pub(crate) fn load(model_dir: &Path) -> Result<Self, EngramError> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            EngramError::Internal(format!(
                "failed to load tokenizer from {}: {e}",
                tokenizer_path.display()
            ))
        })?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| EngramError::Internal(format!("failed to configure truncation: {e}")))?;
        tokenizer.with_padding(None);

        let model_path = model_dir.join("model.onnx");
        let session = Session::builder()
            .map_err(|e| EngramError::Internal(format!("failed to create ONNX session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EngramError::Internal(format!("failed to set optimization level: {e}")))?
            .with_intra_threads(1)
            .map_err(|e| EngramError::Internal(format!("failed to set thread count: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| {
                EngramError::Internal(format!(
                    "failed to load ONNX model from {}: {e}",
                    model_path.display()
                ))
            })?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    /// Tokenizes `input` (a text or a text pair) and runs the model.
    pub(crate) fn infer<'s>(
        &self,
        input: impl Into<EncodeInput<'s>>,
    ) -> Result<ModelOutput, EngramError> {
        let encoding = self
            .tokenizer
            .encode(input, true)
            .map_err(|e| EngramError::Internal(format!("tokenization failed: {e}")))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();
        let seq_len = input_ids.len();

        let input_ids = tensor(input_ids, seq_len, "input_ids")?;
        let mask = tensor(attention_mask.clone(), seq_len, "attention_mask")?;
        let token_type_ids = tensor(token_type_ids, seq_len, "token_type_ids")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EngramError::Internal(format!("failed to lock ONNX session: {e}")))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => view(&input_ids, "input_ids")?,
                "attention_mask" => view(&mask, "attention_mask")?,
                "token_type_ids" => view(&token_type_ids, "token_type_ids")?
            ])
            .map_err(|e| EngramError::Internal(format!("ONNX inference failed: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngramError::Internal(format!("failed to extract output tensor: {e}")))?;

        Ok(ModelOutput {
            shape: shape.iter().map(|&d| d.max(0) as usize).collect(),
            data: data.to_vec(),
            attention_mask,
        })
    }
}

fn tensor(values: Vec<i64>, seq_len: usize, name: &str) -> Result<Array2<i64>, EngramError> {
    Array2::from_shape_vec((1, seq_len), values)
        .map_err(|e| EngramError::Internal(format!("failed to create {name} tensor: {e}")))
}

fn view<'a>(array: &'a Array2<i64>, name: &str) -> Result<TensorRef<'a, i64>, EngramError> {
    TensorRef::from_array_view(array)
        .map_err(|e| EngramError::Internal(format!("failed to create {name} TensorRef: {e}")))
}
