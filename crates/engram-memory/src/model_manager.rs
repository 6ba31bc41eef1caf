// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! First-run download of the local ONNX models.
//!
//! Each model lives in its own directory holding `model.onnx` and
//! `tokenizer.json`. Files are fetched from HuggingFace once and reused.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::info;

use engram_config::model::EngramConfig;
use engram_core::EngramError;

/// Download locations of one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub model_url: &'static str,
    pub tokenizer_url: &'static str,
}

/// Sentence embedder, INT8 quantized, 384 dimensions.
pub const EMBEDDING_MODEL: ModelSpec = ModelSpec {
    name: "all-MiniLM-L6-v2",
    model_url: "https://huggingface.co/onnx-community/all-MiniLM-L6-v2-ONNX/resolve/main/onnx/model_quantized.onnx",
    tokenizer_url: "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json",
};

/// MS MARCO cross-encoder, INT8 quantized, one relevance logit per pair.
pub const RERANK_MODEL: ModelSpec = ModelSpec {
    name: "ms-marco-MiniLM-L-6-v2",
    model_url: "https://huggingface.co/Xenova/ms-marco-MiniLM-L-6-v2/resolve/main/onnx/model_quantized.onnx",
    tokenizer_url: "https://huggingface.co/Xenova/ms-marco-MiniLM-L-6-v2/resolve/main/tokenizer.json",
};

/// Resolves and downloads model files under a cache directory.
pub struct ModelManager {
    root: PathBuf,
    /// Serializes downloads so concurrent callers fetch each file once.
    download: Mutex<()>,
}

impl ModelManager {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            download: Mutex::new(()),
        }
    }

    /// `vector.model_dir`, else a `models` directory next to the collection.
    pub fn from_config(config: &EngramConfig) -> Self {
        let root = match &config.vector.model_dir {
            Some(dir) => PathBuf::from(dir),
            None => Path::new(&config.vector.database_path)
                .parent()
                .map(|p| p.join("models"))
                .unwrap_or_else(|| PathBuf::from("models")),
        };
        Self::new(root)
    }

    pub fn model_dir(&self, model: &ModelSpec) -> PathBuf {
        self.root.join(model.name)
    }

    pub fn is_available(&self, model: &ModelSpec) -> bool {
        let dir = self.model_dir(model);
        dir.join("model.onnx").exists() && dir.join("tokenizer.json").exists()
    }

    /// Returns the model directory, downloading missing files first.
    pub async fn ensure(&self, model: &ModelSpec) -> Result<PathBuf, EngramError> {
        let dir = self.model_dir(model);
        if self.is_available(model) {
            return Ok(dir);
        }
        let _guard = self.download.lock().await;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngramError::Storage { source: e.into() })?;

        for (filename, url) in [("model.onnx", model.model_url), ("tokenizer.json", model.tokenizer_url)] {
            let dest = dir.join(filename);
            if dest.exists() {
                continue;
            }
            info!(model = model.name, file = filename, "downloading model file");
            let size = download_file(url, &dest).await?;
            info!(model = model.name, file = filename, bytes = size, "model file downloaded");
        }

        info!(model = model.name, dir = %dir.display(), "model ready");
        Ok(dir)
    }
}

/// Downloads `url` to `dest` through a temporary file renamed on success.
async fn download_file(url: &str, dest: &Path) -> Result<usize, EngramError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| EngramError::unavailable("model-download", e))?;
    if !response.status().is_success() {
        return Err(EngramError::unavailable(
            "model-download",
            format!("download failed with status {}: {url}", response.status()),
        ));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| EngramError::unavailable("model-download", e))?;

    let partial = dest.with_extension("part");
    let written = async {
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, dest).await
    }
    .await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(EngramError::Storage { source: e.into() });
    }
    Ok(bytes.len())
}
