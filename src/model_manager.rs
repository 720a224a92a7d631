use std::sync::{Mutex, PoisonError};

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;
use tracing::{debug, info};

use crate::{
    embedding::{Dimension, Embedder, Embedding},
    error::EmbeddingError,
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "DOCSIFT_MODEL";

/// Output dimension of the ColBERT projection head.
pub const COLBERT_DIMENSION: usize = 128;

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Resolve the model to use, in order of priority:
/// 1. An explicit model ID (from --model)
/// 2. The DOCSIFT_MODEL environment variable
/// 3. The model recorded in the index settings
/// 4. The default model
pub fn resolve_model_id(explicit: Option<&str>, stored: Option<&str>) -> String {
    if let Some(id) = explicit {
        return id.to_string();
    }
    if let Ok(id) = std::env::var(MODEL_ENV_VAR) {
        return id;
    }
    stored.unwrap_or(DEFAULT_MODEL_ID).to_string()
}

/// Manages the ColBERT model lifecycle, supporting lazy loading on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    /// Creates a `ModelManager` for `model_id`. The model is not loaded
    /// until the first call to `encode_documents`.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT, EmbeddingError> {
        let model = match self.model.take() {
            Some(model) => model,
            None => {
                info!(model = %self.model_id, "loading model");
                let loaded: Result<ColBERT, _> = ColBERT::from(&self.model_id)
                    .with_device(default_device())
                    .try_into();
                loaded.map_err(|e| {
                    EmbeddingError::Failed(format!(
                        "failed to load {}: {e}",
                        self.model_id
                    ))
                })?
            }
        };
        Ok(self.model.insert(model))
    }

    /// Encodes document texts into ColBERT token-level embeddings of shape
    /// `[batch, tokens, dimension]`.
    pub fn encode_documents(
        &mut self,
        texts: &[String],
    ) -> Result<Tensor, EmbeddingError> {
        let model = self.ensure_loaded()?;
        model
            .encode(texts, false)
            .map_err(|e| EmbeddingError::Failed(e.to_string()))
    }
}

/// Model-backed [`Embedder`] that mean-pools ColBERT token embeddings into
/// one vector per text.
///
/// The model is shared behind a mutex, so concurrent callers take turns.
pub struct ColbertEmbedder {
    manager: Mutex<ModelManager>,
    model_id: String,
    dimension: Dimension,
}

impl ColbertEmbedder {
    pub fn new(model_id: String) -> Self {
        Self {
            manager: Mutex::new(ModelManager::with_model_id(model_id.clone())),
            model_id,
            dimension: Dimension(COLBERT_DIMENSION),
        }
    }
}

impl Embedder for ColbertEmbedder {
    fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let tokens = {
            let mut manager =
                self.manager.lock().unwrap_or_else(PoisonError::into_inner);
            manager.encode_documents(&[text.to_string()])?
        };

        // [1, T, D] -> [T, D] -> [D]
        let pooled = tokens
            .squeeze(0)
            .and_then(|t| t.mean(0))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
        debug!(components = pooled.len(), "pooled token embeddings");

        Embedding::normalized(pooled, self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_model_id() {
        let manager = ModelManager::with_model_id("custom/model".to_string());
        assert_eq!(manager.model_id(), "custom/model");
        assert!(!manager.is_loaded());
    }

    #[test]
    fn explicit_model_wins_over_stored() {
        let id = resolve_model_id(Some("cli/model"), Some("stored/model"));
        assert_eq!(id, "cli/model");
    }

    #[test]
    fn colbert_embedder_reports_fixed_dimension_without_loading() {
        let embedder = ColbertEmbedder::new(DEFAULT_MODEL_ID.to_string());
        assert_eq!(embedder.dimension().get(), COLBERT_DIMENSION);
        assert_eq!(embedder.model_name(), DEFAULT_MODEL_ID);
    }
}
