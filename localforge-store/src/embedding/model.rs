//! Transformer embeddings through fastembed
//!
//! all-MiniLM-L6-v2 (384 dimensions) running on ONNX Runtime.

use std::path::Path;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::discovery::find_model_cache_dir;
use super::strategy::{Embedder, StrategySpec};
use crate::error::{Result, StoreError};

/// Strategy id of the transformer model
pub const MINILM_STRATEGY_ID: &str = "minilm-l6-v2/v1";

/// Output dimension of all-MiniLM-L6-v2
pub const MINILM_DIMENSION: usize = 384;

/// Spec of the transformer strategy, known without loading the model
pub fn minilm_spec() -> StrategySpec {
    StrategySpec::new(MINILM_STRATEGY_ID, MINILM_DIMENSION)
}

/// fastembed model wrapper
pub struct FastEmbedder {
    model: TextEmbedding,
    spec: StrategySpec,
}

impl FastEmbedder {
    /// Load all-MiniLM-L6-v2, downloading into the cache directory if needed
    pub fn load(cache_dir: Option<&Path>, max_length: usize) -> Result<Self> {
        let cache_dir = find_model_cache_dir(cache_dir);
        log::info!("Loading all-MiniLM-L6-v2 from: {}", cache_dir.display());

        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_cache_dir(cache_dir)
            .with_max_length(max_length)
            .with_show_download_progress(false);

        let model = TextEmbedding::try_new(options)
            .map_err(|e| StoreError::model(format!("Failed to load all-MiniLM-L6-v2: {}", e)))?;

        log::info!("Loaded all-MiniLM-L6-v2 ({}d)", MINILM_DIMENSION);

        Ok(Self {
            model,
            spec: minilm_spec(),
        })
    }
}

impl Embedder for FastEmbedder {
    fn spec(&self) -> &StrategySpec {
        &self.spec
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self
            .model
            .embed(vec![text], None)
            .map_err(|e| StoreError::embedding(format!("Failed to encode text: {}", e)))?;

        embeddings
            .pop()
            .ok_or_else(|| StoreError::embedding("Model returned no embedding"))
    }
}
