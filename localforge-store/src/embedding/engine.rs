//! Vectorizer adapter
//!
//! Wraps the configured embedding strategies behind one `embed` call. The
//! active strategy is chosen once, at construction, and never changes for
//! the lifetime of the vectorizer.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::hashing::{HashingEmbedder, DEFAULT_HASHING_DIMENSION};
use super::strategy::{normalize, Embedder, Embedding, StrategyRegistry, StrategySpec};
use crate::error::{Result, StoreError};

/// Which strategy the vectorizer should activate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyChoice {
    /// Transformer model if it loads, hashing otherwise
    #[default]
    Auto,
    /// Transformer model only; no active strategy if it cannot load
    Model,
    /// Hashing only
    Hashing,
}

impl std::str::FromStr for StrategyChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "model" => Ok(Self::Model),
            "hashing" | "hash" => Ok(Self::Hashing),
            other => Err(format!(
                "unknown strategy '{}' (expected auto, model or hashing)",
                other
            )),
        }
    }
}

/// Vectorizer configuration
#[derive(Debug, Clone)]
pub struct VectorizerConfig {
    /// Strategy selection policy
    pub strategy: StrategyChoice,
    /// Characters kept after trimming; longer input is cut (default: 8192)
    pub max_chars: usize,
    /// Bucket count of the hashing strategy (default: 512)
    pub hashing_dimension: usize,
    /// Model cache directory override
    pub model_cache_dir: Option<PathBuf>,
    /// Memoized embeddings, 0 disables the cache (default: 1024)
    pub cache_capacity: usize,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyChoice::Auto,
            max_chars: 8192,
            hashing_dimension: DEFAULT_HASHING_DIMENSION,
            model_cache_dir: None,
            cache_capacity: 1024,
        }
    }
}

/// Text after trimming and truncation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedText {
    pub text: String,
    pub truncated: bool,
}

/// Embedding adapter with a single active strategy
pub struct Vectorizer {
    active: Option<Arc<dyn Embedder>>,
    registry: StrategyRegistry,
    max_chars: usize,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl Vectorizer {
    /// Build the vectorizer described by `config`
    ///
    /// Every strategy the configuration knows about is declared in the
    /// registry, even when it is not the active one, so documents embedded
    /// under it stay addressable.
    pub fn from_config(config: &VectorizerConfig) -> Result<Self> {
        let hashing = HashingEmbedder::new(config.hashing_dimension)?;
        let known: Vec<StrategySpec> = std::iter::once(hashing.spec().clone())
            .chain(model_specs())
            .collect();

        let active: Option<Arc<dyn Embedder>> = match config.strategy {
            StrategyChoice::Hashing => Some(Arc::new(hashing)),
            StrategyChoice::Model => match load_model(config) {
                Ok(model) => Some(model),
                Err(e) => {
                    log::error!("Embedding model unavailable and fallback disabled: {}", e);
                    None
                }
            },
            StrategyChoice::Auto => match load_model(config) {
                Ok(model) => Some(model),
                Err(e) => {
                    log::warn!("Embedding model unavailable ({}), using hashing fallback", e);
                    Some(Arc::new(hashing))
                }
            },
        };

        Ok(Self::new(active, known, config))
    }

    /// Assemble a vectorizer around an explicit embedder
    ///
    /// `known` declares additional strategies (e.g. retired ones whose
    /// records should stay readable); the active strategy is always declared.
    pub fn new(
        active: Option<Arc<dyn Embedder>>,
        known: impl IntoIterator<Item = StrategySpec>,
        config: &VectorizerConfig,
    ) -> Self {
        let mut registry: StrategyRegistry = known.into_iter().collect();
        if let Some(embedder) = &active {
            registry.register(embedder.spec());
            log::info!(
                "Vectorizer ready ({}, {}d)",
                embedder.spec().id,
                embedder.spec().dimension
            );
        }

        let cache = NonZeroUsize::new(config.cache_capacity).map(|cap| Mutex::new(LruCache::new(cap)));

        Self {
            active,
            registry,
            max_chars: config.max_chars,
            cache,
        }
    }

    /// Shorthand for a vectorizer running a single embedder
    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self::new(Some(embedder), [], &VectorizerConfig::default())
    }

    /// Id of the strategy every `embed` call uses
    pub fn active_strategy_id(&self) -> Result<&str> {
        self.active
            .as_ref()
            .map(|e| e.spec().id.as_str())
            .ok_or(StoreError::NoActiveStrategy)
    }

    /// Declared dimension of a strategy
    pub fn dimension_of(&self, strategy_id: &str) -> Option<usize> {
        self.registry.dimension_of(strategy_id)
    }

    /// All declared strategies
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Trim and bound the input
    ///
    /// Input longer than `max_chars` characters (after trimming) is cut at a
    /// char boundary and flagged; nothing else is altered.
    pub fn prepare(&self, text: &str) -> PreparedText {
        let trimmed = text.trim();
        match trimmed.char_indices().nth(self.max_chars) {
            Some((cut, _)) => PreparedText {
                text: trimmed[..cut].to_string(),
                truncated: true,
            },
            None => PreparedText {
                text: trimmed.to_string(),
                truncated: false,
            },
        }
    }

    /// Embed text under the active strategy
    ///
    /// The returned vector has exactly the strategy's declared dimension and
    /// unit length (zero vectors stay zero). This is the only place vectors
    /// are normalized.
    pub fn embed(&self, text: &str) -> Result<Embedding> {
        let embedder = self.active.as_ref().ok_or(StoreError::NoActiveStrategy)?;
        let spec = embedder.spec();

        let prepared = self.prepare(text);
        if prepared.text.is_empty() {
            return Err(StoreError::invalid_document("text is empty"));
        }
        if prepared.truncated {
            log::debug!(
                "Truncated input to {} chars for {}",
                self.max_chars,
                spec.id
            );
        }

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.lock().get(&prepared.text) {
                return Ok(Embedding {
                    vector: cached.clone(),
                    strategy_id: spec.id.clone(),
                    truncated: prepared.truncated,
                });
            }
        }

        let mut vector = embedder.embed(&prepared.text)?;
        if vector.len() != spec.dimension {
            return Err(StoreError::DimensionMismatch {
                strategy_id: spec.id.clone(),
                expected: spec.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::embedding(format!(
                "{} produced a non-finite vector",
                spec.id
            )));
        }
        normalize(&mut vector);

        if let Some(cache) = &self.cache {
            cache.lock().put(prepared.text, vector.clone());
        }

        Ok(Embedding {
            vector,
            strategy_id: spec.id.clone(),
            truncated: prepared.truncated,
        })
    }

    /// Get cache size
    pub fn cache_size(&self) -> usize {
        self.cache.as_ref().map(|c| c.lock().len()).unwrap_or(0)
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }
}

#[cfg(feature = "model")]
fn model_specs() -> Vec<StrategySpec> {
    vec![super::model::minilm_spec()]
}

#[cfg(not(feature = "model"))]
fn model_specs() -> Vec<StrategySpec> {
    Vec::new()
}

#[cfg(feature = "model")]
fn load_model(config: &VectorizerConfig) -> Result<Arc<dyn Embedder>> {
    let model = super::model::FastEmbedder::load(config.model_cache_dir.as_deref(), 256)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "model"))]
fn load_model(_config: &VectorizerConfig) -> Result<Arc<dyn Embedder>> {
    Err(StoreError::model(
        "model support not compiled in (enable the `model` feature)",
    ))
}
