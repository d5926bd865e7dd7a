//! Embedding module
//!
//! Turns text into fixed-dimension vectors tagged with the strategy that
//! produced them. The transformer strategy needs the `model` feature; the
//! hashing strategy is always available.

#[cfg(feature = "model")]
mod discovery;
mod engine;
mod hashing;
#[cfg(feature = "model")]
mod model;
mod strategy;

#[cfg(feature = "model")]
pub use discovery::find_model_cache_dir;
pub use engine::{PreparedText, StrategyChoice, Vectorizer, VectorizerConfig};
pub use hashing::{hashing_strategy_id, HashingEmbedder, DEFAULT_HASHING_DIMENSION};
#[cfg(feature = "model")]
pub use model::{minilm_spec, FastEmbedder, MINILM_DIMENSION, MINILM_STRATEGY_ID};
pub use strategy::{normalize, Embedder, Embedding, StrategyRegistry, StrategySpec};
