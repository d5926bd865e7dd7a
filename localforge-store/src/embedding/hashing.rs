//! Hashing term-frequency embeddings
//!
//! Fully offline fallback: every token is hashed into one of `dimension`
//! buckets and counted. No vocabulary, no model files.

use regex::Regex;

use super::strategy::{Embedder, StrategySpec};
use crate::error::{Result, StoreError};

/// Default bucket count
pub const DEFAULT_HASHING_DIMENSION: usize = 512;

/// Strategy id for a given bucket count
pub fn hashing_strategy_id(dimension: usize) -> String {
    format!("hash-tf-{}/v1", dimension)
}

/// Deterministic hashing vectorizer
pub struct HashingEmbedder {
    spec: StrategySpec,
    token_pattern: Regex,
}

/// Two or more word characters
const TOKEN_PATTERN: &str = r"\b\w\w+\b";

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(StoreError::model("hashing dimension must be > 0"));
        }
        let token_pattern = Regex::new(TOKEN_PATTERN)
            .map_err(|e| StoreError::model(format!("invalid token pattern: {}", e)))?;
        Ok(Self {
            spec: StrategySpec::new(hashing_strategy_id(dimension), dimension),
            token_pattern,
        })
    }

    /// Lowercased tokens of two or more word characters
    fn tokens(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.token_pattern
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

impl Embedder for HashingEmbedder {
    fn spec(&self) -> &StrategySpec {
        &self.spec
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let dimension = self.spec.dimension;
        let mut vector = vec![0.0_f32; dimension];
        for token in self.tokens(text) {
            let bucket = (fnv1a_64(token.as_bytes()) % dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
