//! Embedding strategies
//!
//! A strategy is a named, versioned text-to-vector function with a fixed
//! output dimension. Vectors from different strategies live in different
//! spaces and are never compared.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identity and shape of one embedding strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategySpec {
    /// Stable identifier, e.g. `hash-tf-512/v1`
    pub id: String,
    /// Output vector length
    pub dimension: usize,
}

impl StrategySpec {
    pub fn new(id: impl Into<String>, dimension: usize) -> Self {
        Self {
            id: id.into(),
            dimension,
        }
    }
}

/// A vector produced by the vectorizer, tagged with its strategy
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub strategy_id: String,
    /// Input was cut to the configured character budget before embedding
    pub truncated: bool,
}

/// Raw embedding function behind the vectorizer
///
/// Implementations must be deterministic: the same text always yields the
/// same vector. Output does not need to be normalized.
pub trait Embedder: Send + Sync {
    /// Strategy this embedder implements
    fn spec(&self) -> &StrategySpec;

    /// Embed one piece of already-prepared text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Declared strategies and their dimensions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyRegistry {
    dimensions: BTreeMap<String, usize>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a strategy; re-declaring replaces its dimension
    pub fn register(&mut self, spec: &StrategySpec) {
        self.dimensions.insert(spec.id.clone(), spec.dimension);
    }

    pub fn dimension_of(&self, strategy_id: &str) -> Option<usize> {
        self.dimensions.get(strategy_id).copied()
    }

    pub fn contains(&self, strategy_id: &str) -> bool {
        self.dimensions.contains_key(strategy_id)
    }

    /// Declared strategy ids, sorted
    pub fn strategy_ids(&self) -> impl Iterator<Item = &str> {
        self.dimensions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

impl FromIterator<StrategySpec> for StrategyRegistry {
    fn from_iter<I: IntoIterator<Item = StrategySpec>>(iter: I) -> Self {
        let mut registry = Self::new();
        for spec in iter {
            registry.register(&spec);
        }
        registry
    }
}

/// Scale a vector to unit length in place; zero vectors are left as is
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry: StrategyRegistry = [
            StrategySpec::new("a/v1", 3),
            StrategySpec::new("b/v1", 5),
        ]
        .into_iter()
        .collect();

        assert_eq!(registry.dimension_of("a/v1"), Some(3));
        assert_eq!(registry.dimension_of("b/v1"), Some(5));
        assert_eq!(registry.dimension_of("c/v1"), None);
        assert_eq!(registry.strategy_ids().collect::<Vec<_>>(), vec!["a/v1", "b/v1"]);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0_f32, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0_f32; 4];
        normalize(&mut zero);
        assert!(zero.iter().all(|v| *v == 0.0));
    }
}
