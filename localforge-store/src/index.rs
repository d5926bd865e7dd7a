//! Similarity index
//!
//! Exact cosine ranking over one strategy's vectors at a time. The index is a
//! derived view of the document store: it owns no truth and can be rebuilt
//! from the store whenever it is suspected to lag.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::storage::DocumentStore;

/// A ranked hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDoc {
    pub doc_id: String,
    pub score: f32,
}

struct Entry {
    vector: Arc<[f32]>,
    norm: f32,
}

impl Entry {
    fn new(vector: Arc<[f32]>) -> Self {
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        Self { vector, norm }
    }
}

/// A change applied to a space while it is being rebuilt
enum Change {
    Upsert(String, Arc<[f32]>),
    Remove(String),
}

/// All vectors of one strategy
struct VectorSpace {
    dimension: usize,
    entries: HashMap<String, Entry>,
    /// Changes recorded since a rebuild started scanning the store
    journal: Option<Vec<Change>>,
    /// Replaced by a rebuild; writers must look the space up again
    retired: bool,
}

impl VectorSpace {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: HashMap::new(),
            journal: None,
            retired: false,
        }
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Upsert(doc_id, vector) => {
                self.entries.insert(doc_id, Entry::new(vector));
            }
            Change::Remove(doc_id) => {
                self.entries.remove(&doc_id);
            }
        }
    }
}

/// Heap element; ordered so the worst hit is the greatest
struct Ranked<'a> {
    score: f32,
    doc_id: &'a str,
}

impl PartialEq for Ranked<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked<'_> {}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.doc_id.cmp(other.doc_id))
    }
}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn cosine(query: &[f32], query_norm: f32, entry: &Entry) -> f32 {
    if query_norm == 0.0 || entry.norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = query
        .iter()
        .zip(entry.vector.iter())
        .map(|(a, b)| a * b)
        .sum();
    dot / (query_norm * entry.norm)
}

/// Per-strategy in-memory vector index
#[derive(Default)]
pub struct SimilarityIndex {
    spaces: DashMap<String, Arc<RwLock<VectorSpace>>>,
    /// Serializes rebuilds and clears
    maintenance: Mutex<()>,
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn space(&self, strategy_id: &str) -> Option<Arc<RwLock<VectorSpace>>> {
        self.spaces.get(strategy_id).map(|s| Arc::clone(s.value()))
    }

    /// Reload one strategy's space from the store
    ///
    /// Queries keep reading the old space while the store is scanned. Writes
    /// made during the scan land in the old space and are journaled, then
    /// replayed onto the new space before it is swapped in.
    pub fn rebuild(&self, store: &DocumentStore, strategy_id: &str) -> Result<usize> {
        let _maintenance = self.maintenance.lock();

        let Some(dimension) = store.registry().dimension_of(strategy_id) else {
            if let Some((_, old)) = self.spaces.remove(strategy_id) {
                old.write().retired = true;
            }
            return Err(StoreError::UnknownStrategy(strategy_id.to_string()));
        };

        let old = self
            .spaces
            .entry(strategy_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(VectorSpace::new(dimension))))
            .clone();
        old.write().journal = Some(Vec::new());

        let mut space = VectorSpace::new(dimension);
        for doc in store.all_for_strategy(strategy_id) {
            let doc = match doc {
                Ok(doc) => doc,
                Err(e) => {
                    old.write().journal = None;
                    return Err(e);
                }
            };
            space
                .entries
                .insert(doc.doc_id, Entry::new(Arc::from(doc.embedding)));
        }

        let mut old_guard = old.write();
        let replayed = old_guard.journal.take().unwrap_or_default();
        let replayed_count = replayed.len();
        for change in replayed {
            space.apply(change);
        }
        old_guard.retired = true;
        let count = space.entries.len();
        self.spaces
            .insert(strategy_id.to_string(), Arc::new(RwLock::new(space)));
        drop(old_guard);

        log::info!(
            "Rebuilt index for {}: {} vectors ({} concurrent changes replayed)",
            strategy_id,
            count,
            replayed_count
        );
        Ok(count)
    }

    /// Run `f` on the live space of a strategy, creating it when absent
    fn with_live_space<T>(
        &self,
        strategy_id: &str,
        dimension: usize,
        f: impl FnOnce(&mut VectorSpace) -> T,
    ) -> T {
        loop {
            let space = self
                .spaces
                .entry(strategy_id.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(VectorSpace::new(dimension))))
                .clone();
            let mut guard = space.write();
            if !guard.retired {
                return f(&mut guard);
            }
        }
    }

    /// Insert or replace one vector
    pub fn upsert(&self, doc_id: &str, vector: Arc<[f32]>, strategy_id: &str) -> Result<()> {
        self.with_live_space(strategy_id, vector.len(), |space| {
            if space.dimension != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    strategy_id: strategy_id.to_string(),
                    expected: space.dimension,
                    actual: vector.len(),
                });
            }
            if let Some(journal) = space.journal.as_mut() {
                journal.push(Change::Upsert(doc_id.to_string(), Arc::clone(&vector)));
            }
            space.entries.insert(doc_id.to_string(), Entry::new(vector));
            Ok(())
        })
    }

    /// Remove one vector; returns whether it was present
    pub fn remove(&self, doc_id: &str, strategy_id: &str) -> bool {
        loop {
            let Some(space) = self.space(strategy_id) else {
                return false;
            };
            let mut space = space.write();
            if space.retired {
                continue;
            }
            if let Some(journal) = space.journal.as_mut() {
                journal.push(Change::Remove(doc_id.to_string()));
            }
            return space.entries.remove(doc_id).is_some();
        }
    }

    /// Empty every space
    pub fn clear(&self) {
        let _maintenance = self.maintenance.lock();
        for space in self.spaces.iter() {
            space.write().entries.clear();
        }
    }

    /// Rank the `top_k` nearest vectors of one strategy
    ///
    /// Descending score, ties by ascending `doc_id`. Empty spaces, `top_k`
    /// of zero and query vectors of the wrong length all yield no hits.
    pub fn query(&self, vector: &[f32], strategy_id: &str, top_k: usize) -> Vec<ScoredDoc> {
        if top_k == 0 {
            return Vec::new();
        }
        let Some(space) = self.space(strategy_id) else {
            return Vec::new();
        };
        let space = space.read();

        if vector.len() != space.dimension {
            log::warn!(
                "Query vector has {} dimensions, {} expects {}",
                vector.len(),
                strategy_id,
                space.dimension
            );
            return Vec::new();
        }

        let query_norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        let mut heap = BinaryHeap::with_capacity(top_k.min(space.entries.len()) + 1);

        for (doc_id, entry) in &space.entries {
            heap.push(Ranked {
                score: cosine(vector, query_norm, entry),
                doc_id,
            });
            if heap.len() > top_k {
                heap.pop();
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|r| ScoredDoc {
                doc_id: r.doc_id.to_string(),
                score: r.score,
            })
            .collect()
    }

    /// Sorted `(doc_id, vector)` pairs of one strategy
    pub fn snapshot(&self, strategy_id: &str) -> Vec<(String, Arc<[f32]>)> {
        let Some(space) = self.space(strategy_id) else {
            return Vec::new();
        };
        let space = space.read();
        let mut pairs: Vec<(String, Arc<[f32]>)> = space
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), Arc::clone(&e.vector)))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    /// Whether a strategy's space holds a doc
    pub fn contains(&self, doc_id: &str, strategy_id: &str) -> bool {
        self.space(strategy_id)
            .map(|s| s.read().entries.contains_key(doc_id))
            .unwrap_or(false)
    }

    /// Vector count per strategy
    pub fn len(&self, strategy_id: &str) -> usize {
        self.space(strategy_id)
            .map(|s| s.read().entries.len())
            .unwrap_or(0)
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.spaces.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f32]) -> Arc<[f32]> {
        Arc::from(values)
    }

    fn ids(hits: &[ScoredDoc]) -> Vec<&str> {
        hits.iter().map(|h| h.doc_id.as_str()).collect()
    }

    #[test]
    fn test_ranking_descending() {
        let index = SimilarityIndex::new();
        index.upsert("far", v(&[0.0, 1.0]), "s").unwrap();
        index.upsert("near", v(&[1.0, 0.0]), "s").unwrap();
        index.upsert("mid", v(&[1.0, 1.0]), "s").unwrap();

        let hits = index.query(&[1.0, 0.0], "s", 10);
        assert_eq!(ids(&hits), vec!["near", "mid", "far"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(hits[2].score, 0.0);
    }

    #[test]
    fn test_ties_break_by_doc_id() {
        let index = SimilarityIndex::new();
        for id in ["delta", "alpha", "charlie", "bravo"] {
            index.upsert(id, v(&[0.6, 0.8]), "s").unwrap();
        }
        index.upsert("zulu", v(&[1.0, 0.0]), "s").unwrap();

        let hits = index.query(&[0.6, 0.8], "s", 3);
        assert_eq!(ids(&hits), vec!["alpha", "bravo", "charlie"]);

        let all = index.query(&[0.6, 0.8], "s", 10);
        assert_eq!(ids(&all), vec!["alpha", "bravo", "charlie", "delta", "zulu"]);
    }

    #[test]
    fn test_degenerate_queries_are_empty() {
        let index = SimilarityIndex::new();
        assert!(index.query(&[1.0, 0.0], "s", 5).is_empty());

        index.upsert("a", v(&[1.0, 0.0]), "s").unwrap();
        assert!(index.query(&[1.0, 0.0], "s", 0).is_empty());
        assert!(index.query(&[1.0, 0.0, 0.0], "s", 5).is_empty());
        assert!(index.query(&[1.0, 0.0], "other", 5).is_empty());
    }

    #[test]
    fn test_top_k_larger_than_candidates() {
        let index = SimilarityIndex::new();
        index.upsert("a", v(&[1.0, 0.0]), "s").unwrap();
        index.upsert("b", v(&[0.0, 1.0]), "s").unwrap();
        assert_eq!(index.query(&[1.0, 0.0], "s", 100).len(), 2);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let index = SimilarityIndex::new();
        index.upsert("zero", v(&[0.0, 0.0]), "s").unwrap();
        let hits = index.query(&[1.0, 0.0], "s", 1);
        assert_eq!(hits[0].score, 0.0);
        assert!(index.query(&[0.0, 0.0], "s", 1)[0].score == 0.0);
    }

    #[test]
    fn test_strategies_are_isolated() {
        let index = SimilarityIndex::new();
        index.upsert("a", v(&[1.0, 0.0]), "s2").unwrap();
        index.upsert("b", v(&[1.0, 0.0]), "s2b").unwrap();

        assert_eq!(ids(&index.query(&[1.0, 0.0], "s2", 5)), vec!["a"]);
        assert_eq!(ids(&index.query(&[1.0, 0.0], "s2b", 5)), vec!["b"]);
        assert_eq!(index.strategy_ids(), vec!["s2".to_string(), "s2b".to_string()]);
    }

    #[test]
    fn test_upsert_replaces_and_remove() {
        let index = SimilarityIndex::new();
        index.upsert("a", v(&[1.0, 0.0]), "s").unwrap();
        index.upsert("a", v(&[0.0, 1.0]), "s").unwrap();
        assert_eq!(index.len("s"), 1);
        assert_eq!(&*index.snapshot("s")[0].1, &[0.0, 1.0]);

        assert!(matches!(
            index.upsert("b", v(&[1.0]), "s"),
            Err(StoreError::DimensionMismatch { expected: 2, actual: 1, .. })
        ));

        assert!(index.remove("a", "s"));
        assert!(!index.remove("a", "s"));
        assert!(!index.contains("a", "s"));
        assert!(index.query(&[0.0, 1.0], "s", 5).is_empty());
    }
}
