//! RocksDB document store
//!
//! Durable mapping from `doc_id` to content, metadata and embedding. Every
//! write is a single synced `WriteBatch`, so a returned call has reached the
//! WAL on disk and readers never observe a half-written record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{DBIteratorWithThreadMode, Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::Serialize;

use crate::document::Document;
use crate::embedding::StrategyRegistry;
use crate::error::{Result, StoreError};

/// Key layout
pub(crate) mod keys {
    /// `doc:{doc_id}` -> MessagePack `Document`
    pub const DOC_PREFIX: &[u8] = b"doc:";
    /// `strat:{strategy_id}\x1f{doc_id}` -> empty
    pub const STRATEGY_PREFIX: &[u8] = b"strat:";
    const SEPARATOR: u8 = 0x1f;

    pub fn document(doc_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(DOC_PREFIX.len() + doc_id.len());
        key.extend_from_slice(DOC_PREFIX);
        key.extend_from_slice(doc_id.as_bytes());
        key
    }

    pub fn strategy_prefix(strategy_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(STRATEGY_PREFIX.len() + strategy_id.len() + 1);
        key.extend_from_slice(STRATEGY_PREFIX);
        key.extend_from_slice(strategy_id.as_bytes());
        key.push(SEPARATOR);
        key
    }

    pub fn strategy_marker(strategy_id: &str, doc_id: &str) -> Vec<u8> {
        let mut key = strategy_prefix(strategy_id);
        key.extend_from_slice(doc_id.as_bytes());
        key
    }
}

/// Per-document failure inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub doc_id: String,
    pub reason: String,
    /// Resubmitting the same item may succeed
    pub retryable: bool,
}

impl FailedItem {
    pub fn new(doc_id: impl Into<String>, error: &StoreError) -> Self {
        Self {
            doc_id: doc_id.into(),
            reason: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Outcome of `upsert_batch`
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedItem>,
}

/// Result of one successful upsert
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The record as stored (revision and timestamp stamped)
    pub document: Document,
    /// Strategy of the replaced record, if there was one
    pub previous_strategy: Option<String>,
}

/// A record embedded under a strategy the current configuration lacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleDocument {
    pub doc_id: String,
    pub strategy_id: String,
}

/// Store statistics
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_documents: usize,
    pub by_strategy: BTreeMap<String, usize>,
    pub stale_documents: usize,
}

/// RocksDB-based document store
pub struct DocumentStore {
    db: Arc<DB>,
    registry: StrategyRegistry,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
    stale: DashMap<String, String>,
    clock: AtomicU64,
    path: PathBuf,
}

impl DocumentStore {
    /// Open (or create) a store at the given path
    ///
    /// `registry` is the set of strategies the current vectorizer declares;
    /// records under any other strategy are flagged stale.
    pub fn open(path: impl AsRef<Path>, registry: StrategyRegistry) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(2);
        opts.set_bytes_per_sync(1048576); // 1MB
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        crate::migration::ensure_schema(&db)?;

        log::info!("DocumentStore opened at: {}", path.display());

        let store = Self {
            db: Arc::new(db),
            registry,
            write_locks: DashMap::new(),
            stale: DashMap::new(),
            clock: AtomicU64::new(0),
            path: path.to_path_buf(),
        };

        store.scan_on_open()?;
        Ok(store)
    }

    /// Seed the logical clock and find stale records
    fn scan_on_open(&self) -> Result<()> {
        let mut count = 0;
        let mut skipped = 0;
        let mut max_revision = 0;

        for item in self.prefix_iter(keys::DOC_PREFIX) {
            let (key, value) = item?;
            if !key.starts_with(keys::DOC_PREFIX) {
                break;
            }

            // Gracefully handle deserialization errors
            match rmp_serde::from_slice::<Document>(&value) {
                Ok(doc) => {
                    max_revision = max_revision.max(doc.revision);
                    if !self.registry.contains(&doc.strategy_id) {
                        self.stale.insert(doc.doc_id, doc.strategy_id);
                    }
                    count += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Failed to decode record {}: {}. Skipping.",
                        String::from_utf8_lossy(&key),
                        e
                    );
                    skipped += 1;
                }
            }
        }

        self.clock.store(max_revision, Ordering::SeqCst);

        if count > 0 {
            log::info!("Found {} documents on disk", count);
        }
        if skipped > 0 {
            log::warn!("Skipped {} records due to decode errors", skipped);
        }
        if !self.stale.is_empty() {
            log::warn!(
                "{} documents were embedded under strategies no longer configured; \
                 they are not served until migrated",
                self.stale.len()
            );
        }
        Ok(())
    }

    fn prefix_iter(&self, prefix: &[u8]) -> DBIteratorWithThreadMode<'_, DB> {
        self.db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
    }

    /// Run `f` holding the document's write lock
    ///
    /// The lock entry is dropped once no other writer holds or awaits it.
    fn with_doc_lock<T>(&self, doc_id: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self
            .write_locks
            .entry(doc_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.write_locks
            .remove_if(doc_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn sync_writes() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }

    /// Read a record without the staleness check
    fn read_record(&self, doc_id: &str) -> Result<Option<Document>> {
        match self.db.get(keys::document(doc_id))? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check a document against the declared strategies
    pub fn validate(&self, doc: &Document) -> Result<()> {
        if doc.doc_id.is_empty() {
            return Err(StoreError::invalid_document("doc_id is empty"));
        }
        let expected = self
            .registry
            .dimension_of(&doc.strategy_id)
            .ok_or_else(|| StoreError::UnknownStrategy(doc.strategy_id.clone()))?;
        for actual in [doc.dimension, doc.embedding.len()] {
            if actual != expected {
                return Err(StoreError::DimensionMismatch {
                    strategy_id: doc.strategy_id.clone(),
                    expected,
                    actual,
                });
            }
        }
        if doc.embedding.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::invalid_document("embedding has non-finite values"));
        }
        Ok(())
    }

    /// Insert or fully replace a document
    ///
    /// Writers of the same `doc_id` are serialized; the last one to complete
    /// wins. Writers of different documents do not wait on each other.
    pub fn upsert(&self, doc: Document) -> Result<UpsertOutcome> {
        self.upsert_with(doc, |_| Ok(()))
    }

    /// Upsert, then run `on_commit` before the document's lock is released
    ///
    /// Derived views updated from `on_commit` observe writes to one document
    /// in commit order. An `on_commit` error is returned after the write has
    /// already been made durable.
    pub fn upsert_with<F>(&self, doc: Document, on_commit: F) -> Result<UpsertOutcome>
    where
        F: FnOnce(&UpsertOutcome) -> Result<()>,
    {
        self.validate(&doc)?;
        let doc_id = doc.doc_id.clone();
        self.with_doc_lock(&doc_id, || self.upsert_locked(doc, on_commit))
    }

    fn upsert_locked<F>(&self, mut doc: Document, on_commit: F) -> Result<UpsertOutcome>
    where
        F: FnOnce(&UpsertOutcome) -> Result<()>,
    {
        let previous_strategy = match self.read_record(&doc.doc_id) {
            Ok(prev) => prev.map(|p| p.strategy_id),
            Err(StoreError::Decode(e)) => {
                log::warn!("Overwriting undecodable record {}: {}", doc.doc_id, e);
                None
            }
            Err(e) => return Err(e),
        };

        doc.revision = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        doc.updated_at = Utc::now();

        let mut batch = WriteBatch::default();
        batch.put(keys::document(&doc.doc_id), rmp_serde::to_vec_named(&doc)?);
        batch.put(keys::strategy_marker(&doc.strategy_id, &doc.doc_id), b"");
        if let Some(prev) = previous_strategy.as_deref() {
            if prev != doc.strategy_id {
                batch.delete(keys::strategy_marker(prev, &doc.doc_id));
            }
        }
        self.db.write_opt(batch, &Self::sync_writes())?;
        self.stale.remove(&doc.doc_id);

        log::debug!(
            "Stored {} (rev {}, {})",
            doc.doc_id,
            doc.revision,
            doc.strategy_id
        );

        let outcome = UpsertOutcome {
            document: doc,
            previous_strategy,
        };
        on_commit(&outcome)?;
        Ok(outcome)
    }

    /// Upsert many documents, each atomically on its own
    ///
    /// A failing document is reported and skipped; it never aborts the rest.
    pub fn upsert_batch(&self, docs: Vec<Document>) -> BatchReport {
        let mut report = BatchReport::default();
        for doc in docs {
            let doc_id = doc.doc_id.clone();
            match self.upsert(doc) {
                Ok(_) => report.succeeded.push(doc_id),
                Err(e) => {
                    log::warn!("Failed to store {}: {}", doc_id, e);
                    report.failed.push(FailedItem::new(doc_id, &e));
                }
            }
        }
        report
    }

    /// Get a document by id
    ///
    /// Records embedded under a strategy that is no longer declared are
    /// refused with `StaleStrategy` rather than served.
    pub fn get(&self, doc_id: &str) -> Result<Option<Document>> {
        match self.read_record(doc_id)? {
            Some(doc) if !self.registry.contains(&doc.strategy_id) => {
                Err(StoreError::StaleStrategy {
                    doc_id: doc.doc_id,
                    strategy_id: doc.strategy_id,
                })
            }
            other => Ok(other),
        }
    }

    /// Lazily iterate every document stored under one strategy
    ///
    /// Each call starts a fresh pass. Undeclared strategies yield nothing.
    pub fn all_for_strategy(&self, strategy_id: &str) -> StrategyDocuments<'_> {
        let prefix = keys::strategy_prefix(strategy_id);
        let inner = if self.registry.contains(strategy_id) {
            Some(self.prefix_iter(&prefix))
        } else {
            None
        };
        StrategyDocuments {
            store: self,
            strategy_id: strategy_id.to_string(),
            prefix,
            inner,
        }
    }

    /// Delete a document, returning the removed record
    pub fn delete(&self, doc_id: &str) -> Result<Option<Document>> {
        self.delete_with(doc_id, |_| ())
    }

    /// Delete, then run `on_commit` before the document's lock is released
    pub fn delete_with<F>(&self, doc_id: &str, on_commit: F) -> Result<Option<Document>>
    where
        F: FnOnce(&Document),
    {
        self.with_doc_lock(doc_id, || self.delete_locked(doc_id, on_commit))
    }

    fn delete_locked<F>(&self, doc_id: &str, on_commit: F) -> Result<Option<Document>>
    where
        F: FnOnce(&Document),
    {
        let Some(previous) = self.read_record(doc_id)? else {
            return Ok(None);
        };

        let mut batch = WriteBatch::default();
        batch.delete(keys::document(doc_id));
        batch.delete(keys::strategy_marker(&previous.strategy_id, doc_id));
        self.db.write_opt(batch, &Self::sync_writes())?;
        self.stale.remove(doc_id);

        on_commit(&previous);

        log::debug!("Deleted {}", doc_id);
        Ok(Some(previous))
    }

    /// Remove every document; returns how many were removed
    pub fn clear(&self) -> Result<usize> {
        let mut batch = WriteBatch::default();
        let mut removed = 0;

        for prefix in [keys::DOC_PREFIX, keys::STRATEGY_PREFIX] {
            for item in self.prefix_iter(prefix) {
                let (key, _) = item?;
                if !key.starts_with(prefix) {
                    break;
                }
                if prefix == keys::DOC_PREFIX {
                    removed += 1;
                }
                batch.delete(key);
            }
        }

        self.db.write_opt(batch, &Self::sync_writes())?;
        self.stale.clear();

        log::info!("Cleared {} documents", removed);
        Ok(removed)
    }

    /// Records whose strategy is no longer declared, sorted by id
    pub fn stale_documents(&self) -> Vec<StaleDocument> {
        let mut stale: Vec<StaleDocument> = self
            .stale
            .iter()
            .map(|e| StaleDocument {
                doc_id: e.key().clone(),
                strategy_id: e.value().clone(),
            })
            .collect();
        stale.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        stale
    }

    /// Read a stale record for migration, bypassing the staleness check
    pub fn get_stale(&self, doc_id: &str) -> Result<Option<Document>> {
        if !self.stale.contains_key(doc_id) {
            return Ok(None);
        }
        self.read_record(doc_id)
    }

    /// Number of stored documents
    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.prefix_iter(keys::DOC_PREFIX) {
            let (key, _) = item?;
            if !key.starts_with(keys::DOC_PREFIX) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Get store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let mut by_strategy: BTreeMap<String, usize> = BTreeMap::new();
        let mut total = 0;

        for item in self.prefix_iter(keys::STRATEGY_PREFIX) {
            let (key, _) = item?;
            if !key.starts_with(keys::STRATEGY_PREFIX) {
                break;
            }
            let rest = &key[keys::STRATEGY_PREFIX.len()..];
            if let Some(pos) = rest.iter().position(|b| *b == 0x1f) {
                let strategy = String::from_utf8_lossy(&rest[..pos]).into_owned();
                *by_strategy.entry(strategy).or_insert(0) += 1;
                total += 1;
            }
        }

        Ok(StoreStats {
            total_documents: total,
            by_strategy,
            stale_documents: self.stale.len(),
        })
    }

    /// Declared strategies this store validates against
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Directory holding the database
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lazy, finite pass over one strategy's documents
pub struct StrategyDocuments<'a> {
    store: &'a DocumentStore,
    strategy_id: String,
    prefix: Vec<u8>,
    inner: Option<DBIteratorWithThreadMode<'a, DB>>,
}

impl Iterator for StrategyDocuments<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.inner.as_mut()?.next()?;
            let key = match item {
                Ok((key, _)) => key,
                Err(e) => return Some(Err(e.into())),
            };
            if !key.starts_with(&self.prefix) {
                self.inner = None;
                return None;
            }

            let doc_id = String::from_utf8_lossy(&key[self.prefix.len()..]).into_owned();
            match self.store.read_record(&doc_id) {
                Ok(Some(doc)) if doc.strategy_id == self.strategy_id => return Some(Ok(doc)),
                // Deleted or re-embedded since the marker was read
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
