//! Retrieval coordinator
//!
//! Ties the vectorizer, the document store and the similarity index
//! together. Indexing runs vectorize → store → index per item; searching
//! embeds the query under the active strategy and ranks that strategy's
//! space only.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::document::{Document, Metadata, RawDocument};
use crate::embedding::{Embedding, Vectorizer};
use crate::error::{Result, StoreError};
use crate::index::SimilarityIndex;
use crate::llm::{compose_prompt, LanguageModel};
use crate::storage::{DocumentStore, FailedItem, StoreStats};

const CONTEXT_SEPARATOR: &str = "\n\n";

/// Retrieval configuration
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Embedding calls in flight per coordinator (default: 4)
    pub max_concurrent_embeds: usize,
    /// Time budget of a single embedding call (default: 30s)
    pub embed_timeout: Duration,
    /// Character budget of an assembled context (default: 12000)
    pub context_char_budget: usize,
    /// Hits used when a caller gives no `top_k` (default: 5)
    pub default_top_k: usize,
}

impl RetrievalConfig {
    /// Hits to fetch for a caller-supplied `top_k`; zero or negative means none
    pub fn resolve_top_k(&self, requested: Option<i64>) -> usize {
        match requested {
            None => self.default_top_k,
            Some(k) => usize::try_from(k).unwrap_or(0),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_embeds: 4,
            embed_timeout: Duration::from_secs(30),
            context_char_budget: 12_000,
            default_top_k: 5,
        }
    }
}

/// Outcome of an indexing call
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub failed: Vec<FailedItem>,
    /// Items whose text was cut to the vectorizer's length bound
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub truncated: Vec<String>,
}

/// One search result with its stored content
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f32,
    pub content: String,
    pub metadata: Metadata,
}

/// Concatenated retrieved content for a language model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextBlock {
    pub text: String,
    /// Documents that made it into `text`, best first
    pub doc_ids: Vec<String>,
    pub truncated: bool,
}

/// Grounded answer from the language model
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub context_doc_ids: Vec<String>,
    pub response: String,
}

/// Coordinator statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieverStats {
    pub active_strategy: Option<String>,
    pub store: StoreStats,
    pub indexed_vectors: BTreeMap<String, usize>,
    pub embedding_cache_entries: usize,
}

/// Retrieval pipeline over one project's store
#[derive(Clone)]
pub struct Retriever {
    vectorizer: Arc<Vectorizer>,
    store: Arc<DocumentStore>,
    index: Arc<SimilarityIndex>,
    embed_slots: Arc<Semaphore>,
    /// Shared by document writes, exclusive for `clear`
    write_gate: Arc<RwLock<()>>,
    config: RetrievalConfig,
}

impl Retriever {
    /// Open the store at `path` and load every declared strategy's index
    pub fn open(
        path: impl AsRef<Path>,
        vectorizer: Vectorizer,
        config: RetrievalConfig,
    ) -> Result<Self> {
        let store = DocumentStore::open(path, vectorizer.registry().clone())?;
        let retriever = Self {
            vectorizer: Arc::new(vectorizer),
            store: Arc::new(store),
            index: Arc::new(SimilarityIndex::new()),
            embed_slots: Arc::new(Semaphore::new(config.max_concurrent_embeds.max(1))),
            write_gate: Arc::new(RwLock::new(())),
            config,
        };
        retriever.rebuild_all()?;
        Ok(retriever)
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn vectorizer(&self) -> &Vectorizer {
        &self.vectorizer
    }

    /// Embed off the async runtime, bounded by the configured timeout
    ///
    /// The slot stays taken until the blocking job returns, even when the
    /// caller has already given up on it.
    async fn embed_bounded(&self, text: String) -> Result<Embedding> {
        let permit = Arc::clone(&self.embed_slots)
            .acquire_owned()
            .await
            .map_err(|e| StoreError::embedding(e.to_string()))?;

        let vectorizer = Arc::clone(&self.vectorizer);
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            vectorizer.embed(&text)
        });

        match tokio::time::timeout(self.config.embed_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::embedding(format!(
                "embedding task failed: {}",
                join
            ))),
            Err(_) => Err(StoreError::EmbeddingTimeout(
                self.config.embed_timeout.as_millis() as u64,
            )),
        }
    }

    /// Store a document and mirror it into the index under its lock
    fn commit(&self, doc: Document) -> Result<Document> {
        let _gate = self.write_gate.read();
        let index = &self.index;
        let outcome = self.store.upsert_with(doc, |outcome| {
            let doc = &outcome.document;
            if let Some(prev) = outcome.previous_strategy.as_deref() {
                if prev != doc.strategy_id {
                    index.remove(&doc.doc_id, prev);
                }
            }
            index.upsert(&doc.doc_id, Arc::from(doc.embedding.as_slice()), &doc.strategy_id)
        })?;
        Ok(outcome.document)
    }

    /// received → vectorized → stored → indexed
    async fn index_one(&self, raw: RawDocument) -> Result<bool> {
        if raw.doc_id.is_empty() {
            return Err(StoreError::invalid_document("doc_id is empty"));
        }

        let embedding = self.embed_bounded(raw.content.clone()).await?;
        let truncated = embedding.truncated;
        let doc = Document::from_raw(raw, embedding);

        let this = self.clone();
        tokio::task::spawn_blocking(move || this.commit(doc))
            .await
            .map_err(|e| StoreError::embedding(format!("store task failed: {}", e)))??;

        Ok(truncated)
    }

    /// Vectorize, store and index a batch of documents
    ///
    /// Items fail individually and are reported in input order. The call as
    /// a whole fails only when no strategy is active.
    pub async fn index_documents(&self, items: Vec<RawDocument>) -> Result<IndexReport> {
        self.index_submitted(items.into_iter().map(Ok).collect())
            .await
    }

    /// Like `index_documents`, for items still in their JSON form
    ///
    /// An item that does not parse (missing fields, nested metadata) is
    /// reported as failed; the rest of the batch is indexed.
    pub async fn index_json_items(&self, items: Vec<serde_json::Value>) -> Result<IndexReport> {
        let submitted = items
            .iter()
            .enumerate()
            .map(|(position, value)| {
                RawDocument::from_json(value).map_err(|e| {
                    let doc_id = value
                        .get("doc_id")
                        .or_else(|| value.get("docId"))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("items[{}]", position));
                    (doc_id, e)
                })
            })
            .collect();
        self.index_submitted(submitted).await
    }

    async fn index_submitted(
        &self,
        items: Vec<std::result::Result<RawDocument, (String, StoreError)>>,
    ) -> Result<IndexReport> {
        let strategy = self.vectorizer.active_strategy_id()?.to_string();
        let total = items.len();

        let pending: Vec<(String, std::result::Result<JoinHandle<Result<bool>>, StoreError>)> = items
            .into_iter()
            .map(|item| match item {
                Ok(raw) => {
                    let doc_id = raw.doc_id.clone();
                    let this = self.clone();
                    (doc_id, Ok(tokio::spawn(async move { this.index_one(raw).await })))
                }
                Err((doc_id, e)) => (doc_id, Err(e)),
            })
            .collect();

        let mut report = IndexReport::default();
        for (doc_id, pending) in pending {
            let result = match pending {
                Ok(handle) => handle.await.unwrap_or_else(|e| {
                    Err(StoreError::embedding(format!("indexing task failed: {}", e)))
                }),
                Err(e) => Err(e),
            };
            match result {
                Ok(truncated) => {
                    report.indexed += 1;
                    if truncated {
                        report.truncated.push(doc_id);
                    }
                }
                Err(e) => {
                    log::warn!("Failed to index {}: {}", doc_id, e);
                    report.failed.push(FailedItem::new(doc_id, &e));
                }
            }
        }

        log::info!(
            "Indexed {}/{} documents under {} ({} failed)",
            report.indexed,
            total,
            strategy,
            report.failed.len()
        );
        Ok(report)
    }

    /// Rank stored documents against a query
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.vectorizer.active_strategy_id()?;
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embed_bounded(query.to_string()).await?;
        self.search_in_strategy(&embedding.vector, &embedding.strategy_id, top_k)
    }

    /// Rank one strategy's space against an already embedded query
    pub fn search_in_strategy(
        &self,
        vector: &[f32],
        strategy_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let ranked = self.index.query(vector, strategy_id, top_k);

        let mut hits = Vec::with_capacity(ranked.len());
        for scored in ranked {
            match self.store.get(&scored.doc_id) {
                Ok(Some(doc)) if doc.strategy_id == strategy_id => hits.push(SearchHit {
                    doc_id: scored.doc_id,
                    score: scored.score,
                    content: doc.content,
                    metadata: doc.metadata,
                }),
                // Replaced or deleted since ranking
                Ok(_) => continue,
                Err(StoreError::StaleStrategy { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(hits)
    }

    /// Retrieve and concatenate context within the configured budget
    pub async fn build_context(&self, query: &str, top_k: usize) -> Result<ContextBlock> {
        self.build_context_with_budget(query, top_k, self.config.context_char_budget)
            .await
    }

    /// Retrieve and concatenate context within `char_budget` characters
    pub async fn build_context_with_budget(
        &self,
        query: &str,
        top_k: usize,
        char_budget: usize,
    ) -> Result<ContextBlock> {
        let hits = self.search(query, top_k).await?;
        Ok(assemble_context(&hits, char_budget))
    }

    /// Answer a question grounded in retrieved context
    pub async fn query(
        &self,
        question: &str,
        top_k: usize,
        model: &dyn LanguageModel,
    ) -> Result<QueryAnswer> {
        let context = self.build_context(question, top_k).await?;
        let prompt = compose_prompt(&context.text, question);

        log::debug!(
            "Querying {} with {} context documents",
            model.name(),
            context.doc_ids.len()
        );
        let response = model.complete(&prompt).await?;

        Ok(QueryAnswer {
            context_doc_ids: context.doc_ids,
            response,
        })
    }

    /// Fetch one stored document
    pub fn get(&self, doc_id: &str) -> Result<Document> {
        self.store
            .get(doc_id)?
            .ok_or_else(|| StoreError::not_found(doc_id))
    }

    /// Delete a document from the store and the index
    pub fn delete(&self, doc_id: &str) -> Result<Document> {
        let _gate = self.write_gate.read();
        let index = &self.index;
        self.store
            .delete_with(doc_id, |prev| {
                index.remove(doc_id, &prev.strategy_id);
            })?
            .ok_or_else(|| StoreError::not_found(doc_id))
    }

    /// Remove every document; returns how many were removed
    pub fn clear(&self) -> Result<usize> {
        let _gate = self.write_gate.write();
        let removed = self.store.clear()?;
        self.index.clear();
        self.vectorizer.clear_cache();
        Ok(removed)
    }

    /// Reload one strategy's index from the store
    pub fn rebuild(&self, strategy_id: &str) -> Result<usize> {
        self.index.rebuild(&self.store, strategy_id)
    }

    /// Reload every declared strategy's index
    pub fn rebuild_all(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for strategy_id in self.vectorizer.registry().strategy_ids() {
            counts.insert(strategy_id.to_string(), self.rebuild(strategy_id)?);
        }
        Ok(counts)
    }

    /// Re-embed records of retired strategies under the active one
    pub async fn migrate_stale(&self) -> Result<IndexReport> {
        self.vectorizer.active_strategy_id()?;

        let mut items = Vec::new();
        for stale in self.store.stale_documents() {
            if let Some(doc) = self.store.get_stale(&stale.doc_id)? {
                items.push(doc.to_raw());
            }
        }
        if items.is_empty() {
            return Ok(IndexReport::default());
        }

        log::info!("Migrating {} stale documents", items.len());
        self.index_documents(items).await
    }

    pub fn stats(&self) -> Result<RetrieverStats> {
        let indexed_vectors = self
            .index
            .strategy_ids()
            .into_iter()
            .map(|id| {
                let count = self.index.len(&id);
                (id, count)
            })
            .collect();

        Ok(RetrieverStats {
            active_strategy: self.vectorizer.active_strategy_id().ok().map(str::to_string),
            store: self.store.stats()?,
            indexed_vectors,
            embedding_cache_entries: self.vectorizer.cache_size(),
        })
    }
}

/// Join hits into `Source:` blocks, cutting from the lowest-ranked end
///
/// Budgets count characters. A block that cannot keep at least one character
/// of content after its header is dropped rather than shortened.
pub fn assemble_context(hits: &[SearchHit], char_budget: usize) -> ContextBlock {
    struct Block {
        doc_id: String,
        header_chars: usize,
        text: String,
        chars: usize,
    }

    let mut blocks: Vec<Block> = hits
        .iter()
        .map(|hit| {
            let header = format!("Source: {}\n", hit.doc_id);
            let header_chars = header.chars().count();
            let text = header + &hit.content;
            let chars = text.chars().count();
            Block {
                doc_id: hit.doc_id.clone(),
                header_chars,
                text,
                chars,
            }
        })
        .collect();

    let separator_chars = CONTEXT_SEPARATOR.chars().count();
    let mut truncated = false;

    loop {
        let total = blocks.iter().map(|b| b.chars).sum::<usize>()
            + separator_chars * blocks.len().saturating_sub(1);
        if total <= char_budget {
            break;
        }
        truncated = true;

        let Some(last) = blocks.last_mut() else {
            break;
        };
        let excess = total - char_budget;
        if last.chars > excess && last.chars - excess > last.header_chars {
            let keep = last.chars - excess;
            if let Some((cut, _)) = last.text.char_indices().nth(keep) {
                last.text.truncate(cut);
            }
            last.chars = keep;
        } else {
            blocks.pop();
        }
    }

    ContextBlock {
        doc_ids: blocks.iter().map(|b| b.doc_id.clone()).collect(),
        text: blocks
            .into_iter()
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR),
        truncated,
    }
}
