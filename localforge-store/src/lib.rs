//! LocalForge Store
//!
//! Local vector store and retrieval pipeline: text goes in, embeddings are
//! persisted next to their source, and similarity queries come back ranked
//! and ready to ground a language model.
//!
//! ## Features
//!
//! - **Strategy-scoped embeddings** - Every vector is tagged with the strategy that produced it
//! - **Hashing fallback** - Deterministic term hashing when the transformer model is unavailable
//! - **Exact ranking** - Linear cosine scan with a deterministic `doc_id` tie-break
//! - **RocksDB persistence** - Synced writes; the index is rebuilt from disk at any time
//!
//! ## Example
//!
//! ```ignore
//! use localforge_store::{RawDocument, RetrievalConfig, Retriever, Vectorizer, VectorizerConfig};
//!
//! let vectorizer = Vectorizer::from_config(&VectorizerConfig::default())?;
//! let retriever = Retriever::open(&db_path, vectorizer, RetrievalConfig::default())?;
//!
//! let report = retriever
//!     .index_documents(vec![RawDocument::new("README.md", readme)])
//!     .await?;
//! let hits = retriever.search("how do I install it", 5).await?;
//! ```

pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
mod migration;
pub mod retrieval;
pub mod storage;

// Re-exports for convenience
pub use document::{Document, Metadata, MetadataValue, RawDocument};
pub use embedding::{
    Embedder, Embedding, StrategyChoice, StrategyRegistry, StrategySpec, Vectorizer,
    VectorizerConfig,
};
pub use error::{Result, StoreError};
pub use index::{ScoredDoc, SimilarityIndex};
pub use llm::{compose_prompt, LanguageModel};
pub use retrieval::{
    assemble_context, ContextBlock, IndexReport, QueryAnswer, RetrievalConfig, Retriever,
    RetrieverStats, SearchHit,
};
pub use storage::{BatchReport, DocumentStore, FailedItem, StaleDocument, StoreStats};
