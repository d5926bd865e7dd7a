//! Error types for localforge-store

use thiserror::Error;

/// Errors that can occur in the vector store and retrieval pipeline
#[derive(Debug, Error)]
pub enum StoreError {
    /// Embedding length disagrees with the declared dimension of its strategy
    #[error("Dimension mismatch for strategy '{strategy_id}': expected {expected}, got {actual}")]
    DimensionMismatch {
        strategy_id: String,
        expected: usize,
        actual: usize,
    },

    /// The vectorizer has no usable strategy
    #[error("No active embedding strategy configured")]
    NoActiveStrategy,

    /// A single embedding call exceeded its time budget
    #[error("Embedding timed out after {0} ms")]
    EmbeddingTimeout(u64),

    /// Document not found
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Durable write or read failure (RocksDB)
    #[error("Store I/O failure: {0}")]
    StoreIo(#[from] rocksdb::Error),

    /// Strategy not declared by the current vectorizer configuration
    #[error("Unknown embedding strategy: {0}")]
    UnknownStrategy(String),

    /// Record embedded under a strategy that is no longer configured
    #[error("Document '{doc_id}' was embedded under retired strategy '{strategy_id}'")]
    StaleStrategy { doc_id: String, strategy_id: String },

    /// Input rejected before any side effect
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Record encoding error (MessagePack)
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Record decoding error (MessagePack)
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Model loading error
    #[error("Model error: {0}")]
    Model(String),

    /// Embedding generation error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Language-model collaborator error
    #[error("Language model error: {0}")]
    LanguageModel(String),

    /// On-disk schema problem
    #[error("Schema error: {0}")]
    Schema(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create an invalid document error
    pub fn invalid_document(msg: impl Into<String>) -> Self {
        Self::InvalidDocument(msg.into())
    }

    /// Create a language model error
    pub fn language_model(msg: impl Into<String>) -> Self {
        Self::LanguageModel(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Whether the caller may retry the same item unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingTimeout(_) | Self::StoreIo(_) | Self::Io(_))
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_display() {
        let err = StoreError::DimensionMismatch {
            strategy_id: "hash-tf-512/v1".to_string(),
            expected: 512,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch for strategy 'hash-tf-512/v1': expected 512, got 3"
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(StoreError::EmbeddingTimeout(100).is_retryable());
        assert!(!StoreError::NoActiveStrategy.is_retryable());
        assert!(!StoreError::not_found("a").is_retryable());
    }
}
