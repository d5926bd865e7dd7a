//! Document types
//!
//! Core types for representing indexed documents and their metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;
use crate::error::{Result, StoreError};

/// Scalar metadata value
///
/// Metadata is deliberately closed: string keys map to one of these scalars,
/// never to nested structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Convert from an arbitrary JSON value, rejecting non-scalars
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Borrow the text payload, if this is a text value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Values above `i64::MAX` become floats and may lose precision
impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(v) => Self::Integer(v),
            Err(_) => Self::Float(value as f64),
        }
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Ordered metadata mapping
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A document as submitted for indexing, before vectorization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub doc_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RawDocument {
    pub fn new(doc_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Parse one submitted JSON item, naming the first problem found
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        let Some(object) = value.as_object() else {
            return Err(StoreError::invalid_document("item is not an object"));
        };
        let doc_id = match object.get("doc_id").or_else(|| object.get("docId")) {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(StoreError::invalid_document("doc_id must be a string")),
        };
        let content = match object.get("content") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(StoreError::invalid_document("content must be a string")),
        };

        let mut metadata = Metadata::new();
        match object.get("metadata") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (key, v) in map {
                    let v = MetadataValue::from_json(v).ok_or_else(|| {
                        StoreError::invalid_document(format!(
                            "metadata '{}' must be a string, number or boolean",
                            key
                        ))
                    })?;
                    metadata.insert(key.clone(), v);
                }
            }
            Some(_) => return Err(StoreError::invalid_document("metadata must be an object")),
        }

        Ok(Self {
            doc_id,
            content,
            metadata,
        })
    }

    /// Add one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A stored document: content, metadata and the embedding that represents it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier within a store
    pub doc_id: String,
    /// Full text
    pub content: String,
    /// Scalar metadata (path, size, ...)
    #[serde(default)]
    pub metadata: Metadata,
    /// Embedding vector, unit length when produced by the vectorizer
    pub embedding: Vec<f32>,
    /// Strategy that produced `embedding`
    pub strategy_id: String,
    /// Declared dimension of `strategy_id`
    pub dimension: usize,
    /// Wall-clock time of the last write
    pub updated_at: DateTime<Utc>,
    /// Logical write clock, strictly increasing per store
    #[serde(default)]
    pub revision: u64,
}

impl Document {
    /// Assemble a document from raw input and its embedding
    ///
    /// `updated_at` and `revision` are stamped again by the store on write.
    pub fn from_raw(raw: RawDocument, embedding: Embedding) -> Self {
        let dimension = embedding.vector.len();
        Self {
            doc_id: raw.doc_id,
            content: raw.content,
            metadata: raw.metadata,
            embedding: embedding.vector,
            strategy_id: embedding.strategy_id,
            dimension,
            updated_at: Utc::now(),
            revision: 0,
        }
    }

    /// Strip the embedding, keeping what a caller re-indexes from
    pub fn to_raw(&self) -> RawDocument {
        RawDocument {
            doc_id: self.doc_id.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_document_builder() {
        let raw = RawDocument::new("src/main.rs", "fn main() {}")
            .with_metadata("path", "src/main.rs")
            .with_metadata("size", 12_i64);

        assert_eq!(raw.metadata.len(), 2);
        assert_eq!(raw.metadata["path"].as_str(), Some("src/main.rs"));
        assert_eq!(raw.metadata["size"], MetadataValue::Integer(12));
    }

    #[test]
    fn test_metadata_from_json() {
        use serde_json::json;

        assert_eq!(
            MetadataValue::from_json(&json!("x")),
            Some(MetadataValue::Text("x".into()))
        );
        assert_eq!(
            MetadataValue::from_json(&json!(3)),
            Some(MetadataValue::Integer(3))
        );
        assert_eq!(
            MetadataValue::from_json(&json!(0.5)),
            Some(MetadataValue::Float(0.5))
        );
        assert_eq!(MetadataValue::from_json(&json!([1, 2])), None);
        assert_eq!(MetadataValue::from_json(&json!({"a": 1})), None);
    }

    #[test]
    fn test_raw_document_from_json() {
        use serde_json::json;

        let raw = RawDocument::from_json(&json!({
            "doc_id": "a.md",
            "content": "alpha",
            "metadata": {"lines": 3, "draft": true}
        }))
        .unwrap();
        assert_eq!(raw.metadata["lines"], MetadataValue::Integer(3));
        assert_eq!(raw.metadata["draft"], MetadataValue::Bool(true));

        let err = RawDocument::from_json(&json!({
            "doc_id": "b.md",
            "content": "beta",
            "metadata": {"tags": ["x"]}
        }))
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
        assert!(err.to_string().contains("tags"));

        assert!(RawDocument::from_json(&json!({"doc_id": "c.md"})).is_err());
        assert!(RawDocument::from_json(&json!("just text")).is_err());
    }

    #[test]
    fn test_large_u64_becomes_float() {
        assert_eq!(MetadataValue::from(7_u64), MetadataValue::Integer(7));
        assert_eq!(
            MetadataValue::from(u64::MAX),
            MetadataValue::Float(u64::MAX as f64)
        );
    }

    #[test]
    fn test_metadata_json_is_untagged() {
        let raw = RawDocument::new("a", "b")
            .with_metadata("ext", ".py")
            .with_metadata("lines", 4_i64);
        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(json["metadata"]["ext"], ".py");
        assert_eq!(json["metadata"]["lines"], 4);
    }

    #[test]
    fn test_from_raw_sets_dimension() {
        let embedding = Embedding {
            vector: vec![0.6, 0.8],
            strategy_id: "test/v1".to_string(),
            truncated: false,
        };
        let doc = Document::from_raw(RawDocument::new("a", "hello"), embedding);
        assert_eq!(doc.dimension, 2);
        assert_eq!(doc.strategy_id, "test/v1");
        assert_eq!(doc.to_raw(), RawDocument::new("a", "hello"));
    }
}
