//! Application-level document type.
//!
//! These types are what callers hand to the [`Indexer`](crate::Indexer) and
//! receive from the [`Retriever`](crate::Retriever). They are independent of
//! any store's native representation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Documents
// ============================================================================

/// A content-bearing record.
///
/// `id` may be empty when writing, in which case the store assigns one.
/// `score` and `vector` are only populated on documents read back from a
/// store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier.
    #[serde(default)]
    pub id: String,

    /// The embeddable text.
    pub content: String,

    /// Arbitrary metadata key-value pairs.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,

    /// Relevance score assigned by the store (higher is more similar).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,

    /// Stored dense vector, when the query asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f64>>,
}

impl Document {
    /// Create a new document.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the relevance score.
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    /// Set the dense vector.
    pub fn with_vector(mut self, vector: Vec<f64>) -> Self {
        self.vector = Some(vector);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
