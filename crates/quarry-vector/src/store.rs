//! Vector store client abstraction and store-native types.
//!
//! The pipeline talks to a vector database through [`VectorStoreClient`].
//! Write payloads and query results use Apache Arrow `RecordBatch`es as the
//! native column format; query vectors are [`NativeVector`]s. Every error a
//! client returns is treated as an opaque cause and wrapped by the caller.
//!
//! # Clients
//!
//! - [`MemoryStore`](crate::MemoryStore): in-process store, always available
//! - `LancedbStore`: LanceDB tables (requires `store-lancedb` feature)

use arrow_array::{Array, ArrayRef, RecordBatch, StringArray};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use quarry_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Collections
// ============================================================================

/// Schema of a collection: Arrow fields plus the roles of key columns.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    /// Arrow schema of every row written to the collection.
    pub fields: SchemaRef,
    /// Primary key column (Utf8).
    pub id_field: String,
    /// Default vector column (`FixedSizeList<Float32>`).
    pub vector_field: String,
}

/// Request to create a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateCollectionRequest {
    /// Collection name.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Vector dimension.
    pub dimension: i32,
    /// Collection schema.
    pub schema: CollectionSchema,
}

/// Outcome of an insert or upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Number of rows written.
    pub count: usize,
    /// IDs of the written rows, in store order.
    pub ids: Vec<String>,
}

// ============================================================================
// Queries
// ============================================================================

/// A store-native query vector.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum NativeVector {
    /// Single-precision dense vector.
    Float32(Vec<f32>),
}

impl NativeVector {
    /// Number of components.
    pub fn dimension(&self) -> usize {
        match self {
            Self::Float32(v) => v.len(),
        }
    }

    /// The components as `f32`.
    pub fn as_f32(&self) -> &[f32] {
        match self {
            Self::Float32(v) => v,
        }
    }
}

/// A plain similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Target collection.
    pub collection: String,
    /// Vector column to search.
    pub vector_field: String,
    /// One result set is returned per query vector.
    pub vectors: Vec<NativeVector>,
    /// Maximum rows per result set.
    pub limit: usize,
    /// Filter expression.
    pub filter: Option<String>,
    /// Rows scoring below this are dropped.
    pub score_threshold: Option<f32>,
    /// Columns to return; empty returns every column.
    pub output_fields: Vec<String>,
    /// Store-specific search parameters.
    pub search_params: HashMap<String, String>,
}

/// One ANN leg of a hybrid search.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnRequest {
    /// Vector column to search.
    pub vector_field: String,
    /// Query vectors.
    pub vectors: Vec<NativeVector>,
    /// Candidates taken from this leg.
    pub limit: usize,
    /// Filter expression, possibly containing `{name}` placeholders.
    pub filter: Option<String>,
    /// Values substituted into filter placeholders.
    pub template_params: HashMap<String, serde_json::Value>,
    /// Column whose value groups the candidates.
    pub group_by_field: Option<String>,
    /// Candidates kept per group; 0 means the store default.
    pub group_size: usize,
    /// Require every group to be filled to `group_size`.
    pub strict_group_size: bool,
    /// Candidates skipped from the top of this leg.
    pub offset: usize,
    /// Skip rows that are not yet flushed to sealed segments.
    pub ignore_growing: bool,
    /// Store-specific search parameters.
    pub search_params: HashMap<String, String>,
}

/// How hybrid legs are merged.
#[derive(Debug, Clone, PartialEq)]
pub enum Reranker {
    /// Reciprocal rank fusion with constant `k`.
    Rrf {
        /// Smoothing constant; larger values flatten rank differences.
        k: u32,
    },
    /// Weighted sum of per-leg scores, one weight per leg.
    Weighted(Vec<f32>),
}

impl Default for Reranker {
    fn default() -> Self {
        Self::Rrf { k: 60 }
    }
}

/// A multi-leg hybrid search.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchRequest {
    /// Target collection.
    pub collection: String,
    /// ANN legs.
    pub requests: Vec<AnnRequest>,
    /// Merge strategy.
    pub reranker: Reranker,
    /// Maximum rows after merging.
    pub limit: usize,
    /// Columns to return; empty returns every column.
    pub output_fields: Vec<String>,
}

/// Rows returned for one query vector, with their scores.
#[derive(Debug, Clone)]
pub struct ResultSet {
    /// Returned rows, best first.
    pub rows: RecordBatch,
    /// One score per row (higher is more similar).
    pub scores: Vec<f32>,
}

impl ResultSet {
    /// Create a result set.
    pub fn new(rows: RecordBatch, scores: Vec<f32>) -> Self {
        Self { rows, scores }
    }

    /// An empty result set with the given schema.
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            rows: RecordBatch::new_empty(schema),
            scores: Vec::new(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.num_rows()
    }

    /// Whether no rows matched.
    pub fn is_empty(&self) -> bool {
        self.rows.num_rows() == 0
    }
}

// ============================================================================
// Client trait
// ============================================================================

/// Operations the pipeline needs from a vector database.
///
/// Implementations must be safe for concurrent use; the pipeline shares one
/// client between indexers and retrievers.
#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    /// Whether a collection with this name exists.
    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Create a collection.
    async fn create_collection(&self, request: CreateCollectionRequest) -> Result<()>;

    /// Make a freshly created collection queryable.
    ///
    /// Default implementation does nothing, for stores that serve queries
    /// immediately after creation.
    async fn load_collection(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Append rows. Rows with an empty ID get a store-assigned one.
    async fn insert(&self, collection: &str, rows: RecordBatch) -> Result<WriteResult>;

    /// Insert rows, replacing existing rows that share an ID.
    async fn upsert(&self, collection: &str, rows: RecordBatch) -> Result<WriteResult>;

    /// Plain similarity search.
    async fn search(&self, request: SearchRequest) -> Result<Vec<ResultSet>>;

    /// Multi-leg search merged by a reranker.
    async fn hybrid_search(&self, request: HybridSearchRequest) -> Result<Vec<ResultSet>>;

    /// The client name for diagnostics and callback run info.
    fn name(&self) -> &str;
}

// ============================================================================
// Helpers shared by client implementations
// ============================================================================

/// Replace empty IDs in `id_field` with generated UUIDs.
///
/// Returns the (possibly rebuilt) batch and the final IDs in row order.
pub fn assign_missing_ids(rows: RecordBatch, id_field: &str) -> Result<(RecordBatch, Vec<String>)> {
    let index = rows
        .schema()
        .index_of(id_field)
        .map_err(|_| Error::operation(format!("missing '{id_field}' column")))?;
    let column = rows
        .column(index)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::operation(format!("'{id_field}' column is not StringArray")))?;

    let mut generated = false;
    let ids: Vec<String> = (0..column.len())
        .map(|i| {
            if column.is_null(i) || column.value(i).is_empty() {
                generated = true;
                uuid::Uuid::new_v4().to_string()
            } else {
                column.value(i).to_string()
            }
        })
        .collect();

    if !generated {
        return Ok((rows, ids));
    }

    let mut columns: Vec<ArrayRef> = rows.columns().to_vec();
    columns[index] = Arc::new(StringArray::from(ids.clone()));
    let rebuilt = RecordBatch::try_new(rows.schema(), columns)
        .map_err(|e| Error::operation(format!("Failed to assign IDs: {e}")))?;
    Ok((rebuilt, ids))
}

/// Substitute `{name}` placeholders in a filter expression.
///
/// String values are single-quoted with embedded quotes doubled; other JSON
/// values are inserted in their JSON form.
pub fn render_filter(filter: &str, params: &HashMap<String, serde_json::Value>) -> String {
    let mut rendered = filter.to_string();
    for (name, value) in params {
        let literal = match value {
            serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            other => other.to_string(),
        };
        rendered = rendered.replace(&format!("{{{name}}}"), &literal);
    }
    rendered
}

/// Keep at most `group_size` hits per group value, preserving rank order.
pub fn limit_groups<T>(hits: Vec<(T, Option<String>)>, group_size: usize) -> Vec<T> {
    let per_group = group_size.max(1);
    let mut seen: HashMap<Option<String>, usize> = HashMap::new();
    hits.into_iter()
        .filter_map(|(hit, group)| {
            let count = seen.entry(group).or_insert(0);
            if *count < per_group {
                *count += 1;
                Some(hit)
            } else {
                None
            }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
