//! Conversion between documents and the store's native columns.
//!
//! A [`DocumentConverter`] owns the collection schema: it describes the
//! columns, turns documents plus their vectors into a `RecordBatch` for
//! writing, and turns query [`ResultSet`]s back into documents. A
//! [`VectorConverter`] turns query embeddings into [`NativeVector`]s.
//!
//! # Default schema
//!
//! | Column | Type | Purpose |
//! |--------|------|---------|
//! | `id` | Utf8 | Document identifier |
//! | `content` | Utf8 | Embedded text |
//! | `metadata` | Utf8 | JSON object, one entry per metadata key |
//! | `vector` | FixedSizeList<Float32> | Embedding vector |

use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use quarry_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::codec;
use crate::store::{CollectionSchema, NativeVector, ResultSet};
use crate::types::Document;

/// Identifier column of the default schema.
pub const ID_FIELD: &str = "id";
/// Content column of the default schema.
pub const CONTENT_FIELD: &str = "content";
/// Metadata column of the default schema.
pub const METADATA_FIELD: &str = "metadata";
/// Vector column of the default schema.
pub const VECTOR_FIELD: &str = "vector";

/// Maps documents to native columns and native results back to documents.
pub trait DocumentConverter: Send + Sync {
    /// The collection schema for vectors of `dimension` components.
    fn schema(&self, dimension: i32) -> CollectionSchema;

    /// Build the write payload for `documents`, pairing each with the vector
    /// at the same position.
    fn to_columns(
        &self,
        documents: &[Document],
        dimension: i32,
        vectors: &[Vec<f64>],
    ) -> Result<RecordBatch>;

    /// Turn query results into documents, preserving result order.
    fn from_results(&self, results: &[ResultSet]) -> Result<Vec<Document>>;
}

/// Maps query embeddings to store-native vectors.
pub trait VectorConverter: Send + Sync {
    /// Convert each vector, preserving order.
    fn convert(&self, vectors: &[Vec<f64>]) -> Result<Vec<NativeVector>>;
}

// ============================================================================
// Defaults
// ============================================================================

/// Converter for the default four-column schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDocumentConverter;

/// Narrows query vectors to [`NativeVector::Float32`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVectorConverter;

/// Create the Arrow schema of the default collection layout.
pub fn default_schema(dimension: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(ID_FIELD, DataType::Utf8, false),
        Field::new(CONTENT_FIELD, DataType::Utf8, false),
        Field::new(METADATA_FIELD, DataType::Utf8, false),
        Field::new(
            VECTOR_FIELD,
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension,
            ),
            false,
        ),
    ]))
}

impl DocumentConverter for DefaultDocumentConverter {
    fn schema(&self, dimension: i32) -> CollectionSchema {
        CollectionSchema {
            fields: default_schema(dimension),
            id_field: ID_FIELD.to_string(),
            vector_field: VECTOR_FIELD.to_string(),
        }
    }

    fn to_columns(
        &self,
        documents: &[Document],
        dimension: i32,
        vectors: &[Vec<f64>],
    ) -> Result<RecordBatch> {
        if documents.len() != vectors.len() {
            return Err(Error::operation(format!(
                "got {} vectors for {} documents",
                vectors.len(),
                documents.len()
            )));
        }
        let dim = usize::try_from(dimension)
            .map_err(|_| Error::operation(format!("invalid vector dimension {dimension}")))?;

        let mut values: Vec<f32> = Vec::with_capacity(documents.len() * dim);
        for (doc, vector) in documents.iter().zip(vectors) {
            if vector.len() != dim {
                return Err(Error::operation(format!(
                    "vector for document '{}' has dimension {}, expected {dim}",
                    doc.id,
                    vector.len()
                )));
            }
            codec::narrow_into(vector, &mut values)?;
        }

        let ids: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        let contents: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let metadata = documents
            .iter()
            .map(|d| serde_json::to_string(&d.metadata))
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let vector_array = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            dimension,
            Arc::new(Float32Array::from(values)),
            None,
        )
        .map_err(|e| Error::operation(format!("Failed to create vector array: {e}")))?;

        RecordBatch::try_new(
            default_schema(dimension),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(vector_array),
            ],
        )
        .map_err(|e| Error::operation(format!("Failed to create RecordBatch: {e}")))
    }

    fn from_results(&self, results: &[ResultSet]) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for result in results {
            documents.extend(parse_result_set(result)?);
        }
        Ok(documents)
    }
}

impl VectorConverter for DefaultVectorConverter {
    fn convert(&self, vectors: &[Vec<f64>]) -> Result<Vec<NativeVector>> {
        vectors
            .iter()
            .map(|v| codec::narrow(v).map(NativeVector::Float32))
            .collect()
    }
}

// ============================================================================
// Result parsing
// ============================================================================

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<Option<&'a StringArray>> {
    match batch.column_by_name(name) {
        None => Ok(None),
        Some(col) => col
            .as_any()
            .downcast_ref::<StringArray>()
            .map(Some)
            .ok_or_else(|| Error::operation(format!("'{name}' column is not StringArray"))),
    }
}

fn parse_result_set(result: &ResultSet) -> Result<Vec<Document>> {
    let batch = &result.rows;
    let id_col = string_column(batch, ID_FIELD)?
        .ok_or_else(|| Error::operation(format!("Missing '{ID_FIELD}' column in results")))?;
    let content_col = string_column(batch, CONTENT_FIELD)?;
    let metadata_col = string_column(batch, METADATA_FIELD)?;
    let vector_col = batch
        .column_by_name(VECTOR_FIELD)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

    let mut documents = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if id_col.is_null(i) {
            return Err(Error::operation(format!("row {i} has a null '{ID_FIELD}'")));
        }
        let id = id_col.value(i).to_string();

        let content = content_col
            .filter(|c| !c.is_null(i))
            .map(|c| c.value(i).to_string())
            .unwrap_or_default();

        let metadata = match metadata_col.filter(|c| !c.is_null(i)) {
            Some(col) if !col.value(i).is_empty() => {
                serde_json::from_str::<HashMap<String, Value>>(col.value(i)).map_err(|e| {
                    Error::operation(format!("metadata of document '{id}' is not a JSON object: {e}"))
                })?
            }
            _ => HashMap::new(),
        };

        let vector = match vector_col {
            Some(list) if !list.is_null(i) => {
                let row = list.value(i);
                let values = row
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .ok_or_else(|| Error::operation(format!("'{VECTOR_FIELD}' items are not Float32")))?;
                Some(codec::widen(values.values()))
            }
            _ => None,
        };

        documents.push(Document {
            id,
            content,
            metadata,
            score: result.scores.get(i).copied(),
            vector,
        });
    }

    Ok(documents)
}

// ============================================================================
// Tests
// ============================================================================
