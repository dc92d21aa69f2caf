//! In-process vector store.
//!
//! [`MemoryStore`] keeps every collection in memory and answers queries by
//! brute-force L2 distance, scored as `1 / (1 + distance)` like the LanceDB
//! client. It suits tests, examples and small corpora.
//!
//! # Filters
//!
//! Filter expressions are conjunctions of equality tests:
//!
//! ```text
//! id = 'doc1' AND metadata.lang != 'de' AND metadata.year == 2024
//! ```
//!
//! `field` names a column; `column.key` looks `key` up in a JSON-object
//! column such as `metadata`. Literals are single-quoted strings (with `''`
//! for a quote), numbers or booleans.

use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Float32Array, Float64Array, Int32Array, Int64Array,
    RecordBatch, StringArray,
};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use quarry_core::{Error, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock, RwLock};

use crate::rerank::{self, RankedList};
use crate::store::{
    AnnRequest, CollectionSchema, CreateCollectionRequest, HybridSearchRequest, NativeVector,
    ResultSet, SearchRequest, VectorStoreClient, WriteResult, assign_missing_ids, limit_groups,
    render_filter,
};

static CLAUSE: LazyLock<Result<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)(?:\.([A-Za-z0-9_]+))?\s*(==|!=|=)\s*(.+?)\s*$")
        .map_err(|e| Error::operation(format!("invalid filter grammar: {e}")))
});

static AND: LazyLock<Result<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+and\s+").map_err(|e| Error::operation(format!("invalid filter grammar: {e}")))
});

fn grammar(re: &'static LazyLock<Result<Regex>>) -> Result<&'static Regex> {
    re.as_ref()
        .map_err(|e| Error::operation(e.to_string()))
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    column: String,
    key: Option<String>,
    negated: bool,
    literal: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    fn parse(expr: Option<&str>) -> Result<Self> {
        let Some(expr) = expr.map(str::trim).filter(|e| !e.is_empty()) else {
            return Ok(Self::default());
        };

        let clause_re = grammar(&CLAUSE)?;
        let clauses = split_clauses(expr, grammar(&AND)?)
            .into_iter()
            .map(|part| -> Result<Clause> {
                let caps = clause_re
                    .captures(part)
                    .ok_or_else(|| Error::operation(format!("unsupported filter clause: '{part}'")))?;
                Ok(Clause {
                    column: caps[1].to_string(),
                    key: caps.get(2).map(|m| m.as_str().to_string()),
                    negated: &caps[3] == "!=",
                    literal: parse_literal(&caps[4])?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { clauses })
    }

    fn matches(&self, row: &RecordBatch) -> Result<bool> {
        for clause in &self.clauses {
            let value = row_value(row, &clause.column, clause.key.as_deref())?;
            let equal = value.as_ref().is_some_and(|v| values_equal(v, &clause.literal));
            if equal == clause.negated {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Split `expr` at `AND` keywords that are outside single-quoted literals.
fn split_clauses<'a>(expr: &'a str, and: &Regex) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for m in and.find_iter(expr) {
        // an odd quote count before the keyword means it sits inside a literal
        let quoted = expr[start..m.start()].matches('\'').count() % 2 == 1;
        if !quoted {
            parts.push(&expr[start..m.start()]);
            start = m.end();
        }
    }
    parts.push(&expr[start..]);
    parts
}

fn parse_literal(raw: &str) -> Result<Value> {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Ok(Value::String(raw[1..raw.len() - 1].replace("''", "'")));
    }
    serde_json::from_str(raw)
        .map_err(|_| Error::operation(format!("unsupported filter literal: {raw}")))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// The value of `column` (or of `key` inside a JSON-object column) in the
/// first row of `row`.
fn row_value(row: &RecordBatch, column: &str, key: Option<&str>) -> Result<Option<Value>> {
    let array = row
        .column_by_name(column)
        .ok_or_else(|| Error::operation(format!("unknown filter field '{column}'")))?;
    if array.is_null(0) {
        return Ok(None);
    }

    let any = array.as_any();
    let value = if let Some(a) = any.downcast_ref::<StringArray>() {
        Value::String(a.value(0).to_string())
    } else if let Some(a) = any.downcast_ref::<Int64Array>() {
        Value::from(a.value(0))
    } else if let Some(a) = any.downcast_ref::<Int32Array>() {
        Value::from(a.value(0))
    } else if let Some(a) = any.downcast_ref::<Float64Array>() {
        Value::from(a.value(0))
    } else if let Some(a) = any.downcast_ref::<Float32Array>() {
        Value::from(f64::from(a.value(0)))
    } else if let Some(a) = any.downcast_ref::<BooleanArray>() {
        Value::Bool(a.value(0))
    } else {
        return Err(Error::operation(format!(
            "field '{column}' of type {} cannot be filtered",
            array.data_type()
        )));
    };

    match key {
        None => Ok(Some(value)),
        Some(key) => {
            let Value::String(json) = value else {
                return Err(Error::operation(format!("field '{column}' is not a JSON column")));
            };
            let mut object: HashMap<String, Value> = serde_json::from_str(&json)?;
            Ok(object.remove(key))
        }
    }
}

fn group_value(row: &RecordBatch, field: &str) -> Result<Option<String>> {
    let (column, key) = match field.split_once('.') {
        Some((column, key)) => (column, Some(key)),
        None => (field, None),
    };
    Ok(row_value(row, column, key)?.map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    }))
}

// ============================================================================
// Collections
// ============================================================================

struct StoredRow {
    id: String,
    row: RecordBatch,
    vector: Vec<f32>,
}

struct MemoryCollection {
    schema: CollectionSchema,
    dimension: usize,
    rows: Vec<StoredRow>,
}

impl MemoryCollection {
    fn split_rows(&self, rows: RecordBatch) -> Result<Vec<StoredRow>> {
        if rows.schema().fields() != self.schema.fields.fields() {
            return Err(Error::operation(format!(
                "rows do not match the collection schema: got {:?}",
                rows.schema()
            )));
        }
        let (rows, ids) = assign_missing_ids(rows, &self.schema.id_field)?;

        let field = &self.schema.vector_field;
        let list = rows
            .column_by_name(field)
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| Error::operation(format!("'{field}' column is not FixedSizeList")))?;

        ids.into_iter()
            .enumerate()
            .map(|(i, id)| {
                if list.is_null(i) {
                    return Err(Error::operation(format!("row '{id}' has no vector")));
                }
                let values = list.value(i);
                let values = values
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .ok_or_else(|| Error::operation(format!("'{field}' items are not Float32")))?;
                Ok(StoredRow {
                    id,
                    row: rows.slice(i, 1),
                    vector: values.values().to_vec(),
                })
            })
            .collect()
    }

    /// Rows matching `filter`, scored against `query`, best first.
    fn rank(&self, vector_field: &str, query: &NativeVector, filter: &Filter) -> Result<Vec<(usize, f32)>> {
        if vector_field != self.schema.vector_field {
            return Err(Error::operation(format!("unknown vector field '{vector_field}'")));
        }
        let query = query.as_f32();
        if query.len() != self.dimension {
            return Err(Error::operation(format!(
                "query vector has dimension {}, collection expects {}",
                query.len(),
                self.dimension
            )));
        }

        let mut hits = Vec::new();
        for (index, stored) in self.rows.iter().enumerate() {
            if filter.matches(&stored.row)? {
                hits.push((index, score(query, &stored.vector)));
            }
        }
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }

    fn output_schema(&self, output_fields: &[String]) -> Result<(SchemaRef, Option<Vec<usize>>)> {
        if output_fields.is_empty() {
            return Ok((self.schema.fields.clone(), None));
        }
        let indices = output_fields
            .iter()
            .map(|f| {
                self.schema
                    .fields
                    .index_of(f)
                    .map_err(|_| Error::operation(format!("unknown output field '{f}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        let schema = self
            .schema
            .fields
            .project(&indices)
            .map_err(|e| Error::operation(format!("Failed to project schema: {e}")))?;
        Ok((Arc::new(schema), Some(indices)))
    }

    fn result_set(&self, hits: &[(usize, f32)], output_fields: &[String]) -> Result<ResultSet> {
        let (schema, indices) = self.output_schema(output_fields)?;
        let rows = hits
            .iter()
            .map(|(index, _)| match &indices {
                Some(indices) => self.rows[*index]
                    .row
                    .project(indices)
                    .map_err(|e| Error::operation(format!("Failed to project row: {e}"))),
                None => Ok(self.rows[*index].row.clone()),
            })
            .collect::<Result<Vec<_>>>()?;

        let batch = arrow_select::concat::concat_batches(&schema, &rows)
            .map_err(|e| Error::operation(format!("Failed to concatenate rows: {e}")))?;
        Ok(ResultSet::new(batch, hits.iter().map(|(_, s)| *s).collect()))
    }

    fn ann_leg(&self, leg: &AnnRequest, query: &NativeVector) -> Result<RankedList<usize>> {
        let rendered = leg
            .filter
            .as_deref()
            .map(|f| render_filter(f, &leg.template_params));
        let filter = Filter::parse(rendered.as_deref())?;
        if leg.strict_group_size || leg.ignore_growing || !leg.search_params.is_empty() {
            log::debug!("memory store ignores strict grouping, growing segments and search params");
        }

        let hits = self.rank(&leg.vector_field, query, &filter)?;
        let hits: Vec<(usize, f32)> = hits.into_iter().skip(leg.offset).collect();
        let mut hits = match &leg.group_by_field {
            Some(field) => {
                let grouped = hits
                    .into_iter()
                    .map(|hit| -> Result<_> { Ok((hit, group_value(&self.rows[hit.0].row, field)?)) })
                    .collect::<Result<Vec<_>>>()?;
                limit_groups(grouped, leg.group_size)
            }
            None => hits,
        };
        hits.truncate(leg.limit);
        Ok(hits)
    }
}

fn score(a: &[f32], b: &[f32]) -> f32 {
    let distance = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt();
    1.0 / (1.0 + distance)
}

// ============================================================================
// Store
// ============================================================================

/// Vector store client keeping collections in process memory.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in `collection`, if it exists.
    pub fn count(&self, collection: &str) -> Result<Option<usize>> {
        Ok(self.read()?.get(collection).map(|c| c.rows.len()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, MemoryCollection>>> {
        self.collections
            .read()
            .map_err(|e| Error::operation(format!("RwLock poisoned: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, MemoryCollection>>> {
        self.collections
            .write()
            .map_err(|e| Error::operation(format!("RwLock poisoned: {e}")))
    }

    fn store_rows(&self, collection: &str, rows: RecordBatch, replace: bool) -> Result<WriteResult> {
        let mut collections = self.write()?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Error::operation(format!("collection '{collection}' not found")))?;

        let incoming = target.split_rows(rows)?;
        let mut positions: HashMap<String, usize> = target
            .rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();

        if !replace {
            let mut batch_ids = HashSet::with_capacity(incoming.len());
            if let Some(dup) = incoming
                .iter()
                .find(|r| positions.contains_key(&r.id) || !batch_ids.insert(r.id.as_str()))
            {
                return Err(Error::operation(format!("duplicate id '{}'", dup.id)));
            }
        }

        let mut ids = Vec::with_capacity(incoming.len());
        for row in incoming {
            ids.push(row.id.clone());
            match positions.get(&row.id) {
                Some(&index) => target.rows[index] = row,
                None => {
                    positions.insert(row.id.clone(), target.rows.len());
                    target.rows.push(row);
                }
            }
        }

        Ok(WriteResult {
            count: ids.len(),
            ids,
        })
    }
}

#[async_trait]
impl VectorStoreClient for MemoryStore {
    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(name))
    }

    async fn create_collection(&self, request: CreateCollectionRequest) -> Result<()> {
        let dimension = usize::try_from(request.dimension)
            .ok()
            .filter(|d| *d > 0)
            .ok_or_else(|| Error::operation(format!("invalid dimension {}", request.dimension)))?;

        let mut collections = self.write()?;
        if collections.contains_key(&request.name) {
            return Err(Error::operation(format!(
                "collection '{}' already exists",
                request.name
            )));
        }
        collections.insert(
            request.name,
            MemoryCollection {
                schema: request.schema,
                dimension,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn load_collection(&self, name: &str) -> Result<()> {
        if self.read()?.contains_key(name) {
            Ok(())
        } else {
            Err(Error::operation(format!("collection '{name}' not found")))
        }
    }

    async fn insert(&self, collection: &str, rows: RecordBatch) -> Result<WriteResult> {
        self.store_rows(collection, rows, false)
    }

    async fn upsert(&self, collection: &str, rows: RecordBatch) -> Result<WriteResult> {
        self.store_rows(collection, rows, true)
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<ResultSet>> {
        let collections = self.read()?;
        let target = collections
            .get(&request.collection)
            .ok_or_else(|| Error::operation(format!("collection '{}' not found", request.collection)))?;
        let filter = Filter::parse(request.filter.as_deref())?;

        request
            .vectors
            .iter()
            .map(|query| {
                let mut hits = target.rank(&request.vector_field, query, &filter)?;
                if let Some(threshold) = request.score_threshold {
                    hits.retain(|(_, s)| *s >= threshold);
                }
                hits.truncate(request.limit);
                target.result_set(&hits, &request.output_fields)
            })
            .collect()
    }

    async fn hybrid_search(&self, request: HybridSearchRequest) -> Result<Vec<ResultSet>> {
        let collections = self.read()?;
        let target = collections
            .get(&request.collection)
            .ok_or_else(|| Error::operation(format!("collection '{}' not found", request.collection)))?;

        let queries = request.requests.first().map_or(0, |r| r.vectors.len());
        (0..queries)
            .map(|q| {
                let lists = request
                    .requests
                    .iter()
                    .map(|leg| {
                        let query = leg.vectors.get(q).ok_or_else(|| {
                            Error::operation("hybrid legs carry different numbers of vectors")
                        })?;
                        target.ann_leg(leg, query)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let fused = rerank::fuse(&lists, &request.reranker, request.limit)?;
                target.result_set(&fused, &request.output_fields)
            })
            .collect()
    }

    fn name(&self) -> &str {
        "Memory"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::converter::{DefaultDocumentConverter, DocumentConverter};
    use crate::embedding::MockEmbedder;
    use crate::hybrid::HybridSearchOption;
    use crate::indexer::{Indexer, IndexerConfig, StoreOptions};
    use crate::retriever::{RetrieveOptions, Retriever, RetrieverConfig};
    use crate::store::Reranker;
    use crate::types::Document;

    const DIM: i32 = 2;

    async fn store_with(docs: &[(&str, [f64; 2], &str)]) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_collection(CreateCollectionRequest {
                name: "docs".to_string(),
                description: String::new(),
                dimension: DIM,
                schema: DefaultDocumentConverter.schema(DIM),
            })
            .await
            .unwrap();

        let documents: Vec<Document> = docs
            .iter()
            .map(|(id, _, lang)| Document::new(*id, format!("content of {id}")).with_metadata("lang", *lang))
            .collect();
        let vectors: Vec<Vec<f64>> = docs.iter().map(|(_, v, _)| v.to_vec()).collect();
        let rows = DefaultDocumentConverter
            .to_columns(&documents, DIM, &vectors)
            .unwrap();
        store.insert("docs", rows).await.unwrap();
        store
    }

    fn search(vector: [f32; 2], limit: usize) -> SearchRequest {
        SearchRequest {
            collection: "docs".to_string(),
            vector_field: "vector".to_string(),
            vectors: vec![NativeVector::Float32(vector.to_vec())],
            limit,
            filter: None,
            score_threshold: None,
            output_fields: Vec::new(),
            search_params: HashMap::new(),
        }
    }

    fn leg(vector: [f32; 2], limit: usize) -> AnnRequest {
        HybridSearchOption::new("vector", limit)
            .to_ann_request(vec![NativeVector::Float32(vector.to_vec())], None)
    }

    fn ids(results: &ResultSet) -> Vec<String> {
        DefaultDocumentConverter
            .from_results(std::slice::from_ref(results))
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect()
    }

    fn corpus() -> Vec<(&'static str, [f64; 2], &'static str)> {
        vec![
            ("a", [0.0, 0.0], "en"),
            ("b", [1.0, 0.0], "de"),
            ("c", [0.0, 2.0], "en"),
            ("d", [3.0, 3.0], "en"),
        ]
    }

    // ------------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------------

    #[test]
    fn test_filter_parse() {
        let filter = Filter::parse(Some("id = 'it''s' AND metadata.year == 2024 and flag != true")).unwrap();
        assert_eq!(filter.clauses.len(), 3);
        assert_eq!(filter.clauses[0].literal, Value::String("it's".to_string()));
        assert_eq!(filter.clauses[1].key.as_deref(), Some("year"));
        assert_eq!(filter.clauses[1].literal, Value::from(2024));
        assert!(filter.clauses[2].negated);
    }

    #[test]
    fn test_filter_parse_keeps_and_inside_literals() {
        let filter =
            Filter::parse(Some("metadata.title = 'rock and roll' AND id != 'it''s AND more'"))
                .unwrap();
        assert_eq!(filter.clauses.len(), 2);
        assert_eq!(filter.clauses[0].literal, Value::String("rock and roll".to_string()));
        assert_eq!(filter.clauses[1].literal, Value::String("it's AND more".to_string()));
        assert!(filter.clauses[1].negated);
    }

    #[test]
    fn test_filter_parse_empty() {
        assert!(Filter::parse(None).unwrap().clauses.is_empty());
        assert!(Filter::parse(Some("  ")).unwrap().clauses.is_empty());
    }

    #[test]
    fn test_filter_parse_rejects_unsupported() {
        assert!(Filter::parse(Some("year > 2020")).is_err());
        assert!(Filter::parse(Some("lang = en")).is_err());
    }

    #[test]
    fn test_values_equal_across_number_kinds() {
        assert!(values_equal(&Value::from(2), &Value::from(2.0)));
        assert!(!values_equal(&Value::from("2"), &Value::from(2)));
    }

    // ------------------------------------------------------------------------
    // Collections and writes
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let store = store_with(&corpus()).await;
        assert!(store.has_collection("docs").await.unwrap());
        assert!(!store.has_collection("other").await.unwrap());
        assert!(store.load_collection("docs").await.is_ok());
        assert!(store.load_collection("other").await.is_err());
        assert_eq!(store.count("docs").unwrap(), Some(4));
        assert_eq!(store.name(), "Memory");
    }

    #[tokio::test]
    async fn test_create_existing_collection_fails() {
        let store = store_with(&[]).await;
        let err = store
            .create_collection(CreateCollectionRequest {
                name: "docs".to_string(),
                description: String::new(),
                dimension: DIM,
                schema: DefaultDocumentConverter.schema(DIM),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_ids() {
        let store = store_with(&corpus()).await;
        let rows = DefaultDocumentConverter
            .to_columns(&[Document::new("a", "again")], DIM, &[vec![0.5, 0.5]])
            .unwrap();
        let err = store.insert("docs", rows).await.unwrap_err();
        assert!(err.to_string().contains("duplicate id 'a'"));
        assert_eq!(store.count("docs").unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_insert_rejects_repeated_ids_in_batch() {
        let store = store_with(&[]).await;
        let rows = DefaultDocumentConverter
            .to_columns(
                &[Document::new("a", "one"), Document::new("a", "two")],
                DIM,
                &[vec![0.0, 0.0], vec![1.0, 1.0]],
            )
            .unwrap();
        let err = store.insert("docs", rows).await.unwrap_err();
        assert!(err.to_string().contains("duplicate id 'a'"));
        assert_eq!(store.count("docs").unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_upsert_replaces_rows() {
        let store = store_with(&corpus()).await;
        let rows = DefaultDocumentConverter
            .to_columns(
                &[Document::new("a", "replaced"), Document::new("e", "new")],
                DIM,
                &[vec![9.0, 9.0], vec![0.0, 0.0]],
            )
            .unwrap();
        let written = store.upsert("docs", rows).await.unwrap();
        assert_eq!(written.ids, vec!["a", "e"]);
        assert_eq!(store.count("docs").unwrap(), Some(5));

        let results = store.search(search([0.0, 0.0], 1)).await.unwrap();
        assert_eq!(ids(&results[0]), vec!["e"]);
    }

    #[tokio::test]
    async fn test_insert_into_missing_collection() {
        let store = MemoryStore::new();
        let rows = DefaultDocumentConverter
            .to_columns(&[Document::new("a", "x")], DIM, &[vec![0.0, 0.0]])
            .unwrap();
        let err = store.insert("docs", rows).await.unwrap_err();
        assert!(err.to_string().contains("collection 'docs' not found"));
    }

    #[tokio::test]
    async fn test_insert_rejects_foreign_schema() {
        let store = store_with(&[]).await;
        let rows = DefaultDocumentConverter
            .to_columns(&[Document::new("a", "x")], 3, &[vec![0.0, 0.0, 0.0]])
            .unwrap();
        assert!(store.insert("docs", rows).await.is_err());
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let store = store_with(&corpus()).await;
        let results = store.search(search([0.0, 0.0], 3)).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(ids(&results[0]), vec!["a", "b", "c"]);
        assert_eq!(results[0].scores[0], 1.0);
        assert!((results[0].scores[1] - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_search_filter_and_threshold() {
        let store = store_with(&corpus()).await;

        let mut request = search([0.0, 0.0], 10);
        request.filter = Some("metadata.lang = 'en' AND id != 'a'".to_string());
        let results = store.search(request).await.unwrap();
        assert_eq!(ids(&results[0]), vec!["c", "d"]);

        let mut request = search([0.0, 0.0], 10);
        request.score_threshold = Some(0.4);
        let results = store.search(request).await.unwrap();
        assert_eq!(ids(&results[0]), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_search_projects_output_fields() {
        let store = store_with(&corpus()).await;
        let mut request = search([0.0, 0.0], 2);
        request.output_fields = vec!["id".to_string(), "content".to_string()];

        let results = store.search(request).await.unwrap();
        assert_eq!(results[0].rows.num_columns(), 2);
        assert_eq!(results[0].rows.num_rows(), 2);
    }

    #[tokio::test]
    async fn test_search_empty_result_keeps_schema() {
        let store = store_with(&corpus()).await;
        let mut request = search([0.0, 0.0], 10);
        request.filter = Some("id = 'zzz'".to_string());

        let results = store.search(request).await.unwrap();
        assert!(results[0].is_empty());
        assert_eq!(results[0].rows.num_columns(), 4);
    }

    #[tokio::test]
    async fn test_search_rejects_wrong_dimension() {
        let store = store_with(&corpus()).await;
        let mut request = search([0.0, 0.0], 1);
        request.vectors = vec![NativeVector::Float32(vec![0.0, 0.0, 0.0])];
        assert!(store.search(request).await.is_err());
    }

    #[tokio::test]
    async fn test_search_rejects_unknown_fields() {
        let store = store_with(&corpus()).await;

        let mut request = search([0.0, 0.0], 1);
        request.vector_field = "sparse".to_string();
        assert!(store.search(request).await.is_err());

        let mut request = search([0.0, 0.0], 1);
        request.output_fields = vec!["title".to_string()];
        assert!(store.search(request).await.is_err());
    }

    // ------------------------------------------------------------------------
    // Hybrid search
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_hybrid_rrf_boosts_rows_found_by_both_legs() {
        let store = store_with(&corpus()).await;
        let request = HybridSearchRequest {
            collection: "docs".to_string(),
            requests: vec![leg([0.0, 0.0], 2), leg([0.0, 2.0], 2)],
            reranker: Reranker::default(),
            limit: 3,
            output_fields: Vec::new(),
        };

        let results = store.hybrid_search(request).await.unwrap();
        // leg 1: a, b   leg 2: c, a
        assert_eq!(ids(&results[0])[0], "a");
        assert_eq!(results[0].len(), 3);
    }

    #[tokio::test]
    async fn test_hybrid_leg_filter_template_and_grouping() {
        let store = store_with(&corpus()).await;
        let filtered = HybridSearchOption::new("vector", 10)
            .with_filter("metadata.lang = {lang}")
            .with_template_param("lang", "en")
            .with_group_by_field("metadata.lang")
            .with_group_size(2)
            .to_ann_request(vec![NativeVector::Float32(vec![0.0, 0.0])], None);

        let request = HybridSearchRequest {
            collection: "docs".to_string(),
            requests: vec![filtered],
            reranker: Reranker::Weighted(vec![1.0]),
            limit: 10,
            output_fields: Vec::new(),
        };
        let results = store.hybrid_search(request).await.unwrap();
        assert_eq!(ids(&results[0]), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_hybrid_offset() {
        let store = store_with(&corpus()).await;
        let skipped = HybridSearchOption::new("vector", 2)
            .with_offset(1)
            .to_ann_request(vec![NativeVector::Float32(vec![0.0, 0.0])], None);
        let request = HybridSearchRequest {
            collection: "docs".to_string(),
            requests: vec![skipped],
            reranker: Reranker::default(),
            limit: 10,
            output_fields: Vec::new(),
        };
        let results = store.hybrid_search(request).await.unwrap();
        assert_eq!(ids(&results[0]), vec!["b", "c"]);
    }

    // ------------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_index_then_retrieve() {
        let store: Arc<dyn VectorStoreClient> = Arc::new(MemoryStore::new());
        let embedder = Arc::new(MockEmbedder::new(16));

        let indexer = Indexer::new(
            IndexerConfig::new(store.clone(), 16)
                .with_collection("notes")
                .with_embedder(embedder.clone()),
        )
        .await
        .unwrap();
        let docs = vec![
            Document::new("rust", "ownership and borrowing").with_metadata("topic", "lang"),
            Document::new("tokio", "async runtime for rust").with_metadata("topic", "async"),
            Document::new("", "a note without an id"),
        ];
        let ids = indexer.store(&docs, StoreOptions::new()).await.unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(&ids[..2], ["rust", "tokio"]);

        let retriever = Retriever::new(
            RetrieverConfig::new(store.clone())
                .with_collection("notes")
                .with_embedder(embedder),
        )
        .unwrap();

        let found = retriever
            .retrieve("ownership and borrowing", RetrieveOptions::new().with_top_k(1))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "rust");
        assert_eq!(found[0].metadata["topic"], "lang");
        assert!((found[0].score.unwrap() - 1.0).abs() < 1e-5);

        let filtered = retriever
            .retrieve(
                "ownership and borrowing",
                RetrieveOptions::new().with_filter("metadata.topic = 'async'"),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "tokio");
    }
}
