//! LanceDB vector store client.
//!
//! Stores each collection as a LanceDB table whose Arrow schema is the
//! collection schema, so converter output is written as-is. Queries run as
//! LanceDB vector searches; the `_distance` column LanceDB appends is turned
//! into a score with `1 / (1 + distance)` and removed from the returned rows.
//!
//! Hybrid search runs every ANN leg as its own vector search and fuses the
//! legs client-side by document ID (see [`crate::rerank`]).
//!
//! # Search parameters
//!
//! | Key | Effect |
//! |-----|--------|
//! | `nprobes` | IVF partitions probed |
//! | `refine_factor` | Candidates re-ranked with full vectors |
//!
//! Other keys are ignored.
//!
//! # Feature Gate
//!
//! This module requires the `store-lancedb` feature.

use arrow_array::{Array, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select, VectorQuery};
use quarry_core::config::StoreConfig;
use quarry_core::{Error, Result};
use std::collections::HashMap;

use crate::rerank::{self, RankedList};
use crate::store::{
    AnnRequest, CreateCollectionRequest, HybridSearchRequest, NativeVector, ResultSet,
    SearchRequest, VectorStoreClient, WriteResult, assign_missing_ids, limit_groups,
    render_filter,
};

const DISTANCE_COLUMN: &str = "_distance";

/// Vector store client backed by a LanceDB database.
pub struct LancedbStore {
    connection: lancedb::Connection,
    id_field: String,
}

impl LancedbStore {
    /// Connect to the database at `uri` (a directory path or object store URI).
    pub async fn connect(uri: &str) -> Result<Self> {
        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| Error::operation(format!("Failed to connect to LanceDB: {e}")))?;
        log::debug!("connected to LanceDB at {uri}");
        Ok(Self {
            connection,
            id_field: crate::converter::ID_FIELD.to_string(),
        })
    }

    /// Connect using the `[store]` configuration section.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        let uri = config
            .uri
            .as_deref()
            .ok_or_else(|| Error::config("store.uri is required for the lancedb backend"))?;
        Self::connect(uri).await
    }

    /// Use `field` as the primary key for upserts and hybrid fusion.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    async fn open(&self, collection: &str) -> Result<lancedb::Table> {
        self.connection
            .open_table(collection)
            .execute()
            .await
            .map_err(|e| Error::operation(format!("Failed to open table: {e}")))
    }

    fn reader(rows: RecordBatch) -> Box<dyn arrow_array::RecordBatchReader + Send> {
        let schema = rows.schema();
        Box::new(RecordBatchIterator::new(vec![Ok(rows)], schema))
    }

    /// Run one vector search and return the rows (without the distance
    /// column) with their scores.
    async fn vector_search(
        &self,
        table: &lancedb::Table,
        vector: &NativeVector,
        query: VectorQueryParams<'_>,
    ) -> Result<(RecordBatch, Vec<f32>)> {
        let mut search = table
            .vector_search(vector.as_f32().to_vec())
            .map_err(|e| Error::operation(format!("Failed to create vector search: {e}")))?
            .column(query.vector_field)
            .limit(query.limit);
        if query.offset > 0 {
            search = search.offset(query.offset);
        }
        if let Some(filter) = query.filter {
            search = search.only_if(filter);
        }
        if !query.select.is_empty() {
            search = search.select(Select::columns(query.select));
        }
        search = apply_search_params(search, query.search_params)?;

        let batches: Vec<RecordBatch> = search
            .execute()
            .await
            .map_err(|e| Error::operation(format!("Vector search failed: {e}")))?
            .try_collect()
            .await
            .map_err(|e| Error::operation(format!("Failed to collect results: {e}")))?;

        let schema = match batches.first() {
            Some(batch) => batch.schema(),
            None => table
                .schema()
                .await
                .map_err(|e| Error::operation(format!("Failed to read table schema: {e}")))?,
        };
        let batch = arrow_select::concat::concat_batches(&schema, &batches)
            .map_err(|e| Error::operation(format!("Failed to concatenate results: {e}")))?;
        split_distance(batch)
    }
}

/// Per-search settings shared by plain and hybrid queries.
struct VectorQueryParams<'a> {
    vector_field: &'a str,
    limit: usize,
    offset: usize,
    filter: Option<&'a str>,
    select: &'a [String],
    search_params: &'a HashMap<String, String>,
}

fn apply_search_params(
    mut search: VectorQuery,
    params: &HashMap<String, String>,
) -> Result<VectorQuery> {
    for (key, value) in params {
        match key.as_str() {
            "nprobes" => {
                let n = value
                    .parse::<usize>()
                    .map_err(|e| Error::operation(format!("invalid nprobes '{value}': {e}")))?;
                search = search.nprobes(n);
            }
            "refine_factor" => {
                let n = value
                    .parse::<u32>()
                    .map_err(|e| Error::operation(format!("invalid refine_factor '{value}': {e}")))?;
                search = search.refine_factor(n);
            }
            other => log::debug!("LanceDB ignores search parameter '{other}'"),
        }
    }
    Ok(search)
}

/// Remove the `_distance` column, returning the remaining rows and their
/// scores. Rows without a distance score 1.0.
fn split_distance(batch: RecordBatch) -> Result<(RecordBatch, Vec<f32>)> {
    let schema = batch.schema();
    let Ok(index) = schema.index_of(DISTANCE_COLUMN) else {
        let scores = vec![1.0; batch.num_rows()];
        return Ok((batch, scores));
    };

    let distances = batch
        .column(index)
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| Error::operation("'_distance' column is not Float32Array"))?;
    let scores = (0..distances.len())
        .map(|i| 1.0 / (1.0 + distances.value(i)))
        .collect();

    let keep: Vec<usize> = (0..schema.fields().len()).filter(|i| *i != index).collect();
    let rows = batch
        .project(&keep)
        .map_err(|e| Error::operation(format!("Failed to drop distance column: {e}")))?;
    Ok((rows, scores))
}

/// Rows requested for one hybrid leg. Grouped legs over-fetch so grouping
/// can still fill the leg limit.
fn fetch_limit(leg: &AnnRequest) -> usize {
    if leg.group_by_field.is_some() {
        leg.limit.saturating_mul(leg.group_size.max(1).saturating_mul(4))
    } else {
        leg.limit
    }
}

fn string_values(batch: &RecordBatch, field: &str) -> Result<Vec<Option<String>>> {
    let column = batch
        .column_by_name(field)
        .ok_or_else(|| Error::operation(format!("Missing '{field}' column in results")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::operation(format!("'{field}' column is not StringArray")))?;
    Ok((0..column.len())
        .map(|i| (!column.is_null(i)).then(|| column.value(i).to_string()))
        .collect())
}

fn project_to(batch: &RecordBatch, fields: &[String]) -> Result<RecordBatch> {
    if fields.is_empty() {
        return Ok(batch.clone());
    }
    let schema = batch.schema();
    let indices = fields
        .iter()
        .map(|f| {
            schema
                .index_of(f)
                .map_err(|_| Error::operation(format!("unknown output field '{f}'")))
        })
        .collect::<Result<Vec<_>>>()?;
    batch
        .project(&indices)
        .map_err(|e| Error::operation(format!("Failed to project rows: {e}")))
}

#[async_trait]
impl VectorStoreClient for LancedbStore {
    async fn has_collection(&self, name: &str) -> Result<bool> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| Error::operation(format!("Failed to list tables: {e}")))?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn create_collection(&self, request: CreateCollectionRequest) -> Result<()> {
        self.connection
            .create_empty_table(&request.name, request.schema.fields.clone())
            .execute()
            .await
            .map_err(|e| Error::operation(format!("Failed to create table: {e}")))?;
        log::info!("created LanceDB table '{}'", request.name);
        Ok(())
    }

    async fn insert(&self, collection: &str, rows: RecordBatch) -> Result<WriteResult> {
        let (rows, ids) = assign_missing_ids(rows, &self.id_field)?;
        let table = self.open(collection).await?;
        table
            .add(Self::reader(rows))
            .execute()
            .await
            .map_err(|e| Error::operation(format!("Failed to add rows: {e}")))?;
        Ok(WriteResult {
            count: ids.len(),
            ids,
        })
    }

    async fn upsert(&self, collection: &str, rows: RecordBatch) -> Result<WriteResult> {
        let (rows, ids) = assign_missing_ids(rows, &self.id_field)?;
        let table = self.open(collection).await?;

        let mut merge = table.merge_insert(&[self.id_field.as_str()]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Self::reader(rows))
            .await
            .map_err(|e| Error::operation(format!("Failed to merge rows: {e}")))?;
        Ok(WriteResult {
            count: ids.len(),
            ids,
        })
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<ResultSet>> {
        let table = self.open(&request.collection).await?;
        let mut results = Vec::with_capacity(request.vectors.len());

        for vector in &request.vectors {
            let params = VectorQueryParams {
                vector_field: &request.vector_field,
                limit: request.limit,
                offset: 0,
                filter: request.filter.as_deref(),
                select: &request.output_fields,
                search_params: &request.search_params,
            };
            let (rows, scores) = self.vector_search(&table, vector, params).await?;

            let result = match request.score_threshold {
                Some(threshold) => {
                    let keep: Vec<u32> = (0..scores.len())
                        .filter(|i| scores[*i] >= threshold)
                        .filter_map(|i| u32::try_from(i).ok())
                        .collect();
                    let indices = arrow_array::UInt32Array::from(keep);
                    let columns = rows
                        .columns()
                        .iter()
                        .map(|c| arrow_select::take::take(c.as_ref(), &indices, None))
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(|e| Error::operation(format!("Failed to apply threshold: {e}")))?;
                    let rows = RecordBatch::try_new(rows.schema(), columns)
                        .map_err(|e| Error::operation(format!("Failed to apply threshold: {e}")))?;
                    let scores = indices.values().iter().map(|i| scores[*i as usize]).collect();
                    ResultSet::new(rows, scores)
                }
                None => ResultSet::new(rows, scores),
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn hybrid_search(&self, request: HybridSearchRequest) -> Result<Vec<ResultSet>> {
        let table = self.open(&request.collection).await?;
        let queries = request.requests.first().map_or(0, |r| r.vectors.len());
        let mut results = Vec::with_capacity(queries);

        for q in 0..queries {
            let mut rows_by_id: HashMap<String, RecordBatch> = HashMap::new();
            let mut lists: Vec<RankedList<String>> = Vec::with_capacity(request.requests.len());

            for leg in &request.requests {
                let vector = leg.vectors.get(q).ok_or_else(|| {
                    Error::operation("hybrid legs carry different numbers of vectors")
                })?;
                lists.push(
                    self.ann_leg(&table, leg, vector, &request.output_fields, &mut rows_by_id)
                        .await?,
                );
            }

            let fused = rerank::fuse(&lists, &request.reranker, request.limit)?;
            let mut rows = Vec::with_capacity(fused.len());
            let mut scores = Vec::with_capacity(fused.len());
            for (id, score) in fused {
                if let Some(row) = rows_by_id.get(&id) {
                    rows.push(project_to(row, &request.output_fields)?);
                    scores.push(score);
                }
            }

            let schema: SchemaRef = match rows.first() {
                Some(row) => row.schema(),
                None => {
                    let schema = table
                        .schema()
                        .await
                        .map_err(|e| Error::operation(format!("Failed to read table schema: {e}")))?;
                    project_to(&RecordBatch::new_empty(schema), &request.output_fields)?.schema()
                }
            };
            let batch = arrow_select::concat::concat_batches(&schema, &rows)
                .map_err(|e| Error::operation(format!("Failed to concatenate results: {e}")))?;
            results.push(ResultSet::new(batch, scores));
        }
        Ok(results)
    }

    fn name(&self) -> &str {
        "Lancedb"
    }
}

impl LancedbStore {
    /// Run one hybrid leg, recording its rows by ID.
    async fn ann_leg(
        &self,
        table: &lancedb::Table,
        leg: &AnnRequest,
        vector: &NativeVector,
        output_fields: &[String],
        rows_by_id: &mut HashMap<String, RecordBatch>,
    ) -> Result<RankedList<String>> {
        if leg.strict_group_size || leg.ignore_growing {
            log::debug!("LanceDB ignores strict grouping and growing segments");
        }

        let mut select = output_fields.to_vec();
        if !select.is_empty() {
            for required in std::iter::once(&self.id_field).chain(leg.group_by_field.as_ref()) {
                if !select.contains(required) {
                    select.push(required.clone());
                }
            }
        }

        let filter = leg
            .filter
            .as_deref()
            .map(|f| render_filter(f, &leg.template_params));
        let params = VectorQueryParams {
            vector_field: &leg.vector_field,
            limit: fetch_limit(leg),
            offset: leg.offset,
            filter: filter.as_deref(),
            select: &select,
            search_params: &leg.search_params,
        };
        let (rows, scores) = self.vector_search(table, vector, params).await?;

        let ids = string_values(&rows, &self.id_field)?;
        let groups = match &leg.group_by_field {
            Some(field) => string_values(&rows, field)?,
            None => vec![None; ids.len()],
        };

        let mut hits = Vec::with_capacity(ids.len());
        for (i, (id, group)) in ids.into_iter().zip(groups).enumerate() {
            let Some(id) = id else { continue };
            rows_by_id.entry(id.clone()).or_insert_with(|| rows.slice(i, 1));
            hits.push(((id, scores[i]), group));
        }

        let mut ranked = match leg.group_by_field {
            Some(_) => limit_groups(hits, leg.group_size),
            None => hits.into_iter().map(|(hit, _)| hit).collect(),
        };
        ranked.truncate(leg.limit);
        Ok(ranked)
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
    use crate::hybrid::HybridSearchOption;
    use crate::store::Reranker;
    use crate::types::Document;
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    async fn store_with_docs(dir: &tempfile::TempDir) -> LancedbStore {
        let store = LancedbStore::connect(dir.path().to_str().unwrap())
            .await
            .unwrap();
        store
            .create_collection(CreateCollectionRequest {
                name: "docs".to_string(),
                description: String::new(),
                dimension: 2,
                schema: DefaultDocumentConverter.schema(2),
            })
            .await
            .unwrap();

        let docs = vec![
            Document::new("a", "first").with_metadata("lang", "en"),
            Document::new("b", "second").with_metadata("lang", "de"),
            Document::new("c", "third").with_metadata("lang", "en"),
        ];
        let rows = DefaultDocumentConverter
            .to_columns(&docs, 2, &[vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 2.0]])
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
            output_fields: vec!["id".to_string(), "content".to_string(), "metadata".to_string()],
            search_params: HashMap::new(),
        }
    }

    fn ids(results: &ResultSet) -> Vec<String> {
        DefaultDocumentConverter
            .from_results(std::slice::from_ref(results))
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect()
    }

    #[test]
    fn test_split_distance() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(DISTANCE_COLUMN, DataType::Float32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["a", "b"])),
                Arc::new(Float32Array::from(vec![0.0, 1.0])),
            ],
        )
        .unwrap();

        let (rows, scores) = split_distance(batch).unwrap();
        assert_eq!(rows.num_columns(), 1);
        assert_eq!(scores, vec![1.0, 0.5]);
    }

    #[test]
    fn test_split_distance_without_column() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["a"]))]).unwrap();
        let (_, scores) = split_distance(batch).unwrap();
        assert_eq!(scores, vec![1.0]);
    }

    #[test]
    fn test_fetch_limit() {
        let vectors = vec![NativeVector::Float32(vec![0.0, 0.0])];
        let plain = HybridSearchOption::new("vector", 5).to_ann_request(vectors.clone(), None);
        assert_eq!(fetch_limit(&plain), 5);

        let grouped = HybridSearchOption::new("vector", 5)
            .with_group_by_field("metadata.lang")
            .with_group_size(2)
            .to_ann_request(vectors.clone(), None);
        assert_eq!(fetch_limit(&grouped), 40);

        let huge = HybridSearchOption::new("vector", 5)
            .with_group_by_field("metadata.lang")
            .with_group_size(usize::MAX)
            .to_ann_request(vectors, None);
        assert_eq!(fetch_limit(&huge), usize::MAX);
    }

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir).await;
        assert!(store.has_collection("docs").await.unwrap());
        assert!(!store.has_collection("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_search_scores_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir).await;

        let results = store.search(search([0.0, 0.0], 2)).await.unwrap();
        assert_eq!(ids(&results[0]), vec!["a", "b"]);
        assert!((results[0].scores[0] - 1.0).abs() < 1e-5);
        assert!(results[0].rows.column_by_name(DISTANCE_COLUMN).is_none());

        let mut request = search([0.0, 0.0], 10);
        request.filter = Some("id != 'a'".to_string());
        let results = store.search(request).await.unwrap();
        assert!(!ids(&results[0]).contains(&"a".to_string()));
    }

    #[tokio::test]
    async fn test_search_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir).await;

        let mut request = search([0.0, 0.0], 10);
        request.score_threshold = Some(0.9);
        let results = store.search(request).await.unwrap();
        assert_eq!(ids(&results[0]), vec!["a"]);
        assert_eq!(results[0].scores.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir).await;

        let rows = DefaultDocumentConverter
            .to_columns(&[Document::new("a", "moved")], 2, &[vec![5.0, 5.0]])
            .unwrap();
        let written = store.upsert("docs", rows).await.unwrap();
        assert_eq!(written.ids, vec!["a"]);

        let results = store.search(search([0.0, 0.0], 1)).await.unwrap();
        assert_eq!(ids(&results[0]), vec!["b"]);
    }

    #[tokio::test]
    async fn test_hybrid_search_fuses_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_docs(&dir).await;

        let legs = [[0.0f32, 0.0], [0.0, 2.0]]
            .iter()
            .map(|v| {
                HybridSearchOption::new("vector", 2)
                    .to_ann_request(vec![NativeVector::Float32(v.to_vec())], None)
            })
            .collect();
        let request = HybridSearchRequest {
            collection: "docs".to_string(),
            requests: legs,
            reranker: Reranker::default(),
            limit: 3,
            output_fields: vec!["id".to_string(), "content".to_string()],
        };

        let results = store.hybrid_search(request).await.unwrap();
        assert_eq!(ids(&results[0])[0], "a");
        assert_eq!(results[0].rows.num_columns(), 2);
    }
}
