//! Read path: embed the query, search, convert back.
//!
//! ```text
//! query ──► Embedder ──► VectorConverter ──► search / hybrid search ──► DocumentConverter ──► documents
//! ```
//!
//! Query settings resolve field by field: built-in defaults, then the
//! [`RetrieverConfig`], then the per-call [`RetrieveOptions`].

use quarry_core::config::{DEFAULT_COLLECTION, DEFAULT_TOP_K, QuarryConfig};
use quarry_core::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::callbacks::{CallbackHandler, CallbackInput, CallbackOutput, CallbackScope, Component, RunInfo};
use crate::converter::{
    CONTENT_FIELD, DefaultDocumentConverter, DefaultVectorConverter, DocumentConverter, ID_FIELD,
    METADATA_FIELD, VECTOR_FIELD, VectorConverter,
};
use crate::embedding::{Embedder, TokenUsage, embed_with_callbacks};
use crate::hybrid::HybridSearchOption;
use crate::store::{HybridSearchRequest, Reranker, SearchRequest, VectorStoreClient};
use crate::types::Document;

const OP_NEW: &str = "Retriever.New";
const OP_RETRIEVE: &str = "Retriever.Retrieve";

fn default_output_fields() -> Vec<String> {
    [ID_FIELD, CONTENT_FIELD, METADATA_FIELD]
        .iter()
        .map(|f| f.to_string())
        .collect()
}

// ============================================================================
// Configuration
// ============================================================================

/// Construction-time configuration of a [`Retriever`].
#[derive(Clone, Default)]
pub struct RetrieverConfig {
    /// Vector store client. Required.
    pub client: Option<Arc<dyn VectorStoreClient>>,
    /// Collection to search; empty means [`DEFAULT_COLLECTION`].
    pub collection: String,
    /// Results per query; values ≤ 0 mean [`DEFAULT_TOP_K`].
    pub top_k: i64,
    /// Minimum score of a returned document.
    pub score_threshold: Option<f32>,
    /// Filter expression applied to every query.
    pub filter: Option<String>,
    /// Vector field searched by plain queries; empty means `vector`.
    pub vector_field: String,
    /// Fields returned with each result; empty means id, content and metadata.
    pub output_fields: Vec<String>,
    /// Store-specific search parameters.
    pub search_params: HashMap<String, String>,
    /// Embedder used when a call does not supply one.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Document converter; `None` uses [`DefaultDocumentConverter`].
    pub document_converter: Option<Arc<dyn DocumentConverter>>,
    /// Vector converter; `None` uses [`DefaultVectorConverter`].
    pub vector_converter: Option<Arc<dyn VectorConverter>>,
    /// Callback sink used when a call does not supply one.
    pub callbacks: Option<Arc<dyn CallbackHandler>>,
}

impl RetrieverConfig {
    /// Configuration searching through `client`.
    pub fn new(client: Arc<dyn VectorStoreClient>) -> Self {
        Self {
            client: Some(client),
            ..Default::default()
        }
    }

    /// Take query defaults from a loaded [`QuarryConfig`].
    ///
    /// The client, embedder and callbacks still have to be supplied.
    pub fn from_config(config: &QuarryConfig) -> Self {
        Self {
            collection: config.collection.name.clone(),
            top_k: config.search.top_k,
            score_threshold: config.search.score_threshold,
            filter: config.search.filter.clone(),
            vector_field: config.search.vector_field.clone(),
            output_fields: config.search.output_fields.clone(),
            ..Default::default()
        }
    }

    /// Set the store client.
    pub fn with_client(mut self, client: Arc<dyn VectorStoreClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the collection to search.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Set the default result count.
    pub fn with_top_k(mut self, top_k: i64) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the default score threshold.
    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    /// Set the default filter expression.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set the vector field of plain queries.
    pub fn with_vector_field(mut self, field: impl Into<String>) -> Self {
        self.vector_field = field.into();
        self
    }

    /// Set the returned fields.
    pub fn with_output_fields(mut self, fields: Vec<String>) -> Self {
        self.output_fields = fields;
        self
    }

    /// Set a store-specific search parameter.
    pub fn with_search_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params.insert(key.into(), value.into());
        self
    }

    /// Set the default embedder.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Replace the default document converter.
    pub fn with_document_converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.document_converter = Some(converter);
        self
    }

    /// Replace the default vector converter.
    pub fn with_vector_converter(mut self, converter: Arc<dyn VectorConverter>) -> Self {
        self.vector_converter = Some(converter);
        self
    }

    /// Set the default callback sink.
    pub fn with_callbacks(mut self, callbacks: Arc<dyn CallbackHandler>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }
}

impl fmt::Debug for RetrieverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrieverConfig")
            .field("client", &self.client.as_ref().map(|c| c.name().to_string()))
            .field("collection", &self.collection)
            .field("top_k", &self.top_k)
            .field("score_threshold", &self.score_threshold)
            .field("filter", &self.filter)
            .field("vector_field", &self.vector_field)
            .field("output_fields", &self.output_fields)
            .field("search_params", &self.search_params)
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_string()))
            .finish_non_exhaustive()
    }
}

/// Per-call options of [`Retriever::retrieve`]. Unset fields fall back to the
/// retriever's configuration.
#[derive(Clone, Default)]
pub struct RetrieveOptions {
    /// Collection to search.
    pub collection: Option<String>,
    /// Number of results.
    pub top_k: Option<usize>,
    /// Minimum score. Applies to plain searches only.
    pub score_threshold: Option<f32>,
    /// Filter expression.
    pub filter: Option<String>,
    /// Fields to return.
    pub output_fields: Option<Vec<String>>,
    /// Hybrid legs; when non-empty the query runs as a hybrid search.
    pub hybrid: Vec<HybridSearchOption>,
    /// How hybrid legs are merged; defaults to RRF.
    pub reranker: Option<Reranker>,
    /// Overrides the configured embedder.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Overrides the configured callback sink.
    pub callbacks: Option<Arc<dyn CallbackHandler>>,
}

impl RetrieveOptions {
    /// Options that change nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Search another collection.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Return at most `top_k` documents.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Drop documents scoring below `threshold`.
    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    /// Restrict candidates with a filter expression.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Return these fields.
    pub fn with_output_fields(mut self, fields: Vec<String>) -> Self {
        self.output_fields = Some(fields);
        self
    }

    /// Add a hybrid search leg.
    pub fn with_hybrid(mut self, leg: HybridSearchOption) -> Self {
        self.hybrid.push(leg);
        self
    }

    /// Merge hybrid legs with `reranker`.
    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Embed the query with `embedder`.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Send this call's events to `callbacks`.
    pub fn with_callbacks(mut self, callbacks: Arc<dyn CallbackHandler>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }
}

/// Settings of one query after resolution.
#[derive(Debug, Clone, PartialEq)]
struct Resolved {
    collection: String,
    top_k: usize,
    score_threshold: Option<f32>,
    filter: Option<String>,
    output_fields: Vec<String>,
}

// ============================================================================
// Retriever
// ============================================================================

/// Finds the documents most similar to a query.
pub struct Retriever {
    client: Arc<dyn VectorStoreClient>,
    collection: String,
    top_k: usize,
    score_threshold: Option<f32>,
    filter: Option<String>,
    vector_field: String,
    output_fields: Vec<String>,
    search_params: HashMap<String, String>,
    embedder: Option<Arc<dyn Embedder>>,
    document_converter: Arc<dyn DocumentConverter>,
    vector_converter: Arc<dyn VectorConverter>,
    callbacks: Option<Arc<dyn CallbackHandler>>,
}

impl Retriever {
    /// Validate `config` and apply defaults.
    pub fn new(config: RetrieverConfig) -> Result<Self> {
        let client = config
            .client
            .ok_or(Error::MissingClient { op: OP_NEW })?;

        let top_k = if config.top_k <= 0 {
            DEFAULT_TOP_K
        } else {
            config.top_k
        };

        Ok(Self {
            client,
            collection: if config.collection.is_empty() {
                DEFAULT_COLLECTION.to_string()
            } else {
                config.collection
            },
            top_k: usize::try_from(top_k).unwrap_or(usize::MAX),
            score_threshold: config.score_threshold,
            filter: config.filter,
            vector_field: if config.vector_field.is_empty() {
                VECTOR_FIELD.to_string()
            } else {
                config.vector_field
            },
            output_fields: if config.output_fields.is_empty() {
                default_output_fields()
            } else {
                config.output_fields
            },
            search_params: config.search_params,
            embedder: config.embedder,
            document_converter: config
                .document_converter
                .unwrap_or_else(|| Arc::new(DefaultDocumentConverter)),
            vector_converter: config
                .vector_converter
                .unwrap_or_else(|| Arc::new(DefaultVectorConverter)),
            callbacks: config.callbacks,
        })
    }

    /// Default collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Default result count.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Vector field searched by plain queries.
    pub fn vector_field(&self) -> &str {
        &self.vector_field
    }

    /// Default returned fields.
    pub fn output_fields(&self) -> &[String] {
        &self.output_fields
    }

    fn resolve(&self, options: &RetrieveOptions) -> Resolved {
        Resolved {
            collection: options
                .collection
                .clone()
                .unwrap_or_else(|| self.collection.clone()),
            top_k: options.top_k.unwrap_or(self.top_k),
            score_threshold: options.score_threshold.or(self.score_threshold),
            filter: options.filter.clone().or_else(|| self.filter.clone()),
            output_fields: options
                .output_fields
                .clone()
                .unwrap_or_else(|| self.output_fields.clone()),
        }
    }

    /// Return the documents most similar to `query`, best first.
    pub async fn retrieve(&self, query: &str, options: RetrieveOptions) -> Result<Vec<Document>> {
        let resolved = self.resolve(&options);
        let callbacks = options.callbacks.as_ref().or(self.callbacks.as_ref());
        let scope = CallbackScope::new(callbacks, RunInfo::new(Component::Retriever, self.client.name()));

        scope.start(&CallbackInput::Retriever {
            query,
            top_k: resolved.top_k,
            filter: resolved.filter.as_deref(),
            score_threshold: resolved.score_threshold,
        });
        match self.run_retrieve(query, resolved, &options, callbacks).await {
            Ok((documents, usage)) => {
                scope.end(&CallbackOutput::Retriever {
                    documents: &documents,
                    usage,
                });
                Ok(documents)
            }
            Err(e) => {
                scope.error(&e);
                Err(e)
            }
        }
    }

    async fn run_retrieve(
        &self,
        query: &str,
        resolved: Resolved,
        options: &RetrieveOptions,
        callbacks: Option<&Arc<dyn CallbackHandler>>,
    ) -> Result<(Vec<Document>, Option<TokenUsage>)> {
        let embedder = options
            .embedder
            .as_ref()
            .or(self.embedder.as_ref())
            .ok_or(Error::MissingEmbedder { op: OP_RETRIEVE })?;

        let texts = [query.to_string()];
        let output = embed_with_callbacks(OP_RETRIEVE, embedder.as_ref(), &texts, callbacks).await?;
        if output.vectors.is_empty() {
            return Err(Error::NoVectorsGenerated { op: OP_RETRIEVE });
        }

        let vectors = self
            .vector_converter
            .convert(&output.vectors)
            .map_err(|e| Error::vector_conversion(OP_RETRIEVE, e))?;

        let results = if options.hybrid.is_empty() {
            let request = SearchRequest {
                collection: resolved.collection,
                vector_field: self.vector_field.clone(),
                vectors,
                limit: resolved.top_k,
                filter: resolved.filter,
                score_threshold: resolved.score_threshold,
                output_fields: resolved.output_fields,
                search_params: self.search_params.clone(),
            };
            log::debug!(
                "searching '{}' for top {} by '{}'",
                request.collection,
                request.limit,
                request.vector_field
            );
            self.client.search(request).await
        } else {
            let request = HybridSearchRequest {
                requests: options
                    .hybrid
                    .iter()
                    .map(|leg| leg.to_ann_request(vectors.clone(), resolved.filter.as_deref()))
                    .collect(),
                collection: resolved.collection,
                reranker: options.reranker.clone().unwrap_or_default(),
                limit: resolved.top_k,
                output_fields: resolved.output_fields,
            };
            log::debug!(
                "hybrid search of '{}' with {} legs for top {}",
                request.collection,
                request.requests.len(),
                request.limit
            );
            self.client.hybrid_search(request).await
        }
        .map_err(|e| Error::query(OP_RETRIEVE, e))?;

        let documents = self
            .document_converter
            .from_results(&results)
            .map_err(|e| Error::query(OP_RETRIEVE, e))?;
        Ok((documents, output.usage))
    }
}

impl fmt::Debug for Retriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retriever")
            .field("client", &self.client.name())
            .field("collection", &self.collection)
            .field("top_k", &self.top_k)
            .field("vector_field", &self.vector_field)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
