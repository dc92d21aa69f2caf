//! Write path: embed, convert, store.
//!
//! An [`Indexer`] is built once from an [`IndexerConfig`]. Construction
//! validates the configuration and ensures the target collection exists;
//! after that, [`Indexer::store`] runs the pipeline for each batch:
//!
//! ```text
//! documents ──► Embedder ──► count check ──► DocumentConverter ──► insert / upsert ──► IDs
//! ```
//!
//! A failing stage aborts the batch. Nothing is written when embedding or
//! conversion fails, and a failed write is not retried.

use quarry_core::config::{DEFAULT_COLLECTION, QuarryConfig};
use quarry_core::{Error, Result};
use std::fmt;
use std::sync::Arc;

use crate::callbacks::{CallbackHandler, CallbackInput, CallbackOutput, CallbackScope, Component, RunInfo};
use crate::collection::CollectionManager;
use crate::converter::{DefaultDocumentConverter, DocumentConverter};
use crate::embedding::{Embedder, TokenUsage, embed_with_callbacks};
use crate::store::{CreateCollectionRequest, VectorStoreClient};
use crate::types::Document;

const OP_NEW: &str = "Indexer.New";
const OP_STORE: &str = "Indexer.Store";

// ============================================================================
// Configuration
// ============================================================================

/// Construction-time configuration of an [`Indexer`].
#[derive(Clone, Default)]
pub struct IndexerConfig {
    /// Vector store client. Required.
    pub client: Option<Arc<dyn VectorStoreClient>>,
    /// Target collection; empty means [`DEFAULT_COLLECTION`].
    pub collection: String,
    /// Description stored with a newly created collection.
    pub description: String,
    /// Vector dimension; must be greater than 0.
    pub dimension: i32,
    /// Write with upsert instead of insert unless a call says otherwise.
    pub upsert: bool,
    /// Embedder used when a call does not supply one.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Document converter; `None` uses [`DefaultDocumentConverter`].
    pub document_converter: Option<Arc<dyn DocumentConverter>>,
    /// Callback sink used when a call does not supply one.
    pub callbacks: Option<Arc<dyn CallbackHandler>>,
}

impl IndexerConfig {
    /// Configuration for `client` with vectors of `dimension` components.
    pub fn new(client: Arc<dyn VectorStoreClient>, dimension: i32) -> Self {
        Self {
            client: Some(client),
            dimension,
            ..Default::default()
        }
    }

    /// Take collection settings from a loaded [`QuarryConfig`].
    ///
    /// The client, embedder and callbacks still have to be supplied.
    pub fn from_config(config: &QuarryConfig) -> Self {
        Self {
            collection: config.collection.name.clone(),
            description: config.collection.description.clone(),
            dimension: config.collection.dimension,
            upsert: config.collection.upsert,
            ..Default::default()
        }
    }

    /// Set the store client.
    pub fn with_client(mut self, client: Arc<dyn VectorStoreClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the target collection.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Set the collection description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Default writes to upsert.
    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
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

    /// Set the default callback sink.
    pub fn with_callbacks(mut self, callbacks: Arc<dyn CallbackHandler>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }
}

impl fmt::Debug for IndexerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexerConfig")
            .field("client", &self.client.as_ref().map(|c| c.name().to_string()))
            .field("collection", &self.collection)
            .field("description", &self.description)
            .field("dimension", &self.dimension)
            .field("upsert", &self.upsert)
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_string()))
            .field("document_converter", &self.document_converter.is_some())
            .field("callbacks", &self.callbacks.is_some())
            .finish()
    }
}

/// Per-call options of [`Indexer::store`].
#[derive(Clone, Default)]
pub struct StoreOptions {
    /// Overrides the configured write mode.
    pub upsert: Option<bool>,
    /// Overrides the configured embedder.
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Overrides the configured callback sink.
    pub callbacks: Option<Arc<dyn CallbackHandler>>,
}

impl StoreOptions {
    /// Options that change nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert this batch.
    pub fn with_upsert(mut self) -> Self {
        self.upsert = Some(true);
        self
    }

    /// Insert this batch, even if the indexer defaults to upsert.
    pub fn with_insert(mut self) -> Self {
        self.upsert = Some(false);
        self
    }

    /// Embed this batch with `embedder`.
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

// ============================================================================
// Indexer
// ============================================================================

/// Stores documents as vectors in one collection.
pub struct Indexer {
    client: Arc<dyn VectorStoreClient>,
    collection: String,
    dimension: i32,
    upsert: bool,
    embedder: Option<Arc<dyn Embedder>>,
    converter: Arc<dyn DocumentConverter>,
    callbacks: Option<Arc<dyn CallbackHandler>>,
    collections: CollectionManager,
}

impl Indexer {
    /// Validate `config` and ensure the target collection exists.
    ///
    /// Fails with [`Error::MissingClient`] or [`Error::InvalidDimension`]
    /// before touching the store, and with [`Error::Collection`] when the
    /// collection cannot be created.
    pub async fn new(config: IndexerConfig) -> Result<Self> {
        let client = config
            .client
            .ok_or(Error::MissingClient { op: OP_NEW })?;
        if config.dimension <= 0 {
            return Err(Error::InvalidDimension {
                op: OP_NEW,
                dimension: config.dimension,
            });
        }

        let collection = if config.collection.is_empty() {
            DEFAULT_COLLECTION.to_string()
        } else {
            config.collection
        };
        let converter = config
            .document_converter
            .unwrap_or_else(|| Arc::new(DefaultDocumentConverter));

        let collections = CollectionManager::new(
            client.clone(),
            CreateCollectionRequest {
                name: collection.clone(),
                description: config.description,
                dimension: config.dimension,
                schema: converter.schema(config.dimension),
            },
        );

        let indexer = Self {
            client,
            collection,
            dimension: config.dimension,
            upsert: config.upsert,
            embedder: config.embedder,
            converter,
            callbacks: config.callbacks,
            collections,
        };
        indexer.collections.ensure_for(OP_NEW).await?;

        log::debug!(
            "indexer ready on collection '{}' ({})",
            indexer.collection,
            indexer.client.name()
        );
        Ok(indexer)
    }

    /// Target collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Vector dimension.
    pub fn dimension(&self) -> i32 {
        self.dimension
    }

    /// Create the target collection if it has disappeared.
    pub async fn ensure_collection(&self) -> Result<()> {
        self.collections.ensure().await
    }

    /// Embed and write `documents`, returning the stored IDs in store order.
    pub async fn store(&self, documents: &[Document], options: StoreOptions) -> Result<Vec<String>> {
        let callbacks = options.callbacks.as_ref().or(self.callbacks.as_ref());
        let upsert = options.upsert.unwrap_or(self.upsert);
        let scope = CallbackScope::new(callbacks, RunInfo::new(Component::Indexer, self.client.name()));

        scope.start(&CallbackInput::Indexer { documents, upsert });
        match self.run_store(documents, upsert, &options, callbacks).await {
            Ok((ids, usage)) => {
                scope.end(&CallbackOutput::Indexer { ids: &ids, usage });
                Ok(ids)
            }
            Err(e) => {
                scope.error(&e);
                Err(e)
            }
        }
    }

    async fn run_store(
        &self,
        documents: &[Document],
        upsert: bool,
        options: &StoreOptions,
        callbacks: Option<&Arc<dyn CallbackHandler>>,
    ) -> Result<(Vec<String>, Option<TokenUsage>)> {
        let embedder = options
            .embedder
            .as_ref()
            .or(self.embedder.as_ref())
            .ok_or(Error::MissingEmbedder { op: OP_STORE })?;

        if documents.is_empty() {
            return Ok((Vec::new(), None));
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let output = embed_with_callbacks(OP_STORE, embedder.as_ref(), &texts, callbacks).await?;
        if output.vectors.len() != documents.len() {
            return Err(Error::VectorCountMismatch {
                op: OP_STORE,
                documents: documents.len(),
                vectors: output.vectors.len(),
            });
        }

        let rows = self
            .converter
            .to_columns(documents, self.dimension, &output.vectors)
            .map_err(|e| Error::conversion(OP_STORE, e))?;

        let (action, result) = if upsert {
            ("upsert", self.client.upsert(&self.collection, rows).await)
        } else {
            ("insert", self.client.insert(&self.collection, rows).await)
        };
        let written = result.map_err(|e| Error::store_write(OP_STORE, action, e))?;

        log::debug!(
            "{action} {} documents into '{}'",
            written.count,
            self.collection
        );
        Ok((written.ids, output.usage))
    }
}

impl fmt::Debug for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexer")
            .field("client", &self.client.name())
            .field("collection", &self.collection)
            .field("dimension", &self.dimension)
            .field("upsert", &self.upsert)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
