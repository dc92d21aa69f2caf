//! Embed, convert and store pipeline for Quarry.
//!
//! This crate connects a text-embedding service to a vector database. The
//! [`Indexer`] embeds documents and writes them to a collection; the
//! [`Retriever`] embeds a query and runs a similarity (or hybrid) search.
//! Both are thin orchestrators over pluggable collaborators: an
//! [`Embedder`], a [`VectorStoreClient`] and a pair of converters between
//! application documents and the store's Arrow columns.
//!
//! # Features
//!
//! - `store-lancedb`: Enable the LanceDB vector store client
//! - `embedding-openai`: Enable the OpenAI-compatible HTTP embedder
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     quarry-vector                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Indexer   (embed → convert → insert/upsert)                │
//! │  Retriever (embed → search/hybrid search → convert)         │
//! │  CollectionManager (has → create → load, race tolerant)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Embedder trait                                             │
//! │  ├── MockEmbedder (always available)                        │
//! │  └── OpenAiEmbedder (feature: embedding-openai)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  VectorStoreClient trait                                    │
//! │  ├── MemoryStore (in-process)                               │
//! │  └── LancedbStore (feature: store-lancedb)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DocumentConverter / VectorConverter (Arrow columns)        │
//! │  HybridSearchOption (per-leg ANN request builder)           │
//! │  Rank fusion (RRF, weighted)                                │
//! │  CallbackHandler (start/end/error observability)            │
//! │  embedder_from_config / store_from_config                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_vector::{
//!     Document, Indexer, IndexerConfig, MemoryStore, MockEmbedder,
//!     RetrieveOptions, Retriever, RetrieverConfig, StoreOptions,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let embedder = Arc::new(MockEmbedder::new(16));
//!
//! let indexer = Indexer::new(
//!     IndexerConfig::new(store.clone(), 16).with_embedder(embedder.clone()),
//! )
//! .await?;
//! let ids = indexer
//!     .store(&[Document::new("doc1", "hello world")], StoreOptions::new())
//!     .await?;
//!
//! let retriever = Retriever::new(RetrieverConfig::new(store).with_embedder(embedder))?;
//! for doc in retriever.retrieve("hello", RetrieveOptions::new()).await? {
//!     println!("{}: {:?}", doc.id, doc.score);
//! }
//! ```

// Leaf modules
pub mod callbacks;
pub mod codec;
pub mod rerank;
pub mod types;

// Collaborator interfaces
pub mod converter;
pub mod embedding;
pub mod store;

// Pipeline
pub mod collection;
pub mod hybrid;
pub mod indexer;
pub mod retriever;

// Store clients
pub mod memory;

// Configuration-driven construction
pub mod factory;

#[cfg(feature = "store-lancedb")]
pub mod lancedb;

#[cfg(feature = "embedding-openai")]
pub mod openai;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports: core types
pub use types::Document;

// Re-exports: pipeline
pub use collection::CollectionManager;
pub use hybrid::HybridSearchOption;
pub use indexer::{Indexer, IndexerConfig, StoreOptions};
pub use retriever::{RetrieveOptions, Retriever, RetrieverConfig};

// Re-exports: traits
pub use callbacks::{CallbackHandler, CallbackInput, CallbackOutput, Component, RunInfo};
pub use converter::{
    DefaultDocumentConverter, DefaultVectorConverter, DocumentConverter, VectorConverter,
};
pub use embedding::{Embedder, EmbeddingOutput, MockEmbedder, TokenUsage};
pub use store::{
    AnnRequest, CollectionSchema, CreateCollectionRequest, HybridSearchRequest, NativeVector,
    Reranker, ResultSet, SearchRequest, VectorStoreClient, WriteResult,
};

// Re-exports: store clients
pub use memory::MemoryStore;

// Re-exports: factory
pub use factory::{embedder_from_config, store_from_config};

// Feature-gated re-exports
#[cfg(feature = "store-lancedb")]
pub use lancedb::LancedbStore;

#[cfg(feature = "embedding-openai")]
pub use openai::OpenAiEmbedder;
