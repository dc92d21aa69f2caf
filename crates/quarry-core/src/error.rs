//! Error types for Quarry operations.
//!
//! This module provides the common `Error` type and `Result<T>` alias used by
//! every Quarry crate. Uses `thiserror` for derive macros.
//!
//! Pipeline errors carry a bracketed operation tag such as `[Indexer.Store]`
//! followed by a short stage description, so callers can match on the variant
//! or grep the rendered message. Wrapping variants keep the underlying cause
//! reachable through [`std::error::Error::source`].

use thiserror::Error;

/// Errors that can occur in Quarry operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error reported verbatim by a collaborator (embedder, store client,
    /// converter).
    #[error("{0}")]
    Operation(String),

    /// No vector store client was configured.
    #[error("[{op}] vector store client is not configured")]
    MissingClient {
        /// Operation that was being constructed.
        op: &'static str,
    },

    /// The configured vector dimension is not positive.
    #[error("[{op}] vector dimension must be greater than 0, got {dimension}")]
    InvalidDimension {
        /// Operation that was being constructed.
        op: &'static str,
        /// The rejected dimension.
        dimension: i32,
    },

    /// Neither the configuration nor the call options supplied an embedder.
    #[error("[{op}] embedder is not configured")]
    MissingEmbedder {
        /// Operation that needed the embedder.
        op: &'static str,
    },

    /// The embedder failed.
    #[error("[{op}] failed to embed texts: {source}")]
    Embedding {
        /// Operation that called the embedder.
        op: &'static str,
        /// Underlying embedder error.
        #[source]
        source: Box<Error>,
    },

    /// The embedder returned a different number of vectors than texts.
    #[error("[{op}] embedder returned {vectors} vectors for {documents} documents")]
    VectorCountMismatch {
        /// Operation that called the embedder.
        op: &'static str,
        /// Number of input documents.
        documents: usize,
        /// Number of vectors returned.
        vectors: usize,
    },

    /// The embedder returned nothing for a query.
    #[error("[{op}] no vectors generated for the query")]
    NoVectorsGenerated {
        /// Operation that called the embedder.
        op: &'static str,
    },

    /// The document converter failed.
    #[error("[{op}] failed to convert documents: {source}")]
    Conversion {
        /// Operation that ran the converter.
        op: &'static str,
        /// Underlying converter error.
        #[source]
        source: Box<Error>,
    },

    /// The vector converter failed.
    #[error("[{op}] failed to convert vectors: {source}")]
    VectorConversion {
        /// Operation that ran the converter.
        op: &'static str,
        /// Underlying converter error.
        #[source]
        source: Box<Error>,
    },

    /// An insert or upsert call on the store failed.
    #[error("[{op}] failed to {action} documents: {source}")]
    StoreWrite {
        /// Operation that issued the write.
        op: &'static str,
        /// `"insert"` or `"upsert"`.
        action: &'static str,
        /// Underlying store error.
        #[source]
        source: Box<Error>,
    },

    /// A search call, or the conversion of its results, failed.
    #[error("[{op}] query has error: {source}")]
    Query {
        /// Operation that issued the query.
        op: &'static str,
        /// Underlying store or converter error.
        #[source]
        source: Box<Error>,
    },

    /// The collection could not be found or created.
    #[error("[{op}] failed to ensure collection: {source}")]
    Collection {
        /// Operation that needed the collection.
        op: &'static str,
        /// Underlying store error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a collaborator error carrying a plain message.
    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation(msg.into())
    }

    /// Wrap an embedder failure.
    pub fn embedding(op: &'static str, source: Error) -> Self {
        Self::Embedding {
            op,
            source: Box::new(source),
        }
    }

    /// Wrap a document converter failure.
    pub fn conversion(op: &'static str, source: Error) -> Self {
        Self::Conversion {
            op,
            source: Box::new(source),
        }
    }

    /// Wrap a vector converter failure.
    pub fn vector_conversion(op: &'static str, source: Error) -> Self {
        Self::VectorConversion {
            op,
            source: Box::new(source),
        }
    }

    /// Wrap a failed insert or upsert.
    pub fn store_write(op: &'static str, action: &'static str, source: Error) -> Self {
        Self::StoreWrite {
            op,
            action,
            source: Box::new(source),
        }
    }

    /// Wrap a failed query.
    pub fn query(op: &'static str, source: Error) -> Self {
        Self::Query {
            op,
            source: Box::new(source),
        }
    }

    /// Wrap a collection lifecycle failure.
    pub fn collection(op: &'static str, source: Error) -> Self {
        Self::Collection {
            op,
            source: Box::new(source),
        }
    }

    /// True for errors raised while validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::MissingClient { .. }
                | Self::InvalidDimension { .. }
                | Self::MissingEmbedder { .. }
        )
    }

    /// True for failures or malformed output of the embedding step.
    pub fn is_embedding(&self) -> bool {
        matches!(
            self,
            Self::Embedding { .. } | Self::VectorCountMismatch { .. } | Self::NoVectorsGenerated { .. }
        )
    }

    /// True for failures reported by the vector store.
    pub fn is_store(&self) -> bool {
        matches!(
            self,
            Self::StoreWrite { .. } | Self::Query { .. } | Self::Collection { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias using Quarry's Error type.
pub type Result<T> = std::result::Result<T, Error>;
