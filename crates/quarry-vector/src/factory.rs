//! Build collaborators from configuration.
//!
//! `embedding.provider` selects the [`Embedder`] and `store.backend` selects
//! the [`VectorStoreClient`]. Providers and backends whose feature is not
//! compiled in are reported as configuration errors.
//!
//! | Setting | Value | Result | Feature |
//! |---------|-------|--------|---------|
//! | `embedding.provider` | `mock` | [`MockEmbedder`] sized by `embedding.dimensions` | always |
//! | `embedding.provider` | `openai` | `OpenAiEmbedder` | `embedding-openai` |
//! | `store.backend` | `memory` | [`MemoryStore`] | always |
//! | `store.backend` | `lancedb` | `LancedbStore` at `store.uri` | `store-lancedb` |

use quarry_core::config::{EmbeddingConfig, StoreConfig};
use quarry_core::{Error, Result};
use std::sync::Arc;

use crate::embedding::{Embedder, MockEmbedder};
use crate::memory::MemoryStore;
use crate::store::VectorStoreClient;

/// Create the embedder named by `config.provider`.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.trim().to_ascii_lowercase().as_str() {
        "mock" => {
            let dimension = config
                .dimensions
                .filter(|d| *d > 0)
                .ok_or_else(|| Error::config("embedding.dimensions is required for the mock provider"))?;
            Ok(Arc::new(MockEmbedder::new(dimension)))
        }
        "openai" => openai_embedder(config),
        other => Err(Error::config(format!("unknown embedding provider '{other}'"))),
    }
}

#[cfg(feature = "embedding-openai")]
fn openai_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(crate::openai::OpenAiEmbedder::from_config(config)?))
}

#[cfg(not(feature = "embedding-openai"))]
fn openai_embedder(_config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    Err(Error::config(
        "embedding provider 'openai' requires the embedding-openai feature",
    ))
}

/// Create the store client named by `config.backend`.
pub async fn store_from_config(config: &StoreConfig) -> Result<Arc<dyn VectorStoreClient>> {
    match config.backend.trim().to_ascii_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "lancedb" => lancedb_store(config).await,
        other => Err(Error::config(format!("unknown store backend '{other}'"))),
    }
}

#[cfg(feature = "store-lancedb")]
async fn lancedb_store(config: &StoreConfig) -> Result<Arc<dyn VectorStoreClient>> {
    Ok(Arc::new(crate::lancedb::LancedbStore::from_config(config).await?))
}

#[cfg(not(feature = "store-lancedb"))]
async fn lancedb_store(_config: &StoreConfig) -> Result<Arc<dyn VectorStoreClient>> {
    Err(Error::config(
        "store backend 'lancedb' requires the store-lancedb feature",
    ))
}
