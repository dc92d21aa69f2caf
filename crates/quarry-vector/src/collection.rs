//! Collection lifecycle.
//!
//! [`CollectionManager::ensure`] makes sure the target collection exists
//! before anything is written to it. It is idempotent: an existing collection
//! is left untouched, and a collection created concurrently by another
//! process between the existence check and the create call counts as
//! success.

use quarry_core::{Error, Result};
use std::sync::Arc;

use crate::store::{CreateCollectionRequest, VectorStoreClient};

const OP: &str = "Indexer.EnsureCollection";

/// Ensures one collection exists on one store.
pub struct CollectionManager {
    client: Arc<dyn VectorStoreClient>,
    request: CreateCollectionRequest,
}

impl CollectionManager {
    /// Create a manager for the collection described by `request`.
    pub fn new(client: Arc<dyn VectorStoreClient>, request: CreateCollectionRequest) -> Self {
        Self { client, request }
    }

    /// The collection this manager ensures.
    pub fn name(&self) -> &str {
        &self.request.name
    }

    /// Create and load the collection if it does not exist yet.
    pub async fn ensure(&self) -> Result<()> {
        self.ensure_for(OP).await
    }

    /// Like [`ensure`](Self::ensure), tagging failures with `op`.
    pub(crate) async fn ensure_for(&self, op: &'static str) -> Result<()> {
        let name = self.request.name.as_str();

        let exists = self
            .client
            .has_collection(name)
            .await
            .map_err(|e| Error::collection(op, e))?;
        if exists {
            log::debug!("collection '{name}' already exists");
            return Ok(());
        }

        log::info!(
            "creating collection '{name}' (dimension {})",
            self.request.dimension
        );
        if let Err(e) = self.client.create_collection(self.request.clone()).await {
            match self.client.has_collection(name).await {
                Ok(true) => {
                    log::warn!("collection '{name}' appeared while creating it: {e}");
                    return Ok(());
                }
                _ => return Err(Error::collection(op, e)),
            }
        }

        self.client
            .load_collection(name)
            .await
            .map_err(|e| Error::collection(op, e))
    }
}
