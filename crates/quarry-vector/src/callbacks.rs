//! Optional observability hooks.
//!
//! A [`CallbackHandler`] receives a start event before each orchestrated
//! operation, then either an end event (with an output summary and any token
//! usage reported by the embedder) or an error event. The handler is passed
//! explicitly through the configuration or per-call options; there is no
//! global registry.
//!
//! Handler failures never escalate into operation failures: they are logged
//! at debug level and dropped.

use quarry_core::{Error, Result};
use std::fmt;
use std::sync::Arc;

use crate::embedding::TokenUsage;
use crate::types::Document;

/// The pipeline component emitting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// [`Indexer::store`](crate::Indexer::store).
    Indexer,
    /// [`Retriever::retrieve`](crate::Retriever::retrieve).
    Retriever,
    /// The embedding step nested inside either of the above.
    Embedding,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Indexer => "Indexer",
            Self::Retriever => "Retriever",
            Self::Embedding => "Embedding",
        };
        f.write_str(name)
    }
}

/// Identifies the run an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    /// Component kind.
    pub component: Component,
    /// Implementation type, e.g. the store or embedder name.
    pub type_name: String,
    /// Display name: type followed by component, e.g. `MemoryIndexer`.
    pub name: String,
}

impl RunInfo {
    /// Build run info for a component implemented by `type_name`.
    pub fn new(component: Component, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let name = format!("{type_name}{component}");
        Self {
            component,
            type_name,
            name,
        }
    }
}

/// Input summary delivered with a start event.
#[derive(Debug)]
#[non_exhaustive]
pub enum CallbackInput<'a> {
    /// Documents about to be stored.
    Indexer {
        /// The batch.
        documents: &'a [Document],
        /// Whether the write is an upsert.
        upsert: bool,
    },
    /// A query about to be run.
    Retriever {
        /// Query text.
        query: &'a str,
        /// Effective result count.
        top_k: usize,
        /// Effective filter expression.
        filter: Option<&'a str>,
        /// Effective score threshold.
        score_threshold: Option<f32>,
    },
    /// Texts about to be embedded.
    Embedding {
        /// The texts.
        texts: &'a [String],
    },
}

/// Output summary delivered with an end event.
#[derive(Debug)]
#[non_exhaustive]
pub enum CallbackOutput<'a> {
    /// IDs confirmed by the store.
    Indexer {
        /// Stored IDs.
        ids: &'a [String],
        /// Token usage of the embedding step.
        usage: Option<TokenUsage>,
    },
    /// Documents found.
    Retriever {
        /// Ranked documents.
        documents: &'a [Document],
        /// Token usage of the embedding step.
        usage: Option<TokenUsage>,
    },
    /// Vectors produced.
    Embedding {
        /// Number of vectors returned.
        vectors: usize,
        /// Token usage reported by the embedder.
        usage: Option<TokenUsage>,
    },
}

/// Receives start/end/error events from the pipeline.
///
/// All methods default to doing nothing, so a handler only implements the
/// events it cares about.
pub trait CallbackHandler: Send + Sync {
    /// Called before the operation starts.
    fn on_start(&self, _info: &RunInfo, _input: &CallbackInput<'_>) -> Result<()> {
        Ok(())
    }

    /// Called after the operation succeeded.
    fn on_end(&self, _info: &RunInfo, _output: &CallbackOutput<'_>) -> Result<()> {
        Ok(())
    }

    /// Called after the operation failed.
    fn on_error(&self, _info: &RunInfo, _error: &Error) -> Result<()> {
        Ok(())
    }
}

/// Emits events for one run, swallowing handler failures.
pub(crate) struct CallbackScope<'a> {
    handler: Option<&'a Arc<dyn CallbackHandler>>,
    info: RunInfo,
}

impl<'a> CallbackScope<'a> {
    pub(crate) fn new(handler: Option<&'a Arc<dyn CallbackHandler>>, info: RunInfo) -> Self {
        Self { handler, info }
    }

    pub(crate) fn start(&self, input: &CallbackInput<'_>) {
        if let Some(handler) = self.handler {
            if let Err(e) = handler.on_start(&self.info, input) {
                log::debug!("{}: ignoring on_start callback failure: {e}", self.info.name);
            }
        }
    }

    pub(crate) fn end(&self, output: &CallbackOutput<'_>) {
        if let Some(handler) = self.handler {
            if let Err(e) = handler.on_end(&self.info, output) {
                log::debug!("{}: ignoring on_end callback failure: {e}", self.info.name);
            }
        }
    }

    pub(crate) fn error(&self, error: &Error) {
        if let Some(handler) = self.handler {
            if let Err(e) = handler.on_error(&self.info, error) {
                log::debug!("{}: ignoring on_error callback failure: {e}", self.info.name);
            }
        }
    }
}
