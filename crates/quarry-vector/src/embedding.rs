//! Embedder trait and mock implementation.
//!
//! This module defines the [`Embedder`] trait that abstracts over embedding
//! services (OpenAI, local models, etc.). The pipeline only relies on one
//! capability: turn a batch of strings into a batch of `f64` vectors, one per
//! input, in input order. Checking that the embedder actually honoured that
//! contract is the caller's job.
//!
//! # Embedders
//!
//! - [`MockEmbedder`]: Deterministic fixed-dimension vectors for testing
//! - `OpenAiEmbedder`: OpenAI-compatible HTTP API (requires `embedding-openai` feature)

use async_trait::async_trait;
use quarry_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::callbacks::{CallbackHandler, CallbackInput, CallbackOutput, CallbackScope, Component, RunInfo};

/// Token accounting reported by an embedding service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the input texts.
    pub prompt_tokens: u64,
    /// Tokens generated (zero for embeddings).
    pub completion_tokens: u64,
    /// Total billed tokens.
    pub total_tokens: u64,
}

/// Vectors plus optional usage accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingOutput {
    /// One vector per input text.
    pub vectors: Vec<Vec<f64>>,
    /// Usage, when the service reports it.
    pub usage: Option<TokenUsage>,
}

/// Trait for generating text embeddings.
///
/// Implementations must be `Send + Sync` so one embedder can serve concurrent
/// indexers and retrievers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per text in the same order.
    async fn embed_strings(&self, texts: &[String]) -> Result<Vec<Vec<f64>>>;

    /// Embed a batch of texts and report token usage.
    ///
    /// Default implementation calls `embed_strings` and reports no usage.
    /// Services that return usage should override this.
    async fn embed_strings_with_usage(&self, texts: &[String]) -> Result<EmbeddingOutput> {
        Ok(EmbeddingOutput {
            vectors: self.embed_strings(texts).await?,
            usage: None,
        })
    }

    /// The embedder name for diagnostics and callback run info.
    fn name(&self) -> &str;
}

/// Run the embedder, emitting `Embedding` callback events around the call.
///
/// Failures are wrapped as [`Error::Embedding`] tagged with `op`.
pub(crate) async fn embed_with_callbacks(
    op: &'static str,
    embedder: &dyn Embedder,
    texts: &[String],
    handler: Option<&Arc<dyn CallbackHandler>>,
) -> Result<EmbeddingOutput> {
    let scope = CallbackScope::new(handler, RunInfo::new(Component::Embedding, embedder.name()));
    scope.start(&CallbackInput::Embedding { texts });

    match embedder.embed_strings_with_usage(texts).await {
        Ok(output) => {
            scope.end(&CallbackOutput::Embedding {
                vectors: output.vectors.len(),
                usage: output.usage,
            });
            Ok(output)
        }
        Err(e) => {
            scope.error(&e);
            Err(Error::embedding(op, e))
        }
    }
}

/// A mock embedder for testing.
///
/// Generates deterministic unit vectors derived from the input bytes, so the
/// same text always embeds to the same vector and different texts usually
/// embed differently.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    /// Create a new mock embedder with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// The embedding dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn deterministic_embedding(&self, text: &str) -> Vec<f64> {
        let bytes = text.as_bytes();
        let mut embedding: Vec<f64> = (0..self.dimension)
            .map(|i| {
                let byte = bytes.get(i % bytes.len().max(1)).copied().unwrap_or(0);
                ((f64::from(byte) + i as f64) % 256.0) / 256.0
            })
            .collect();

        let norm = embedding.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            for val in &mut embedding {
                *val /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_strings(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        Ok(texts
            .iter()
            .map(|t| self.deterministic_embedding(t))
            .collect())
    }

    async fn embed_strings_with_usage(&self, texts: &[String]) -> Result<EmbeddingOutput> {
        let tokens: u64 = texts
            .iter()
            .map(|t| t.split_whitespace().count() as u64)
            .sum();
        Ok(EmbeddingOutput {
            vectors: self.embed_strings(texts).await?,
            usage: Some(TokenUsage {
                prompt_tokens: tokens,
                completion_tokens: 0,
                total_tokens: tokens,
            }),
        })
    }

    fn name(&self) -> &str {
        "Mock"
    }
}

// ============================================================================
// Tests
// ============================================================================
