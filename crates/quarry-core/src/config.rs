//! Configuration for Quarry deployments.
//!
//! Provides the [`QuarryConfig`] struct that loads from TOML files,
//! environment variables, and defaults using the `confyg` crate.
//!
//! # Loading Priority
//!
//! 1. Explicit path passed to [`QuarryConfig::load`]
//! 2. `QUARRY_CONFIG` environment variable
//! 3. XDG default: `~/.config/quarry/config.toml`
//! 4. Built-in defaults
//!
//! `QUARRY_<SECTION>_<KEY>` environment variables are layered on top of the
//! file. confyg passes env values as strings, so only string-typed keys can be
//! overridden from the environment.

use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Collection name used when none is configured.
pub const DEFAULT_COLLECTION: &str = "quarry_collection";

/// Result count used when none (or a non-positive one) is configured.
pub const DEFAULT_TOP_K: i64 = 5;

// ============================================================================
// Configuration structs
// ============================================================================

/// Main configuration for a Quarry deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    /// Target collection and write behaviour.
    pub collection: CollectionConfig,

    /// Query-time defaults.
    pub search: SearchConfig,

    /// Embedding service settings.
    pub embedding: EmbeddingConfig,

    /// Vector store settings.
    pub store: StoreConfig,
}

/// Collection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Collection name.
    pub name: String,

    /// Human readable description stored with a newly created collection.
    pub description: String,

    /// Vector dimension. Must be greater than 0 for indexing.
    pub dimension: i32,

    /// Whether writes default to upsert instead of insert.
    pub upsert: bool,
}

/// Query-time defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of results to return.
    pub top_k: i64,

    /// Minimum score a result must reach.
    pub score_threshold: Option<f32>,

    /// Filter expression applied to every query.
    pub filter: Option<String>,

    /// Name of the vector field searched by plain similarity queries.
    pub vector_field: String,

    /// Fields to return with each result.
    pub output_fields: Vec<String>,
}

/// Embedding service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider: "openai" or "mock". The mock provider needs `dimensions`.
    pub provider: String,

    /// Model name.
    pub model: String,

    /// Base URL of the embedding endpoint.
    pub base_url: Option<String>,

    /// API key. Usually supplied through `QUARRY_EMBEDDING_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Use Azure OpenAI addressing.
    pub by_azure: bool,

    /// Azure API version.
    pub api_version: Option<String>,

    /// Requested output dimension, for models that support shortening.
    pub dimensions: Option<usize>,

    /// End-user identifier forwarded to the provider.
    pub user: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend type: "lancedb" (requires `uri`) or "memory".
    pub backend: String,

    /// Path or URI of the database.
    pub uri: Option<String>,
}

// ============================================================================
// Default implementations
// ============================================================================

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_COLLECTION.to_string(),
            description: "quarry document collection".to_string(),
            dimension: 0,
            upsert: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            score_threshold: None,
            filter: None,
            vector_field: "vector".to_string(),
            output_fields: vec![
                "id".to_string(),
                "content".to_string(),
                "metadata".to_string(),
            ],
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-ada-002".to_string(),
            base_url: None,
            api_key: None,
            by_azure: false,
            api_version: None,
            dimensions: None,
            user: None,
            timeout_secs: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "lancedb".to_string(),
            uri: None,
        }
    }
}

// ============================================================================
// Config loading
// ============================================================================

impl QuarryConfig {
    /// Load configuration from file, environment, and defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder =
            Confygery::new().map_err(|e| Error::config(format!("config init: {e}")))?;

        if let Some(path) = Self::resolve_config_path(config_path) {
            if path.exists() {
                log::debug!("loading configuration from {}", path.display());
                builder
                    .add_file(&path.to_string_lossy())
                    .map_err(|e| Error::config(format!("config file: {e}")))?;
            }
        }

        let mut env_opts = env::Options::with_top_level("QUARRY");
        env_opts.add_section("collection");
        env_opts.add_section("search");
        env_opts.add_section("embedding");
        env_opts.add_section("store");
        builder
            .add_env(env_opts)
            .map_err(|e| Error::config(format!("config env: {e}")))?;

        builder
            .build()
            .map_err(|e| Error::config(format!("config build: {e}")))
    }

    /// Resolve the config file path from explicit path, env var, or XDG default.
    pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("QUARRY_CONFIG") {
            return Some(PathBuf::from(path));
        }

        Self::default_config_path()
    }

    /// Return the XDG default config path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("quarry").join("config.toml"))
    }

    /// Serialize this config to a pretty-printed TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
