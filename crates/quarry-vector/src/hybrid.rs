//! Fluent configuration for hybrid search legs.
//!
//! Each [`HybridSearchOption`] describes one ANN leg of a hybrid query. The
//! retriever turns every option into an [`AnnRequest`] that searches with the
//! query vector, and the store merges the legs with the chosen reranker.
//!
//! ```
//! use quarry_vector::HybridSearchOption;
//!
//! let leg = HybridSearchOption::new("vector", 10)
//!     .with_filter("lang = {lang}")
//!     .with_template_param("lang", "en")
//!     .with_group_by_field("source")
//!     .with_group_size(2);
//! assert_eq!(leg.limit(), 10);
//! assert_eq!(leg.group_size(), 2);
//! ```

use serde_json::Value;
use std::collections::HashMap;

use crate::store::{AnnRequest, NativeVector};

/// One ANN leg of a hybrid search.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchOption {
    ann_field: String,
    limit: usize,
    filter: Option<String>,
    group_by_field: Option<String>,
    group_size: usize,
    strict_group_size: bool,
    search_params: HashMap<String, String>,
    template_params: HashMap<String, Value>,
    offset: usize,
    ignore_growing: bool,
}

impl HybridSearchOption {
    /// Create a leg searching `ann_field` for at most `limit` candidates.
    pub fn new(ann_field: impl Into<String>, limit: usize) -> Self {
        Self {
            ann_field: ann_field.into(),
            limit,
            filter: None,
            group_by_field: None,
            group_size: 0,
            strict_group_size: false,
            search_params: HashMap::new(),
            template_params: HashMap::new(),
            offset: 0,
            ignore_growing: false,
        }
    }

    /// Search a different vector field.
    pub fn with_ann_field(mut self, ann_field: impl Into<String>) -> Self {
        self.ann_field = ann_field.into();
        self
    }

    /// Restrict candidates with a filter expression.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Group candidates by the value of a field.
    pub fn with_group_by_field(mut self, field: impl Into<String>) -> Self {
        self.group_by_field = Some(field.into());
        self
    }

    /// Candidates kept per group.
    pub fn with_group_size(mut self, size: usize) -> Self {
        self.group_size = size;
        self
    }

    /// Require every group to be filled to the group size.
    pub fn with_strict_group_size(mut self, strict: bool) -> Self {
        self.strict_group_size = strict;
        self
    }

    /// Set a store-specific search parameter.
    pub fn with_search_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params.insert(key.into(), value.into());
        self
    }

    /// Bind a value to a `{name}` placeholder in the filter.
    pub fn with_template_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.template_params.insert(key.into(), value.into());
        self
    }

    /// Skip the first `offset` candidates of this leg.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Skip rows that are still in growing segments.
    pub fn with_ignore_growing(mut self, ignore: bool) -> Self {
        self.ignore_growing = ignore;
        self
    }

    /// Vector field searched by this leg.
    pub fn ann_field(&self) -> &str {
        &self.ann_field
    }

    /// Candidate limit of this leg.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Filter expression, if any.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Grouping field, if any.
    pub fn group_by_field(&self) -> Option<&str> {
        self.group_by_field.as_deref()
    }

    /// Candidates per group; 0 means the store default.
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Whether groups must be filled.
    pub fn strict_group_size(&self) -> bool {
        self.strict_group_size
    }

    /// Store-specific search parameters.
    pub fn search_params(&self) -> &HashMap<String, String> {
        &self.search_params
    }

    /// Filter placeholder values.
    pub fn template_params(&self) -> &HashMap<String, Value> {
        &self.template_params
    }

    /// Candidates skipped from the top.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether growing segments are skipped.
    pub fn ignore_growing(&self) -> bool {
        self.ignore_growing
    }

    /// Build the store request for this leg.
    ///
    /// `default_filter` applies when the leg sets no filter of its own.
    pub fn to_ann_request(
        &self,
        vectors: Vec<NativeVector>,
        default_filter: Option<&str>,
    ) -> AnnRequest {
        AnnRequest {
            vector_field: self.ann_field.clone(),
            vectors,
            limit: self.limit,
            filter: self
                .filter
                .clone()
                .or_else(|| default_filter.map(str::to_string)),
            template_params: self.template_params.clone(),
            group_by_field: self.group_by_field.clone(),
            group_size: self.group_size,
            strict_group_size: self.strict_group_size,
            offset: self.offset,
            ignore_growing: self.ignore_growing,
            search_params: self.search_params.clone(),
        }
    }
}
