//! Test doubles shared by the unit tests of this crate.
//!
//! - [`ScriptedEmbedder`]: returns canned vectors or a canned failure
//! - [`FakeStore`]: counts calls, records requests and injects failures
//! - [`RecordingCallbacks`]: records callback events in order

#![allow(clippy::unwrap_used)]

use arrow_array::RecordBatch;
use async_trait::async_trait;
use quarry_core::{Error, Result};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::callbacks::{CallbackHandler, CallbackInput, CallbackOutput, RunInfo};
use crate::converter::ID_FIELD;
use crate::embedding::{Embedder, EmbeddingOutput, TokenUsage};
use crate::store::{
    CreateCollectionRequest, HybridSearchRequest, ResultSet, SearchRequest, VectorStoreClient,
    WriteResult, assign_missing_ids,
};

// ============================================================================
// Embedder
// ============================================================================

enum Script {
    Vectors(Vec<Vec<f64>>),
    PerText(usize),
    Fail(String),
}

/// Embedder with a fixed outcome.
pub(crate) struct ScriptedEmbedder {
    script: Script,
    usage: Option<TokenUsage>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl ScriptedEmbedder {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            usage: None,
            delay: None,
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    /// Always return exactly these vectors, whatever the input.
    pub(crate) fn with_vectors(vectors: Vec<Vec<f64>>) -> Self {
        Self::with_script(Script::Vectors(vectors))
    }

    /// Return one `dimension`-long vector per input text.
    pub(crate) fn per_text(dimension: usize) -> Self {
        Self::with_script(Script::PerText(dimension))
    }

    /// Always fail with this message.
    pub(crate) fn failing(msg: &str) -> Self {
        Self::with_script(Script::Fail(msg.to_string()))
    }

    /// Report this usage with every successful call.
    pub(crate) fn reporting(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Sleep before answering.
    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts received by the most recent call.
    pub(crate) fn last_texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    async fn embed_strings(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.texts.lock().unwrap() = texts.to_vec();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Vectors(vectors) => Ok(vectors.clone()),
            Script::PerText(dim) => Ok((0..texts.len())
                .map(|i| (0..*dim).map(|j| (i * dim + j) as f64 * 0.1).collect())
                .collect()),
            Script::Fail(msg) => Err(Error::operation(msg.clone())),
        }
    }

    async fn embed_strings_with_usage(&self, texts: &[String]) -> Result<EmbeddingOutput> {
        Ok(EmbeddingOutput {
            vectors: self.embed_strings(texts).await?,
            usage: self.usage,
        })
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

// ============================================================================
// Store
// ============================================================================

/// Call counters of a [`FakeStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Calls {
    pub has_collection: usize,
    pub create_collection: usize,
    pub load_collection: usize,
    pub insert: usize,
    pub upsert: usize,
    pub search: usize,
    pub hybrid_search: usize,
}

impl Calls {
    /// Insert and upsert calls combined.
    pub(crate) fn writes(&self) -> usize {
        self.insert + self.upsert
    }
}

#[derive(Default)]
struct FakeState {
    exists: bool,
    race_create: bool,
    fail_has: Option<String>,
    fail_create: Option<String>,
    fail_load: Option<String>,
    fail_insert: Option<String>,
    fail_upsert: Option<String>,
    fail_search: Option<String>,
    results: Vec<ResultSet>,
    calls: Calls,
    last_create: Option<CreateCollectionRequest>,
    last_write: Option<RecordBatch>,
    last_search: Option<SearchRequest>,
    last_hybrid: Option<HybridSearchRequest>,
}

/// Instrumented in-process store client.
///
/// Writes echo the IDs of the written batch. Searches return the configured
/// result sets.
#[derive(Default)]
pub(crate) struct FakeStore {
    state: Mutex<FakeState>,
}

impl FakeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn update(self, f: impl FnOnce(&mut FakeState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    /// The target collection already exists.
    pub(crate) fn with_collection(self) -> Self {
        self.update(|s| s.exists = true)
    }

    /// Searches return these result sets.
    pub(crate) fn with_results(self, results: Vec<ResultSet>) -> Self {
        self.update(|s| s.results = results)
    }

    pub(crate) fn fail_has_collection(self, msg: &str) -> Self {
        self.update(|s| s.fail_has = Some(msg.to_string()))
    }

    pub(crate) fn fail_create(self, msg: &str) -> Self {
        self.update(|s| s.fail_create = Some(msg.to_string()))
    }

    /// Creation fails because someone else created the collection first.
    pub(crate) fn race_create(self) -> Self {
        self.update(|s| s.race_create = true)
    }

    pub(crate) fn fail_load(self, msg: &str) -> Self {
        self.update(|s| s.fail_load = Some(msg.to_string()))
    }

    pub(crate) fn fail_insert(self, msg: &str) -> Self {
        self.update(|s| s.fail_insert = Some(msg.to_string()))
    }

    pub(crate) fn fail_upsert(self, msg: &str) -> Self {
        self.update(|s| s.fail_upsert = Some(msg.to_string()))
    }

    pub(crate) fn fail_search(self, msg: &str) -> Self {
        self.update(|s| s.fail_search = Some(msg.to_string()))
    }

    pub(crate) fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls
    }

    pub(crate) fn last_create(&self) -> Option<CreateCollectionRequest> {
        self.state.lock().unwrap().last_create.clone()
    }

    pub(crate) fn last_write(&self) -> Option<RecordBatch> {
        self.state.lock().unwrap().last_write.clone()
    }

    pub(crate) fn last_search(&self) -> Option<SearchRequest> {
        self.state.lock().unwrap().last_search.clone()
    }

    pub(crate) fn last_hybrid(&self) -> Option<HybridSearchRequest> {
        self.state.lock().unwrap().last_hybrid.clone()
    }

    fn write(&self, rows: RecordBatch, fail: Option<String>) -> Result<WriteResult> {
        if let Some(msg) = fail {
            return Err(Error::operation(msg));
        }
        let (rows, ids) = assign_missing_ids(rows, ID_FIELD)?;
        self.state.lock().unwrap().last_write = Some(rows);
        Ok(WriteResult {
            count: ids.len(),
            ids,
        })
    }
}

#[async_trait]
impl VectorStoreClient for FakeStore {
    async fn has_collection(&self, _name: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.calls.has_collection += 1;
        match &state.fail_has {
            Some(msg) => Err(Error::operation(msg.clone())),
            None => Ok(state.exists),
        }
    }

    async fn create_collection(&self, request: CreateCollectionRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.create_collection += 1;
        state.last_create = Some(request);
        if state.race_create {
            state.exists = true;
            return Err(Error::operation("collection already exists"));
        }
        if let Some(msg) = &state.fail_create {
            return Err(Error::operation(msg.clone()));
        }
        state.exists = true;
        Ok(())
    }

    async fn load_collection(&self, _name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.load_collection += 1;
        match &state.fail_load {
            Some(msg) => Err(Error::operation(msg.clone())),
            None => Ok(()),
        }
    }

    async fn insert(&self, _collection: &str, rows: RecordBatch) -> Result<WriteResult> {
        let fail = {
            let mut state = self.state.lock().unwrap();
            state.calls.insert += 1;
            state.fail_insert.clone()
        };
        self.write(rows, fail)
    }

    async fn upsert(&self, _collection: &str, rows: RecordBatch) -> Result<WriteResult> {
        let fail = {
            let mut state = self.state.lock().unwrap();
            state.calls.upsert += 1;
            state.fail_upsert.clone()
        };
        self.write(rows, fail)
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<ResultSet>> {
        let mut state = self.state.lock().unwrap();
        state.calls.search += 1;
        state.last_search = Some(request);
        match &state.fail_search {
            Some(msg) => Err(Error::operation(msg.clone())),
            None => Ok(state.results.clone()),
        }
    }

    async fn hybrid_search(&self, request: HybridSearchRequest) -> Result<Vec<ResultSet>> {
        let mut state = self.state.lock().unwrap();
        state.calls.hybrid_search += 1;
        state.last_hybrid = Some(request);
        match &state.fail_search {
            Some(msg) => Err(Error::operation(msg.clone())),
            None => Ok(state.results.clone()),
        }
    }

    fn name(&self) -> &str {
        "Fake"
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// Records `kind:run-name` for every event, plus reported usage.
#[derive(Default)]
pub(crate) struct RecordingCallbacks {
    fail: bool,
    events: Mutex<Vec<String>>,
    usage: Mutex<Vec<Option<TokenUsage>>>,
}

impl RecordingCallbacks {
    /// A recorder whose every hook returns an error.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Usage carried by end events, in order.
    pub(crate) fn usage(&self) -> Vec<Option<TokenUsage>> {
        self.usage.lock().unwrap().clone()
    }

    fn record(&self, kind: &str, info: &RunInfo) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{kind}:{}", info.name));
        if self.fail {
            Err(Error::operation("callback failed"))
        } else {
            Ok(())
        }
    }
}

impl CallbackHandler for RecordingCallbacks {
    fn on_start(&self, info: &RunInfo, _input: &CallbackInput<'_>) -> Result<()> {
        self.record("start", info)
    }

    fn on_end(&self, info: &RunInfo, output: &CallbackOutput<'_>) -> Result<()> {
        let usage = match output {
            CallbackOutput::Indexer { usage, .. }
            | CallbackOutput::Retriever { usage, .. }
            | CallbackOutput::Embedding { usage, .. } => *usage,
        };
        self.usage.lock().unwrap().push(usage);
        self.record("end", info)
    }

    fn on_error(&self, info: &RunInfo, _error: &Error) -> Result<()> {
        self.record("error", info)
    }
}
