//! The pipeline-facing entry point.
//!
//! [`SearchEngine`] owns the index database, the parser registry, the
//! indexing pipeline and the retriever, and gates every operation on the
//! index lifecycle: `Uninitialized -> Initializing -> Ready`.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Instant,
};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    catalog::{
        ChunkRecord,
        DIMENSION_SETTING,
        DocumentCatalog,
        DocumentRecord,
        MODEL_SETTING,
        NewDocument,
    },
    config::IndexConfig,
    doc_id::DocumentId,
    embedding::Embedder,
    error::{Error, Result},
    fuzzy::FuzzyMatcher,
    parser::{ParsedDocument, ParserRegistry},
    pipeline::{
        CancellationToken,
        IndexOutcome,
        IndexProgress,
        IndexStage,
        IndexingPipeline,
    },
    search::{HybridRetriever, SearchHit, SearchRequest},
    vector_index::{ExactVectorIndex, VectorIndex},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Outcome of indexing one file, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct IndexResult {
    pub source_path: PathBuf,
    pub document_id: Option<String>,
    pub total_chunks: usize,
    pub success: bool,
    pub error: Option<String>,
    /// The failure came from the index store rather than the file.
    pub storage_failure: bool,
    pub duration_ms: u64,
}

/// Progress of a batch: which file is being worked on and how far along it is.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    pub path: &'a Path,
    /// Zero-based position of the file in the batch.
    pub file_index: usize,
    pub file_count: usize,
    pub file: IndexProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub documents: u64,
    pub chunks: u64,
    pub vectors: u64,
    pub dimension: usize,
    pub model: Option<String>,
    pub path: PathBuf,
}

struct Ready {
    catalog: DocumentCatalog,
    index: ExactVectorIndex,
    pipeline: IndexingPipeline,
    retriever: HybridRetriever,
}

enum State {
    Uninitialized,
    Initializing,
    Ready(Arc<Ready>),
}

pub struct SearchEngine {
    path: PathBuf,
    config: IndexConfig,
    embedder: Arc<dyn Embedder>,
    parsers: ParserRegistry,
    state: RwLock<State>,
    init_lock: Mutex<()>,
}

impl SearchEngine {
    /// Create an engine for the index database at `path`. Nothing is opened
    /// until [`initialize`](Self::initialize).
    pub fn new(
        path: impl Into<PathBuf>,
        config: IndexConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            path: path.into(),
            config,
            embedder,
            parsers: ParserRegistry::with_defaults(),
            state: RwLock::new(State::Uninitialized),
            init_lock: Mutex::new(()),
        }
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            State::Uninitialized => LifecycleState::Uninitialized,
            State::Initializing => LifecycleState::Initializing,
            State::Ready(_) => LifecycleState::Ready,
        }
    }

    fn set_state(&self, state: State) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Open the database, create missing tables and check the stored
    /// dimension against the embedder. Calling it again once ready is a
    /// no-op; a failed attempt leaves the engine uninitialized.
    pub fn initialize(&self) -> Result<()> {
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() == LifecycleState::Ready {
            return Ok(());
        }

        self.set_state(State::Initializing);
        match self.open() {
            Ok(ready) => {
                self.set_state(State::Ready(Arc::new(ready)));
                info!(path = %self.path.display(), "index ready");
                Ok(())
            }
            Err(e) => {
                self.set_state(State::Uninitialized);
                Err(e)
            }
        }
    }

    fn open(&self) -> Result<Ready> {
        self.config.validate()?;

        let catalog = DocumentCatalog::open(&self.path)?;
        let dimension = self.embedder.dimension();

        match catalog.get_setting(DIMENSION_SETTING)? {
            Some(stored) => {
                let stored: usize = stored.parse().map_err(|_| {
                    Error::Corrupt(format!("invalid stored dimension {stored:?}"))
                })?;
                if stored != dimension.get() {
                    return Err(Error::Config(format!(
                        "index was built with dimension {stored}, embedder \
                         produces {dimension}"
                    )));
                }
            }
            None => {
                catalog.set_setting(DIMENSION_SETTING, &dimension.to_string())?
            }
        }

        let model = self.embedder.model_name();
        match catalog.get_setting(MODEL_SETTING)? {
            Some(stored) if stored != model => {
                warn!(
                    stored = %stored,
                    current = %model,
                    "index was built with a different model"
                );
            }
            Some(_) => {}
            None => catalog.set_setting(MODEL_SETTING, model)?,
        }

        let index = ExactVectorIndex::new(dimension);
        catalog.attach_index(&index)?;

        let pipeline = IndexingPipeline::new(
            Arc::clone(&self.embedder),
            self.config.workers,
            self.config.embed_timeout,
        )?;
        let retriever = HybridRetriever::new(
            Arc::clone(&self.embedder),
            FuzzyMatcher::new(self.config.fuzzy_threshold),
            self.config.weights,
            self.config.embed_timeout,
        );

        Ok(Ready {
            catalog,
            index,
            pipeline,
            retriever,
        })
    }

    fn ready(&self) -> Result<Arc<Ready>> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            State::Ready(ready) => Ok(Arc::clone(ready)),
            _ => Err(Error::NotInitialized),
        }
    }

    // -- Indexing --

    /// Index already-extracted text, replacing any earlier version of the
    /// same source.
    pub fn index_parsed(
        &self,
        parsed: ParsedDocument,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(IndexProgress),
    ) -> Result<IndexOutcome> {
        let ready = self.ready()?;

        let spans = parsed.chunk(&self.config.chunking);
        let source_path = parsed.source_path.to_string_lossy().into_owned();
        let document = NewDocument {
            id: DocumentId::new(&source_path).full,
            filename: parsed.filename,
            source_path,
            file_type: parsed.file_type,
            size_bytes: parsed.size_bytes,
            metadata: parsed.metadata,
        };

        ready.pipeline.index_document(
            &ready.catalog,
            &ready.index,
            document,
            spans,
            cancel,
            progress,
        )
    }

    /// Parse and index one file.
    pub fn index_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(IndexProgress),
    ) -> Result<IndexOutcome> {
        self.ready()?;

        progress(IndexProgress {
            stage: IndexStage::Parsing,
            current: 0,
            total: 1,
        });
        let canonical = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf());
        let mut parsed = self.parsers.parse(&canonical)?;
        parsed.source_path = canonical;

        self.index_parsed(parsed, cancel, progress)
    }

    /// Index one file, reporting any failure in the result rather than as
    /// an error. Only a missing initialization is returned as `Err`.
    pub fn index_document(&self, path: &Path) -> Result<IndexResult> {
        self.ready()?;
        Ok(self.index_one(path, &CancellationToken::new(), &mut |_| {}))
    }

    /// Index several files. A failing file is recorded and the batch moves
    /// on; cancellation stops at the next file.
    pub fn index_documents(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(BatchProgress<'_>),
    ) -> Result<Vec<IndexResult>> {
        self.ready()?;

        let mut results = Vec::with_capacity(paths.len());
        for (file_index, path) in paths.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let result = self.index_one(path, cancel, &mut |file| {
                progress(BatchProgress {
                    path: path.as_path(),
                    file_index,
                    file_count: paths.len(),
                    file,
                })
            });
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        let storage_failures = results.iter().filter(|r| r.storage_failure).count();
        info!(files = results.len(), failed, storage_failures, "batch finished");
        Ok(results)
    }

    fn index_one(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(IndexProgress),
    ) -> IndexResult {
        let started = Instant::now();
        match self.index_file(path, cancel, progress) {
            Ok(outcome) => IndexResult {
                source_path: path.to_path_buf(),
                document_id: Some(outcome.document_id),
                total_chunks: outcome.total_chunks,
                success: true,
                error: None,
                storage_failure: false,
                duration_ms: outcome.duration_ms,
            },
            Err(e) => {
                let storage_failure = e.is_storage();
                if storage_failure {
                    error!(path = %path.display(), error = %e, "index store failed");
                } else {
                    warn!(path = %path.display(), error = %e, "indexing failed");
                }
                IndexResult {
                    source_path: path.to_path_buf(),
                    document_id: None,
                    total_chunks: 0,
                    success: false,
                    error: Some(e.to_string()),
                    storage_failure,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }

    // -- Retrieval --

    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let ready = self.ready()?;
        let snapshot = ready.catalog.snapshot()?;
        ready.retriever.search(&snapshot, &ready.index, request)
    }

    /// Filename terms close to `query`, for "did you mean" hints.
    pub fn suggest_corrections(
        &self,
        query: &str,
        max: usize,
    ) -> Result<Vec<String>> {
        let ready = self.ready()?;
        let documents = ready.catalog.snapshot()?.documents()?;
        Ok(ready.retriever.matcher().suggest_corrections(
            query,
            documents.iter().map(|d| d.filename.as_str()),
            max,
        ))
    }

    // -- Documents --

    /// Remove a document and everything derived from it. Returns `false`
    /// when the document does not exist.
    pub fn delete_document(&self, document_id: &str) -> Result<bool> {
        let ready = self.ready()?;
        ready.catalog.delete_document(&ready.index, document_id)
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        self.ready()?.catalog.snapshot()?.documents()
    }

    pub fn get_document(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>> {
        self.ready()?.catalog.snapshot()?.document(document_id)
    }

    pub fn document_chunks(
        &self,
        document_id: &str,
    ) -> Result<Vec<ChunkRecord>> {
        self.ready()?.catalog.snapshot()?.document_chunks(document_id)
    }

    /// Resolve a full id or a unique id prefix to a stored document id.
    pub fn resolve_document_id(&self, prefix: &str) -> Result<String> {
        let prefix = prefix.trim_start_matches('#');
        let documents = self.list_documents()?;
        if let Some(exact) = documents.iter().find(|d| d.id == prefix) {
            return Ok(exact.id.clone());
        }

        let mut matches = documents.iter().filter(|d| d.id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(only), None) if !prefix.is_empty() => Ok(only.id.clone()),
            (Some(_), Some(_)) => Err(Error::Config(format!(
                "document id prefix {prefix:?} is ambiguous"
            ))),
            _ => Err(Error::NotFound {
                kind: "document",
                name: prefix.to_string(),
            }),
        }
    }

    pub fn status(&self) -> Result<IndexStatus> {
        let ready = self.ready()?;
        let snapshot = ready.catalog.snapshot()?;
        Ok(IndexStatus {
            documents: snapshot.document_count()?,
            chunks: snapshot.chunk_count()?,
            vectors: ready.index.len(snapshot.transaction())?,
            dimension: ready.index.dimension().get(),
            model: snapshot.setting(MODEL_SETTING)?,
            path: self.path.clone(),
        })
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
