use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    time::{Duration, Instant},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    catalog::{DocumentCatalog, NewChunk, NewDocument},
    embedding::{Embedder, Embedding},
    error::{EmbeddingError, Error, Result},
    parser::ChunkSpan,
    vector_index::VectorIndex,
};

/// Cooperative cancellation flag shared between a caller and the pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexStage {
    Parsing,
    Embedding,
    Writing,
    Completed,
}

impl std::fmt::Display for IndexStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IndexStage::Parsing => "parsing",
            IndexStage::Embedding => "embedding",
            IndexStage::Writing => "writing",
            IndexStage::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexProgress {
    pub stage: IndexStage,
    pub current: usize,
    pub total: usize,
}

/// A committed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub document_id: String,
    pub total_chunks: usize,
    pub duration_ms: u64,
    pub replaced: bool,
}

/// Embeds chunks on a bounded worker pool and commits a document with its
/// chunks and vectors as one unit.
pub struct IndexingPipeline {
    embedder: Arc<dyn Embedder>,
    pool: rayon::ThreadPool,
    embed_timeout: Duration,
}

impl IndexingPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        workers: usize,
        embed_timeout: Duration,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("docsift-embed-{i}"))
            .build()
            .map_err(|e| {
                Error::Config(format!("failed to start embedding workers: {e}"))
            })?;

        Ok(Self {
            embedder,
            pool,
            embed_timeout,
        })
    }

    /// Embed and write one document.
    ///
    /// Nothing is written unless every chunk was embedded with the index
    /// dimension. The write replaces any earlier version of the document.
    pub fn index_document(
        &self,
        catalog: &DocumentCatalog,
        index: &dyn VectorIndex,
        document: NewDocument,
        spans: Vec<ChunkSpan>,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(IndexProgress),
    ) -> Result<IndexOutcome> {
        let started = Instant::now();
        let total = spans.len();

        let embeddings = self.embed_all(&spans, index, cancel, progress)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        progress(IndexProgress {
            stage: IndexStage::Writing,
            current: 0,
            total,
        });
        let chunks = spans
            .into_iter()
            .zip(embeddings)
            .map(|(span, embedding)| NewChunk {
                content: span.content,
                page: span.page,
                char_start: span.char_start,
                char_end: span.char_end,
                embedding,
            })
            .collect();
        let outcome = catalog.replace_document(index, document, chunks)?;

        let duration_ms = started.elapsed().as_millis() as u64;
        progress(IndexProgress {
            stage: IndexStage::Completed,
            current: total,
            total,
        });
        info!(
            document = %outcome.record.id,
            chunks = total,
            duration_ms,
            "indexed document"
        );

        Ok(IndexOutcome {
            document_id: outcome.record.id,
            total_chunks: total,
            duration_ms,
            replaced: outcome.replaced,
        })
    }

    /// Embed every span, returning vectors in span order.
    ///
    /// Fails on the first embedding error, on a vector whose dimension does
    /// not match the index, when no result arrives within the embedding
    /// timeout, or when `cancel` fires. Remaining queued calls are skipped.
    pub fn embed_all(
        &self,
        spans: &[ChunkSpan],
        index: &dyn VectorIndex,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(IndexProgress),
    ) -> Result<Vec<Embedding>> {
        let total = spans.len();
        let expected = index.dimension().get();
        let abort = CancellationToken::new();
        let (tx, rx) = mpsc::channel();

        for (i, span) in spans.iter().enumerate() {
            let tx = tx.clone();
            let embedder = Arc::clone(&self.embedder);
            let text = span.content.clone();
            let cancel = cancel.clone();
            let abort = abort.clone();

            self.pool.spawn(move || {
                if cancel.is_cancelled() || abort.is_cancelled() {
                    let _ = tx.send((i, None));
                    return;
                }
                let result = catch_unwind(AssertUnwindSafe(|| {
                    embedder.embed(&text)
                }))
                .unwrap_or_else(|_| {
                    Err(EmbeddingError::Failed("embedder panicked".into()))
                });
                let _ = tx.send((i, Some(result)));
            });
        }
        drop(tx);

        let mut slots: Vec<Option<Embedding>> = vec![None; total];
        for done in 0..total {
            let (i, result) = match rx.recv_timeout(self.embed_timeout) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => {
                    abort.cancel();
                    let chunk_index =
                        slots.iter().position(Option::is_none).unwrap_or(done);
                    warn!(
                        chunk_index,
                        timeout = ?self.embed_timeout,
                        "embedding timed out"
                    );
                    return Err(EmbeddingError::Timeout {
                        chunk_index,
                        timeout: self.embed_timeout,
                    }
                    .into());
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EmbeddingError::Failed(
                        "embedding workers stopped".into(),
                    )
                    .into());
                }
            };

            let embedding = match result {
                None => {
                    abort.cancel();
                    return Err(Error::Cancelled);
                }
                Some(Err(e)) => {
                    abort.cancel();
                    return Err(e.into());
                }
                Some(Ok(embedding)) => embedding,
            };
            if embedding.len() != expected {
                abort.cancel();
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                }
                .into());
            }

            slots[i] = Some(embedding);
            progress(IndexProgress {
                stage: IndexStage::Embedding,
                current: done + 1,
                total,
            });

            if cancel.is_cancelled() {
                abort.cancel();
                return Err(Error::Cancelled);
            }
        }

        debug!(chunks = total, "embedded all chunks");
        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    Error::Corrupt("embedding result missing".into())
                })
            })
            .collect()
    }
}
