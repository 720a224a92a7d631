use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    chunking::ChunkingConfig,
    error::{Error, Result},
    fuzzy::DEFAULT_FUZZY_THRESHOLD,
};

/// Upper bound on the default number of embedding workers.
const MAX_DEFAULT_WORKERS: usize = 4;

/// Default time allowed for one embedding call.
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Weights applied to each source when a chunk is found by both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub semantic: f32,
    pub fuzzy: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            fuzzy: 0.3,
        }
    }
}

impl FusionWeights {
    pub fn combine(&self, semantic: f32, fuzzy: f32) -> f32 {
        self.semantic * semantic + self.fuzzy * fuzzy
    }
}

/// Tunables for indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub chunking: ChunkingConfig,
    /// Minimum fuzzy score (0-100) for a lexical match.
    pub fuzzy_threshold: u8,
    /// Parallel embedding calls per document.
    pub workers: usize,
    pub embed_timeout: Duration,
    pub weights: FusionWeights,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_DEFAULT_WORKERS);

        Self {
            chunking: ChunkingConfig::default(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            workers,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            weights: FusionWeights::default(),
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "overlap ({}) must be smaller than the chunk size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.fuzzy_threshold > 100 {
            return Err(Error::Config(format!(
                "fuzzy threshold must be at most 100, got {}",
                self.fuzzy_threshold
            )));
        }
        if self.workers == 0 {
            return Err(Error::Config("at least one worker is required".into()));
        }
        if self.embed_timeout.is_zero() {
            return Err(Error::Config("embedding timeout must be positive".into()));
        }
        let FusionWeights { semantic, fuzzy } = self.weights;
        if !(semantic.is_finite() && fuzzy.is_finite())
            || semantic < 0.0
            || fuzzy < 0.0
        {
            return Err(Error::Config(
                "fusion weights must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }
}
