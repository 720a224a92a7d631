//! Fixed-dimension embedding vectors and the providers that produce them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, Error, Result};

/// Dimension of the bundled feature-hashing embedder.
pub const DEFAULT_HASH_DIMENSION: usize = 384;

/// Number of components in every vector of an index.
///
/// Fixed when the index is first initialized and validated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct Dimension(pub(crate) usize);

impl Dimension {
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(Error::Config(
                "embedding dimension must be positive".into(),
            ));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for Dimension {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Dimension> for usize {
    fn from(dimension: Dimension) -> usize {
        dimension.0
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vector whose length was checked against a [`Dimension`] on creation.
///
/// # Examples
///
/// ```
/// use docsift::embedding::{Dimension, Embedding};
///
/// let dim = Dimension::new(2).unwrap();
/// let unit = Embedding::normalized(vec![3.0, 4.0], dim).unwrap();
/// assert!((unit.as_slice()[0] - 0.6).abs() < 1e-6);
///
/// assert!(Embedding::new(vec![1.0], dim).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Box<[f32]>,
}

impl Embedding {
    /// Wrap `values`, rejecting a vector of the wrong length.
    pub fn new(
        values: Vec<f32>,
        dimension: Dimension,
    ) -> std::result::Result<Self, EmbeddingError> {
        if values.len() != dimension.get() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension.get(),
                actual: values.len(),
            });
        }
        Ok(Self {
            values: values.into_boxed_slice(),
        })
    }

    /// Wrap `values` after scaling them to unit L2 norm.
    pub fn normalized(
        mut values: Vec<f32>,
        dimension: Dimension,
    ) -> std::result::Result<Self, EmbeddingError> {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return Err(EmbeddingError::NotNormalizable);
        }
        for v in &mut values {
            *v /= norm;
        }
        Self::new(values, dimension)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance to another vector of the same length.
    pub fn l2_distance(&self, other: &[f32]) -> f32 {
        self.values
            .iter()
            .zip(other)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Turns text into a normalized vector of a fixed dimension.
///
/// Implementations must be deterministic for a given text and safe to call
/// from several worker threads at once.
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder returns.
    fn dimension(&self) -> Dimension;

    /// Identifier recorded in the index settings.
    fn model_name(&self) -> &str;

    fn embed(&self, text: &str) -> std::result::Result<Embedding, EmbeddingError>;
}

/// Deterministic feature-hashing embedder.
///
/// Every lowercased word and every character trigram of a word is hashed
/// into one of `dimension` buckets with a hashed sign, and the bucket
/// counts are normalized. Texts sharing vocabulary end up close together,
/// which is enough for lexical-semantic retrieval without a model.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: Dimension,
    name: String,
}

impl HashEmbedder {
    pub fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            name: format!("hash-{dimension}"),
        }
    }

    fn add_feature(&self, values: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&bytes[..8]);
        let index = (u64::from_le_bytes(bucket) % values.len() as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        values[index] += sign * weight;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Dimension(DEFAULT_HASH_DIMENSION))
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn embed(&self, text: &str) -> std::result::Result<Embedding, EmbeddingError> {
        let mut values = vec![0.0f32; self.dimension.get()];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            self.add_feature(&mut values, word.as_bytes(), 1.0);

            let padded: Vec<char> =
                format!("<{word}>").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut values, gram.as_bytes(), 0.5);
            }
        }

        if values.iter().all(|v| *v == 0.0) {
            // Texts without words all map to the same unit vector
            values[0] = 1.0;
        }

        Embedding::normalized(values, self.dimension)
    }
}
