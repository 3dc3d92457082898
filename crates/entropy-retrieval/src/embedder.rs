use crate::error::RetrievalError;

/// Pluggable sentence-embedding backend.
///
/// Implementations must be deterministic and emit fixed-dimension vectors;
/// the semantic index L2-normalizes on its side, so implementations do not
/// need to.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Production embedder backed by fastembed (BGE-small-en-v1.5, 384 dims).
#[cfg(feature = "fastembed-backend")]
pub struct FastembedEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    dimension: usize,
}

#[cfg(feature = "fastembed-backend")]
impl FastembedEmbedder {
    pub fn new() -> Result<Self, RetrievalError> {
        Self::with_model(fastembed::EmbeddingModel::BGESmallENV15, 384)
    }

    pub fn with_model(
        model_name: fastembed::EmbeddingModel,
        dimension: usize,
    ) -> Result<Self, RetrievalError> {
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(model_name).with_show_download_progress(false),
        )
        .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        Ok(Self {
            model: std::sync::Mutex::new(model),
            dimension,
        })
    }
}

#[cfg(feature = "fastembed-backend")]
impl Embedder for FastembedEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| RetrievalError::Embedding(format!("embedder mutex poisoned: {e}")))?;
        let mut batch = model
            .embed(vec![text], None)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        batch
            .pop()
            .ok_or_else(|| RetrievalError::Embedding("empty embedding batch".to_string()))
    }
}

/// Deterministic hashed bag-of-words embedder.
///
/// Shares no weights with a real sentence model but satisfies the same
/// contract (fixed dimension, deterministic, overlapping vocabulary maps to
/// nearby vectors), which makes it suitable for tests and offline runs
/// where downloading model weights is not an option.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dimension];
        for token in crate::lexical::tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();
            let slot = ((hash >> 1) as usize) % self.dimension;
            let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        Ok(vector)
    }
}
