//! Engine capability
//!
//! Every embedding backend is reduced to one operation: turn a list of
//! strings into a list of vectors of a fixed dimension. The service owns
//! batching and normalization, so engines return raw vectors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Embedding, EmbeddingResult};

/// Information about the served model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier echoed in responses
    pub name: String,
    /// Engine backing the model
    pub backend: String,
    /// Output dimension, known once the model is ready
    pub dimension: Option<usize>,
    /// Maximum texts per engine call
    pub batch_size: usize,
}

/// Core embedding engine trait
#[async_trait]
pub trait EmbeddingEngine: Send + Sync {
    /// Output dimension, constant for the lifetime of the engine
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per text in input order
    async fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>>;

    /// Short name of the backing library
    fn backend(&self) -> &str {
        "custom"
    }
}

/// Deferred engine construction, run once on the blocking pool
pub type EngineLoader = Box<dyn FnOnce() -> EmbeddingResult<Arc<dyn EmbeddingEngine>> + Send>;
