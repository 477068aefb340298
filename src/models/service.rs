//! Embedding Service
//!
//! Owns the readiness state and the engine handle, validates requests,
//! splits them into engine-sized batches and normalizes the results.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::models::model::{EmbeddingEngine, EngineLoader, ModelInfo};
use crate::models::provision::ModelDirectory;
use crate::models::state::{ServiceState, StateHolder};
use crate::models::vector::normalize_in_place;
use crate::models::{Embedding, EmbeddingError, EmbeddingResult};
use crate::protocol::{EmbeddingRequest, EmbeddingResponse};

/// Default number of texts per engine call
pub const DEFAULT_BATCH_SIZE: usize = 32;

pub struct EmbeddingService {
    model_id: String,
    batch_size: usize,
    state: StateHolder,
}

impl EmbeddingService {
    /// Service whose model is still loading
    pub fn new(model_id: impl Into<String>, batch_size: usize) -> Self {
        Self {
            model_id: model_id.into(),
            batch_size: batch_size.max(1),
            state: StateHolder::initializing(),
        }
    }

    /// Service around an engine that is already loaded
    pub fn with_engine(
        model_id: impl Into<String>,
        batch_size: usize,
        engine: Arc<dyn EmbeddingEngine>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            batch_size: batch_size.max(1),
            state: StateHolder::ready(engine),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Liveness: true whenever the process can answer at all
    pub fn health(&self) -> bool {
        true
    }

    /// Readiness: the current state of the model
    pub async fn ready(&self) -> ServiceState {
        self.state.state().await
    }

    pub async fn info(&self) -> ModelInfo {
        let engine = self.state.engine().await.ok();
        ModelInfo {
            name: self.model_id.clone(),
            backend: engine
                .as_ref()
                .map(|e| e.backend().to_string())
                .unwrap_or_else(|| "pending".to_string()),
            dimension: engine.as_ref().map(|e| e.dimension()),
            batch_size: self.batch_size,
        }
    }

    /// Check the model directory, run the loader on the blocking pool and
    /// move out of `Initializing`. Load errors are never retried.
    pub async fn load(
        &self,
        directory: Option<ModelDirectory>,
        loader: EngineLoader,
    ) -> EmbeddingResult<()> {
        info!("📦 Loading model {}", self.model_id);
        // The directory walk and the loader both block
        let task = move || -> EmbeddingResult<Arc<dyn EmbeddingEngine>> {
            if let Some(dir) = directory {
                dir.ensure_usable()?;
            }
            loader()
        };
        let loaded = match tokio::task::spawn_blocking(task).await {
            Ok(result) => result,
            Err(e) => Err(EmbeddingError::LoadFailure {
                error: format!("loader task aborted: {}", e),
            }),
        };

        match loaded {
            Ok(engine) => {
                self.state.mark_ready(engine).await;
                Ok(())
            }
            Err(e) => {
                self.state.mark_failed(e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Load on a detached task while the caller goes on serving
    pub fn spawn_load(
        self: &Arc<Self>,
        directory: Option<ModelDirectory>,
        loader: EngineLoader,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.load(directory, loader).await {
                error!("❌ Background model load failed: {}", e);
            }
        })
    }

    /// Embed an HTTP request and shape the response
    pub async fn embed(&self, request: &EmbeddingRequest) -> EmbeddingResult<EmbeddingResponse> {
        let texts = request.texts()?;
        let vectors = self.embed_texts(&texts).await?;
        let model = request.model.clone().unwrap_or_else(|| self.model_id.clone());
        Ok(EmbeddingResponse::new(vectors, model))
    }

    /// Embed texts in batches of at most `batch_size`, preserving order.
    /// Every returned vector is L2-normalized.
    #[instrument(skip(self, texts), fields(text_count = texts.len()))]
    pub async fn embed_texts(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
        let engine = self
            .state
            .engine()
            .await
            .map_err(|state| EmbeddingError::NotReady { state })?;

        let dimension = engine.dimension();
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!("Embedding batch {} ({} texts)", batch_index, batch.len());
            let raw = engine.embed(batch).await?;

            if raw.len() != batch.len() {
                return Err(EmbeddingError::InferenceError {
                    error: format!(
                        "engine returned {} vectors for {} texts",
                        raw.len(),
                        batch.len()
                    ),
                });
            }

            for mut vector in raw {
                if vector.len() != dimension {
                    return Err(EmbeddingError::InferenceError {
                        error: format!(
                            "engine returned dimension {} (expected {})",
                            vector.len(),
                            dimension
                        ),
                    });
                }
                normalize_in_place(&mut vector);
                vectors.push(vector);
            }
        }

        Ok(vectors)
    }
}
