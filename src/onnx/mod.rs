//! ONNX Runtime engine backing the embedding service

pub mod onnx_engine;
pub use onnx_engine::{resolve_paths, OnnxConfig, OnnxEmbeddingEngine};

use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{EmbeddingEngine, EmbeddingResult, EngineLoader, ModelDirectory};
use crate::server::config::ServerConfig;

impl OnnxConfig {
    pub fn from_server_config(config: &ServerConfig) -> EmbeddingResult<Self> {
        Ok(Self {
            library_path: config.embedding.onnx_runtime_path.clone(),
            device: config.device()?,
            pooling: config.pooling()?,
            thread_pool_size: config.embedding.num_threads,
            max_seq_length: config.embedding.max_sequence_length,
        })
    }
}

/// Deferred construction of the ONNX engine from the configured model directory
pub fn engine_loader(config: &ServerConfig) -> EmbeddingResult<EngineLoader> {
    let onnx_config = OnnxConfig::from_server_config(config)?;
    let directory = ModelDirectory::new(config.embedding.model_dir.clone());
    Ok(Box::new(move || -> EmbeddingResult<Arc<dyn EmbeddingEngine>> {
        match resolve_paths(&directory) {
            (Some(model), Some(tokenizer)) => {
                info!("   ONNX graph : {}", model.display());
                info!("   Tokenizer  : {}", tokenizer.display());
            }
            (model, tokenizer) => warn!(
                "⚠️  Model files incomplete in {} (graph: {}, tokenizer: {})",
                directory.root().display(),
                model.is_some(),
                tokenizer.is_some()
            ),
        }
        let engine = OnnxEmbeddingEngine::from_directory(&directory, &onnx_config)?;
        Ok(Arc::new(engine))
    }))
}
