//! Embedding Service Library
//!
//! Local HTTP service for a single text-embedding model

pub mod models;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod protocol;
pub mod server;

// Re-exports
pub use models::{
    Embedding, EmbeddingEngine, EmbeddingError, EmbeddingResult, EmbeddingService, EngineLoader,
    ServiceState,
};
pub use protocol::{EmbeddingRequest, EmbeddingResponse};
pub use server::{EmbeddingServer, ServerConfig};

/// Loader for the engine compiled into this build
#[cfg(feature = "onnx")]
pub fn default_loader(config: &ServerConfig) -> EmbeddingResult<EngineLoader> {
    onnx::engine_loader(config)
}

/// Loader for the engine compiled into this build
#[cfg(not(feature = "onnx"))]
pub fn default_loader(_config: &ServerConfig) -> EmbeddingResult<EngineLoader> {
    Ok(Box::new(
        || -> EmbeddingResult<std::sync::Arc<dyn EmbeddingEngine>> {
            Err(EmbeddingError::LoadFailure {
                error: "no embedding backend compiled in (enable the `onnx` feature)".to_string(),
            })
        },
    ))
}
