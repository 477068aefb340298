//! Embedding service core
//!
//! The engine capability, the readiness state machine, vector
//! post-processing and the service that ties them together.

pub mod model;
pub mod provision;
pub mod service;
pub mod state;
pub mod vector;

// Re-exports
pub use model::{EmbeddingEngine, EngineLoader, ModelInfo};
pub use provision::{DirectoryStatus, ModelDirectory};
pub use service::{EmbeddingService, DEFAULT_BATCH_SIZE};
pub use state::{ServiceState, StateHolder};

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Result type for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Errors that can occur while configuring, loading or serving the model
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("invalid input type: {found}")]
    InvalidInputType { found: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("model not ready: {state}")]
    NotReady { state: ServiceState },

    #[error("Model load failed: {error}")]
    LoadFailure { error: String },

    #[error("Inference failed: {error}")]
    InferenceError { error: String },

    #[error("IO error: {error}")]
    IoError { error: std::io::Error },

    #[error("TOML parsing error: {error}")]
    TomlError { error: toml::de::Error },
}

impl EmbeddingError {
    /// True for errors the client caused and can fix by changing the request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EmbeddingError::InvalidInputType { .. } | EmbeddingError::InvalidRequest { .. }
        )
    }
}

impl From<std::io::Error> for EmbeddingError {
    fn from(error: std::io::Error) -> Self {
        EmbeddingError::IoError { error }
    }
}

impl From<toml::de::Error> for EmbeddingError {
    fn from(error: toml::de::Error) -> Self {
        EmbeddingError::TomlError { error }
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for EmbeddingError {
    fn from(error: ort::Error) -> Self {
        EmbeddingError::LoadFailure { error: error.to_string() }
    }
}
