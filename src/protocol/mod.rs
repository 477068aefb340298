//! Wire types for the embedding service

pub mod http;

pub use http::{EmbeddingData, EmbeddingRequest, EmbeddingResponse, HttpErrorResponse};
