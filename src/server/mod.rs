//! Server module

pub mod config;
pub mod hyper_server;
pub mod server;

pub use config::{Device, PoolingMode, ServerConfig};
pub use hyper_server::{bind, handle_request, serve};
pub use server::EmbeddingServer;
