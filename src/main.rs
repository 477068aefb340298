//! Embedding Server Main
//!
//! Entry point for the local HTTP embedding server

use embedding_service::{default_loader, EmbeddingServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Defaults, optional EMBED_CONFIG file, then environment
    let config = ServerConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .without_time()
        .init();

    let loader = default_loader(&config)?;
    let server = EmbeddingServer::new(config, loader)?;

    server.start().await?;

    Ok(())
}
