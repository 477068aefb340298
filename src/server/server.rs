//! Embedding Server
//!
//! Wires configuration, model loading and the HTTP listener together.
//! With background loading the listener opens first and `/readyz` lags
//! until the loader finishes; otherwise the load completes before the
//! socket is bound.

use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

use crate::models::{EmbeddingService, EngineLoader, ModelDirectory};
use crate::server::config::ServerConfig;
use crate::server::hyper_server::{bind, serve};

pub struct EmbeddingServer {
    config: Arc<ServerConfig>,
    service: Arc<EmbeddingService>,
    loader: Option<EngineLoader>,
}

impl EmbeddingServer {
    /// Create a server whose engine is built by `loader`
    pub fn new(
        config: ServerConfig,
        loader: EngineLoader,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        config.validate()?;

        info!("🚀 Initializing Embedding Server");
        info!("   Model ID  : {}", config.embedding.model_id);
        info!("   Model Dir : {}", config.embedding.model_dir.display());
        info!("   Cache Dir : {}", config.embedding.cache_dir.display());
        info!("   Device    : {}", config.embedding.device);
        info!("   Batch     : {}", config.embedding.batch_size);

        std::fs::create_dir_all(&config.embedding.cache_dir)?;

        let service = Arc::new(EmbeddingService::new(
            config.embedding.model_id.clone(),
            config.embedding.batch_size,
        ));

        Ok(Self {
            config: Arc::new(config),
            service,
            loader: Some(loader),
        })
    }

    pub fn service(&self) -> Arc<EmbeddingService> {
        Arc::clone(&self.service)
    }

    /// Load, bind the configured address and serve until Ctrl+C
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("❌ Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("🛑 Shutting down");
        })
        .await
    }

    /// Load the model, bind and serve until `shutdown` resolves.
    ///
    /// A background load is spawned and the listener opens right away. A
    /// synchronous load finishes (or fails) before the socket is bound, so
    /// no connection is accepted while the model loads.
    pub async fn run<F>(
        mut self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()>,
    {
        let addr = self.config.bind_address()?;
        let directory = ModelDirectory::new(self.config.embedding.model_dir.clone());
        let loader = self.loader.take().ok_or("Server already started")?;

        if self.config.embedding.background_load {
            info!("⏳ Loading model in the background");
            self.service.spawn_load(Some(directory), loader);
        } else if let Err(e) = self.service.load(Some(directory), loader).await {
            // Keep serving so /readyz reports the failure
            error!("❌ Model load failed: {}", e);
        }

        let listener = bind(addr)?;
        info!("📡 Listening on http://{}", addr);

        serve(listener, self.service, shutdown).await?;
        Ok(())
    }
}
