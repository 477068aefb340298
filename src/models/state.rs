//! Readiness state machine
//!
//! ```text
//! Initializing --(load succeeds)--> Ready
//! Initializing --(load fails)-----> Failed
//! ```
//!
//! `Ready` and `Failed` are terminal. The engine handle is stored together
//! with the `Ready` state so it is written exactly once.

use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::model::EmbeddingEngine;

/// Externally visible service state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    Initializing,
    Ready,
    Failed(String),
}

impl ServiceState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ServiceState::Ready)
    }

    /// Short token reported by the readiness probe
    pub fn token(&self) -> String {
        match self {
            ServiceState::Initializing => "initializing".to_string(),
            ServiceState::Ready => "ready".to_string(),
            ServiceState::Failed(reason) => format!("failed: {}", reason),
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

enum Slot {
    Initializing,
    Ready(Arc<dyn EmbeddingEngine>),
    Failed(String),
}

/// Guarded tri-state holder read by every request before it reaches the engine
pub struct StateHolder {
    slot: RwLock<Slot>,
}

impl StateHolder {
    /// Holder for a model that is still loading
    pub fn initializing() -> Self {
        Self {
            slot: RwLock::new(Slot::Initializing),
        }
    }

    /// Holder for an engine that was loaded before the service was built
    pub fn ready(engine: Arc<dyn EmbeddingEngine>) -> Self {
        Self {
            slot: RwLock::new(Slot::Ready(engine)),
        }
    }

    pub async fn state(&self) -> ServiceState {
        match &*self.slot.read().await {
            Slot::Initializing => ServiceState::Initializing,
            Slot::Ready(_) => ServiceState::Ready,
            Slot::Failed(reason) => ServiceState::Failed(reason.clone()),
        }
    }

    /// The loaded engine, or the current state if there is none
    pub async fn engine(&self) -> Result<Arc<dyn EmbeddingEngine>, ServiceState> {
        match &*self.slot.read().await {
            Slot::Ready(engine) => Ok(Arc::clone(engine)),
            Slot::Initializing => Err(ServiceState::Initializing),
            Slot::Failed(reason) => Err(ServiceState::Failed(reason.clone())),
        }
    }

    /// Initializing -> Ready. Returns false if the state was already terminal.
    pub async fn mark_ready(&self, engine: Arc<dyn EmbeddingEngine>) -> bool {
        let mut slot = self.slot.write().await;
        match &*slot {
            Slot::Initializing => {
                info!("✅ Model ready (dimension {})", engine.dimension());
                *slot = Slot::Ready(engine);
                true
            }
            _ => {
                warn!("⚠️  Ignoring ready transition, state is already terminal");
                false
            }
        }
    }

    /// Initializing -> Failed. Returns false if the state was already terminal.
    pub async fn mark_failed(&self, reason: impl Into<String>) -> bool {
        let mut slot = self.slot.write().await;
        match &*slot {
            Slot::Initializing => {
                let reason = reason.into();
                warn!("❌ Model load failed: {}", reason);
                *slot = Slot::Failed(reason);
                true
            }
            _ => {
                warn!("⚠️  Ignoring failed transition, state is already terminal");
                false
            }
        }
    }
}
