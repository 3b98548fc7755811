//! Periodic eviction of stale conversation memories.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::subsystems::runtime::{Component, ComponentFuture};

use super::MemoryManager;

/// Runs [`MemoryManager::evict_stale`] on a fixed interval until shutdown.
/// A failed sweep is logged and retried on the next tick.
pub struct MemorySweeper {
    memory: Arc<MemoryManager>,
    interval: Duration,
}

impl MemorySweeper {
    pub fn new(memory: Arc<MemoryManager>, interval: Duration) -> Self {
        Self { memory, interval }
    }
}

impl Component for MemorySweeper {
    fn id(&self) -> &str {
        "memory-sweeper"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately; skip it so a fresh process
            // does not sweep before anything was stored.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("memory sweeper stopping");
                        return Ok(());
                    }
                    _ = ticker.tick() => {
                        let active = self.memory.active();
                        if let Err(e) = self.memory.evict_stale(active.as_deref()).await {
                            warn!(error = %e, "memory sweep failed");
                        }
                    }
                }
            }
        })
    }
}
