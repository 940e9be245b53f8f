//! Model cache
//!
//! Keyed store of loaded, ready-to-generate model handles. Loading a model
//! is expensive, so the first `acquire` for an identifier performs the
//! backend load and every later (or concurrently waiting) caller shares the
//! same handle. Loads for different identifiers proceed independently. A
//! failed load leaves nothing behind; the next `acquire` retries from
//! scratch.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::backend::{ModelBackend, ModelHandle, QuantizationMode};
use crate::error::Result;

/// Process-wide cache of loaded models.
pub struct ModelCache {
    backend: Arc<dyn ModelBackend>,
    entries: DashMap<String, Arc<OnceCell<Arc<dyn ModelHandle>>>>,
    max_seq_len: usize,
    quantization: QuantizationMode,
}

impl ModelCache {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        max_seq_len: usize,
        quantization: QuantizationMode,
    ) -> Self {
        Self {
            backend,
            entries: DashMap::new(),
            max_seq_len,
            quantization,
        }
    }

    /// Return the cached handle for `identifier`, loading it on first use.
    ///
    /// Concurrent callers for the same identifier are serialized behind a
    /// single backend load; the winner populates the cell and the rest
    /// share its result.
    pub async fn acquire(&self, identifier: &str) -> Result<Arc<dyn ModelHandle>> {
        let cell = {
            let entry = self.entries.entry(identifier.to_string()).or_default();
            entry.value().clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                info!("loading model '{}' into cache", identifier);
                self.backend
                    .load(identifier, self.max_seq_len, self.quantization)
                    .await
            })
            .await;

        match result {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                // Drop the empty cell so the identifier is not poisoned and
                // a later acquire retries the load.
                self.entries
                    .remove_if(identifier, |_, existing| existing.get().is_none());
                Err(e)
            }
        }
    }

    /// Drop every cached handle and ask the backend to reclaim memory.
    pub fn release_all(&self) {
        let count = self.entries.len();
        self.entries.clear();
        self.backend.release_memory();
        debug!("released {} cached model(s)", count);
    }

    /// Number of identifiers currently cached (loaded or mid-load).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
