//! Processor contract and registry
//!
//! A processor is a sink-specific handler that consumes a dispatched batch.
//! Failures are isolated per processor: one failing sink never prevents its
//! siblings from seeing the same batch.

use async_trait::async_trait;
use courier_common::Notification;
use std::sync::Arc;
use tracing::warn;

/// A batch consumer attached to a batcher.
///
/// `process_batch` receives a non-empty batch in channel insertion order and
/// may perform network I/O. `process_batch_sync` is an optional synchronous
/// path used by `flush_sync`; implementations that provide it must not
/// suspend. Names are unique within one batcher.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    async fn process_batch(&self, batch: &[Notification]) -> anyhow::Result<()>;

    /// Synchronous variant, `None` when the processor has no non-suspending
    /// path.
    fn process_batch_sync(&self, batch: &[Notification]) -> Option<anyhow::Result<()>> {
        let _ = batch;
        None
    }
}

/// Insertion-ordered set of processors with unique names.
///
/// Rejected operations (duplicate add, unknown remove) log a diagnostic and
/// leave the registry unchanged; they never raise.
#[derive(Default)]
pub struct ProcessorRegistry {
    entries: Vec<Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, processor: Arc<dyn Processor>) {
        let name = processor.name();
        if self.entries.iter().any(|p| p.name() == name) {
            warn!(processor = %name, "Processor already registered, ignoring");
            return;
        }
        self.entries.push(processor);
    }

    pub fn remove(&mut self, name: &str) {
        match self.entries.iter().position(|p| p.name() == name) {
            Some(index) => {
                self.entries.remove(index);
            }
            None => warn!(processor = %name, "Processor not registered, nothing to remove"),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|p| p.name() == name)
    }

    /// Processors in insertion order; dispatch enumerates this.
    pub fn processors(&self) -> Vec<Arc<dyn Processor>> {
        self.entries.clone()
    }
}
