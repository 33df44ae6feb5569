//! Execution resources shared by both pipelines.
//!
//! Pools are built by the caller and injected, so nothing in the library
//! consults process-wide executor state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::PipelineError;

/// Cooperative stop signal checked by the coordinator between output images.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the run stop after the output currently being produced.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Build the compute pool used for pixel work.
///
/// `threads == 0` uses every available hardware thread.
pub fn build_compute_pool(threads: usize) -> Result<Arc<rayon::ThreadPool>, PipelineError> {
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("mosaic-compute-{i}"));
    if threads > 0 {
        builder = builder.num_threads(threads);
    }
    builder
        .build()
        .map(Arc::new)
        .map_err(|e| PipelineError::Configuration(format!("failed to build compute pool: {e}")))
}
