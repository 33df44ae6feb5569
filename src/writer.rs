//! Asynchronous output writer.
//!
//! Finished rasters are handed to a tokio runtime where encoding and saving
//! run under `spawn_blocking`. A semaphore bounds the number of writes in
//! flight, and the queue of submitted jobs is capped at
//! `QUEUE_DEPTH_PER_WORKER * io_workers`: a submit that finds the queue full
//! first drains it, so slow storage stalls the producer instead of piling up
//! finished rasters.
//!
//! ```text
//!   coordinator thread             tokio runtime (injected handle)
//!   ──────────────────             ───────────────────────────────
//!   submit(job) ──spawn──────────▶ acquire permit
//!   submit(job) ──spawn──────────▶   spawn_blocking(encode + save)
//!      ...                         release permit
//!   flush() / join() ◀──block_on── collect results
//! ```
//!
//! Failures are collected and only surface from [`TileWriter::flush`] and
//! [`TileWriter::join`]. `submit`, `flush` and `join` may block the calling
//! thread, so none of them may be called from inside the runtime.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{IoError, SaveFailure};
use crate::io::RasterStore;
use crate::raster::{encode_raster, format_for_path, RasterImage, SampleType};

/// Default number of concurrent writes.
pub const DEFAULT_IO_WORKERS: usize = 4;

/// Pending jobs allowed per I/O worker before `submit` blocks.
pub const QUEUE_DEPTH_PER_WORKER: usize = 2;

/// A raster to be encoded and saved. The writer owns it until the save
/// completes.
#[derive(Debug)]
pub struct WriteJob {
    pub path: PathBuf,
    pub raster: RasterImage,
    pub sample_type: SampleType,
}

/// Outcome of every write submitted to a [`TileWriter`].
#[derive(Debug, Default)]
pub struct WriterReport {
    /// Paths saved successfully, in completion-collection order
    pub written: Vec<PathBuf>,
    pub failures: Vec<SaveFailure>,
    /// Most jobs ever pending at once
    pub peak_pending: usize,
}

/// Bounded asynchronous encoder and saver.
pub struct TileWriter {
    handle: Handle,
    store: Arc<dyn RasterStore>,
    permits: Arc<Semaphore>,
    pending: Vec<JoinHandle<Result<PathBuf, SaveFailure>>>,
    report: WriterReport,
    submitted: usize,
    queue_limit: usize,
}

impl TileWriter {
    /// Create a writer running on `handle` with at most `io_workers` saves in
    /// flight (at least one).
    pub fn new(handle: Handle, store: Arc<dyn RasterStore>, io_workers: usize) -> Self {
        let io_workers = io_workers.max(1);
        Self {
            handle,
            store,
            permits: Arc::new(Semaphore::new(io_workers)),
            pending: Vec::new(),
            report: WriterReport::default(),
            submitted: 0,
            queue_limit: io_workers * QUEUE_DEPTH_PER_WORKER,
        }
    }

    /// Queue a job.
    ///
    /// Returns immediately unless the queue is full, in which case every
    /// pending job is drained first.
    pub fn submit(&mut self, job: WriteJob) {
        if self.pending.len() >= self.queue_limit {
            debug!(pending = self.pending.len(), "write queue full, draining");
            self.flush();
        }
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);
        self.submitted += 1;
        debug!(path = %job.path.display(), "submitting output image");

        let task = self.handle.spawn(write_job(job, store, permits));
        self.pending.push(task);
        self.report.peak_pending = self.report.peak_pending.max(self.pending.len());
    }

    /// Number of jobs submitted and not yet collected. Never exceeds
    /// `QUEUE_DEPTH_PER_WORKER * io_workers`.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Total number of jobs ever submitted.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Block until every job submitted so far has finished.
    ///
    /// Returns the number of failures collected by this call.
    pub fn flush(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let pending = std::mem::take(&mut self.pending);
        let results = self.handle.block_on(async move {
            let mut results = Vec::with_capacity(pending.len());
            for task in pending {
                results.push(task.await);
            }
            results
        });

        let mut failed = 0;
        for result in results {
            match result {
                Ok(Ok(path)) => self.report.written.push(path),
                Ok(Err(failure)) => {
                    warn!(path = %failure.path.display(), error = %failure.message, "save failed");
                    self.report.failures.push(failure);
                    failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "writer task panicked or was cancelled");
                    self.report.failures.push(SaveFailure {
                        path: PathBuf::new(),
                        message: e.to_string(),
                    });
                    failed += 1;
                }
            }
        }
        failed
    }

    /// Wait for all outstanding work and return everything collected.
    pub fn join(mut self) -> WriterReport {
        self.flush();
        self.report
    }
}

async fn write_job(
    job: WriteJob,
    store: Arc<dyn RasterStore>,
    permits: Arc<Semaphore>,
) -> Result<PathBuf, SaveFailure> {
    let path = job.path.clone();
    let _permit = permits.acquire_owned().await.map_err(|e| SaveFailure {
        path: path.clone(),
        message: e.to_string(),
    })?;

    tokio::task::spawn_blocking(move || -> Result<PathBuf, SaveFailure> {
        let WriteJob {
            path,
            raster,
            sample_type,
        } = job;
        let to_failure = |e: IoError| SaveFailure {
            path: path.clone(),
            message: e.to_string(),
        };
        let format = format_for_path(&path).map_err(to_failure)?;
        let encoded = encode_raster(&raster, sample_type, format, &path).map_err(to_failure)?;
        store.save(&path, encoded).map_err(to_failure)?;
        Ok(path)
    })
    .await
    .unwrap_or_else(|e| {
        Err(SaveFailure {
            path,
            message: format!("write task failed: {e}"),
        })
    })
}
