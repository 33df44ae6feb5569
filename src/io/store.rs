use std::path::Path;

use bytes::Bytes;

use crate::error::IoError;
use crate::raster::RasterImage;

/// Trait for loading source rasters and persisting encoded outputs.
///
/// Implementations must be thread-safe: loads happen on the coordinating
/// thread while saves run concurrently on the writer's I/O pool.
pub trait RasterStore: Send + Sync {
    /// Load and decode the image at `path`, tagging it with `spacing`.
    fn load(&self, path: &Path, spacing: f64) -> Result<RasterImage, IoError>;

    /// Persist already encoded bytes at `path`.
    fn save(&self, path: &Path, encoded: Bytes) -> Result<(), IoError>;

    /// Human-readable identifier for logs.
    fn identifier(&self) -> &str;
}
