//! Test utilities for integration tests.
//!
//! Builders for synthetic source tiles, a runtime/pool pair for driving the
//! pipelines from a plain test thread, and decoding helpers for outputs held
//! in a [`MemoryStore`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mosaic_assembler::format::{MosaicDescriptor, TileSpec};
use mosaic_assembler::io::MemoryStore;
use mosaic_assembler::raster::{decode_raster, RasterImage, SampleType};
use mosaic_assembler::transform::Transform;

// =============================================================================
// Executors
// =============================================================================

/// Compute pool and I/O runtime owned by one test.
pub struct TestExecutors {
    pub runtime: tokio::runtime::Runtime,
    pub pool: Arc<rayon::ThreadPool>,
}

impl TestExecutors {
    pub fn new() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(3)
                .build()
                .unwrap(),
        );
        Self { runtime, pool }
    }

    pub fn handle(&self) -> tokio::runtime::Handle {
        self.runtime.handle().clone()
    }
}

// =============================================================================
// Source Tiles
// =============================================================================

/// A uniform 8-bit tile.
pub fn flat_tile(width: u32, height: u32, value: f32) -> RasterImage {
    RasterImage::from_fn(width, height, 1.0, SampleType::U8, move |_, _| value)
}

/// An 8-bit tile whose value encodes its pixel position.
pub fn pattern_tile(width: u32, height: u32) -> RasterImage {
    RasterImage::from_fn(width, height, 1.0, SampleType::U8, |x, y| ((x * 7 + y * 3) % 251) as f32)
}

/// Store each raster under its path and build a descriptor over them.
pub fn descriptor_with(
    store: &MemoryStore,
    tiles: &[(&str, RasterImage, Transform)],
) -> MosaicDescriptor {
    let specs = tiles
        .iter()
        .map(|(path, raster, transform)| {
            store.insert_raster(path, raster).unwrap();
            TileSpec {
                path: PathBuf::from(path),
                mask_path: None,
                transform: transform.clone(),
            }
        })
        .collect();
    MosaicDescriptor {
        pixel_spacing: 1.0,
        tiles: specs,
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// Decode an image saved into the store.
pub fn decoded(store: &MemoryStore, path: impl AsRef<Path>) -> RasterImage {
    let path = path.as_ref();
    let bytes = store
        .get_bytes(path)
        .unwrap_or_else(|| panic!("{} was not written", path.display()));
    decode_raster(&bytes, path, 1.0).unwrap()
}

/// Every stored path whose name contains `fragment`, sorted.
pub fn paths_containing(store: &MemoryStore, fragment: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = store
        .paths()
        .into_iter()
        .filter(|p| p.to_string_lossy().contains(fragment))
        .collect();
    paths.sort();
    paths
}
