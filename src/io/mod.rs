//! Raster storage layer.
//!
//! The pipeline never touches files directly. Source tiles, masks and
//! outputs all go through a [`RasterStore`], so the same pipeline runs
//! against the local filesystem ([`FsRasterStore`]) or an in-process map
//! ([`MemoryStore`]).

mod fs_store;
mod memory_store;
mod store;

pub use fs_store::FsRasterStore;
pub use memory_store::MemoryStore;
pub use store::RasterStore;
