//! Mosaic assembly.
//!
//! ```text
//!   MosaicDescriptor
//!         │
//!         ▼
//!   compute_bbox ──▶ MosaicPlan ──▶ for each column, for each row:
//!                                     DeferredTileCache::prepare_column
//!                                     composite_tile   (rayon pool)
//!                                     TileWriter::submit (tokio pool)
//! ```
//!
//! The coordinator in [`MosaicPipeline`] is the only code that touches the
//! cache. Compute workers only read resident tiles and write disjoint row
//! bands of the output buffer.

mod cache;
mod composite;
mod pipeline;
mod plan;

pub use cache::{CacheStats, DeferredTileCache, LoadedTile};
pub use composite::{composite_tile, normalize_weights, Contributor, FeatherMode, OutputTile, COVERED};
pub use pipeline::{manifest_path, mask_output_path, tile_output_path, MosaicOptions, MosaicPipeline};
pub(crate) use plan::{merge_range, widest};
pub use plan::{compute_bbox, local_extent, overlapping_tiles, BoundsResult, MosaicPlan, OutputRegion, PlanMode};
