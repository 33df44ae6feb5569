//! Text formats consumed and produced by the pipeline.
//!
//! - [`MosaicDescriptor`]: tile list with per-tile transforms
//! - [`StosRecord`]: pairwise slice-to-slice registration records
//! - [`TileManifest`]: JSON index of a tiled mosaic

mod descriptor;
mod manifest;
mod stos;

pub use descriptor::{MosaicDescriptor, TileSpec};
pub use manifest::{ManifestEntry, TileManifest};
pub use stos::{parse_stos, StosRecord};
