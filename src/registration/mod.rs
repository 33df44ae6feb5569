//! Slice registration: the dependency graph built from stos records and the
//! slice-to-volume resampler that consumes its cascades.
//!
//! ```text
//!   stos records ──▶ StosForest::build ──▶ require_single_tree
//!                                             │
//!                        collect_in_dependency_order + get_cascade
//!                                             │
//!                                             ▼
//!                     VolumePipeline: footprint ──▶ resample ──▶ TileWriter
//! ```

mod resample;
mod tree;

pub use resample::{
    compute_footprint, load_stos_files, resample_slice, Footprint, SliceExtent, VolumeFrame,
    VolumeOptions, VolumePipeline,
};
pub use tree::{DependencyEntry, SliceNode, StosForest};
