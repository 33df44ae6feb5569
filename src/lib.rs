//! # Mosaic Assembler
//!
//! Out-of-core assembly of large image mosaics from independently
//! transformed tiles, plus slice-to-volume resampling driven by pairwise
//! slice registrations.
//!
//! ## Features
//!
//! - **Deferred loading**: source tiles are decoded column by column and
//!   evicted once no upcoming output tile needs them
//! - **Feathering**: last-writer-wins, nearest-interior, or distance-weighted
//!   blending across overlaps
//! - **Overlapped I/O**: output tiles are encoded and saved on a bounded
//!   worker pool while the next tile is composited
//! - **Registration trees**: pairwise stos records resolve into one tree
//!   with ambiguity and disjointness detection
//!
//! ## Architecture
//!
//! - [`transform`] - Point mappings (translation, rigid, affine, polynomial, cascade)
//! - [`raster`] - Single-channel rasters with physical spacing, and codecs
//! - [`io`] - Raster stores (filesystem, in-memory)
//! - [`mod@format`] - Mosaic descriptor, stos and manifest formats
//! - [`mosaic`] - Planner, deferred tile cache, compositing engine, coordinator
//! - [`registration`] - Registration tree and slice-to-volume resampler
//! - [`writer`] - Asynchronous bounded tile writer
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mosaic_assembler::{build_compute_pool, FsRasterStore, MosaicDescriptor, MosaicOptions, MosaicPipeline};
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let pool = build_compute_pool(0).unwrap();
//! let store = Arc::new(FsRasterStore::new());
//!
//! let descriptor = MosaicDescriptor::load("section.mosaic".as_ref()).unwrap();
//! let options = MosaicOptions {
//!     tile_size: Some((4096, 4096)),
//!     deferred: true,
//!     ..MosaicOptions::new("out/section.png")
//! };
//!
//! let report = MosaicPipeline::new(store, pool, runtime.handle().clone())
//!     .run(&descriptor, &options)
//!     .unwrap();
//! report.log_summary();
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod geometry;
pub mod io;
pub mod mosaic;
pub mod raster;
pub mod registration;
pub mod report;
pub mod runtime;
pub mod transform;
pub mod writer;

// Re-export commonly used types
pub use config::{Cli, Command, MosaicConfig, VolumeConfig};
pub use error::{IoError, ParseError, PipelineError, RegistrationError, SaveFailure, TransformError, Warning};
pub use format::{parse_stos, ManifestEntry, MosaicDescriptor, StosRecord, TileManifest, TileSpec};
pub use geometry::{BoundingBox, Point2};
pub use io::{FsRasterStore, MemoryStore, RasterStore};
pub use mosaic::{
    compute_bbox, composite_tile, DeferredTileCache, FeatherMode, LoadedTile, MosaicOptions,
    MosaicPipeline, MosaicPlan, OutputRegion, PlanMode,
};
pub use raster::{OutputType, RasterImage, SampleType};
pub use registration::{
    compute_footprint, load_stos_files, resample_slice, Footprint, StosForest, VolumeFrame,
    VolumeOptions, VolumePipeline,
};
pub use report::{RunKind, RunReport};
pub use runtime::{build_compute_pool, CancelFlag};
pub use transform::Transform;
pub use writer::{TileWriter, WriteJob, WriterReport, DEFAULT_IO_WORKERS};
