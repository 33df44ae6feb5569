//! Mosaic coordinator.
//!
//! Drives the column loop: plans the grid, keeps the cache in step with the
//! current column, composites each overlapping region on the compute pool
//! and hands finished tiles to the writer.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::error::{PipelineError, SaveFailure};
use crate::format::{ManifestEntry, MosaicDescriptor, TileManifest};
use crate::io::RasterStore;
use crate::raster::{OutputType, RasterImage, SampleType};
use crate::report::{RunKind, RunReport};
use crate::runtime::CancelFlag;
use crate::writer::{TileWriter, WriteJob, DEFAULT_IO_WORKERS};

use super::cache::DeferredTileCache;
use super::composite::{composite_tile, Contributor, FeatherMode};
use super::plan::{compute_bbox, overlapping_tiles, MosaicPlan, PlanMode};

// =============================================================================
// Options
// =============================================================================

/// Options for one mosaic run.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicOptions {
    /// Output image path; tiled output derives sibling names from it
    pub output: PathBuf,
    /// Integer downsample applied to every source image
    pub shrink: u32,
    /// Replaces the descriptor's source pixel spacing
    pub pixel_spacing: Option<f64>,
    /// Output tile size in pixels; `None` writes a single image
    pub tile_size: Option<(u32, u32)>,
    pub feathering: FeatherMode,
    pub output_type: OutputType,
    /// Stretch the global source range to the output type's range
    pub remap: bool,
    /// Compute threads the caller built the pool with (0 = all)
    pub threads: usize,
    pub io_workers: usize,
    /// Load source images on demand; requires tiling
    pub deferred: bool,
    /// Also write a coverage mask next to every output image
    pub write_mask: bool,
    /// Upper bound on resident source images in deferred mode
    pub max_resident: Option<usize>,
}

impl MosaicOptions {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            shrink: 1,
            pixel_spacing: None,
            tile_size: None,
            feathering: FeatherMode::default(),
            output_type: OutputType::default(),
            remap: false,
            threads: 0,
            io_workers: DEFAULT_IO_WORKERS,
            deferred: false,
            write_mask: false,
            max_resident: None,
        }
    }

    /// Check the options against a descriptor and return the effective
    /// source pixel spacing.
    pub fn validate(&self, descriptor: &MosaicDescriptor) -> Result<f64, PipelineError> {
        let config = |message: &str| Err(PipelineError::Configuration(message.to_string()));

        if self.output.as_os_str().is_empty() {
            return config("missing output path");
        }
        if descriptor.tiles.is_empty() {
            return config("mosaic descriptor lists zero input tiles");
        }
        if self.deferred && self.tile_size.is_none() {
            return config("deferred loading requires tiled output (set a tile width or height)");
        }
        if matches!(self.tile_size, Some((w, h)) if w == 0 || h == 0) {
            return config("tile width and height must be greater than 0");
        }
        if self.shrink == 0 {
            return config("shrink factor must be at least 1");
        }
        if self.io_workers == 0 {
            return config("io_workers must be greater than 0");
        }

        let spacing = self.pixel_spacing.unwrap_or(descriptor.pixel_spacing);
        if spacing <= 0.0 || !spacing.is_finite() {
            return Err(PipelineError::Configuration(format!(
                "pixel spacing must be positive, got {spacing}"
            )));
        }
        Ok(spacing)
    }
}

// =============================================================================
// Output Naming
// =============================================================================

fn sibling(output: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mosaic".to_string());
    output.with_file_name(format!("{stem}{suffix}.{extension}"))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string())
}

/// `out/m.png` at column 2, row 5 becomes `out/m.002.005.png`.
pub fn tile_output_path(output: &Path, column: u32, row: u32) -> PathBuf {
    sibling(output, &format!(".{column:03}.{row:03}"), &extension_of(output))
}

/// `out/m.002.005.png` becomes `out/m.002.005.mask.png`.
pub fn mask_output_path(path: &Path) -> PathBuf {
    sibling(path, ".mask", &extension_of(path))
}

/// `out/m.png` becomes `out/m.manifest.json`.
pub fn manifest_path(output: &Path) -> PathBuf {
    sibling(output, ".manifest", "json")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// =============================================================================
// Pipeline
// =============================================================================

/// Mosaic assembly with injected storage and executors.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use mosaic_assembler::format::MosaicDescriptor;
/// use mosaic_assembler::io::FsRasterStore;
/// use mosaic_assembler::mosaic::{MosaicOptions, MosaicPipeline};
/// use mosaic_assembler::runtime::build_compute_pool;
///
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// let pool = build_compute_pool(0).unwrap();
/// let pipeline = MosaicPipeline::new(Arc::new(FsRasterStore::new()), pool, runtime.handle().clone());
///
/// let descriptor = MosaicDescriptor::load("section.mosaic".as_ref()).unwrap();
/// let report = pipeline.run(&descriptor, &MosaicOptions::new("out/section.png")).unwrap();
/// report.log_summary();
/// ```
pub struct MosaicPipeline {
    store: Arc<dyn RasterStore>,
    pool: Arc<rayon::ThreadPool>,
    io: Handle,
    cancel: CancelFlag,
}

impl MosaicPipeline {
    pub fn new(store: Arc<dyn RasterStore>, pool: Arc<rayon::ThreadPool>, io: Handle) -> Self {
        Self {
            store,
            pool,
            io,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Assemble the mosaic described by `descriptor`.
    ///
    /// Must be called from a thread outside the tokio runtime behind the
    /// injected handle.
    ///
    /// # Errors
    ///
    /// Configuration errors are returned before any image is read. Save
    /// failures and cancellation are returned after every submitted write
    /// has finished.
    pub fn run(
        &self,
        descriptor: &MosaicDescriptor,
        options: &MosaicOptions,
    ) -> Result<RunReport, PipelineError> {
        let source_spacing = options.validate(descriptor)?;
        let spacing = source_spacing * options.shrink as f64;
        let tiles = &descriptor.tiles;
        info!(
            tiles = tiles.len(),
            deferred = options.deferred,
            feathering = %options.feathering,
            store = self.store.identifier(),
            "starting mosaic assembly"
        );

        let mut cache = DeferredTileCache::new(
            Arc::clone(&self.store),
            tiles.clone(),
            source_spacing,
            options.shrink,
        )
        .with_max_resident(options.max_resident);

        let bounds = if options.deferred {
            let bounds = compute_bbox(
                tiles,
                PlanMode::Deferred {
                    store: self.store.as_ref(),
                    source_spacing,
                    shrink: options.shrink,
                },
            );
            for &index in &bounds.unreadable {
                cache.mark_unreadable(index);
            }
            bounds
        } else {
            cache.load_all();
            let images: Vec<Option<&RasterImage>> = (0..cache.len())
                .map(|index| cache.get(index).map(|tile| &tile.image))
                .collect();
            compute_bbox(tiles, PlanMode::Resident(&images))
        };
        let mut warnings = bounds.warnings.clone();
        warnings.extend(cache.take_warnings());

        let plan = MosaicPlan::new(bounds.bbox, spacing, options.tile_size)?;
        let output_type = options
            .output_type
            .resolve(bounds.sample_type.unwrap_or(SampleType::U8));
        let remap_range = if options.remap {
            bounds.value_range
        } else {
            None
        };

        let column_needs: Vec<BTreeSet<usize>> = (0..plan.columns)
            .map(|column| {
                plan.column(column)
                    .flat_map(|region| overlapping_tiles(&region.bounds, &bounds.tile_bounds))
                    .collect()
            })
            .collect();
        let no_tiles = BTreeSet::new();

        let mut writer = TileWriter::new(self.io.clone(), Arc::clone(&self.store), options.io_workers);
        let mut entries = Vec::new();
        let mut composited = 0;
        let mut skipped = 0;
        let mut cancelled = false;

        'columns: for column in 0..plan.columns {
            let needed = &column_needs[column as usize];
            if options.deferred {
                let next = column_needs.get(column as usize + 1).unwrap_or(&no_tiles);
                cache.prepare_column(needed, next);
                warnings.extend(cache.take_warnings());
            }
            debug!(
                column,
                sources = needed.len(),
                resident = cache.resident_count(),
                "starting column"
            );

            for region in plan.column(column) {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break 'columns;
                }

                let contributors: Vec<Contributor<'_>> =
                    overlapping_tiles(&region.bounds, &bounds.tile_bounds)
                        .into_iter()
                        .filter_map(|index| {
                            cache
                                .get(index)
                                .map(|tile| Contributor::new(index, &tiles[index].transform, tile))
                        })
                        .collect();
                if contributors.is_empty() {
                    skipped += 1;
                    debug!(column, row = region.row, "skipping region with no overlapping source");
                    continue;
                }

                let mut output = composite_tile(
                    &self.pool,
                    &region,
                    spacing,
                    output_type,
                    &contributors,
                    options.feathering,
                );
                if let Some((lo, hi)) = remap_range {
                    output.pixels.remap(lo, hi, output_type.max_value());
                }
                composited += 1;

                let path = if plan.tiled {
                    tile_output_path(&options.output, region.column, region.row)
                } else {
                    options.output.clone()
                };
                let mask_path = options.write_mask.then(|| mask_output_path(&path));

                entries.push(ManifestEntry {
                    column: region.column,
                    row: region.row,
                    x: region.x,
                    y: region.y,
                    width: region.width,
                    height: region.height,
                    file: file_name(&path),
                    mask_file: mask_path.as_deref().map(file_name),
                });

                writer.submit(WriteJob {
                    path,
                    raster: output.pixels,
                    sample_type: output_type,
                });
                if let Some(path) = mask_path {
                    writer.submit(WriteJob {
                        path,
                        raster: output.coverage,
                        sample_type: SampleType::U8,
                    });
                }
            }

            // Finished buffers of this column must be saved before the next
            // column's sources are loaded.
            if options.deferred {
                writer.flush();
            }
        }

        let written = writer.join();
        if cancelled {
            info!(written = written.written.len(), "mosaic assembly cancelled");
            return Err(PipelineError::Cancelled {
                completed: written.written.len(),
            });
        }
        if !written.failures.is_empty() {
            return Err(PipelineError::SaveFailure {
                failures: written.failures,
            });
        }

        let manifest = if plan.tiled {
            let path = manifest_path(&options.output);
            let manifest = TileManifest {
                mosaic_width: plan.width,
                mosaic_height: plan.height,
                tile_width: plan.tile_width,
                tile_height: plan.tile_height,
                columns: plan.columns,
                rows: plan.rows,
                pixel_spacing: plan.spacing,
                bbox_min: plan.bbox.min,
                bbox_max: plan.bbox.max,
                sample_type: output_type,
                tiles: entries,
            };
            self.save_manifest(&path, &manifest)?;
            Some(path)
        } else {
            None
        };

        let report = RunReport {
            kind: RunKind::Mosaic,
            source_images: tiles.len(),
            outputs_planned: plan.tile_count(),
            outputs_composited: composited,
            outputs_skipped: skipped,
            threads: self.pool.current_num_threads(),
            io_workers: options.io_workers,
            shrink: options.shrink,
            pixel_spacing: spacing,
            feathering: Some(options.feathering),
            frame: None,
            sample_type: output_type,
            width: plan.width,
            height: plan.height,
            bbox: plan.bbox,
            peak_resident: cache.stats().peak_resident,
            peak_pending_writes: written.peak_pending,
            manifest,
            written: written.written,
            warnings,
        };
        Ok(report)
    }

    fn save_manifest(&self, path: &Path, manifest: &TileManifest) -> Result<(), PipelineError> {
        let failure = |message: String| PipelineError::SaveFailure {
            failures: vec![SaveFailure {
                path: path.to_path_buf(),
                message,
            }],
        };
        let json = manifest.to_json().map_err(|e| failure(e.to_string()))?;
        self.store
            .save(path, Bytes::from(json))
            .map_err(|e| failure(e.to_string()))?;
        debug!(path = %path.display(), tiles = manifest.tiles.len(), "wrote manifest");
        Ok(())
    }
}
