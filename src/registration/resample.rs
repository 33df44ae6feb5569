//! Slice-to-volume resampling.
//!
//! Output pixels live in the root slice's frame. Each is carried into a
//! slice's local frame either through the full cascade down the
//! registration tree or through the slice's single incoming edge, then
//! sampled there. A shared footprint fixes the output grid so all slices of
//! the volume line up pixel for pixel.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Warning};
use crate::format::{parse_stos, StosRecord};
use crate::geometry::{BoundingBox, Point2};
use crate::io::RasterStore;
use crate::mosaic::{local_extent, mask_output_path, merge_range, widest, COVERED};
use crate::raster::{OutputType, RasterImage, SampleType};
use crate::report::{RunKind, RunReport};
use crate::runtime::CancelFlag;
use crate::transform::Transform;
use crate::writer::{TileWriter, WriteJob, DEFAULT_IO_WORKERS};

use super::tree::StosForest;

const PIXEL_EPSILON: f64 = 1e-9;

/// Which region of the root frame the volume covers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum VolumeFrame {
    /// Only pixels covered by every slice
    #[default]
    Intersection,
    /// The union of all slice extents
    Union,
}

/// Options for one volume run.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeOptions {
    pub output_dir: PathBuf,
    /// Directory searched for slice images without a per-slice override
    pub slice_dir: Option<PathBuf>,
    /// Per-slice directory overrides keyed by slice name
    pub slice_overrides: BTreeMap<String, PathBuf>,
    /// Apply the whole chain to the root instead of the adjacent edge only
    pub cascade: bool,
    pub frame: VolumeFrame,
    pub write_mask: bool,
    pub shrink: u32,
    pub threads: usize,
    pub io_workers: usize,
    pub output_type: OutputType,
    pub remap: bool,
}

impl VolumeOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            slice_dir: None,
            slice_overrides: BTreeMap::new(),
            cascade: true,
            frame: VolumeFrame::default(),
            write_mask: false,
            shrink: 1,
            threads: 0,
            io_workers: DEFAULT_IO_WORKERS,
            output_type: OutputType::default(),
            remap: false,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(PipelineError::Configuration("missing output directory".to_string()));
        }
        if self.shrink == 0 {
            return Err(PipelineError::Configuration(
                "shrink factor must be at least 1".to_string(),
            ));
        }
        if self.io_workers == 0 {
            return Err(PipelineError::Configuration(
                "io_workers must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Where the image for `slice` is read from.
    pub fn slice_path(&self, slice: &str) -> PathBuf {
        let file = Path::new(slice);
        if file.is_absolute() {
            return file.to_path_buf();
        }
        match self
            .slice_overrides
            .get(slice)
            .or(self.slice_dir.as_ref())
        {
            Some(dir) => dir.join(file),
            None => file.to_path_buf(),
        }
    }

    /// Where the resampled image for `slice` is written.
    pub fn output_path(&self, slice: &str) -> PathBuf {
        let name = Path::new(slice)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| slice.into());
        self.output_dir.join(name)
    }
}

/// Read and concatenate the records of several stos files.
pub fn load_stos_files(paths: &[PathBuf]) -> Result<Vec<StosRecord>, PipelineError> {
    let mut records = Vec::new();
    for path in paths {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("cannot read stos file {}: {e}", path.display()))
        })?;
        let parsed = parse_stos(&text, &path.display().to_string())?;
        debug!(path = %path.display(), records = parsed.len(), "loaded stos file");
        records.extend(parsed);
    }
    if records.is_empty() {
        return Err(PipelineError::Configuration(
            "no stos records were supplied".to_string(),
        ));
    }
    Ok(records)
}

// =============================================================================
// Footprint
// =============================================================================

/// Size and placement of one slice in the root frame.
#[derive(Debug, Clone)]
pub struct SliceExtent {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub spacing: f64,
    /// Maps root-frame coordinates into slice coordinates
    pub transform: Transform,
    /// Mapped extent in the root frame
    pub bounds: BoundingBox,
}

impl SliceExtent {
    pub fn new(name: impl Into<String>, width: u32, height: u32, spacing: f64, transform: Transform) -> Self {
        let bounds = transform
            .inverted()
            .map_bounds(&local_extent(width, height, spacing));
        Self {
            name: name.into(),
            width,
            height,
            spacing,
            transform,
            bounds,
        }
    }
}

/// Output grid shared by every slice of the volume.
#[derive(Debug, Clone)]
pub struct Footprint {
    pub bbox: BoundingBox,
    pub spacing: f64,
    pub width: u32,
    pub height: u32,
    /// `COVERED` where the frame is defined, zero elsewhere
    pub mask: RasterImage,
}

impl Footprint {
    pub fn covered_pixels(&self) -> usize {
        self.mask.data().iter().filter(|&&v| v > 0.0).count()
    }
}

/// Compute the shared footprint of `slices` on a grid of `spacing`.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyFootprint`] when no output pixel is covered.
pub fn compute_footprint(
    pool: &rayon::ThreadPool,
    slices: &[SliceExtent],
    frame: VolumeFrame,
    spacing: f64,
) -> Result<Footprint, PipelineError> {
    let mut extents = slices.iter().map(|s| s.bounds);
    let first = extents.next().ok_or(PipelineError::EmptyFootprint)?;
    let bbox = match frame {
        VolumeFrame::Intersection => extents.fold(first, |acc, b| acc.intersection(&b)),
        VolumeFrame::Union => extents.fold(first, |acc, b| acc.union(&b)),
    };
    if bbox.is_empty() {
        return Err(PipelineError::EmptyFootprint);
    }

    let width = (bbox.width() / spacing + PIXEL_EPSILON).floor() as u32;
    let height = (bbox.height() / spacing + PIXEL_EPSILON).floor() as u32;
    if width == 0 || height == 0 {
        return Err(PipelineError::EmptyFootprint);
    }

    let mut mask = RasterImage::new(width, height, spacing, SampleType::U8).with_origin(bbox.min);
    match frame {
        VolumeFrame::Union => mask.data_mut().fill(COVERED),
        VolumeFrame::Intersection => {
            let locals: Vec<(&Transform, BoundingBox)> = slices
                .iter()
                .map(|s| (&s.transform, local_extent(s.width, s.height, s.spacing)))
                .collect();
            let row_width = width as usize;
            pool.install(|| {
                mask.data_mut()
                    .par_chunks_mut(row_width)
                    .enumerate()
                    .for_each(|(y, row)| {
                        let py = bbox.min.y + (y as f64 + 0.5) * spacing;
                        for (x, value) in row.iter_mut().enumerate() {
                            let p = Point2::new(bbox.min.x + (x as f64 + 0.5) * spacing, py);
                            let inside_all = locals.iter().all(|(transform, extent)| {
                                let q = transform.apply(p);
                                q.x >= extent.min.x
                                    && q.x < extent.max.x
                                    && q.y >= extent.min.y
                                    && q.y < extent.max.y
                            });
                            if inside_all {
                                *value = COVERED;
                            }
                        }
                    });
            });
        }
    }

    let footprint = Footprint {
        bbox,
        spacing,
        width,
        height,
        mask,
    };
    if footprint.covered_pixels() == 0 {
        return Err(PipelineError::EmptyFootprint);
    }
    Ok(footprint)
}

/// Resample `image` into the footprint grid through `transform`, which
/// maps root-frame coordinates into slice coordinates.
///
/// Pixels outside the footprint mask or the slice buffer stay at zero.
pub fn resample_slice(
    pool: &rayon::ThreadPool,
    image: &RasterImage,
    footprint: &Footprint,
    transform: &Transform,
) -> RasterImage {
    let spacing = footprint.spacing;
    let origin = footprint.bbox.min;
    let mut out = RasterImage::new(footprint.width, footprint.height, spacing, image.sample_type())
        .with_origin(origin);
    let row_width = footprint.width as usize;
    let mask = footprint.mask.data();

    pool.install(|| {
        out.data_mut()
            .par_chunks_mut(row_width)
            .zip(mask.par_chunks(row_width))
            .enumerate()
            .for_each(|(y, (row, mask_row))| {
                let py = origin.y + (y as f64 + 0.5) * spacing;
                for (x, value) in row.iter_mut().enumerate() {
                    if mask_row[x] <= 0.0 {
                        continue;
                    }
                    let p = Point2::new(origin.x + (x as f64 + 0.5) * spacing, py);
                    let (fx, fy) = image.physical_to_index(transform.apply(p));
                    if let Some(sample) = image.sample_bilinear(fx, fy) {
                        *value = sample;
                    }
                }
            });
    });
    out
}

// =============================================================================
// Pipeline
// =============================================================================

struct PlannedSlice {
    name: String,
    path: PathBuf,
    transform: Transform,
    flipped: bool,
    spacing: f64,
}

/// Volume reconstruction with injected storage and executors.
pub struct VolumePipeline {
    store: Arc<dyn RasterStore>,
    pool: Arc<rayon::ThreadPool>,
    io: Handle,
    cancel: CancelFlag,
}

impl VolumePipeline {
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

    fn load_slice(&self, slice: &PlannedSlice, shrink: u32) -> Result<RasterImage, Warning> {
        self.store
            .load(&slice.path, slice.spacing)
            .map(|image| {
                let mut image = image.shrink(shrink);
                if slice.flipped {
                    image.flip_horizontal();
                }
                image
            })
            .map_err(|e| Warning::SourceImageUnreadable {
                path: slice.path.clone(),
                message: e.to_string(),
            })
    }

    /// Resample every slice of the registration tree into one frame.
    ///
    /// Must be called from a thread outside the tokio runtime behind the
    /// injected handle.
    pub fn run(
        &self,
        records: Vec<StosRecord>,
        options: &VolumeOptions,
    ) -> Result<RunReport, PipelineError> {
        options.validate()?;
        let forest = StosForest::build(records);
        let root = forest.require_single_tree()?.to_string();
        info!(
            root = %root,
            slices = forest.slice_count(),
            cascade = options.cascade,
            "registration resolved to a single tree"
        );

        let mut planned = Vec::new();
        for entry in forest.collect_in_dependency_order() {
            let transform = if options.cascade {
                Transform::cascade(forest.get_cascade(&root, entry.slice)?)
            } else {
                entry
                    .edge
                    .map(|record| record.transform.clone())
                    .unwrap_or_default()
            };
            planned.push(PlannedSlice {
                name: entry.slice.to_string(),
                path: options.slice_path(entry.slice),
                transform,
                flipped: forest.is_flipped(entry.slice),
                spacing: forest.pixel_spacing(entry.slice),
            });
        }

        // Extent pass: one slice decoded at a time.
        let mut warnings = Vec::new();
        let mut extents = Vec::new();
        let mut readable = Vec::new();
        let mut value_range = None;
        let mut native = None;
        for slice in &planned {
            match self.load_slice(slice, options.shrink) {
                Ok(image) => {
                    value_range = merge_range(value_range, image.min_max());
                    native = widest(native, image.sample_type());
                    extents.push(SliceExtent::new(
                        slice.name.clone(),
                        image.width(),
                        image.height(),
                        image.spacing(),
                        slice.transform.clone(),
                    ));
                    readable.push(slice);
                }
                Err(warning) => {
                    warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        let spacing = forest.pixel_spacing(&root) * options.shrink as f64;
        let footprint = compute_footprint(&self.pool, &extents, options.frame, spacing)?;
        info!(
            width = footprint.width,
            height = footprint.height,
            covered = footprint.covered_pixels(),
            "volume footprint computed"
        );
        let output_type = options
            .output_type
            .resolve(native.unwrap_or(SampleType::U8));

        let mut writer = TileWriter::new(self.io.clone(), Arc::clone(&self.store), options.io_workers);
        let mut resampled = 0;
        let mut cancelled = false;
        for slice in readable {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let image = match self.load_slice(slice, options.shrink) {
                Ok(image) => image,
                Err(warning) => {
                    warn!("{}", warning);
                    warnings.push(warning);
                    continue;
                }
            };

            let mut output = resample_slice(&self.pool, &image, &footprint, &slice.transform);
            drop(image);
            if options.remap {
                if let Some((lo, hi)) = value_range {
                    output.remap(lo, hi, output_type.max_value());
                }
            }
            resampled += 1;
            debug!(slice = %slice.name, transform = slice.transform.kind(), "resampled slice");

            let path = options.output_path(&slice.name);
            if options.write_mask {
                writer.submit(WriteJob {
                    path: mask_output_path(&path),
                    raster: footprint.mask.clone(),
                    sample_type: SampleType::U8,
                });
            }
            writer.submit(WriteJob {
                path,
                raster: output,
                sample_type: output_type,
            });
        }

        let written = writer.join();
        if cancelled {
            info!(written = written.written.len(), "volume run cancelled");
            return Err(PipelineError::Cancelled {
                completed: written.written.len(),
            });
        }
        if !written.failures.is_empty() {
            return Err(PipelineError::SaveFailure {
                failures: written.failures,
            });
        }

        Ok(RunReport {
            kind: RunKind::Volume,
            source_images: planned.len(),
            outputs_planned: planned.len(),
            outputs_composited: resampled,
            outputs_skipped: planned.len() - resampled,
            threads: self.pool.current_num_threads(),
            io_workers: options.io_workers,
            shrink: options.shrink,
            pixel_spacing: spacing,
            feathering: None,
            frame: Some(options.frame),
            sample_type: output_type,
            width: footprint.width,
            height: footprint.height,
            bbox: footprint.bbox,
            peak_resident: usize::from(resampled > 0),
            peak_pending_writes: written.peak_pending,
            manifest: None,
            written: written.written,
            warnings,
        })
    }
}
