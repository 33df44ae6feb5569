//! Bounding-box planning and the output tile grid.
//!
//! The planner maps each source extent through its transform and unions the
//! results. In deferred mode every image is decoded only long enough to
//! read its extent and value range, so peak memory stays at one source
//! image.

use tracing::{debug, info, warn};

use crate::error::{PipelineError, Warning};
use crate::format::TileSpec;
use crate::geometry::{BoundingBox, Point2};
use crate::io::RasterStore;
use crate::raster::{RasterImage, SampleType};

use super::cache::decode_source;

/// Slack added before flooring physical extents to pixel counts.
const PIXEL_EPSILON: f64 = 1e-9;

/// Where the planner reads source extents from.
pub enum PlanMode<'a> {
    /// Images already decoded, indexed like the tile list. `None` marks an
    /// unreadable tile.
    Resident(&'a [Option<&'a RasterImage>]),

    /// Load each image, read its extent, drop it.
    Deferred {
        store: &'a dyn RasterStore,
        source_spacing: f64,
        shrink: u32,
    },
}

/// Result of [`compute_bbox`].
#[derive(Debug, Clone)]
pub struct BoundsResult {
    /// Union of every readable tile's mapped extent
    pub bbox: BoundingBox,
    /// Mapped extent per tile; empty for unreadable tiles
    pub tile_bounds: Vec<BoundingBox>,
    /// Smallest and largest source sample seen
    pub value_range: Option<(f32, f32)>,
    /// Widest sample type among readable tiles
    pub sample_type: Option<SampleType>,
    /// Indices of tiles that could not be decoded
    pub unreadable: Vec<usize>,
    pub warnings: Vec<Warning>,
}

/// Local physical extent of an image after shrinking.
pub fn local_extent(width: u32, height: u32, spacing: f64) -> BoundingBox {
    BoundingBox::from_extent(width as f64 * spacing, height as f64 * spacing)
}

pub(crate) fn widest(a: Option<SampleType>, b: SampleType) -> Option<SampleType> {
    match (a, b) {
        (None, b) => Some(b),
        (Some(SampleType::U8), b) => Some(b),
        (Some(a), _) => Some(a),
    }
}

pub(crate) fn merge_range(range: Option<(f32, f32)>, other: Option<(f32, f32)>) -> Option<(f32, f32)> {
    match (range, other) {
        (None, r) | (r, None) => r,
        (Some((lo, hi)), Some((a, b))) => Some((lo.min(a), hi.max(b))),
    }
}

/// Compute the mosaic bounding box and per-tile bounds.
///
/// Both modes evaluate identical arithmetic on identical extents, so they
/// produce bit-identical boxes for the same inputs.
pub fn compute_bbox(tiles: &[TileSpec], mode: PlanMode<'_>) -> BoundsResult {
    let mut result = BoundsResult {
        bbox: BoundingBox::EMPTY,
        tile_bounds: Vec::with_capacity(tiles.len()),
        value_range: None,
        sample_type: None,
        unreadable: Vec::new(),
        warnings: Vec::new(),
    };

    for (index, tile) in tiles.iter().enumerate() {
        let observed = match &mode {
            PlanMode::Resident(images) => images.get(index).copied().flatten().map(|image| {
                (image.dimensions(), image.spacing(), image.min_max(), image.sample_type())
            }),
            PlanMode::Deferred {
                store,
                source_spacing,
                shrink,
            } => match load_for_extent(*store, tile, *source_spacing, *shrink) {
                Ok(image) => Some((
                    image.dimensions(),
                    image.spacing(),
                    image.min_max(),
                    image.sample_type(),
                )),
                Err(warning) => {
                    warn!("{}", warning);
                    result.warnings.push(warning);
                    None
                }
            },
        };

        let bounds = match observed {
            Some(((width, height), spacing, range, sample_type)) => {
                result.value_range = merge_range(result.value_range, range);
                result.sample_type = widest(result.sample_type, sample_type);
                tile.transform.map_bounds(&local_extent(width, height, spacing))
            }
            None => {
                result.unreadable.push(index);
                BoundingBox::EMPTY
            }
        };

        debug!(
            tile = index,
            min_x = bounds.min.x,
            min_y = bounds.min.y,
            max_x = bounds.max.x,
            max_y = bounds.max.y,
            "tile bounds"
        );
        result.bbox = result.bbox.union(&bounds);
        result.tile_bounds.push(bounds);
    }

    result
}

/// The mask is decoded and checked too, then dropped with the image.
fn load_for_extent(
    store: &dyn RasterStore,
    tile: &TileSpec,
    spacing: f64,
    shrink: u32,
) -> Result<RasterImage, Warning> {
    decode_source(store, tile, spacing, shrink)
        .map(|(image, _)| image)
        .map_err(|message| Warning::SourceImageUnreadable {
            path: tile.path.clone(),
            message,
        })
}

// =============================================================================
// Mosaic Plan
// =============================================================================

/// One output tile of the plan, in mosaic pixels and physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputRegion {
    pub column: u32,
    pub row: u32,
    /// Pixel offset inside the mosaic
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Physical area covered by the region's pixels
    pub bounds: BoundingBox,
}

/// Output grid derived once per run.
///
/// Without tiling the plan holds a single region covering the whole mosaic.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicPlan {
    pub bbox: BoundingBox,
    pub spacing: f64,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub columns: u32,
    pub rows: u32,
    pub tiled: bool,
}

impl MosaicPlan {
    /// Build the grid for `bbox` at `spacing`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the spacing is not positive or the
    /// box is smaller than one output pixel.
    pub fn new(
        bbox: BoundingBox,
        spacing: f64,
        tile_size: Option<(u32, u32)>,
    ) -> Result<Self, PipelineError> {
        if spacing <= 0.0 || !spacing.is_finite() {
            return Err(PipelineError::Configuration(format!(
                "output pixel spacing must be positive, got {spacing}"
            )));
        }
        if bbox.is_empty() {
            return Err(PipelineError::Configuration(
                "no readable source image; mosaic bounding box is empty".to_string(),
            ));
        }

        let width = (bbox.width() / spacing + PIXEL_EPSILON).floor() as u32;
        let height = (bbox.height() / spacing + PIXEL_EPSILON).floor() as u32;
        if width == 0 || height == 0 {
            return Err(PipelineError::Configuration(format!(
                "mosaic of {}x{} physical units is smaller than one pixel at spacing {spacing}",
                bbox.width(),
                bbox.height()
            )));
        }

        let (tile_width, tile_height, tiled) = match tile_size {
            Some((tw, th)) if tw > 0 && th > 0 => (tw, th, true),
            Some(_) => {
                return Err(PipelineError::Configuration(
                    "tile width and height must be greater than 0".to_string(),
                ))
            }
            None => (width, height, false),
        };

        let plan = Self {
            bbox,
            spacing,
            width,
            height,
            tile_width,
            tile_height,
            columns: width.div_ceil(tile_width),
            rows: height.div_ceil(tile_height),
            tiled,
        };
        info!(
            width = plan.width,
            height = plan.height,
            columns = plan.columns,
            rows = plan.rows,
            spacing = plan.spacing,
            "planned mosaic"
        );
        Ok(plan)
    }

    pub fn tile_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// Region at `(column, row)`. Edge regions are clipped to the mosaic.
    pub fn region(&self, column: u32, row: u32) -> OutputRegion {
        let x = column * self.tile_width;
        let y = row * self.tile_height;
        let width = self.tile_width.min(self.width - x);
        let height = self.tile_height.min(self.height - y);
        let min = Point2::new(
            self.bbox.min.x + x as f64 * self.spacing,
            self.bbox.min.y + y as f64 * self.spacing,
        );
        let max = Point2::new(
            min.x + width as f64 * self.spacing,
            min.y + height as f64 * self.spacing,
        );
        OutputRegion {
            column,
            row,
            x,
            y,
            width,
            height,
            bounds: BoundingBox::new(min, max),
        }
    }

    /// Regions of one column, top to bottom.
    pub fn column(&self, column: u32) -> impl Iterator<Item = OutputRegion> + '_ {
        (0..self.rows).map(move |row| self.region(column, row))
    }
}

/// Indices of tiles whose bounds overlap `region`, in tile order.
pub fn overlapping_tiles(region: &BoundingBox, tile_bounds: &[BoundingBox]) -> Vec<usize> {
    tile_bounds
        .iter()
        .enumerate()
        .filter(|(_, bounds)| bounds.overlaps(region))
        .map(|(index, _)| index)
        .collect()
}
