//! Per-region pixel compositing.
//!
//! Every output pixel center is mapped back through each contributor's
//! transform into source pixel space and sampled bilinearly. Overlapping
//! samples are resolved by the [`FeatherMode`]:
//!
//! | Mode     | Result at a pixel                                      |
//! |----------|--------------------------------------------------------|
//! | `none`   | the last contributor in iteration order                |
//! | `binary` | the contributor with the largest feather weight        |
//! | `blend`  | the feather-weighted average, weights normalized to 1  |
//!
//! The region is split into row bands that the compute pool fills in
//! parallel. Bands write disjoint slices of the output buffer and only read
//! the contributors.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geometry::Point2;
use crate::raster::{RasterImage, SampleType};
use crate::transform::Transform;

use super::cache::LoadedTile;
use super::plan::OutputRegion;

/// Mask value written for covered output pixels.
pub const COVERED: f32 = 255.0;

/// Bands per compute thread, so uneven rows still balance.
const BANDS_PER_THREAD: usize = 4;

/// Policy for resolving pixels covered by several source tiles.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FeatherMode {
    /// Last writer wins
    None,
    /// Single contributor with the largest weight
    Binary,
    /// Normalized weighted average
    #[default]
    Blend,
}

impl FeatherMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatherMode::None => "none",
            FeatherMode::Binary => "binary",
            FeatherMode::Blend => "blend",
        }
    }
}

impl std::fmt::Display for FeatherMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resident source tile taking part in one region.
pub struct Contributor<'a> {
    pub index: usize,
    pub tile: &'a LoadedTile,
    /// Maps mosaic coordinates into the tile's local frame
    inverse: Transform,
}

impl<'a> Contributor<'a> {
    pub fn new(index: usize, transform: &Transform, tile: &'a LoadedTile) -> Self {
        Self {
            index,
            tile,
            inverse: transform.inverted(),
        }
    }

    /// Sample and weight at a mosaic point, or `None` when the point falls
    /// outside the tile or its mask.
    #[inline]
    fn contribution(&self, p: Point2, mode: FeatherMode) -> Option<(f32, f32)> {
        let local = self.inverse.apply(p);
        if !local.is_finite() {
            return None;
        }
        let (fx, fy) = self.tile.image.physical_to_index(local);
        let value = self.tile.sample(fx, fy)?;
        let weight = match mode {
            FeatherMode::None => 1.0,
            FeatherMode::Binary | FeatherMode::Blend => self.tile.weight(fx, fy),
        };
        Some((value, weight))
    }
}

/// A composited output region. Ownership moves to the writer once complete.
#[derive(Debug, Clone)]
pub struct OutputTile {
    pub region: OutputRegion,
    pub pixels: RasterImage,
    /// [`COVERED`] where at least one contributor sampled, zero elsewhere
    pub coverage: RasterImage,
}

/// Scale `weights` so they sum to one.
///
/// All-zero weights (a sample exactly on a tile edge) become uniform.
pub fn normalize_weights(weights: &mut [f32]) {
    if weights.is_empty() {
        return;
    }
    let total: f32 = weights.iter().sum();
    if total > 0.0 && total.is_finite() {
        for w in weights.iter_mut() {
            *w /= total;
        }
    } else {
        let uniform = 1.0 / weights.len() as f32;
        weights.iter_mut().for_each(|w| *w = uniform);
    }
}

fn resolve(mode: FeatherMode, samples: &[(f32, f32)], weights: &mut Vec<f32>) -> Option<f32> {
    match mode {
        FeatherMode::None => samples.last().map(|&(v, _)| v),
        FeatherMode::Binary => {
            let mut best: Option<(f32, f32)> = None;
            for &(v, w) in samples {
                if best.map_or(true, |(_, bw)| w > bw) {
                    best = Some((v, w));
                }
            }
            best.map(|(v, _)| v)
        }
        FeatherMode::Blend => {
            if samples.is_empty() {
                return None;
            }
            weights.clear();
            weights.extend(samples.iter().map(|&(_, w)| w));
            normalize_weights(weights);
            Some(
                samples
                    .iter()
                    .zip(weights.iter())
                    .map(|(&(v, _), &w)| v * w)
                    .sum(),
            )
        }
    }
}

/// Composite `contributors` into a fresh buffer covering `region`.
///
/// # Arguments
///
/// * `pool` - Compute pool that fills row bands in parallel
/// * `spacing` - Physical size of one output pixel
/// * `sample_type` - Type tag of the produced raster
/// * `contributors` - Resident tiles in iteration order
pub fn composite_tile(
    pool: &rayon::ThreadPool,
    region: &OutputRegion,
    spacing: f64,
    sample_type: SampleType,
    contributors: &[Contributor<'_>],
    mode: FeatherMode,
) -> OutputTile {
    let mut pixels = RasterImage::new(region.width, region.height, spacing, sample_type)
        .with_origin(region.bounds.min);
    let mut coverage = RasterImage::new(region.width, region.height, spacing, SampleType::U8)
        .with_origin(region.bounds.min);

    let width = region.width as usize;
    let height = region.height as usize;
    if width > 0 && height > 0 && !contributors.is_empty() {
        let band_rows = (height / (pool.current_num_threads() * BANDS_PER_THREAD)).max(1);
        let origin = region.bounds.min;

        pool.install(|| {
            pixels
                .data_mut()
                .par_chunks_mut(width * band_rows)
                .zip(coverage.data_mut().par_chunks_mut(width * band_rows))
                .enumerate()
                .for_each(|(band, (pixel_band, coverage_band))| {
                    let mut samples = Vec::with_capacity(contributors.len());
                    let mut weights = Vec::with_capacity(contributors.len());
                    let rows = pixel_band
                        .chunks_mut(width)
                        .zip(coverage_band.chunks_mut(width));
                    for (offset, (pixel_row, coverage_row)) in rows.enumerate() {
                        let y = band * band_rows + offset;
                        let py = origin.y + (y as f64 + 0.5) * spacing;
                        for x in 0..width {
                            let p = Point2::new(origin.x + (x as f64 + 0.5) * spacing, py);
                            samples.clear();
                            samples.extend(contributors.iter().filter_map(|c| c.contribution(p, mode)));
                            if let Some(value) = resolve(mode, &samples, &mut weights) {
                                pixel_row[x] = value;
                                coverage_row[x] = COVERED;
                            }
                        }
                    }
                });
        });
    }

    OutputTile {
        region: *region,
        pixels,
        coverage,
    }
}
