//! Command-line configuration for mosaic-assembler.
//!
//! Two subcommands share one binary:
//!
//! - `mosaic` assembles tiles listed in a mosaic descriptor
//! - `volume` resamples registered slices into a common frame
//!
//! Every option can also be set through a `MOSAIC_`-prefixed environment
//! variable.
//!
//! # Example
//!
//! ```text
//! mosaic-assembler mosaic section.mosaic out/section.png \
//!     --tile-width 4096 --tile-height 4096 --deferred --feathering blend
//!
//! mosaic-assembler volume a-b.stos b-c.stos --output-dir volume/ --no-cascade
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::mosaic::{FeatherMode, MosaicOptions};
use crate::raster::OutputType;
use crate::registration::{VolumeFrame, VolumeOptions};
use crate::writer::DEFAULT_IO_WORKERS;

// =============================================================================
// Default Values
// =============================================================================

/// Default downsample factor.
pub const DEFAULT_SHRINK: u32 = 1;

/// Default compute thread count (0 = all hardware threads).
pub const DEFAULT_THREADS: usize = 0;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Mosaic assembler - stitches transformed image tiles into large mosaics
/// and reconstructs volumes from registered slices.
#[derive(Parser, Debug, Clone)]
#[command(name = "mosaic-assembler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Assemble a mosaic from a descriptor file.
    Mosaic(MosaicConfig),
    /// Resample registered slices into one volume frame.
    Volume(VolumeConfig),
}

// =============================================================================
// Mosaic Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct MosaicConfig {
    /// Mosaic descriptor listing tiles and their transforms.
    #[arg(env = "MOSAIC_DESCRIPTOR")]
    pub descriptor: PathBuf,

    /// Output image path. Tiled output writes `<stem>.<col>.<row>.<ext>`
    /// siblings and a `<stem>.manifest.json` index.
    #[arg(env = "MOSAIC_OUTPUT")]
    pub output: PathBuf,

    /// Integer downsample applied to every source tile.
    #[arg(long, default_value_t = DEFAULT_SHRINK, env = "MOSAIC_SHRINK")]
    pub shrink: u32,

    /// Override the descriptor's source pixel spacing.
    #[arg(long, env = "MOSAIC_PIXEL_SPACING")]
    pub pixel_spacing: Option<f64>,

    /// Output tile width in pixels. Setting either dimension enables tiling.
    #[arg(long, env = "MOSAIC_TILE_WIDTH")]
    pub tile_width: Option<u32>,

    /// Output tile height in pixels.
    #[arg(long, env = "MOSAIC_TILE_HEIGHT")]
    pub tile_height: Option<u32>,

    /// How overlapping tiles are combined.
    #[arg(long, value_enum, default_value_t = FeatherMode::Blend, env = "MOSAIC_FEATHERING")]
    pub feathering: FeatherMode,

    /// Numeric type of written images.
    #[arg(long, value_enum, default_value_t = OutputType::Native, env = "MOSAIC_OUTPUT_TYPE")]
    pub output_type: OutputType,

    /// Stretch the source intensity range to the full output range.
    #[arg(long, default_value_t = false, env = "MOSAIC_REMAP")]
    pub remap: bool,

    /// Compute threads (0 = all hardware threads).
    #[arg(long, default_value_t = DEFAULT_THREADS, env = "MOSAIC_THREADS")]
    pub threads: usize,

    /// Concurrent image writes.
    #[arg(long, default_value_t = DEFAULT_IO_WORKERS, env = "MOSAIC_IO_WORKERS")]
    pub io_workers: usize,

    /// Load source tiles on demand and evict them column by column.
    ///
    /// Requires tiled output.
    #[arg(long, default_value_t = false, env = "MOSAIC_DEFERRED")]
    pub deferred: bool,

    /// Write a coverage mask next to every output image.
    #[arg(long = "mask", default_value_t = false, env = "MOSAIC_MASK")]
    pub write_mask: bool,

    /// Upper bound on decoded source tiles held at once in deferred mode.
    #[arg(long, env = "MOSAIC_MAX_RESIDENT")]
    pub max_resident: Option<usize>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl MosaicConfig {
    /// Output tile size, with a missing dimension copied from the other.
    pub fn tile_size(&self) -> Option<(u32, u32)> {
        match (self.tile_width, self.tile_height) {
            (None, None) => None,
            (Some(w), None) => Some((w, w)),
            (None, Some(h)) => Some((h, h)),
            (Some(w), Some(h)) => Some((w, h)),
        }
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.output.as_os_str().is_empty() {
            return Err("Output path is required".to_string());
        }
        if self.deferred && self.tile_size().is_none() {
            return Err(
                "Deferred loading requires tiled output. Set --tile-width or --tile-height"
                    .to_string(),
            );
        }
        if matches!(self.tile_size(), Some((w, h)) if w == 0 || h == 0) {
            return Err("tile width and height must be greater than 0".to_string());
        }
        if self.shrink == 0 {
            return Err("shrink must be at least 1".to_string());
        }
        if let Some(spacing) = self.pixel_spacing {
            if spacing <= 0.0 || !spacing.is_finite() {
                return Err("pixel_spacing must be a positive number".to_string());
            }
        }
        if self.io_workers == 0 {
            return Err("io_workers must be greater than 0".to_string());
        }
        if self.max_resident == Some(0) {
            return Err("max_resident must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn to_options(&self) -> MosaicOptions {
        MosaicOptions {
            output: self.output.clone(),
            shrink: self.shrink,
            pixel_spacing: self.pixel_spacing,
            tile_size: self.tile_size(),
            feathering: self.feathering,
            output_type: self.output_type,
            remap: self.remap,
            threads: self.threads,
            io_workers: self.io_workers,
            deferred: self.deferred,
            write_mask: self.write_mask,
            max_resident: self.max_resident,
        }
    }
}

// =============================================================================
// Volume Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct VolumeConfig {
    /// Stos files holding the pairwise slice registrations.
    #[arg(required = true, env = "MOSAIC_STOS_FILES", value_delimiter = ',')]
    pub stos: Vec<PathBuf>,

    /// Directory receiving one resampled image per slice.
    #[arg(long, short, env = "MOSAIC_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Directory holding slice images. Defaults to the first stos file's
    /// directory.
    #[arg(long, env = "MOSAIC_SLICE_DIR")]
    pub slice_dir: Option<PathBuf>,

    /// Per-slice directory override, as `NAME=DIR`. May be repeated.
    #[arg(long = "slice-override", value_parser = parse_override, env = "MOSAIC_SLICE_OVERRIDES", value_delimiter = ',')]
    pub slice_overrides: Vec<(String, PathBuf)>,

    /// Apply only each slice's adjacent transform instead of the full
    /// chain to the root.
    #[arg(long, default_value_t = false, env = "MOSAIC_NO_CASCADE")]
    pub no_cascade: bool,

    /// Region of the root frame covered by the volume.
    #[arg(long, value_enum, default_value_t = VolumeFrame::Intersection, env = "MOSAIC_FRAME")]
    pub frame: VolumeFrame,

    /// Write the footprint mask next to every slice.
    #[arg(long = "mask", default_value_t = false, env = "MOSAIC_MASK")]
    pub write_mask: bool,

    /// Integer downsample applied to every slice.
    #[arg(long, default_value_t = DEFAULT_SHRINK, env = "MOSAIC_SHRINK")]
    pub shrink: u32,

    /// Compute threads (0 = all hardware threads).
    #[arg(long, default_value_t = DEFAULT_THREADS, env = "MOSAIC_THREADS")]
    pub threads: usize,

    /// Concurrent image writes.
    #[arg(long, default_value_t = DEFAULT_IO_WORKERS, env = "MOSAIC_IO_WORKERS")]
    pub io_workers: usize,

    /// Numeric type of written images.
    #[arg(long, value_enum, default_value_t = OutputType::Native, env = "MOSAIC_OUTPUT_TYPE")]
    pub output_type: OutputType,

    /// Stretch the source intensity range to the full output range.
    #[arg(long, default_value_t = false, env = "MOSAIC_REMAP")]
    pub remap: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

fn parse_override(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((name, dir)) if !name.trim().is_empty() && !dir.trim().is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(dir.trim())))
        }
        _ => Err(format!("expected NAME=DIR, got '{value}'")),
    }
}

impl VolumeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.stos.is_empty() {
            return Err("At least one stos file is required".to_string());
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err("Output directory is required. Set --output-dir or MOSAIC_OUTPUT_DIR".to_string());
        }
        if self.shrink == 0 {
            return Err("shrink must be at least 1".to_string());
        }
        if self.io_workers == 0 {
            return Err("io_workers must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn to_options(&self) -> VolumeOptions {
        let slice_dir = self.slice_dir.clone().or_else(|| {
            self.stos
                .first()
                .and_then(|path| path.parent())
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(|dir| dir.to_path_buf())
        });
        VolumeOptions {
            output_dir: self.output_dir.clone(),
            slice_dir,
            slice_overrides: self.slice_overrides.iter().cloned().collect::<BTreeMap<_, _>>(),
            cascade: !self.no_cascade,
            frame: self.frame,
            write_mask: self.write_mask,
            shrink: self.shrink,
            threads: self.threads,
            io_workers: self.io_workers,
            output_type: self.output_type,
            remap: self.remap,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
