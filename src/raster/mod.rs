//! Single-channel rasters with physical spacing.
//!
//! A [`RasterImage`] stores `f32` samples in row-major order together with the
//! physical size of one pixel (`spacing`) and the physical position of the
//! top-left corner of pixel `(0, 0)` (`origin`). Pixel `(i, j)` covers
//! `origin + [i, i + 1) * spacing` horizontally, so its center sits at
//! `origin + (i + 0.5) * spacing`.

mod codec;

pub use codec::{decode_raster, encode_raster, format_for_path, quantize};

use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Point2};

// =============================================================================
// Sample Types
// =============================================================================

/// Numeric type of stored samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    U8,
    U16,
    /// Signed 16-bit. Rasters are non-negative, so values occupy `0..=32767`.
    I16,
}

impl SampleType {
    /// Largest representable sample value.
    pub fn max_value(self) -> f32 {
        match self {
            SampleType::U8 => u8::MAX as f32,
            SampleType::U16 => u16::MAX as f32,
            SampleType::I16 => i16::MAX as f32,
        }
    }
}

/// Requested numeric type of written images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Same type as the source images
    #[default]
    Native,
    Int16,
    Uint16,
}

impl OutputType {
    pub fn resolve(self, native: SampleType) -> SampleType {
        match self {
            OutputType::Native => native,
            OutputType::Int16 => SampleType::I16,
            OutputType::Uint16 => SampleType::U16,
        }
    }
}

// =============================================================================
// Raster Image
// =============================================================================

/// A 2-D array of samples plus spacing/origin metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    spacing: f64,
    origin: Point2,
    sample_type: SampleType,
    data: Vec<f32>,
}

impl RasterImage {
    /// Create a zero-filled raster with its origin at `(0, 0)`.
    pub fn new(width: u32, height: u32, spacing: f64, sample_type: SampleType) -> Self {
        Self {
            width,
            height,
            spacing,
            origin: Point2::ORIGIN,
            sample_type,
            data: vec![0.0; width as usize * height as usize],
        }
    }

    /// Wrap existing row-major samples.
    ///
    /// Returns `None` when `data.len() != width * height`.
    pub fn from_data(
        width: u32,
        height: u32,
        spacing: f64,
        sample_type: SampleType,
        data: Vec<f32>,
    ) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            spacing,
            origin: Point2::ORIGIN,
            sample_type,
            data,
        })
    }

    /// Build a raster by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(
        width: u32,
        height: u32,
        spacing: f64,
        sample_type: SampleType,
        f: impl Fn(u32, u32) -> f32,
    ) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            spacing,
            origin: Point2::ORIGIN,
            sample_type,
            data,
        }
    }

    pub fn with_origin(mut self, origin: Point2) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_spacing(mut self, spacing: f64) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn origin(&self) -> Point2 {
        self.origin
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Approximate resident size in bytes.
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        let idx = y as usize * self.width as usize + x as usize;
        self.data[idx] = value;
    }

    /// Physical extent covered by the pixels.
    pub fn extent(&self) -> BoundingBox {
        BoundingBox::new(
            self.origin,
            Point2::new(
                self.origin.x + self.width as f64 * self.spacing,
                self.origin.y + self.height as f64 * self.spacing,
            ),
        )
    }

    /// Convert a physical point into continuous pixel-index coordinates, where
    /// integer values land on pixel centers.
    #[inline]
    pub fn physical_to_index(&self, p: Point2) -> (f64, f64) {
        (
            (p.x - self.origin.x) / self.spacing - 0.5,
            (p.y - self.origin.y) / self.spacing - 0.5,
        )
    }

    /// Physical position of the center of pixel `(x, y)`.
    #[inline]
    pub fn index_to_physical(&self, x: u32, y: u32) -> Point2 {
        Point2::new(
            self.origin.x + (x as f64 + 0.5) * self.spacing,
            self.origin.y + (y as f64 + 0.5) * self.spacing,
        )
    }

    /// True when the continuous index falls inside a pixel of the buffer.
    #[inline]
    pub fn contains_index(&self, fx: f64, fy: f64) -> bool {
        fx >= -0.5 && fy >= -0.5 && fx < self.width as f64 - 0.5 && fy < self.height as f64 - 0.5
    }

    /// Bilinear sample at a continuous index.
    ///
    /// Returns `None` outside the buffer. Near the border the neighbors are
    /// clamped to the edge pixels.
    pub fn sample_bilinear(&self, fx: f64, fy: f64) -> Option<f32> {
        if !self.contains_index(fx, fy) || self.data.is_empty() {
            return None;
        }
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        let cx = fx.clamp(0.0, max_x);
        let cy = fy.clamp(0.0, max_y);
        let x0 = cx.floor() as u32;
        let y0 = cy.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let tx = (cx - x0 as f64) as f32;
        let ty = (cy - y0 as f64) as f32;

        let top = self.get(x0, y0) * (1.0 - tx) + self.get(x1, y0) * tx;
        let bottom = self.get(x0, y1) * (1.0 - tx) + self.get(x1, y1) * tx;
        Some(top * (1.0 - ty) + bottom * ty)
    }

    /// Nearest-neighbor sample at a continuous index.
    pub fn sample_nearest(&self, fx: f64, fy: f64) -> Option<f32> {
        if !self.contains_index(fx, fy) || self.data.is_empty() {
            return None;
        }
        let x = fx.round().clamp(0.0, (self.width - 1) as f64) as u32;
        let y = fy.round().clamp(0.0, (self.height - 1) as f64) as u32;
        Some(self.get(x, y))
    }

    /// Box-average downsample by an integer factor.
    ///
    /// Partial blocks at the right and bottom edges are dropped, matching
    /// `floor(size / factor)`. The spacing grows by `factor`.
    pub fn shrink(&self, factor: u32) -> RasterImage {
        if factor <= 1 {
            return self.clone();
        }
        let width = (self.width / factor).max(1);
        let height = (self.height / factor).max(1);
        let mut out = RasterImage::new(width, height, self.spacing * factor as f64, self.sample_type)
            .with_origin(self.origin);
        for y in 0..height {
            for x in 0..width {
                let mut sum = 0.0f64;
                let mut count = 0u32;
                for sy in (y * factor)..((y + 1) * factor).min(self.height) {
                    for sx in (x * factor)..((x + 1) * factor).min(self.width) {
                        sum += self.get(sx, sy) as f64;
                        count += 1;
                    }
                }
                out.set(x, y, (sum / count.max(1) as f64) as f32);
            }
        }
        out
    }

    /// Mirror the pixels left to right in place.
    pub fn flip_horizontal(&mut self) {
        let width = self.width as usize;
        if width == 0 {
            return;
        }
        for row in self.data.chunks_mut(width) {
            row.reverse();
        }
    }

    /// Smallest and largest sample, or `None` for an empty raster.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.data.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Linearly map `[lo, hi]` onto `[0, max]` in place.
    ///
    /// A degenerate range maps every sample to zero.
    pub fn remap(&mut self, lo: f32, hi: f32, max: f32) {
        let range = hi - lo;
        for v in &mut self.data {
            *v = if range > 0.0 {
                ((*v - lo) / range * max).clamp(0.0, max)
            } else {
                0.0
            };
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
