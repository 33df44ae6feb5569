//! Conversion between [`RasterImage`] and encoded image files.
//!
//! Decoding collapses color images to luminance. Encoding quantizes samples
//! to the requested [`SampleType`] and picks the container from the file
//! extension.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::{ColorType, DynamicImage, ImageBuffer, ImageFormat, Luma};

use crate::error::IoError;

use super::{RasterImage, SampleType};

/// Decode an encoded image into a raster with the given spacing.
pub fn decode_raster(data: &[u8], path: &Path, spacing: f64) -> Result<RasterImage, IoError> {
    let img = image::load_from_memory(data).map_err(|e| IoError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let (width, height) = (img.width(), img.height());
    let (sample_type, samples): (SampleType, Vec<f32>) = match img.color() {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => (
            SampleType::U8,
            img.to_luma8().into_raw().into_iter().map(f32::from).collect(),
        ),
        _ => (
            SampleType::U16,
            img.to_luma16().into_raw().into_iter().map(f32::from).collect(),
        ),
    };

    RasterImage::from_data(width, height, spacing, sample_type, samples).ok_or_else(|| {
        IoError::Decode {
            path: path.to_path_buf(),
            message: "decoded buffer does not match image dimensions".to_string(),
        }
    })
}

/// Round and clamp a sample into the range of `sample_type`.
#[inline]
pub fn quantize(value: f32, sample_type: SampleType) -> u16 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, sample_type.max_value()) as u16
}

/// Encode a raster as `sample_type` in the given container format.
pub fn encode_raster(
    raster: &RasterImage,
    sample_type: SampleType,
    format: ImageFormat,
    path: &Path,
) -> Result<Bytes, IoError> {
    let encode_error = |message: String| IoError::Encode {
        path: path.to_path_buf(),
        message,
    };

    let (width, height) = raster.dimensions();
    let dynamic = match sample_type {
        SampleType::U8 => {
            let pixels = raster
                .data()
                .iter()
                .map(|&v| quantize(v, SampleType::U8) as u8)
                .collect();
            ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(width, height, pixels)
                .map(DynamicImage::ImageLuma8)
        }
        SampleType::U16 | SampleType::I16 => {
            let pixels = raster
                .data()
                .iter()
                .map(|&v| quantize(v, sample_type))
                .collect();
            ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, pixels)
                .map(DynamicImage::ImageLuma16)
        }
    }
    .ok_or_else(|| encode_error("raster buffer does not match its dimensions".to_string()))?;

    let mut output = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut output, format)
        .map_err(|e| encode_error(e.to_string()))?;

    Ok(Bytes::from(output.into_inner()))
}

/// Container format implied by a file extension.
pub fn format_for_path(path: &Path) -> Result<ImageFormat, IoError> {
    ImageFormat::from_path(path).map_err(|e| IoError::Encode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
