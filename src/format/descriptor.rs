//! Mosaic descriptor parsing.
//!
//! ```text
//! # comment
//! pixel_spacing: 1.0
//! tiles/t000.png, translation 0 0
//! tiles/t001.png, affine 1 0 0 1 50 0, masks/t001.png
//! ```
//!
//! Relative paths are resolved against the directory holding the descriptor.

use std::path::{Path, PathBuf};

use crate::error::{ParseError, PipelineError};
use crate::transform::{parse_transform, Transform};

/// One source tile of the mosaic.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSpec {
    pub path: PathBuf,
    pub mask_path: Option<PathBuf>,
    pub transform: Transform,
}

/// Parsed mosaic descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicDescriptor {
    /// Physical size of one source pixel
    pub pixel_spacing: f64,
    pub tiles: Vec<TileSpec>,
}

impl MosaicDescriptor {
    /// Parse descriptor text. `source_name` is only used in error messages.
    pub fn parse(text: &str, source_name: &str) -> Result<Self, ParseError> {
        let syntax = |line: usize, message: String| ParseError::Syntax {
            source_name: source_name.to_string(),
            line,
            message,
        };

        let mut pixel_spacing = None;
        let mut tiles = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(value) = line.strip_prefix("pixel_spacing:") {
                let spacing = value
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| syntax(line_no, format!("invalid pixel_spacing: {e}")))?;
                pixel_spacing = Some(spacing);
                continue;
            }

            let mut fields = line.split(',').map(str::trim);
            let path = fields
                .next()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| syntax(line_no, "missing image path".to_string()))?;
            let transform_text = fields
                .next()
                .ok_or_else(|| syntax(line_no, "missing transform".to_string()))?;
            let mask_path = fields.next().filter(|p| !p.is_empty()).map(PathBuf::from);
            if fields.next().is_some() {
                return Err(syntax(line_no, "too many fields".to_string()));
            }

            let transform =
                parse_transform(transform_text).map_err(|error| ParseError::Transform {
                    source_name: source_name.to_string(),
                    line: line_no,
                    error,
                })?;

            tiles.push(TileSpec {
                path: PathBuf::from(path),
                mask_path,
                transform,
            });
        }

        let pixel_spacing = pixel_spacing.ok_or_else(|| ParseError::MissingField {
            source_name: source_name.to_string(),
            field: "pixel_spacing",
        })?;

        Ok(Self {
            pixel_spacing,
            tiles,
        })
    }

    /// Read and parse a descriptor file, resolving tile paths against its
    /// directory.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!(
                "cannot read mosaic descriptor {}: {e}",
                path.display()
            ))
        })?;
        let mut descriptor = Self::parse(&text, &path.display().to_string())?;
        if let Some(base) = path.parent() {
            descriptor.resolve_relative_to(base);
        }
        Ok(descriptor)
    }

    /// Prefix every relative tile and mask path with `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        for tile in &mut self.tiles {
            if tile.path.is_relative() {
                tile.path = base.join(&tile.path);
            }
            if let Some(mask) = tile.mask_path.as_mut() {
                if mask.is_relative() {
                    *mask = base.join(&*mask);
                }
            }
        }
    }
}
