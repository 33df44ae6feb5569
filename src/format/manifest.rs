//! JSON index describing a tiled mosaic.
//!
//! A viewer reads the manifest to place every output tile without loading
//! the whole mosaic. Tiles that were skipped because no source overlapped
//! them are absent and should be drawn as background.
//!
//! ```json
//! {
//!   "mosaic_width": 200,
//!   "mosaic_height": 200,
//!   "tile_width": 64,
//!   "tile_height": 64,
//!   "columns": 4,
//!   "rows": 4,
//!   "tiles": [{ "column": 0, "row": 0, "x": 0, "y": 0, "width": 64, "height": 64, "file": "m.000.000.png" }]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::geometry::Point2;
use crate::raster::SampleType;

/// One written output tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub column: u32,
    pub row: u32,
    /// Pixel offset of the tile inside the mosaic
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// File name relative to the manifest
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_file: Option<String>,
}

/// Index of a tiled mosaic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileManifest {
    pub mosaic_width: u32,
    pub mosaic_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub columns: u32,
    pub rows: u32,
    pub pixel_spacing: f64,
    pub bbox_min: Point2,
    pub bbox_max: Point2,
    pub sample_type: SampleType,
    pub tiles: Vec<ManifestEntry>,
}

impl TileManifest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
