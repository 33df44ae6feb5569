use std::path::Path;

use bytes::Bytes;
use tracing::debug;

use super::RasterStore;
use crate::error::IoError;
use crate::raster::{decode_raster, RasterImage};

/// Raster store backed by the local filesystem.
///
/// Paths are used as given; relative paths resolve against the process
/// working directory.
#[derive(Debug, Clone, Default)]
pub struct FsRasterStore {}

impl FsRasterStore {
    pub fn new() -> Self {
        Self {}
    }
}

fn read_error(path: &Path, err: std::io::Error) -> IoError {
    if err.kind() == std::io::ErrorKind::NotFound {
        IoError::NotFound(path.to_path_buf())
    } else {
        IoError::Decode {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

impl RasterStore for FsRasterStore {
    fn load(&self, path: &Path, spacing: f64) -> Result<RasterImage, IoError> {
        let data = std::fs::read(path).map_err(|e| read_error(path, e))?;
        debug!(path = %path.display(), bytes = data.len(), "read image");
        decode_raster(&data, path, spacing)
    }

    fn save(&self, path: &Path, encoded: Bytes) -> Result<(), IoError> {
        let write_error = |e: std::io::Error| IoError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, &encoded).map_err(write_error)
    }

    fn identifier(&self) -> &str {
        "fs"
    }
}
