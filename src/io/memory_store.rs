use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use image::ImageFormat;

use super::RasterStore;
use crate::error::IoError;
use crate::raster::{decode_raster, encode_raster, RasterImage};

#[derive(Default)]
struct MemoryState {
    files: HashMap<PathBuf, Bytes>,
    loads: HashMap<PathBuf, usize>,
    rejected_saves: Vec<String>,
    save_delay: Option<Duration>,
}

/// In-process raster store keyed by path.
///
/// Images are kept encoded, so loads exercise the same decode path as files
/// on disk. Load counts are tracked per path, saves can be made to fail for
/// paths containing a given fragment, and every save can be slowed down.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use mosaic_assembler::io::{MemoryStore, RasterStore};
/// use mosaic_assembler::raster::{RasterImage, SampleType};
///
/// let store = MemoryStore::new();
/// let tile = RasterImage::new(4, 4, 1.0, SampleType::U8);
/// store.insert_raster("t0.png", &tile).unwrap();
///
/// let loaded = store.load(Path::new("t0.png"), 1.0).unwrap();
/// assert_eq!(loaded.dimensions(), (4, 4));
/// assert_eq!(store.load_count("t0.png"), 1);
/// ```
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Encode `raster` losslessly and store it under `path`.
    pub fn insert_raster(&self, path: impl AsRef<Path>, raster: &RasterImage) -> Result<(), IoError> {
        let path = path.as_ref();
        let encoded = encode_raster(raster, raster.sample_type(), ImageFormat::Png, path)?;
        self.insert_bytes(path, encoded);
        Ok(())
    }

    /// Store raw bytes under `path`.
    pub fn insert_bytes(&self, path: impl AsRef<Path>, data: Bytes) {
        self.state().files.insert(path.as_ref().to_path_buf(), data);
    }

    /// Make every save whose path contains `fragment` fail.
    pub fn reject_saves_containing(&self, fragment: impl Into<String>) {
        self.state().rejected_saves.push(fragment.into());
    }

    /// Sleep for `delay` before completing each save.
    pub fn delay_saves(&self, delay: Duration) {
        self.state().save_delay = Some(delay);
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.state().files.contains_key(path.as_ref())
    }

    /// Number of times `path` was loaded.
    pub fn load_count(&self, path: impl AsRef<Path>) -> usize {
        self.state().loads.get(path.as_ref()).copied().unwrap_or(0)
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.state().files.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn get_bytes(&self, path: impl AsRef<Path>) -> Option<Bytes> {
        self.state().files.get(path.as_ref()).cloned()
    }
}

impl RasterStore for MemoryStore {
    fn load(&self, path: &Path, spacing: f64) -> Result<RasterImage, IoError> {
        let data = {
            let mut state = self.state();
            *state.loads.entry(path.to_path_buf()).or_insert(0) += 1;
            state
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| IoError::NotFound(path.to_path_buf()))?
        };
        decode_raster(&data, path, spacing)
    }

    fn save(&self, path: &Path, encoded: Bytes) -> Result<(), IoError> {
        let delay = self.state().save_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state();
        let text = path.to_string_lossy();
        if state
            .rejected_saves
            .iter()
            .any(|fragment| text.contains(fragment.as_str()))
        {
            return Err(IoError::Write {
                path: path.to_path_buf(),
                message: "write rejected".to_string(),
            });
        }
        state.files.insert(path.to_path_buf(), encoded);
        Ok(())
    }

    fn identifier(&self) -> &str {
        "memory"
    }
}
