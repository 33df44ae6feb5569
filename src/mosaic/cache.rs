//! Deferred source-tile cache.
//!
//! The cache owns every decoded source image. Slots are indexed like the
//! tile list and hold `Option<LoadedTile>`; evicting clears the slot.
//! Callers borrow tiles between coordinator steps and never keep references
//! across a column change.
//!
//! Eviction is driven by the compositing coordinator, which visits output
//! tiles column by column:
//!
//! ```text
//!   column c     : load needed(c)
//!                  evict everything outside needed(c) ∪ needed(c + 1)
//!   max_resident : evict least recently used tiles outside needed(c)
//! ```
//!
//! A tile that fails to decode is reported once as
//! [`Warning::SourceImageUnreadable`] and treated as absent from then on.

use std::collections::BTreeSet;
use std::sync::Arc;

use lru::LruCache;
use tracing::{debug, warn};

use crate::error::{IoError, Warning};
use crate::format::TileSpec;
use crate::io::RasterStore;
use crate::raster::RasterImage;

/// Chamfer step costs for axis and diagonal neighbors.
const CHAMFER_AXIS: f32 = 3.0;
const CHAMFER_DIAGONAL: f32 = 4.0;

// =============================================================================
// Loaded Tile
// =============================================================================

/// A decoded, preprocessed source tile.
#[derive(Debug, Clone)]
pub struct LoadedTile {
    pub image: RasterImage,
    pub mask: Option<RasterImage>,
    /// Distance in pixels from each masked-in pixel to the nearest
    /// masked-out pixel
    mask_distance: Option<Vec<f32>>,
}

impl LoadedTile {
    /// Pair an image with its optional mask and precompute the mask
    /// distance map.
    pub fn new(image: RasterImage, mask: Option<RasterImage>) -> Result<Self, String> {
        check_mask(&image, mask.as_ref())?;
        let mask_distance = mask.as_ref().map(chamfer_distance);
        Ok(Self {
            image,
            mask,
            mask_distance,
        })
    }

    /// Bilinear sample at a continuous index, or `None` outside the image or
    /// the mask.
    #[inline]
    pub fn sample(&self, fx: f64, fy: f64) -> Option<f32> {
        if let Some(mask) = &self.mask {
            if mask.sample_nearest(fx, fy)? <= 0.0 {
                return None;
            }
        }
        self.image.sample_bilinear(fx, fy)
    }

    /// Feather weight at a continuous index.
    ///
    /// The product of the distances to the nearest vertical and horizontal
    /// image edge, multiplied by the distance to the mask boundary when the
    /// tile has a mask. Two tiles overlapping along a straight seam
    /// therefore cross-fade linearly.
    #[inline]
    pub fn weight(&self, fx: f64, fy: f64) -> f32 {
        let (w, h) = (self.image.width() as f64, self.image.height() as f64);
        let px = fx + 0.5;
        let py = fy + 0.5;
        let dx = px.min(w - px).max(0.0);
        let dy = py.min(h - py).max(0.0);
        let edge = (dx * dy) as f32;

        match &self.mask_distance {
            Some(distance) => {
                let x = fx.round().clamp(0.0, w - 1.0) as usize;
                let y = fy.round().clamp(0.0, h - 1.0) as usize;
                edge * distance[y * self.image.width() as usize + x]
            }
            None => edge,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.image.byte_size() + self.mask.as_ref().map_or(0, RasterImage::byte_size)
    }
}

fn check_mask(image: &RasterImage, mask: Option<&RasterImage>) -> Result<(), String> {
    match mask {
        Some(mask) if mask.dimensions() != image.dimensions() => Err(format!(
            "mask is {}x{} but image is {}x{}",
            mask.width(),
            mask.height(),
            image.width(),
            image.height()
        )),
        _ => Ok(()),
    }
}

/// Decode a source image and its mask at the working resolution.
///
/// A mask that fails to decode or differs in size from its image makes the
/// whole tile unreadable. The planner and the cache both load through here,
/// so every mode agrees on which tiles exist.
pub(crate) fn decode_source(
    store: &dyn RasterStore,
    spec: &TileSpec,
    spacing: f64,
    shrink: u32,
) -> Result<(RasterImage, Option<RasterImage>), String> {
    let image = store
        .load(&spec.path, spacing)
        .map_err(|e| e.to_string())?
        .shrink(shrink);
    let mask = match &spec.mask_path {
        Some(path) => Some(
            store
                .load(path, spacing)
                .map_err(|e: IoError| format!("mask: {e}"))?
                .shrink(shrink),
        ),
        None => None,
    };
    check_mask(&image, mask.as_ref())?;
    Ok((image, mask))
}

/// Two-pass 3-4 chamfer distance to the nearest pixel with a zero mask
/// value, in pixel units. Pixels outside the image do not count as
/// boundary; fully masked-in images saturate at `width + height`.
fn chamfer_distance(mask: &RasterImage) -> Vec<f32> {
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    let cap = (w + h) as f32 * CHAMFER_AXIS;
    let mut d: Vec<f32> = mask
        .data()
        .iter()
        .map(|&v| if v > 0.0 { cap } else { 0.0 })
        .collect();

    let neighbors_forward = [
        (-1isize, 0isize, CHAMFER_AXIS),
        (-1, -1, CHAMFER_DIAGONAL),
        (0, -1, CHAMFER_AXIS),
        (1, -1, CHAMFER_DIAGONAL),
    ];
    let relax = |d: &mut [f32], x: usize, y: usize, dir: isize| {
        let idx = y * w + x;
        if d[idx] == 0.0 {
            return;
        }
        for &(ox, oy, cost) in &neighbors_forward {
            let nx = x as isize + ox * dir;
            let ny = y as isize + oy * dir;
            if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                continue;
            }
            let candidate = d[ny as usize * w + nx as usize] + cost;
            if candidate < d[idx] {
                d[idx] = candidate;
            }
        }
    };

    for y in 0..h {
        for x in 0..w {
            relax(&mut d, x, y, 1);
        }
    }
    for y in (0..h).rev() {
        for x in (0..w).rev() {
            relax(&mut d, x, y, -1);
        }
    }

    d.iter().map(|v| v / CHAMFER_AXIS).collect()
}

// =============================================================================
// Cache
// =============================================================================

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub loads: usize,
    pub evictions: usize,
    pub peak_resident: usize,
}

/// Store of decoded source tiles, mutated only by the coordinator.
pub struct DeferredTileCache {
    store: Arc<dyn RasterStore>,
    tiles: Vec<TileSpec>,
    source_spacing: f64,
    shrink: u32,
    slots: Vec<Option<LoadedTile>>,
    unreadable: Vec<bool>,
    recency: LruCache<usize, ()>,
    max_resident: Option<usize>,
    warnings: Vec<Warning>,
    stats: CacheStats,
}

impl DeferredTileCache {
    /// Create an empty cache over `tiles`.
    ///
    /// # Arguments
    ///
    /// * `source_spacing` - Physical size of one source pixel before shrinking
    /// * `shrink` - Integer downsample factor applied on load
    pub fn new(
        store: Arc<dyn RasterStore>,
        tiles: Vec<TileSpec>,
        source_spacing: f64,
        shrink: u32,
    ) -> Self {
        let count = tiles.len();
        Self {
            store,
            tiles,
            source_spacing,
            shrink: shrink.max(1),
            slots: (0..count).map(|_| None).collect(),
            unreadable: vec![false; count],
            recency: LruCache::unbounded(),
            max_resident: None,
            warnings: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    /// Bound the number of resident tiles during column preparation.
    pub fn with_max_resident(mut self, max_resident: Option<usize>) -> Self {
        self.max_resident = max_resident.filter(|&n| n > 0);
        self
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[TileSpec] {
        &self.tiles
    }

    pub fn is_resident(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(Option::is_some)
    }

    pub fn resident_count(&self) -> usize {
        self.recency.len()
    }

    /// Record a tile already known to be unreadable so it is never loaded.
    pub fn mark_unreadable(&mut self, index: usize) {
        if let Some(flag) = self.unreadable.get_mut(index) {
            *flag = true;
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Warnings raised since the last call.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// The resident tile at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&LoadedTile> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Load and preprocess the tile unless it is already resident.
    ///
    /// Returns `None` for unreadable or out-of-range tiles.
    pub fn ensure_loaded(&mut self, index: usize) -> Option<&LoadedTile> {
        if index >= self.tiles.len() || self.unreadable[index] {
            return None;
        }
        if self.slots[index].is_some() {
            self.recency.promote(&index);
            return self.slots[index].as_ref();
        }

        match self.load(index) {
            Ok(tile) => {
                debug!(
                    tile = index,
                    bytes = tile.byte_size(),
                    resident = self.recency.len() + 1,
                    "loaded source tile"
                );
                self.slots[index] = Some(tile);
                self.recency.put(index, ());
                self.stats.loads += 1;
                self.stats.peak_resident = self.stats.peak_resident.max(self.recency.len());
                self.slots[index].as_ref()
            }
            Err(message) => {
                let warning = Warning::SourceImageUnreadable {
                    path: self.tiles[index].path.clone(),
                    message,
                };
                warn!("{}", warning);
                self.warnings.push(warning);
                self.unreadable[index] = true;
                None
            }
        }
    }

    fn load(&self, index: usize) -> Result<LoadedTile, String> {
        let (image, mask) = decode_source(
            self.store.as_ref(),
            &self.tiles[index],
            self.source_spacing,
            self.shrink,
        )?;
        LoadedTile::new(image, mask)
    }

    /// Release the tile at `index`. A no-op for non-resident tiles.
    pub fn evict(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.take().is_some() {
                self.recency.pop(&index);
                self.stats.evictions += 1;
                debug!(tile = index, resident = self.recency.len(), "evicted source tile");
            }
        }
    }

    /// Load every tile. Used when deferred loading is disabled.
    pub fn load_all(&mut self) {
        for index in 0..self.tiles.len() {
            self.ensure_loaded(index);
        }
    }

    /// Prepare for output column whose tiles need `current`, keeping tiles
    /// the following column needs.
    pub fn prepare_column(&mut self, current: &BTreeSet<usize>, next: &BTreeSet<usize>) {
        let stale: Vec<usize> = self
            .recency
            .iter()
            .map(|(&index, _)| index)
            .filter(|index| !current.contains(index) && !next.contains(index))
            .collect();
        for index in stale {
            self.evict(index);
        }

        for &index in current {
            if !self.is_resident(index) {
                self.make_room(current);
            }
            self.ensure_loaded(index);
        }
    }

    /// Evict least recently used tiles outside `keep` until a new tile fits
    /// under the ceiling.
    fn make_room(&mut self, keep: &BTreeSet<usize>) {
        let Some(max) = self.max_resident else {
            return;
        };
        while self.recency.len() >= max {
            let victim = self
                .recency
                .iter()
                .rev()
                .map(|(&index, _)| index)
                .find(|index| !keep.contains(index));
            match victim {
                Some(index) => self.evict(index),
                None => break,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
