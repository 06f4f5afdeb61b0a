//! Tiled surfaces - the dab pipeline exposed to the brush engine
//!
//! `draw_dab` runs rasterize -> fetch/allocate tile -> composite -> extend the
//! atomic region, for every tile the dab touches. Both surface variants are
//! the same [`TiledSurface`] over a different [`TileStore`]:
//! - [`FixedTiledSurface`]: bounded canvas, all tiles allocated up front
//! - [`SparseTiledSurface`]: unbounded, tiles allocated on first touch
//!
//! Surfaces are single-threaded and hold no locks. A host that reads tiles from
//! another thread must wrap the surface in its own synchronization.

mod atomic;
mod snapshot;


pub use atomic::AtomicRegion;
pub use snapshot::{Snapshot, TileBuffer};

use tracing::{debug, trace, warn};

use crate::brush::{blend, Dab, DabFootprint, DabRasterizer};
use crate::core::config::SurfaceConfig;
use crate::core::errors::SurfaceError;
use crate::tile::{FixedTileStore, PixelRect, Rgba, SparseTileStore, TileCoord, TileStore};

/// Hardness of the footprint used by [`Surface::sample_color`]
const SAMPLE_HARDNESS: f32 = 0.5;

/// Capability set every tiled surface provides to the brush engine
pub trait Surface: Send {
    /// Rasterize and composite one dab; returns true if any pixel changed
    fn draw_dab(&mut self, dab: &Dab) -> bool;

    /// Premultiplied color of pixel (x, y); transparent outside the canvas
    /// or where no tile exists
    fn get_color(&self, x: i32, y: i32) -> Rgba;

    /// Coverage-weighted average premultiplied color under a round,
    /// half-hard footprint centered at (x, y)
    fn sample_color(&self, x: f32, y: f32, radius: f32) -> Rgba;

    /// Open a dirty-region bracket
    ///
    /// # Panics
    /// If a bracket is already open.
    fn begin_atomic(&mut self);

    /// Close the bracket and return the region changed inside it
    ///
    /// # Panics
    /// If no bracket is open.
    fn end_atomic(&mut self) -> Option<PixelRect>;

    fn tile_size(&self) -> u32;

    /// Coordinates of all stored tiles, row-major
    fn tile_coords(&self) -> Vec<TileCoord>;

    /// Raw copy of a tile's pixels, if the tile exists
    fn export_tile(&self, coord: TileCoord) -> Option<TileBuffer>;

    /// Overwrite a tile from a raw buffer
    fn import_tile(&mut self, buffer: &TileBuffer) -> Result<(), SurfaceError>;

    fn save_snapshot(&self) -> Snapshot;

    /// Restore a snapshot; returns the region that changed
    fn load_snapshot(&mut self, snapshot: &Snapshot) -> Result<Option<PixelRect>, SurfaceError>;

    /// Union of all tiles holding visible pixels (tile granularity)
    fn bounding_box(&self) -> Option<PixelRect>;

    /// Mirror every dab across the vertical line `x = axis` (None = off)
    fn set_symmetry_axis(&mut self, axis: Option<f32>);

    fn symmetry_axis(&self) -> Option<f32>;

    /// Reset every pixel to transparent
    fn clear(&mut self);
}

/// A surface backed by a tile store
#[derive(Debug, Clone)]
pub struct TiledSurface<S> {
    store: S,
    rasterizer: DabRasterizer,
    region: AtomicRegion,
    symmetry_axis: Option<f32>,
}

/// Bounded, pre-allocated surface
pub type FixedTiledSurface = TiledSurface<FixedTileStore>;

/// Unbounded surface with lazy tile allocation
pub type SparseTiledSurface = TiledSurface<SparseTileStore>;

impl FixedTiledSurface {
    /// Allocate a width x height canvas with default settings
    pub fn new(width: u32, height: u32) -> Result<Self, SurfaceError> {
        Self::with_config(width, height, SurfaceConfig::default())
    }

    pub fn with_config(width: u32, height: u32, config: SurfaceConfig) -> Result<Self, SurfaceError> {
        config.validate()?;
        let store = FixedTileStore::new(width, height, config.tile_size)?;
        Ok(Self::from_store(store, config))
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.store.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.store.height()
    }
}

impl SparseTiledSurface {
    pub fn new() -> Self {
        Self::from_store(SparseTileStore::new(SurfaceConfig::default().tile_size), SurfaceConfig::default())
    }

    pub fn with_config(config: SurfaceConfig) -> Result<Self, SurfaceError> {
        config.validate()?;
        Ok(Self::from_store(SparseTileStore::new(config.tile_size), config))
    }
}

impl Default for SparseTiledSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TileStore> TiledSurface<S> {
    fn from_store(store: S, config: SurfaceConfig) -> Self {
        let tile_size = store.tile_size();
        Self {
            store,
            rasterizer: DabRasterizer::new(tile_size),
            region: AtomicRegion::new(),
            symmetry_axis: config.symmetry_axis,
        }
    }

    /// Read access to the backing store
    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drop tiles with no visible pixels (no-op for stores that never evict)
    pub fn evict_transparent(&mut self) -> usize {
        self.store.evict_transparent()
    }

    #[inline]
    pub fn is_atomic(&self) -> bool {
        self.region.is_active()
    }

    fn draw_single(&mut self, dab: &Dab) -> bool {
        let Some(footprint) = DabFootprint::new(dab) else {
            trace!("draw_dab: skipped degenerate dab {:?}", dab);
            return false;
        };
        let tile_size = self.store.tile_size();
        let clip = self.store.bounds();
        let needs_existing = dab.blend_mode.needs_existing_pixels();
        let mut changed = false;

        for span in footprint.tile_spans(tile_size, clip) {
            let Some(mask) = self.rasterizer.coverage_mask(&footprint, &span) else {
                continue;
            };
            let tile = if needs_existing {
                // Nothing to erase or recolor in a tile that was never painted
                match self.store.try_get_tile_mut(span.coord) {
                    Some(tile) => tile,
                    None => continue,
                }
            } else {
                match self.store.get_or_create_tile(span.coord) {
                    Ok(tile) => tile,
                    Err(err) => {
                        trace!("draw_dab: skipping tile ({}, {}): {}", span.coord.tx, span.coord.ty, err);
                        continue;
                    }
                }
            };

            if let Some(local) = blend(tile, span.local, mask, dab.color, dab.blend_mode) {
                let origin = span.coord.pixel_rect(tile_size);
                self.region.extend(local.offset(origin.x, origin.y));
                changed = true;
            }
        }

        changed
    }
}

impl<S: TileStore + Send> Surface for TiledSurface<S> {
    fn draw_dab(&mut self, dab: &Dab) -> bool {
        let mut changed = self.draw_single(dab);
        if let Some(axis) = self.symmetry_axis {
            changed |= self.draw_single(&dab.mirrored(axis));
        }
        changed
    }

    fn get_color(&self, x: i32, y: i32) -> Rgba {
        if let Some(bounds) = self.store.bounds() {
            if !bounds.contains(x, y) {
                return Rgba::TRANSPARENT;
            }
        }
        let tile_size = self.store.tile_size();
        let coord = TileCoord::containing(x, y, tile_size);
        match self.store.try_get_tile(coord) {
            Some(tile) => {
                let origin = coord.pixel_rect(tile_size);
                Rgba::from_pixel(tile.pixel((x - origin.x) as u32, (y - origin.y) as u32))
            }
            None => Rgba::TRANSPARENT,
        }
    }

    fn sample_color(&self, x: f32, y: f32, radius: f32) -> Rgba {
        if !x.is_finite() || !y.is_finite() {
            return Rgba::TRANSPARENT;
        }
        if !radius.is_finite() || radius < 1.0 {
            return self.get_color(x.floor() as i32, y.floor() as i32);
        }

        let probe = Dab::new(x, y, radius).with_hardness(SAMPLE_HARDNESS);
        let Some(footprint) = DabFootprint::new(&probe) else {
            return Rgba::TRANSPARENT;
        };
        let tile_size = self.store.tile_size();
        let mut rasterizer = DabRasterizer::new(tile_size);
        let mut sum = [0.0f64; 4];
        let mut weight = 0.0f64;

        for span in footprint.tile_spans(tile_size, self.store.bounds()) {
            let Some(mask) = rasterizer.coverage_mask(&footprint, &span) else {
                continue;
            };
            let width = span.local.width as usize;
            let tile = self.store.try_get_tile(span.coord);

            for (row_index, mask_row) in mask.chunks_exact(width).enumerate() {
                let ly = (span.local.y as usize + row_index) as u32;
                for (col, &w) in mask_row.iter().enumerate() {
                    if w <= 0.0 {
                        continue;
                    }
                    weight += w as f64;
                    if let Some(tile) = tile {
                        let pixel = Rgba::from_pixel(tile.pixel(span.local.x as u32 + col as u32, ly));
                        sum[0] += (pixel.r * w) as f64;
                        sum[1] += (pixel.g * w) as f64;
                        sum[2] += (pixel.b * w) as f64;
                        sum[3] += (pixel.a * w) as f64;
                    }
                }
            }
        }

        if weight <= 0.0 {
            return Rgba::TRANSPARENT;
        }
        Rgba {
            r: (sum[0] / weight) as f32,
            g: (sum[1] / weight) as f32,
            b: (sum[2] / weight) as f32,
            a: (sum[3] / weight) as f32,
        }
    }

    fn begin_atomic(&mut self) {
        self.region.begin();
    }

    fn end_atomic(&mut self) -> Option<PixelRect> {
        let dirty = self.region.end();
        trace!("end_atomic: dirty {:?}", dirty);
        dirty
    }

    fn tile_size(&self) -> u32 {
        self.store.tile_size()
    }

    fn tile_coords(&self) -> Vec<TileCoord> {
        self.store.tile_coords()
    }

    fn export_tile(&self, coord: TileCoord) -> Option<TileBuffer> {
        self.store
            .try_get_tile(coord)
            .map(|tile| TileBuffer::from_tile(coord, tile))
    }

    fn import_tile(&mut self, buffer: &TileBuffer) -> Result<(), SurfaceError> {
        if buffer.tile_size != self.store.tile_size() {
            warn!(
                "import_tile: tile ({}, {}) has size {}, surface uses {}",
                buffer.coord.tx,
                buffer.coord.ty,
                buffer.tile_size,
                self.store.tile_size()
            );
            return Err(SurfaceError::TileSizeMismatch {
                expected: self.store.tile_size(),
                actual: buffer.tile_size,
            });
        }
        let tile = buffer.to_tile()?;
        if let Err(err) = self.store.insert_tile(buffer.coord, tile) {
            warn!("import_tile: rejected tile ({}, {}): {}", buffer.coord.tx, buffer.coord.ty, err);
            return Err(err);
        }

        let rect = buffer.coord.pixel_rect(self.store.tile_size());
        let rect = match self.store.bounds() {
            Some(bounds) => rect.intersect(&bounds).unwrap_or_default(),
            None => rect,
        };
        self.region.extend(rect);
        Ok(())
    }

    fn save_snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.store)
    }

    fn load_snapshot(&mut self, snapshot: &Snapshot) -> Result<Option<PixelRect>, SurfaceError> {
        let dirty = snapshot.restore(&mut self.store)?;
        if let Some(rect) = dirty {
            self.region.extend(rect);
        }
        Ok(dirty)
    }

    fn bounding_box(&self) -> Option<PixelRect> {
        let tile_size = self.store.tile_size();
        let rect = self
            .store
            .tile_coords()
            .into_iter()
            .filter(|coord| self.store.try_get_tile(*coord).is_some_and(|t| !t.is_transparent()))
            .map(|coord| coord.pixel_rect(tile_size))
            .reduce(|a, b| a.union(&b))?;
        match self.store.bounds() {
            Some(bounds) => rect.intersect(&bounds),
            None => Some(rect),
        }
    }

    fn set_symmetry_axis(&mut self, axis: Option<f32>) {
        let axis = axis.filter(|a| a.is_finite());
        debug!("Symmetry axis set to {:?}", axis);
        self.symmetry_axis = axis;
    }

    fn symmetry_axis(&self) -> Option<f32> {
        self.symmetry_axis
    }

    fn clear(&mut self) {
        if let Some(rect) = self.bounding_box() {
            self.region.extend(rect);
        }
        self.store.clear();
        debug!("Surface cleared");
    }
}
