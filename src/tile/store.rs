//! Tile storage
//!
//! Two stores share the [`TileStore`] contract:
//! - [`FixedTileStore`]: bounded grid allocated eagerly at construction.
//!   Memory is O(width x height) regardless of what gets painted.
//! - [`SparseTileStore`]: unbounded, tiles allocated on first touch and
//!   evictable afterwards.

use std::collections::HashMap;

use tracing::debug;

use super::{PixelRect, Tile, TileCoord, COORD_LIMIT};
use crate::core::errors::SurfaceError;

/// Ownership and lookup of tiles keyed by tile coordinate
pub trait TileStore {
    /// Tile side length in pixels
    fn tile_size(&self) -> u32;

    /// Drawable pixel area, or None for an unbounded store
    fn bounds(&self) -> Option<PixelRect>;

    /// Fetch a tile for writing, allocating it if the store allows
    fn get_or_create_tile(&mut self, coord: TileCoord) -> Result<&mut Tile, SurfaceError>;

    fn try_get_tile(&self, coord: TileCoord) -> Option<&Tile>;

    fn try_get_tile_mut(&mut self, coord: TileCoord) -> Option<&mut Tile>;

    /// Replace the tile at `coord` with `tile`
    fn insert_tile(&mut self, coord: TileCoord, tile: Tile) -> Result<(), SurfaceError>;

    /// Coordinates of all stored tiles, sorted row-major
    fn tile_coords(&self) -> Vec<TileCoord>;

    /// Remove a tile; stores that never evict return None
    fn evict_tile(&mut self, coord: TileCoord) -> Option<Tile>;

    /// Reset every pixel to transparent
    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every stored tile whose pixel range intersects `rect`
    fn for_each_tile_in_rect<F>(&self, rect: PixelRect, mut f: F)
    where
        F: FnMut(TileCoord, &Tile),
        Self: Sized,
    {
        if rect.is_empty() {
            return;
        }
        let n = self.tile_size();
        let first = TileCoord::containing(rect.x, rect.y, n);
        let last = TileCoord::containing(rect.right() - 1, rect.bottom() - 1, n);
        let span = (last.tx as i64 - first.tx as i64 + 1) as u64 * (last.ty as i64 - first.ty as i64 + 1) as u64;

        if span <= self.len() as u64 {
            for ty in first.ty..=last.ty {
                for tx in first.tx..=last.tx {
                    let coord = TileCoord::new(tx, ty);
                    if let Some(tile) = self.try_get_tile(coord) {
                        f(coord, tile);
                    }
                }
            }
        } else {
            // Rect covers more cells than we store: walk the stored tiles instead
            for coord in self.tile_coords() {
                if coord.tx < first.tx || coord.tx > last.tx || coord.ty < first.ty || coord.ty > last.ty {
                    continue;
                }
                if let Some(tile) = self.try_get_tile(coord) {
                    f(coord, tile);
                }
            }
        }
    }

    /// Drop tiles with no visible pixel; returns how many were evicted
    fn evict_transparent(&mut self) -> usize {
        let empty: Vec<TileCoord> = self
            .tile_coords()
            .into_iter()
            .filter(|coord| self.try_get_tile(*coord).is_some_and(Tile::is_transparent))
            .collect();
        let evicted = empty
            .into_iter()
            .filter(|coord| self.evict_tile(*coord).is_some())
            .count();
        if evicted > 0 {
            debug!("Evicted {} transparent tiles", evicted);
        }
        evicted
    }
}

fn check_addressable(coord: TileCoord, tile_size: u32) -> Result<(), SurfaceError> {
    if !coord.is_addressable(tile_size) {
        return Err(SurfaceError::OutOfBounds {
            tx: coord.tx,
            ty: coord.ty,
        });
    }
    Ok(())
}

fn check_tile_size(expected: u32, tile: &Tile) -> Result<(), SurfaceError> {
    if tile.size() != expected {
        return Err(SurfaceError::TileSizeMismatch {
            expected,
            actual: tile.size(),
        });
    }
    Ok(())
}

/// Bounded, eagerly allocated tile grid
#[derive(Debug, Clone)]
pub struct FixedTileStore {
    width: u32,
    height: u32,
    tile_size: u32,
    tiles_x: u32,
    tiles_y: u32,
    tiles: Vec<Tile>,
}

impl FixedTileStore {
    /// Allocate ceil(W/T) x ceil(H/T) transparent tiles
    pub fn new(width: u32, height: u32, tile_size: u32) -> Result<Self, SurfaceError> {
        if width == 0 || height == 0 || width > COORD_LIMIT as u32 || height > COORD_LIMIT as u32 {
            return Err(SurfaceError::InvalidDimensions { width, height });
        }
        let tiles_x = width.div_ceil(tile_size);
        let tiles_y = height.div_ceil(tile_size);

        let tile_bytes = tile_size as usize * tile_size as usize * std::mem::size_of::<super::Pixel>();
        let count = (tiles_x as usize)
            .checked_mul(tiles_y as usize)
            .ok_or(SurfaceError::AllocationFailed { bytes: usize::MAX })?;
        let total_bytes = count
            .checked_mul(tile_bytes)
            .ok_or(SurfaceError::AllocationFailed { bytes: usize::MAX })?;

        let mut tiles = Vec::new();
        tiles
            .try_reserve_exact(count)
            .map_err(|_| SurfaceError::AllocationFailed { bytes: total_bytes })?;
        for _ in 0..count {
            tiles.push(Tile::try_new(tile_size)?);
        }

        debug!(
            "FixedTileStore: {}x{} px -> {}x{} tiles of {} ({} bytes)",
            width, height, tiles_x, tiles_y, tile_size, total_bytes
        );

        Ok(Self {
            width,
            height,
            tile_size,
            tiles_x,
            tiles_y,
            tiles,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn tiles_x(&self) -> u32 {
        self.tiles_x
    }

    #[inline]
    pub fn tiles_y(&self) -> u32 {
        self.tiles_y
    }

    #[inline]
    fn index(&self, coord: TileCoord) -> Option<usize> {
        if coord.tx < 0 || coord.ty < 0 {
            return None;
        }
        let (tx, ty) = (coord.tx as u32, coord.ty as u32);
        if tx >= self.tiles_x || ty >= self.tiles_y {
            return None;
        }
        Some((ty * self.tiles_x + tx) as usize)
    }
}

impl TileStore for FixedTileStore {
    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn bounds(&self) -> Option<PixelRect> {
        Some(PixelRect::new(0, 0, self.width as i32, self.height as i32))
    }

    fn get_or_create_tile(&mut self, coord: TileCoord) -> Result<&mut Tile, SurfaceError> {
        let index = self.index(coord).ok_or(SurfaceError::OutOfBounds {
            tx: coord.tx,
            ty: coord.ty,
        })?;
        Ok(&mut self.tiles[index])
    }

    fn try_get_tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.index(coord).map(|index| &self.tiles[index])
    }

    fn try_get_tile_mut(&mut self, coord: TileCoord) -> Option<&mut Tile> {
        self.index(coord).map(|index| &mut self.tiles[index])
    }

    fn insert_tile(&mut self, coord: TileCoord, tile: Tile) -> Result<(), SurfaceError> {
        check_tile_size(self.tile_size, &tile)?;
        let slot = self.get_or_create_tile(coord)?;
        *slot = tile;
        Ok(())
    }

    fn tile_coords(&self) -> Vec<TileCoord> {
        (0..self.tiles_y as i32)
            .flat_map(|ty| (0..self.tiles_x as i32).map(move |tx| TileCoord::new(tx, ty)))
            .collect()
    }

    fn evict_tile(&mut self, _coord: TileCoord) -> Option<Tile> {
        None
    }

    fn clear(&mut self) {
        self.tiles.iter_mut().for_each(Tile::clear);
    }

    fn len(&self) -> usize {
        self.tiles.len()
    }
}

/// Unbounded tile map with lazy allocation
#[derive(Debug, Clone)]
pub struct SparseTileStore {
    tile_size: u32,
    tiles: HashMap<TileCoord, Tile>,
}

impl SparseTileStore {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size,
            tiles: HashMap::new(),
        }
    }

    /// Bytes of pixel memory currently held
    pub fn memory_usage(&self) -> usize {
        self.tiles.len()
            * self.tile_size as usize
            * self.tile_size as usize
            * std::mem::size_of::<super::Pixel>()
    }
}

impl TileStore for SparseTileStore {
    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn bounds(&self) -> Option<PixelRect> {
        None
    }

    fn get_or_create_tile(&mut self, coord: TileCoord) -> Result<&mut Tile, SurfaceError> {
        use std::collections::hash_map::Entry;

        check_addressable(coord, self.tile_size)?;
        match self.tiles.entry(coord) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let tile = Tile::try_new(self.tile_size)?;
                Ok(entry.insert(tile))
            }
        }
    }

    fn try_get_tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.tiles.get(&coord)
    }

    fn try_get_tile_mut(&mut self, coord: TileCoord) -> Option<&mut Tile> {
        self.tiles.get_mut(&coord)
    }

    fn insert_tile(&mut self, coord: TileCoord, tile: Tile) -> Result<(), SurfaceError> {
        check_tile_size(self.tile_size, &tile)?;
        check_addressable(coord, self.tile_size)?;
        self.tiles.insert(coord, tile);
        Ok(())
    }

    fn tile_coords(&self) -> Vec<TileCoord> {
        let mut coords: Vec<TileCoord> = self.tiles.keys().copied().collect();
        coords.sort_unstable_by_key(|c| (c.ty, c.tx));
        coords
    }

    fn evict_tile(&mut self, coord: TileCoord) -> Option<Tile> {
        self.tiles.remove(&coord)
    }

    fn clear(&mut self) {
        self.tiles.clear();
    }

    fn len(&self) -> usize {
        self.tiles.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_store_grid_dimensions() {
        let store = FixedTileStore::new(128, 128, 64).unwrap();
        assert_eq!((store.tiles_x(), store.tiles_y()), (2, 2));
        assert_eq!(store.len(), 4);

        // Non-aligned canvas rounds up
        let store = FixedTileStore::new(150, 65, 64).unwrap();
        assert_eq!((store.tiles_x(), store.tiles_y()), (3, 2));
        assert!(store.tile_coords().iter().all(|c| store.try_get_tile(*c).unwrap().is_transparent()));
    }

    #[test]
    fn test_fixed_store_rejects_zero_dimensions() {
        let err = FixedTileStore::new(0, 100, 64).unwrap_err();
        assert!(matches!(err, SurfaceError::InvalidDimensions { .. }));
        let err = FixedTileStore::new(64, COORD_LIMIT as u32 + 1, 64).unwrap_err();
        assert!(matches!(err, SurfaceError::InvalidDimensions { .. }));
    }

    #[test]
    fn test_fixed_store_out_of_bounds() {
        let mut store = FixedTileStore::new(128, 128, 64).unwrap();
        assert!(store.get_or_create_tile(TileCoord::new(1, 1)).is_ok());

        let err = store.get_or_create_tile(TileCoord::new(2, 0)).unwrap_err();
        assert!(matches!(err, SurfaceError::OutOfBounds { tx: 2, ty: 0 }));
        assert!(store.get_or_create_tile(TileCoord::new(-1, 0)).is_err());
        assert!(store.try_get_tile(TileCoord::new(0, 5)).is_none());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_fixed_store_never_evicts() {
        let mut store = FixedTileStore::new(64, 64, 64).unwrap();
        assert!(store.evict_tile(TileCoord::new(0, 0)).is_none());
        assert_eq!(store.evict_transparent(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sparse_store_lazy_allocation() {
        let mut store = SparseTileStore::new(64);
        assert!(store.is_empty());
        assert!(store.try_get_tile(TileCoord::new(-3, 7)).is_none());

        store.get_or_create_tile(TileCoord::new(-3, 7)).unwrap();
        store.get_or_create_tile(TileCoord::new(-3, 7)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.memory_usage(), 64 * 64 * 8);
    }

    #[test]
    fn test_sparse_store_coords_sorted_row_major() {
        let mut store = SparseTileStore::new(16);
        for coord in [TileCoord::new(1, 1), TileCoord::new(0, 1), TileCoord::new(5, 0)] {
            store.get_or_create_tile(coord).unwrap();
        }
        assert_eq!(
            store.tile_coords(),
            vec![TileCoord::new(5, 0), TileCoord::new(0, 1), TileCoord::new(1, 1)]
        );
    }

    #[test]
    fn test_sparse_store_evict_transparent() {
        let mut store = SparseTileStore::new(16);
        store.get_or_create_tile(TileCoord::new(0, 0)).unwrap();
        let painted = store.get_or_create_tile(TileCoord::new(1, 0)).unwrap();
        painted.pixels_mut()[0] = [100, 0, 0, 100];

        assert_eq!(store.evict_transparent(), 1);
        assert_eq!(store.tile_coords(), vec![TileCoord::new(1, 0)]);
    }

    #[test]
    fn test_sparse_store_rejects_unaddressable_coords() {
        let mut store = SparseTileStore::new(64);
        let edge = TileCoord::new(COORD_LIMIT / 64, 0);
        assert!(matches!(
            store.get_or_create_tile(edge),
            Err(SurfaceError::OutOfBounds { .. })
        ));
        let err = store
            .insert_tile(TileCoord::new(0, i32::MIN), Tile::try_new(64).unwrap())
            .unwrap_err();
        assert!(matches!(err, SurfaceError::OutOfBounds { tx: 0, ty: i32::MIN }));
        assert!(store.is_empty());

        store.get_or_create_tile(TileCoord::new(COORD_LIMIT / 64 - 1, 0)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_insert_rejects_wrong_tile_size() {
        let mut store = SparseTileStore::new(64);
        let err = store
            .insert_tile(TileCoord::new(0, 0), Tile::try_new(32).unwrap())
            .unwrap_err();
        assert!(matches!(err, SurfaceError::TileSizeMismatch { expected: 64, actual: 32 }));
    }

    #[test]
    fn test_for_each_tile_in_rect() {
        let mut store = SparseTileStore::new(64);
        for coord in [TileCoord::new(0, 0), TileCoord::new(1, 0), TileCoord::new(9, 9)] {
            store.get_or_create_tile(coord).unwrap();
        }

        let mut seen = Vec::new();
        store.for_each_tile_in_rect(PixelRect::new(10, 10, 100, 20), |coord, _| seen.push(coord));
        seen.sort();
        assert_eq!(seen, vec![TileCoord::new(0, 0), TileCoord::new(1, 0)]);

        // Large rect takes the stored-tile walk
        let mut seen = Vec::new();
        store.for_each_tile_in_rect(PixelRect::new(-10_000, -10_000, 20_000, 20_000), |coord, _| {
            seen.push(coord)
        });
        assert_eq!(seen.len(), 3);

        let mut fixed_seen = 0;
        let fixed = FixedTileStore::new(128, 128, 64).unwrap();
        fixed.for_each_tile_in_rect(PixelRect::new(60, 60, 8, 8), |_, _| fixed_seen += 1);
        assert_eq!(fixed_seen, 4);
    }

    #[test]
    fn test_clear_resets_pixels() {
        let mut store = FixedTileStore::new(64, 64, 64).unwrap();
        store.get_or_create_tile(TileCoord::new(0, 0)).unwrap().pixels_mut()[5] = [1, 1, 1, 1];
        store.clear();
        assert!(store.try_get_tile(TileCoord::new(0, 0)).unwrap().is_transparent());

        let mut sparse = SparseTileStore::new(64);
        sparse.get_or_create_tile(TileCoord::new(0, 0)).unwrap();
        sparse.clear();
        assert!(sparse.is_empty());
    }
}
