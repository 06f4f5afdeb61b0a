//! Tile buffer export/import and undo snapshots
//!
//! [`TileBuffer`] is the raw exchange format for an external undo manager:
//! tile coordinate, tile size and row-major premultiplied `[u16; 4]` pixels,
//! serialized as little-endian `u16`s.
//!
//! [`Snapshot`] captures every non-transparent tile of a store, each one LZ4
//! compressed (with prepended size). Restoring puts the store back exactly and
//! reports the region that differs from what was there before.

use std::collections::HashSet;

use byteorder::{ByteOrder, LittleEndian};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use rayon::prelude::*;
use tracing::debug;

use crate::core::errors::SurfaceError;
use crate::tile::{Pixel, PixelRect, Tile, TileCoord, TileStore};

const BYTES_PER_PIXEL: usize = std::mem::size_of::<Pixel>();

/// Raw copy of one tile's pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileBuffer {
    pub coord: TileCoord,
    pub tile_size: u32,
    /// Row-major premultiplied pixels, `tile_size * tile_size` entries
    pub pixels: Vec<Pixel>,
}

impl TileBuffer {
    pub fn from_tile(coord: TileCoord, tile: &Tile) -> Self {
        Self {
            coord,
            tile_size: tile.size(),
            pixels: tile.pixels().to_vec(),
        }
    }

    pub fn to_tile(&self) -> Result<Tile, SurfaceError> {
        Tile::from_pixels(self.tile_size, self.pixels.clone())
    }

    pub fn into_tile(self) -> Result<Tile, SurfaceError> {
        Tile::from_pixels(self.tile_size, self.pixels)
    }

    /// Little-endian channel bytes (8 bytes per pixel)
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let channels: Vec<u16> = self.pixels.iter().flatten().copied().collect();
        let mut bytes = vec![0u8; channels.len() * 2];
        LittleEndian::write_u16_into(&channels, &mut bytes);
        bytes
    }

    /// Parse bytes produced by [`TileBuffer::to_le_bytes`]
    pub fn from_le_bytes(coord: TileCoord, tile_size: u32, bytes: &[u8]) -> Result<Self, SurfaceError> {
        let pixel_count = tile_size as usize * tile_size as usize;
        let expected = pixel_count * BYTES_PER_PIXEL;
        if bytes.len() != expected {
            return Err(SurfaceError::CorruptTileBuffer(format!(
                "tile ({}, {}): expected {} bytes, got {}",
                coord.tx,
                coord.ty,
                expected,
                bytes.len()
            )));
        }

        let mut channels = vec![0u16; pixel_count * 4];
        LittleEndian::read_u16_into(bytes, &mut channels);
        let pixels = channels
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();

        Ok(Self {
            coord,
            tile_size,
            pixels,
        })
    }
}

#[derive(Debug, Clone)]
struct CompressedTile {
    coord: TileCoord,
    data: Vec<u8>,
}

/// Compressed copy of all painted tiles of a surface
#[derive(Debug, Clone)]
pub struct Snapshot {
    tile_size: u32,
    tiles: Vec<CompressedTile>,
}

impl Snapshot {
    /// Copy out every non-transparent tile, compressing in parallel
    pub fn capture<S: TileStore>(store: &S) -> Self {
        let buffers: Vec<TileBuffer> = store
            .tile_coords()
            .into_iter()
            .filter_map(|coord| {
                store
                    .try_get_tile(coord)
                    .filter(|tile| !tile.is_transparent())
                    .map(|tile| TileBuffer::from_tile(coord, tile))
            })
            .collect();

        let tiles: Vec<CompressedTile> = buffers
            .par_iter()
            .map(|buffer| CompressedTile {
                coord: buffer.coord,
                data: compress_prepend_size(&buffer.to_le_bytes()),
            })
            .collect();

        let snapshot = Self {
            tile_size: store.tile_size(),
            tiles,
        };
        debug!(
            "Snapshot captured: {} tiles, {} compressed bytes",
            snapshot.tile_count(),
            snapshot.compressed_size()
        );
        snapshot
    }

    /// Put `store` back into the captured state
    ///
    /// Returns the surface region whose pixels differ from the state before
    /// the call. The store is left untouched if any tile fails to decode.
    pub fn restore<S: TileStore>(&self, store: &mut S) -> Result<Option<PixelRect>, SurfaceError> {
        if self.tile_size != store.tile_size() {
            return Err(SurfaceError::TileSizeMismatch {
                expected: store.tile_size(),
                actual: self.tile_size,
            });
        }

        let tile_size = self.tile_size;
        let decoded: Vec<(TileCoord, Tile)> = self
            .tiles
            .par_iter()
            .map(|compressed| {
                let bytes = decompress_size_prepended(&compressed.data)
                    .map_err(|e| SurfaceError::CorruptTileBuffer(e.to_string()))?;
                let tile = TileBuffer::from_le_bytes(compressed.coord, tile_size, &bytes)?.into_tile()?;
                Ok((compressed.coord, tile))
            })
            .collect::<Result<_, SurfaceError>>()?;

        // Validate placement before mutating anything
        let bounds = store.bounds();
        let misplaced = decoded.iter().find(|(coord, _)| {
            !coord.is_addressable(tile_size)
                || bounds.is_some_and(|b| coord.pixel_rect(tile_size).intersect(&b).is_none())
        });
        if let Some((coord, _)) = misplaced {
            return Err(SurfaceError::OutOfBounds {
                tx: coord.tx,
                ty: coord.ty,
            });
        }

        let mut dirty: Option<PixelRect> = None;
        let mut mark = |coord: TileCoord| {
            let rect = coord.pixel_rect(tile_size);
            dirty = Some(dirty.map_or(rect, |d| d.union(&rect)));
        };

        let captured: HashSet<TileCoord> = decoded.iter().map(|(coord, _)| *coord).collect();
        for coord in store.tile_coords() {
            if captured.contains(&coord) {
                continue;
            }
            match store.evict_tile(coord) {
                Some(evicted) => {
                    if !evicted.is_transparent() {
                        mark(coord);
                    }
                }
                None => {
                    if let Some(tile) = store.try_get_tile_mut(coord) {
                        if !tile.is_transparent() {
                            tile.clear();
                            mark(coord);
                        }
                    }
                }
            }
        }

        for (coord, tile) in decoded {
            if store.try_get_tile(coord) == Some(&tile) {
                continue;
            }
            store.insert_tile(coord, tile)?;
            mark(coord);
        }

        let dirty = match (dirty, store.bounds()) {
            (Some(rect), Some(bounds)) => rect.intersect(&bounds),
            (rect, _) => rect,
        };
        debug!("Snapshot restored: {} tiles, dirty {:?}", self.tile_count(), dirty);
        Ok(dirty)
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Total compressed payload in bytes
    pub fn compressed_size(&self) -> usize {
        self.tiles.iter().map(|t| t.data.len()).sum()
    }

    /// Coordinates of the captured tiles
    pub fn tile_coords(&self) -> Vec<TileCoord> {
        self.tiles.iter().map(|t| t.coord).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tile::{FixedTileStore, SparseTileStore};

    fn paint(store: &mut impl TileStore, coord: TileCoord, index: usize, pixel: Pixel) {
        store.get_or_create_tile(coord).unwrap().pixels_mut()[index] = pixel;
    }

    #[test]
    fn test_le_bytes_layout() {
        let mut tile = Tile::try_new(8).unwrap();
        tile.pixels_mut()[0] = [0x0102, 0x0304, 0x0506, 0x0708];
        let buffer = TileBuffer::from_tile(TileCoord::new(3, -2), &tile);
        let bytes = buffer.to_le_bytes();

        assert_eq!(bytes.len(), 8 * 8 * 8);
        assert_eq!(&bytes[..8], &[0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07]);
        let parsed = TileBuffer::from_le_bytes(TileCoord::new(3, -2), 8, &bytes).unwrap();
        assert_eq!(parsed, buffer);
    }

    #[test]
    fn test_from_le_bytes_rejects_truncated() {
        let err = TileBuffer::from_le_bytes(TileCoord::new(0, 0), 8, &[0u8; 100]).unwrap_err();
        assert!(matches!(err, SurfaceError::CorruptTileBuffer(_)));
    }

    #[test]
    fn test_capture_skips_transparent_tiles() {
        let mut store = FixedTileStore::new(256, 256, 64).unwrap();
        paint(&mut store, TileCoord::new(2, 1), 10, [5, 5, 5, 5]);

        let snapshot = Snapshot::capture(&store);
        assert_eq!(snapshot.tile_count(), 1);
        assert_eq!(snapshot.tile_coords(), vec![TileCoord::new(2, 1)]);
        // A mostly-empty tile compresses well below its raw size
        assert!(snapshot.compressed_size() < 64 * 64 * 8 / 10);
    }

    #[test]
    fn test_restore_sparse_exact() {
        let mut store = SparseTileStore::new(32);
        paint(&mut store, TileCoord::new(0, 0), 0, [9, 9, 9, 9]);
        let snapshot = Snapshot::capture(&store);

        // Modify the captured tile and paint a new one
        paint(&mut store, TileCoord::new(0, 0), 1, [1, 1, 1, 1]);
        paint(&mut store, TileCoord::new(-4, 2), 0, [2, 2, 2, 2]);

        let dirty = snapshot.restore(&mut store).unwrap();
        assert_eq!(store.tile_coords(), vec![TileCoord::new(0, 0)]);
        let tile = store.try_get_tile(TileCoord::new(0, 0)).unwrap();
        assert_eq!(tile.pixels()[0], [9, 9, 9, 9]);
        assert_eq!(tile.pixels()[1], [0, 0, 0, 0]);
        assert_eq!(dirty, Some(PixelRect::from_edges(-128, 0, 32, 96)));
    }

    #[test]
    fn test_restore_unchanged_is_clean() {
        let mut store = FixedTileStore::new(128, 128, 64).unwrap();
        paint(&mut store, TileCoord::new(1, 1), 3, [7, 7, 7, 7]);
        let snapshot = Snapshot::capture(&store);
        assert_eq!(snapshot.restore(&mut store).unwrap(), None);
    }

    #[test]
    fn test_restore_fixed_clears_uncaptured() {
        let mut store = FixedTileStore::new(100, 100, 64).unwrap();
        let snapshot = Snapshot::capture(&store);
        assert!(snapshot.is_empty());

        paint(&mut store, TileCoord::new(1, 1), 0, [4, 4, 4, 4]);
        let dirty = snapshot.restore(&mut store).unwrap();
        assert!(store.try_get_tile(TileCoord::new(1, 1)).unwrap().is_transparent());
        // Clipped to the canvas
        assert_eq!(dirty, Some(PixelRect::from_edges(64, 64, 100, 100)));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_restore_rejects_tile_size_mismatch() {
        let store = SparseTileStore::new(32);
        let snapshot = Snapshot::capture(&store);
        let mut other = SparseTileStore::new(64);
        let err = snapshot.restore(&mut other).unwrap_err();
        assert!(matches!(err, SurfaceError::TileSizeMismatch { expected: 64, actual: 32 }));
    }

    #[test]
    fn test_restore_rejects_tiles_outside_fixed_grid() {
        let mut sparse = SparseTileStore::new(64);
        paint(&mut sparse, TileCoord::new(5, 5), 0, [1, 1, 1, 1]);
        let snapshot = Snapshot::capture(&sparse);

        let mut fixed = FixedTileStore::new(128, 128, 64).unwrap();
        paint(&mut fixed, TileCoord::new(0, 0), 0, [3, 3, 3, 3]);
        let err = snapshot.restore(&mut fixed).unwrap_err();
        assert!(matches!(err, SurfaceError::OutOfBounds { tx: 5, ty: 5 }));
        // Nothing was touched
        assert_eq!(fixed.try_get_tile(TileCoord::new(0, 0)).unwrap().pixels()[0], [3, 3, 3, 3]);
    }

    fn raw_snapshot(coord: TileCoord, pixel: Pixel) -> Snapshot {
        let buffer = TileBuffer {
            coord,
            tile_size: 8,
            pixels: vec![pixel; 64],
        };
        Snapshot {
            tile_size: 8,
            tiles: vec![CompressedTile {
                coord,
                data: compress_prepend_size(&buffer.to_le_bytes()),
            }],
        }
    }

    #[test]
    fn test_restore_rejects_unaddressable_tiles() {
        let mut store = SparseTileStore::new(8);
        let err = raw_snapshot(TileCoord::new(i32::MAX, 0), [1, 1, 1, 1])
            .restore(&mut store)
            .unwrap_err();
        assert!(matches!(err, SurfaceError::OutOfBounds { tx: i32::MAX, ty: 0 }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_rejects_non_premultiplied_pixels() {
        let mut store = SparseTileStore::new(8);
        paint(&mut store, TileCoord::new(0, 0), 0, [2, 2, 2, 2]);
        let err = raw_snapshot(TileCoord::new(0, 0), [u16::MAX, 0, 0, 100])
            .restore(&mut store)
            .unwrap_err();
        assert!(matches!(err, SurfaceError::CorruptTileBuffer(_)));
        assert_eq!(store.try_get_tile(TileCoord::new(0, 0)).unwrap().pixels()[0], [2, 2, 2, 2]);
    }
}
