//! Tiles - fixed-size premultiplied pixel buffers
//!
//! Pixels are stored as `[r, g, b, a]` in 15-bit fixed point (`1 << 15` is 1.0)
//! inside `u16` channels, premultiplied by alpha. The spare high bit gives the
//! compositor headroom for intermediate sums without widening the storage.

mod rect;
mod store;

pub use rect::PixelRect;
pub use store::{FixedTileStore, SparseTileStore, TileStore};

use serde::{Deserialize, Serialize};

use crate::core::errors::SurfaceError;

/// Fixed-point representation of 1.0
pub const FIX15_ONE: u32 = 1 << 15;

/// Convert a unit float (clamped to 0..=1) to 15-bit fixed point
#[inline]
pub fn fix15_from_unit(value: f32) -> u32 {
    (value.clamp(0.0, 1.0) * FIX15_ONE as f32 + 0.5) as u32
}

/// A single premultiplied fixed-point pixel
pub type Pixel = [u16; 4];

/// Fully transparent pixel
pub const TRANSPARENT_PIXEL: Pixel = [0; 4];

/// Surface pixel coordinates are confined to `-COORD_LIMIT..COORD_LIMIT`
///
/// Keeps every rectangle edge, width and tile origin representable as `i32`.
pub const COORD_LIMIT: i32 = 1 << 29;

/// Integer tile coordinate within the surface's tile grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub tx: i32,
    pub ty: i32,
}

impl TileCoord {
    pub const fn new(tx: i32, ty: i32) -> Self {
        Self { tx, ty }
    }

    /// Tile containing the surface pixel (px, py); floors for negative pixels
    #[inline]
    pub fn containing(px: i32, py: i32, tile_size: u32) -> Self {
        let n = tile_size as i32;
        Self {
            tx: px.div_euclid(n),
            ty: py.div_euclid(n),
        }
    }

    /// Surface-space rectangle covered by this tile
    ///
    /// Saturates for coordinates that fail [`TileCoord::is_addressable`].
    #[inline]
    pub fn pixel_rect(&self, tile_size: u32) -> PixelRect {
        let n = tile_size as i32;
        PixelRect::new(self.tx.saturating_mul(n), self.ty.saturating_mul(n), n, n)
    }

    /// Whether every pixel of the tile lies within `-COORD_LIMIT..COORD_LIMIT`
    pub fn is_addressable(&self, tile_size: u32) -> bool {
        let n = tile_size as i64;
        let limit = COORD_LIMIT as i64;
        [self.tx, self.ty].iter().all(|&t| {
            let start = t as i64 * n;
            start >= -limit && start + n <= limit
        })
    }
}

/// Each color channel <= alpha <= 1.0
#[inline]
pub fn is_premultiplied(pixel: &Pixel) -> bool {
    let alpha = pixel[3];
    alpha as u32 <= FIX15_ONE && pixel[..3].iter().all(|&c| c <= alpha)
}

/// Premultiplied RGBA color with float channels in 0..=1
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    pub fn from_pixel(pixel: Pixel) -> Self {
        let one = FIX15_ONE as f32;
        Self {
            r: pixel[0] as f32 / one,
            g: pixel[1] as f32 / one,
            b: pixel[2] as f32 / one,
            a: pixel[3] as f32 / one,
        }
    }

    /// Un-premultiply; fully transparent colors stay all-zero
    pub fn to_straight(&self) -> Rgba {
        if self.a <= 0.0 {
            return Rgba::TRANSPARENT;
        }
        Rgba {
            r: (self.r / self.a).clamp(0.0, 1.0),
            g: (self.g / self.a).clamp(0.0, 1.0),
            b: (self.b / self.a).clamp(0.0, 1.0),
            a: self.a,
        }
    }

    pub fn is_transparent(&self) -> bool {
        self.a <= 0.0
    }
}

/// N x N premultiplied pixel buffer, owned exclusively by a [`TileStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    size: u32,
    pixels: Box<[Pixel]>,
}

impl Tile {
    /// Allocate a fully transparent tile, reporting allocation failure
    pub fn try_new(size: u32) -> Result<Self, SurfaceError> {
        let count = (size as usize)
            .checked_mul(size as usize)
            .ok_or(SurfaceError::AllocationFailed { bytes: usize::MAX })?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(count)
            .map_err(|_| SurfaceError::AllocationFailed {
                bytes: count.saturating_mul(std::mem::size_of::<Pixel>()),
            })?;
        pixels.resize(count, TRANSPARENT_PIXEL);
        Ok(Self {
            size,
            pixels: pixels.into_boxed_slice(),
        })
    }

    /// Wrap an existing row-major pixel buffer
    pub fn from_pixels(size: u32, pixels: Vec<Pixel>) -> Result<Self, SurfaceError> {
        let expected = size as usize * size as usize;
        if pixels.len() != expected {
            return Err(SurfaceError::CorruptTileBuffer(format!(
                "expected {} pixels for a {}x{} tile, got {}",
                expected,
                size,
                size,
                pixels.len()
            )));
        }
        if let Some(index) = pixels.iter().position(|p| !is_premultiplied(p)) {
            return Err(SurfaceError::CorruptTileBuffer(format!(
                "pixel {} ({:?}) is not valid premultiplied 15-bit RGBA",
                index, pixels[index]
            )));
        }
        Ok(Self {
            size,
            pixels: pixels.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Pixel at tile-local (x, y); callers guarantee x, y < size
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Pixel {
        self.pixels[(y * self.size + x) as usize]
    }

    /// Row-major pixel data
    #[inline]
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// Mutable pixel rows are only handed to the compositor and store internals
    #[inline]
    pub(crate) fn pixels_mut(&mut self) -> &mut [Pixel] {
        &mut self.pixels
    }

    pub fn is_transparent(&self) -> bool {
        self.pixels.iter().all(|p| *p == TRANSPARENT_PIXEL)
    }

    pub(crate) fn clear(&mut self) {
        self.pixels.fill(TRANSPARENT_PIXEL);
    }
}
