//! Soft Dab Rasterizer - elliptical coverage masks split per tile
//!
//! A dab is reduced to a [`DabFootprint`] once (validation, rotation terms,
//! clipped pixel bounds), then walked tile by tile:
//! - [`DabFootprint::tile_spans`] yields every tile whose pixels intersect the
//!   dab's bounding box, with the local pixel span inside that tile
//! - [`DabRasterizer::coverage_mask`] fills a reusable row-major mask for one span
//!
//! Coverage uses the normalized squared distance `rr` under the rotated
//! ellipse metric. With hardness `h`:
//! - `rr > 1`: 0 (outside)
//! - `rr <= h^2`: 1 (solid core, no square root)
//! - otherwise `t = (sqrt(rr) - h) / (1 - h)` and coverage is `(1 - t)^2`

use tracing::trace;

use super::Dab;
use crate::tile::{PixelRect, TileCoord, COORD_LIMIT, FIX15_ONE};

/// Smallest mask value that still quantizes to a non-zero fixed-point weight
const MIN_VISIBLE_COVERAGE: f32 = 0.5 / FIX15_ONE as f32;

/// Coverage for a normalized squared distance
#[inline]
pub fn falloff(rr: f32, hardness: f32) -> f32 {
    if rr > 1.0 {
        return 0.0;
    }
    if rr <= hardness * hardness {
        return 1.0;
    }
    let t = (rr.sqrt() - hardness) / (1.0 - hardness);
    let s = 1.0 - t;
    s * s
}

/// Pre-calculated dab geometry
///
/// Computed once per dab so the per-pixel loop only does multiply-adds.
#[derive(Debug, Clone)]
pub struct DabFootprint {
    cx: f32,
    cy: f32,
    cos: f32,
    sin: f32,
    /// 1 / major_radius^2
    inv_major_sq: f32,
    /// 1 / minor_radius^2
    inv_minor_sq: f32,
    hardness: f32,
    opacity: f32,
    bounds: PixelRect,
}

impl DabFootprint {
    /// Validate a dab and compute its pixel bounds
    ///
    /// Returns None for dabs that cannot touch any pixel: non-finite fields,
    /// radius <= 0, opacity <= 0, or no pixel center inside the ellipse box.
    pub fn new(dab: &Dab) -> Option<Self> {
        let finite = [
            dab.x,
            dab.y,
            dab.radius,
            dab.hardness,
            dab.aspect_ratio,
            dab.angle,
            dab.opacity,
        ]
        .iter()
        .chain(dab.color.iter())
        .all(|v| v.is_finite());
        if !finite || dab.radius <= 0.0 || dab.opacity <= 0.0 {
            return None;
        }

        let aspect_ratio = dab.aspect_ratio.max(1.0);
        let major = dab.radius;
        let minor = dab.radius / aspect_ratio;
        let (sin, cos) = dab.angle.sin_cos();

        // Axis-aligned half extents of the rotated ellipse, in f64 so huge
        // radii and far-away centers cannot overflow:
        //   half_w = sqrt(a^2 cos^2 + b^2 sin^2), half_h = sqrt(a^2 sin^2 + b^2 cos^2)
        let (s, c) = (sin as f64, cos as f64);
        let major_sq = (major as f64) * (major as f64);
        let minor_sq = (minor as f64) * (minor as f64);
        let half_w = (major_sq * c * c + minor_sq * s * s).sqrt();
        let half_h = (major_sq * s * s + minor_sq * c * c).sqrt();

        // Pixel px is inside when its center px + 0.5 lies within [cx - hw, cx + hw],
        // clamped to the addressable coordinate range before narrowing
        let limit = COORD_LIMIT as f64;
        let (cx, cy) = (dab.x as f64, dab.y as f64);
        let left = (cx - half_w - 0.5).ceil().max(-limit);
        let right = ((cx + half_w - 0.5).floor() + 1.0).min(limit);
        let top = (cy - half_h - 0.5).ceil().max(-limit);
        let bottom = ((cy + half_h - 0.5).floor() + 1.0).min(limit);
        if !(left < right && top < bottom) {
            return None;
        }
        let bounds = PixelRect::from_edges(left as i32, top as i32, right as i32, bottom as i32);

        Some(Self {
            cx: dab.x,
            cy: dab.y,
            cos,
            sin,
            inv_major_sq: (1.0 / major_sq) as f32,
            inv_minor_sq: (1.0 / minor_sq) as f32,
            hardness: dab.hardness.clamp(0.0, 1.0),
            opacity: dab.opacity.min(1.0),
            bounds,
        })
    }

    /// Surface pixels whose centers fall inside the ellipse's bounding box
    #[inline]
    pub fn bounds(&self) -> PixelRect {
        self.bounds
    }

    #[inline]
    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Normalized squared distance of a pixel center from the dab center
    #[inline]
    fn distance_sq(&self, px: i32, py: i32) -> f32 {
        let dx = px as f32 + 0.5 - self.cx;
        let dy = py as f32 + 0.5 - self.cy;
        let xr = dx * self.cos + dy * self.sin;
        let yr = dy * self.cos - dx * self.sin;
        xr * xr * self.inv_major_sq + yr * yr * self.inv_minor_sq
    }

    /// Shape coverage (before opacity) of surface pixel (px, py)
    #[inline]
    pub fn shape_at(&self, px: i32, py: i32) -> f32 {
        falloff(self.distance_sq(px, py), self.hardness)
    }

    /// Tiles intersecting the bounds, optionally clipped to a drawable area
    pub fn tile_spans(&self, tile_size: u32, clip: Option<PixelRect>) -> TileSpans {
        let rect = match clip {
            Some(clip) => self.bounds.intersect(&clip),
            None => Some(self.bounds),
        };
        TileSpans::new(rect, tile_size)
    }

    /// Fill one row of coverage (opacity applied) starting at surface pixel (x0, py)
    fn process_row(&self, row: &mut [f32], x0: i32, py: i32) {
        let dy = py as f32 + 0.5 - self.cy;
        // Row-constant parts of the rotation
        let dy_sin = dy * self.sin;
        let dy_cos = dy * self.cos;

        for (col, value) in row.iter_mut().enumerate() {
            let dx = (x0 + col as i32) as f32 + 0.5 - self.cx;
            let xr = dx * self.cos + dy_sin;
            let yr = dy_cos - dx * self.sin;
            let rr = xr * xr * self.inv_major_sq + yr * yr * self.inv_minor_sq;
            *value = falloff(rr, self.hardness) * self.opacity;
        }
    }
}

/// Portion of a dab that lands in one tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpan {
    pub coord: TileCoord,
    /// Pixel span in tile-local coordinates
    pub local: PixelRect,
}

/// Row-major walk over the tiles a dab touches
#[derive(Debug, Clone)]
pub struct TileSpans {
    rect: PixelRect,
    tile_size: u32,
    first: TileCoord,
    last: TileCoord,
    next: Option<TileCoord>,
}

impl TileSpans {
    fn new(rect: Option<PixelRect>, tile_size: u32) -> Self {
        let Some(rect) = rect else {
            return Self {
                rect: PixelRect::default(),
                tile_size,
                first: TileCoord::new(0, 0),
                last: TileCoord::new(0, 0),
                next: None,
            };
        };
        let first = TileCoord::containing(rect.x, rect.y, tile_size);
        let last = TileCoord::containing(rect.right() - 1, rect.bottom() - 1, tile_size);
        Self {
            rect,
            tile_size,
            first,
            last,
            next: Some(first),
        }
    }
}

impl Iterator for TileSpans {
    type Item = TileSpan;

    fn next(&mut self) -> Option<TileSpan> {
        let coord = self.next?;
        self.next = if coord.tx < self.last.tx {
            Some(TileCoord::new(coord.tx + 1, coord.ty))
        } else if coord.ty < self.last.ty {
            Some(TileCoord::new(self.first.tx, coord.ty + 1))
        } else {
            None
        };

        let tile_rect = coord.pixel_rect(self.tile_size);
        // Every tile in [first, last] overlaps the rect by construction
        let overlap = tile_rect.intersect(&self.rect)?;
        Some(TileSpan {
            coord,
            local: overlap.offset(-tile_rect.x, -tile_rect.y),
        })
    }
}

/// Produces coverage masks, reusing one scratch buffer across dabs
#[derive(Debug, Clone)]
pub struct DabRasterizer {
    tile_size: u32,
    mask: Vec<f32>,
}

impl DabRasterizer {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size,
            mask: Vec::with_capacity(tile_size as usize * tile_size as usize),
        }
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Tiles a dab touches, clipped to `clip`; empty for invalid dabs
    pub fn rasterize(&self, dab: &Dab, clip: Option<PixelRect>) -> Vec<TileSpan> {
        match DabFootprint::new(dab) {
            Some(footprint) => footprint.tile_spans(self.tile_size, clip).collect(),
            None => {
                trace!("rasterize: skipped degenerate dab at ({}, {})", dab.x, dab.y);
                Vec::new()
            }
        }
    }

    /// Coverage (opacity applied) for every pixel of `span`, row-major
    ///
    /// Returns None when no pixel in the span would receive visible paint,
    /// so callers can skip the tile without touching it.
    pub fn coverage_mask(&mut self, footprint: &DabFootprint, span: &TileSpan) -> Option<&[f32]> {
        let local = span.local;
        if local.is_empty() {
            return None;
        }
        let width = local.width as usize;
        self.mask.clear();
        self.mask.resize(width * local.height as usize, 0.0);

        let origin = span.coord.pixel_rect(self.tile_size);
        let x0 = origin.x + local.x;
        let mut visible = false;
        for (row_index, row) in self.mask.chunks_exact_mut(width).enumerate() {
            let py = origin.y + local.y + row_index as i32;
            footprint.process_row(row, x0, py);
            visible |= row.iter().any(|v| *v >= MIN_VISIBLE_COVERAGE);
        }

        visible.then_some(self.mask.as_slice())
    }
}
