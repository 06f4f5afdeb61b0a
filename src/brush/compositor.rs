//! In-place dab compositing in premultiplied 15-bit fixed point
//!
//! Every write goes through [`blend`], which keeps the premultiplied invariant
//! (each color channel <= alpha <= 1.0). Products are formed in `u32`
//! (at most 2^30) and floored, so repeated low-opacity dabs approach the
//! target monotonically and never overshoot it.

use super::BlendMode;
use crate::tile::{fix15_from_unit, Pixel, PixelRect, Tile, FIX15_ONE};

/// Blend a coverage mask into `tile` over the tile-local span `local`
///
/// `mask` is row-major with `local.width * local.height` entries, already
/// scaled by the dab's opacity. Returns the local bounds of pixels whose value
/// actually changed, or None if the tile was left untouched.
pub fn blend(
    tile: &mut Tile,
    local: PixelRect,
    mask: &[f32],
    color: [f32; 3],
    mode: BlendMode,
) -> Option<PixelRect> {
    if local.is_empty() {
        return None;
    }
    let size = tile.size() as usize;
    let width = local.width as usize;
    debug_assert!(local.x >= 0 && local.y >= 0);
    debug_assert!(local.right() as usize <= size && local.bottom() as usize <= size);
    debug_assert_eq!(mask.len(), width * local.height as usize);

    let src = [
        fix15_from_unit(color[0]),
        fix15_from_unit(color[1]),
        fix15_from_unit(color[2]),
    ];
    let pixels = tile.pixels_mut();

    let mut changed = ChangedBounds::default();
    for (row_index, mask_row) in mask.chunks_exact(width).enumerate() {
        let y = local.y as usize + row_index;
        let start = y * size + local.x as usize;
        let row = &mut pixels[start..start + width];

        for (col, (pixel, &coverage)) in row.iter_mut().zip(mask_row).enumerate() {
            let opa = fix15_from_unit(coverage);
            if opa == 0 {
                continue;
            }
            let before = *pixel;
            match mode {
                BlendMode::Normal => blend_normal(pixel, src, opa),
                BlendMode::Eraser => blend_eraser(pixel, opa),
                BlendMode::LockAlpha => blend_lock_alpha(pixel, src, opa),
                BlendMode::Colorize => blend_colorize(pixel, color, opa),
            }
            if *pixel != before {
                changed.add(local.x + col as i32, y as i32);
            }
        }
    }

    changed.into_rect()
}

#[derive(Default)]
struct ChangedBounds {
    bounds: Option<(i32, i32, i32, i32)>,
}

impl ChangedBounds {
    #[inline]
    fn add(&mut self, x: i32, y: i32) {
        self.bounds = Some(match self.bounds {
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)),
            None => (x, y, x + 1, y + 1),
        });
    }

    fn into_rect(self) -> Option<PixelRect> {
        self.bounds
            .map(|(x0, y0, x1, y1)| PixelRect::from_edges(x0, y0, x1, y1))
    }
}

/// dst = src * opa + dst * (1 - opa), source alpha 1.0
#[inline]
fn blend_normal(pixel: &mut Pixel, src: [u32; 3], opa: u32) {
    let inv = FIX15_ONE - opa;
    for c in 0..3 {
        pixel[c] = ((src[c] * opa + pixel[c] as u32 * inv) >> 15) as u16;
    }
    pixel[3] = ((FIX15_ONE * opa + pixel[3] as u32 * inv) >> 15) as u16;
}

/// dst = dst * (1 - opa)
#[inline]
fn blend_eraser(pixel: &mut Pixel, opa: u32) {
    let inv = FIX15_ONE - opa;
    for channel in pixel.iter_mut() {
        *channel = ((*channel as u32 * inv) >> 15) as u16;
    }
}

/// Source color premultiplied by the destination alpha; alpha untouched
#[inline]
fn blend_lock_alpha(pixel: &mut Pixel, src: [u32; 3], opa: u32) {
    let alpha = pixel[3] as u32;
    let inv = FIX15_ONE - opa;
    for c in 0..3 {
        let src_c = (src[c] * alpha) >> 15;
        pixel[c] = ((src_c * opa + pixel[c] as u32 * inv) >> 15) as u16;
    }
}

#[inline]
fn luminosity(rgb: [f32; 3]) -> f32 {
    0.3 * rgb[0] + 0.59 * rgb[1] + 0.11 * rgb[2]
}

/// Shift `rgb` to luminosity `lum`, clipping back into gamut while preserving it
fn set_luminosity(rgb: [f32; 3], lum: f32) -> [f32; 3] {
    let d = lum - luminosity(rgb);
    let c = [rgb[0] + d, rgb[1] + d, rgb[2] + d];

    let l = luminosity(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    let mut out = c;
    if n < 0.0 {
        for v in out.iter_mut() {
            *v = l + (*v - l) * l / (l - n);
        }
    }
    if x > 1.0 {
        for v in out.iter_mut() {
            *v = l + (*v - l) * (1.0 - l) / (x - l);
        }
    }
    out
}

/// Hue and saturation from the dab, luminosity and alpha from the canvas
fn blend_colorize(pixel: &mut Pixel, color: [f32; 3], opa: u32) {
    let alpha = pixel[3] as u32;
    if alpha == 0 {
        return;
    }
    let a = alpha as f32;
    let dst = [pixel[0] as f32 / a, pixel[1] as f32 / a, pixel[2] as f32 / a];
    let target = set_luminosity(color, luminosity(dst));

    let inv = FIX15_ONE - opa;
    for c in 0..3 {
        let premul = ((target[c].clamp(0.0, 1.0) * a + 0.5) as u32).min(alpha);
        pixel[c] = ((premul * opa + pixel[c] as u32 * inv) >> 15) as u16;
    }
}
