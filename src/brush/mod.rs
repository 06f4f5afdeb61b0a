//! Brush module - dab description, rasterization and compositing

mod compositor;
mod soft_dab;

pub use compositor::blend;
pub use soft_dab::{falloff, DabFootprint, DabRasterizer, TileSpan, TileSpans};

use serde::{Deserialize, Serialize};

/// Blend modes for dab compositing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Premultiplied alpha-over
    #[default]
    Normal,
    /// Removes color and alpha proportionally to coverage
    Eraser,
    /// Paints color only where pixels already have alpha; alpha is kept
    LockAlpha,
    /// Takes hue and saturation from the dab, luminosity and alpha from the canvas
    Colorize,
}

impl BlendMode {
    /// Modes that can only alter pixels that already carry alpha
    #[inline]
    pub fn needs_existing_pixels(&self) -> bool {
        !matches!(self, BlendMode::Normal)
    }
}

/// A single brush stamp
///
/// Dabs are passed by value per call and never stored by a surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dab {
    /// Center X in surface pixels (sub-pixel precision)
    pub x: f32,
    /// Center Y in surface pixels
    pub y: f32,
    /// Radius of the major axis in pixels
    pub radius: f32,
    /// Hardness (0.0 = soft, 1.0 = hard edge)
    pub hardness: f32,
    /// Major/minor axis ratio (1.0 = circle); values below 1.0 are treated as 1.0
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: f32,
    /// Rotation of the major axis in radians
    #[serde(default)]
    pub angle: f32,
    /// Straight RGB color (0.0 - 1.0)
    pub color: [f32; 3],
    /// Dab opacity (0.0 - 1.0)
    pub opacity: f32,
    #[serde(default)]
    pub blend_mode: BlendMode,
}

fn default_aspect_ratio() -> f32 {
    1.0
}

impl Dab {
    /// Round, hard, opaque black dab
    pub fn new(x: f32, y: f32, radius: f32) -> Self {
        Self {
            x,
            y,
            radius,
            hardness: 1.0,
            aspect_ratio: 1.0,
            angle: 0.0,
            color: [0.0, 0.0, 0.0],
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
        }
    }

    pub fn with_color(mut self, color: [f32; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_hardness(mut self, hardness: f32) -> Self {
        self.hardness = hardness;
        self
    }

    /// Elliptical footprint: major/minor ratio and rotation in radians
    pub fn with_ellipse(mut self, aspect_ratio: f32, angle: f32) -> Self {
        self.aspect_ratio = aspect_ratio;
        self.angle = angle;
        self
    }

    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    /// Reflection across the vertical line `x = axis`
    pub fn mirrored(&self, axis: f32) -> Self {
        Self {
            x: 2.0 * axis - self.x,
            angle: -self.angle,
            ..*self
        }
    }
}
