//! Surface configuration

use serde::{Deserialize, Serialize};

use crate::core::errors::SurfaceError;

/// Default tile side length in pixels
pub const DEFAULT_TILE_SIZE: u32 = 64;

/// Smallest accepted tile side length
pub const MIN_TILE_SIZE: u32 = 8;

/// Largest accepted tile side length
pub const MAX_TILE_SIZE: u32 = 1024;

/// Construction-time settings shared by every surface variant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SurfaceConfig {
    /// Tile side length in pixels
    pub tile_size: u32,
    /// Vertical mirror line for symmetry painting (None = off)
    pub symmetry_axis: Option<f32>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            symmetry_axis: None,
        }
    }
}

impl SurfaceConfig {
    /// Parse a JSON config; missing fields fall back to defaults
    pub fn from_json(json: &str) -> Result<Self, SurfaceError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SurfaceError> {
        if !(MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&self.tile_size) {
            return Err(SurfaceError::InvalidConfig(format!(
                "tile size {} must be in {}..={}",
                self.tile_size, MIN_TILE_SIZE, MAX_TILE_SIZE
            )));
        }
        if let Some(axis) = self.symmetry_axis {
            if !axis.is_finite() {
                return Err(SurfaceError::InvalidConfig(
                    "symmetry axis must be a finite number".to_string(),
                ));
            }
        }
        Ok(())
    }
}
