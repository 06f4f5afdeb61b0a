use thiserror::Error;

/// Errors surfaced by surface construction and tile import.
///
/// Per-dab conditions (tiles outside a fixed canvas, degenerate dabs) never
/// produce one of these; they are clipped or skipped on the hot path.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Tile ({tx}, {ty}) is outside the surface grid")]
    OutOfBounds { tx: i32, ty: i32 },

    #[error("Invalid surface dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Failed to allocate {bytes} bytes of tile memory")]
    AllocationFailed { bytes: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tile size mismatch: expected {expected}, got {actual}")]
    TileSizeMismatch { expected: u32, actual: u32 },

    #[error("Corrupt tile buffer: {0}")]
    CorruptTileBuffer(String),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<SurfaceError> for String {
    fn from(err: SurfaceError) -> Self {
        err.to_string()
    }
}
