//! Sutu Surface - tiled raster storage and dab compositing
//!
//! The brush engine turns strokes into dabs; a [`Surface`] stamps each dab
//! into 15-bit premultiplied tiles and reports which pixels changed.

pub mod brush;
pub mod core;
pub mod surface;
pub mod tile;

pub use brush::{BlendMode, Dab};
pub use crate::core::config::SurfaceConfig;
pub use crate::core::errors::SurfaceError;
pub use surface::{FixedTiledSurface, Snapshot, SparseTiledSurface, Surface, TileBuffer, TiledSurface};
pub use tile::{PixelRect, Rgba, TileCoord};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default tracing subscriber (`RUST_LOG` overrides the filter)
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sutu_surface=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Sutu surface logging initialized");
    }
}
