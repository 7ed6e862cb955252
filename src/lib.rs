//! Seasonal compositing of tiled weekly surface reflectance into global mosaics
//!
//! Each spatial tile's time series is aggregated in two passes (majority
//! status with index statistics, then a one-sigma filtered weighted average).
//! The composite tiles are keyed, shuffled by tile row and streamed into one
//! raster per band, one row of tiles at a time.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use config::{CompositingConfig, CompositingMode, JobContext};
pub use types::{
    BandKind, BandTile, CompositeError, CompositeResult, OutputBand, PixelState, StatusClass, TileArea,
    TileCoordinate, TileGrid,
};

pub use crate::core::{CompositeKey, KeyCodec, KeyLayout, LocalPipeline};
pub use io::{MosaicWriter, TileReader};
