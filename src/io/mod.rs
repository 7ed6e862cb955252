//! Naming conventions, band tables and the reader / writer collaborators

pub mod bands;
pub mod catalog;
pub mod filename;
#[cfg(feature = "gdal-io")]
pub mod gdal_io;
pub mod mosaic_writer;
pub mod tile_reader;

pub use bands::{BandTable, IndexFormula, IndexGroup, SensorFamily, WeightSource};
pub use catalog::{InputCatalog, TileInputs};
pub use filename::{SourceName, SourceNameParser};
#[cfg(feature = "gdal-io")]
pub use gdal_io::{GeoTiffMosaicWriter, NetcdfTileReader};
pub use mosaic_writer::{MemoryMosaicWriter, MosaicGeometry, MosaicWriter, RawMosaicStore};
pub use tile_reader::{MemoryProduct, Observation, TileReader, TimeSeries};
