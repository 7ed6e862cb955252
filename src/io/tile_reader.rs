//! Tile reader collaborator and weekly observations

use crate::types::{BandTile, CompositeError, CompositeResult, PixelState, TileArea, TileCoordinate};
use chrono::NaiveDate;
use ndarray::{s, Array2};
use std::collections::HashMap;

/// Supplies named bands of one source tile product
pub trait TileReader: Send + Sync {
    /// Product name for log messages
    fn name(&self) -> &str;

    /// Side length of the source tile in pixels
    fn tile_size(&self) -> usize;

    /// Read the samples of `band` inside `area` (pixel units of the tile)
    fn read_band(&self, band: &str, area: &TileArea) -> CompositeResult<BandTile>;
}

/// Weekly time series of one spatial tile, ordered by date
pub struct TimeSeries {
    pub tile: TileCoordinate,
    pub observations: Vec<(NaiveDate, Box<dyn TileReader>)>,
}

impl TimeSeries {
    pub fn new(tile: TileCoordinate) -> Self {
        Self {
            tile,
            observations: Vec::new(),
        }
    }

    pub fn push(&mut self, date: NaiveDate, reader: Box<dyn TileReader>) {
        self.observations.push((date, reader));
        self.observations.sort_by_key(|(date, _)| *date);
    }

    pub fn readers(&self) -> impl Iterator<Item = &dyn TileReader> {
        self.observations.iter().map(|(_, reader)| reader.as_ref())
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Bands of one weekly observation of one micro tile
#[derive(Debug, Clone)]
pub struct Observation {
    pub status: BandTile,
    bands: HashMap<String, BandTile>,
}

impl Observation {
    /// Load the status band and `bands` from `reader`
    pub fn read(
        reader: &dyn TileReader,
        status_band: &str,
        bands: &[&str],
        area: &TileArea,
    ) -> CompositeResult<Self> {
        let status = reader.read_band(status_band, area)?;
        check_shape(reader.name(), status_band, &status, area)?;
        let mut loaded = HashMap::with_capacity(bands.len());
        for &name in bands {
            if name == status_band || loaded.contains_key(name) {
                continue;
            }
            let data = reader.read_band(name, area)?;
            check_shape(reader.name(), name, &data, area)?;
            loaded.insert(name.to_string(), data);
        }
        Ok(Self { status, bands: loaded })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.status.dim()
    }

    pub fn state_at(&self, row: usize, col: usize) -> PixelState {
        PixelState::from_sample(self.status[[row, col]])
    }

    pub fn band(&self, name: &str) -> CompositeResult<&BandTile> {
        self.bands
            .get(name)
            .ok_or_else(|| CompositeError::InvalidFormat(format!("band {} not loaded", name)))
    }
}

fn check_shape(product: &str, band: &str, data: &BandTile, area: &TileArea) -> CompositeResult<()> {
    if data.dim() != (area.height, area.width) {
        return Err(CompositeError::InvalidFormat(format!(
            "band {} of {} has shape {:?}, expected {}x{}",
            band,
            product,
            data.dim(),
            area.height,
            area.width
        )));
    }
    Ok(())
}

/// Source tile product held in memory
#[derive(Debug, Clone)]
pub struct MemoryProduct {
    name: String,
    tile_size: usize,
    bands: HashMap<String, BandTile>,
}

impl MemoryProduct {
    pub fn new(name: &str, tile_size: usize) -> Self {
        Self {
            name: name.to_string(),
            tile_size,
            bands: HashMap::new(),
        }
    }

    /// Add a full-tile band
    pub fn with_band(mut self, band: &str, data: BandTile) -> CompositeResult<Self> {
        if data.dim() != (self.tile_size, self.tile_size) {
            return Err(CompositeError::InvalidFormat(format!(
                "band {} has shape {:?}, expected {}x{}",
                band,
                data.dim(),
                self.tile_size,
                self.tile_size
            )));
        }
        self.bands.insert(band.to_string(), data);
        Ok(self)
    }

    /// Add a band with the same value in every pixel
    pub fn with_constant(self, band: &str, value: f32) -> CompositeResult<Self> {
        let size = self.tile_size;
        self.with_band(band, Array2::from_elem((size, size), value))
    }
}

impl TileReader for MemoryProduct {
    fn name(&self) -> &str {
        &self.name
    }

    fn tile_size(&self) -> usize {
        self.tile_size
    }

    fn read_band(&self, band: &str, area: &TileArea) -> CompositeResult<BandTile> {
        let data = self.bands.get(band).ok_or_else(|| {
            CompositeError::InvalidFormat(format!("product {} has no band {}", self.name, band))
        })?;
        if area.x + area.width > self.tile_size || area.y + area.height > self.tile_size {
            return Err(CompositeError::Processing(format!(
                "area {:?} outside of {}x{} tile {}",
                area, self.tile_size, self.tile_size, self.name
            )));
        }
        Ok(data
            .slice(s![area.y..area.y + area.height, area.x..area.x + area.width])
            .to_owned())
    }
}
