use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// One band of one (micro) tile, row-major square grid of samples
pub type BandTile = Array2<f32>;

/// Per-pixel land-cover / cloud classification code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PixelState {
    Invalid = 0,
    Land = 1,
    Water = 2,
    Snow = 3,
    Cloud = 4,
    Shadow = 5,
    Haze = 11,
    Bright = 12,
    TemporalCloud = 14,
    Dark = 15,
}

impl PixelState {
    /// All states, highest priority first
    pub const BY_PRIORITY: [PixelState; 10] = [
        PixelState::Land,
        PixelState::Water,
        PixelState::Snow,
        PixelState::Shadow,
        PixelState::Haze,
        PixelState::Bright,
        PixelState::Dark,
        PixelState::TemporalCloud,
        PixelState::Cloud,
        PixelState::Invalid,
    ];

    /// Decode a status byte; unknown codes are INVALID
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => PixelState::Land,
            2 => PixelState::Water,
            3 => PixelState::Snow,
            4 => PixelState::Cloud,
            5 => PixelState::Shadow,
            11 => PixelState::Haze,
            12 => PixelState::Bright,
            14 => PixelState::TemporalCloud,
            15 => PixelState::Dark,
            _ => PixelState::Invalid,
        }
    }

    /// Decode a status sample as delivered by a float band
    pub fn from_sample(sample: f32) -> Self {
        if sample.is_finite() && sample >= 0.0 && sample <= u8::MAX as f32 {
            Self::from_code(sample as u8)
        } else {
            PixelState::Invalid
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Priority rank for majority resolution, higher wins
    pub fn rank(self) -> u8 {
        match self {
            PixelState::Land => 9,
            PixelState::Water => 8,
            PixelState::Snow => 7,
            PixelState::Shadow => 6,
            PixelState::Haze => 5,
            PixelState::Bright => 4,
            PixelState::Dark => 3,
            PixelState::TemporalCloud => 2,
            PixelState::Cloud => 1,
            PixelState::Invalid => 0,
        }
    }

    /// Accumulator slot of this state, None for INVALID
    pub fn class(self) -> Option<StatusClass> {
        match self {
            PixelState::Land => Some(StatusClass::Land),
            PixelState::Water => Some(StatusClass::Water),
            PixelState::Snow => Some(StatusClass::Snow),
            PixelState::Shadow => Some(StatusClass::Shadow),
            PixelState::Haze => Some(StatusClass::Haze),
            PixelState::Bright => Some(StatusClass::Bright),
            PixelState::Dark => Some(StatusClass::Dark),
            PixelState::Cloud | PixelState::TemporalCloud => Some(StatusClass::Cloud),
            PixelState::Invalid => None,
        }
    }
}

impl std::fmt::Display for PixelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PixelState::Invalid => "invalid",
            PixelState::Land => "land",
            PixelState::Water => "water",
            PixelState::Snow => "snow",
            PixelState::Cloud => "cloud",
            PixelState::Shadow => "shadow",
            PixelState::Haze => "haze",
            PixelState::Bright => "bright",
            PixelState::TemporalCloud => "temporal cloud",
            PixelState::Dark => "dark",
        };
        write!(f, "{}", name)
    }
}

/// Which normalized difference index a status class is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Vegetation-like index for land, dark, bright, haze, shadow
    Land,
    /// Water index for water and snow
    Water,
}

/// Tracked status classes, one accumulator slot each.
///
/// Declaration order is majority priority order. CLOUD and TEMPORAL_CLOUD
/// share the cloud slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusClass {
    Land,
    Water,
    Snow,
    Shadow,
    Haze,
    Bright,
    Dark,
    Cloud,
}

impl StatusClass {
    pub const COUNT: usize = 8;

    pub const ALL: [StatusClass; StatusClass::COUNT] = [
        StatusClass::Land,
        StatusClass::Water,
        StatusClass::Snow,
        StatusClass::Shadow,
        StatusClass::Haze,
        StatusClass::Bright,
        StatusClass::Dark,
        StatusClass::Cloud,
    ];

    pub fn slot(self) -> usize {
        self as usize
    }

    /// State written to the status band when this class is the majority
    pub fn state(self) -> PixelState {
        match self {
            StatusClass::Land => PixelState::Land,
            StatusClass::Water => PixelState::Water,
            StatusClass::Snow => PixelState::Snow,
            StatusClass::Shadow => PixelState::Shadow,
            StatusClass::Haze => PixelState::Haze,
            StatusClass::Bright => PixelState::Bright,
            StatusClass::Dark => PixelState::Dark,
            StatusClass::Cloud => PixelState::Cloud,
        }
    }

    pub fn index_kind(self) -> Option<IndexKind> {
        match self {
            StatusClass::Land
            | StatusClass::Shadow
            | StatusClass::Haze
            | StatusClass::Bright
            | StatusClass::Dark => Some(IndexKind::Land),
            StatusClass::Water | StatusClass::Snow => Some(IndexKind::Water),
            StatusClass::Cloud => None,
        }
    }

    /// Position of the occurrence-count band carrying this class's weight,
    /// within (land, water, snow, cloud, cloud shadow).
    /// Dark, bright and haze are counted as cloud shadow upstream.
    pub fn count_band_position(self) -> usize {
        match self {
            StatusClass::Land => 0,
            StatusClass::Water => 1,
            StatusClass::Snow => 2,
            StatusClass::Cloud => 3,
            StatusClass::Shadow | StatusClass::Haze | StatusClass::Bright | StatusClass::Dark => 4,
        }
    }
}

/// Spatial tile of a source file, in the sensor's tile grid
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    /// Sensor and resolution, e.g. "MERIS-300m" or "SYN-L3"
    pub sensor: String,
    pub tile_column: u32,
    pub tile_row: u32,
}

impl TileCoordinate {
    /// Create a coordinate checked against the tile grid
    pub fn new(sensor: &str, tile_column: u32, tile_row: u32, grid: &TileGrid) -> CompositeResult<Self> {
        if tile_column as usize >= grid.tile_columns || tile_row as usize >= grid.tile_rows {
            return Err(CompositeError::InvalidFormat(format!(
                "tile h{:02}v{:02} outside of {}x{} tile grid",
                tile_column, tile_row, grid.tile_columns, grid.tile_rows
            )));
        }
        Ok(Self {
            sensor: sensor.to_string(),
            tile_column,
            tile_row,
        })
    }
}

impl std::fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-h{:02}v{:02}", self.sensor, self.tile_column, self.tile_row)
    }
}

/// Global tile grid of a mosaic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    pub tile_rows: usize,
    pub tile_columns: usize,
    /// Side length of a tile in pixels
    pub tile_size: usize,
    /// Micro tiles per tile side
    pub micro_tiles: usize,
}

impl TileGrid {
    pub fn new(mosaic_height: usize, tile_rows: usize, micro_tiles: usize) -> CompositeResult<Self> {
        if tile_rows == 0 || micro_tiles == 0 {
            return Err(CompositeError::Config("tile rows and micro tiles must be positive".to_string()));
        }
        if mosaic_height % tile_rows != 0 {
            return Err(CompositeError::Config(format!(
                "mosaic height {} is not a multiple of {} tile rows",
                mosaic_height, tile_rows
            )));
        }
        let tile_size = mosaic_height / tile_rows;
        if tile_size % micro_tiles != 0 {
            return Err(CompositeError::Config(format!(
                "tile size {} is not a multiple of {} micro tiles",
                tile_size, micro_tiles
            )));
        }
        Ok(Self {
            tile_rows,
            tile_columns: 2 * tile_rows,
            tile_size,
            micro_tiles,
        })
    }

    pub fn micro_tile_size(&self) -> usize {
        self.tile_size / self.micro_tiles
    }

    pub fn micro_rows(&self) -> usize {
        self.tile_rows * self.micro_tiles
    }

    pub fn micro_columns(&self) -> usize {
        self.tile_columns * self.micro_tiles
    }

    /// Full mosaic as an area in micro-tile units
    pub fn full_area(&self) -> TileArea {
        TileArea {
            x: 0,
            y: 0,
            width: self.micro_columns(),
            height: self.micro_rows(),
        }
    }
}

/// Rectangle in tile (or pixel) units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileArea {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl TileArea {
    pub fn contains_column(&self, column: usize) -> bool {
        column >= self.x && column < self.x + self.width
    }

    pub fn contains_row(&self, row: usize) -> bool {
        row >= self.y && row < self.y + self.height
    }

    /// Scale a tile-unit area to pixels
    pub fn scaled(&self, factor: usize) -> TileArea {
        TileArea {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// GDAL coefficient order
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Role of an output band, determines pixel type and no-data value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandKind {
    Status,
    Count,
    Continuous,
}

/// Storage type of an output raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    U8,
    I16,
    F32,
}

impl PixelType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::I16 => 2,
            PixelType::F32 => 4,
        }
    }
}

impl BandKind {
    pub fn no_data(self) -> f32 {
        match self {
            BandKind::Status | BandKind::Count => 0.0,
            BandKind::Continuous => f32::NAN,
        }
    }

    pub fn pixel_type(self) -> PixelType {
        match self {
            BandKind::Status => PixelType::U8,
            BandKind::Count => PixelType::I16,
            BandKind::Continuous => PixelType::F32,
        }
    }
}

/// One band of the composite output table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputBand {
    /// Position in the output band table, as encoded in the composite key
    pub index: usize,
    pub name: String,
    pub kind: BandKind,
}

/// Error types for seasonal compositing
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Missing reference statistics: {0}")]
    MissingStatistics(String),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[cfg(feature = "gdal-io")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Result type for compositing operations
pub type CompositeResult<T> = Result<T, CompositeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_rank_is_strict_total_order() {
        let ranks: Vec<u8> = PixelState::BY_PRIORITY.iter().map(|s| s.rank()).collect();
        for pair in ranks.windows(2) {
            assert!(pair[0] > pair[1], "ranks not strictly descending: {:?}", ranks);
        }
        assert_eq!(PixelState::Invalid.rank(), 0);
    }

    #[test]
    fn test_unknown_codes_are_invalid() {
        let known = [0u8, 1, 2, 3, 4, 5, 11, 12, 14, 15];
        for code in 0..=u8::MAX {
            let state = PixelState::from_code(code);
            if known.contains(&code) {
                assert_eq!(state.code(), code);
            } else {
                assert_eq!(state, PixelState::Invalid);
                assert_eq!(state.rank(), 0);
            }
        }
        assert_eq!(PixelState::from_sample(f32::NAN), PixelState::Invalid);
        assert_eq!(PixelState::from_sample(-1.0), PixelState::Invalid);
        assert_eq!(PixelState::from_sample(15.0), PixelState::Dark);
    }

    #[test]
    fn test_class_slots_follow_priority() {
        for (slot, class) in StatusClass::ALL.iter().enumerate() {
            assert_eq!(class.slot(), slot);
            assert_eq!(StatusClass::ALL.get(slot), Some(class));
            assert_eq!(class.state().class(), Some(*class));
        }
        assert_eq!(PixelState::TemporalCloud.class(), Some(StatusClass::Cloud));
        assert_eq!(PixelState::Invalid.class(), None);
    }

    #[test]
    fn test_tile_grid_geometry() {
        let grid = TileGrid::new(64800, 36, 1).unwrap();
        assert_eq!(grid.tile_size, 1800);
        assert_eq!(grid.tile_columns, 72);
        assert_eq!(grid.micro_columns(), 72);

        let grid = TileGrid::new(64800, 18, 2).unwrap();
        assert_eq!(grid.micro_tile_size(), 1800);
        assert_eq!(grid.micro_rows(), 36);

        assert!(TileGrid::new(1000, 36, 1).is_err());
    }

    #[test]
    fn test_tile_coordinate_bounds() {
        let grid = TileGrid::new(64800, 36, 1).unwrap();
        assert!(TileCoordinate::new("MERIS-300m", 71, 35, &grid).is_ok());
        assert!(TileCoordinate::new("MERIS-300m", 72, 35, &grid).is_err());
        assert!(TileCoordinate::new("MERIS-300m", 0, 36, &grid).is_err());
    }
}
