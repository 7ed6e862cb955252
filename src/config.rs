//! Job configuration and the per-job context derived from it

use crate::core::key::{KeyCodec, KeyFields, KeyLayout};
use crate::io::bands::{BandTable, SensorFamily};
use crate::io::filename::{output_product_name, period_starts, SourceNameParser};
use crate::io::mosaic_writer::MosaicGeometry;
use crate::types::{CompositeError, CompositeResult, GeoTransform, OutputBand, TileArea, TileGrid};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the observations of a pixel are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompositingMode {
    /// Majority status, then one-sigma filtered weighted average
    #[default]
    #[serde(alias = "PERCENTILE")]
    BestPixels,
    /// Observation with the highest land index of the best status
    #[serde(alias = "ON_MAX_SET")]
    MaxIndex,
    /// Weighted average of the observations of the best status
    #[serde(alias = "AVG")]
    StatusRank,
}

/// Seasonal compositing job parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositingConfig {
    /// Sensor and resolution as in source file names, e.g. "MERIS-300m"
    pub sensor: String,
    /// Rows of the global mosaic
    pub mosaic_height: usize,
    pub start_date: NaiveDate,
    /// Inclusive
    pub stop_date: NaiveDate,
    /// Reflectances below are treated as invalid, disabled when unset
    pub sr_threshold: Option<f32>,
    /// Comma-separated subset of continuous output bands
    pub output_bands: Option<String>,
    /// "seasonal" or "micro-tile"; the smallest fitting layout when unset
    pub key_layout: Option<String>,
    pub num_partitions: usize,
    pub mode: CompositingMode,
    /// Sub-area of the mosaic in tile units
    pub region: Option<TileArea>,
    pub region_name: Option<String>,
    pub version: String,
    /// Tolerance of the one-sigma filter
    pub epsilon: f64,
}

impl Default for CompositingConfig {
    fn default() -> Self {
        Self {
            sensor: "MERIS-300m".to_string(),
            mosaic_height: 64800,
            start_date: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default(),
            stop_date: NaiveDate::from_ymd_opt(2010, 12, 31).unwrap_or_default(),
            sr_threshold: None,
            output_bands: None,
            key_layout: None,
            num_partitions: 4,
            mode: CompositingMode::default(),
            region: None,
            region_name: None,
            version: "2.0".to_string(),
            epsilon: 1e-6,
        }
    }
}

impl CompositingConfig {
    pub fn from_xml(xml: &str) -> CompositeResult<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    pub fn from_xml_file<P: AsRef<Path>>(path: P) -> CompositeResult<Self> {
        log::info!("Reading compositing config from {}", path.as_ref().display());
        let xml = std::fs::read_to_string(path.as_ref())?;
        Self::from_xml(&xml)
    }
}

/// Immutable values derived once per job and passed to every component
#[derive(Debug, Clone)]
pub struct JobContext {
    pub config: CompositingConfig,
    pub family: SensorFamily,
    pub table: BandTable,
    /// Bands produced by this job, positions as in `table`
    pub outputs: Vec<OutputBand>,
    pub grid: TileGrid,
    pub codec: KeyCodec,
    pub parser: SourceNameParser,
    /// Start dates of the input periods
    pub periods: Vec<NaiveDate>,
    /// Output area in micro-tile units
    pub area: TileArea,
}

impl JobContext {
    pub fn new(config: CompositingConfig) -> CompositeResult<Self> {
        let family = SensorFamily::from_sensor(&config.sensor)?;
        let table = BandTable::for_family(family);
        let outputs = table.selected_outputs(config.output_bands.as_deref())?;
        let grid = TileGrid::new(config.mosaic_height, family.tile_rows(), family.micro_tiles())?;
        let periods = period_starts(config.start_date, config.stop_date, family.days_per_period())?;

        if config.num_partitions == 0 {
            return Err(CompositeError::Config("number of partitions must be positive".to_string()));
        }
        if config.epsilon.is_nan() || config.epsilon < 0.0 {
            return Err(CompositeError::Config(format!("invalid epsilon {}", config.epsilon)));
        }

        let area = match &config.region {
            Some(region) => {
                if region.width == 0
                    || region.height == 0
                    || region.x + region.width > grid.tile_columns
                    || region.y + region.height > grid.tile_rows
                {
                    return Err(CompositeError::Config(format!(
                        "region {:?} outside of {}x{} tile grid",
                        region, grid.tile_columns, grid.tile_rows
                    )));
                }
                region.scaled(grid.micro_tiles)
            }
            None => grid.full_area(),
        };

        // largest key this job can emit
        let extreme = KeyFields {
            band_count: table.band_count() as u32,
            band_index: (table.band_count() - 1) as u32,
            tile_row: (grid.micro_rows() - 1) as u32,
            tile_column: (grid.micro_columns() - 1) as u32,
        };
        let layout = match config.key_layout.as_deref() {
            Some(name) => {
                let layout = KeyLayout::from_name(name)
                    .ok_or_else(|| CompositeError::Config(format!("unknown key layout {}", name)))?;
                if !KeyCodec::new(layout).fits(&extreme) {
                    return Err(CompositeError::Config(format!(
                        "{} key layout cannot address {} bands on a {}x{} micro-tile grid",
                        name,
                        table.band_count(),
                        grid.micro_columns(),
                        grid.micro_rows()
                    )));
                }
                layout
            }
            None => [KeyLayout::SEASONAL, KeyLayout::MICRO_TILE]
                .into_iter()
                .find(|layout| KeyCodec::new(*layout).fits(&extreme))
                .ok_or_else(|| {
                    CompositeError::Config(format!(
                        "no key layout addresses a {}x{} micro-tile grid",
                        grid.micro_columns(),
                        grid.micro_rows()
                    ))
                })?,
        };

        log::info!(
            "Job {:?} ({:?}): {} bands, {} tiles of {} px, {} micro tiles per side, {} key layout, {} periods",
            family,
            config.mode,
            outputs.len(),
            grid.tile_columns * grid.tile_rows,
            grid.tile_size,
            grid.micro_tiles,
            layout.name,
            periods.len()
        );

        Ok(Self {
            config,
            family,
            table,
            outputs,
            grid,
            codec: KeyCodec::new(layout),
            parser: SourceNameParser::new()?,
            periods,
            area,
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.config.epsilon
    }

    pub fn sr_threshold(&self) -> Option<f32> {
        self.config.sr_threshold
    }

    /// Extent and georeferencing of the output rasters
    pub fn output_geometry(&self) -> MosaicGeometry {
        let pixels = self.area.scaled(self.grid.micro_tile_size());
        let pixel_size = 180.0 / self.config.mosaic_height as f64;
        let reference = self.family.pixel_reference() * pixel_size;
        MosaicGeometry {
            width: pixels.width,
            height: pixels.height,
            geo_transform: GeoTransform {
                top_left_x: -180.0 + pixel_size * pixels.x as f64 - reference,
                pixel_width: pixel_size,
                rotation_x: 0.0,
                top_left_y: 90.0 - pixel_size * pixels.y as f64 + reference,
                rotation_y: 0.0,
                pixel_height: -pixel_size,
            },
        }
    }

    /// Product name of one output band
    pub fn output_name(&self, band: &OutputBand) -> String {
        output_product_name(
            self.family,
            self.config.mosaic_height,
            self.config.start_date,
            self.config.stop_date,
            &band.name,
            self.config.region_name.as_deref(),
            &self.config.version,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_xml() {
        let xml = r#"
            <compositingConfig>
                <sensor>SYN-L3</sensor>
                <mosaicHeight>64800</mosaicHeight>
                <startDate>2021-06-01</startDate>
                <stopDate>2021-06-30</stopDate>
                <srThreshold>0.0</srThreshold>
                <outputBands>sdr_Oa17,sdr_Sl02</outputBands>
                <numPartitions>2</numPartitions>
                <version>1.0</version>
            </compositingConfig>
        "#;
        let config = CompositingConfig::from_xml(xml).unwrap();
        assert_eq!(config.sensor, "SYN-L3");
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2021, 6, 1).unwrap());
        assert_eq!(config.sr_threshold, Some(0.0));
        assert_eq!(config.key_layout, None);
        assert_eq!(config.num_partitions, 2);
        assert_eq!(config.epsilon, 1e-6);
        assert_eq!(config.mode, CompositingMode::BestPixels);

        let ctx = JobContext::new(config).unwrap();
        assert_eq!(ctx.family, SensorFamily::Syn);
        assert_eq!(ctx.periods.len(), 30);
        let names: Vec<&str> = ctx.outputs.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["status", "status_count", "obs_count", "sl123_count", "sl56_count", "sdr_Oa17", "sdr_Sl02"]
        );
    }

    #[test]
    fn test_compositing_mode_names() {
        let mode = |name: &str| {
            let xml = format!("<compositingConfig><mode>{}</mode></compositingConfig>", name);
            CompositingConfig::from_xml(&xml).map(|c| c.mode)
        };
        assert_eq!(mode("best-pixels").unwrap(), CompositingMode::BestPixels);
        assert_eq!(mode("PERCENTILE").unwrap(), CompositingMode::BestPixels);
        assert_eq!(mode("max-index").unwrap(), CompositingMode::MaxIndex);
        assert_eq!(mode("ON_MAX_SET").unwrap(), CompositingMode::MaxIndex);
        assert_eq!(mode("status-rank").unwrap(), CompositingMode::StatusRank);
        assert!(mode("median").is_err());
    }

    #[test]
    fn test_msi_needs_micro_tile_layout() {
        let config = CompositingConfig {
            sensor: "MSI-20m".to_string(),
            mosaic_height: 972000,
            start_date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            stop_date: NaiveDate::from_ymd_opt(2019, 1, 10).unwrap(),
            ..Default::default()
        };
        let ctx = JobContext::new(config.clone()).unwrap();
        assert_eq!(ctx.codec.layout().name, "micro-tile");
        assert_eq!(ctx.grid.micro_columns(), 1800);

        let forced = CompositingConfig {
            key_layout: Some("seasonal".to_string()),
            ..config
        };
        assert!(matches!(JobContext::new(forced), Err(CompositeError::Config(_))));
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let bad_sensor = CompositingConfig {
            sensor: "AVHRR-1000m".to_string(),
            ..Default::default()
        };
        assert!(JobContext::new(bad_sensor).is_err());

        let bad_region = CompositingConfig {
            region: Some(TileArea { x: 70, y: 0, width: 3, height: 1 }),
            ..Default::default()
        };
        assert!(JobContext::new(bad_region).is_err());

        let bad_layout = CompositingConfig {
            key_layout: Some("mosaic".to_string()),
            ..Default::default()
        };
        assert!(JobContext::new(bad_layout).is_err());
    }

    #[test]
    fn test_region_geometry() {
        let config = CompositingConfig {
            sensor: "PROBAV-333m".to_string(),
            mosaic_height: 60480,
            region: Some(TileArea { x: 36, y: 10, width: 2, height: 1 }),
            region_name: Some("europe".to_string()),
            ..Default::default()
        };
        let ctx = JobContext::new(config).unwrap();
        let geometry = ctx.output_geometry();
        assert_eq!(geometry.width, 2 * 1680);
        assert_eq!(geometry.height, 1680);
        let px = 180.0 / 60480.0;
        approx::assert_relative_eq!(geometry.geo_transform.top_left_x, -0.5 * px, epsilon = 1e-12);
        approx::assert_relative_eq!(geometry.geo_transform.top_left_y, 90.0 - 16800.0 * px + 0.5 * px, epsilon = 1e-9);
        assert_eq!(
            ctx.output_name(&ctx.outputs[0]),
            "ESACCI-LC-L3-SR-PROBAV-333m-P52W-status-europe-20100101-v2.0"
        );
    }
}
