//! Source file naming, period calendar and output product naming

use crate::io::bands::SensorFamily;
use crate::types::{CompositeError, CompositeResult, TileCoordinate, TileGrid};
use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;

/// `[ESACCI-LC-L3-SR-]<sensor>-<resolution>-<period>-h<col>v<row>-<yyyymmdd>[-<suffix>]-<version>.<ext>`
const SOURCE_NAME_PATTERN: &str = r"^(?:ESACCI-LC-L3-SR-)?([^-]+-[^-]+)-([^-]+)-h([0-9]+)v([0-9]+)-([0-9]{8})(?:-([^-]*))?-(.+)\.([A-Za-z0-9]+)$";

/// Parsed components of a weekly source file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceName {
    pub sensor: String,
    pub period: String,
    pub tile_column: u32,
    pub tile_row: u32,
    pub date: NaiveDate,
    pub suffix: Option<String>,
    pub version: String,
    pub extension: String,
}

impl SourceName {
    pub fn tile(&self, grid: &TileGrid) -> CompositeResult<TileCoordinate> {
        TileCoordinate::new(&self.sensor, self.tile_column, self.tile_row, grid)
    }
}

/// Compiled source name pattern, built once per job
#[derive(Debug, Clone)]
pub struct SourceNameParser {
    pattern: Regex,
}

impl SourceNameParser {
    pub fn new() -> CompositeResult<Self> {
        let pattern = Regex::new(SOURCE_NAME_PATTERN)
            .map_err(|e| CompositeError::Processing(format!("Regex error: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Parse a file name. A name that does not match is fatal for the file,
    /// its tile identity cannot be inferred.
    pub fn parse(&self, file_name: &str) -> CompositeResult<SourceName> {
        let captures = self.pattern.captures(file_name).ok_or_else(|| {
            CompositeError::InvalidFormat(format!(
                "file name {} does not match pattern {}",
                file_name,
                self.pattern.as_str()
            ))
        })?;
        let number = |i: usize| -> CompositeResult<u32> {
            captures[i].parse::<u32>().map_err(|e| {
                CompositeError::InvalidFormat(format!("{} in file name {}", e, file_name))
            })
        };
        let date = NaiveDate::parse_from_str(&captures[5], "%Y%m%d").map_err(|e| {
            CompositeError::InvalidFormat(format!("invalid date {} in {}: {}", &captures[5], file_name, e))
        })?;
        Ok(SourceName {
            sensor: captures[1].to_string(),
            period: captures[2].to_string(),
            tile_column: number(3)?,
            tile_row: number(4)?,
            date,
            suffix: captures.get(6).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty()),
            version: captures[7].to_string(),
            extension: captures[8].to_string(),
        })
    }
}

/// Length of the 7-day period starting at `date`.
///
/// Weeks starting Dec 24 and Feb 26 of leap years take eight days so that
/// every year has exactly 52 weeks starting Jan 1.
pub fn length_of_week(date: NaiveDate) -> i64 {
    let leap = NaiveDate::from_ymd_opt(date.year(), 2, 29).is_some();
    match (date.month(), date.day()) {
        (2, 26) if leap => 8,
        (12, 24) => 8,
        _ => 7,
    }
}

/// Start dates of all input periods between `start` and `stop`.
///
/// The season is the window from the month/day of `start` to the month/day
/// of `stop`; when `stop` lies in a later year the window is repeated every
/// year until `stop`.
pub fn period_starts(start: NaiveDate, stop: NaiveDate, days_per_period: u32) -> CompositeResult<Vec<NaiveDate>> {
    if stop < start {
        return Err(CompositeError::Config(format!("stop date {} before start date {}", stop, start)));
    }
    let mut season_start = start;
    let mut season_stop = with_year(stop, start.year())?;
    if season_stop < season_start {
        season_stop = with_year(season_stop, season_stop.year() + 1)?;
    }

    let mut periods = Vec::new();
    let mut period = start;
    while period <= stop {
        periods.push(period);
        let step = if days_per_period == 7 {
            length_of_week(period)
        } else {
            days_per_period as i64
        };
        let mut next = period + Duration::days(step);
        if next > season_stop {
            season_start = with_year(season_start, season_start.year() + 1)?;
            season_stop = with_year(season_stop, season_stop.year() + 1)?;
            next = season_start;
        }
        period = next;
    }
    Ok(periods)
}

fn with_year(date: NaiveDate, year: i32) -> CompositeResult<NaiveDate> {
    date.with_year(year)
        .ok_or_else(|| CompositeError::Config(format!("{} has no counterpart in year {}", date, year)))
}

/// Nominal resolution in metres of a global mosaic with `mosaic_height` rows
pub fn resolution_of(mosaic_height: usize) -> usize {
    match mosaic_height {
        972000 => 20,
        64800 => 300,
        16200 | 20160 => 1000,
        60480 => 333,
        0 => 0,
        h => 19_440_000 / h,
    }
}

/// Name of one output band product, without extension
pub fn output_product_name(
    family: SensorFamily,
    mosaic_height: usize,
    start: NaiveDate,
    stop: NaiveDate,
    band_name: &str,
    region_name: Option<&str>,
    version: &str,
) -> String {
    let days = (stop - start).num_days() + 1;
    let period = match family {
        SensorFamily::Msi | SensorFamily::Agri => format!("P{}D", days),
        _ => format!("P{}W", days / 7),
    };
    format!(
        "ESACCI-LC-L3-SR-{}-{}m-{}-{}-{}{}-v{}",
        family.product_name(),
        resolution_of(mosaic_height),
        period,
        band_name,
        region_name.map(|r| format!("{}-", r)).unwrap_or_default(),
        start.format("%Y%m%d"),
        version
    )
}
