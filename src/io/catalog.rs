//! Discovery of the weekly time series per spatial tile

use crate::config::JobContext;
use crate::io::tile_reader::{TileReader, TimeSeries};
use crate::types::{CompositeResult, TileCoordinate};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Source files of one spatial tile, ordered by date
#[derive(Debug, Clone)]
pub struct TileInputs {
    pub tile: TileCoordinate,
    pub files: Vec<(NaiveDate, PathBuf)>,
}

/// Source files of a job grouped per spatial tile
#[derive(Debug, Clone, Default)]
pub struct InputCatalog {
    pub tiles: Vec<TileInputs>,
}

impl InputCatalog {
    /// Scan `dir` recursively for files with `extension`.
    ///
    /// Every such file must follow the source naming convention. Files of
    /// other sensors or outside the job's periods are ignored.
    pub fn scan<P: AsRef<Path>>(dir: P, ctx: &JobContext, extension: &str) -> CompositeResult<Self> {
        log::info!("Scanning {} for *.{} inputs", dir.as_ref().display(), extension);
        let paths = collect_files(dir.as_ref(), extension)?;

        let periods: BTreeSet<NaiveDate> = ctx.periods.iter().copied().collect();
        let mut per_tile: BTreeMap<(u32, u32), TileInputs> = BTreeMap::new();
        let mut ignored = 0;
        for path in paths {
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let name = ctx.parser.parse(file_name)?;
            if name.sensor != ctx.config.sensor || !periods.contains(&name.date) {
                ignored += 1;
                continue;
            }
            let tile = name.tile(&ctx.grid)?;
            per_tile
                .entry((tile.tile_row, tile.tile_column))
                .or_insert_with(|| TileInputs {
                    tile,
                    files: Vec::new(),
                })
                .files
                .push((name.date, path));
        }

        let mut tiles: Vec<TileInputs> = per_tile.into_values().collect();
        for inputs in &mut tiles {
            inputs.files.sort();
            let covered: BTreeSet<NaiveDate> = inputs.files.iter().map(|(date, _)| *date).collect();
            let missing = periods.difference(&covered).count();
            if missing > 0 {
                log::warn!("{}: {} of {} periods without input", inputs.tile, missing, periods.len());
            }
        }
        log::info!(
            "Found inputs for {} tiles, ignored {} files of other sensors or periods",
            tiles.len(),
            ignored
        );
        Ok(Self { tiles })
    }

    /// Open the time series of every tile with `open`
    pub fn open<F>(&self, open: F) -> CompositeResult<Vec<TimeSeries>>
    where
        F: Fn(&Path) -> CompositeResult<Box<dyn TileReader>>,
    {
        self.tiles
            .iter()
            .map(|inputs| -> CompositeResult<TimeSeries> {
                let mut series = TimeSeries::new(inputs.tile.clone());
                for (date, path) in &inputs.files {
                    series.push(*date, open(path)?);
                }
                Ok(series)
            })
            .collect()
    }
}

/// Files below `dir` with `extension`, in file name order per directory
fn collect_files(dir: &Path, extension: &str) -> CompositeResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && entry.path().extension().and_then(|e| e.to_str()) == Some(extension) {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}
