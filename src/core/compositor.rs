//! Per-tile compositing: the job's compositing mode over every micro tile of
//! one spatial tile, each composite band tagged with its key.

use crate::config::{CompositingMode, JobContext};
use crate::core::best_pixel::{BestPixelAggregator, BestPixelParams, CompositeTile};
use crate::core::key::KeyFields;
use crate::core::shuffle::KeyedTile;
use crate::core::single_pass::{SinglePassAggregator, SinglePassRule};
use crate::core::status::{StatusAggregator, StatusSummary};
use crate::io::tile_reader::TimeSeries;
use crate::types::{CompositeError, CompositeResult, TileArea};

/// Output band carrying the composite status
const STATUS_OUTPUT: &str = "status";

/// Compositor of one job
pub struct Compositor<'a> {
    ctx: &'a JobContext,
}

impl<'a> Compositor<'a> {
    pub fn new(ctx: &'a JobContext) -> Self {
        Self { ctx }
    }

    fn check_series(&self, series: &TimeSeries) -> CompositeResult<()> {
        if series.tile.sensor != self.ctx.config.sensor {
            return Err(CompositeError::Config(format!(
                "tile {} does not belong to a {} job",
                series.tile, self.ctx.config.sensor
            )));
        }
        for reader in series.readers() {
            if reader.tile_size() != self.ctx.grid.tile_size {
                return Err(CompositeError::InvalidFormat(format!(
                    "{} has tile size {}, expected {}",
                    reader.name(),
                    reader.tile_size(),
                    self.ctx.grid.tile_size
                )));
            }
        }
        Ok(())
    }

    /// Composite micro tile (`micro_y`, `micro_x`) of the series with the
    /// job's mode. None when no pixel has a valid status.
    pub fn composite_micro_tile(
        &self,
        series: &TimeSeries,
        micro_y: usize,
        micro_x: usize,
    ) -> CompositeResult<Option<CompositeTile>> {
        let size = self.ctx.grid.micro_tile_size();
        let area = TileArea {
            x: micro_x * size,
            y: micro_y * size,
            width: size,
            height: size,
        };

        let (composite, summary) = match self.ctx.config.mode {
            CompositingMode::BestPixels => {
                let status = StatusAggregator::new(&self.ctx.table, self.ctx.sr_threshold())
                    .aggregate(series.readers(), &area)?;
                let summary = StatusSummary::from_majority(&status.majority);
                log::info!(
                    "{} micro tile y{} x{}: {} observations, {}",
                    series.tile,
                    micro_y,
                    micro_x,
                    status.observations,
                    summary
                );
                if summary.is_empty() {
                    log::info!("{} micro tile y{} x{}: no valid pixel, skipped", series.tile, micro_y, micro_x);
                    return Ok(None);
                }
                let params = BestPixelParams {
                    sr_threshold: self.ctx.sr_threshold(),
                    epsilon: self.ctx.epsilon(),
                };
                let composite = BestPixelAggregator::with_params(&self.ctx.table, &self.ctx.outputs, params)
                    .aggregate(series.readers(), &area, &status)?;
                (composite, summary)
            }
            mode => {
                let rule = match mode {
                    CompositingMode::MaxIndex => SinglePassRule::MaxIndex,
                    _ => SinglePassRule::StatusRank,
                };
                let composite = SinglePassAggregator::new(&self.ctx.table, &self.ctx.outputs, rule)
                    .with_threshold(self.ctx.sr_threshold())
                    .aggregate(series.readers(), &area)?;
                let summary = composite
                    .band(STATUS_OUTPUT)
                    .map(StatusSummary::from_majority)
                    .unwrap_or_default();
                log::info!("{} micro tile y{} x{}: {:?}, {}", series.tile, micro_y, micro_x, rule, summary);
                (composite, summary)
            }
        };
        if summary.is_empty() {
            log::info!("{} micro tile y{} x{}: no valid pixel, skipped", series.tile, micro_y, micro_x);
            return Ok(None);
        }
        Ok(Some(composite))
    }

    /// Composite every micro tile inside the output area, keyed for assembly
    pub fn composite_tile(&self, series: &TimeSeries) -> CompositeResult<Vec<KeyedTile>> {
        self.check_series(series)?;
        if series.is_empty() {
            log::warn!("No observations for {}", series.tile);
            return Ok(Vec::new());
        }

        let n = self.ctx.grid.micro_tiles;
        let band_count = self.ctx.table.band_count() as u32;
        let mut fragments = Vec::new();
        for micro_y in 0..n {
            let row = series.tile.tile_row as usize * n + micro_y;
            if !self.ctx.area.contains_row(row) {
                continue;
            }
            for micro_x in 0..n {
                let column = series.tile.tile_column as usize * n + micro_x;
                if !self.ctx.area.contains_column(column) {
                    continue;
                }
                let Some(composite) = self.composite_micro_tile(series, micro_y, micro_x)? else {
                    continue;
                };
                for (band, tile) in composite.bands {
                    let key = self.ctx.codec.encode(KeyFields {
                        band_count,
                        band_index: band.index as u32,
                        tile_row: row as u32,
                        tile_column: column as u32,
                    });
                    fragments.push(KeyedTile { key, tile });
                }
            }
        }
        log::debug!("{}: {} fragments", series.tile, fragments.len());
        Ok(fragments)
    }
}
