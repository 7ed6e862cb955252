//! Local map / shuffle / reduce driver.
//!
//! Tiles are processed one tile row at a time. Map: one independent
//! compositing task per spatial tile of the row. Shuffle: route the row's
//! fragments by partition and sort them by key. Reduce: one sequential
//! assembler per partition; partitions own disjoint groups and run in
//! parallel. A tile row holds every group it touches, so at most one tile
//! row of fragments is in memory at any time.

use crate::config::JobContext;
use crate::core::assembly::{AssemblyStats, TileAssembler};
use crate::core::compositor::Compositor;
use crate::core::shuffle::{shuffle, KeyedTile};
use crate::io::mosaic_writer::MosaicWriter;
use crate::io::tile_reader::TimeSeries;
use crate::types::CompositeResult;
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub tiles: usize,
    pub fragments: usize,
    /// Most fragments held between map and reduce
    pub peak_fragments: usize,
    /// Tile rows processed
    pub batches: usize,
    pub partitions: usize,
    pub assembly: AssemblyStats,
}

/// In-process pipeline of one job
pub struct LocalPipeline<'a> {
    ctx: &'a JobContext,
}

impl<'a> LocalPipeline<'a> {
    pub fn new(ctx: &'a JobContext) -> Self {
        Self { ctx }
    }

    /// Composite every tile series
    pub fn map(&self, series: &[&TimeSeries]) -> CompositeResult<Vec<KeyedTile>> {
        let compositor = Compositor::new(self.ctx);

        #[cfg(feature = "parallel")]
        let per_tile: Vec<Vec<KeyedTile>> = {
            use rayon::prelude::*;
            series
                .par_iter()
                .map(|s| compositor.composite_tile(s))
                .collect::<CompositeResult<_>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let per_tile: Vec<Vec<KeyedTile>> = series
            .iter()
            .map(|s| compositor.composite_tile(s))
            .collect::<CompositeResult<_>>()?;

        Ok(per_tile.into_iter().flatten().collect())
    }

    /// Assemble one sorted partition
    pub fn reduce(&self, partition: Vec<KeyedTile>, writer: &dyn MosaicWriter) -> CompositeResult<AssemblyStats> {
        let mut assembler = TileAssembler::new(self.ctx, writer);
        for fragment in partition {
            assembler.push(fragment.key, fragment.tile)?;
        }
        assembler.finish()
    }

    fn reduce_all(&self, fragments: Vec<KeyedTile>, writer: &dyn MosaicWriter) -> CompositeResult<Vec<AssemblyStats>> {
        let partitions = shuffle(&self.ctx.codec, fragments, self.ctx.config.num_partitions);

        #[cfg(feature = "parallel")]
        let stats: Vec<AssemblyStats> = {
            use rayon::prelude::*;
            partitions
                .into_par_iter()
                .map(|partition| self.reduce(partition, writer))
                .collect::<CompositeResult<_>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let stats: Vec<AssemblyStats> = partitions
            .into_iter()
            .map(|partition| self.reduce(partition, writer))
            .collect::<CompositeResult<_>>()?;

        Ok(stats)
    }

    /// Run all stages tile row by tile row and finish the writer
    pub fn run(&self, series: &[TimeSeries], writer: &dyn MosaicWriter) -> CompositeResult<PipelineSummary> {
        let start = Instant::now();
        log::info!("Compositing {} tiles", series.len());

        let mut rows: BTreeMap<u32, Vec<&TimeSeries>> = BTreeMap::new();
        for s in series {
            rows.entry(s.tile.tile_row).or_default().push(s);
        }

        let mut summary = PipelineSummary {
            tiles: series.len(),
            partitions: self.ctx.config.num_partitions,
            ..Default::default()
        };
        for (tile_row, batch) in rows {
            let fragments = self.map(&batch)?;
            log::debug!("Tile row {}: {} fragments from {} tiles", tile_row, fragments.len(), batch.len());
            summary.fragments += fragments.len();
            summary.peak_fragments = summary.peak_fragments.max(fragments.len());
            summary.batches += 1;

            for s in self.reduce_all(fragments, writer)? {
                summary.assembly.groups += s.groups;
                summary.assembly.tiles += s.tiles;
                summary.assembly.missing_tiles += s.missing_tiles;
                summary.assembly.lines += s.lines;
                summary.assembly.skipped += s.skipped;
            }
        }

        writer.finish()?;

        log::info!(
            "✅ Assembled {} tile rows ({} fragments, {} lines, {} missing tiles) in {:.2} seconds",
            summary.batches,
            summary.fragments,
            summary.assembly.lines,
            summary.assembly.missing_tiles,
            start.elapsed().as_secs_f64()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompositingConfig;
    use crate::io::bands::{SR_COUNT_BANDS, STATUS_BAND};
    use crate::io::mosaic_writer::MemoryMosaicWriter;
    use crate::io::tile_reader::MemoryProduct;
    use crate::types::{PixelState, TileArea, TileCoordinate};
    use chrono::NaiveDate;

    /// MERIS job with 2x2 pixel tiles over 3x2 tiles
    fn context() -> JobContext {
        JobContext::new(CompositingConfig {
            mosaic_height: 72,
            output_bands: Some("sr_1_mean".to_string()),
            region: Some(TileArea { x: 0, y: 0, width: 3, height: 2 }),
            num_partitions: 2,
            ..Default::default()
        })
        .unwrap()
    }

    fn land_series(ctx: &JobContext, column: u32, row: u32, sr_1: f32) -> TimeSeries {
        let mut product = MemoryProduct::new("week", ctx.grid.tile_size)
            .with_constant(STATUS_BAND, PixelState::Land.code() as f32)
            .unwrap();
        for band in SR_COUNT_BANDS {
            product = product.with_constant(band, 1.0).unwrap();
        }
        for band in &ctx.table.groups[0].bands {
            product = product.with_constant(band, sr_1).unwrap();
        }
        let mut series = TimeSeries::new(TileCoordinate::new("MERIS-300m", column, row, &ctx.grid).unwrap());
        series.push(NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(), Box::new(product));
        series
    }

    #[test]
    fn test_one_tile_row_in_memory_at_a_time() {
        let ctx = context();
        let mut series = Vec::new();
        for row in [1u32, 0] {
            for column in 0..3u32 {
                series.push(land_series(&ctx, column, row, 0.1 * (1 + column + 3 * row) as f32));
            }
        }
        let writer = MemoryMosaicWriter::new(ctx.output_geometry(), &ctx.outputs);
        let summary = LocalPipeline::new(&ctx).run(&series, &writer).unwrap();

        // 4 output bands per tile
        assert_eq!(summary.fragments, 6 * 4);
        assert_eq!(summary.peak_fragments, 3 * 4);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.assembly.groups, 2 * 4);
        assert_eq!(summary.assembly.missing_tiles, 0);

        let sr = writer.raster("sr_1_mean").unwrap();
        assert_eq!(sr.dim(), (4, 6));
        approx::assert_relative_eq!(sr[[0, 0]], 0.1, epsilon = 1e-6);
        approx::assert_relative_eq!(sr[[3, 5]], 0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_job_finishes_writer() {
        let ctx = context();
        let writer = MemoryMosaicWriter::new(ctx.output_geometry(), &ctx.outputs);
        let summary = LocalPipeline::new(&ctx).run(&[], &writer).unwrap();
        assert_eq!(summary.batches, 0);
        assert!(writer.written_lines().is_empty());
        assert!(writer.raster("sr_1_mean").unwrap().iter().all(|v| v.is_nan()));
    }
}
