//! Tile Assembly / Streaming Writer.
//!
//! Consumes the key-ordered fragment stream of one partition and writes each
//! (band, tile row) group as soon as it is complete or the stream moves past
//! it. At most one row of tiles is held in memory. Missing tile columns are
//! written as the band's no-data value.

use crate::config::JobContext;
use crate::core::key::{CompositeKey, KeyCodec};
use crate::core::shuffle::{compare, group_key};
use crate::io::mosaic_writer::MosaicWriter;
use crate::types::{BandTile, CompositeError, CompositeResult, OutputBand, TileArea};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    /// Collecting the fragments of the current group
    AwaitingRow,
    /// Current group is being written
    RowReady,
    /// Stream exhausted, everything flushed
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub groups: usize,
    pub tiles: usize,
    pub missing_tiles: usize,
    pub lines: usize,
    /// Fragments outside the output area
    pub skipped: usize,
}

struct RowGroup {
    group: u32,
    band: OutputBand,
    tile_row: usize,
    /// One slot per tile column of the output area
    columns: Vec<Option<BandTile>>,
    received: usize,
    written: bool,
}

/// Streaming assembler of one partition
pub struct TileAssembler<'a> {
    codec: &'a KeyCodec,
    outputs: &'a [OutputBand],
    band_count: u32,
    area: TileArea,
    tile_size: usize,
    writer: &'a dyn MosaicWriter,
    state: AssemblyState,
    current: Option<RowGroup>,
    last_key: Option<CompositeKey>,
    stats: AssemblyStats,
}

impl<'a> TileAssembler<'a> {
    pub fn new(ctx: &'a JobContext, writer: &'a dyn MosaicWriter) -> Self {
        Self {
            codec: &ctx.codec,
            outputs: &ctx.outputs,
            band_count: ctx.table.band_count() as u32,
            area: ctx.area,
            tile_size: ctx.grid.micro_tile_size(),
            writer,
            state: AssemblyState::AwaitingRow,
            current: None,
            last_key: None,
            stats: AssemblyStats::default(),
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Accept the next fragment; keys must be strictly ascending
    pub fn push(&mut self, key: CompositeKey, tile: BandTile) -> CompositeResult<()> {
        if self.state == AssemblyState::Done {
            return Err(CompositeError::Processing(format!("fragment {} after end of stream", key)));
        }
        if let Some(last) = self.last_key {
            match compare(key, last) {
                Ordering::Less => {
                    return Err(CompositeError::Processing(format!(
                        "fragment {} arrived after {}",
                        key, last
                    )))
                }
                Ordering::Equal => {
                    return Err(CompositeError::Processing(format!("duplicate fragment {}", key)))
                }
                Ordering::Greater => {}
            }
        }
        self.last_key = Some(key);

        let fields = self.codec.decode(key);
        if fields.band_count != self.band_count {
            return Err(CompositeError::InvalidFormat(format!(
                "fragment {} from a table of {} bands, expected {}",
                key, fields.band_count, self.band_count
            )));
        }
        let group = group_key(self.codec, key);
        if self.current.as_ref().map(|c| c.group) != Some(group) {
            self.flush()?;
            self.current = None;
        }

        let (tile_row, tile_column) = (fields.tile_row as usize, fields.tile_column as usize);
        if !self.area.contains_row(tile_row) {
            self.stats.skipped += 1;
            return Ok(());
        }
        if self.current.is_none() {
            let band = self
                .outputs
                .iter()
                .find(|b| b.index == fields.band_index as usize)
                .ok_or_else(|| {
                    CompositeError::InvalidFormat(format!(
                        "fragment {} for band {} not produced by this job",
                        key, fields.band_index
                    ))
                })?;
            self.current = Some(RowGroup {
                group,
                band: band.clone(),
                tile_row,
                columns: (0..self.area.width).map(|_| None).collect(),
                received: 0,
                written: false,
            });
        }
        if !self.area.contains_column(tile_column) {
            self.stats.skipped += 1;
            return Ok(());
        }
        if tile.dim() != (self.tile_size, self.tile_size) {
            return Err(CompositeError::InvalidFormat(format!(
                "fragment {} has shape {:?}, expected {}x{}",
                key,
                tile.dim(),
                self.tile_size,
                self.tile_size
            )));
        }

        let complete = match self.current.as_mut() {
            Some(current) => {
                current.columns[tile_column - self.area.x] = Some(tile);
                current.received += 1;
                self.stats.tiles += 1;
                current.received == current.columns.len()
            }
            None => false,
        };
        if complete {
            self.flush()?;
        }
        Ok(())
    }

    /// Write the current group, missing columns as no-data
    fn flush(&mut self) -> CompositeResult<()> {
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };
        if current.written {
            return Ok(());
        }
        self.state = AssemblyState::RowReady;

        let ts = self.tile_size;
        let no_data = current.band.kind.no_data();
        let first_line = (current.tile_row - self.area.y) * ts;
        let missing = current.columns.iter().filter(|c| c.is_none()).count();
        if missing > 0 {
            log::debug!(
                "{} tile row {}: {} of {} tiles missing",
                current.band.name,
                current.tile_row,
                missing,
                current.columns.len()
            );
        }

        let mut line = vec![no_data; current.columns.len() * ts];
        for r in 0..ts {
            for (i, column) in current.columns.iter().enumerate() {
                let target = &mut line[i * ts..(i + 1) * ts];
                match column {
                    Some(tile) => {
                        for (out, &v) in target.iter_mut().zip(tile.row(r).iter()) {
                            *out = v;
                        }
                    }
                    None => target.fill(no_data),
                }
            }
            self.writer.write_line(&current.band, first_line + r, &line)?;
        }

        // release the tiles, keep the group identity for late fragments
        current.columns.iter_mut().for_each(|c| *c = None);
        current.written = true;
        self.stats.groups += 1;
        self.stats.missing_tiles += missing;
        self.stats.lines += ts;
        self.state = AssemblyState::AwaitingRow;
        Ok(())
    }

    /// Flush the final group and stop accepting fragments
    pub fn finish(&mut self) -> CompositeResult<AssemblyStats> {
        if self.state != AssemblyState::Done {
            self.flush()?;
            self.current = None;
            self.state = AssemblyState::Done;
        }
        Ok(self.stats)
    }
}
