//! Status Aggregator, the first pass over a weekly time series.
//!
//! Counts status occurrences per pixel and accumulates normalized-index
//! statistics per status class. The result gives the majority status and
//! the one-sigma bounds used by the best-pixel pass.

use crate::io::bands::{ndxi, BandTable, IndexFormula};
use crate::io::tile_reader::{Observation, TileReader};
use crate::types::{
    BandTile, CompositeError, CompositeResult, IndexKind, PixelState, StatusClass, TileArea,
};
use ndarray::{Array2, Array3};

/// Whether a reflectance sample may enter an accumulation
pub(crate) fn is_valid_reflectance(value: f32, threshold: Option<f32>) -> bool {
    value.is_finite() && threshold.map_or(true, |t| value >= t)
}

/// Index formula with its bands resolved against one observation
pub(crate) enum ResolvedIndex<'o> {
    Band(&'o BandTile),
    Normalized(&'o BandTile, &'o BandTile),
}

impl<'o> ResolvedIndex<'o> {
    pub(crate) fn resolve(formula: IndexFormula, observation: &'o Observation) -> CompositeResult<Self> {
        Ok(match formula {
            IndexFormula::Band(name) => ResolvedIndex::Band(observation.band(name)?),
            IndexFormula::Normalized { a, b } => {
                ResolvedIndex::Normalized(observation.band(a)?, observation.band(b)?)
            }
        })
    }

    /// Index value, None when an input is invalid or the result not finite
    pub(crate) fn value_at(&self, row: usize, col: usize, threshold: Option<f32>) -> Option<f32> {
        let value = match self {
            ResolvedIndex::Band(band) => band[[row, col]],
            ResolvedIndex::Normalized(a, b) => {
                let (a, b) = (a[[row, col]], b[[row, col]]);
                if !is_valid_reflectance(a, threshold) || !is_valid_reflectance(b, threshold) {
                    return None;
                }
                ndxi(a, b)
            }
        };
        value.is_finite().then_some(value)
    }
}

/// Land and water index of one index group for one observation
pub(crate) struct GroupIndices<'o> {
    land: ResolvedIndex<'o>,
    water: ResolvedIndex<'o>,
}

impl<'o> GroupIndices<'o> {
    pub(crate) fn resolve(table: &BandTable, observation: &'o Observation) -> CompositeResult<Vec<Self>> {
        table
            .groups
            .iter()
            .map(|group| -> CompositeResult<Self> {
                Ok(GroupIndices {
                    land: ResolvedIndex::resolve(group.land_index, observation)?,
                    water: ResolvedIndex::resolve(group.water_index, observation)?,
                })
            })
            .collect()
    }

    pub(crate) fn for_kind(&self, kind: IndexKind) -> &ResolvedIndex<'o> {
        match kind {
            IndexKind::Land => &self.land,
            IndexKind::Water => &self.water,
        }
    }
}

/// Bands read by the status pass: status plus all index inputs
pub fn index_source_bands(table: &BandTable) -> Vec<&'static str> {
    let mut bands = Vec::new();
    for group in &table.groups {
        for band in group.land_index.source_bands().into_iter().chain(group.water_index.source_bands()) {
            if !bands.contains(&band) {
                bands.push(band);
            }
        }
    }
    bands
}

/// Per-class index sums of one index group
#[derive(Debug, Clone)]
struct IndexAccumulator {
    sum: Array3<f64>,
    sum_sq: Array3<f64>,
    count: Array3<u32>,
}

impl IndexAccumulator {
    fn new(height: usize, width: usize) -> Self {
        let shape = (StatusClass::COUNT, height, width);
        Self {
            sum: Array3::zeros(shape),
            sum_sq: Array3::zeros(shape),
            count: Array3::zeros(shape),
        }
    }
}

/// Working state of the status pass for one micro tile
#[derive(Debug, Clone)]
pub struct AccumulatorTile {
    /// Occurrences per (class, row, col)
    pub status_counts: Array3<u32>,
    groups: Vec<IndexAccumulator>,
}

impl AccumulatorTile {
    pub fn new(height: usize, width: usize, group_count: usize) -> Self {
        Self {
            status_counts: Array3::zeros((StatusClass::COUNT, height, width)),
            groups: (0..group_count).map(|_| IndexAccumulator::new(height, width)).collect(),
        }
    }

    fn add_index(&mut self, group: usize, class: StatusClass, row: usize, col: usize, value: f32) {
        let acc = &mut self.groups[group];
        let idx = [class.slot(), row, col];
        let value = value as f64;
        acc.sum[idx] += value;
        acc.sum_sq[idx] += value * value;
        acc.count[idx] += 1;
    }

    /// Highest-priority class with a non-zero count, INVALID when none
    pub fn majority_at(&self, row: usize, col: usize) -> PixelState {
        StatusClass::ALL
            .iter()
            .find(|class| self.status_counts[[class.slot(), row, col]] > 0)
            .map(|class| class.state())
            .unwrap_or(PixelState::Invalid)
    }

    /// Convert sums into the majority status tile and index statistics
    pub fn finish(self) -> (BandTile, StatisticsTile) {
        let (_, height, width) = self.status_counts.dim();
        let majority = Array2::from_shape_fn((height, width), |(r, c)| self.majority_at(r, c).code() as f32);
        let groups = self
            .groups
            .into_iter()
            .map(|acc| {
                let shape = acc.count.dim();
                let mut mean = Array3::from_elem(shape, f32::NAN);
                let mut std_dev = Array3::from_elem(shape, f32::NAN);
                for ((idx, &n), (m, s)) in acc
                    .count
                    .indexed_iter()
                    .zip(mean.iter_mut().zip(std_dev.iter_mut()))
                {
                    if n == 0 {
                        continue;
                    }
                    let n_f = n as f64;
                    let sum = acc.sum[idx];
                    *m = (sum / n_f) as f32;
                    *s = if n > 1 {
                        let variance = (acc.sum_sq[idx] - sum * sum / n_f) / (n_f - 1.0);
                        variance.max(0.0).sqrt() as f32
                    } else {
                        0.0
                    };
                }
                ClassStatistics { mean, std_dev }
            })
            .collect();
        (majority, StatisticsTile { groups })
    }
}

/// Index mean and sample standard deviation per (class, row, col)
#[derive(Debug, Clone)]
pub struct ClassStatistics {
    pub mean: Array3<f32>,
    pub std_dev: Array3<f32>,
}

/// Reference statistics of one micro tile, one entry per index group
#[derive(Debug, Clone)]
pub struct StatisticsTile {
    pub groups: Vec<ClassStatistics>,
}

impl StatisticsTile {
    /// (mean, standard deviation); NaN when the class had no valid index
    pub fn bounds(&self, group: usize, class: StatusClass, row: usize, col: usize) -> (f32, f32) {
        let stats = &self.groups[group];
        let idx = [class.slot(), row, col];
        (stats.mean[idx], stats.std_dev[idx])
    }

    /// Fail unless these statistics belong to a tile of the given shape
    pub fn check(&self, group_count: usize, dim: (usize, usize)) -> CompositeResult<()> {
        if self.groups.len() != group_count {
            return Err(CompositeError::MissingStatistics(format!(
                "statistics for {} index groups, expected {}",
                self.groups.len(),
                group_count
            )));
        }
        for stats in &self.groups {
            let (_, h, w) = stats.mean.dim();
            if (h, w) != dim || stats.std_dev.dim() != stats.mean.dim() {
                return Err(CompositeError::MissingStatistics(format!(
                    "statistics of shape {}x{}, expected {}x{}",
                    h, w, dim.0, dim.1
                )));
            }
        }
        Ok(())
    }
}

/// Pixel counts per majority status of one micro tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub land: usize,
    pub water: usize,
    pub snow: usize,
    pub shadow: usize,
    pub cloud: usize,
    pub invalid: usize,
}

impl StatusSummary {
    pub fn from_majority(majority: &BandTile) -> Self {
        let mut summary = Self::default();
        for &sample in majority.iter() {
            match PixelState::from_sample(sample) {
                PixelState::Land => summary.land += 1,
                PixelState::Water => summary.water += 1,
                PixelState::Snow => summary.snow += 1,
                PixelState::Shadow | PixelState::Haze | PixelState::Bright | PixelState::Dark => {
                    summary.shadow += 1
                }
                PixelState::Cloud | PixelState::TemporalCloud => summary.cloud += 1,
                PixelState::Invalid => summary.invalid += 1,
            }
        }
        summary
    }

    /// No pixel with a valid majority status
    pub fn is_empty(&self) -> bool {
        self.land + self.water + self.snow + self.shadow + self.cloud == 0
    }
}

impl std::fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "land {} water {} snow {} shadow {} cloud {} invalid {}",
            self.land, self.water, self.snow, self.shadow, self.cloud, self.invalid
        )
    }
}

/// Output of the status pass
#[derive(Debug, Clone)]
pub struct StatusResult {
    /// Majority status codes
    pub majority: BandTile,
    pub statistics: StatisticsTile,
    pub observations: usize,
}

/// First-pass aggregator
pub struct StatusAggregator<'a> {
    table: &'a BandTable,
    sr_threshold: Option<f32>,
}

impl<'a> StatusAggregator<'a> {
    pub fn new(table: &'a BandTable, sr_threshold: Option<f32>) -> Self {
        Self { table, sr_threshold }
    }

    /// Aggregate the series over `area` of every observation
    pub fn aggregate<'r, I>(&self, series: I, area: &TileArea) -> CompositeResult<StatusResult>
    where
        I: IntoIterator<Item = &'r dyn TileReader>,
    {
        let bands = index_source_bands(self.table);
        let mut acc = AccumulatorTile::new(area.height, area.width, self.table.groups.len());
        let mut observations = 0;

        for reader in series {
            let observation = Observation::read(reader, self.table.status_band, &bands, area)?;
            let indices = GroupIndices::resolve(self.table, &observation)?;
            self.accumulate(&mut acc, &observation, &indices);
            observations += 1;
            log::debug!("Status pass: accumulated {}", reader.name());
        }

        let (majority, statistics) = acc.finish();
        Ok(StatusResult {
            majority,
            statistics,
            observations,
        })
    }

    fn accumulate(&self, acc: &mut AccumulatorTile, observation: &Observation, indices: &[GroupIndices]) {
        for ((row, col), &sample) in observation.status.indexed_iter() {
            let Some(class) = PixelState::from_sample(sample).class() else {
                continue;
            };
            acc.status_counts[[class.slot(), row, col]] += 1;

            let Some(kind) = class.index_kind() else {
                continue;
            };
            for (group, group_indices) in indices.iter().enumerate() {
                if let Some(value) = group_indices.for_kind(kind).value_at(row, col, self.sr_threshold) {
                    acc.add_index(group, class, row, col, value);
                }
            }
        }
    }
}
