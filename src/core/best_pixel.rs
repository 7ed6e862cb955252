//! Best-Pixel Aggregator, the second pass over a weekly time series.
//!
//! Observations whose status matches the majority status and whose index
//! lies within one standard deviation of the class mean are averaged,
//! weighted by their occurrence count. Rejection is all-or-nothing per
//! index group.

use crate::core::status::{is_valid_reflectance, GroupIndices, StatusResult};
use crate::io::bands::{BandTable, WeightSource};
use crate::io::tile_reader::{Observation, TileReader};
use crate::types::{
    BandKind, BandTile, CompositeError, CompositeResult, OutputBand, PixelState, StatusClass, TileArea,
};
use ndarray::Array2;

/// Parameters of the best-pixel pass
#[derive(Debug, Clone)]
pub struct BestPixelParams {
    /// Reflectances below are invalid, disabled when unset
    pub sr_threshold: Option<f32>,
    /// Tolerance added to the one-sigma bounds
    pub epsilon: f64,
}

impl Default for BestPixelParams {
    fn default() -> Self {
        Self {
            sr_threshold: None,
            epsilon: 1e-6,
        }
    }
}

/// Whether `value` lies within one standard deviation of `mean`.
/// A NaN mean or standard deviation means there is no bound.
pub fn within_one_sigma(value: f32, mean: f32, std_dev: f32, epsilon: f64) -> bool {
    if mean.is_nan() || std_dev.is_nan() {
        return true;
    }
    let (value, mean, std_dev) = (value as f64, mean as f64, std_dev as f64);
    value >= mean - std_dev - epsilon && value <= mean + std_dev + epsilon
}

/// Composite band tiles of one micro tile, in output table order
#[derive(Debug, Clone)]
pub struct CompositeTile {
    pub bands: Vec<(OutputBand, BandTile)>,
}

impl CompositeTile {
    pub fn band(&self, name: &str) -> Option<&BandTile> {
        self.bands.iter().find(|(band, _)| band.name == name).map(|(_, tile)| tile)
    }
}

/// Selected continuous bands of one index group
pub(crate) struct GroupOutputs {
    /// (band name, slot in the value accumulators, precomputed index band)
    pub(crate) bands: Vec<(&'static str, usize, bool)>,
}

/// Selected continuous bands per index group, with consecutive slots
pub(crate) fn group_outputs(table: &BandTable, outputs: &[OutputBand]) -> Vec<GroupOutputs> {
    let mut slot = 0;
    table
        .groups
        .iter()
        .map(|group| {
            let bands = group
                .bands
                .iter()
                .filter(|name| outputs.iter().any(|b| b.name == **name))
                .map(|&name| {
                    let entry = (name, slot, group.is_index_band(name));
                    slot += 1;
                    entry
                })
                .collect();
            GroupOutputs { bands }
        })
        .collect()
}

/// Bands read per observation: weights, index inputs and selected bands
pub(crate) fn pass_source_bands(table: &BandTable, group_outputs: &[GroupOutputs]) -> Vec<&'static str> {
    let mut bands: Vec<&'static str> = match &table.weights {
        WeightSource::StatusCounts(counts) => counts.to_vec(),
        WeightSource::Unit { obs_band } => vec![*obs_band],
    };
    bands.extend(crate::core::status::index_source_bands(table));
    for outputs in group_outputs {
        bands.extend(outputs.bands.iter().map(|(name, _, _)| *name));
    }
    bands
}

/// Sample tiles of one observation: (tile, slot, precomputed index band)
pub(crate) type GroupSamples<'o> = Vec<(&'o BandTile, usize, bool)>;

pub(crate) fn read_samples<'o>(
    observation: &'o Observation,
    group_outputs: &[GroupOutputs],
) -> CompositeResult<Vec<GroupSamples<'o>>> {
    group_outputs
        .iter()
        .map(|g| {
            g.bands
                .iter()
                .map(|&(name, slot, is_index)| Ok::<_, CompositeError>((observation.band(name)?, slot, is_index)))
                .collect::<CompositeResult<GroupSamples<'o>>>()
        })
        .collect()
}

/// Tiles the weights are taken from
pub(crate) fn weight_tiles<'o>(table: &BandTable, observation: &'o Observation) -> CompositeResult<Vec<&'o BandTile>> {
    match &table.weights {
        WeightSource::StatusCounts(counts) => counts.iter().map(|name| observation.band(name)).collect(),
        WeightSource::Unit { obs_band } => Ok(vec![observation.band(obs_band)?]),
    }
}

/// Sum of all finite positive weight samples of a pixel
pub(crate) fn total_weight(weight_tiles: &[&BandTile], row: usize, col: usize) -> f64 {
    weight_tiles
        .iter()
        .map(|tile| tile[[row, col]])
        .filter(|w| w.is_finite() && *w > 0.0)
        .map(|w| w as f64)
        .sum()
}

/// Weight of an observation of `class`, None when not finite and positive
pub(crate) fn class_weight(
    table: &BandTable,
    weight_tiles: &[&BandTile],
    class: StatusClass,
    row: usize,
    col: usize,
) -> Option<f64> {
    let weight = match &table.weights {
        WeightSource::StatusCounts(_) => weight_tiles[class.count_band_position()][[row, col]],
        WeightSource::Unit { .. } => 1.0,
    };
    (weight.is_finite() && weight > 0.0).then_some(weight as f64)
}

/// Whether every sample of a group may enter an accumulation
pub(crate) fn samples_valid(samples: &GroupSamples, row: usize, col: usize, threshold: Option<f32>) -> bool {
    samples.iter().all(|(tile, _, is_index)| {
        let v = tile[[row, col]];
        if *is_index {
            v.is_finite()
        } else {
            is_valid_reflectance(v, threshold)
        }
    })
}

/// Output band tiles in table order. `continuous(group, slot)` yields the
/// tile of one selected continuous band.
pub(crate) fn composite_bands<F>(
    table: &BandTable,
    outputs: &[OutputBand],
    group_outputs: &[GroupOutputs],
    status: &BandTile,
    obs_count: &Array2<f64>,
    weights: &[Array2<f64>],
    continuous: F,
) -> CompositeResult<CompositeTile>
where
    F: Fn(usize, usize) -> BandTile,
{
    let mut bands = Vec::with_capacity(outputs.len());
    for band in outputs {
        let tile = match band.kind {
            BandKind::Status => status.clone(),
            BandKind::Count if band.name == "obs_count" => obs_count.mapv(|v| v as f32),
            BandKind::Count => {
                let group = table
                    .groups
                    .iter()
                    .position(|g| g.weight_band == band.name)
                    .ok_or_else(|| CompositeError::InvalidFormat(format!("no index group weighs into {}", band.name)))?;
                weights[group].mapv(|v| v as f32)
            }
            BandKind::Continuous => {
                let (group, slot) = group_outputs
                    .iter()
                    .enumerate()
                    .find_map(|(g, outputs)| {
                        outputs
                            .bands
                            .iter()
                            .find(|(name, _, _)| *name == band.name)
                            .map(|(_, slot, _)| (g, *slot))
                    })
                    .ok_or_else(|| {
                        CompositeError::InvalidFormat(format!("band {} belongs to no index group", band.name))
                    })?;
                continuous(group, slot)
            }
        };
        bands.push((band.clone(), tile));
    }
    Ok(CompositeTile { bands })
}

/// Weighted averages, NaN where the group weight is zero
pub(crate) fn weighted_average(sum: &Array2<f64>, weight: &Array2<f64>) -> BandTile {
    let mut average = Array2::from_elem(sum.dim(), f32::NAN);
    for ((idx, &s), out) in sum.indexed_iter().zip(average.iter_mut()) {
        if weight[idx] > 0.0 {
            *out = (s / weight[idx]) as f32;
        }
    }
    average
}

/// Second-pass aggregator
pub struct BestPixelAggregator<'a> {
    table: &'a BandTable,
    outputs: &'a [OutputBand],
    params: BestPixelParams,
}

impl<'a> BestPixelAggregator<'a> {
    pub fn new(table: &'a BandTable, outputs: &'a [OutputBand]) -> Self {
        Self {
            table,
            outputs,
            params: BestPixelParams::default(),
        }
    }

    pub fn with_params(table: &'a BandTable, outputs: &'a [OutputBand], params: BestPixelParams) -> Self {
        Self { table, outputs, params }
    }

    /// Aggregate the series over `area` against the status pass result
    pub fn aggregate<'r, I>(&self, series: I, area: &TileArea, status: &StatusResult) -> CompositeResult<CompositeTile>
    where
        I: IntoIterator<Item = &'r dyn TileReader>,
    {
        let dim = (area.height, area.width);
        if status.majority.dim() != dim {
            return Err(CompositeError::MissingStatistics(format!(
                "majority status of shape {:?}, expected {:?}",
                status.majority.dim(),
                dim
            )));
        }
        status.statistics.check(self.table.groups.len(), dim)?;

        let group_outputs = group_outputs(self.table, self.outputs);
        let bands = pass_source_bands(self.table, &group_outputs);
        let band_slots: usize = group_outputs.iter().map(|g| g.bands.len()).sum();

        // f64 accumulation for better precision
        let mut sums: Vec<Array2<f64>> = (0..band_slots).map(|_| Array2::zeros(dim)).collect();
        let mut weights: Vec<Array2<f64>> = (0..group_outputs.len()).map(|_| Array2::zeros(dim)).collect();
        let mut obs_count: Array2<f64> = Array2::zeros(dim);

        for reader in series {
            let observation = Observation::read(reader, self.table.status_band, &bands, area)?;
            let indices = GroupIndices::resolve(self.table, &observation)?;
            let weight_tiles = weight_tiles(self.table, &observation)?;
            let samples = read_samples(&observation, &group_outputs)?;

            let mut accepted = 0usize;
            for ((row, col), &sample) in observation.status.indexed_iter() {
                let Some(class) = PixelState::from_sample(sample).class() else {
                    continue;
                };
                obs_count[[row, col]] += total_weight(&weight_tiles, row, col);

                if PixelState::from_sample(status.majority[[row, col]]).class() != Some(class) {
                    continue;
                }
                let Some(weight) = class_weight(self.table, &weight_tiles, class, row, col) else {
                    continue;
                };

                for (group, group_samples) in samples.iter().enumerate() {
                    if let Some(kind) = class.index_kind() {
                        let Some(value) = indices[group].for_kind(kind).value_at(row, col, self.params.sr_threshold)
                        else {
                            continue;
                        };
                        let (mean, std_dev) = status.statistics.bounds(group, class, row, col);
                        if !within_one_sigma(value, mean, std_dev, self.params.epsilon) {
                            continue;
                        }
                    }
                    if !samples_valid(group_samples, row, col, self.params.sr_threshold) {
                        continue;
                    }
                    weights[group][[row, col]] += weight;
                    for (tile, slot, _) in group_samples {
                        sums[*slot][[row, col]] += weight * tile[[row, col]] as f64;
                    }
                    accepted += 1;
                }
            }
            log::debug!("Best-pixel pass: {} accepted group samples from {}", accepted, reader.name());
        }

        composite_bands(
            self.table,
            self.outputs,
            &group_outputs,
            &status.majority,
            &obs_count,
            &weights,
            |group, slot| weighted_average(&sums[slot], &weights[group]),
        )
    }
}
