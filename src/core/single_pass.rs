//! Single-pass compositing rules without reference statistics.
//!
//! Observations are visited in date order. Per pixel the best status seen so
//! far wins: an observation of a higher-priority class restarts the pixel,
//! one of the same class is merged, lower classes are ignored. Merging either
//! keeps the observation with the highest land index (`MaxIndex`) or forms
//! the weighted average of all observations (`StatusRank`).

use crate::core::best_pixel::{
    class_weight, composite_bands, group_outputs, pass_source_bands, read_samples, samples_valid, total_weight,
    weight_tiles, weighted_average, CompositeTile, GroupSamples,
};
use crate::core::status::GroupIndices;
use crate::io::bands::BandTable;
use crate::io::tile_reader::{Observation, TileReader};
use crate::types::{CompositeResult, IndexKind, OutputBand, PixelState, StatusClass, TileArea};
use ndarray::Array2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinglePassRule {
    /// Keep the observation with the highest land index of the best class
    MaxIndex,
    /// Weighted average of all observations of the best class
    StatusRank,
}

/// Running state of one micro tile
struct SinglePassState {
    class: Array2<Option<StatusClass>>,
    obs_count: Array2<f64>,
    /// Per index group
    weights: Vec<Array2<f64>>,
    best_index: Vec<Array2<f32>>,
    /// Per selected band: weighted sums or the kept sample
    values: Vec<Array2<f64>>,
    taken: Vec<Array2<bool>>,
}

impl SinglePassState {
    fn new(dim: (usize, usize), groups: usize, slots: usize) -> Self {
        Self {
            class: Array2::from_elem(dim, None),
            obs_count: Array2::zeros(dim),
            weights: (0..groups).map(|_| Array2::zeros(dim)).collect(),
            best_index: (0..groups).map(|_| Array2::from_elem(dim, f32::NAN)).collect(),
            values: (0..slots).map(|_| Array2::zeros(dim)).collect(),
            taken: (0..slots).map(|_| Array2::from_elem(dim, false)).collect(),
        }
    }

    fn restart(&mut self, row: usize, col: usize, class: StatusClass) {
        let idx = [row, col];
        self.class[idx] = Some(class);
        self.obs_count[idx] = 0.0;
        self.weights.iter_mut().for_each(|w| w[idx] = 0.0);
        self.best_index.iter_mut().for_each(|b| b[idx] = f32::NAN);
        self.values.iter_mut().for_each(|v| v[idx] = 0.0);
        self.taken.iter_mut().for_each(|t| t[idx] = false);
    }

    fn keep(&mut self, samples: &GroupSamples, row: usize, col: usize) {
        for (tile, slot, _) in samples {
            self.values[*slot][[row, col]] = tile[[row, col]] as f64;
            self.taken[*slot][[row, col]] = true;
        }
    }

    fn add(&mut self, samples: &GroupSamples, row: usize, col: usize, weight: f64) {
        for (tile, slot, _) in samples {
            self.values[*slot][[row, col]] += weight * tile[[row, col]] as f64;
            self.taken[*slot][[row, col]] = true;
        }
    }
}

/// Aggregator for the rules that need no status pass
pub struct SinglePassAggregator<'a> {
    table: &'a BandTable,
    outputs: &'a [OutputBand],
    rule: SinglePassRule,
    sr_threshold: Option<f32>,
}

impl<'a> SinglePassAggregator<'a> {
    pub fn new(table: &'a BandTable, outputs: &'a [OutputBand], rule: SinglePassRule) -> Self {
        Self {
            table,
            outputs,
            rule,
            sr_threshold: None,
        }
    }

    pub fn with_threshold(mut self, sr_threshold: Option<f32>) -> Self {
        self.sr_threshold = sr_threshold;
        self
    }

    /// Aggregate the series over `area`
    pub fn aggregate<'r, I>(&self, series: I, area: &TileArea) -> CompositeResult<CompositeTile>
    where
        I: IntoIterator<Item = &'r dyn TileReader>,
    {
        let dim = (area.height, area.width);
        let group_outputs = group_outputs(self.table, self.outputs);
        let bands = pass_source_bands(self.table, &group_outputs);
        let slots: usize = group_outputs.iter().map(|g| g.bands.len()).sum();
        let mut state = SinglePassState::new(dim, group_outputs.len(), slots);

        for reader in series {
            let observation = Observation::read(reader, self.table.status_band, &bands, area)?;
            let indices = GroupIndices::resolve(self.table, &observation)?;
            let weight_tiles = weight_tiles(self.table, &observation)?;
            let samples = read_samples(&observation, &group_outputs)?;

            for ((row, col), &sample) in observation.status.indexed_iter() {
                let Some(class) = PixelState::from_sample(sample).class() else {
                    continue;
                };
                // the first group decides whether the observation counts at all
                if !samples
                    .first()
                    .map_or(true, |s| samples_valid(s, row, col, self.sr_threshold))
                {
                    continue;
                }
                match state.class[[row, col]] {
                    Some(current) if current == class => {}
                    Some(current) if current.slot() < class.slot() => continue,
                    _ => state.restart(row, col, class),
                }
                state.obs_count[[row, col]] += total_weight(&weight_tiles, row, col);
                let weight = class_weight(self.table, &weight_tiles, class, row, col);

                for (group, group_samples) in samples.iter().enumerate() {
                    if !samples_valid(group_samples, row, col, self.sr_threshold) {
                        continue;
                    }
                    if let Some(weight) = weight {
                        state.weights[group][[row, col]] += weight;
                    }
                    match self.rule {
                        SinglePassRule::MaxIndex => {
                            let index = indices[group]
                                .for_kind(IndexKind::Land)
                                .value_at(row, col, self.sr_threshold);
                            let best = state.best_index[group][[row, col]];
                            let first = group_samples.iter().all(|(_, slot, _)| !state.taken[*slot][[row, col]]);
                            let higher = matches!(index, Some(v) if best.is_nan() || v > best);
                            if first || higher {
                                state.best_index[group][[row, col]] = index.unwrap_or(f32::NAN);
                                state.keep(group_samples, row, col);
                            }
                        }
                        SinglePassRule::StatusRank => {
                            if let Some(weight) = weight {
                                state.add(group_samples, row, col, weight);
                            }
                        }
                    }
                }
            }
            log::debug!("{:?} pass: merged {}", self.rule, reader.name());
        }

        let status = state
            .class
            .mapv(|class| class.map_or(PixelState::Invalid, |c| c.state()).code() as f32);
        let state = &state;
        composite_bands(
            self.table,
            self.outputs,
            &group_outputs,
            &status,
            &state.obs_count,
            &state.weights,
            |group, slot| match self.rule {
                SinglePassRule::StatusRank => weighted_average(&state.values[slot], &state.weights[group]),
                SinglePassRule::MaxIndex => {
                    let mut kept = Array2::from_elem(dim, f32::NAN);
                    for ((idx, &taken), out) in state.taken[slot].indexed_iter().zip(kept.iter_mut()) {
                        if taken {
                            *out = state.values[slot][idx] as f32;
                        }
                    }
                    kept
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bands::{SensorFamily, SR_COUNT_BANDS, STATUS_BAND};
    use crate::io::tile_reader::MemoryProduct;

    /// 1x1 MERIS week with all reflectances 0.3 except sr_1
    fn meris_week(state: PixelState, count: f32, ndvi: f32, sr_1: f32) -> MemoryProduct {
        let table = BandTable::for_family(SensorFamily::Meris);
        let mut product = MemoryProduct::new("week", 1)
            .with_constant(STATUS_BAND, state.code() as f32)
            .unwrap();
        for (i, band) in SR_COUNT_BANDS.iter().enumerate() {
            let value = match state.class() {
                Some(class) if class.count_band_position() == i => count,
                _ => 0.0,
            };
            product = product.with_constant(band, value).unwrap();
        }
        for band in &table.groups[0].bands {
            product = product.with_constant(band, 0.3).unwrap();
        }
        product
            .with_constant("sr_1_mean", sr_1)
            .and_then(|p| p.with_constant("vegetation_index_mean", ndvi))
            .unwrap()
    }

    fn composite(weeks: &[MemoryProduct], rule: SinglePassRule) -> CompositeTile {
        let table = BandTable::for_family(SensorFamily::Meris);
        let outputs = table.selected_outputs(None).unwrap();
        let area = TileArea { x: 0, y: 0, width: 1, height: 1 };
        SinglePassAggregator::new(&table, &outputs, rule)
            .aggregate(weeks.iter().map(|w| w as &dyn TileReader), &area)
            .unwrap()
    }

    fn value(tile: &CompositeTile, band: &str) -> f32 {
        tile.band(band).unwrap()[[0, 0]]
    }

    #[test]
    fn test_max_index_keeps_greenest_land_week() {
        let weeks = [
            meris_week(PixelState::Land, 1.0, 0.40, 0.1),
            meris_week(PixelState::Land, 1.0, 0.70, 0.2),
            meris_week(PixelState::Cloud, 1.0, 0.95, 0.9),
            meris_week(PixelState::Land, 2.0, 0.55, 0.3),
        ];
        let tile = composite(&weeks, SinglePassRule::MaxIndex);
        assert_eq!(value(&tile, "status"), PixelState::Land.code() as f32);
        assert_eq!(value(&tile, "sr_1_mean"), 0.2);
        assert_eq!(value(&tile, "vegetation_index_mean"), 0.7);
        assert_eq!(value(&tile, "status_count"), 4.0);
        assert_eq!(value(&tile, "obs_count"), 4.0);
    }

    #[test]
    fn test_better_status_restarts_the_pixel() {
        let weeks = [
            meris_week(PixelState::Snow, 3.0, 0.1, 0.8),
            meris_week(PixelState::Land, 1.0, 0.5, 0.2),
            meris_week(PixelState::Water, 1.0, 0.2, 0.05),
        ];
        for rule in [SinglePassRule::MaxIndex, SinglePassRule::StatusRank] {
            let tile = composite(&weeks, rule);
            assert_eq!(value(&tile, "status"), PixelState::Land.code() as f32);
            assert_eq!(value(&tile, "sr_1_mean"), 0.2);
            assert_eq!(value(&tile, "status_count"), 1.0);
            assert_eq!(value(&tile, "obs_count"), 1.0);
        }
    }

    #[test]
    fn test_status_rank_averages_weighted_by_count() {
        let weeks = [
            meris_week(PixelState::Cloud, 1.0, 0.9, 0.9),
            meris_week(PixelState::Land, 1.0, 0.50, 0.1),
            meris_week(PixelState::Land, 3.0, 0.52, 0.3),
        ];
        let tile = composite(&weeks, SinglePassRule::StatusRank);
        assert_eq!(value(&tile, "status"), PixelState::Land.code() as f32);
        // no sigma filter, the 0.52 week is kept
        approx::assert_relative_eq!(value(&tile, "sr_1_mean"), 1.0 / 4.0, epsilon = 1e-6);
        approx::assert_relative_eq!(value(&tile, "vegetation_index_mean"), 2.06 / 4.0, epsilon = 1e-6);
        assert_eq!(value(&tile, "status_count"), 4.0);
    }

    #[test]
    fn test_invalid_samples_do_not_count() {
        let weeks = [
            meris_week(PixelState::Land, 1.0, 0.5, f32::NAN),
            meris_week(PixelState::Water, 1.0, 0.1, 0.4),
        ];
        let tile = composite(&weeks, SinglePassRule::StatusRank);
        assert_eq!(value(&tile, "status"), PixelState::Water.code() as f32);
        approx::assert_relative_eq!(value(&tile, "sr_1_mean"), 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_all_invalid_pixel_is_no_data() {
        let weeks: Vec<MemoryProduct> = (0..2).map(|_| meris_week(PixelState::Invalid, 1.0, 0.5, 0.5)).collect();
        for rule in [SinglePassRule::MaxIndex, SinglePassRule::StatusRank] {
            let tile = composite(&weeks, rule);
            assert_eq!(value(&tile, "status"), 0.0);
            assert_eq!(value(&tile, "obs_count"), 0.0);
            assert!(value(&tile, "sr_1_mean").is_nan());
        }
    }
}
