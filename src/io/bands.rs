//! Sensor families and their fixed band tables.
//!
//! The position of a band in the output table is the band index carried in
//! the composite key, so these tables are part of the exchange format between
//! aggregation and assembly.

use crate::types::{BandKind, CompositeError, CompositeResult, OutputBand};
use serde::{Deserialize, Serialize};

pub const STATUS_BAND: &str = "current_pixel_state";

/// Occurrence count bands of SR products, in `StatusClass::count_band_position` order
pub const SR_COUNT_BANDS: [&str; 5] = [
    "clear_land_count",
    "clear_water_count",
    "clear_snow_ice_count",
    "cloud_count",
    "cloud_shadow_count",
];

const MERIS_CONTINUOUS: &[&str] = &[
    "sr_1_mean", "sr_2_mean", "sr_3_mean", "sr_4_mean", "sr_5_mean", "sr_6_mean", "sr_7_mean",
    "sr_8_mean", "sr_9_mean", "sr_10_mean", "sr_12_mean", "sr_13_mean", "sr_14_mean",
    "vegetation_index_mean",
];

const PROBA_CONTINUOUS: &[&str] = &[
    "sr_1_mean", "sr_2_mean", "sr_3_mean", "sr_4_mean", "vegetation_index_mean",
];

const MSI_CONTINUOUS: &[&str] = &[
    "sr_1_mean", "sr_2_mean", "sr_3_mean", "sr_4_mean", "sr_5_mean", "sr_6_mean", "sr_7_mean",
    "sr_8_mean", "sr_9_mean", "sr_10_mean", "sr_11_mean", "vegetation_index_mean",
];

const AGRI_CONTINUOUS: &[&str] = &[
    "sr_1_mean", "sr_2_mean", "sr_3_mean", "sr_4_mean", "sr_5_mean", "sr_6_mean", "sr_7_mean",
    "sr_8_mean", "sr_9_mean", "sr_10_mean", "vegetation_index_mean",
];

const SYN_OLCI: &[&str] = &[
    "sdr_Oa01", "sdr_Oa02", "sdr_Oa03", "sdr_Oa04", "sdr_Oa05", "sdr_Oa06", "sdr_Oa07",
    "sdr_Oa08", "sdr_Oa09", "sdr_Oa10", "sdr_Oa12", "sdr_Oa16", "sdr_Oa17", "sdr_Oa18",
    "sdr_Oa21", "ndvi_max",
];

const SYN_SLSTR_123: &[&str] = &["sdr_Sl01", "sdr_Sl02", "sdr_Sl03"];
const SYN_SLSTR_56: &[&str] = &["sdr_Sl05", "sdr_Sl06"];

/// Sensor family, derived from the sensor-and-resolution part of file names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorFamily {
    Meris,
    Olci,
    ProbaV,
    Vegetation,
    Msi,
    Agri,
    Syn,
}

impl SensorFamily {
    pub fn from_sensor(sensor_and_resolution: &str) -> CompositeResult<Self> {
        match sensor_and_resolution {
            "MERIS-300m" | "MERIS-1000m" => Ok(SensorFamily::Meris),
            "OLCI-L3" => Ok(SensorFamily::Olci),
            "PROBAV-300m" | "PROBAV-333m" | "PROBAV-1000m" => Ok(SensorFamily::ProbaV),
            "VEGETATION-300m" | "VEGETATION-1000m" => Ok(SensorFamily::Vegetation),
            "MSI-20m" => Ok(SensorFamily::Msi),
            "MSI-10m" => Ok(SensorFamily::Agri),
            "SYN-L3" => Ok(SensorFamily::Syn),
            other => Err(CompositeError::Config(format!(
                "unknown sensor and resolution {}",
                other
            ))),
        }
    }

    /// Name used in output product names
    pub fn product_name(self) -> &'static str {
        match self {
            SensorFamily::Meris => "MERIS",
            SensorFamily::Olci => "OLCI",
            SensorFamily::ProbaV => "PROBAV",
            SensorFamily::Vegetation => "VEGETATION",
            SensorFamily::Msi => "MSI",
            SensorFamily::Agri => "AGRI",
            SensorFamily::Syn => "SYN",
        }
    }

    pub fn tile_rows(self) -> usize {
        match self {
            SensorFamily::Msi | SensorFamily::Agri => 180,
            SensorFamily::Olci | SensorFamily::Syn => 18,
            _ => 36,
        }
    }

    /// Micro tiles per tile side
    pub fn micro_tiles(self) -> usize {
        match self {
            SensorFamily::Msi | SensorFamily::Agri => 5,
            SensorFamily::Olci | SensorFamily::Syn => 2,
            _ => 1,
        }
    }

    /// Length of one input period in days
    pub fn days_per_period(self) -> u32 {
        match self {
            SensorFamily::Msi | SensorFamily::Agri => 10,
            SensorFamily::Olci | SensorFamily::Syn => 1,
            _ => 7,
        }
    }

    /// Pixel reference offset of the output geocoding
    pub fn pixel_reference(self) -> f64 {
        match self {
            SensorFamily::ProbaV => 0.5,
            _ => 0.0,
        }
    }
}

/// How a normalized difference index is obtained from an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormula {
    /// Precomputed index band
    Band(&'static str),
    /// (a - b) / (a + b)
    Normalized { a: &'static str, b: &'static str },
}

impl IndexFormula {
    pub fn source_bands(&self) -> Vec<&'static str> {
        match *self {
            IndexFormula::Band(name) => vec![name],
            IndexFormula::Normalized { a, b } => vec![a, b],
        }
    }
}

/// Normalized difference (a - b) / (a + b)
pub fn ndxi(a: f32, b: f32) -> f32 {
    (a - b) / (a + b)
}

/// Where the weight of an observation comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    /// Per-class occurrence count bands, observation count is their sum
    StatusCounts([&'static str; 5]),
    /// Each valid observation weighs one, observation count from a band
    Unit { obs_band: &'static str },
}

/// A set of continuous bands filtered and weighted together
#[derive(Debug, Clone)]
pub struct IndexGroup {
    pub name: &'static str,
    /// Count output band receiving the accumulated weight
    pub weight_band: &'static str,
    /// Member continuous bands; source and output names are identical
    pub bands: Vec<&'static str>,
    pub land_index: IndexFormula,
    pub water_index: IndexFormula,
}

impl IndexGroup {
    /// Precomputed index bands only need to be finite, reflectances also
    /// have to pass the threshold
    pub fn is_index_band(&self, name: &str) -> bool {
        matches!(self.land_index, IndexFormula::Band(b) if b == name)
            || matches!(self.water_index, IndexFormula::Band(b) if b == name)
    }
}

/// Complete band table of a sensor family
#[derive(Debug, Clone)]
pub struct BandTable {
    pub family: SensorFamily,
    pub status_band: &'static str,
    pub weights: WeightSource,
    pub groups: Vec<IndexGroup>,
    /// Full output table: status, counts, continuous bands
    pub outputs: Vec<OutputBand>,
}

impl BandTable {
    pub fn for_family(family: SensorFamily) -> Self {
        match family {
            SensorFamily::Meris => Self::sr_table(family, MERIS_CONTINUOUS, "sr_3_mean", "sr_4_mean"),
            // Oa18 / Oa06 after conversion to the SR layout
            SensorFamily::Olci => Self::sr_table(family, MERIS_CONTINUOUS, "sr_14_mean", "sr_5_mean"),
            SensorFamily::ProbaV | SensorFamily::Vegetation => {
                Self::sr_table(family, PROBA_CONTINUOUS, "sr_3_mean", "sr_4_mean")
            }
            SensorFamily::Msi => Self::sr_table(family, MSI_CONTINUOUS, "sr_9_mean", "sr_2_mean"),
            SensorFamily::Agri => Self::sr_table(family, AGRI_CONTINUOUS, "sr_9_mean", "sr_2_mean"),
            SensorFamily::Syn => Self::syn_table(),
        }
    }

    fn sr_table(
        family: SensorFamily,
        continuous: &[&'static str],
        swir: &'static str,
        green: &'static str,
    ) -> Self {
        let groups = vec![IndexGroup {
            name: "sr",
            weight_band: "status_count",
            bands: continuous.to_vec(),
            land_index: IndexFormula::Band("vegetation_index_mean"),
            water_index: IndexFormula::Normalized { a: swir, b: green },
        }];
        Self::assemble(family, WeightSource::StatusCounts(SR_COUNT_BANDS), groups, &[])
    }

    fn syn_table() -> Self {
        let groups = vec![
            IndexGroup {
                name: "olci",
                weight_band: "status_count",
                bands: SYN_OLCI.to_vec(),
                land_index: IndexFormula::Band("ndvi_max"),
                water_index: IndexFormula::Normalized { a: "sdr_Oa17", b: "sdr_Oa08" },
            },
            IndexGroup {
                name: "slstr123",
                weight_band: "sl123_count",
                bands: SYN_SLSTR_123.to_vec(),
                land_index: IndexFormula::Normalized { a: "sdr_Sl03", b: "sdr_Sl02" },
                water_index: IndexFormula::Normalized { a: "sdr_Sl03", b: "sdr_Sl02" },
            },
            IndexGroup {
                name: "slstr56",
                weight_band: "sl56_count",
                bands: SYN_SLSTR_56.to_vec(),
                land_index: IndexFormula::Normalized { a: "sdr_Sl06", b: "sdr_Sl05" },
                water_index: IndexFormula::Normalized { a: "sdr_Sl06", b: "sdr_Sl05" },
            },
        ];
        Self::assemble(
            SensorFamily::Syn,
            WeightSource::Unit { obs_band: "num_obs" },
            groups,
            &["sl123_count", "sl56_count"],
        )
    }

    fn assemble(
        family: SensorFamily,
        weights: WeightSource,
        groups: Vec<IndexGroup>,
        extra_counts: &[&str],
    ) -> Self {
        let mut names: Vec<(String, BandKind)> = vec![
            ("status".to_string(), BandKind::Status),
            ("status_count".to_string(), BandKind::Count),
            ("obs_count".to_string(), BandKind::Count),
        ];
        names.extend(extra_counts.iter().map(|n| (n.to_string(), BandKind::Count)));
        for group in &groups {
            names.extend(group.bands.iter().map(|n| (n.to_string(), BandKind::Continuous)));
        }
        let outputs = names
            .into_iter()
            .enumerate()
            .map(|(index, (name, kind))| OutputBand { index, name, kind })
            .collect();
        Self {
            family,
            status_band: STATUS_BAND,
            weights,
            groups,
            outputs,
        }
    }

    /// Number of bands in the full output table
    pub fn band_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn output(&self, name: &str) -> Option<&OutputBand> {
        self.outputs.iter().find(|b| b.name == name)
    }

    /// Output bands produced for an optional comma-separated subset of
    /// continuous bands. Status and count bands are always included.
    pub fn selected_outputs(&self, subset: Option<&str>) -> CompositeResult<Vec<OutputBand>> {
        let wanted: Option<Vec<&str>> = subset.map(|s| {
            s.split(',').map(str::trim).filter(|n| !n.is_empty()).collect()
        });
        if let Some(wanted) = &wanted {
            for name in wanted {
                match self.output(name) {
                    Some(band) if band.kind == BandKind::Continuous => {}
                    _ => {
                        return Err(CompositeError::Config(format!(
                            "band {} is not a continuous band of {:?}",
                            name, self.family
                        )))
                    }
                }
            }
        }
        Ok(self
            .outputs
            .iter()
            .filter(|band| match (&wanted, band.kind) {
                (Some(wanted), BandKind::Continuous) => wanted.contains(&band.name.as_str()),
                _ => true,
            })
            .cloned()
            .collect())
    }

    /// Source bands required to run both passes over one observation
    pub fn source_bands(&self) -> Vec<&'static str> {
        let mut bands = vec![self.status_band];
        match &self.weights {
            WeightSource::StatusCounts(counts) => bands.extend(counts.iter().copied()),
            WeightSource::Unit { obs_band } => bands.push(obs_band),
        }
        for group in &self.groups {
            bands.extend(group.bands.iter().copied());
            bands.extend(group.land_index.source_bands());
            bands.extend(group.water_index.source_bands());
        }
        let mut unique = Vec::with_capacity(bands.len());
        for band in bands {
            if !unique.contains(&band) {
                unique.push(band);
            }
        }
        unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meris_table_matches_product_layout() {
        let table = BandTable::for_family(SensorFamily::Meris);
        assert_eq!(table.band_count(), 17);
        assert_eq!(table.outputs[0].name, "status");
        assert_eq!(table.outputs[0].kind, BandKind::Status);
        assert_eq!(table.outputs[2].name, "obs_count");
        assert_eq!(table.outputs[3].name, "sr_1_mean");
        assert_eq!(table.outputs[16].name, "vegetation_index_mean");
        assert!(table.groups[0].is_index_band("vegetation_index_mean"));
    }

    #[test]
    fn test_syn_table_has_three_groups() {
        let table = BandTable::for_family(SensorFamily::Syn);
        assert_eq!(table.groups.len(), 3);
        assert_eq!(table.output("sl123_count").map(|b| b.index), Some(3));
        assert_eq!(table.output("sdr_Oa01").map(|b| b.index), Some(5));
        assert!(table.band_count() <= 31);
        assert!(table.source_bands().contains(&"num_obs"));
    }

    #[test]
    fn test_subset_keeps_table_positions() {
        let table = BandTable::for_family(SensorFamily::ProbaV);
        let selected = table.selected_outputs(Some("sr_2_mean, vegetation_index_mean")).unwrap();
        let names: Vec<&str> = selected.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["status", "status_count", "obs_count", "sr_2_mean", "vegetation_index_mean"]);
        assert_eq!(selected[3].index, 4);

        assert!(table.selected_outputs(Some("status_count")).is_err());
        assert!(table.selected_outputs(Some("sr_9_mean")).is_err());
    }

    #[test]
    fn test_unknown_sensor_rejected() {
        assert!(SensorFamily::from_sensor("AVHRR-1000m").is_err());
        assert_eq!(SensorFamily::from_sensor("MSI-10m").unwrap(), SensorFamily::Agri);
    }

    #[test]
    fn test_ndxi() {
        approx::assert_relative_eq!(ndxi(0.8, 0.2), 0.6, epsilon = 1e-6);
        assert!(ndxi(0.0, 0.0).is_nan());
    }
}
