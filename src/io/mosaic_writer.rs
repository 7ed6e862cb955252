//! Mosaic writer collaborator.
//!
//! Writers are created with every raster pre-filled with its band's no-data
//! value and accept lines at explicit output rows, so several assembly
//! workers can own disjoint tile rows of the same raster.

use crate::types::{BandKind, CompositeError, CompositeResult, GeoTransform, OutputBand, PixelType};
use ndarray::Array2;
use num_traits::NumCast;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Extent and georeferencing of the output rasters
#[derive(Debug, Clone)]
pub struct MosaicGeometry {
    pub width: usize,
    pub height: usize,
    pub geo_transform: GeoTransform,
}

/// Accepts raster lines of the assembled mosaic
pub trait MosaicWriter: Send + Sync {
    /// Write line `y` of `band`
    fn write_line(&self, band: &OutputBand, y: usize, line: &[f32]) -> CompositeResult<()>;

    /// Flush and close all rasters
    fn finish(&self) -> CompositeResult<()>;
}

fn check_line(geometry: &MosaicGeometry, band: &OutputBand, y: usize, line: &[f32]) -> CompositeResult<()> {
    if y >= geometry.height || line.len() != geometry.width {
        return Err(CompositeError::Processing(format!(
            "line {} of {} with {} samples outside of {}x{} raster",
            y,
            band.name,
            line.len(),
            geometry.width,
            geometry.height
        )));
    }
    Ok(())
}

fn poisoned<T>(_: T) -> CompositeError {
    CompositeError::Processing("writer lock poisoned".to_string())
}

/// Convert samples to the band's storage type, little endian
pub fn encode_samples(kind: BandKind, line: &[f32], out: &mut Vec<u8>) {
    out.clear();
    match kind.pixel_type() {
        PixelType::U8 => out.extend(line.iter().map(|&v| <u8 as NumCast>::from(v).unwrap_or(0))),
        PixelType::I16 => {
            for &v in line {
                let clamped = v.round().clamp(i16::MIN as f32, i16::MAX as f32);
                let value = <i16 as NumCast>::from(clamped).unwrap_or(0);
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        PixelType::F32 => {
            for &v in line {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
}

fn envi_data_type(pixel_type: PixelType) -> u8 {
    match pixel_type {
        PixelType::U8 => 1,
        PixelType::I16 => 2,
        PixelType::F32 => 4,
    }
}

struct RawBandFile {
    name: String,
    file: Mutex<File>,
}

/// ENVI raw raster per band (`<name>.img` + `<name>.hdr`)
pub struct RawMosaicStore {
    dir: PathBuf,
    geometry: MosaicGeometry,
    files: HashMap<usize, RawBandFile>,
}

impl RawMosaicStore {
    /// Create one pre-filled raster per (band, product name)
    pub fn create<P: AsRef<Path>>(
        dir: P,
        geometry: MosaicGeometry,
        bands: &[(OutputBand, String)],
    ) -> CompositeResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let mut files = HashMap::with_capacity(bands.len());
        for (band, name) in bands {
            Self::write_header(&dir, &geometry, band, name)?;
            let path = dir.join(format!("{}.img", name));
            log::info!("Creating {}x{} raster {}", geometry.width, geometry.height, path.display());

            let mut writer = BufWriter::new(File::create(&path)?);
            let mut no_data = Vec::new();
            encode_samples(band.kind, &vec![band.kind.no_data(); geometry.width], &mut no_data);
            for _ in 0..geometry.height {
                writer.write_all(&no_data)?;
            }
            let file = writer.into_inner().map_err(|e| CompositeError::Io(e.into_error()))?;
            files.insert(
                band.index,
                RawBandFile {
                    name: name.clone(),
                    file: Mutex::new(file),
                },
            );
        }
        Ok(Self { dir, geometry, files })
    }

    fn write_header(dir: &Path, geometry: &MosaicGeometry, band: &OutputBand, name: &str) -> CompositeResult<()> {
        let gt = &geometry.geo_transform;
        let ignore = match band.kind {
            BandKind::Continuous => "NaN".to_string(),
            kind => format!("{}", kind.no_data()),
        };
        let header = format!(
            "ENVI\n\
             description = {{{}}}\n\
             samples = {}\n\
             lines = {}\n\
             bands = 1\n\
             header offset = 0\n\
             file type = ENVI Standard\n\
             data type = {}\n\
             interleave = bsq\n\
             byte order = 0\n\
             map info = {{Geographic Lat/Lon, 1.0, 1.0, {}, {}, {}, {}, WGS-84}}\n\
             band names = {{{}}}\n\
             data ignore value = {}\n",
            name,
            geometry.width,
            geometry.height,
            envi_data_type(band.kind.pixel_type()),
            gt.top_left_x,
            gt.top_left_y,
            gt.pixel_width,
            -gt.pixel_height,
            band.name,
            ignore
        );
        std::fs::write(dir.join(format!("{}.hdr", name)), header)?;
        Ok(())
    }
}

impl MosaicWriter for RawMosaicStore {
    fn write_line(&self, band: &OutputBand, y: usize, line: &[f32]) -> CompositeResult<()> {
        check_line(&self.geometry, band, y, line)?;
        let target = self.files.get(&band.index).ok_or_else(|| {
            CompositeError::Processing(format!("no raster created for band {}", band.name))
        })?;
        let mut bytes = Vec::with_capacity(line.len() * band.kind.pixel_type().size_in_bytes());
        encode_samples(band.kind, line, &mut bytes);
        let offset = (y * bytes.len()) as u64;
        let mut file = target.file.lock().map_err(poisoned)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    fn finish(&self) -> CompositeResult<()> {
        for target in self.files.values() {
            let file = target.file.lock().map_err(poisoned)?;
            file.sync_all()?;
            log::info!("Finished {}", self.dir.join(format!("{}.img", target.name)).display());
        }
        Ok(())
    }
}

/// Keeps assembled rasters in memory
pub struct MemoryMosaicWriter {
    geometry: MosaicGeometry,
    rasters: Mutex<HashMap<String, Array2<f32>>>,
    lines: Mutex<Vec<(String, usize)>>,
}

impl MemoryMosaicWriter {
    pub fn new(geometry: MosaicGeometry, bands: &[OutputBand]) -> Self {
        let rasters = bands
            .iter()
            .map(|band| {
                (
                    band.name.clone(),
                    Array2::from_elem((geometry.height, geometry.width), band.kind.no_data()),
                )
            })
            .collect();
        Self {
            geometry,
            rasters: Mutex::new(rasters),
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Copy of the raster of one band
    pub fn raster(&self, band: &str) -> Option<Array2<f32>> {
        self.rasters.lock().ok()?.get(band).cloned()
    }

    /// (band, line) in write order
    pub fn written_lines(&self) -> Vec<(String, usize)> {
        self.lines.lock().map(|lines| lines.clone()).unwrap_or_default()
    }
}

impl MosaicWriter for MemoryMosaicWriter {
    fn write_line(&self, band: &OutputBand, y: usize, line: &[f32]) -> CompositeResult<()> {
        check_line(&self.geometry, band, y, line)?;
        let mut rasters = self.rasters.lock().map_err(poisoned)?;
        let raster = rasters
            .get_mut(&band.name)
            .ok_or_else(|| CompositeError::Processing(format!("no raster for band {}", band.name)))?;
        for (out, &v) in raster.row_mut(y).iter_mut().zip(line) {
            *out = v;
        }
        self.lines.lock().map_err(poisoned)?.push((band.name.clone(), y));
        Ok(())
    }

    fn finish(&self) -> CompositeResult<()> {
        Ok(())
    }
}
