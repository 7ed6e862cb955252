//! GDAL-backed source reader and GeoTIFF mosaic writer

use crate::io::mosaic_writer::{MosaicGeometry, MosaicWriter};
use crate::io::tile_reader::TileReader;
use crate::types::{BandKind, BandTile, CompositeError, CompositeResult, OutputBand, TileArea};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use num_traits::NumCast;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// NetCDF source tile read through GDAL subdatasets
pub struct NetcdfTileReader {
    path: PathBuf,
    name: String,
    tile_size: usize,
}

impl NetcdfTileReader {
    /// Open `path`, taking the tile size from `size_band`
    pub fn open<P: AsRef<Path>>(path: P, size_band: &str) -> CompositeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let dataset = Dataset::open(Self::subdataset(&path, size_band))?;
        let (width, height) = dataset.raster_size();
        if width != height {
            return Err(CompositeError::InvalidFormat(format!(
                "{} is not a square tile: {}x{}",
                name, width, height
            )));
        }
        log::debug!("Opened {} with tile size {}", name, width);
        Ok(Self {
            path,
            name,
            tile_size: width,
        })
    }

    fn subdataset(path: &Path, band: &str) -> String {
        format!("NETCDF:\"{}\":{}", path.display(), band)
    }
}

impl TileReader for NetcdfTileReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn tile_size(&self) -> usize {
        self.tile_size
    }

    fn read_band(&self, band: &str, area: &TileArea) -> CompositeResult<BandTile> {
        let dataset = Dataset::open(Self::subdataset(&self.path, band))?;
        let rasterband = dataset.rasterband(1)?;
        let data = rasterband.read_as::<f32>(
            (area.x as isize, area.y as isize),
            (area.width, area.height),
            (area.width, area.height),
            None,
        )?;
        Array2::from_shape_vec((area.height, area.width), data.data)
            .map_err(|e| CompositeError::Processing(format!("Failed to reshape {} of {}: {}", band, self.name, e)))
    }
}

/// One GeoTIFF per output band
pub struct GeoTiffMosaicWriter {
    geometry: MosaicGeometry,
    datasets: HashMap<usize, Mutex<Option<Dataset>>>,
}

impl GeoTiffMosaicWriter {
    pub fn create<P: AsRef<Path>>(
        dir: P,
        geometry: MosaicGeometry,
        bands: &[(OutputBand, String)],
    ) -> CompositeResult<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut datasets = HashMap::with_capacity(bands.len());
        for (band, name) in bands {
            let path = dir.as_ref().join(format!("{}.tif", name));
            log::info!("Creating GeoTIFF {}", path.display());
            let (w, h) = (geometry.width as isize, geometry.height as isize);
            let mut dataset = match band.kind {
                BandKind::Status => driver.create_with_band_type::<u8, _>(&path, w, h, 1)?,
                BandKind::Count => driver.create_with_band_type::<i16, _>(&path, w, h, 1)?,
                BandKind::Continuous => driver.create_with_band_type::<f32, _>(&path, w, h, 1)?,
            };
            dataset.set_geo_transform(&geometry.geo_transform.to_array())?;
            dataset.set_spatial_ref(&SpatialRef::from_epsg(4326)?)?;
            {
                let mut rasterband = dataset.rasterband(1)?;
                let no_data = band.kind.no_data() as f64;
                rasterband.set_no_data_value(Some(no_data))?;
                rasterband.fill(no_data, None)?;
            }
            datasets.insert(band.index, Mutex::new(Some(dataset)));
        }
        Ok(Self { geometry, datasets })
    }
}

fn cast_line<T: NumCast + Default>(line: &[f32]) -> Vec<T> {
    line.iter().map(|&v| T::from(v.round()).unwrap_or_default()).collect()
}

impl MosaicWriter for GeoTiffMosaicWriter {
    fn write_line(&self, band: &OutputBand, y: usize, line: &[f32]) -> CompositeResult<()> {
        if y >= self.geometry.height || line.len() != self.geometry.width {
            return Err(CompositeError::Processing(format!(
                "line {} of {} outside of {}x{} raster",
                y, band.name, self.geometry.width, self.geometry.height
            )));
        }
        let target = self
            .datasets
            .get(&band.index)
            .ok_or_else(|| CompositeError::Processing(format!("no GeoTIFF created for band {}", band.name)))?;
        let guard = target
            .lock()
            .map_err(|_| CompositeError::Processing("writer lock poisoned".to_string()))?;
        let dataset = guard
            .as_ref()
            .ok_or_else(|| CompositeError::Processing(format!("GeoTIFF of {} already closed", band.name)))?;
        let mut rasterband = dataset.rasterband(1)?;
        let window = (0, y as isize);
        let size = (line.len(), 1);
        match band.kind {
            BandKind::Status => rasterband.write(window, size, &Buffer::new(size, cast_line::<u8>(line)))?,
            BandKind::Count => rasterband.write(window, size, &Buffer::new(size, cast_line::<i16>(line)))?,
            BandKind::Continuous => rasterband.write(window, size, &Buffer::new(size, line.to_vec()))?,
        }
        Ok(())
    }

    fn finish(&self) -> CompositeResult<()> {
        for target in self.datasets.values() {
            let mut guard = target
                .lock()
                .map_err(|_| CompositeError::Processing("writer lock poisoned".to_string()))?;
            // closing the dataset flushes it
            drop(guard.take());
        }
        log::info!("✅ GeoTIFF mosaics written");
        Ok(())
    }
}
