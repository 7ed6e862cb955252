use chrono::{Duration, NaiveDate};
use ndarray::Array2;
use seasonal_composite::core::LocalPipeline;
use seasonal_composite::io::bands::WeightSource;
use seasonal_composite::io::{MemoryMosaicWriter, MemoryProduct, RawMosaicStore, TileReader, TimeSeries};
use seasonal_composite::{
    BandKind, CompositingConfig, JobContext, MosaicWriter, PixelState, TileArea, TileCoordinate,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One week with the same status everywhere: occurrence count 1 for the
/// status class, `index` in the precomputed index bands and `value` in
/// every other band.
fn week(ctx: &JobContext, state: PixelState, value: f32, index: f32) -> MemoryProduct {
    let size = ctx.grid.tile_size;
    let index_bands: Vec<&str> = ctx
        .table
        .groups
        .iter()
        .flat_map(|g| g.bands.iter().copied().filter(|b| g.is_index_band(b)))
        .collect();
    let mut product = MemoryProduct::new(&format!("{}-{}", state, value), size);
    for band in ctx.table.source_bands() {
        let v = if band == ctx.table.status_band {
            state.code() as f32
        } else if index_bands.contains(&band) {
            index
        } else {
            match &ctx.table.weights {
                WeightSource::StatusCounts(counts) if counts.contains(&band) => {
                    match state.class() {
                        Some(class) if counts[class.count_band_position()] == band => 1.0,
                        _ => 0.0,
                    }
                }
                WeightSource::Unit { obs_band } if *obs_band == band => 1.0,
                _ => value,
            }
        };
        product = product.with_constant(band, v).unwrap();
    }
    product
}

fn series(ctx: &JobContext, column: u32, row: u32, weeks: Vec<MemoryProduct>) -> TimeSeries {
    let mut series = TimeSeries::new(TileCoordinate::new(&ctx.config.sensor, column, row, &ctx.grid).unwrap());
    let start = ctx.config.start_date;
    for (i, product) in weeks.into_iter().enumerate() {
        series.push(start + Duration::days(7 * i as i64), Box::new(product));
    }
    series
}

fn run(ctx: &JobContext, series: &[TimeSeries]) -> MemoryMosaicWriter {
    let writer = MemoryMosaicWriter::new(ctx.output_geometry(), &ctx.outputs);
    LocalPipeline::new(ctx).run(series, &writer).unwrap();
    writer
}

#[test]
fn test_syn_zero_variance_composite_is_exact() {
    init_logging();
    let ctx = JobContext::new(CompositingConfig {
        sensor: "SYN-L3".to_string(),
        mosaic_height: 36,
        region: Some(TileArea { x: 3, y: 4, width: 1, height: 1 }),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(ctx.grid.tile_size, 2);
    assert_eq!(ctx.grid.micro_tile_size(), 1);

    let weeks = (0..3).map(|_| week(&ctx, PixelState::Land, 0.6, 0.6)).collect();
    let writer = run(&ctx, &[series(&ctx, 3, 4, weeks)]);

    for band in &ctx.outputs {
        let raster = writer.raster(&band.name).unwrap();
        assert_eq!(raster.dim(), (2, 2));
        for &v in raster.iter() {
            match band.kind {
                BandKind::Status => assert_eq!(v, PixelState::Land.code() as f32),
                BandKind::Count => assert_eq!(v, 3.0, "{}", band.name),
                BandKind::Continuous => assert_eq!(v, 0.6, "{}", band.name),
            }
        }
    }
}

#[test]
fn test_land_majority_over_cloudy_weeks() {
    init_logging();
    let ctx = JobContext::new(CompositingConfig {
        mosaic_height: 72,
        output_bands: Some("sr_1_mean,vegetation_index_mean".to_string()),
        region: Some(TileArea { x: 10, y: 5, width: 1, height: 1 }),
        ..Default::default()
    })
    .unwrap();

    let weeks = vec![
        week(&ctx, PixelState::Land, 0.10, 0.50),
        week(&ctx, PixelState::Cloud, 0.90, 0.05),
        week(&ctx, PixelState::Land, 0.20, 0.51),
        week(&ctx, PixelState::Cloud, 0.90, 0.05),
        week(&ctx, PixelState::Land, 0.30, 0.49),
    ];
    let writer = run(&ctx, &[series(&ctx, 10, 5, weeks)]);

    let status = writer.raster("status").unwrap();
    assert!(status.iter().all(|&v| v == PixelState::Land.code() as f32));
    let sr = writer.raster("sr_1_mean").unwrap();
    for &v in sr.iter() {
        approx::assert_relative_eq!(v, 0.2, epsilon = 1e-6);
    }
    let ndvi = writer.raster("vegetation_index_mean").unwrap();
    for &v in ndvi.iter() {
        approx::assert_relative_eq!(v, 0.5, epsilon = 1e-6);
    }
    assert!(writer.raster("status_count").unwrap().iter().all(|&v| v == 3.0));
    assert!(writer.raster("obs_count").unwrap().iter().all(|&v| v == 5.0));
    assert!(writer.raster("sr_2_mean").is_none());
}

#[test]
fn test_invalid_pixel_and_missing_tile_are_no_data() {
    init_logging();
    let ctx = JobContext::new(CompositingConfig {
        mosaic_height: 72,
        region: Some(TileArea { x: 10, y: 5, width: 3, height: 1 }),
        ..Default::default()
    })
    .unwrap();

    // pixel (0, 1) of the left tile is INVALID in every week
    let mut status = Array2::from_elem((2, 2), PixelState::Land.code() as f32);
    status[[0, 1]] = 0.0;
    let left: Vec<MemoryProduct> = (0..3)
        .map(|_| {
            week(&ctx, PixelState::Land, 0.25, 0.5)
                .with_band(ctx.table.status_band, status.clone())
                .unwrap()
        })
        .collect();
    let right: Vec<MemoryProduct> = (0..3).map(|_| week(&ctx, PixelState::Water, 0.75, 0.5)).collect();
    let writer = run(&ctx, &[series(&ctx, 10, 5, left), series(&ctx, 12, 5, right)]);

    let status = writer.raster("status").unwrap();
    assert_eq!(status.row(0).to_vec(), vec![1.0, 0.0, 0.0, 0.0, 2.0, 2.0]);
    assert_eq!(status.row(1).to_vec(), vec![1.0, 1.0, 0.0, 0.0, 2.0, 2.0]);

    let counts = writer.raster("status_count").unwrap();
    assert_eq!(counts.row(0).to_vec(), vec![3.0, 0.0, 0.0, 0.0, 3.0, 3.0]);

    let sr = writer.raster("sr_1_mean").unwrap();
    let row: Vec<f32> = sr.row(0).to_vec();
    approx::assert_relative_eq!(row[0], 0.25, epsilon = 1e-6);
    assert!(row[1].is_nan() && row[2].is_nan() && row[3].is_nan());
    approx::assert_relative_eq!(row[4], 0.75, epsilon = 1e-6);
}

#[test]
fn test_result_is_independent_of_partition_count() {
    init_logging();
    let config = CompositingConfig {
        sensor: "OLCI-L3".to_string(),
        mosaic_height: 72,
        region: Some(TileArea { x: 0, y: 0, width: 3, height: 2 }),
        ..Default::default()
    };
    let build = |ctx: &JobContext| -> Vec<TimeSeries> {
        let mut all = Vec::new();
        for row in 0..2u32 {
            for column in 0..3u32 {
                let value = 0.1 * (1 + row * 3 + column) as f32;
                let weeks = (0..2).map(|_| week(ctx, PixelState::Land, value, 0.4)).collect();
                all.push(series(ctx, column, row, weeks));
            }
        }
        all
    };

    let mut rasters = Vec::new();
    for partitions in [1, 3, 8] {
        let ctx = JobContext::new(CompositingConfig {
            num_partitions: partitions,
            ..config.clone()
        })
        .unwrap();
        let writer = run(&ctx, &build(&ctx));
        rasters.push(writer.raster("sr_1_mean").unwrap());
    }
    assert_eq!(rasters[0].dim(), (8, 12));
    for raster in &rasters[1..] {
        assert_eq!(raster, &rasters[0]);
    }
    // micro tiles of tile h02v01 carry its value
    approx::assert_relative_eq!(rasters[0][[7, 11]], 0.6, epsilon = 1e-6);
    approx::assert_relative_eq!(rasters[0][[0, 0]], 0.1, epsilon = 1e-6);
}

#[test]
fn test_raw_mosaic_end_to_end() {
    init_logging();
    let ctx = JobContext::new(CompositingConfig {
        mosaic_height: 72,
        region: Some(TileArea { x: 4, y: 1, width: 2, height: 1 }),
        region_name: Some("test".to_string()),
        start_date: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
        stop_date: NaiveDate::from_ymd_opt(2010, 3, 31).unwrap(),
        ..Default::default()
    })
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let bands: Vec<_> = ctx.outputs.iter().map(|b| (b.clone(), ctx.output_name(b))).collect();
    let store = RawMosaicStore::create(dir.path(), ctx.output_geometry(), &bands).unwrap();

    let weeks = (0..2).map(|_| week(&ctx, PixelState::Snow, 0.8, 0.0)).collect();
    let summary = LocalPipeline::new(&ctx).run(&[series(&ctx, 5, 1, weeks)], &store).unwrap();
    assert_eq!(summary.tiles, 1);
    assert_eq!(summary.fragments, ctx.outputs.len());

    let name = ctx.output_name(&ctx.outputs[0]);
    assert!(name.starts_with("ESACCI-LC-L3-SR-MERIS-"));
    assert!(name.ends_with("-P12W-status-test-20100101-v2.0"));
    let bytes = std::fs::read(dir.path().join(format!("{}.img", name))).unwrap();
    assert_eq!(bytes, vec![0, 0, 3, 3, 0, 0, 3, 3]);
    assert!(dir.path().join(format!("{}.hdr", name)).exists());
}

#[test]
fn test_writer_is_usable_as_trait_object() {
    let ctx = JobContext::new(CompositingConfig {
        mosaic_height: 72,
        region: Some(TileArea { x: 0, y: 0, width: 1, height: 1 }),
        ..Default::default()
    })
    .unwrap();
    let writer: Box<dyn MosaicWriter> = Box::new(MemoryMosaicWriter::new(ctx.output_geometry(), &ctx.outputs));
    let summary = LocalPipeline::new(&ctx).run(&[], writer.as_ref()).unwrap();
    assert_eq!(summary.fragments, 0);
    let reader: Box<dyn TileReader> = Box::new(week(&ctx, PixelState::Land, 0.1, 0.1));
    assert_eq!(reader.tile_size(), 2);
}
