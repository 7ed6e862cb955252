use seasonal_composite::io::bands::SR_COUNT_BANDS;
use seasonal_composite::io::{InputCatalog, MemoryMosaicWriter, MemoryProduct, TileReader};
use seasonal_composite::{CompositingConfig, JobContext, LocalPipeline, PixelState};
use std::path::Path;

const CONFIG: &str = r#"
<compositingConfig>
    <sensor>PROBAV-333m</sensor>
    <mosaicHeight>36</mosaicHeight>
    <startDate>2014-03-01</startDate>
    <stopDate>2014-03-21</stopDate>
    <outputBands>sr_2_mean</outputBands>
    <numPartitions>2</numPartitions>
    <region>
        <x>2</x>
        <y>3</y>
        <width>2</width>
        <height>1</height>
    </region>
    <regionName>demo</regionName>
</compositingConfig>
"#;

/// Reflectance grows with the day of month so the average is predictable
fn product_for(path: &Path, ctx: &JobContext) -> MemoryProduct {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap();
    let name = ctx.parser.parse(file_name).unwrap();
    let day = name.date.format("%d").to_string().parse::<f32>().unwrap();
    let mut product = MemoryProduct::new(file_name, ctx.grid.tile_size)
        .with_constant(ctx.table.status_band, PixelState::Land.code() as f32)
        .unwrap();
    for (i, band) in SR_COUNT_BANDS.iter().enumerate() {
        product = product.with_constant(band, if i == 0 { 1.0 } else { 0.0 }).unwrap();
    }
    for band in &ctx.table.groups[0].bands {
        let value = if *band == "vegetation_index_mean" { 0.5 } else { day / 100.0 };
        product = product.with_constant(band, value).unwrap();
    }
    product
}

#[test]
fn test_job_from_config_file_and_input_directory() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("job.xml");
    std::fs::write(&config_path, CONFIG).unwrap();

    let ctx = JobContext::new(CompositingConfig::from_xml_file(&config_path).unwrap()).unwrap();
    assert_eq!(ctx.grid.tile_size, 1);
    assert_eq!(ctx.periods.len(), 3);

    let inputs = dir.path().join("inputs");
    std::fs::create_dir(&inputs).unwrap();
    for day in ["01", "08", "15"] {
        let name = format!("ESACCI-LC-L3-SR-PROBAV-333m-P7D-h03v03-201403{}-v1.0.nc", day);
        std::fs::write(inputs.join(name), b"").unwrap();
    }

    let catalog = InputCatalog::scan(&inputs, &ctx, "nc").unwrap();
    assert_eq!(catalog.tiles.len(), 1);
    let series = catalog
        .open(|path| Ok(Box::new(product_for(path, &ctx)) as Box<dyn TileReader>))
        .unwrap();

    let writer = MemoryMosaicWriter::new(ctx.output_geometry(), &ctx.outputs);
    let summary = LocalPipeline::new(&ctx).run(&series, &writer).unwrap();
    assert_eq!(summary.partitions, 2);
    assert_eq!(summary.assembly.missing_tiles, ctx.outputs.len());

    // h02v03 has no input, h03v03 averages days 1, 8 and 15
    let sr = writer.raster("sr_2_mean").unwrap();
    assert_eq!(sr.dim(), (1, 2));
    assert!(sr[[0, 0]].is_nan());
    approx::assert_relative_eq!(sr[[0, 1]], 0.08, epsilon = 1e-6);
    let status = writer.raster("status").unwrap();
    assert_eq!(status[[0, 0]], 0.0);
    assert_eq!(status[[0, 1]], PixelState::Land.code() as f32);
    assert_eq!(writer.raster("status_count").unwrap()[[0, 1]], 3.0);

    assert!(ctx.output_name(&ctx.outputs[0]).contains("-P3W-status-demo-20140301-"));
}
