use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::path::PathBuf;

use seasonal_composite::core::{KeyCodec, KeyFields, KeyLayout};
use seasonal_composite::io::{InputCatalog, RawMosaicStore, SourceNameParser};
use seasonal_composite::{CompositingConfig, JobContext, LocalPipeline, MosaicWriter};

#[derive(Parser, Debug)]
#[command(name = "seasonal-composite", version, about = "Seasonal compositing of tiled weekly surface reflectance")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a source file name
    ParseName {
        name: String,
    },
    /// Encode or decode composite keys
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Composite all inputs of a directory into one mosaic per band
    Run {
        /// Job configuration XML
        #[arg(long)]
        config: PathBuf,
        /// Directory tree with the weekly source tiles
        #[arg(long)]
        input: PathBuf,
        /// Output directory
        #[arg(long)]
        output: PathBuf,
        /// Source file extension
        #[arg(long, default_value = "nc")]
        extension: String,
        #[arg(long, value_enum, default_value = "envi")]
        format: OutputFormat,
    },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    Encode {
        #[arg(long, default_value = "seasonal")]
        layout: String,
        #[arg(long)]
        band_count: u32,
        #[arg(long)]
        band_index: u32,
        #[arg(long)]
        tile_row: u32,
        #[arg(long)]
        tile_column: u32,
    },
    Decode {
        #[arg(long, default_value = "seasonal")]
        layout: String,
        /// Decimal or 0x-prefixed hexadecimal key
        key: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Envi,
    Geotiff,
}

fn codec(layout: &str) -> Result<KeyCodec> {
    match KeyLayout::from_name(layout) {
        Some(layout) => Ok(KeyCodec::new(layout)),
        None => bail!("unknown key layout {} (seasonal, micro-tile)", layout),
    }
}

fn parse_key(text: &str) -> Result<u32> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    };
    parsed.with_context(|| format!("invalid key {}", text))
}

fn run(
    config: PathBuf,
    input: PathBuf,
    output: PathBuf,
    extension: String,
    format: OutputFormat,
) -> Result<()> {
    let config = CompositingConfig::from_xml_file(&config)
        .with_context(|| format!("Failed to read config {}", config.display()))?;
    let ctx = JobContext::new(config)?;

    let catalog = InputCatalog::scan(&input, &ctx, &extension)?;
    let series = open_series(&catalog, &ctx)?;

    let bands: Vec<_> = ctx.outputs.iter().map(|b| (b.clone(), ctx.output_name(b))).collect();
    let geometry = ctx.output_geometry();
    info!("Output mosaic {}x{} pixels, {} bands", geometry.width, geometry.height, bands.len());
    let writer: Box<dyn MosaicWriter> = match format {
        OutputFormat::Envi => Box::new(RawMosaicStore::create(&output, geometry, &bands)?),
        OutputFormat::Geotiff => geotiff_writer(&output, geometry, &bands)?,
    };

    let summary = LocalPipeline::new(&ctx).run(&series, writer.as_ref())?;
    info!("Done: {:?}", summary);
    Ok(())
}

#[cfg(feature = "gdal-io")]
fn open_series(catalog: &InputCatalog, ctx: &JobContext) -> Result<Vec<seasonal_composite::io::TimeSeries>> {
    use seasonal_composite::io::NetcdfTileReader;
    let status_band = ctx.table.status_band;
    Ok(catalog.open(|path| {
        Ok(Box::new(NetcdfTileReader::open(path, status_band)?) as Box<dyn seasonal_composite::TileReader>)
    })?)
}

#[cfg(not(feature = "gdal-io"))]
fn open_series(_catalog: &InputCatalog, _ctx: &JobContext) -> Result<Vec<seasonal_composite::io::TimeSeries>> {
    bail!("reading source products requires the gdal-io feature")
}

#[cfg(feature = "gdal-io")]
fn geotiff_writer(
    output: &std::path::Path,
    geometry: seasonal_composite::io::MosaicGeometry,
    bands: &[(seasonal_composite::OutputBand, String)],
) -> Result<Box<dyn MosaicWriter>> {
    Ok(Box::new(seasonal_composite::io::GeoTiffMosaicWriter::create(output, geometry, bands)?))
}

#[cfg(not(feature = "gdal-io"))]
fn geotiff_writer(
    _output: &std::path::Path,
    _geometry: seasonal_composite::io::MosaicGeometry,
    _bands: &[(seasonal_composite::OutputBand, String)],
) -> Result<Box<dyn MosaicWriter>> {
    bail!("GeoTIFF output requires the gdal-io feature")
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    let args = Args::parse();
    match args.command {
        Command::ParseName { name } => {
            let parsed = SourceNameParser::new()?.parse(&name)?;
            println!("sensor:  {}", parsed.sensor);
            println!("period:  {}", parsed.period);
            println!("tile:    h{:02}v{:02}", parsed.tile_column, parsed.tile_row);
            println!("date:    {}", parsed.date);
            println!("suffix:  {}", parsed.suffix.as_deref().unwrap_or("-"));
            println!("version: {}", parsed.version);
        }
        Command::Key { action } => match action {
            KeyAction::Encode {
                layout,
                band_count,
                band_index,
                tile_row,
                tile_column,
            } => {
                let codec = codec(&layout)?;
                let fields = KeyFields {
                    band_count,
                    band_index,
                    tile_row,
                    tile_column,
                };
                if !codec.fits(&fields) {
                    bail!("{:?} does not fit the {} key layout", fields, layout);
                }
                let key = codec.encode(fields);
                println!("{} {}", key.raw(), key);
            }
            KeyAction::Decode { layout, key } => {
                let fields = codec(&layout)?.decode(seasonal_composite::CompositeKey(parse_key(&key)?));
                println!(
                    "band_count={} band_index={} tile_row={} tile_column={}",
                    fields.band_count, fields.band_index, fields.tile_row, fields.tile_column
                );
            }
        },
        Command::Run {
            config,
            input,
            output,
            extension,
            format,
        } => run(config, input, output, extension, format)?,
    }
    Ok(())
}
