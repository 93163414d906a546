use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use cloudless_core::algebra::TileDetector;
use cloudless_core::band_key::BandKey;
use cloudless_core::consts::{DEFAULT_CLOUD_BATCH_SIZE, DEFAULT_MEDIAN_BLOCK_SIZE, DEFAULT_NDVI_BATCH_SIZE};
use cloudless_core::granule::GranuleType;
use cloudless_core::io::GeoTiffIo;
use cloudless_core::pipeline::config::{CompositeConfig, CompositeMethod};
use cloudless_core::pipeline::run_composite_reported;
use cloudless_core::resolution::SpatialResolution;

use crate::progress::BarReporter;

#[derive(Clone, Copy, ValueEnum)]
pub enum MethodArg {
    Ndvi,
    CloudProbability,
    Median,
    PerTile,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DetectorArg {
    Scl,
    MaxNdvi,
}

#[derive(Args)]
pub struct RunArgs {
    /// Tile directory holding the .SAFE datasets
    pub input: Option<PathBuf>,

    /// Composite config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Working resolution in meters (10, 20 or 60)
    #[arg(short, long, default_value = "20")]
    pub resolution: u32,

    /// Comma-separated output bands, defaults depend on the resolution
    #[arg(short, long, value_delimiter = ',')]
    pub bands: Vec<BandKey>,

    /// Compositing method
    #[arg(short, long, value_enum, default_value = "ndvi")]
    pub method: MethodArg,

    /// Granules per batch (per-pixel methods)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Block side in pixels (median)
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Blocks per grid axis (per-tile)
    #[arg(long, default_value = "1")]
    pub slice_index: usize,

    /// Block scoring for per-tile compositing
    #[arg(long, value_enum, default_value = "scl")]
    pub detector: DetectorArg,

    /// Processing level of the datasets
    #[arg(long, default_value = "L2A")]
    pub level: GranuleType,

    /// Reproject every band into this CRS first
    #[arg(long)]
    pub target_crs: Option<String>,

    /// Threads loading a batch
    #[arg(long)]
    pub threads: Option<usize>,

    /// Skip the RGB quicklook
    #[arg(long)]
    pub no_quicklook: bool,

    /// Keep source files after resampling or reprojecting
    #[arg(long)]
    pub keep_resampled: bool,

    /// Result directory, defaults to <input>/result
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let mut config = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        toml::from_str(&contents).context("Invalid composite config")?
    } else {
        build_config_from_args(args)?
    };
    if args.config.is_some() {
        if let Some(ref input) = args.input {
            config.input = input.clone();
        }
    }
    config.validate().context("Invalid composite config")?;

    crate::summary::print_composite_summary(&config);

    let reporter = Arc::new(BarReporter::new()?);
    let output = run_composite_reported(&config, Arc::new(GeoTiffIo::new()), None, reporter.clone())
        .with_context(|| format!("Composite of {} failed", config.input.display()))?;
    reporter.finish();

    crate::summary::print_output(&output);
    println!("Result saved to {}", output.result_dir.display());
    Ok(())
}

fn build_config_from_args(args: &RunArgs) -> Result<CompositeConfig> {
    let Some(ref input) = args.input else {
        bail!("Give a tile directory or --config");
    };
    let resolution = SpatialResolution::try_from(args.resolution)?;
    let method = match args.method {
        MethodArg::Ndvi => CompositeMethod::NdviPerPixel {
            batch_size: args.batch_size.unwrap_or(DEFAULT_NDVI_BATCH_SIZE),
        },
        MethodArg::CloudProbability => CompositeMethod::CloudProbabilityPerPixel {
            batch_size: args.batch_size.unwrap_or(DEFAULT_CLOUD_BATCH_SIZE),
        },
        MethodArg::Median => CompositeMethod::MedianPerPixel {
            block_size: args.block_size.unwrap_or(DEFAULT_MEDIAN_BLOCK_SIZE),
        },
        MethodArg::PerTile => CompositeMethod::PerTile {
            detector: match args.detector {
                DetectorArg::Scl => TileDetector::Scl,
                DetectorArg::MaxNdvi => TileDetector::MaxNdvi,
            },
        },
    };

    Ok(CompositeConfig {
        input: input.clone(),
        output: args.output.clone(),
        resolution,
        output_bands: args.bands.clone(),
        method,
        slice_index: args.slice_index,
        granule_type: args.level,
        target_crs: args.target_crs.clone(),
        footprint: None,
        quicklook: !args.no_quicklook,
        load_threads: args.threads,
        keep_resampled_sources: args.keep_resampled,
    })
}
