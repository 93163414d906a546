use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use cloudless_core::acquisition::{Acquisition, AcquisitionConfig, LocalArchive, SearchCriteria};
use cloudless_core::granule::GranuleType;

#[derive(Args)]
pub struct SearchArgs {
    /// Archive directory, overrides the one from --config
    pub archive: Option<PathBuf>,

    /// First sensing day (YYYY-MM-DD)
    #[arg(long)]
    pub start: NaiveDate,

    /// Last sensing day (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub end: NaiveDate,

    /// Comma-separated MGRS tiles without the T prefix, e.g. 33UXQ
    #[arg(short, long, value_delimiter = ',')]
    pub tiles: Vec<String>,

    /// Minimum scene cloud coverage in percent
    #[arg(long, default_value = "0")]
    pub cloud_min: f64,

    /// Maximum scene cloud coverage in percent
    #[arg(long, default_value = "95")]
    pub cloud_max: f64,

    /// Processing level
    #[arg(long, default_value = "L2A")]
    pub level: GranuleType,

    /// Acquisition config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: &SearchArgs) -> Result<()> {
    let mut acquisition = match args.config {
        Some(ref path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str::<AcquisitionConfig>(&contents).context("Invalid acquisition config")?
        }
        None => AcquisitionConfig::default(),
    };
    if let Some(ref archive) = args.archive {
        acquisition.download_dir = archive.clone();
    }

    let mut criteria = SearchCriteria::new(args.start, args.end)
        .with_tiles(args.tiles.iter().cloned())
        .with_cloud_coverage(args.cloud_min, args.cloud_max)
        .with_product(args.level);
    criteria.validate().context("Invalid search")?;

    let archive = LocalArchive::from_config(&acquisition);
    let found = archive
        .search(&criteria)
        .with_context(|| format!("Search in {} failed", archive.root().display()))?;

    if found.is_empty() {
        println!("No products in {}", archive.root().display());
    } else {
        println!("{} product(s) in {}", found.len(), archive.root().display());
        for product in &found {
            println!("  {}", product.display());
        }
    }
    Ok(())
}
