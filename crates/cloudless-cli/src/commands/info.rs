use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use cloudless_core::acquisition::SafeName;
use cloudless_core::granule::{extract_tile_id, GranuleType};
use cloudless_core::io::metadata::SafeMetadata;

#[derive(Args)]
pub struct InfoArgs {
    /// .SAFE dataset directory
    pub dataset: PathBuf,

    /// Processing level of the dataset
    #[arg(long, default_value = "L2A")]
    pub level: GranuleType,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let name = args
        .dataset
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    println!("Dataset:     {}", args.dataset.display());

    match SafeName::parse(&name) {
        Some(safe) => {
            println!("Mission:     {}", safe.mission);
            println!("Level:       {}", safe.level);
            println!("Sensing:     {}", safe.sensing);
            println!("Orbit:       R{:03}", safe.relative_orbit);
            println!("Tile:        T{}", safe.tile);
        }
        None => {
            if let Some(tile) = extract_tile_id(&args.dataset) {
                println!("Tile:        {}", tile);
            }
        }
    }

    let metadata_path = args.dataset.join(args.level.metadata_file_name());
    let metadata = SafeMetadata::parse(&metadata_path)
        .with_context(|| format!("Failed to read {}", metadata_path.display()))?;
    let Some(meta) = metadata else {
        println!("Metadata:    none");
        return Ok(());
    };

    println!("Day of year: {}", meta.doy());
    if let Some(datatake) = meta.datatake {
        println!("Datatake:    {}", datatake);
    }
    if let Some(cc) = meta.cloud_coverage {
        println!("Clouds:      {:.1}%", cc);
    }
    if !meta.footprint.is_empty() {
        println!("Footprint:   {} vertices", meta.footprint.len());
    }
    println!("Images:      {}", meta.image_files.len());
    for image in &meta.image_files {
        println!("  {}", image.display());
    }

    Ok(())
}
