use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::algebra::{TileDetector, NDVI_BANDS};
use crate::band_key::BandKey;
use crate::consts::{DEFAULT_CLOUD_BATCH_SIZE, DEFAULT_MEDIAN_BLOCK_SIZE, DEFAULT_NDVI_BATCH_SIZE};
use crate::error::{CompositeError, Result};
use crate::granule::{GranuleOptions, GranuleType};
use crate::raster::Footprint;
use crate::resolution::SpatialResolution;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompositeConfig {
    /// Tile directory holding one `.SAFE` dataset per acquisition.
    pub input: PathBuf,
    /// Result directory, `<input>/result` when unset.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default = "default_resolution")]
    pub resolution: SpatialResolution,
    /// Bands to composite. Empty selects the defaults for the resolution.
    #[serde(default)]
    pub output_bands: Vec<BandKey>,
    #[serde(default)]
    pub method: CompositeMethod,
    /// Blocks per grid axis for per-tile compositing, 1 otherwise.
    #[serde(default = "default_slice_index")]
    pub slice_index: usize,
    #[serde(default)]
    pub granule_type: GranuleType,
    /// Reproject every band into this CRS before compositing.
    #[serde(default)]
    pub target_crs: Option<String>,
    /// Clip every band to this polygon, in raster CRS.
    #[serde(default)]
    pub footprint: Option<Footprint>,
    /// Write the 8-bit RGB quicklook next to the bands.
    #[serde(default = "default_quicklook")]
    pub quicklook: bool,
    /// Threads loading a batch. Rayon's default when unset.
    #[serde(default)]
    pub load_threads: Option<usize>,
    #[serde(default)]
    pub keep_resampled_sources: bool,
}

fn default_resolution() -> SpatialResolution {
    SpatialResolution::R20
}

fn default_slice_index() -> usize {
    1
}

fn default_quicklook() -> bool {
    true
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("."),
            output: None,
            resolution: default_resolution(),
            output_bands: Vec::new(),
            method: CompositeMethod::default(),
            slice_index: default_slice_index(),
            granule_type: GranuleType::default(),
            target_crs: None,
            footprint: None,
            quicklook: default_quicklook(),
            load_threads: None,
            keep_resampled_sources: false,
        }
    }
}

impl CompositeConfig {
    /// Reject combinations that cannot run before any file is touched.
    pub fn validate(&self) -> Result<()> {
        self.resolution.resolve_slice_index(self.slice_index)?;
        match self.method {
            CompositeMethod::PerTile { .. } => {}
            _ if self.slice_index != 1 => {
                return Err(CompositeError::Config(format!(
                    "{} works per pixel, slice_index must be 1 (got {})",
                    self.method.name(),
                    self.slice_index
                )));
            }
            _ => {}
        }
        if self.method.unit_size() == 0 {
            return Err(CompositeError::Config(format!(
                "{} needs a batch or block size of at least 1",
                self.method.name()
            )));
        }
        if self.load_threads == Some(0) {
            return Err(CompositeError::Config("load_threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn granule_options(&self) -> GranuleOptions {
        GranuleOptions {
            granule_type: self.granule_type,
            footprint: self.footprint.clone(),
            keep_resampled_sources: self.keep_resampled_sources,
        }
    }
}

/// How the winning sample is picked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompositeMethod {
    /// Highest quality-masked NDVI per pixel.
    NdviPerPixel {
        #[serde(default = "default_ndvi_batch")]
        batch_size: usize,
    },
    /// Lowest cloud probability per pixel.
    CloudProbabilityPerPixel {
        #[serde(default = "default_cloud_batch")]
        batch_size: usize,
    },
    /// Temporal median per pixel, streamed in square blocks.
    MedianPerPixel {
        #[serde(default = "default_median_block")]
        block_size: usize,
    },
    /// Least cloudy granule per block of a `slice_index²` partition.
    PerTile {
        #[serde(default)]
        detector: TileDetector,
    },
}

fn default_ndvi_batch() -> usize {
    DEFAULT_NDVI_BATCH_SIZE
}

fn default_cloud_batch() -> usize {
    DEFAULT_CLOUD_BATCH_SIZE
}

fn default_median_block() -> usize {
    DEFAULT_MEDIAN_BLOCK_SIZE
}

impl Default for CompositeMethod {
    fn default() -> Self {
        Self::NdviPerPixel {
            batch_size: DEFAULT_NDVI_BATCH_SIZE,
        }
    }
}

impl CompositeMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NdviPerPixel { .. } => "ndvi_per_pixel",
            Self::CloudProbabilityPerPixel { .. } => "cloud_probability_per_pixel",
            Self::MedianPerPixel { .. } => "median_per_pixel",
            Self::PerTile { .. } => "per_tile",
        }
    }

    /// Bands read to compute the decision signal. Cloud probability layers
    /// are added separately since they depend on the detector.
    pub fn required_bands(&self) -> Vec<BandKey> {
        match self {
            Self::NdviPerPixel { .. } => NDVI_BANDS.to_vec(),
            Self::CloudProbabilityPerPixel { .. } | Self::MedianPerPixel { .. } => Vec::new(),
            Self::PerTile { detector } => detector.bands(),
        }
    }

    /// Batch size or block side, 1 for per-tile.
    fn unit_size(&self) -> usize {
        match *self {
            Self::NdviPerPixel { batch_size } | Self::CloudProbabilityPerPixel { batch_size } => batch_size,
            Self::MedianPerPixel { block_size } => block_size,
            Self::PerTile { .. } => 1,
        }
    }
}
