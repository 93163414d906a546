use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::algebra;
use crate::band_key::BandKey;
use crate::error::{CompositeError, Result};
use crate::granule::{extract_tile_id, Granule, GranuleOptions};
use crate::io::quicklook::{rgb_quicklook, write_quicklook};
use crate::io::{Driver, RasterIo};
use crate::resolution::{bands_for_resolution, SpatialResolution};

/// Settings of a [`Worker`] beyond the tile directory and grid.
#[derive(Clone, Debug, Default)]
pub struct WorkerOptions {
    pub granule: GranuleOptions,
    /// Bands the compositing method reads besides the output bands.
    pub extra_bands: Vec<BandKey>,
    /// Result directory. Defaults to `<input>/result`.
    pub output: Option<PathBuf>,
}

/// Files written by a composite run.
#[derive(Clone, Debug)]
pub struct CompositeOutput {
    pub result_dir: PathBuf,
    pub resolution: SpatialResolution,
    pub bands: Vec<BandKey>,
    pub files: Vec<PathBuf>,
}

impl CompositeOutput {
    /// Reopen the result directory as a granule holding the composite bands.
    pub fn open_granule(&self, io: Arc<dyn RasterIo>) -> Result<Granule> {
        Granule::open(
            &self.result_dir,
            self.resolution,
            &self.bands,
            1,
            &GranuleOptions::default(),
            io,
        )
    }
}

/// The time series of one tile: every granule of the job plus the result map.
pub struct Worker {
    path: PathBuf,
    output_dir: PathBuf,
    resolution: SpatialResolution,
    slice_index: usize,
    output_bands: Vec<BandKey>,
    tile_id: Option<String>,
    datasets: Vec<PathBuf>,
    granules: Vec<Granule>,
    result: BTreeMap<BandKey, Array2<u16>>,
    io: Arc<dyn RasterIo>,
}

impl Worker {
    /// Open every `.SAFE` dataset under `path`.
    ///
    /// Datasets of another tile abort the job. A dataset that fails to open is
    /// logged and skipped; at least one has to survive.
    pub fn new(
        path: impl Into<PathBuf>,
        resolution: SpatialResolution,
        slice_index: usize,
        output_bands: &[BandKey],
        options: WorkerOptions,
        io: Arc<dyn RasterIo>,
    ) -> Result<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(CompositeError::FileNotFound(path));
        }
        let slice_index = resolution.resolve_slice_index(slice_index)?;

        let output_bands = if output_bands.is_empty() {
            let defaults = bands_for_resolution(resolution);
            info!(resolution = %resolution, bands = ?defaults, "No output bands given, using the defaults");
            defaults
        } else {
            output_bands.to_vec()
        };
        let mut desired = output_bands.clone();
        for key in &options.extra_bands {
            if !desired.contains(key) {
                desired.push(key.clone());
            }
        }

        let datasets = safe_datasets(&path)?;
        if datasets.len() < 2 {
            warn!(path = %path.display(), datasets = datasets.len(), "Not enough datasets for a composite");
        }
        let tile_id = extract_tile_id(&path).or_else(|| datasets.first().and_then(|d| extract_tile_id(d)));
        if let Some(expected) = &tile_id {
            check_tile(expected, datasets.iter().filter_map(|d| extract_tile_id(d)))?;
        }

        let mut granules = Vec::with_capacity(datasets.len());
        for dataset in &datasets {
            match Granule::open(
                dataset,
                resolution,
                &desired,
                slice_index,
                &options.granule,
                Arc::clone(&io),
            ) {
                Ok(granule) => granules.push(granule),
                Err(e) => error!(dataset = %dataset.display(), error = %e, "Did not find raster dataset"),
            }
        }
        if granules.is_empty() {
            return Err(CompositeError::Config(format!(
                "no usable dataset in {}",
                path.display()
            )));
        }

        let mut worker = Self::from_granules(path, slice_index, &output_bands, granules, options.output, io)?;
        worker.datasets = datasets;
        Ok(worker)
    }

    /// Assemble a worker from granules opened by the caller.
    ///
    /// Every granule has to match the worker's slice index, the resolution of
    /// the first granule and the tile of `path` (or of the first granule).
    pub fn from_granules(
        path: impl Into<PathBuf>,
        slice_index: usize,
        output_bands: &[BandKey],
        granules: Vec<Granule>,
        output: Option<PathBuf>,
        io: Arc<dyn RasterIo>,
    ) -> Result<Self> {
        let path = path.into();
        let first = granules.first().ok_or(CompositeError::EmptySequence)?;
        let resolution = first.resolution();
        let slice_index = resolution.resolve_slice_index(slice_index)?;
        for granule in &granules {
            if granule.slice_index() != slice_index {
                return Err(CompositeError::MixedSliceIndex {
                    expected: slice_index,
                    found: granule.slice_index(),
                    granule: granule.path().to_path_buf(),
                });
            }
            if granule.resolution() != resolution {
                return Err(CompositeError::Config(format!(
                    "granule {} is resolved at {}, the job uses {resolution}",
                    granule.path().display(),
                    granule.resolution()
                )));
            }
        }
        let tile_id = extract_tile_id(&path).or_else(|| first.tile_id());
        if let Some(expected) = &tile_id {
            check_tile(expected, granules.iter().filter_map(Granule::tile_id))?;
        }

        let output_bands = if output_bands.is_empty() {
            bands_for_resolution(resolution)
        } else {
            output_bands.to_vec()
        };
        let output_dir = output.unwrap_or_else(|| path.join("result"));
        let worker = Self {
            datasets: granules.iter().map(|g| g.path().to_path_buf()).collect(),
            path,
            output_dir,
            resolution,
            slice_index,
            output_bands,
            tile_id,
            granules,
            result: BTreeMap::new(),
            io,
        };
        info!(worker = %worker, "Initialized worker");
        Ok(worker)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn resolution(&self) -> SpatialResolution {
        self.resolution
    }

    pub fn slice_index(&self) -> usize {
        self.slice_index
    }

    pub fn output_bands(&self) -> &[BandKey] {
        &self.output_bands
    }

    pub fn tile_id(&self) -> Option<&str> {
        self.tile_id.as_deref()
    }

    pub fn datasets(&self) -> &[PathBuf] {
        &self.datasets
    }

    pub fn granules(&self) -> &[Granule] {
        &self.granules
    }

    pub fn granules_mut(&mut self) -> &mut [Granule] {
        &mut self.granules
    }

    pub fn io(&self) -> &Arc<dyn RasterIo> {
        &self.io
    }

    /// Stable sort by day of year, earliest first.
    pub fn sort_by_doy(&mut self) {
        self.granules.sort_by_key(Granule::doy);
    }

    /// Working grid shape: the canonical grid, or the cropped one when loads
    /// are clipped to a footprint.
    pub fn grid_shape(&self) -> Result<(usize, usize)> {
        self.granules
            .last()
            .ok_or(CompositeError::EmptySequence)?
            .grid_shape()
    }

    pub fn reproject(&mut self, target_crs: &str) -> Result<()> {
        for granule in &mut self.granules {
            granule.reproject_bands(target_crs)?;
        }
        Ok(())
    }

    /// Store a finished composite: `data` in output band order plus an
    /// optional day-of-year map.
    pub fn set_result(&mut self, data: Array3<u16>, doy: Option<Array2<u16>>) -> Result<()> {
        let bands = data.dim().0;
        if bands != self.output_bands.len() {
            let (b, h, w) = data.dim();
            return Err(CompositeError::ShapeMismatch {
                expected: vec![self.output_bands.len(), h, w],
                found: vec![b, h, w],
            });
        }
        for (key, band) in self.output_bands.iter().zip(data.axis_iter(Axis(0))) {
            self.result.insert(key.clone(), band.to_owned());
        }
        if let Some(doy) = doy {
            self.result.insert(BandKey::Doy, doy);
        }
        Ok(())
    }

    pub fn result(&self) -> &BTreeMap<BandKey, Array2<u16>> {
        &self.result
    }

    /// Write every result band as `{BAND}_{res}.tif` into a fresh output
    /// directory, plus the `{TILE}_rgb.tif` quicklook when requested.
    pub fn save_result(&self, quicklook: bool) -> Result<CompositeOutput> {
        if self.result.is_empty() {
            return Err(CompositeError::EmptySequence);
        }
        if self.output_dir.exists() {
            warn!(path = %self.output_dir.display(), "Result directory already exists, it will be replaced");
            std::fs::remove_dir_all(&self.output_dir)?;
        }
        std::fs::create_dir_all(&self.output_dir)?;

        let donor = self
            .granules
            .last()
            .ok_or(CompositeError::EmptySequence)?
            .donor_profile()?;
        debug!(crs = %donor.crs, transform = ?donor.transform, "Donor profile");

        let meters = self.resolution.meters();
        let io = self.io.as_ref();
        let mut files = self
            .result
            .par_iter()
            .map(|(key, data)| {
                let stem = self.output_dir.join(format!("{key}_{meters}"));
                algebra::save(io, data.view().into(), &donor, Driver::GTiff, &stem)
            })
            .collect::<Result<Vec<_>>>()?;

        if quicklook {
            let rgb = [BandKey::B04, BandKey::B03, BandKey::B02];
            match rgb.iter().map(|k| self.result.get(k)).collect::<Option<Vec<_>>>() {
                Some(channels) => {
                    let img = rgb_quicklook(channels[0].view(), channels[1].view(), channels[2].view())?;
                    let tile = self.tile_id.clone().unwrap_or_else(|| "composite".to_string());
                    let path = self.output_dir.join(format!("{tile}_rgb.tif"));
                    write_quicklook(io, &path, &img, &donor)?;
                    info!(path = %path.display(), "Quicklook written");
                    files.push(path);
                }
                None => warn!("Quicklook needs B04, B03 and B02 in the output, skipping it"),
            }
        }
        files.sort();

        let mut bands: Vec<BandKey> = self.result.keys().cloned().collect();
        if quicklook && files.iter().any(|f| BandKey::from_path(f) == Some(BandKey::Rgb)) {
            bands.push(BandKey::Rgb);
        }
        Ok(CompositeOutput {
            result_dir: self.output_dir.clone(),
            resolution: self.resolution,
            bands,
            files,
        })
    }

    /// Drop every loaded array and the result map.
    pub fn release_bands(&mut self) {
        for granule in &mut self.granules {
            granule.free_resources();
        }
        self.result.clear();
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] tile={} granules={} result={}",
            self.path.display(),
            self.resolution,
            self.tile_id.as_deref().unwrap_or("?"),
            self.granules.len(),
            self.output_dir.display()
        )
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("path", &self.path)
            .field("resolution", &self.resolution)
            .field("slice_index", &self.slice_index)
            .field("tile_id", &self.tile_id)
            .field("granules", &self.granules.len())
            .finish()
    }
}

fn check_tile(expected: &str, found: impl IntoIterator<Item = String>) -> Result<()> {
    match found.into_iter().find(|tile| tile != expected) {
        Some(found) => Err(CompositeError::MixedTiles {
            expected: expected.to_string(),
            found,
        }),
        None => Ok(()),
    }
}

/// `.SAFE` subdirectories of `path`, sorted by name.
fn safe_datasets(path: &Path) -> Result<Vec<PathBuf>> {
    let mut datasets = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let dataset = entry?.path();
        if dataset.is_dir() && dataset.extension().and_then(|e| e.to_str()) == Some("SAFE") {
            datasets.push(dataset);
        }
    }
    datasets.sort();
    Ok(datasets)
}
