use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use chrono::NaiveDateTime;
use ndarray::{stack, Array2, Array3, ArrayView2, Axis};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::band_key::BandKey;
use crate::consts::{L2A_IMAGES_10M, L2A_IMAGES_20M};
use crate::error::{CompositeError, Result};
use crate::io::metadata::SafeMetadata;
use crate::io::{RasterIo, RasterProfile};
use crate::raster::{Footprint, RasterBand};
use crate::resolution::SpatialResolution;

/// Sentinel-2 processing level of a dataset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GranuleType {
    /// Bottom-of-atmosphere reflectance, images grouped per resolution.
    #[default]
    L2A,
    /// Top-of-atmosphere reflectance, every band at its native resolution.
    L1C,
}

impl GranuleType {
    pub fn metadata_file_name(self) -> &'static str {
        match self {
            Self::L2A => "MTD_MSIL2A.xml",
            Self::L1C => "MTD_MSIL1C.xml",
        }
    }
}

impl FromStr for GranuleType {
    type Err = CompositeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "L2A" | "l2a" => Ok(Self::L2A),
            "L1C" | "l1c" => Ok(Self::L1C),
            other => Err(CompositeError::UnsupportedGranuleType(other.to_string())),
        }
    }
}

impl fmt::Display for GranuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L2A => f.write_str("L2A"),
            Self::L1C => f.write_str("L1C"),
        }
    }
}

fn tile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"T[0-9]+[A-Za-z]+").expect("tile pattern is valid"))
}

/// Military grid tile identifier (e.g. `T33UXQ`) embedded in a path. The
/// innermost path component carrying one wins.
pub fn extract_tile_id(path: &Path) -> Option<String> {
    path.components().rev().find_map(|c| {
        let text = c.as_os_str().to_string_lossy();
        tile_pattern().find(&text).map(|m| m.as_str().to_string())
    })
}

/// Knobs shared by every granule of a job.
#[derive(Clone, Debug, Default)]
pub struct GranuleOptions {
    pub granule_type: GranuleType,
    /// Crop loaded bands to this polygon.
    pub footprint: Option<Footprint>,
    /// Keep the original file when a band is resampled onto the working grid.
    pub keep_resampled_sources: bool,
}

/// One acquisition date of one tile: a set of bands resolved at a working
/// resolution.
pub struct Granule {
    path: PathBuf,
    granule_type: GranuleType,
    resolution: SpatialResolution,
    desired_bands: Vec<BandKey>,
    slice_index: usize,
    doy: u16,
    data_take: Option<NaiveDateTime>,
    cloud_coverage: Option<f64>,
    bands: BTreeMap<BandKey, RasterBand>,
    io: Arc<dyn RasterIo>,
    footprint: Option<Footprint>,
    keep_resampled_sources: bool,
}

type Candidates = BTreeMap<SpatialResolution, Vec<PathBuf>>;

fn missing_band(granule: &Path, key: &BandKey) -> CompositeError {
    CompositeError::MissingBand {
        band: key.to_string(),
        granule: granule.to_path_buf(),
    }
}

impl Granule {
    /// Resolve `desired` bands of the dataset at `path` for `resolution`.
    ///
    /// Images come from the product metadata when it lists existing files and
    /// from a directory scan otherwise. Bands absent at `resolution` are taken
    /// from the other resolutions (10, 20, 60 m order) and resampled.
    pub fn open(
        path: impl Into<PathBuf>,
        resolution: SpatialResolution,
        desired: &[BandKey],
        slice_index: usize,
        options: &GranuleOptions,
        io: Arc<dyn RasterIo>,
    ) -> Result<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(CompositeError::FileNotFound(path));
        }
        resolution.check_slice_index(slice_index)?;

        let metadata_path = path.join(options.granule_type.metadata_file_name());
        let metadata = match SafeMetadata::parse(&metadata_path) {
            Ok(Some(meta)) => {
                info!(path = %metadata_path.display(), "Metadata found");
                Some(meta)
            }
            Ok(None) => {
                warn!(granule = %path.display(), "Continuing without metadata file");
                None
            }
            Err(e) => {
                warn!(granule = %path.display(), error = %e, "Unreadable metadata, continuing without it");
                None
            }
        };

        let candidates = find_images(&path, options.granule_type, metadata.as_ref())?;
        let found = candidates.get(&resolution).map_or(0, Vec::len);
        if found < 2 {
            return Err(CompositeError::NotEnoughRasters { path, found });
        }
        let resolved = resolve_bands(&path, resolution, desired, &candidates)?;

        let mut granule = Self {
            doy: metadata.as_ref().map_or(0, SafeMetadata::doy),
            data_take: metadata.as_ref().and_then(|m| m.datatake),
            cloud_coverage: metadata.as_ref().and_then(|m| m.cloud_coverage),
            path,
            granule_type: options.granule_type,
            resolution,
            desired_bands: desired.to_vec(),
            slice_index,
            bands: BTreeMap::new(),
            io,
            footprint: options.footprint.clone(),
            keep_resampled_sources: options.keep_resampled_sources,
        };
        for (key, band_path) in resolved {
            granule.add_band(band_path, key)?;
        }
        info!(granule = %granule, "Initialized granule");
        Ok(granule)
    }

    /// Register an external raster (index, mask) under `key`, resampling it onto
    /// the working grid when its width differs.
    pub fn add_band(&mut self, path: impl Into<PathBuf>, key: BandKey) -> Result<()> {
        let mut band = RasterBand::open(path, Arc::clone(&self.io))?
            .with_footprint(self.footprint.clone());
        let grid = self.resolution.grid_side();
        let width = band.profile().width;
        if width != grid {
            let factor = grid as f64 / width as f64;
            debug!(band = %key, width, grid, "Resampling band onto working grid");
            band.resample(factor, key.resampling(), self.keep_resampled_sources)?;
        }
        self.bands.insert(key, band);
        Ok(())
    }

    /// Register a layer derived from this granule's loaded bands. It already
    /// matches the loaded grid, so it is neither resampled nor cropped.
    pub fn add_aligned_band(&mut self, path: impl Into<PathBuf>, key: BandKey) -> Result<()> {
        let band = RasterBand::open(path, Arc::clone(&self.io))?;
        let expected = self.grid_shape()?;
        if band.shape()? != expected {
            let (h, w) = band.shape()?;
            return Err(CompositeError::ShapeMismatch {
                expected: vec![expected.0, expected.1],
                found: vec![h, w],
            });
        }
        self.bands.insert(key, band);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn tile_id(&self) -> Option<String> {
        extract_tile_id(&self.path)
    }

    pub fn granule_type(&self) -> GranuleType {
        self.granule_type
    }

    pub fn resolution(&self) -> SpatialResolution {
        self.resolution
    }

    pub fn slice_index(&self) -> usize {
        self.slice_index
    }

    /// Day of year of the acquisition, 0 when unknown.
    pub fn doy(&self) -> u16 {
        self.doy
    }

    pub fn data_take(&self) -> Option<NaiveDateTime> {
        self.data_take
    }

    pub fn cloud_coverage(&self) -> Option<f64> {
        self.cloud_coverage
    }

    pub fn desired_bands(&self) -> &[BandKey] {
        &self.desired_bands
    }

    pub fn band_keys(&self) -> Vec<BandKey> {
        self.bands.keys().cloned().collect()
    }

    pub fn contains(&self, key: &BandKey) -> bool {
        self.bands.contains_key(key)
    }

    pub fn get(&self, key: &BandKey) -> Result<&RasterBand> {
        self.bands.get(key).ok_or_else(|| missing_band(&self.path, key))
    }

    pub fn get_mut(&mut self, key: &BandKey) -> Result<&mut RasterBand> {
        self.bands.get_mut(key).ok_or_else(|| missing_band(&self.path, key))
    }

    /// Load `keys` (all bands when `None`).
    pub fn load_bands(&mut self, keys: Option<&[BandKey]>) -> Result<()> {
        let keys = match keys {
            Some(keys) => keys.to_vec(),
            None => self.band_keys(),
        };
        for key in &keys {
            self.get_mut(key)?.load()?;
        }
        Ok(())
    }

    /// Load one band and return its array.
    pub fn raster(&mut self, key: &BandKey) -> Result<&Array2<u16>> {
        self.get_mut(key)?.load()
    }

    /// View of an already loaded band.
    pub fn view(&self, key: &BandKey) -> Result<ArrayView2<'_, u16>> {
        let band = self.get(key)?;
        band.data().map(|d| d.view()).ok_or_else(|| {
            CompositeError::storage(band.path(), format!("band {key} is not loaded"))
        })
    }

    /// Stack bands in `order` (map order when `None`) along a new leading axis,
    /// or a trailing one when `as_cube`.
    pub fn stack(&mut self, order: Option<&[BandKey]>, as_cube: bool) -> Result<Array3<u16>> {
        let order = match order {
            Some(order) => order.to_vec(),
            None => self.band_keys(),
        };
        if order.is_empty() {
            return Err(CompositeError::EmptySequence);
        }
        self.load_bands(Some(order.as_slice()))?;
        let views = order
            .iter()
            .map(|key| self.view(key))
            .collect::<Result<Vec<_>>>()?;
        let axis = if as_cube { Axis(2) } else { Axis(0) };
        debug!(granule = %self.name(), order = ?order, "Stacking bands");
        stack(axis, &views).map_err(|_| CompositeError::ShapeMismatch {
            expected: vec![views[0].nrows(), views[0].ncols()],
            found: views.iter().flat_map(|v| [v.nrows(), v.ncols()]).collect(),
        })
    }

    /// Drop every band array. Paths stay valid for reloading.
    pub fn free_resources(&mut self) {
        for band in self.bands.values_mut() {
            band.free();
        }
    }

    /// CRS of the granule, taken from its last band.
    pub fn crs(&self) -> Option<&str> {
        self.bands.values().last().map(|b| b.profile().crs.as_str())
    }

    pub fn reproject_bands(&mut self, target_crs: &str) -> Result<()> {
        let delete = !self.keep_resampled_sources;
        for (key, band) in self.bands.iter_mut() {
            band.reproject(target_crs, key.resampling(), delete)?;
        }
        Ok(())
    }

    /// Profile of the first band as loaded (cropped when a footprint is set).
    pub fn donor_profile(&self) -> Result<RasterProfile> {
        self.bands
            .values()
            .next()
            .ok_or(CompositeError::EmptySequence)?
            .data_profile()
    }

    /// Shape of every loaded band.
    pub fn grid_shape(&self) -> Result<(usize, usize)> {
        self.bands
            .values()
            .next()
            .ok_or(CompositeError::EmptySequence)?
            .shape()
    }
}

impl fmt::Display for Granule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.bands.keys().map(BandKey::as_str).collect();
        write!(
            f,
            "{} [{} {}] doy={} bands={}",
            self.name(),
            self.granule_type,
            self.resolution,
            self.doy,
            keys.join(",")
        )
    }
}

impl fmt::Debug for Granule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Granule")
            .field("path", &self.path)
            .field("resolution", &self.resolution)
            .field("doy", &self.doy)
            .field("bands", &self.bands)
            .finish()
    }
}

/// Candidate raster files per resolution.
fn find_images(path: &Path, granule_type: GranuleType, metadata: Option<&SafeMetadata>) -> Result<Candidates> {
    if let Some(meta) = metadata.filter(|m| !m.image_files.is_empty()) {
        let images: Vec<PathBuf> = meta.image_files.iter().map(|rel| path.join(rel)).collect();
        let candidates = partition_listed(images, granule_type);
        let listed_exist = SpatialResolution::ALL
            .iter()
            .filter_map(|r| candidates.get(r).and_then(|v| v.first()))
            .all(|p| p.is_file());
        if listed_exist {
            return Ok(candidates);
        }
        info!(granule = %path.display(), "Files listed in metadata do not exist, scanning the directory");
    }
    scan_directory(path)
}

/// Split a metadata image list into resolutions by position.
fn partition_listed(images: Vec<PathBuf>, granule_type: GranuleType) -> Candidates {
    let mut out = Candidates::new();
    match granule_type {
        GranuleType::L1C => {
            for r in SpatialResolution::ALL {
                out.insert(r, images.clone());
            }
        }
        GranuleType::L2A => {
            let end_10 = L2A_IMAGES_10M.min(images.len());
            let end_20 = (L2A_IMAGES_10M + L2A_IMAGES_20M).min(images.len());
            out.insert(SpatialResolution::R10, images[..end_10].to_vec());
            out.insert(SpatialResolution::R20, images[end_10..end_20].to_vec());
            out.insert(SpatialResolution::R60, images[end_20..].to_vec());
        }
    }
    out
}

fn resolution_token(path: &Path) -> Option<SpatialResolution> {
    let name = path.file_name()?.to_str()?;
    SpatialResolution::ALL
        .into_iter()
        .find(|r| name.contains(&format!("_{}m", r.meters())))
}

/// Recursive scan for `.jp2`, then `.tif` images.
fn scan_directory(path: &Path) -> Result<Candidates> {
    let mut files = Vec::new();
    for ext in ["jp2", "tif"] {
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|e| CompositeError::storage(path, e))?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|e| e.to_str()) == Some(ext)
            {
                files.push(entry.into_path());
            }
        }
        if !files.is_empty() {
            break;
        }
    }
    debug!(granule = %path.display(), count = files.len(), "Directory scan");

    let mut out = Candidates::new();
    for r in SpatialResolution::ALL {
        let bucket = files
            .iter()
            .filter(|f| resolution_token(f).map_or(true, |t| t == r))
            .cloned()
            .collect();
        out.insert(r, bucket);
    }
    Ok(out)
}

/// Map each desired key to a file, searching `resolution` first and then the
/// fallback resolutions.
fn resolve_bands(
    path: &Path,
    resolution: SpatialResolution,
    desired: &[BandKey],
    candidates: &Candidates,
) -> Result<BTreeMap<BandKey, PathBuf>> {
    let wanted: BTreeSet<&BandKey> = desired.iter().collect();
    let mut resolved = BTreeMap::new();
    for file in candidates.get(&resolution).into_iter().flatten() {
        if let Some(key) = BandKey::from_path(file) {
            if wanted.contains(&key) {
                resolved.insert(key, file.clone());
            }
        }
    }

    for key in desired {
        if resolved.contains_key(key) {
            continue;
        }
        let borrowed = resolution.fallback_order().find_map(|r| {
            candidates
                .get(&r)?
                .iter()
                .rev()
                .find(|f| BandKey::from_path(f).as_ref() == Some(key))
                .map(|f| (r, f.clone()))
        });
        match borrowed {
            Some((from, file)) => {
                info!(band = %key, from = %from, to = %resolution, "Band borrowed from another resolution");
                resolved.insert(key.clone(), file);
            }
            None => {
                return Err(CompositeError::MissingBand {
                    band: key.to_string(),
                    granule: path.to_path_buf(),
                })
            }
        }
    }
    Ok(resolved)
}
