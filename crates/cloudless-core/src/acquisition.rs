//! Locating Sentinel-2 products for a composite job.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CompositeError, Result};
use crate::granule::GranuleType;
use crate::io::metadata::SafeMetadata;
use crate::raster::Footprint;

/// Shortest search window that usually still finds a cloud-free acquisition.
const MIN_RECOMMENDED_DAYS: i64 = 5;

/// Default accepted scene cloud coverage, in percent.
pub const DEFAULT_CLOUD_COVERAGE: (f64, f64) = (0.0, 95.0);

/// Connection settings of a product source.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Hub endpoint used by remote sources.
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Where products are (or get) stored. [`LocalArchive`] searches here.
    pub download_dir: PathBuf,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://scihub.copernicus.eu/dhus".into(),
            username: None,
            password: None,
            download_dir: PathBuf::from("."),
        }
    }
}

/// What to look for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Five character MGRS tiles without the `T` prefix, e.g. `33UXQ`.
    #[serde(default)]
    pub tiles: Vec<String>,
    /// Accepted scene cloud coverage `(min, max)` in percent.
    #[serde(default = "default_cloud_coverage")]
    pub cloud_coverage: (f64, f64),
    #[serde(default)]
    pub product: GranuleType,
    /// Area of interest as `[lon, lat]` vertices.
    #[serde(default)]
    pub polygon: Option<Footprint>,
}

fn default_cloud_coverage() -> (f64, f64) {
    DEFAULT_CLOUD_COVERAGE
}

fn tile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{1,2}[A-Z]{0,3}$").expect("tile pattern is valid"))
}

/// Whether `tile` is a five character MGRS square such as `33UXQ`.
pub fn is_valid_tile(tile: &str) -> bool {
    tile.len() == 5 && tile_pattern().is_match(tile)
}

impl SearchCriteria {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            tiles: Vec::new(),
            cloud_coverage: DEFAULT_CLOUD_COVERAGE,
            product: GranuleType::default(),
            polygon: None,
        }
    }

    pub fn with_tiles<I, S>(mut self, tiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tiles = tiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cloud_coverage(mut self, min: f64, max: f64) -> Self {
        self.cloud_coverage = (min, max);
        self
    }

    pub fn with_product(mut self, product: GranuleType) -> Self {
        self.product = product;
        self
    }

    pub fn with_polygon(mut self, polygon: Footprint) -> Self {
        self.polygon = Some(polygon);
        self
    }

    /// Reject inconsistent criteria. Malformed tiles are dropped with a warning.
    pub fn validate(&mut self) -> Result<()> {
        if self.start > self.end {
            return Err(CompositeError::Config(format!(
                "search starts after it ends ({} > {})",
                self.start, self.end
            )));
        }
        if (self.end - self.start).num_days() < MIN_RECOMMENDED_DAYS {
            warn!(
                start = %self.start,
                end = %self.end,
                "Short search window, consider extending it"
            );
        }

        let (min, max) = self.cloud_coverage;
        if !(0.0..=100.0).contains(&min) || !(0.0..=100.0).contains(&max) || min > max {
            return Err(CompositeError::Config(format!(
                "invalid cloud coverage bounds [{min}, {max}]"
            )));
        }

        self.tiles.retain(|tile| {
            let ok = is_valid_tile(tile);
            if !ok {
                warn!(tile = %tile, "Wrong tile format, skipping");
            }
            ok
        });
        if self.tiles.is_empty() && self.polygon.is_none() {
            return Err(CompositeError::Config(
                "no area of interest, give a polygon or at least one tile".into(),
            ));
        }
        Ok(())
    }
}

/// A source of Sentinel-2 products.
pub trait Acquisition {
    /// Product directories matching `criteria`, sorted by name.
    fn search(&self, criteria: &SearchCriteria) -> Result<Vec<PathBuf>>;
}

/// Fields encoded in a SAFE product name such as
/// `S2A_MSIL2A_20201108T095221_N0214_R079_T33UXQ_20201108T120214.SAFE`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafeName {
    pub mission: String,
    pub level: GranuleType,
    pub sensing: NaiveDateTime,
    pub relative_orbit: u16,
    /// Tile without the `T` prefix.
    pub tile: String,
}

fn safe_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(S2[ABCD])_MSI(L1C|L2A)_(\d{8}T\d{6})_N\d{4}_R(\d{3})_T(\d{2}[A-Z]{3})_\d{8}T\d{6}(\.SAFE)?$",
        )
        .expect("SAFE name pattern is valid")
    })
}

impl SafeName {
    pub fn parse(name: &str) -> Option<Self> {
        let caps = safe_name_pattern().captures(name)?;
        Some(Self {
            mission: caps[1].to_string(),
            level: caps[2].parse().ok()?,
            sensing: NaiveDateTime::parse_from_str(&caps[3], "%Y%m%dT%H%M%S").ok()?,
            relative_orbit: caps[4].parse().ok()?,
            tile: caps[5].to_string(),
        })
    }
}

/// Products already on disk under one directory.
#[derive(Clone, Debug)]
pub struct LocalArchive {
    root: PathBuf,
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self::new(&config.download_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn matches(&self, path: &Path, name: &SafeName, criteria: &SearchCriteria) -> bool {
        let date = name.sensing.date();
        if name.level != criteria.product || date < criteria.start || date > criteria.end {
            return false;
        }
        if !criteria.tiles.is_empty() && !criteria.tiles.iter().any(|t| *t == name.tile) {
            return false;
        }

        let metadata = match SafeMetadata::parse(&path.join(name.level.metadata_file_name())) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(product = %path.display(), error = %e, "Unreadable metadata, filtering by name only");
                None
            }
        };
        let Some(meta) = metadata else {
            return true;
        };

        if let Some(cc) = meta.cloud_coverage {
            let (min, max) = criteria.cloud_coverage;
            if cc < min || cc > max {
                debug!(product = %path.display(), cloud_coverage = cc, "Rejected by cloud coverage");
                return false;
            }
        }
        if let Some(polygon) = &criteria.polygon {
            if meta.footprint.len() >= 3 && !bounds_overlap(polygon.bounds(), &meta.footprint) {
                debug!(product = %path.display(), "Rejected by area of interest");
                return false;
            }
        }
        true
    }
}

/// Whether `(min_x, min_y, max_x, max_y)` overlaps the bounding box of `vertices`.
fn bounds_overlap((min_x, min_y, max_x, max_y): (f64, f64, f64, f64), vertices: &[[f64; 2]]) -> bool {
    let (mut lo_x, mut lo_y) = (f64::INFINITY, f64::INFINITY);
    let (mut hi_x, mut hi_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &[x, y] in vertices {
        lo_x = lo_x.min(x);
        lo_y = lo_y.min(y);
        hi_x = hi_x.max(x);
        hi_y = hi_y.max(y);
    }
    min_x <= hi_x && lo_x <= max_x && min_y <= hi_y && lo_y <= max_y
}

impl Acquisition for LocalArchive {
    fn search(&self, criteria: &SearchCriteria) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(CompositeError::FileNotFound(self.root.clone()));
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(name) = SafeName::parse(file_name) else {
                debug!(path = %path.display(), "Not a SAFE product name, skipping");
                continue;
            };
            if self.matches(&path, &name, criteria) {
                found.push(path);
            }
        }
        found.sort();
        info!(root = %self.root.display(), products = found.len(), "Local archive searched");
        Ok(found)
    }
}
