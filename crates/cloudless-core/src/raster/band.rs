use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{s, Array2};
use tracing::{debug, info};

use super::footprint::Footprint;
use super::resample::resize;
use crate::consts::NODATA_VALUE;
use crate::error::{CompositeError, Result};
use crate::io::{Driver, PixelType, RasterIo, RasterProfile, Resampling, Window};

/// Pixel residency of a band.
#[derive(Clone, Debug, Default)]
pub enum BandState {
    #[default]
    Unloaded,
    Loaded(Array2<u16>),
}

/// A single-band raster on disk with a lazily loaded pixel array.
pub struct RasterBand {
    path: PathBuf,
    profile: RasterProfile,
    footprint: Option<Footprint>,
    io: Arc<dyn RasterIo>,
    state: BandState,
}

impl RasterBand {
    /// Open a band. Only the profile is read; pixels wait for [`load`](Self::load).
    pub fn open(path: impl Into<PathBuf>, io: Arc<dyn RasterIo>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(CompositeError::FileNotFound(path));
        }
        let profile = io.profile(&path)?;
        Ok(Self {
            path,
            profile,
            footprint: None,
            io,
            state: BandState::Unloaded,
        })
    }

    /// Crop every subsequent load to `footprint`.
    pub fn with_footprint(mut self, footprint: Option<Footprint>) -> Self {
        self.footprint = footprint;
        self.state = BandState::Unloaded;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Profile of the file on disk.
    pub fn profile(&self) -> &RasterProfile {
        &self.profile
    }

    pub fn footprint(&self) -> Option<&Footprint> {
        self.footprint.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, BandState::Loaded(_))
    }

    fn crop_window(&self) -> Result<Option<Window>> {
        match &self.footprint {
            None => Ok(None),
            Some(fp) => fp.window(&self.profile).map(Some).ok_or_else(|| {
                CompositeError::Config(format!(
                    "footprint does not overlap {}",
                    self.path.display()
                ))
            }),
        }
    }

    /// Shape of the array [`load`](Self::load) produces.
    pub fn shape(&self) -> Result<(usize, usize)> {
        Ok(match self.crop_window()? {
            Some(w) => (w.height, w.width),
            None => self.profile.shape(),
        })
    }

    /// Profile matching the loaded array (cropped when a footprint is set).
    pub fn data_profile(&self) -> Result<RasterProfile> {
        Ok(match self.crop_window()? {
            Some(w) => self.profile.windowed(w),
            None => self.profile.clone(),
        })
    }

    /// Read the band once; later calls return the cached array.
    pub fn load(&mut self) -> Result<&Array2<u16>> {
        if let BandState::Unloaded = self.state {
            let data = match self.crop_window()? {
                Some(window) => {
                    let mut data = self.io.read_window(&self.path, window)?;
                    if let Some(fp) = &self.footprint {
                        let inside = fp.mask(&self.profile, window);
                        data.zip_mut_with(&inside, |v, &keep| {
                            if !keep {
                                *v = NODATA_VALUE;
                            }
                        });
                    }
                    data
                }
                None => self.io.read(&self.path)?.0,
            };
            debug!(path = %self.path.display(), shape = ?data.dim(), "Band loaded");
            self.state = BandState::Loaded(data);
        }
        match &self.state {
            BandState::Loaded(data) => Ok(data),
            BandState::Unloaded => Err(CompositeError::storage(&self.path, "band is not loaded")),
        }
    }

    /// Pixels of `window`, in the coordinates of the loaded array. Served from
    /// the cache when loaded, read from disk otherwise.
    pub fn read_block(&self, window: Window) -> Result<Array2<u16>> {
        let (h, w) = self.shape()?;
        if window.row_off + window.height > h || window.col_off + window.width > w {
            return Err(CompositeError::ShapeMismatch {
                expected: vec![h, w],
                found: vec![window.row_off + window.height, window.col_off + window.width],
            });
        }
        if let BandState::Loaded(data) = &self.state {
            return Ok(data
                .slice(s![
                    window.row_off..window.row_off + window.height,
                    window.col_off..window.col_off + window.width
                ])
                .to_owned());
        }
        let Some(crop) = self.crop_window()? else {
            return self.io.read_window(&self.path, window);
        };
        let absolute = Window::new(
            crop.row_off + window.row_off,
            crop.col_off + window.col_off,
            window.height,
            window.width,
        );
        let mut data = self.io.read_window(&self.path, absolute)?;
        if let Some(fp) = &self.footprint {
            let inside = fp.mask(&self.profile, absolute);
            data.zip_mut_with(&inside, |v, &keep| {
                if !keep {
                    *v = NODATA_VALUE;
                }
            });
        }
        Ok(data)
    }

    /// Cached array, if loaded.
    pub fn data(&self) -> Option<&Array2<u16>> {
        match &self.state {
            BandState::Loaded(data) => Some(data),
            BandState::Unloaded => None,
        }
    }

    /// Resample by `factor` into a new GeoTIFF next to the source and switch this
    /// band over to it. The source file is removed unless `keep_source`.
    pub fn resample(&mut self, factor: f64, kernel: Resampling, keep_source: bool) -> Result<()> {
        let (h, w) = self.profile.shape();
        let height = (h as f64 * factor).round() as usize;
        let width = (w as f64 * factor).round() as usize;
        if height == 0 || width == 0 {
            return Err(CompositeError::Config(format!("resample factor {factor} is too small")));
        }
        let (source, _) = self.io.read(&self.path)?;
        let resampled = resize(source.view(), (height, width), kernel)?;

        let mut profile = self.profile.resized(height, width);
        profile.dtype = PixelType::U16;
        Driver::GTiff.configure(&mut profile);
        let stem = self.path.file_stem().and_then(|s| s.to_str()).unwrap_or("band");
        let target = self.path.with_file_name(format!("{stem}_r{width}.{}", Driver::GTiff.extension()));
        self.io.write(&target, resampled.view().into(), &profile)?;
        info!(from = %self.path.display(), to = %target.display(), factor, "Band resampled");

        if !keep_source {
            std::fs::remove_file(&self.path)?;
        }
        self.path = target;
        self.profile = profile;
        self.state = match self.footprint {
            None => BandState::Loaded(resampled),
            Some(_) => BandState::Unloaded,
        };
        Ok(())
    }

    /// Warp the band into `target_crs`. No-op when already there.
    pub fn reproject(&mut self, target_crs: &str, kernel: Resampling, delete_source: bool) -> Result<()> {
        if target_crs.is_empty() || self.profile.crs == target_crs {
            return Ok(());
        }
        let stem = self.path.file_stem().and_then(|s| s.to_str()).unwrap_or("band");
        let suffix: String = target_crs
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let target = self.path.with_file_name(format!("{stem}_{suffix}.{}", Driver::GTiff.extension()));
        let profile = self.io.reproject(&self.path, &target, target_crs, kernel)?;
        info!(from = %self.profile.crs, to = target_crs, path = %target.display(), "Band reprojected");
        if delete_source {
            std::fs::remove_file(&self.path)?;
        }
        self.path = target;
        self.profile = profile;
        self.state = BandState::Unloaded;
        Ok(())
    }

    /// Drop the pixel array. The file stays on disk and can be reloaded.
    pub fn free(&mut self) {
        self.state = BandState::Unloaded;
    }

    pub fn greater_than(&mut self, threshold: u16) -> Result<Array2<bool>> {
        Ok(self.load()?.mapv(|v| v > threshold))
    }

    pub fn less_than(&mut self, threshold: u16) -> Result<Array2<bool>> {
        Ok(self.load()?.mapv(|v| v < threshold))
    }
}

impl fmt::Debug for RasterBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBand")
            .field("path", &self.path)
            .field("shape", &self.profile.shape())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
