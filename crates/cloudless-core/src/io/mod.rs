pub mod geotiff;
pub mod metadata;
pub mod quicklook;

use std::path::Path;

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::consts::GTIFF_BLOCK_SIZE;
use crate::error::Result;

pub use geotiff::GeoTiffIo;

/// GDAL-style affine geotransform:
/// `x = t[0] + col * t[1] + row * t[2]`, `y = t[3] + col * t[4] + row * t[5]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    pub fn pixel_size(&self) -> (f64, f64) {
        (self.0[1], self.0[5])
    }

    /// Map-space coordinate of the top-left corner of pixel `(row, col)`.
    pub fn apply(&self, row: f64, col: f64) -> (f64, f64) {
        let t = &self.0;
        (
            t[0] + col * t[1] + row * t[2],
            t[3] + col * t[4] + row * t[5],
        )
    }

    /// Inverse of [`apply`](Self::apply) for north-up transforms: `(row, col)`.
    pub fn invert(&self, x: f64, y: f64) -> (f64, f64) {
        let t = &self.0;
        ((y - t[3]) / t[5], (x - t[0]) / t[1])
    }

    /// Transform for a raster resized by `(fy, fx)` covering the same extent.
    pub fn scaled(&self, fy: f64, fx: f64) -> Self {
        let t = self.0;
        Self([t[0], t[1] / fx, t[2] / fy, t[3], t[4] / fx, t[5] / fy])
    }

    /// Transform for a window starting at `(row, col)`.
    pub fn offset(&self, row: usize, col: usize) -> Self {
        let (x, y) = self.apply(row as f64, col as f64);
        let t = self.0;
        Self([x, t[1], t[2], y, t[4], t[5]])
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self([0.0, 1.0, 0.0, 0.0, 0.0, -1.0])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelType {
    U8,
    U16,
    F32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    #[default]
    Lzw,
    Deflate,
    Jpeg,
}

/// Geospatial description of a raster on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RasterProfile {
    /// Authority string, e.g. `EPSG:32633`.
    pub crs: String,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    pub dtype: PixelType,
    /// `(width, height)` of storage blocks, if the file is blocked.
    pub block_size: Option<(u32, u32)>,
    pub compression: Compression,
    pub nodata: Option<f64>,
    /// Decimation factors of reduced-resolution copies stored with the raster.
    #[serde(default)]
    pub overviews: Vec<u32>,
}

impl RasterProfile {
    pub fn new(crs: impl Into<String>, transform: GeoTransform, width: usize, height: usize) -> Self {
        Self {
            crs: crs.into(),
            transform,
            width,
            height,
            dtype: PixelType::U16,
            block_size: None,
            compression: Compression::default(),
            nodata: None,
            overviews: Vec::new(),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Same footprint, resized grid.
    pub fn resized(&self, height: usize, width: usize) -> Self {
        let fy = height as f64 / self.height as f64;
        let fx = width as f64 / self.width as f64;
        Self {
            transform: self.transform.scaled(fy, fx),
            width,
            height,
            ..self.clone()
        }
    }

    /// Profile of a sub-window of this raster.
    pub fn windowed(&self, window: Window) -> Self {
        Self {
            transform: self.transform.offset(window.row_off, window.col_off),
            width: window.width,
            height: window.height,
            ..self.clone()
        }
    }
}

/// Rectangular pixel window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub row_off: usize,
    pub col_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(row_off: usize, col_off: usize, height: usize, width: usize) -> Self {
        Self {
            row_off,
            col_off,
            width,
            height,
        }
    }

    pub fn full(height: usize, width: usize) -> Self {
        Self::new(0, 0, height, width)
    }
}

/// Partition an `(height, width)` grid into windows of at most `block` pixels per
/// side, row-major.
pub fn block_windows(height: usize, width: usize, block: usize) -> Vec<Window> {
    let block = block.max(1);
    let mut windows = Vec::new();
    for row_off in (0..height).step_by(block) {
        for col_off in (0..width).step_by(block) {
            windows.push(Window::new(
                row_off,
                col_off,
                block.min(height - row_off),
                block.min(width - col_off),
            ));
        }
    }
    windows
}

/// Interpolation kernel used when resizing or warping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resampling {
    Nearest,
    Bilinear,
}

/// Borrowed pixel data to persist, shaped `(bands, rows, cols)`.
#[derive(Clone, Copy, Debug)]
pub enum RasterData<'a> {
    U8(ArrayView3<'a, u8>),
    U16(ArrayView3<'a, u16>),
    F32(ArrayView3<'a, f32>),
}

impl<'a> RasterData<'a> {
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            Self::U8(a) => a.dim(),
            Self::U16(a) => a.dim(),
            Self::F32(a) => a.dim(),
        }
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            Self::U8(_) => PixelType::U8,
            Self::U16(_) => PixelType::U16,
            Self::F32(_) => PixelType::F32,
        }
    }
}

impl<'a> From<ArrayView2<'a, u16>> for RasterData<'a> {
    fn from(a: ArrayView2<'a, u16>) -> Self {
        Self::U16(a.insert_axis(Axis(0)))
    }
}

impl<'a> From<ArrayView2<'a, u8>> for RasterData<'a> {
    fn from(a: ArrayView2<'a, u8>) -> Self {
        Self::U8(a.insert_axis(Axis(0)))
    }
}

impl<'a> From<ArrayView2<'a, f32>> for RasterData<'a> {
    fn from(a: ArrayView2<'a, f32>) -> Self {
        Self::F32(a.insert_axis(Axis(0)))
    }
}

impl<'a> From<ArrayView3<'a, u16>> for RasterData<'a> {
    fn from(a: ArrayView3<'a, u16>) -> Self {
        Self::U16(a)
    }
}

impl<'a> From<ArrayView3<'a, u8>> for RasterData<'a> {
    fn from(a: ArrayView3<'a, u8>) -> Self {
        Self::U8(a)
    }
}

/// Output format selector for persisted rasters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Driver {
    /// Tiled GeoTIFF, LZW compressed. Default for derived products.
    #[default]
    GTiff,
    /// JPEG2000, for outputs that mimic source imagery.
    Jp2OpenJpeg,
}

impl Driver {
    pub fn extension(self) -> &'static str {
        match self {
            Self::GTiff => "tif",
            Self::Jp2OpenJpeg => "jp2",
        }
    }

    /// Apply the driver's storage settings to a profile.
    pub fn configure(self, profile: &mut RasterProfile) {
        profile.overviews.clear();
        match self {
            Self::GTiff => {
                profile.compression = Compression::Lzw;
                profile.block_size = Some((GTIFF_BLOCK_SIZE, GTIFF_BLOCK_SIZE));
            }
            Self::Jp2OpenJpeg => {
                profile.compression = Compression::None;
                profile.block_size = Some((1024, 1024));
            }
        }
    }
}

/// Raster storage collaborator.
///
/// All pixel acquisition and persistence goes through this trait so the engine
/// can run against any backend (GeoTIFF, GDAL, in-memory).
pub trait RasterIo: Send + Sync {
    /// Read only the geospatial profile of a raster.
    fn profile(&self, path: &Path) -> Result<RasterProfile>;

    /// Read band 1 as digital numbers.
    fn read(&self, path: &Path) -> Result<(Array2<u16>, RasterProfile)>;

    /// Read a window of band 1.
    fn read_window(&self, path: &Path, window: Window) -> Result<Array2<u16>>;

    /// Write one or more bands with the given profile.
    fn write(&self, path: &Path, data: RasterData<'_>, profile: &RasterProfile) -> Result<()>;

    /// Warp `src` into `target_crs`, writing `dst`. Returns the new profile.
    fn reproject(
        &self,
        src: &Path,
        dst: &Path,
        target_crs: &str,
        resampling: Resampling,
    ) -> Result<RasterProfile>;
}
