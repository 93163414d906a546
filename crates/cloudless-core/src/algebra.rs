//! Decision signals and raster persistence over granules.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::band_key::BandKey;
use crate::consts::{NDVI_MASKED_SCORE, NDVI_TILE_SCALE};
use crate::error::{CompositeError, Result};
use crate::granule::Granule;
use crate::io::{Driver, RasterData, RasterIo, RasterProfile};
use crate::tiling::slice_raster;

/// Bands read by the NDVI quality mask.
pub const NDVI_BANDS: [BandKey; 4] = [BandKey::B02, BandKey::B04, BandKey::B8A, BandKey::Aot];

/// Elementwise `num / den`, zero where the denominator is zero or the quotient
/// is not finite.
pub fn safe_divide(num: ArrayView2<f32>, den: ArrayView2<f32>) -> Array2<f32> {
    Zip::from(num).and(den).map_collect(|&n, &d| {
        if d == 0.0 {
            return 0.0;
        }
        let q = n / d;
        if q.is_finite() {
            q
        } else {
            0.0
        }
    })
}

/// `(a - b) / (a + b)` over digital numbers, zero where `a + b == 0`.
pub fn normalized_difference(a: ArrayView2<u16>, b: ArrayView2<u16>) -> Array2<f32> {
    let a = a.mapv(f32::from);
    let b = b.mapv(f32::from);
    safe_divide((&a - &b).view(), (&a + &b).view())
}

fn band_pair(granule: &mut Granule, a: BandKey, b: BandKey) -> Result<Array2<f32>> {
    granule.load_bands(Some(&[a.clone(), b.clone()][..]))?;
    Ok(normalized_difference(granule.view(&a)?, granule.view(&b)?))
}

/// Vegetation index from near-infrared (B8A) and red (B04).
pub fn ndvi(granule: &mut Granule) -> Result<Array2<f32>> {
    band_pair(granule, BandKey::B8A, BandKey::B04)
}

/// Moisture index from near-infrared (B8A) and short-wave infrared (B11).
pub fn ndmi(granule: &mut Granule) -> Result<Array2<f32>> {
    band_pair(granule, BandKey::B8A, BandKey::B11)
}

/// Anthocyanin reflectance index `1/B03 - 1/B05`, reciprocals of zero are zero.
pub fn anthocyanin_index(granule: &mut Granule) -> Result<Array2<f32>> {
    granule.load_bands(Some(&[BandKey::B03, BandKey::B05][..]))?;
    let green = granule.view(&BandKey::B03)?;
    let red_edge = granule.view(&BandKey::B05)?;
    let recip = |v: u16| if v == 0 { 0.0 } else { 1.0 / v as f32 };
    Ok(Zip::from(green)
        .and(red_edge)
        .map_collect(|&g, &r| recip(g) - recip(r)))
}

/// Pixels with plausible reflectance for vegetation scoring:
/// `B02 > 100`, `B04 > 100`, `500 < B8A < 8000`, `AOT < 100`.
pub fn ndvi_quality_mask(granule: &mut Granule) -> Result<Array2<bool>> {
    granule.load_bands(Some(&NDVI_BANDS[..]))?;
    let blue = granule.view(&BandKey::B02)?;
    let red = granule.view(&BandKey::B04)?;
    let nir = granule.view(&BandKey::B8A)?;
    let aot = granule.view(&BandKey::Aot)?;
    Ok(Zip::from(blue)
        .and(red)
        .and(nir)
        .and(aot)
        .map_collect(|&b, &r, &n, &a| b > 100 && r > 100 && n > 500 && n < 8000 && a < 100))
}

/// NDVI with pixels failing [`ndvi_quality_mask`] set to -1.
pub fn masked_ndvi(granule: &mut Granule) -> Result<Array2<f32>> {
    let mask = ndvi_quality_mask(granule)?;
    let mut index = ndvi(granule)?;
    Zip::from(&mut index).and(&mask).for_each(|v, &ok| {
        if !ok {
            *v = NDVI_MASKED_SCORE;
        }
    });
    Ok(index)
}

/// Cloudy or unusable pixels from the scene classification: medium and high
/// probability cloud and thin cirrus (codes 8, 9, 10), plus no-data (0).
pub fn scl_cloud_mask(scl: ArrayView2<u16>) -> Array2<bool> {
    scl.mapv(|c| (c > 7 && c < 11) || c < 1)
}

/// Mean of each slice of a `(slices, h, w)` mask.
pub fn per_tile_cloud_fraction(mask: ArrayView3<f32>) -> Array1<f32> {
    let (_, h, w) = mask.dim();
    let area = (h * w).max(1) as f32;
    mask.axis_iter(Axis(0)).map(|slice| slice.sum() / area).collect()
}

/// Per-tile scoring used to rank a granule's blocks. Lower is better.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileDetector {
    /// Fraction of cloud/no-data pixels in the scene classification.
    #[default]
    Scl,
    /// `1.5 * (1 - NDVI)`, so the most vegetated block scores lowest.
    MaxNdvi,
}

impl TileDetector {
    /// Bands the detector reads.
    pub fn bands(self) -> Vec<BandKey> {
        match self {
            Self::Scl => vec![BandKey::Scl],
            Self::MaxNdvi => vec![BandKey::B04, BandKey::B8A],
        }
    }

    /// Per-pixel score over the whole grid.
    pub fn score(self, granule: &mut Granule) -> Result<Array2<f32>> {
        match self {
            Self::Scl => {
                let scl = granule.raster(&BandKey::Scl)?;
                Ok(scl_cloud_mask(scl.view()).mapv(|c| if c { 1.0 } else { 0.0 }))
            }
            Self::MaxNdvi => Ok(ndvi(granule)?.mapv(|v| NDVI_TILE_SCALE * (1.0 - v))),
        }
    }
}

/// Per-slice score of one granule under `detector`.
pub fn per_tile_cloud_index(granule: &mut Granule, detector: TileDetector) -> Result<Array1<f32>> {
    let score = detector.score(granule)?;
    let tiles = slice_raster(granule.slice_index(), score.view())?;
    let fractions = per_tile_cloud_fraction(tiles.view());
    debug!(granule = %granule.name(), doy = granule.doy(), tiles = fractions.len(), "Per-tile scores");
    Ok(fractions)
}

/// Persist `data` at `stem` plus the driver's extension, with the driver's
/// block and compression settings. Returns the written path.
pub fn save(
    io: &dyn RasterIo,
    data: RasterData<'_>,
    profile: &RasterProfile,
    driver: Driver,
    stem: &Path,
) -> Result<PathBuf> {
    let (_, h, w) = data.dim();
    if (h, w) != profile.shape() {
        return Err(CompositeError::ShapeMismatch {
            expected: vec![profile.height, profile.width],
            found: vec![h, w],
        });
    }
    let mut profile = profile.clone();
    profile.dtype = data.pixel_type();
    driver.configure(&mut profile);
    let path = PathBuf::from(format!("{}.{}", stem.display(), driver.extension()));
    io.write(&path, data, &profile)?;
    info!(path = %path.display(), "Raster saved");
    Ok(path)
}
