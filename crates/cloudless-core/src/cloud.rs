//! Cloud-probability layers from an external inference model.

use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView3, Axis, Zip};
use tracing::info;

use crate::algebra;
use crate::band_key::BandKey;
use crate::consts::{CLOUD_MAX_PROBABILITY, CLOUD_NODATA, REFLECTANCE_SCALE};
use crate::error::{CompositeError, Result};
use crate::granule::Granule;
use crate::io::{Driver, RasterData, RasterIo};
use crate::raster::resample::upsample_nearest;

/// Per-pixel cloud inference.
pub trait CloudDetector: Send + Sync {
    /// Bands stacked, in this order, into the cube given to [`predict`](Self::predict).
    fn input_bands(&self) -> Vec<BandKey>;

    /// Cloud probability in `[0, 1]` for an `(h, w, bands)` reflectance cube.
    /// The output grid may be coarser than the input.
    fn predict(&self, cube: ArrayView3<f32>) -> Result<Array2<f32>>;
}

/// Quantise a probability to `0..=254`.
pub fn probability_code(p: f32) -> u8 {
    if !p.is_finite() {
        return CLOUD_NODATA;
    }
    (p.clamp(0.0, 1.0) * CLOUD_MAX_PROBABILITY as f32).round() as u8
}

/// Run `detector` on `granule`, write the result as a `CLD` layer in `out_dir`
/// and register it on the granule. Pixels where every input band is zero get
/// [`CLOUD_NODATA`].
pub fn cloud_probability_layer(
    granule: &mut Granule,
    detector: &dyn CloudDetector,
    io: &dyn RasterIo,
    out_dir: &Path,
) -> Result<PathBuf> {
    let keys = detector.input_bands();
    let cube = granule.stack(Some(keys.as_slice()), true)?;
    let (h, w, _) = cube.dim();
    let reflectance = cube.mapv(|dn| dn as f32 / REFLECTANCE_SCALE);
    let probability = detector.predict(reflectance.view())?;
    if probability.is_empty() {
        return Err(CompositeError::ShapeMismatch {
            expected: vec![h, w],
            found: vec![0, 0],
        });
    }
    let probability = upsample_nearest(probability.view(), (h, w));

    let mut codes = probability.mapv(probability_code);
    Zip::from(&mut codes)
        .and(cube.lanes(Axis(2)))
        .for_each(|code, bands| {
            if bands.iter().all(|&v| v == 0) {
                *code = CLOUD_NODATA;
            }
        });

    let profile = granule.donor_profile()?;
    let stem = out_dir.join(format!("{}_{}", granule.name(), BandKey::Cld));
    let path = algebra::save(io, RasterData::from(codes.view()), &profile, Driver::GTiff, &stem)?;
    granule.add_aligned_band(&path, BandKey::Cld)?;
    info!(granule = %granule.name(), path = %path.display(), "Cloud probability layer ready");
    Ok(path)
}
