mod common;

use std::sync::Arc;

use cloudless_core::band_key::BandKey;
use cloudless_core::cloud::{cloud_probability_layer, CloudDetector};
use cloudless_core::consts::CLOUD_NODATA;
use cloudless_core::error::{CompositeError, Result};
use cloudless_core::granule::{Granule, GranuleOptions, GranuleType};
use cloudless_core::io::{GeoTiffIo, RasterIo, Window};
use cloudless_core::raster::Footprint;
use cloudless_core::resolution::SpatialResolution;
use common::*;
use ndarray::{s, Array2, ArrayView3};

fn io() -> Arc<dyn RasterIo> {
    Arc::new(GeoTiffIo::new())
}

fn open(path: &std::path::Path, keys: &[BandKey], options: &GranuleOptions) -> Result<Granule> {
    Granule::open(path, SpatialResolution::R60, keys, 1, options, io())
}

#[test]
fn nonexistent_dataset() {
    let err = open(std::path::Path::new("/nonexistent/S2A.SAFE"), &[BandKey::B04], &GranuleOptions::default())
        .unwrap_err();
    assert!(matches!(err, CompositeError::FileNotFound(_)));
}

#[test]
fn single_raster_is_not_enough() {
    let (_tmp, dir) = tile_dir();
    let safe = write_safe(&dir, "20201108", &[(BandKey::B04, constant(1))]);
    let err = open(&safe, &[BandKey::B04], &GranuleOptions::default()).unwrap_err();
    assert!(matches!(err, CompositeError::NotEnoughRasters { found: 1, .. }));
}

#[test]
fn missing_band_is_fatal() {
    let (_tmp, dir) = tile_dir();
    let safe = write_safe(&dir, "20201108", &[(BandKey::B02, constant(1)), (BandKey::B04, constant(2))]);
    let err = open(&safe, &[BandKey::B04, BandKey::B11], &GranuleOptions::default()).unwrap_err();
    assert!(matches!(err, CompositeError::MissingBand { ref band, .. } if band == "B11"));
}

#[test]
fn metadata_and_stacking() {
    let (_tmp, dir) = tile_dir();
    let safe = write_safe(
        &dir,
        "20201108",
        &[(BandKey::B02, constant(2)), (BandKey::B03, constant(3)), (BandKey::B04, constant(4))],
    );
    let mut granule = open(&safe, &[BandKey::B04, BandKey::B02], &GranuleOptions::default()).unwrap();
    assert_eq!(granule.doy(), 313);
    assert_eq!(granule.cloud_coverage(), Some(10.0));
    assert_eq!(granule.tile_id().as_deref(), Some("T33UXQ"));
    assert_eq!(granule.granule_type(), GranuleType::L2A);
    assert_eq!(granule.band_keys(), vec![BandKey::B02, BandKey::B04]);
    assert!(!granule.contains(&BandKey::B03));
    assert_eq!(granule.crs(), Some("EPSG:32633"));

    let stack = granule.stack(Some(&[BandKey::B04, BandKey::B02][..]), false).unwrap();
    assert_eq!(stack.dim(), (2, GRID, GRID));
    assert_eq!(stack[[0, 0, 0]], 4);
    assert_eq!(stack[[1, 0, 0]], 2);

    let cube = granule.stack(Some(&[BandKey::B02, BandKey::B04][..]), true).unwrap();
    assert_eq!(cube.dim(), (GRID, GRID, 2));
    assert_eq!(cube[[5, 5, 1]], 4);

    assert!(granule.get(&BandKey::B04).unwrap().is_loaded());
    granule.free_resources();
    assert!(!granule.get(&BandKey::B04).unwrap().is_loaded());
    assert_eq!(granule.raster(&BandKey::B04).unwrap()[[0, 0]], 4);
}

#[test]
fn band_lookup_and_thresholds() {
    let (_tmp, dir) = tile_dir();
    let safe = write_safe(&dir, "20201108", &[(BandKey::B02, constant(2)), (BandKey::B04, gradient(100, 50))]);
    let mut granule = open(&safe, &[BandKey::B04, BandKey::B02], &GranuleOptions::default()).unwrap();

    let err = granule.get_mut(&BandKey::B11).unwrap_err();
    assert!(matches!(err, CompositeError::MissingBand { ref band, ref granule } if band == "B11" && granule == &safe));

    let band = granule.get_mut(&BandKey::B04).unwrap();
    let above = band.greater_than(120).unwrap();
    let below = band.less_than(120).unwrap();
    assert!(band.is_loaded());
    let data = band.data().unwrap().clone();
    assert_eq!(above.dim(), (GRID, GRID));
    assert!(above.indexed_iter().all(|(ix, &hit)| hit == (data[ix] > 120)));
    assert!(below.indexed_iter().all(|(ix, &hit)| hit == (data[ix] < 120)));
    // Neither strict comparison holds at the threshold itself.
    let at = data.iter().filter(|&&v| v == 120).count();
    let either = above.iter().zip(below.iter()).filter(|(a, b)| **a || **b).count();
    assert_eq!(either + at, GRID * GRID);
}

#[test]
fn missing_metadata_gives_unknown_date() {
    let (_tmp, dir) = tile_dir();
    let safe = write_safe(&dir, "20201108", &[(BandKey::B02, constant(2)), (BandKey::B04, constant(4))]);
    std::fs::remove_file(safe.join("MTD_MSIL2A.xml")).unwrap();
    let granule = open(&safe, &[BandKey::B04], &GranuleOptions::default()).unwrap();
    assert_eq!(granule.doy(), 0);
    assert!(granule.data_take().is_none());
}

#[test]
fn borrowed_band_is_resampled_onto_the_grid() {
    let (_tmp, dir) = tile_dir();
    let safe = write_safe(&dir, "20201108", &[(BandKey::B02, constant(2)), (BandKey::B04, constant(4))]);
    let r20 = safe.join("GRANULE").join("L2A_T33UXQ").join("IMG_DATA").join("R20m");
    std::fs::create_dir_all(&r20).unwrap();
    let source = r20.join("T33UXQ_20201108T095221_B11_20m.tif");
    write_band(&source, &Array2::from_elem((GRID / 2, GRID / 2), 700u16));

    let mut granule = open(&safe, &[BandKey::B04, BandKey::B11], &GranuleOptions::default()).unwrap();
    let band = granule.get(&BandKey::B11).unwrap();
    assert_eq!(band.profile().shape(), (GRID, GRID));
    assert!(band.path().to_string_lossy().ends_with("_r1830.tif"));
    assert!(!source.exists());
    let data = granule.raster(&BandKey::B11).unwrap();
    assert!(data.iter().all(|&v| (699..=701).contains(&v)));
}

#[test]
fn resampled_sources_can_be_kept() {
    let (_tmp, dir) = tile_dir();
    let safe = write_safe(&dir, "20201108", &[(BandKey::B02, constant(2)), (BandKey::B04, constant(4))]);
    let index = dir.join("NDVI_half.tif");
    write_band(&index, &Array2::from_elem((GRID / 2, GRID / 2), 9u16));

    let options = GranuleOptions {
        keep_resampled_sources: true,
        ..GranuleOptions::default()
    };
    let mut granule = open(&safe, &[BandKey::B04], &options).unwrap();
    let key = BandKey::Other("NDVI".into());
    granule.add_band(&index, key.clone()).unwrap();
    assert!(index.exists());
    assert_eq!(granule.raster(&key).unwrap().dim(), (GRID, GRID));
}

#[test]
fn footprint_crops_loads_and_blocks() {
    let (_tmp, dir) = tile_dir();
    let red = Array2::from_shape_fn((GRID, GRID), |(r, c)| (r + c) as u16 + 1);
    let safe = write_safe(&dir, "20201108", &[(BandKey::B02, constant(2)), (BandKey::B04, red.clone())]);
    let (x0, y0) = (600_000.0, 5_600_040.0);
    // Triangle over rows/cols 10..20: the lower-left half stays.
    let footprint = Footprint::new(vec![
        [x0 + 600.0, y0 - 600.0],
        [x0 + 600.0, y0 - 1_200.0],
        [x0 + 1_200.0, y0 - 1_200.0],
    ])
    .unwrap();
    let options = GranuleOptions {
        footprint: Some(footprint),
        ..GranuleOptions::default()
    };
    let mut granule = open(&safe, &[BandKey::B04, BandKey::B02], &options).unwrap();
    assert_eq!(granule.grid_shape().unwrap(), (10, 10));
    let profile = granule.donor_profile().unwrap();
    assert_eq!(profile.transform.origin(), (x0 + 600.0, y0 - 600.0));

    let band = granule.get(&BandKey::B04).unwrap();
    let block = band.read_block(Window::new(5, 0, 5, 10)).unwrap();
    assert_eq!(block[[4, 0]], red[[19, 10]]);
    assert_eq!(block[[0, 9]], 0);

    let data = granule.raster(&BandKey::B04).unwrap().clone();
    assert_eq!(data.dim(), (10, 10));
    assert_eq!(data[[9, 0]], red[[19, 10]]);
    assert_eq!(data[[0, 9]], 0);
    assert_eq!(data.slice(s![5.., ..]), block);
}

struct HalfCloudy;

impl CloudDetector for HalfCloudy {
    fn input_bands(&self) -> Vec<BandKey> {
        vec![BandKey::B02, BandKey::B04]
    }

    fn predict(&self, cube: ArrayView3<f32>) -> Result<Array2<f32>> {
        let (h, w, _) = cube.dim();
        Ok(Array2::from_elem((h / 6, w / 6), 0.5))
    }
}

#[test]
fn cloud_layer_is_registered() {
    let (_tmp, dir) = tile_dir();
    let mut blue = constant(300);
    blue.slice_mut(s![..6, ..6]).fill(0);
    let mut red = constant(300);
    red.slice_mut(s![..6, ..6]).fill(0);
    let safe = write_safe(&dir, "20201108", &[(BandKey::B02, blue), (BandKey::B04, red)]);
    let mut granule = open(&safe, &[BandKey::B02, BandKey::B04], &GranuleOptions::default()).unwrap();

    let io = GeoTiffIo::new();
    let path = cloud_probability_layer(&mut granule, &HalfCloudy, &io, &dir).unwrap();
    assert!(path.is_file());
    assert!(granule.contains(&BandKey::Cld));
    let cld = granule.raster(&BandKey::Cld).unwrap();
    assert_eq!(cld.dim(), (GRID, GRID));
    assert_eq!(cld[[0, 0]], CLOUD_NODATA as u16);
    assert_eq!(cld[[100, 100]], 127);
}
