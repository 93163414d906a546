mod common;

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use cloudless_core::algebra::{
    anthocyanin_index, masked_ndvi, ndmi, ndvi, normalized_difference, per_tile_cloud_fraction, per_tile_cloud_index,
    safe_divide, save, scl_cloud_mask, TileDetector,
};
use cloudless_core::band_key::BandKey;
use cloudless_core::granule::{Granule, GranuleOptions};
use cloudless_core::io::{Driver, GeoTiffIo, RasterIo};
use cloudless_core::resolution::SpatialResolution;
use common::*;
use ndarray::{array, s, Array3};

#[test]
fn zero_over_zero_is_zero() {
    let nir = array![[0u16, 3000], [0, 100]];
    let red = array![[0u16, 1000], [100, 0]];
    let index = normalized_difference(nir.view(), red.view());
    assert_eq!(index[[0, 0]], 0.0);
    assert_abs_diff_eq!(index[[0, 1]], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(index[[1, 0]], -1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(index[[1, 1]], 1.0, epsilon = 1e-6);
    assert!(index.iter().all(|v| v.is_finite()));
}

#[test]
fn safe_divide_never_produces_non_finite() {
    let num = array![[1.0f32, f32::MAX], [0.0, -2.0]];
    let den = array![[0.0f32, f32::MIN_POSITIVE], [0.0, 4.0]];
    let q = safe_divide(num.view(), den.view());
    assert_eq!(q, array![[0.0, 0.0], [0.0, -0.5]]);
}

#[test]
fn scl_open_interval_and_nodata() {
    let scl = array![[0u16, 1, 7, 8, 10, 11]];
    assert_eq!(
        scl_cloud_mask(scl.view()),
        array![[true, false, false, true, true, false]]
    );
}

#[test]
fn cloud_fraction_per_slice() {
    let mut mask = Array3::<f32>::zeros((4, 2, 2));
    mask.slice_mut(s![1, .., ..]).fill(1.0);
    mask[[2, 0, 0]] = 1.0;
    let fractions = per_tile_cloud_fraction(mask.view());
    assert_eq!(fractions.to_vec(), vec![0.0, 1.0, 0.25, 0.0]);
}

#[test]
fn indices_over_a_granule() {
    let (_tmp, dir) = tile_dir();
    let mut red = constant(1000);
    red.slice_mut(s![..10, ..]).fill(50);
    let safe = write_safe(
        &dir,
        "20201108",
        &[
            (BandKey::B02, constant(400)),
            (BandKey::B04, red),
            (BandKey::B8A, constant(3000)),
            (BandKey::B11, constant(1000)),
            (BandKey::Aot, constant(50)),
            (BandKey::Scl, constant(9)),
        ],
    );
    let keys = [BandKey::B02, BandKey::B04, BandKey::B8A, BandKey::B11, BandKey::Aot, BandKey::Scl];
    let io: Arc<dyn RasterIo> = Arc::new(GeoTiffIo::new());
    let mut granule = Granule::open(
        &safe,
        SpatialResolution::R60,
        &keys,
        5,
        &GranuleOptions::default(),
        Arc::clone(&io),
    )
    .unwrap();

    let index = ndvi(&mut granule).unwrap();
    assert_abs_diff_eq!(index[[GRID - 1, 0]], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(ndmi(&mut granule).unwrap()[[0, 0]], 0.5, epsilon = 1e-6);

    let masked = masked_ndvi(&mut granule).unwrap();
    assert_eq!(masked[[0, 0]], -1.0);
    assert_abs_diff_eq!(masked[[GRID - 1, 0]], 0.5, epsilon = 1e-6);

    let scl = per_tile_cloud_index(&mut granule, TileDetector::Scl).unwrap();
    assert_eq!(scl.len(), 25);
    assert!(scl.iter().all(|&f| f == 1.0));
    let vegetation = per_tile_cloud_index(&mut granule, TileDetector::MaxNdvi).unwrap();
    assert_abs_diff_eq!(vegetation[24], 0.75, epsilon = 1e-5);

    let out = save(
        io.as_ref(),
        index.view().into(),
        &granule.donor_profile().unwrap(),
        Driver::GTiff,
        &dir.join("NDVI"),
    )
    .unwrap();
    assert_eq!(out, dir.join("NDVI.tif"));
    let profile = io.profile(&out).unwrap();
    assert_eq!(profile.shape(), (GRID, GRID));
    assert!(save(
        io.as_ref(),
        index.view().into(),
        &granule.donor_profile().unwrap(),
        Driver::Jp2OpenJpeg,
        &dir.join("NDVI"),
    )
    .is_err());
}

#[test]
fn anthocyanin_index_treats_zero_reflectance_as_zero_reciprocal() {
    let (_tmp, dir) = tile_dir();
    let mut green = constant(250);
    green.slice_mut(s![..4, ..]).fill(0);
    let mut red_edge = constant(500);
    red_edge.slice_mut(s![..2, ..]).fill(0);
    let safe = write_safe(&dir, "20201108", &[(BandKey::B03, green), (BandKey::B05, red_edge)]);
    let mut granule = Granule::open(
        &safe,
        SpatialResolution::R60,
        &[BandKey::B03, BandKey::B05],
        1,
        &GranuleOptions::default(),
        Arc::new(GeoTiffIo::new()),
    )
    .unwrap();

    let ari = anthocyanin_index(&mut granule).unwrap();
    assert_eq!(ari.dim(), (GRID, GRID));
    assert_eq!(ari[[0, 0]], 0.0);
    assert_abs_diff_eq!(ari[[3, 0]], -1.0 / 500.0, epsilon = 1e-9);
    assert_abs_diff_eq!(ari[[GRID - 1, GRID - 1]], 1.0 / 250.0 - 1.0 / 500.0, epsilon = 1e-9);
    assert!(ari.iter().all(|v| v.is_finite()));
}
