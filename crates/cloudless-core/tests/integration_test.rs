mod common;

use std::sync::Arc;

use cloudless_core::algebra::TileDetector;
use cloudless_core::band_key::BandKey;
use cloudless_core::error::CompositeError;
use cloudless_core::io::{GeoTiffIo, RasterData, RasterIo, RasterProfile, Resampling, Window};
use cloudless_core::pipeline::config::{CompositeConfig, CompositeMethod};
use cloudless_core::pipeline::run_composite;
use cloudless_core::raster::Footprint;
use cloudless_core::resolution::SpatialResolution;
use common::*;
use ndarray::{s, Array2};

fn io() -> Arc<dyn RasterIo> {
    Arc::new(GeoTiffIo::new())
}

fn read(path: &std::path::Path) -> Array2<u16> {
    GeoTiffIo::new().read(path).expect("read result").0
}

fn config(input: &std::path::Path, bands: &[BandKey], method: CompositeMethod) -> CompositeConfig {
    CompositeConfig {
        input: input.to_path_buf(),
        resolution: SpatialResolution::R60,
        output_bands: bands.to_vec(),
        method,
        ..CompositeConfig::default()
    }
}

#[test]
fn dominant_granule_is_reproduced_exactly() {
    let (_tmp, dir) = tile_dir();
    write_safe(&dir, "20201101", &ndvi_bands(constant(900), constant(1000)));
    write_safe(&dir, "20201105", &ndvi_bands(constant(1500), constant(2000)));
    let best_blue = gradient(150, 300);
    let best_green = gradient(300, 400);
    let best_red = gradient(200, 500);
    write_safe(
        &dir,
        "20201108",
        &[
            (BandKey::B02, best_blue.clone()),
            (BandKey::B03, best_green.clone()),
            (BandKey::B04, best_red.clone()),
            (BandKey::B8A, constant(4000)),
            (BandKey::Aot, constant(50)),
        ],
    );

    let bands = [BandKey::B02, BandKey::B03, BandKey::B04];
    let cfg = config(&dir, &bands, CompositeMethod::NdviPerPixel { batch_size: 2 });
    let output = run_composite(&cfg, io(), None).unwrap();

    assert_eq!(output.result_dir, dir.join("result"));
    let result = dir.join("result");
    assert_eq!(read(&result.join("B02_60.tif")), best_blue);
    assert_eq!(read(&result.join("B03_60.tif")), best_green);
    assert_eq!(read(&result.join("B04_60.tif")), best_red);
    assert!(read(&result.join("DOY_60.tif")).iter().all(|&d| d == 313));
    assert!(result.join("T33UXQ_rgb.tif").is_file());

    let granule = output.open_granule(io()).unwrap();
    assert!(granule.contains(&BandKey::B04));
    assert!(granule.contains(&BandKey::Doy));
}

#[test]
fn median_streams_blocks_and_skips_nodata() {
    let (_tmp, dir) = tile_dir();
    let half_zero = |value: u16| {
        let mut a = constant(value);
        a.slice_mut(s![..GRID / 2, ..]).fill(0);
        a
    };
    write_safe(&dir, "20201101", &[(BandKey::B02, constant(1)), (BandKey::B04, half_zero(100))]);
    write_safe(&dir, "20201105", &[(BandKey::B02, constant(2)), (BandKey::B04, half_zero(300))]);
    write_safe(&dir, "20201108", &[(BandKey::B02, constant(3)), (BandKey::B04, constant(700))]);

    let mut cfg = config(
        &dir,
        &[BandKey::B02, BandKey::B04],
        CompositeMethod::MedianPerPixel { block_size: 512 },
    );
    cfg.quicklook = false;
    run_composite(&cfg, io(), None).unwrap();

    let red = read(&dir.join("result").join("B04_60.tif"));
    assert_eq!(red[[0, 0]], 700);
    assert_eq!(red[[GRID / 2 - 1, GRID - 1]], 700);
    assert_eq!(red[[GRID / 2, 0]], 300);
    assert_eq!(red[[GRID - 1, GRID - 1]], 300);
    assert!(read(&dir.join("result").join("B02_60.tif")).iter().all(|&v| v == 2));
    assert!(!dir.join("result").join("DOY_60.tif").exists());
}

#[test]
fn per_tile_takes_least_cloudy_blocks() {
    let (_tmp, dir) = tile_dir();
    let block = GRID / 5;
    let mut cloudy_left = constant(4);
    cloudy_left.slice_mut(s![.., ..2 * block]).fill(9);
    write_safe(
        &dir,
        "20201101",
        &[(BandKey::B02, constant(11)), (BandKey::B04, constant(11)), (BandKey::Scl, cloudy_left)],
    );
    write_safe(
        &dir,
        "20201108",
        &[(BandKey::B02, constant(22)), (BandKey::B04, constant(22)), (BandKey::Scl, constant(4))],
    );

    let mut cfg = config(
        &dir,
        &[BandKey::B02, BandKey::B04],
        CompositeMethod::PerTile {
            detector: TileDetector::Scl,
        },
    );
    cfg.slice_index = 5;
    cfg.quicklook = false;
    run_composite(&cfg, io(), None).unwrap();

    let red = read(&dir.join("result").join("B04_60.tif"));
    let doy = read(&dir.join("result").join("DOY_60.tif"));
    // Cloudy blocks go to the later granule, ties stay with the first one.
    assert_eq!(red[[0, 0]], 22);
    assert_eq!(red[[GRID - 1, 2 * block - 1]], 22);
    assert_eq!(red[[0, 2 * block]], 11);
    assert_eq!(red[[GRID - 1, GRID - 1]], 11);
    assert_eq!(doy[[0, 0]], 313);
    assert_eq!(doy[[0, GRID - 1]], 306);
}

/// Storage backend whose scene classification layers cannot be read.
struct UnreadableScl(GeoTiffIo);

impl UnreadableScl {
    fn check(path: &std::path::Path) -> cloudless_core::error::Result<()> {
        if path.to_string_lossy().contains("_SCL_") {
            return Err(CompositeError::Storage {
                path: path.to_path_buf(),
                reason: "truncated".into(),
            });
        }
        Ok(())
    }
}

impl RasterIo for UnreadableScl {
    fn profile(&self, path: &std::path::Path) -> cloudless_core::error::Result<RasterProfile> {
        self.0.profile(path)
    }

    fn read(&self, path: &std::path::Path) -> cloudless_core::error::Result<(Array2<u16>, RasterProfile)> {
        Self::check(path)?;
        self.0.read(path)
    }

    fn read_window(&self, path: &std::path::Path, window: Window) -> cloudless_core::error::Result<Array2<u16>> {
        Self::check(path)?;
        self.0.read_window(path, window)
    }

    fn write(
        &self,
        path: &std::path::Path,
        data: RasterData<'_>,
        profile: &RasterProfile,
    ) -> cloudless_core::error::Result<()> {
        self.0.write(path, data, profile)
    }

    fn reproject(
        &self,
        src: &std::path::Path,
        dst: &std::path::Path,
        target_crs: &str,
        resampling: Resampling,
    ) -> cloudless_core::error::Result<RasterProfile> {
        self.0.reproject(src, dst, target_crs, resampling)
    }
}

#[test]
fn per_tile_without_any_score_names_the_slice() {
    let (_tmp, dir) = tile_dir();
    for date in ["20201101", "20201108"] {
        write_safe(
            &dir,
            date,
            &[(BandKey::B02, constant(1)), (BandKey::B04, constant(1)), (BandKey::Scl, constant(4))],
        );
    }
    let mut cfg = config(
        &dir,
        &[BandKey::B02, BandKey::B04],
        CompositeMethod::PerTile {
            detector: TileDetector::Scl,
        },
    );
    cfg.slice_index = 5;
    cfg.quicklook = false;

    let err = run_composite(&cfg, Arc::new(UnreadableScl(GeoTiffIo::new())), None).unwrap_err();
    match err {
        CompositeError::Config(message) => assert!(message.contains("slice 0"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!dir.join("result").exists());
}

#[test]
fn cloud_probability_damps_small_improvements() {
    let (_tmp, dir) = tile_dir();
    let mut late_cld = constant(10);
    late_cld.slice_mut(s![..100, ..]).fill(255);
    for (date, value, cld) in [
        ("20201101", 1u16, constant(50)),
        ("20201108", 2, constant(40)),
        ("20201110", 3, late_cld),
    ] {
        write_safe(
            &dir,
            date,
            &[(BandKey::B02, constant(value)), (BandKey::B04, constant(value)), (BandKey::Cld, cld)],
        );
    }

    let mut cfg = config(
        &dir,
        &[BandKey::B02, BandKey::B04],
        CompositeMethod::CloudProbabilityPerPixel { batch_size: 1 },
    );
    cfg.quicklook = false;
    run_composite(&cfg, io(), None).unwrap();

    let red = read(&dir.join("result").join("B04_60.tif"));
    let doy = read(&dir.join("result").join("DOY_60.tif"));
    assert_eq!(red[[0, 0]], 1);
    assert_eq!(doy[[0, 0]], 306);
    assert_eq!(red[[GRID - 1, 0]], 3);
    assert_eq!(doy[[GRID - 1, 0]], 315);
    assert!(red.iter().all(|&v| v != 2));
}

#[test]
fn footprint_crops_the_composite() {
    let (_tmp, dir) = tile_dir();
    write_safe(&dir, "20201101", &ndvi_bands(constant(900), constant(1000)));
    write_safe(&dir, "20201108", &ndvi_bands(constant(500), constant(4000)));

    let (x0, y0) = (600_000.0, 5_600_040.0);
    let footprint = Footprint::new(vec![
        [x0 + 6_000.0, y0 - 6_000.0],
        [x0 + 18_000.0, y0 - 6_000.0],
        [x0 + 18_000.0, y0 - 18_000.0],
        [x0 + 6_000.0, y0 - 18_000.0],
    ])
    .unwrap();
    let mut cfg = config(
        &dir,
        &[BandKey::B02, BandKey::B03, BandKey::B04],
        CompositeMethod::default(),
    );
    cfg.footprint = Some(footprint);
    let output = run_composite(&cfg, io(), None).unwrap();

    let (red, profile) = GeoTiffIo::new().read(&output.result_dir.join("B04_60.tif")).unwrap();
    assert_eq!(red.dim(), (200, 200));
    assert!(red.iter().all(|&v| v == 500));
    assert_eq!(profile.transform.origin(), (x0 + 6_000.0, y0 - 6_000.0));
}

#[test]
fn mixed_tiles_abort_the_job() {
    let (_tmp, dir) = tile_dir();
    write_safe(&dir, "20201101", &ndvi_bands(constant(900), constant(1000)));
    write_safe_with(&dir, "20201108", "T34ABC", 5.0, &ndvi_bands(constant(900), constant(1000)));

    let cfg = config(&dir, &[BandKey::B04], CompositeMethod::default());
    let err = run_composite(&cfg, io(), None).unwrap_err();
    assert!(matches!(err, CompositeError::MixedTiles { .. }));
}

#[test]
fn per_pixel_methods_reject_slicing() {
    let (_tmp, dir) = tile_dir();
    let mut cfg = config(&dir, &[BandKey::B04], CompositeMethod::default());
    cfg.slice_index = 5;
    assert!(matches!(
        run_composite(&cfg, io(), None).unwrap_err(),
        CompositeError::Config(_)
    ));
}
