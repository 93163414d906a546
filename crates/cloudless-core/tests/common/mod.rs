#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cloudless_core::band_key::BandKey;
use cloudless_core::io::{GeoTiffIo, GeoTransform, RasterIo, RasterProfile};
use ndarray::Array2;

/// Canonical 60 m grid side.
pub const GRID: usize = 1830;

pub const TILE: &str = "T33UXQ";

pub fn profile(width: usize, height: usize) -> RasterProfile {
    RasterProfile::new(
        "EPSG:32633",
        GeoTransform([600_000.0, 60.0, 0.0, 5_600_040.0, 0.0, -60.0]),
        width,
        height,
    )
}

/// Write a single band GeoTIFF.
pub fn write_band(path: &Path, data: &Array2<u16>) {
    let (h, w) = data.dim();
    GeoTiffIo::new()
        .write(path, data.view().into(), &profile(w, h))
        .expect("write test band");
}

/// SAFE directory name for an acquisition on `date` (`YYYYMMDD`).
pub fn safe_name(date: &str, tile: &str) -> String {
    format!("S2A_MSIL2A_{date}T095221_N0214_R079_{tile}_{date}T120214.SAFE")
}

fn metadata_xml(date: &str, cloud_coverage: f64) -> String {
    let iso = format!("{}-{}-{}T09:52:21.024Z", &date[0..4], &date[4..6], &date[6..8]);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-2A_User_Product xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/User_Product_Level-2A.xsd">
  <n1:General_Info>
    <Product_Info>
      <PRODUCT_START_TIME>{iso}</PRODUCT_START_TIME>
      <Datatake datatakeIdentifier="GS2A_{date}T095221_028075_N02.14">
        <DATATAKE_SENSING_START>{iso}</DATATAKE_SENSING_START>
      </Datatake>
    </Product_Info>
  </n1:General_Info>
  <n1:Quality_Indicators_Info>
    <Cloud_Coverage_Assessment>{cloud_coverage}</Cloud_Coverage_Assessment>
  </n1:Quality_Indicators_Info>
</n1:Level-2A_User_Product>"#
    )
}

/// Build a synthetic L2A dataset under `tile_dir` with one 60 m GeoTIFF per
/// band. Returns the dataset path.
pub fn write_safe(tile_dir: &Path, date: &str, bands: &[(BandKey, Array2<u16>)]) -> PathBuf {
    write_safe_with(tile_dir, date, TILE, 10.0, bands)
}

pub fn write_safe_with(
    tile_dir: &Path,
    date: &str,
    tile: &str,
    cloud_coverage: f64,
    bands: &[(BandKey, Array2<u16>)],
) -> PathBuf {
    let safe = tile_dir.join(safe_name(date, tile));
    let img_dir = safe.join("GRANULE").join(format!("L2A_{tile}")).join("IMG_DATA").join("R60m");
    std::fs::create_dir_all(&img_dir).expect("create SAFE layout");
    std::fs::write(safe.join("MTD_MSIL2A.xml"), metadata_xml(date, cloud_coverage))
        .expect("write metadata");
    for (key, data) in bands {
        let name = format!("{tile}_{date}T095221_{key}_60m.tif");
        write_band(&img_dir.join(name), data);
    }
    safe
}

/// Constant band at the 60 m grid.
pub fn constant(value: u16) -> Array2<u16> {
    Array2::from_elem((GRID, GRID), value)
}

/// Deterministic non-constant band in `lo..lo + span`.
pub fn gradient(lo: u16, span: u16) -> Array2<u16> {
    Array2::from_shape_fn((GRID, GRID), |(r, c)| lo + ((r * 7 + c * 3) % span as usize) as u16)
}

/// Bands read by NDVI compositing, with the given red and near-infrared.
pub fn ndvi_bands(red: Array2<u16>, nir: Array2<u16>) -> Vec<(BandKey, Array2<u16>)> {
    vec![
        (BandKey::B02, constant(400)),
        (BandKey::B03, constant(500)),
        (BandKey::B04, red),
        (BandKey::B8A, nir),
        (BandKey::Aot, constant(50)),
    ]
}

/// Fresh tile directory named after the tile inside a temp dir.
pub fn tile_dir() -> (tempfile::TempDir, PathBuf) {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let dir = tmp.path().join(TILE);
    std::fs::create_dir_all(&dir).expect("create tile dir");
    (tmp, dir)
}
