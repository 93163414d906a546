mod common;

use chrono::NaiveDate;
use cloudless_core::acquisition::{Acquisition, AcquisitionConfig, LocalArchive, SearchCriteria};
use cloudless_core::error::CompositeError;
use cloudless_core::granule::GranuleType;
use common::*;

fn day(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, m, d).unwrap()
}

fn names(found: &[std::path::PathBuf]) -> Vec<String> {
    found
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn filters_by_date_tile_and_cloud_coverage() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write_safe_with(root, "20201101", TILE, 10.0, &[]);
    write_safe_with(root, "20201108", TILE, 80.0, &[]);
    write_safe_with(root, "20201110", "T34UCA", 5.0, &[]);
    write_safe_with(root, "20201215", TILE, 0.0, &[]);
    std::fs::create_dir_all(root.join("notes")).unwrap();

    let archive = LocalArchive::new(root);
    let criteria = SearchCriteria::new(day(11, 1), day(11, 30)).with_tiles(["33UXQ"]);
    assert_eq!(
        names(&archive.search(&criteria).unwrap()),
        vec![safe_name("20201101", TILE), safe_name("20201108", TILE)]
    );

    let clear = criteria.clone().with_cloud_coverage(0.0, 50.0);
    assert_eq!(names(&archive.search(&clear).unwrap()), vec![safe_name("20201101", TILE)]);

    let any_tile = SearchCriteria::new(day(11, 8), day(12, 31)).with_tiles(Vec::<String>::new());
    assert_eq!(archive.search(&any_tile).unwrap().len(), 3);

    let l1c = criteria.with_product(GranuleType::L1C);
    assert!(archive.search(&l1c).unwrap().is_empty());
}

#[test]
fn product_without_metadata_matches_by_name() {
    let tmp = tempfile::tempdir().unwrap();
    let safe = write_safe_with(tmp.path(), "20201108", TILE, 99.0, &[]);
    std::fs::remove_file(safe.join("MTD_MSIL2A.xml")).unwrap();

    let criteria = SearchCriteria::new(day(11, 1), day(11, 30))
        .with_tiles(["33UXQ"])
        .with_cloud_coverage(0.0, 10.0);
    let found = LocalArchive::new(tmp.path()).search(&criteria).unwrap();
    assert_eq!(found, vec![safe]);
}

#[test]
fn missing_root() {
    let config = AcquisitionConfig {
        download_dir: "/nonexistent/archive".into(),
        ..AcquisitionConfig::default()
    };
    let archive = LocalArchive::from_config(&config);
    let criteria = SearchCriteria::new(day(11, 1), day(11, 30)).with_tiles(["33UXQ"]);
    assert!(matches!(archive.search(&criteria), Err(CompositeError::FileNotFound(_))));
}

#[test]
fn criteria_read_from_toml() {
    let criteria: SearchCriteria = toml::from_str(
        r#"
start = "2020-11-01"
end = "2020-11-30"
tiles = ["33UXQ"]
polygon = [[14.0, 49.0], [15.0, 49.0], [15.0, 50.0]]
"#,
    )
    .unwrap();
    assert_eq!(criteria.cloud_coverage, (0.0, 95.0));
    assert_eq!(criteria.product, GranuleType::L2A);
    assert_eq!(criteria.polygon.unwrap().vertices().len(), 3);
}
