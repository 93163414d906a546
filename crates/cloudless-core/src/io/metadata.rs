use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDateTime};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::error::{CompositeError, Result};

const SENSING_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Product-level metadata extracted from a SAFE `MTD_MSIL*.xml` file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SafeMetadata {
    /// Raster paths relative to the SAFE root, `.jp2` appended, in document order.
    pub image_files: Vec<PathBuf>,
    /// Start of the first datatake.
    pub datatake: Option<NaiveDateTime>,
    /// Scene cloud coverage in percent.
    pub cloud_coverage: Option<f64>,
    /// Product footprint as `[lon, lat]` vertices.
    pub footprint: Vec<[f64; 2]>,
}

impl SafeMetadata {
    /// Day of year of the datatake, 0 when unknown.
    pub fn doy(&self) -> u16 {
        self.datatake.map(|t| t.ordinal() as u16).unwrap_or(0)
    }

    /// Parse a metadata file. A missing file is not an error and yields `None`.
    pub fn parse(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            debug!(path = %path.display(), "No metadata file");
            return Ok(None);
        }
        let mut reader = Reader::from_file(path)?;
        reader.trim_text(true);
        Self::read(&mut reader).map(Some)
    }

    /// Parse metadata held in memory.
    pub fn parse_str(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        Self::read(&mut reader)
    }

    fn read<R: std::io::BufRead>(reader: &mut Reader<R>) -> Result<Self> {
        let mut meta = SafeMetadata::default();
        let mut buf = Vec::new();
        let mut current = String::new();
        // 0: before the first Granule, 1: inside it, 2: past it.
        let mut granule_state = 0u8;
        let mut granule_depth = 0usize;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) => {
                    current = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if current == "Granule" {
                        if granule_state == 0 {
                            granule_state = 1;
                        }
                        if granule_state == 1 {
                            granule_depth += 1;
                        }
                    }
                }
                Event::End(ref e) => {
                    if e.local_name().as_ref() == b"Granule" && granule_state == 1 {
                        granule_depth -= 1;
                        if granule_depth == 0 {
                            granule_state = 2;
                        }
                    }
                    current.clear();
                }
                Event::Text(e) => {
                    let text = e
                        .unescape()
                        .map_err(|err| CompositeError::Metadata(err.to_string()))?;
                    let text = text.trim();
                    match current.as_str() {
                        "IMAGE_FILE" | "IMAGE_ID" if granule_state == 1 => {
                            meta.image_files.push(PathBuf::from(format!("{text}.jp2")));
                        }
                        "DATATAKE_SENSING_START" | "PRODUCT_START_TIME"
                            if meta.datatake.is_none() =>
                        {
                            meta.datatake = parse_sensing_time(text);
                        }
                        "Cloud_Coverage_Assessment" if meta.cloud_coverage.is_none() => {
                            meta.cloud_coverage = text.parse().ok();
                        }
                        "EXT_POS_LIST" if meta.footprint.is_empty() => {
                            meta.footprint = parse_pos_list(text);
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        if meta.datatake.is_none() {
            warn!("Metadata carries no sensing time, day of year defaults to 0");
        }
        Ok(meta)
    }
}

/// `lat lon lat lon ...` into `[lon, lat]` pairs.
fn parse_pos_list(text: &str) -> Vec<[f64; 2]> {
    let values: Vec<f64> = text.split_whitespace().filter_map(|v| v.parse().ok()).collect();
    values.chunks_exact(2).map(|p| [p[1], p[0]]).collect()
}

/// Parse a Sentinel-2 sensing timestamp such as `2020-11-08T09:52:21.024Z`.
pub fn parse_sensing_time(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, SENSING_FORMAT)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|t| t.naive_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MTD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-2A_User_Product xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/User_Product_Level-2A.xsd">
  <n1:General_Info>
    <Product_Info>
      <PRODUCT_START_TIME>2020-11-08T09:52:21.024Z</PRODUCT_START_TIME>
      <Datatake datatakeIdentifier="GS2A_20201108T095221_028075_N02.14">
        <DATATAKE_SENSING_START>2020-11-08T09:52:21.024Z</DATATAKE_SENSING_START>
      </Datatake>
      <Product_Organisation>
        <Granule_List>
          <Granule granuleIdentifier="L2A_T33UXQ" imageFormat="JPEG2000">
            <IMAGE_FILE>GRANULE/L2A_T33UXQ/IMG_DATA/R10m/T33UXQ_20201108T095221_B02_10m</IMAGE_FILE>
            <IMAGE_FILE>GRANULE/L2A_T33UXQ/IMG_DATA/R10m/T33UXQ_20201108T095221_B03_10m</IMAGE_FILE>
          </Granule>
          <Granule granuleIdentifier="other">
            <IMAGE_FILE>ignored</IMAGE_FILE>
          </Granule>
        </Granule_List>
      </Product_Organisation>
    </Product_Info>
  </n1:General_Info>
  <n1:Geometric_Info>
    <Product_Footprint>
      <Global_Footprint>
        <EXT_POS_LIST>50.4 14.9 50.5 16.4 49.5 16.4 49.4 14.9 50.4 14.9 </EXT_POS_LIST>
      </Global_Footprint>
    </Product_Footprint>
  </n1:Geometric_Info>
  <n1:Quality_Indicators_Info>
    <Cloud_Coverage_Assessment>12.5</Cloud_Coverage_Assessment>
  </n1:Quality_Indicators_Info>
</n1:Level-2A_User_Product>"#;

    #[test]
    fn reads_first_granule_images_and_datatake() {
        let meta = SafeMetadata::parse_str(MTD).unwrap();
        assert_eq!(meta.image_files.len(), 2);
        assert!(meta.image_files[0].to_string_lossy().ends_with("_B02_10m.jp2"));
        assert_eq!(meta.doy(), 313);
        assert_eq!(meta.cloud_coverage, Some(12.5));
        assert_eq!(meta.footprint.len(), 5);
        assert_eq!(meta.footprint[1], [16.4, 50.5]);
    }

    #[test]
    fn missing_time_gives_zero_doy() {
        let meta = SafeMetadata::parse_str("<root><Granule><IMAGE_ID>a</IMAGE_ID></Granule></root>").unwrap();
        assert_eq!(meta.doy(), 0);
        assert_eq!(meta.image_files, vec![PathBuf::from("a.jp2")]);
    }

    #[test]
    fn missing_file_is_none() {
        assert!(SafeMetadata::parse(Path::new("/nonexistent/MTD_MSIL2A.xml")).unwrap().is_none());
    }
}
