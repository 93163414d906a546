use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::io::Resampling;

/// Identifier of a raster layer inside a granule.
///
/// Sentinel-2 spectral bands and products have fixed variants; layers computed by
/// the caller (indices, masks) can use `Other`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BandKey {
    B01,
    B02,
    B03,
    B04,
    B05,
    B06,
    B07,
    B08,
    B8A,
    B09,
    B10,
    B11,
    B12,
    Tci,
    Aot,
    Wvp,
    Scl,
    /// 8-bit RGB quicklook.
    Rgb,
    /// Day-of-year provenance layer.
    Doy,
    /// Cloud probability layer.
    Cld,
    Other(String),
}

fn band_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"B[0-9]+A?|TCI|AOT|WVP|SCL|rgb|DOY|CLD").expect("band pattern is valid")
    })
}

impl BandKey {
    /// Extract the band key from a raster file name. The last pattern match in the
    /// file name wins, so `T33UXQ_20201108T095221_B8A_20m.jp2` yields `B8A`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let last = band_pattern().find_iter(name).last()?;
        last.as_str().parse().ok()
    }

    /// Classification-like layers must never be interpolated.
    pub fn is_categorical(&self) -> bool {
        matches!(self, Self::Scl | Self::Doy | Self::Cld)
    }

    /// Interpolation kernel used when this layer changes grid.
    pub fn resampling(&self) -> Resampling {
        if self.is_categorical() {
            Resampling::Nearest
        } else {
            Resampling::Bilinear
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::B01 => "B01",
            Self::B02 => "B02",
            Self::B03 => "B03",
            Self::B04 => "B04",
            Self::B05 => "B05",
            Self::B06 => "B06",
            Self::B07 => "B07",
            Self::B08 => "B08",
            Self::B8A => "B8A",
            Self::B09 => "B09",
            Self::B10 => "B10",
            Self::B11 => "B11",
            Self::B12 => "B12",
            Self::Tci => "TCI",
            Self::Aot => "AOT",
            Self::Wvp => "WVP",
            Self::Scl => "SCL",
            Self::Rgb => "rgb",
            Self::Doy => "DOY",
            Self::Cld => "CLD",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for BandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BandKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "B01" => Self::B01,
            "B02" => Self::B02,
            "B03" => Self::B03,
            "B04" => Self::B04,
            "B05" => Self::B05,
            "B06" => Self::B06,
            "B07" => Self::B07,
            "B08" => Self::B08,
            "B8A" => Self::B8A,
            "B09" => Self::B09,
            "B10" => Self::B10,
            "B11" => Self::B11,
            "B12" => Self::B12,
            "TCI" => Self::Tci,
            "AOT" => Self::Aot,
            "WVP" => Self::Wvp,
            "SCL" => Self::Scl,
            "rgb" | "RGB" => Self::Rgb,
            "DOY" => Self::Doy,
            "CLD" => Self::Cld,
            other => Self::Other(other.to_string()),
        })
    }
}

impl TryFrom<String> for BandKey {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BandKey> for String {
    fn from(key: BandKey) -> Self {
        key.as_str().to_string()
    }
}
