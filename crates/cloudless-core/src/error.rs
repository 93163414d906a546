use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Storage error at {}: {reason}", path.display())]
    Storage { path: PathBuf, reason: String },

    #[error("Unsupported raster format: {0}")]
    UnsupportedFormat(String),

    #[error("Spatial resolution {0}m does not exist for Sentinel-2, use 10, 20 or 60")]
    InvalidResolution(u32),

    #[error("Slice index {slice} does not evenly divide the {grid}px grid")]
    InvalidSliceIndex { grid: usize, slice: usize },

    #[error("Granule {} uses slice index {found}, the job uses {expected}", granule.display())]
    MixedSliceIndex {
        expected: usize,
        found: usize,
        granule: PathBuf,
    },

    #[error("Tiles with different area detected: expected {expected}, found {found}")]
    MixedTiles { expected: String, found: String },

    #[error("Band {band} is missing in dataset {}", granule.display())]
    MissingBand { band: String, granule: PathBuf },

    #[error("Not enough raster images in {} (found {found}, need at least 2)", path.display())]
    NotEnoughRasters { path: PathBuf, found: usize },

    #[error("Unsupported granule type: {0}")]
    UnsupportedGranuleType(String),

    #[error("Array shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Empty granule sequence")]
    EmptySequence,

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl CompositeError {
    /// Failures tied to one file on disk. The orchestrator drops the affected
    /// granule from a batch instead of aborting the job.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Tiff(_)
                | Self::Image(_)
                | Self::FileNotFound(_)
                | Self::Storage { .. }
                | Self::UnsupportedFormat(_)
        )
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Storage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CompositeError>;
