pub mod band;
pub mod footprint;
pub mod resample;

pub use band::{BandState, RasterBand};
pub use footprint::Footprint;
