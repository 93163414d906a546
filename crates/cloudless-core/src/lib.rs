pub mod acquisition;
pub mod algebra;
pub mod band_key;
pub mod cloud;
pub mod composite;
pub mod consts;
pub mod error;
pub mod granule;
pub mod io;
pub mod pipeline;
pub mod raster;
pub mod resolution;
pub mod tiling;
pub mod worker;
