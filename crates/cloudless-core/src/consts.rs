/// Canonical pixel grid side for the 10 m bands.
pub const GRID_SIDE_10M: usize = 10_980;

/// Canonical pixel grid side for the 20 m bands.
pub const GRID_SIDE_20M: usize = 5_490;

/// Canonical pixel grid side for the 60 m bands.
pub const GRID_SIDE_60M: usize = 1_830;

/// Slice indices accepted for per-tile selection. 5, 10 and 15 divide every
/// canonical grid; 18 and 45 divide only the 10 m and 20 m grids.
pub const SUPPORTED_SLICES: [usize; 5] = [5, 10, 15, 18, 45];

/// L2A metadata lists images per resolution in fixed runs: 7 at 10 m, 13 at 20 m,
/// the remainder at 60 m.
pub const L2A_IMAGES_10M: usize = 7;
pub const L2A_IMAGES_20M: usize = 13;

/// Initial running score for the NDVI kernel. Any real or masked NDVI beats it.
pub const NDVI_INITIAL_SCORE: f32 = -10.0;

/// NDVI assigned to pixels that fail the reflectance quality mask.
pub const NDVI_MASKED_SCORE: f32 = -1.0;

/// Cloud probability mask value reserved for no-data. Never selected.
pub const CLOUD_NODATA: u8 = 255;

/// Largest cloud probability code for valid pixels.
pub const CLOUD_MAX_PROBABILITY: u8 = 254;

/// A stored cloud-probability winner is only replaced by a candidate that is
/// clearer by more than this many codes.
pub const CLOUD_PROMOTION_TOLERANCE: u8 = 20;

/// Value treated as "not acquired" in band data.
pub const NODATA_VALUE: u16 = 0;

/// Default number of granules per NDVI batch.
pub const DEFAULT_NDVI_BATCH_SIZE: usize = 5;

/// Default number of granules per cloud-probability batch.
pub const DEFAULT_CLOUD_BATCH_SIZE: usize = 10;

/// Default I/O block side for the streaming median.
pub const DEFAULT_MEDIAN_BLOCK_SIZE: usize = 1024;

/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Sentinel-2 L2A/L1C digital numbers are reflectance scaled by this value.
pub const REFLECTANCE_SCALE: f32 = 10_000.0;

/// Quicklook: gain applied before stretching DN into 8 bits.
pub const QUICKLOOK_GAIN: f32 = 1.5;

/// Quicklook: DN mapped to 255 after gain.
pub const QUICKLOOK_MAX_DN: f32 = 4096.0;

/// Block side used for GeoTIFF outputs.
pub const GTIFF_BLOCK_SIZE: u32 = 256;

/// Reduced-resolution levels stored alongside a quicklook.
pub const QUICKLOOK_OVERVIEWS: [u32; 3] = [2, 4, 8];

/// Scale used by per-tile NDVI scoring, mapping NDVI in [-1, 1] onto [0, 3].
pub const NDVI_TILE_SCALE: f32 = 1.5;
