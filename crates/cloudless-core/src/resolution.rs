use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::band_key::BandKey;
use crate::consts::{GRID_SIDE_10M, GRID_SIDE_20M, GRID_SIDE_60M};
use crate::error::{CompositeError, Result};
use crate::tiling::{find_closest_slice, is_supported_slice};

/// Sentinel-2 spatial resolution. Each one has a fixed square pixel grid per tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SpatialResolution {
    R10,
    R20,
    R60,
}

impl SpatialResolution {
    pub const ALL: [SpatialResolution; 3] = [Self::R10, Self::R20, Self::R60];

    pub fn meters(self) -> u32 {
        match self {
            Self::R10 => 10,
            Self::R20 => 20,
            Self::R60 => 60,
        }
    }

    /// Side of the canonical square grid at this resolution.
    pub fn grid_side(self) -> usize {
        match self {
            Self::R10 => GRID_SIDE_10M,
            Self::R20 => GRID_SIDE_20M,
            Self::R60 => GRID_SIDE_60M,
        }
    }

    pub fn grid_shape(self) -> (usize, usize) {
        (self.grid_side(), self.grid_side())
    }

    /// Resolutions searched, in order, when a band is missing at `self`.
    pub fn fallback_order(self) -> impl Iterator<Item = SpatialResolution> {
        Self::ALL.into_iter().filter(move |r| *r != self)
    }

    /// Check that `slice_index` partitions the grid into equal blocks.
    pub fn check_slice_index(self, slice_index: usize) -> Result<()> {
        let grid = self.grid_side();
        if slice_index == 0 || grid % slice_index != 0 {
            return Err(CompositeError::InvalidSliceIndex {
                grid,
                slice: slice_index,
            });
        }
        Ok(())
    }

    /// Slice index a job runs with on this grid. An unsupported index above 1
    /// snaps to the closest supported one before the divisibility check.
    pub fn resolve_slice_index(self, slice_index: usize) -> Result<usize> {
        let resolved = if slice_index > 1 && !is_supported_slice(slice_index) {
            let closest = find_closest_slice(slice_index);
            warn!(slice_index, closest, "Unsupported slice index, choosing the closest one");
            closest
        } else {
            slice_index
        };
        self.check_slice_index(resolved)?;
        Ok(resolved)
    }
}

impl TryFrom<u32> for SpatialResolution {
    type Error = CompositeError;

    fn try_from(meters: u32) -> Result<Self> {
        match meters {
            10 => Ok(Self::R10),
            20 => Ok(Self::R20),
            60 => Ok(Self::R60),
            other => Err(CompositeError::InvalidResolution(other)),
        }
    }
}

impl From<SpatialResolution> for u32 {
    fn from(r: SpatialResolution) -> Self {
        r.meters()
    }
}

impl fmt::Display for SpatialResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.meters())
    }
}

/// Default output bands for a working resolution.
pub fn bands_for_resolution(resolution: SpatialResolution) -> Vec<BandKey> {
    use BandKey::*;
    match resolution {
        SpatialResolution::R10 => vec![B02, B03, B04, B08, Aot],
        SpatialResolution::R20 => vec![B02, B03, B04, B05, B06, B07, B8A, B11, B12, Aot, Scl],
        SpatialResolution::R60 => {
            vec![B01, B02, B03, B04, B05, B06, B07, B8A, B09, B11, B12, Aot]
        }
    }
}
