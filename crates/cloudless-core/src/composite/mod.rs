//! Selection kernels: pick the winning sample per pixel or per block across a
//! batch of granules and fold it into running state.

pub mod cloud_probability;
pub mod median;
pub mod ndvi;
pub mod per_tile;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

use crate::error::{CompositeError, Result};

pub use cloud_probability::cloud_pixel_select;
pub use median::{median_block, median_fallback};
pub use ndvi::ndvi_pixel_select;
pub use per_tile::{assign_tiles, group_by_winner, per_tile_select};

/// Running best-pixel state carried across batches.
#[derive(Clone, Debug)]
pub struct SelectionState<S> {
    /// Decision signal of the stored winner.
    pub best: Array2<S>,
    /// Winner's band values, `(bands, h, w)`.
    pub data: Array3<u16>,
    /// Winner's day of year.
    pub doy: Array2<u16>,
}

impl<S: Clone> SelectionState<S> {
    pub fn new(bands: usize, (h, w): (usize, usize), initial: S) -> Self {
        Self {
            best: Array2::from_elem((h, w), initial),
            data: Array3::zeros((bands, h, w)),
            doy: Array2::zeros((h, w)),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.best.dim()
    }

    /// Store candidate `cand`'s sample at `(row, col)`.
    fn promote(&mut self, cand: &Candidate<'_, S>, row: usize, col: usize)
    where
        S: Copy,
    {
        self.best[[row, col]] = cand.signal[[row, col]];
        self.doy[[row, col]] = cand.doy;
        for b in 0..self.data.dim().0 {
            self.data[[b, row, col]] = cand.data[[b, row, col]];
        }
    }
}

/// One granule's contribution to a batch.
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a, S> {
    pub signal: ArrayView2<'a, S>,
    /// `(bands, h, w)` in output band order.
    pub data: ArrayView3<'a, u16>,
    pub doy: u16,
}

impl<'a, S> Candidate<'a, S> {
    /// True when every band is zero at `(row, col)`, i.e. not acquired there.
    fn is_nodata(&self, row: usize, col: usize) -> bool {
        (0..self.data.dim().0).all(|b| self.data[[b, row, col]] == 0)
    }
}

fn check_batch<S>(candidates: &[Candidate<'_, S>], state: &SelectionState<S>) -> Result<()> {
    if candidates.is_empty() {
        return Err(CompositeError::EmptySequence);
    }
    let (bands, h, w) = state.data.dim();
    for cand in candidates {
        if cand.signal.dim() != (h, w) {
            let (ch, cw) = cand.signal.dim();
            return Err(CompositeError::ShapeMismatch {
                expected: vec![h, w],
                found: vec![ch, cw],
            });
        }
        if cand.data.dim() != (bands, h, w) {
            let (cb, ch, cw) = cand.data.dim();
            return Err(CompositeError::ShapeMismatch {
                expected: vec![bands, h, w],
                found: vec![cb, ch, cw],
            });
        }
    }
    Ok(())
}
