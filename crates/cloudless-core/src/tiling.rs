use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3};
use num_traits::Zero;

use crate::consts::SUPPORTED_SLICES;
use crate::error::{CompositeError, Result};

pub fn is_supported_slice(slice_index: usize) -> bool {
    SUPPORTED_SLICES.contains(&slice_index)
}

/// Nearest supported slice index. On equal distance the larger index wins.
pub fn find_closest_slice(slice_index: usize) -> usize {
    let mut best = SUPPORTED_SLICES[0];
    for &candidate in &SUPPORTED_SLICES[1..] {
        if candidate.abs_diff(slice_index) <= best.abs_diff(slice_index) {
            best = candidate;
        }
    }
    best
}

/// Cut a `(h, w)` grid into `slice_index²` equal blocks, row-major.
///
/// Block `i` covers block-row `i / slice_index` and block-column
/// `i % slice_index`. Output shape: `(slice_index², h / slice_index, w / slice_index)`.
pub fn slice_raster<T: Clone + Zero>(slice_index: usize, raster: ArrayView2<T>) -> Result<Array3<T>> {
    let (h, w) = raster.dim();
    if slice_index == 0 || h % slice_index != 0 || w % slice_index != 0 {
        return Err(CompositeError::InvalidSliceIndex {
            grid: h.max(w),
            slice: slice_index,
        });
    }
    let bh = h / slice_index;
    let bw = w / slice_index;
    let mut out = Array3::<T>::zeros((slice_index * slice_index, bh, bw));
    for (i, mut block) in out.outer_iter_mut().enumerate() {
        let r0 = (i / slice_index) * bh;
        let c0 = (i % slice_index) * bw;
        block.assign(&raster.slice(s![r0..r0 + bh, c0..c0 + bw]));
    }
    Ok(out)
}

/// Reassemble blocks produced by [`slice_raster`] into an `(h, w)` grid.
pub fn glue_raster<T: Clone + Zero>(blocks: ArrayView3<T>, h: usize, w: usize) -> Result<Array2<T>> {
    let (n, bh, bw) = blocks.dim();
    let slice_index = (n as f64).sqrt().round() as usize;
    if slice_index * slice_index != n || slice_index * bh != h || slice_index * bw != w {
        return Err(CompositeError::ShapeMismatch {
            expected: vec![h, w],
            found: vec![n, bh, bw],
        });
    }
    let mut out = Array2::<T>::zeros((h, w));
    for (i, block) in blocks.outer_iter().enumerate() {
        let r0 = (i / slice_index) * bh;
        let c0 = (i % slice_index) * bw;
        out.slice_mut(s![r0..r0 + bh, c0..c0 + bw]).assign(&block);
    }
    Ok(out)
}
