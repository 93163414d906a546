use ndarray::{s, Array2, ArrayView3};
use rayon::prelude::*;

use crate::consts::{NODATA_VALUE, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{CompositeError, Result};

/// Per-pixel temporal median of a `(n, h, w)` block.
///
/// Where the median is the no-data value, the pixel's samples are scanned in
/// acquisition order starting at index `n / 2 - 1` and the first nonzero one
/// is used instead. Rows run in parallel for blocks of at least
/// [`PARALLEL_PIXEL_THRESHOLD`] pixels.
pub fn median_block(stack: ArrayView3<u16>) -> Result<Array2<u16>> {
    let (n, h, w) = stack.dim();
    if n == 0 {
        return Err(CompositeError::EmptySequence);
    }

    // `samples` is reordered by the median, the fallback reads the lane itself.
    let pixel = |row: usize, col: usize, samples: &mut Vec<u16>| -> u16 {
        let lane = stack.slice(s![.., row, col]);
        samples.clear();
        samples.extend(lane.iter());
        match compute_median(samples) {
            NODATA_VALUE => first_valid_from_midpoint(lane.iter()),
            m => m,
        }
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        let rows: Vec<Vec<u16>> = (0..h)
            .into_par_iter()
            .map(|row| {
                let mut samples = Vec::with_capacity(n);
                (0..w).map(|col| pixel(row, col, &mut samples)).collect()
            })
            .collect();

        let mut result = Array2::<u16>::zeros((h, w));
        for (row, row_data) in rows.into_iter().enumerate() {
            for (col, val) in row_data.into_iter().enumerate() {
                result[[row, col]] = val;
            }
        }
        Ok(result)
    } else {
        let mut samples = Vec::with_capacity(n);
        let mut result = Array2::<u16>::zeros((h, w));
        for row in 0..h {
            for col in 0..w {
                result[[row, col]] = pixel(row, col, &mut samples);
            }
        }
        Ok(result)
    }
}

/// First nonzero sample scanning forward from `len / 2 - 1`, or 0.
pub fn median_fallback(samples: &[u16]) -> u16 {
    first_valid_from_midpoint(samples.iter())
}

fn first_valid_from_midpoint<'a>(samples: impl ExactSizeIterator<Item = &'a u16>) -> u16 {
    let start = (samples.len() / 2).saturating_sub(1);
    samples
        .skip(start)
        .copied()
        .find(|&v| v != NODATA_VALUE)
        .unwrap_or(NODATA_VALUE)
}

/// Median with the lower-middle/upper-middle average floored for even counts.
/// Reorders `values`.
fn compute_median(values: &mut [u16]) -> u16 {
    let n = values.len();
    if n == 1 {
        values[0]
    } else if n % 2 == 1 {
        *values.select_nth_unstable(n / 2).1
    } else {
        let mid = n / 2;
        values.select_nth_unstable(mid);
        let upper = values[mid];
        values[..mid].select_nth_unstable(mid - 1);
        let lower = values[mid - 1];
        ((lower as u32 + upper as u32) / 2) as u16
    }
}
