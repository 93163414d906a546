//! Grid resizing for band alignment.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};

use crate::error::{CompositeError, Result};
use crate::io::Resampling;

/// Resize a band of digital numbers to `(height, width)`.
///
/// Nearest keeps categorical codes intact; bilinear uses a triangle filter.
pub fn resize(src: ArrayView2<u16>, shape: (usize, usize), kernel: Resampling) -> Result<Array2<u16>> {
    if shape == src.dim() {
        return Ok(src.to_owned());
    }
    match kernel {
        Resampling::Nearest => Ok(upsample_nearest(src, shape)),
        Resampling::Bilinear => resize_bilinear(src, shape),
    }
}

fn resize_bilinear(src: ArrayView2<u16>, (height, width): (usize, usize)) -> Result<Array2<u16>> {
    let (h, w) = src.dim();
    let pixels: Vec<u16> = src.iter().copied().collect();
    let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels).ok_or(
        CompositeError::ShapeMismatch {
            expected: vec![h, w],
            found: vec![src.len()],
        },
    )?;
    let resized = imageops::resize(&img, width as u32, height as u32, FilterType::Triangle);
    Array2::from_shape_vec((height, width), resized.into_raw()).map_err(|_| {
        CompositeError::ShapeMismatch {
            expected: vec![height, width],
            found: vec![h, w],
        }
    })
}

/// Nearest-neighbour resize of any grid. Each output pixel takes the source
/// pixel whose footprint contains its centre, so integer upsampling replicates
/// every source pixel into an exact block.
pub fn upsample_nearest<T: Copy>(src: ArrayView2<T>, (height, width): (usize, usize)) -> Array2<T> {
    let (h, w) = src.dim();
    let rows: Vec<usize> = (0..height).map(|r| source_index(r, height, h)).collect();
    let cols: Vec<usize> = (0..width).map(|c| source_index(c, width, w)).collect();
    Array2::from_shape_fn((height, width), |(r, c)| src[[rows[r], cols[c]]])
}

fn source_index(dst: usize, dst_len: usize, src_len: usize) -> usize {
    (((2 * dst + 1) * src_len) / (2 * dst_len)).min(src_len.saturating_sub(1))
}
