use std::collections::BTreeMap;

use ndarray::{s, Array2, Array3, Array4, ArrayView2};
use tracing::info;

use crate::error::{CompositeError, Result};
use crate::tiling::{glue_raster, slice_raster};

/// Winning granule per slice from a `(granules, slices)` score matrix: the
/// lowest score, first granule on ties. Non-finite scores never win, and a
/// slice without any finite score is an error.
pub fn assign_tiles(scores: ArrayView2<f32>) -> Result<Vec<usize>> {
    let (granules, slices) = scores.dim();
    if granules == 0 {
        return Err(CompositeError::EmptySequence);
    }
    (0..slices)
        .map(|slice| {
            let mut winner: Option<(usize, f32)> = None;
            for (g, &v) in scores.column(slice).iter().enumerate() {
                if v.is_finite() && winner.map_or(true, |(_, best)| v < best) {
                    winner = Some((g, v));
                }
            }
            winner.map(|(g, _)| g).ok_or_else(|| {
                CompositeError::Config(format!(
                    "tile slice {slice} could not be scored in any of the {granules} granules"
                ))
            })
        })
        .collect()
}

/// Slices won by each granule, keyed by granule index.
pub fn group_by_winner(assignments: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (slice, &g) in assignments.iter().enumerate() {
        groups.entry(g).or_default().push(slice);
    }
    groups
}

/// Assemble a block mosaic from per-slice winners.
///
/// `load(g)` is called once per winning granule and must return its
/// `(bands, h, w)` stack plus its day of year. Granules that win no slice are
/// never loaded. Returns the glued `(bands, h, w)` composite and DOY map.
pub fn per_tile_select<F>(
    assignments: &[usize],
    bands: usize,
    slice_index: usize,
    (h, w): (usize, usize),
    mut load: F,
) -> Result<(Array3<u16>, Array2<u16>)>
where
    F: FnMut(usize) -> Result<(Array3<u16>, u16)>,
{
    let slices = slice_index * slice_index;
    if assignments.len() != slices {
        return Err(CompositeError::ShapeMismatch {
            expected: vec![slices],
            found: vec![assignments.len()],
        });
    }
    let mut doy = slice_raster(slice_index, Array2::<u16>::zeros((h, w)).view())?;
    let (_, bh, bw) = doy.dim();
    let mut tiles = Array4::<u16>::zeros((bands, slices, bh, bw));

    for (granule, won) in group_by_winner(assignments) {
        let (stack, granule_doy) = load(granule)?;
        if stack.dim() != (bands, h, w) {
            let (sb, sh, sw) = stack.dim();
            return Err(CompositeError::ShapeMismatch {
                expected: vec![bands, h, w],
                found: vec![sb, sh, sw],
            });
        }
        info!(granule, slices = ?won, "Copying winning tiles");
        for (b, band) in stack.outer_iter().enumerate() {
            let band_tiles = slice_raster(slice_index, band)?;
            for &slice in &won {
                tiles
                    .slice_mut(s![b, slice, .., ..])
                    .assign(&band_tiles.slice(s![slice, .., ..]));
            }
        }
        for &slice in &won {
            doy.slice_mut(s![slice, .., ..]).fill(granule_doy);
        }
    }

    let mut result = Array3::<u16>::zeros((bands, h, w));
    for b in 0..bands {
        let glued = glue_raster(tiles.slice(s![b, .., .., ..]), h, w)?;
        result.slice_mut(s![b, .., ..]).assign(&glued);
    }
    let doy = glue_raster(doy.view(), h, w)?;
    Ok((result, doy))
}
