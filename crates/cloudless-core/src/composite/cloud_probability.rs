use tracing::debug;

use super::{check_batch, Candidate, SelectionState};
use crate::consts::{CLOUD_NODATA, CLOUD_PROMOTION_TOLERANCE};
use crate::error::Result;

/// Fold one batch into the running minimum-cloud-probability composite.
///
/// Per pixel the candidate with the smallest probability below
/// [`CLOUD_NODATA`] wins the batch (first one on ties); candidates with all
/// bands zero are skipped. An empty slot (still [`CLOUD_NODATA`]) always
/// takes the batch winner. A filled slot is replaced only when the winner is
/// clearer by more than [`CLOUD_PROMOTION_TOLERANCE`].
pub fn cloud_pixel_select(candidates: &[Candidate<'_, u8>], state: &mut SelectionState<u8>) -> Result<()> {
    check_batch(candidates, state)?;
    let (h, w) = state.shape();
    let mut promoted = 0usize;

    for row in 0..h {
        for col in 0..w {
            let mut winner: Option<usize> = None;
            let mut min_val = CLOUD_NODATA;
            for (i, cand) in candidates.iter().enumerate() {
                let p = cand.signal[[row, col]];
                if p < min_val && !cand.is_nodata(row, col) {
                    min_val = p;
                    winner = Some(i);
                }
            }
            let Some(i) = winner else { continue };
            let stored = state.best[[row, col]];
            if stored == CLOUD_NODATA || stored.saturating_sub(min_val) > CLOUD_PROMOTION_TOLERANCE {
                state.promote(&candidates[i], row, col);
                promoted += 1;
            }
        }
    }
    debug!(candidates = candidates.len(), promoted, "Cloud probability batch folded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn run(mask: u8, value: u16, doy: u16, state: &mut SelectionState<u8>) {
        let signal = Array2::from_elem((1, 1), mask);
        let data = Array3::from_elem((1, 1, 1), value);
        let batch = [Candidate { signal: signal.view(), data: data.view(), doy }];
        cloud_pixel_select(&batch, state).unwrap();
    }

    #[test]
    fn nodata_mask_never_wins() {
        let mut state = SelectionState::new(1, (1, 1), CLOUD_NODATA);
        run(CLOUD_NODATA, 100, 3, &mut state);
        assert_eq!(state.doy[[0, 0]], 0);
        assert_eq!(state.best[[0, 0]], CLOUD_NODATA);
    }

    #[test]
    fn smallest_probability_wins_batch() {
        let mut state = SelectionState::new(1, (1, 1), CLOUD_NODATA);
        let a = Array2::from_elem((1, 1), 90u8);
        let b = Array2::from_elem((1, 1), 30u8);
        let da = Array3::from_elem((1, 1, 1), 1u16);
        let db = Array3::from_elem((1, 1, 1), 2u16);
        let batch = [
            Candidate { signal: a.view(), data: da.view(), doy: 10 },
            Candidate { signal: b.view(), data: db.view(), doy: 20 },
        ];
        cloud_pixel_select(&batch, &mut state).unwrap();
        assert_eq!(state.best[[0, 0]], 30);
        assert_eq!(state.data[[0, 0, 0]], 2);
    }

    #[test]
    fn tolerance_damps_small_improvements() {
        let mut state = SelectionState::new(1, (1, 1), CLOUD_NODATA);
        run(50, 1, 1, &mut state);
        run(30, 2, 2, &mut state); // 20 better: not enough
        assert_eq!(state.doy[[0, 0]], 1);
        run(29, 3, 3, &mut state); // 21 better
        assert_eq!(state.doy[[0, 0]], 3);
        assert_eq!(state.best[[0, 0]], 29);
    }
}
