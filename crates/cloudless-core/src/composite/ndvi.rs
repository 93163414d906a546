use tracing::debug;

use super::{check_batch, Candidate, SelectionState};
use crate::error::Result;

/// Fold one batch into the running maximum-NDVI composite.
///
/// Per pixel the candidate with the strictly greatest score wins the batch,
/// skipping candidates whose bands are all zero there. The batch winner
/// replaces the stored one when its score is greater than or equal to it, so
/// later batches take ties. Pixels where every candidate is no-data keep the
/// stored state.
pub fn ndvi_pixel_select(candidates: &[Candidate<'_, f32>], state: &mut SelectionState<f32>) -> Result<()> {
    check_batch(candidates, state)?;
    let (h, w) = state.shape();
    let mut promoted = 0usize;

    for row in 0..h {
        for col in 0..w {
            let mut winner: Option<usize> = None;
            let mut max_val = f32::NEG_INFINITY;
            for (i, cand) in candidates.iter().enumerate() {
                let score = cand.signal[[row, col]];
                if score > max_val && !cand.is_nodata(row, col) {
                    max_val = score;
                    winner = Some(i);
                }
            }
            if let Some(i) = winner {
                if state.best[[row, col]] <= max_val {
                    state.promote(&candidates[i], row, col);
                    promoted += 1;
                }
            }
        }
    }
    debug!(candidates = candidates.len(), promoted, "NDVI batch folded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::NDVI_INITIAL_SCORE;
    use ndarray::{Array2, Array3};

    #[test]
    fn nodata_candidate_never_wins() {
        let score_a = Array2::from_elem((1, 1), 0.9f32);
        let data_a = Array3::<u16>::zeros((2, 1, 1));
        let score_b = Array2::from_elem((1, 1), 0.1f32);
        let data_b = Array3::from_elem((2, 1, 1), 42u16);
        let mut state = SelectionState::new(2, (1, 1), NDVI_INITIAL_SCORE);
        let batch = [
            Candidate { signal: score_a.view(), data: data_a.view(), doy: 1 },
            Candidate { signal: score_b.view(), data: data_b.view(), doy: 2 },
        ];
        ndvi_pixel_select(&batch, &mut state).unwrap();
        assert_eq!(state.doy[[0, 0]], 2);
        assert_eq!(state.data[[1, 0, 0]], 42);
    }

    #[test]
    fn all_nodata_keeps_state() {
        let score = Array2::from_elem((1, 1), 0.5f32);
        let data = Array3::<u16>::zeros((1, 1, 1));
        let mut state = SelectionState::new(1, (1, 1), NDVI_INITIAL_SCORE);
        let batch = [Candidate { signal: score.view(), data: data.view(), doy: 7 }];
        ndvi_pixel_select(&batch, &mut state).unwrap();
        assert_eq!(state.doy[[0, 0]], 0);
        assert_eq!(state.best[[0, 0]], NDVI_INITIAL_SCORE);
    }

    #[test]
    fn equal_score_in_later_batch_takes_over() {
        let score = Array2::from_elem((1, 1), 0.3f32);
        let first = Array3::from_elem((1, 1, 1), 10u16);
        let second = Array3::from_elem((1, 1, 1), 20u16);
        let mut state = SelectionState::new(1, (1, 1), NDVI_INITIAL_SCORE);
        ndvi_pixel_select(&[Candidate { signal: score.view(), data: first.view(), doy: 1 }], &mut state).unwrap();
        ndvi_pixel_select(&[Candidate { signal: score.view(), data: second.view(), doy: 2 }], &mut state).unwrap();
        assert_eq!(state.data[[0, 0, 0]], 20);
        assert_eq!(state.doy[[0, 0]], 2);
    }

    #[test]
    fn first_candidate_wins_tie_within_batch() {
        let score = Array2::from_elem((1, 1), 0.3f32);
        let a = Array3::from_elem((1, 1, 1), 10u16);
        let b = Array3::from_elem((1, 1, 1), 20u16);
        let mut state = SelectionState::new(1, (1, 1), NDVI_INITIAL_SCORE);
        let batch = [
            Candidate { signal: score.view(), data: a.view(), doy: 1 },
            Candidate { signal: score.view(), data: b.view(), doy: 2 },
        ];
        ndvi_pixel_select(&batch, &mut state).unwrap();
        assert_eq!(state.doy[[0, 0]], 1);
    }
}
