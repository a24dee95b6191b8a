use crate::core::types::RopeError;
use crate::ops::freqs::FreqsSlice;

/// Frequency table view aligned to a complex-viewed query/key tensor
///
/// The table is rank 2; the target is [seq_len, batch/head dims..., dim/2].
/// Interior dimensions collapse to singletons so one elementwise multiply
/// applies the same per-position, per-band factor across every batch and head.
/// Aliases the table storage; no copy.
#[derive(Debug, Clone)]
pub struct BroadcastFreqs<'a> {
    freqs: FreqsSlice<'a>,
    shape: Vec<usize>,
}

/// Align a frequency table slice with the shape of a complex-viewed tensor
///
/// `dims` is the target shape [seq_len, ..., dim/2], rank at least 2. The
/// slice must match (dims[0], dims[last]) exactly; anything else is a caller
/// bug surfaced as ShapeMismatch before any arithmetic runs.
pub fn reshape_for_broadcast<'a>(
    freqs: FreqsSlice<'a>,
    dims: &[usize],
) -> Result<BroadcastFreqs<'a>, RopeError> {
    let ndim = dims.len();
    if ndim < 2 {
        return Err(RopeError::ShapeMismatch {
            expected: "a tensor of rank >= 2".to_string(),
            got: format!("rank {}", ndim),
        });
    }

    if freqs.seq_len() != dims[0] || freqs.half_dim() != dims[ndim - 1] {
        return Err(RopeError::ShapeMismatch {
            expected: format!("frequency table of shape [{}, {}]", dims[0], dims[ndim - 1]),
            got: format!(
                "frequency table of shape [{}, {}]",
                freqs.seq_len(),
                freqs.half_dim()
            ),
        });
    }

    // Keep the position and band dimensions, collapse everything in between
    let shape: Vec<usize> = dims
        .iter()
        .enumerate()
        .map(|(i, &d)| if i == 0 || i == ndim - 1 { d } else { 1 })
        .collect();

    Ok(BroadcastFreqs { freqs, shape })
}

impl BroadcastFreqs<'_> {
    /// Broadcast shape [seq_len, 1, ..., 1, dim/2]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Rotation factor (re, im) for a position and band; every interior index
    /// broadcasts to the same entry
    pub fn factor(&self, pos: usize, band: usize) -> (f32, f32) {
        self.freqs.factor(pos, band)
    }
}

mod test {
    use super::*;
    use crate::ops::freqs::FreqTable;

    #[test]
    fn test_interior_dims_collapse_to_one() {
        let table = FreqTable::precompute(8, 6, 10000.0).unwrap();
        let view = reshape_for_broadcast(table.as_slice(), &[6, 2, 3, 4]).unwrap();
        assert_eq!(view.shape(), &[6, 1, 1, 4]);
        assert_eq!(view.factor(5, 3), table.as_slice().factor(5, 3));
    }

    #[test]
    fn test_rank_two_passes_through() {
        let table = FreqTable::precompute(4, 3, 10000.0).unwrap();
        let view = reshape_for_broadcast(table.as_slice(), &[3, 2]).unwrap();
        assert_eq!(view.shape(), &[3, 2]);
    }

    #[test]
    fn test_mismatched_shapes_are_rejected() {
        let table = FreqTable::precompute(8, 6, 10000.0).unwrap();
        // Wrong seq_len
        assert!(reshape_for_broadcast(table.as_slice(), &[5, 2, 4]).is_err());
        // Wrong band count
        assert!(reshape_for_broadcast(table.as_slice(), &[6, 2, 3]).is_err());
        // Rank too low
        assert!(reshape_for_broadcast(table.as_slice(), &[6]).is_err());
    }
}
