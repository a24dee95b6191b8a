use crate::core::types::{RopeError, Tensor, TensorType};
use crate::ops::broadcast::{reshape_for_broadcast, BroadcastFreqs};
use crate::ops::freqs::FreqsSlice;
use half::f16;

/// Apply rotary embeddings to query and key tensors
///
/// Both tensors have shape [seq_len, ..., dim] with an even trailing dim read
/// as dim/2 consecutive (re, im) pairs. Each pair is rotated by the position-
/// and band-specific angle from the frequency table: a complex multiply by a
/// unit factor, so per-pair magnitudes are preserved. Inputs are promoted to
/// f32 for the multiply and the outputs are cast back to the input precision.
///
/// Returns fresh tensors with the exact shape and dtype of the inputs; the
/// inputs are never mutated.
pub fn apply_rotary(
    xq: &Tensor,
    xk: &Tensor,
    freqs: FreqsSlice<'_>,
) -> Result<(Tensor, Tensor), RopeError> {
    let q_dims = xq.dimensions();
    let k_dims = xk.dimensions();

    // The key must share the query's shape outright; the broadcast view is
    // built against the query and reused for both
    if q_dims != k_dims {
        return Err(RopeError::ShapeMismatch {
            expected: format!("key tensor of shape {:?}", q_dims),
            got: format!("key tensor of shape {:?}", k_dims),
        });
    }

    let ndim = q_dims.len();
    if ndim < 2 {
        return Err(RopeError::ShapeMismatch {
            expected: "query/key tensors of rank >= 2".to_string(),
            got: format!("rank {}", ndim),
        });
    }

    let dim = q_dims[ndim - 1];
    if dim == 0 || dim % 2 != 0 {
        return Err(RopeError::InvalidDimension { dim });
    }
    let half_dim = dim / 2;

    // Complex view of the shape: trailing dim becomes dim/2 pairs
    let mut complex_dims = q_dims.to_vec();
    complex_dims[ndim - 1] = half_dim;
    let broadcast = reshape_for_broadcast(freqs, &complex_dims)?;

    // Promote to f32 so half-precision inputs don't lose accuracy in the multiply
    let q_wide = xq.to_f32();
    let k_wide = xk.to_f32();

    let seq_len = q_dims[0];
    let inner: usize = q_dims[1..ndim - 1].iter().product();

    let q_rotated = rotate_pairs(&q_wide, seq_len, inner, half_dim, &broadcast);
    let k_rotated = rotate_pairs(&k_wide, seq_len, inner, half_dim, &broadcast);

    let xq_out = restore_dtype(xq.tensor_type, q_dims.to_vec(), q_rotated)?;
    let xk_out = restore_dtype(xk.tensor_type, k_dims.to_vec(), k_rotated)?;
    Ok((xq_out, xk_out))
}

/// Rotate every (re, im) pair of a flat row-major buffer by its broadcast factor
fn rotate_pairs(
    data: &[f32],
    seq_len: usize,
    inner: usize,
    half_dim: usize,
    freqs: &BroadcastFreqs<'_>,
) -> Vec<f32> {
    #[cfg(debug_assertions)]
    debug_assert_eq!(
        data.len(),
        seq_len * inner * half_dim * 2,
        "Flat buffer length doesn't match the tensor shape"
    );

    let mut out = vec![0.0; data.len()];
    for pos in 0..seq_len {
        for j in 0..inner {
            let row = (pos * inner + j) * half_dim;
            for band in 0..half_dim {
                let idx = (row + band) * 2;
                let (c, s) = freqs.factor(pos, band);
                let a = data[idx];
                let b = data[idx + 1];
                // (a + bi)(c + si) = (ac - bs) + (as + bc)i
                out[idx] = a * c - b * s;
                out[idx + 1] = a * s + b * c;
            }
        }
    }
    out
}

fn restore_dtype(
    tensor_type: TensorType,
    dims: Vec<usize>,
    data: Vec<f32>,
) -> Result<Tensor, RopeError> {
    match tensor_type {
        TensorType::F32 => Tensor::from_f32(dims, data),
        TensorType::F16 => {
            Tensor::from_f16(dims, data.iter().map(|&v| f16::from_f32(v)).collect())
        }
    }
}

/// In-place rotation of a single head vector at one position, for the decode
/// path where no table window is worth building
///
/// Rope can be applied to a subset of the vec elements (partial rotary), but it
/// still needs an even number of elements; `rotary_dim == vec.len()` agrees
/// with `apply_rotary` for the same theta.
pub fn rope_inplace(
    vec: &mut [f32],
    pos: usize,
    rotary_dim: usize,
    theta: f32,
) -> Result<(), RopeError> {
    if rotary_dim > vec.len() || rotary_dim % 2 != 0 {
        return Err(RopeError::InvalidDimension { dim: rotary_dim });
    }

    let num_pairs = rotary_dim / 2;
    for k in 0..num_pairs {
        let angle = (pos as f32) * theta.powf((-2.0 * (k as f32)) / (rotary_dim as f32));
        let (sin, cos) = angle.sin_cos();
        let x0 = vec[2 * k];
        let x1 = vec[2 * k + 1];
        vec[2 * k] = x0 * cos - x1 * sin;
        vec[2 * k + 1] = x0 * sin + x1 * cos;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ops::freqs::FreqTable;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_position_zero_leaves_vectors_unchanged() {
        let table = FreqTable::precompute(4, 1, 10000.0).unwrap();
        let xq = Tensor::from_f32(vec![1, 4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let xk = Tensor::from_f32(vec![1, 4], vec![-1.0, 0.5, 0.0, 2.0]).unwrap();

        let (q_out, k_out) = apply_rotary(&xq, &xk, table.as_slice()).unwrap();

        let q = q_out.f32_data().unwrap();
        let k = k_out.f32_data().unwrap();
        for i in 0..4 {
            assert!((q[i] - xq.f32_data().unwrap()[i]).abs() < 1e-6);
            assert!((k[i] - xk.f32_data().unwrap()[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_known_rotation_dim2() {
        // Single band, freq 1.0: position 1 rotates (0, 1) to (-sin 1, cos 1)
        let table = FreqTable::precompute(2, 2, 10000.0).unwrap();
        let xq = Tensor::from_f32(vec![2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let xk = xq.clone();

        let (q_out, _) = apply_rotary(&xq, &xk, table.as_slice()).unwrap();
        let q = q_out.f32_data().unwrap();

        assert!((q[0] - 1.0).abs() < 1e-6);
        assert!(q[1].abs() < 1e-6);
        assert!((q[2] + 1.0f32.sin()).abs() < 1e-6);
        assert!((q[3] - 1.0f32.cos()).abs() < 1e-6);
    }

    #[test]
    fn test_pair_magnitudes_are_preserved() {
        let mut rng = StdRng::seed_from_u64(42);
        let dims = vec![3, 2, 2, 8];
        let n: usize = dims.iter().product();
        let data: Vec<f32> = (0..n).map(|_| rng.gen_range(-2.0..2.0)).collect();

        let xq = Tensor::from_f32(dims.clone(), data.clone()).unwrap();
        let xk = Tensor::from_f32(dims, data.iter().map(|v| v * 0.5).collect()).unwrap();
        let table = FreqTable::precompute(8, 3, 10000.0).unwrap();

        let (q_out, k_out) = apply_rotary(&xq, &xk, table.as_slice()).unwrap();

        for (input, output) in [
            (xq.f32_data().unwrap(), q_out.f32_data().unwrap()),
            (xk.f32_data().unwrap(), k_out.f32_data().unwrap()),
        ] {
            for pair in 0..n / 2 {
                let before = (input[2 * pair].powi(2) + input[2 * pair + 1].powi(2)).sqrt();
                let after = (output[2 * pair].powi(2) + output[2 * pair + 1].powi(2)).sqrt();
                assert!(
                    (before - after).abs() < 1e-5,
                    "Pair {} norm changed from {} to {}",
                    pair,
                    before,
                    after
                );
            }
        }
    }

    #[test]
    fn test_shape_and_dtype_round_trip_f16() {
        let data: Vec<f16> = [0.25f32, -1.5, 2.0, 0.0, 1.0, 1.0, -0.5, 3.0]
            .iter()
            .map(|&v| f16::from_f32(v))
            .collect();
        let xq = Tensor::from_f16(vec![2, 1, 4], data.clone()).unwrap();
        let xk = Tensor::from_f16(vec![2, 1, 4], data).unwrap();
        let table = FreqTable::precompute(4, 2, 10000.0).unwrap();

        let (q_out, k_out) = apply_rotary(&xq, &xk, table.as_slice()).unwrap();

        assert_eq!(q_out.tensor_type, TensorType::F16);
        assert_eq!(k_out.tensor_type, TensorType::F16);
        assert_eq!(q_out.dimensions(), &[2, 1, 4]);
        assert_eq!(k_out.dimensions(), &[2, 1, 4]);

        // Position 0 row survives the f16 round trip untouched
        let q = q_out.f16_data().unwrap();
        assert!((q[0].to_f32() - 0.25).abs() < 1e-3);
        assert!((q[1].to_f32() + 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_query_key_shape_disagreement_is_rejected() {
        let table = FreqTable::precompute(4, 2, 10000.0).unwrap();
        let xq = Tensor::from_f32(vec![2, 2, 4], vec![0.0; 16]).unwrap();
        let xk = Tensor::from_f32(vec![2, 3, 4], vec![0.0; 24]).unwrap();
        assert!(apply_rotary(&xq, &xk, table.as_slice()).is_err());
    }

    #[test]
    fn test_odd_trailing_dim_is_rejected() {
        let table = FreqTable::precompute(4, 2, 10000.0).unwrap();
        let xq = Tensor::from_f32(vec![2, 3], vec![0.0; 6]).unwrap();
        let xk = xq.clone();
        let err = apply_rotary(&xq, &xk, table.as_slice()).unwrap_err();
        assert!(matches!(err, RopeError::InvalidDimension { dim: 3 }));
    }

    #[test]
    fn test_table_window_mismatch_is_rejected() {
        // Table rows don't cover the tensor's seq_len
        let table = FreqTable::precompute(4, 1, 10000.0).unwrap();
        let xq = Tensor::from_f32(vec![2, 4], vec![0.0; 8]).unwrap();
        let xk = xq.clone();
        assert!(apply_rotary(&xq, &xk, table.as_slice()).is_err());
    }

    #[test]
    fn test_rope_inplace_known_values() {
        let mut v = vec![1.0, 2.0];
        rope_inplace(&mut v[..], 1, 2, 1.0).unwrap();
        assert!((v[0] + 1.1426396637).abs() < 1e-5);
        assert!((v[1] - 1.9220755966).abs() < 1e-5);
    }

    #[test]
    fn test_rope_inplace_matches_apply_rotary() {
        let mut v = vec![1.0, 2.0, 3.0, 4.0];
        rope_inplace(&mut v[..], 2, 4, 10000.0).unwrap();

        let table = FreqTable::precompute(4, 3, 10000.0).unwrap();
        let window = table.slice(2, 1).unwrap();
        let xq = Tensor::from_f32(vec![1, 4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let xk = xq.clone();
        let (q_out, _) = apply_rotary(&xq, &xk, window).unwrap();

        let q = q_out.f32_data().unwrap();
        for i in 0..4 {
            assert!((v[i] - q[i]).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rope_inplace_partial_span() {
        // Only the first rotary_dim elements move
        let mut v = vec![1.0, 2.0, 5.0, 6.0];
        rope_inplace(&mut v[..], 3, 2, 10000.0).unwrap();
        assert!((v[2] - 5.0).abs() < 1e-6);
        assert!((v[3] - 6.0).abs() < 1e-6);

        assert!(rope_inplace(&mut v[..], 1, 6, 10000.0).is_err());
        assert!(rope_inplace(&mut v[..], 1, 3, 10000.0).is_err());
    }
}
