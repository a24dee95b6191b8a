use crate::core::types::RopeError;
use log::debug;

/// Rotation base from the original RoPE paper
pub const DEFAULT_THETA: f32 = 10000.0;

/// Precomputed table of unit-magnitude complex rotation factors
///
/// Row-major [end, dim/2]: entry (pos, k) is the unit complex number with phase
/// `pos * theta^(-2k/dim)`. Early frequency bands rotate fast, late bands barely
/// move. Built once for the model's max context length and reused across forward
/// passes; immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct FreqTable {
    /// Real parts (cosines), row-major [seq_len, half_dim]
    re: Vec<f32>,
    /// Imaginary parts (sines), row-major [seq_len, half_dim]
    im: Vec<f32>,
    seq_len: usize,
    half_dim: usize,
}

impl FreqTable {
    /// Precompute rotation factors for positions 0..end over dim/2 frequency bands
    pub fn precompute(dim: usize, end: usize, theta: f32) -> Result<Self, RopeError> {
        // Odd dim leaves a channel without a rotation partner
        if dim == 0 || dim % 2 != 0 {
            return Err(RopeError::InvalidDimension { dim });
        }

        let half_dim = dim / 2;

        // Inverse frequencies theta^(-2k/dim), strictly decreasing from 1.0 for theta > 1
        let inv_freq: Vec<f32> = (0..half_dim)
            .map(|k| theta.powf(-2.0 * (k as f32) / (dim as f32)))
            .collect();

        // Outer product of positions with inverse frequencies, then angle -> (cos, sin)
        let mut re = vec![0.0; end * half_dim];
        let mut im = vec![0.0; end * half_dim];
        for pos in 0..end {
            for k in 0..half_dim {
                let angle = (pos as f32) * inv_freq[k];
                re[pos * half_dim + k] = angle.cos();
                im[pos * half_dim + k] = angle.sin();
            }
        }

        debug!(
            "Precomputed RoPE table: {} positions x {} frequency bands (theta {})",
            end, half_dim, theta
        );

        Ok(Self {
            re,
            im,
            seq_len: end,
            half_dim,
        })
    }

    /// Precompute with the standard rotation base of 10000.0
    pub fn precompute_default(dim: usize, end: usize) -> Result<Self, RopeError> {
        Self::precompute(dim, end, DEFAULT_THETA)
    }

    /// Number of positions in the table
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Number of frequency bands (dim/2)
    pub fn half_dim(&self) -> usize {
        self.half_dim
    }

    /// Borrowed view over the whole table
    pub fn as_slice(&self) -> FreqsSlice<'_> {
        FreqsSlice {
            re: &self.re,
            im: &self.im,
            seq_len: self.seq_len,
            half_dim: self.half_dim,
        }
    }

    /// Borrowed view over rows [start, start + len)
    ///
    /// Used on the decode path: the table covers the max context length, each
    /// forward pass takes the window starting at the current position.
    pub fn slice(&self, start: usize, len: usize) -> Result<FreqsSlice<'_>, RopeError> {
        if start + len > self.seq_len {
            return Err(RopeError::ShapeMismatch {
                expected: format!("rows within 0..{}", self.seq_len),
                got: format!("rows {}..{}", start, start + len),
            });
        }
        let lo = start * self.half_dim;
        let hi = (start + len) * self.half_dim;
        Ok(FreqsSlice {
            re: &self.re[lo..hi],
            im: &self.im[lo..hi],
            seq_len: len,
            half_dim: self.half_dim,
        })
    }
}

/// Non-owning run of consecutive table rows
///
/// Position 0 of the slice corresponds to the first row of the window, so a
/// window taken at decode position p rotates by p's angles at its first row.
#[derive(Debug, Clone, Copy)]
pub struct FreqsSlice<'a> {
    re: &'a [f32],
    im: &'a [f32],
    seq_len: usize,
    half_dim: usize,
}

impl FreqsSlice<'_> {
    /// Number of positions in the slice
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Number of frequency bands (dim/2)
    pub fn half_dim(&self) -> usize {
        self.half_dim
    }

    /// Rotation factor (re, im) for a given position and frequency band
    pub fn factor(&self, pos: usize, band: usize) -> (f32, f32) {
        #[cfg(debug_assertions)]
        debug_assert!(
            pos < self.seq_len && band < self.half_dim,
            "Frequency table index out of bounds"
        );
        let idx = pos * self.half_dim + band;
        (self.re[idx], self.im[idx])
    }
}

mod test {
    use super::*;

    #[test]
    fn test_rejects_odd_or_zero_dim() {
        assert!(FreqTable::precompute_default(3, 8).is_err());
        assert!(FreqTable::precompute_default(0, 8).is_err());
        assert!(FreqTable::precompute_default(4, 8).is_ok());
    }

    #[test]
    fn test_every_entry_has_unit_magnitude() {
        let table = FreqTable::precompute(8, 16, 10000.0).unwrap();
        let slice = table.as_slice();
        for pos in 0..slice.seq_len() {
            for band in 0..slice.half_dim() {
                let (re, im) = slice.factor(pos, band);
                let mag = (re * re + im * im).sqrt();
                assert!((mag - 1.0).abs() < 1e-6, "Entry ({}, {}) has magnitude {}", pos, band, mag);
            }
        }
    }

    #[test]
    fn test_position_zero_is_identity() {
        let table = FreqTable::precompute(8, 4, 10000.0).unwrap();
        let slice = table.as_slice();
        for band in 0..slice.half_dim() {
            let (re, im) = slice.factor(0, band);
            assert!((re - 1.0).abs() < 1e-6);
            assert!(im.abs() < 1e-6);
        }
    }

    #[test]
    fn test_band_angles_strictly_decrease() {
        // Row 1's phase equals the band's base frequency; dim=8 keeps all angles
        // below pi so atan2 recovers them exactly
        let table = FreqTable::precompute(8, 2, 10000.0).unwrap();
        let slice = table.as_slice();
        let mut prev = f32::INFINITY;
        for band in 0..slice.half_dim() {
            let (re, im) = slice.factor(1, band);
            let angle = im.atan2(re);
            assert!(angle < prev, "Band {} angle {} did not decrease", band, angle);
            assert!(angle > 0.0);
            prev = angle;
        }
    }

    #[test]
    fn test_rotation_additivity() {
        // Angle scales linearly with position: row 2 equals row 1 squared in
        // complex terms
        let table = FreqTable::precompute(4, 4, 10000.0).unwrap();
        let slice = table.as_slice();
        for band in 0..slice.half_dim() {
            let (re1, im1) = slice.factor(1, band);
            let (re2, im2) = slice.factor(2, band);
            let sq_re = re1 * re1 - im1 * im1;
            let sq_im = 2.0 * re1 * im1;
            assert!((re2 - sq_re).abs() < 1e-5);
            assert!((im2 - sq_im).abs() < 1e-5);
        }
    }

    #[test]
    fn test_concrete_dim2_table() {
        // Single band with freq 1.0: row 0 is 1+0i, row 1 is cos(1) + i sin(1)
        let table = FreqTable::precompute(2, 2, 10000.0).unwrap();
        assert_eq!(table.seq_len(), 2);
        assert_eq!(table.half_dim(), 1);
        let slice = table.as_slice();
        let (re0, im0) = slice.factor(0, 0);
        assert!((re0 - 1.0).abs() < 1e-6);
        assert!(im0.abs() < 1e-6);
        let (re1, im1) = slice.factor(1, 0);
        assert!((re1 - 1.0f32.cos()).abs() < 1e-6);
        assert!((im1 - 1.0f32.sin()).abs() < 1e-6);
    }

    #[test]
    fn test_slice_window() {
        let table = FreqTable::precompute(4, 8, 10000.0).unwrap();
        let window = table.slice(3, 2).unwrap();
        assert_eq!(window.seq_len(), 2);
        let full = table.as_slice();
        for band in 0..window.half_dim() {
            assert_eq!(window.factor(0, band), full.factor(3, band));
            assert_eq!(window.factor(1, band), full.factor(4, band));
        }
        assert!(table.slice(7, 2).is_err());
    }
}
