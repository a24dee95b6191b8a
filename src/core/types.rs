use half::f16;
use thiserror::Error;

/// Tensor element type identifier - public for zero-overhead kernel dispatch
/// Used by the rotation kernels to cast outputs back to the input precision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
    /// Unquantized float32 activations
    F32,
    /// Half-precision activations, promoted to f32 inside kernels
    F16,
}

/// Real-valued activation tensor of shape [seq_len, ..., dim]
/// Row-major flat storage, immutable by design - all fields except tensor_type are private
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    /// Public field for zero-overhead type checking in kernels
    pub tensor_type: TensorType,

    /// Tensor dimensions (e.g., [seq_len, n_heads, head_dim])
    dimensions: Vec<usize>,

    /// For F32: raw float32 values (row-major order)
    /// For F16: None
    f32_data: Option<Vec<f32>>,

    /// For F16: raw half-precision values (row-major order)
    /// For F32: None
    f16_data: Option<Vec<f16>>,
}

impl Tensor {
    /// Create a float32 tensor, checking that the element count matches the shape
    pub fn from_f32(dimensions: Vec<usize>, data: Vec<f32>) -> Result<Self, RopeError> {
        let expected: usize = dimensions.iter().product();
        if data.len() != expected {
            return Err(RopeError::ShapeMismatch {
                expected: format!("{} elements for dimensions {:?}", expected, dimensions),
                got: format!("{} elements", data.len()),
            });
        }
        Ok(Self {
            tensor_type: TensorType::F32,
            dimensions,
            f32_data: Some(data),
            f16_data: None,
        })
    }

    /// Create a half-precision tensor, checking that the element count matches the shape
    pub fn from_f16(dimensions: Vec<usize>, data: Vec<f16>) -> Result<Self, RopeError> {
        let expected: usize = dimensions.iter().product();
        if data.len() != expected {
            return Err(RopeError::ShapeMismatch {
                expected: format!("{} elements for dimensions {:?}", expected, dimensions),
                got: format!("{} elements", data.len()),
            });
        }
        Ok(Self {
            tensor_type: TensorType::F16,
            dimensions,
            f32_data: None,
            f16_data: Some(data),
        })
    }

    /// Get tensor dimensions
    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    /// Get total number of elements
    pub fn num_elements(&self) -> usize {
        self.dimensions.iter().product()
    }

    /// Get F32 data (for F32 tensors)
    /// Returns None if tensor is half precision
    pub fn f32_data(&self) -> Option<&[f32]> {
        self.f32_data.as_deref()
    }

    /// Get F16 data (for F16 tensors)
    /// Returns None if tensor is float32
    pub fn f16_data(&self) -> Option<&[f16]> {
        self.f16_data.as_deref()
    }

    /// Promoting copy of the data: f16 values are widened to f32, f32 is cloned as-is
    pub fn to_f32(&self) -> Vec<f32> {
        if let Some(data) = &self.f32_data {
            return data.clone();
        }
        if let Some(data) = &self.f16_data {
            return data.iter().map(|v| v.to_f32()).collect();
        }
        // Constructors always populate exactly one of the two buffers
        unreachable!("tensor holds no data")
    }
}

#[derive(Debug, Error)]
pub enum RopeError {
    #[error("Invalid dimension for RoPE: {dim} should be even and positive.")]
    InvalidDimension { dim: usize },

    #[error("Shape mismatch for RoPE: expected {expected}, got {got}.")]
    ShapeMismatch { expected: String, got: String },
}

mod test {
    use super::*;

    #[test]
    fn test_from_f32_checks_element_count() {
        let t = Tensor::from_f32(vec![2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(t.dimensions(), &[2, 3]);
        assert_eq!(t.num_elements(), 6);
        assert!(Tensor::from_f32(vec![2, 3], vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_to_f32_promotes_half() {
        let data = vec![half::f16::from_f32(0.5), half::f16::from_f32(-2.0)];
        let t = Tensor::from_f16(vec![1, 2], data).unwrap();
        assert_eq!(t.tensor_type, TensorType::F16);
        let wide = t.to_f32();
        assert!((wide[0] - 0.5).abs() < 1e-6);
        assert!((wide[1] + 2.0).abs() < 1e-6);
    }
}
