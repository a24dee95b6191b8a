//! Rotary positional embeddings (RoPE) for transformer attention.
//!
//! Encodes relative token position by rotating adjacent channel pairs of
//! query/key vectors by a position- and frequency-band-dependent angle:
//!
//!   For each pair `(x[2k], x[2k+1])` at position `pos`:
//!     `angle    = pos * theta^(-2k / dim)`
//!     `y[2k]    = x[2k] * cos(angle) - x[2k+1] * sin(angle)`
//!     `y[2k+1]  = x[2k] * sin(angle) + x[2k+1] * cos(angle)`
//!
//! The attention layer precomputes a `FreqTable` once for its max context
//! length, then calls `apply_rotary` on each forward pass with the current
//! query/key tensors and a window of the table.

pub mod core;
pub mod ops;

pub use crate::core::types::{RopeError, Tensor, TensorType};
pub use crate::ops::broadcast::{reshape_for_broadcast, BroadcastFreqs};
pub use crate::ops::freqs::{FreqTable, FreqsSlice, DEFAULT_THETA};
pub use crate::ops::rope::{apply_rotary, rope_inplace};
