// Frequency table precompute (built once per (dim, end, theta), cached by the caller)
pub mod freqs;

// Broadcast alignment of the table against query/key shapes
pub mod broadcast;

// Rotation kernels (per-forward-pass hot path)
pub mod rope;
