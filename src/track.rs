use ultraviolet::f32x8;

/// Utility functions and conversions for feature vectors
pub mod utils;

/// Number of f32 lanes in one feature block
///
pub const FEATURE_LANES_SIZE: usize = 8;

/// Appearance feature vector
///
/// The vector is packed into `f32x8` blocks, the tail block is padded with zeros.
///
pub type Feature = Vec<f32x8>;
