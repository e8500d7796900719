//! Image processing utilities for mock rendering
//!
//! Currently limited to the Gaussian smoothing used to apply seeing to
//! extended sources.

pub mod convolve;

pub use convolve::{convolve_separable, gaussian_blur_planes, gaussian_kernel_1d};
