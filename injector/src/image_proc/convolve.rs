//! Gaussian convolution used to emulate seeing on extended mocks.
//!
//! The 2D Gaussian is separable, so each plane is filtered with a 1D kernel
//! along x and then along y. Boundaries are zero-padded and the output has
//! the same size as the input.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};

/// Kernel half-width in sigmas
pub const KERNEL_TRUNCATE: f64 = 4.0;

/// Create a normalized 1D Gaussian kernel truncated at `KERNEL_TRUNCATE` sigma
///
/// # Arguments
/// * `sigma` - Standard deviation of the Gaussian, in pixels
///
/// # Returns
/// * Odd-length kernel summing to 1. A non-positive sigma yields the
///   identity kernel `[1.0]`.
pub fn gaussian_kernel_1d(sigma: f64) -> Array1<f64> {
    if sigma <= 0.0 {
        return Array1::ones(1);
    }

    let radius = (KERNEL_TRUNCATE * sigma + 0.5) as usize;
    let mut kernel = Array1::from_shape_fn(2 * radius + 1, |i| {
        let x = i as f64 - radius as f64;
        (-(x * x) / (2.0 * sigma * sigma)).exp()
    });

    let sum = kernel.sum();
    if sum > 0.0 {
        kernel.mapv_inplace(|v| v / sum);
    }

    kernel
}

/// Convolve a 1D signal with a centered odd-length kernel, zero-padded
fn convolve_line(line: &ArrayView1<f64>, kernel: &ArrayView1<f64>, out: &mut [f64]) {
    let len = line.len() as isize;
    let pad = (kernel.len() / 2) as isize;

    for (i, slot) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (k, &weight) in kernel.iter().enumerate() {
            let src = i as isize + k as isize - pad;
            if src >= 0 && src < len {
                sum += line[src as usize] * weight;
            }
        }
        *slot = sum;
    }
}

/// Separable 2D convolution of an image with the same 1D kernel on both axes
///
/// # Arguments
/// * `image` - Input image as a `[y, x]` array
/// * `kernel` - Odd-length 1D kernel
///
/// # Returns
/// * Convolved image, same shape as the input
pub fn convolve_separable(image: &ArrayView2<f64>, kernel: &ArrayView1<f64>) -> Array2<f64> {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((rows, cols));
    }

    // Along x
    let mut horizontal = Array2::zeros((rows, cols));
    let mut buf = vec![0.0; cols];
    for (row_in, mut row_out) in image
        .axis_iter(Axis(0))
        .zip(horizontal.axis_iter_mut(Axis(0)))
    {
        convolve_line(&row_in, kernel, &mut buf);
        row_out.assign(&ArrayView1::from(&buf[..]));
    }

    // Along y
    let mut output = Array2::zeros((rows, cols));
    let mut buf = vec![0.0; rows];
    for (col_in, mut col_out) in horizontal
        .axis_iter(Axis(1))
        .zip(output.axis_iter_mut(Axis(1)))
    {
        convolve_line(&col_in, kernel, &mut buf);
        col_out.assign(&ArrayView1::from(&buf[..]));
    }

    output
}

/// Blur every spatial plane of a `[w, y, x]` volume with a circular Gaussian
///
/// The spectral axis is left untouched.
pub fn gaussian_blur_planes(volume: &mut Array3<f64>, sigma: f64) {
    let kernel = gaussian_kernel_1d(sigma);
    if kernel.len() == 1 {
        return;
    }

    for mut plane in volume.axis_iter_mut(Axis(0)) {
        let blurred = convolve_separable(&plane.view(), &kernel.view());
        plane.assign(&blurred);
    }
}
