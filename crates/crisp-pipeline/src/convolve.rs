//! 2D stencil convolution (Gaussian blur).
//!
//! Neighbours that fall outside the image simply do not contribute:
//! there is no wrapping, clamping or padding, and the dropped kernel
//! weight is not renormalized. Border pixels of a blurred constant
//! image are therefore darker than the interior.

use crate::kernel::ConvolutionKernel;
use crate::parallel::{self, ExecutionStrategy};
use crate::types::{Dimensions, Image, PipelineError, ensure_dimensions};

/// Convolve `image` with `kernel` into a newly allocated image.
///
/// Runs on the rayon pool. See [`convolve_into`] for the boundary rule.
#[must_use = "returns the convolved image"]
pub fn convolve(image: &Image, kernel: &ConvolutionKernel) -> Image {
    let mut out = Image::new(image.width(), image.height());
    write_convolution(image, kernel, &mut out, ExecutionStrategy::Parallel);
    out
}

/// Convolve `image` with `kernel`, writing every element of `out`.
///
/// For output `(i, j)` the result is the sum over offsets
/// `(x, y) ∈ [-r, r]²` of `kernel[x + r][y + r] * image[i + x][j + y]`,
/// skipping terms whose neighbour lies outside the image.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if `out` does not have the
/// dimensions of `image`. Nothing is written in that case.
pub fn convolve_into(
    image: &Image,
    kernel: &ConvolutionKernel,
    out: &mut Image,
    strategy: ExecutionStrategy,
) -> Result<(), PipelineError> {
    ensure_dimensions(Dimensions::of(image), Dimensions::of(out))?;
    write_convolution(image, kernel, out, strategy);
    Ok(())
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn write_convolution(
    image: &Image,
    kernel: &ConvolutionKernel,
    out: &mut Image,
    strategy: ExecutionStrategy,
) {
    let dims = Dimensions::of(image);
    let (rows, cols) = (dims.rows() as isize, dims.cols());
    let src = image.as_raw();
    let diameter = kernel.diameter();
    let radius = kernel.radius() as isize;
    let weights = kernel.weights();

    parallel::for_each_row(out, cols, strategy, |i, row| {
        let i = i as isize;
        for (j, value) in row.iter_mut().enumerate() {
            let j = j as isize;
            let mut sum = 0.0_f32;
            for x in -radius..=radius {
                let nx = i + x;
                if nx < 0 || nx >= rows {
                    continue;
                }
                let src_row = &src[nx as usize * cols..(nx as usize + 1) * cols];
                let weight_row = &weights[(x + radius) as usize * diameter..][..diameter];
                for y in -radius..=radius {
                    let ny = j + y;
                    if ny >= 0 && ny < cols as isize {
                        sum += weight_row[(y + radius) as usize] * src_row[ny as usize];
                    }
                }
            }
            *value = sum;
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn ramp(width: u32, height: u32) -> Image {
        Image::from_fn(width, height, |x, y| image::Luma([(y * width + x) as f32 / 10.0]))
    }

    #[test]
    fn identity_kernel_reproduces_image_exactly() {
        let img = ramp(9, 6);
        let out = convolve(&img, &ConvolutionKernel::identity());
        assert_eq!(out.as_raw(), img.as_raw());
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = Image::new(17, 31);
        let kernel = ConvolutionKernel::gaussian(5, 10.0).unwrap();
        let out = convolve(&img, &kernel);
        assert_eq!(Dimensions::of(&out), Dimensions::of(&img));
    }

    #[test]
    fn out_of_range_neighbours_are_dropped_not_renormalized() {
        // Box kernel of ones on a constant image: each output counts the
        // in-range neighbours.
        let img = Image::from_pixel(4, 4, image::Luma([1.0]));
        let kernel = ConvolutionKernel::from_weights(vec![1.0; 9], 3).unwrap();
        let out = convolve(&img, &kernel);
        assert_abs_diff_eq!(out.get_pixel(0, 0).0[0], 4.0);
        assert_abs_diff_eq!(out.get_pixel(1, 0).0[0], 6.0);
        assert_abs_diff_eq!(out.get_pixel(1, 1).0[0], 9.0);
        assert_abs_diff_eq!(out.get_pixel(3, 3).0[0], 4.0);
    }

    #[test]
    fn kernel_orientation_is_row_then_column() {
        // A single off-centre weight at kernel row 0, column 1 shifts the
        // image down by one row: out[i][j] = img[i - 1][j].
        let mut weights = vec![0.0; 9];
        weights[1] = 1.0;
        let kernel = ConvolutionKernel::from_weights(weights, 3).unwrap();
        let img = ramp(5, 4);
        let out = convolve(&img, &kernel);
        for y in 0..4 {
            for x in 0..5 {
                let expected = if y == 0 { 0.0 } else { img.get_pixel(x, y - 1).0[0] };
                assert_abs_diff_eq!(out.get_pixel(x, y).0[0], expected);
            }
        }
    }

    #[test]
    fn interior_of_constant_image_unchanged_by_gaussian() {
        let img = Image::from_pixel(12, 12, image::Luma([0.5]));
        let kernel = ConvolutionKernel::gaussian(5, 10.0).unwrap();
        let out = convolve(&img, &kernel);
        for y in 2..10 {
            for x in 2..10 {
                assert_abs_diff_eq!(out.get_pixel(x, y).0[0], 0.5, epsilon = 1e-5);
            }
        }
        // Corners lose more than half the support.
        assert!(out.get_pixel(0, 0).0[0] < 0.35);
    }

    #[test]
    fn serial_and_parallel_agree_bitwise() {
        let img = ramp(23, 19);
        let kernel = ConvolutionKernel::gaussian(5, 2.0).unwrap();
        let mut serial = Image::new(23, 19);
        let mut parallel = Image::new(23, 19);
        convolve_into(&img, &kernel, &mut serial, ExecutionStrategy::Serial).unwrap();
        convolve_into(&img, &kernel, &mut parallel, ExecutionStrategy::Parallel).unwrap();
        assert_eq!(serial.as_raw(), parallel.as_raw());
    }

    #[test]
    fn mismatched_output_is_rejected() {
        let img = Image::new(4, 4);
        let mut out = Image::new(4, 5);
        let err = convolve_into(
            &img,
            &ConvolutionKernel::identity(),
            &mut out,
            ExecutionStrategy::Serial,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));
    }

    #[test]
    fn kernel_larger_than_image_still_sums_in_range_terms() {
        let img = Image::from_pixel(1, 1, image::Luma([2.0]));
        let kernel = ConvolutionKernel::gaussian(5, 1.0).unwrap();
        let out = convolve(&img, &kernel);
        assert_abs_diff_eq!(out.get_pixel(0, 0).0[0], 2.0 * kernel.weight(2, 2));
    }
}
