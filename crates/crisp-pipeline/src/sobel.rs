//! Sobel gradient-magnitude edge detection.
//!
//! Uses the same boundary rule as [`crate::convolve`]: neighbours
//! outside the image are skipped. The magnitude is not normalized, so
//! values can exceed 1 even for inputs in `[0, 1]`.

use crate::parallel::{self, ExecutionStrategy};
use crate::types::{Dimensions, Image, PipelineError, ensure_dimensions};

/// Vertical-gradient operator, indexed `[row offset][column offset]`.
pub const SOBEL_X: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Horizontal-gradient operator, indexed `[row offset][column offset]`.
pub const SOBEL_Y: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];

/// Gradient magnitude of `image` in a newly allocated image.
#[must_use = "returns the gradient magnitude"]
pub fn sobel(image: &Image) -> Image {
    let mut out = Image::new(image.width(), image.height());
    write_sobel(image, &mut out, ExecutionStrategy::Parallel);
    out
}

/// Gradient magnitude `sqrt(gx² + gy²)` of `image`, written into `out`.
///
/// Computed with `hypot`, so it stays finite whenever the magnitude
/// itself is representable.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if `out` does not have the
/// dimensions of `image`.
pub fn sobel_into(
    image: &Image,
    out: &mut Image,
    strategy: ExecutionStrategy,
) -> Result<(), PipelineError> {
    ensure_dimensions(Dimensions::of(image), Dimensions::of(out))?;
    write_sobel(image, out, strategy);
    Ok(())
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn write_sobel(image: &Image, out: &mut Image, strategy: ExecutionStrategy) {
    let dims = Dimensions::of(image);
    let (rows, cols) = (dims.rows() as isize, dims.cols() as isize);
    let src = image.as_raw();

    parallel::for_each_row(out, dims.cols(), strategy, |i, row| {
        let i = i as isize;
        for (j, value) in row.iter_mut().enumerate() {
            let j = j as isize;
            let (mut gx, mut gy) = (0.0_f32, 0.0_f32);
            for (x, (wx_row, wy_row)) in SOBEL_X.iter().zip(&SOBEL_Y).enumerate() {
                let nx = i + x as isize - 1;
                if nx < 0 || nx >= rows {
                    continue;
                }
                for (y, (wx, wy)) in wx_row.iter().zip(wy_row).enumerate() {
                    let ny = j + y as isize - 1;
                    if ny >= 0 && ny < cols {
                        let neighbour = src[(nx * cols + ny) as usize];
                        gx += wx * neighbour;
                        gy += wy * neighbour;
                    }
                }
            }
            *value = gx.hypot(gy);
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn zero_image_has_zero_gradient() {
        let img = Image::new(8, 8);
        let out = sobel(&img);
        assert!(out.as_raw().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn interior_of_constant_image_has_zero_gradient() {
        let img = Image::from_pixel(6, 6, image::Luma([0.5]));
        let out = sobel(&img);
        for y in 1..5 {
            for x in 1..5 {
                assert_abs_diff_eq!(out.get_pixel(x, y).0[0], 0.0);
            }
        }
    }

    #[test]
    fn border_of_constant_image_sees_a_step() {
        // Top row, interior column: only the bottom kernel row is in range,
        // so gx = (1 + 2 + 1) * v and gy = 0.
        let img = Image::from_pixel(6, 6, image::Luma([0.5]));
        let out = sobel(&img);
        assert_abs_diff_eq!(out.get_pixel(2, 0).0[0], 2.0, epsilon = 1e-6);
        // Corner: gx = (2 + 1) * v, gy = (2 + 1) * v.
        let corner = 1.5_f32.hypot(1.5);
        assert_abs_diff_eq!(out.get_pixel(0, 0).0[0], corner, epsilon = 1e-6);
    }

    #[test]
    fn vertical_edge_is_detected_by_horizontal_operator() {
        // Left half 0, right half 1: gx = 0, |gy| = 4 on the two columns
        // straddling the step.
        let img = Image::from_fn(8, 8, |x, _| image::Luma([if x < 4 { 0.0 } else { 1.0 }]));
        let out = sobel(&img);
        assert_abs_diff_eq!(out.get_pixel(3, 4).0[0], 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out.get_pixel(4, 4).0[0], 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out.get_pixel(1, 4).0[0], 0.0);
    }

    #[test]
    fn large_gradients_do_not_overflow() {
        // gy = 4 * 5e18 = 2e19, whose square exceeds f32::MAX.
        let scale = 5e18_f32;
        let img = Image::from_fn(8, 8, |x, _| image::Luma([if x < 4 { 0.0 } else { scale }]));
        let out = sobel(&img);
        assert!(out.as_raw().iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(out.get_pixel(3, 4).0[0] / scale, 4.0, epsilon = 1e-5);
    }

    #[test]
    fn serial_and_parallel_agree_bitwise() {
        let img = Image::from_fn(13, 9, |x, y| image::Luma([((x * 7 + y * 3) % 11) as f32 / 11.0]));
        let mut serial = Image::new(13, 9);
        let mut parallel = Image::new(13, 9);
        sobel_into(&img, &mut serial, ExecutionStrategy::Serial).unwrap();
        sobel_into(&img, &mut parallel, ExecutionStrategy::Parallel).unwrap();
        assert_eq!(serial.as_raw(), parallel.as_raw());
    }

    #[test]
    fn mismatched_output_is_rejected() {
        let img = Image::new(3, 3);
        let mut out = Image::new(2, 3);
        assert!(matches!(
            sobel_into(&img, &mut out, ExecutionStrategy::Parallel),
            Err(PipelineError::ShapeMismatch { .. })
        ));
    }
}
