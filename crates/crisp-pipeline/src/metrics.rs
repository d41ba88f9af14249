//! Aggregate difference metrics between two images.

use crate::types::{Dimensions, Image, PipelineError, ensure_dimensions};

/// `Σ |a[i] - b[i]|`, accumulated in `f64`.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the images differ in size.
pub fn sum_abs_difference(a: &Image, b: &Image) -> Result<f64, PipelineError> {
    ensure_dimensions(Dimensions::of(a), Dimensions::of(b))?;
    Ok(a.as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| (f64::from(x) - f64::from(y)).abs())
        .sum())
}

/// Largest element-wise absolute difference.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the images differ in size.
pub fn max_abs_difference(a: &Image, b: &Image) -> Result<f64, PipelineError> {
    ensure_dimensions(Dimensions::of(a), Dimensions::of(b))?;
    Ok(a.as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| (f64::from(x) - f64::from(y)).abs())
        .fold(0.0, f64::max))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn identical_images_have_zero_difference() {
        let img = Image::from_fn(5, 4, |x, y| image::Luma([(x + y) as f32]));
        assert_abs_diff_eq!(sum_abs_difference(&img, &img).unwrap(), 0.0);
        assert_abs_diff_eq!(max_abs_difference(&img, &img).unwrap(), 0.0);
    }

    #[test]
    fn differences_are_absolute() {
        let a = Image::from_raw(3, 1, vec![1.0, 0.0, 0.5]).unwrap();
        let b = Image::from_raw(3, 1, vec![0.0, 1.0, 0.25]).unwrap();
        assert_abs_diff_eq!(sum_abs_difference(&a, &b).unwrap(), 2.25);
        assert_abs_diff_eq!(max_abs_difference(&a, &b).unwrap(), 1.0);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        assert!(sum_abs_difference(&Image::new(2, 2), &Image::new(2, 3)).is_err());
        assert!(max_abs_difference(&Image::new(2, 2), &Image::new(3, 2)).is_err());
    }
}
