//! Mask extension: stretch an edge mask over its reduced range.
//!
//! Each element maps to `MASK_AMPLIFICATION * (v - min) / (max - min)`,
//! saturated at 1. There is no lower clamp; with `min` and `max` taken
//! from the mask itself every value lands in `[0, 1]`.

use crate::parallel::{self, ExecutionStrategy};
use crate::types::{Dimensions, Image, PipelineError, ensure_dimensions};

/// Gain applied to the normalized mask before saturation.
pub const MASK_AMPLIFICATION: f32 = 5.0;

/// Element-wise block size used by the convenience entry points.
const DEFAULT_BLOCK: usize = crate::types::PipelineConfig::DEFAULT_BLOCK_SIZE;

/// Extend `mask` over `[min, max]` into a newly allocated image.
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateRange`] if `max - min` is not a
/// positive finite number.
pub fn extend(mask: &Image, min: f32, max: f32) -> Result<Image, PipelineError> {
    let mut out = Image::new(mask.width(), mask.height());
    extend_into(mask, min, max, &mut out, DEFAULT_BLOCK, ExecutionStrategy::Parallel)?;
    Ok(out)
}

/// Extend `mask` over `[min, max]`, writing every element of `out`.
///
/// The range is checked before anything is written: on error `out` is
/// left as it was.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if `out` differs in size
/// from `mask`, or [`PipelineError::DegenerateRange`] if `max - min` is
/// not a positive finite number.
pub fn extend_into(
    mask: &Image,
    min: f32,
    max: f32,
    out: &mut Image,
    block: usize,
    strategy: ExecutionStrategy,
) -> Result<(), PipelineError> {
    ensure_dimensions(Dimensions::of(mask), Dimensions::of(out))?;
    let range = checked_range(min, max)?;
    let src = mask.as_raw();
    parallel::fill_indexed(out, block, strategy, |i| stretch(src[i], min, range));
    Ok(())
}

/// Extend `mask` over `[min, max]` in place.
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateRange`] if `max - min` is not a
/// positive finite number; `mask` is untouched in that case.
pub fn extend_in_place(
    mask: &mut Image,
    min: f32,
    max: f32,
    strategy: ExecutionStrategy,
) -> Result<(), PipelineError> {
    use rayon::prelude::*;

    let range = checked_range(min, max)?;
    let values: &mut [f32] = mask;
    match strategy {
        ExecutionStrategy::Parallel => values
            .par_iter_mut()
            .for_each(|v| *v = stretch(*v, min, range)),
        ExecutionStrategy::Serial => values.iter_mut().for_each(|v| *v = stretch(*v, min, range)),
    }
    Ok(())
}

fn checked_range(min: f32, max: f32) -> Result<f32, PipelineError> {
    let range = max - min;
    if range.is_finite() && range > 0.0 {
        Ok(range)
    } else {
        Err(PipelineError::DegenerateRange { min, max })
    }
}

#[inline]
fn stretch(value: f32, min: f32, range: f32) -> f32 {
    (MASK_AMPLIFICATION * (value - min) / range).min(1.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn row(values: &[f32]) -> Image {
        Image::from_raw(values.len() as u32, 1, values.to_vec()).unwrap()
    }

    #[test]
    fn stretches_and_saturates() {
        let mask = row(&[0.0, 0.1, 0.2, 0.5, 1.0]);
        let out = extend(&mask, 0.0, 1.0).unwrap();
        let expected = [0.0, 0.5, 1.0, 1.0, 1.0];
        for (got, want) in out.as_raw().iter().zip(expected) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn offset_range_maps_min_to_zero() {
        let mask = row(&[2.0, 2.2, 4.0]);
        let out = extend(&mask, 2.0, 4.0).unwrap();
        assert_abs_diff_eq!(out.as_raw()[0], 0.0);
        assert_abs_diff_eq!(out.as_raw()[1], 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(out.as_raw()[2], 1.0);
    }

    #[test]
    fn values_below_min_are_not_clamped() {
        let mask = row(&[-1.0]);
        let out = extend(&mask, 0.0, 10.0).unwrap();
        assert_abs_diff_eq!(out.as_raw()[0], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn equal_min_and_max_is_degenerate() {
        let mask = row(&[0.0; 4]);
        assert_eq!(
            extend(&mask, 0.0, 0.0).unwrap_err(),
            PipelineError::DegenerateRange { min: 0.0, max: 0.0 }
        );
    }

    #[test]
    fn inverted_or_non_finite_range_is_degenerate() {
        let mask = row(&[0.0; 4]);
        assert!(extend(&mask, 1.0, 0.0).is_err());
        assert!(extend(&mask, 0.0, f32::INFINITY).is_err());
        assert!(extend(&mask, f32::NAN, 1.0).is_err());
    }

    #[test]
    fn degenerate_range_leaves_output_untouched() {
        let mask = row(&[0.3; 6]);
        let mut out = row(&[9.0; 6]);
        let err = extend_into(&mask, 0.3, 0.3, &mut out, 4, ExecutionStrategy::Serial);
        assert!(err.is_err());
        assert!(out.as_raw().iter().all(|&v| v == 9.0));
    }

    #[test]
    fn in_place_matches_out_of_place() {
        let mask = Image::from_fn(9, 7, |x, y| image::Luma([(x * y) as f32 / 48.0]));
        let expected = extend(&mask, 0.0, 1.0).unwrap();
        for strategy in [ExecutionStrategy::Parallel, ExecutionStrategy::Serial] {
            let mut in_place = mask.clone();
            extend_in_place(&mut in_place, 0.0, 1.0, strategy).unwrap();
            assert_eq!(in_place.as_raw(), expected.as_raw());
        }
    }

    #[test]
    fn block_size_does_not_change_result() {
        let mask = Image::from_fn(13, 5, |x, y| image::Luma([(x + 3 * y) as f32 / 50.0]));
        let mut a = Image::new(13, 5);
        let mut b = Image::new(13, 5);
        extend_into(&mask, 0.0, 1.0, &mut a, 1, ExecutionStrategy::Serial).unwrap();
        extend_into(&mask, 0.0, 1.0, &mut b, 64, ExecutionStrategy::Parallel).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }
}
