//! Mask-weighted blending of two images.

use crate::parallel::{self, ExecutionStrategy};
use crate::types::{Dimensions, Image, PipelineError, ensure_dimensions};

/// Blend `x` over `y` by `mask` into a newly allocated image.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the inputs differ in size.
pub fn combine(x: &Image, y: &Image, mask: &Image) -> Result<Image, PipelineError> {
    let mut out = Image::new(x.width(), x.height());
    combine_into(
        x,
        y,
        mask,
        &mut out,
        crate::types::PipelineConfig::DEFAULT_BLOCK_SIZE,
        ExecutionStrategy::Parallel,
    )?;
    Ok(out)
}

/// `out[i] = x[i] * mask[i] + y[i] * (1 - mask[i])`.
///
/// The mask is used as given: weights outside `[0, 1]` extrapolate and
/// the result is not clamped.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the four images do not
/// share dimensions.
pub fn combine_into(
    x: &Image,
    y: &Image,
    mask: &Image,
    out: &mut Image,
    block: usize,
    strategy: ExecutionStrategy,
) -> Result<(), PipelineError> {
    let dims = Dimensions::of(x);
    for other in [y, mask] {
        ensure_dimensions(dims, Dimensions::of(other))?;
    }
    ensure_dimensions(dims, Dimensions::of(out))?;

    let (xs, ys, ms) = (x.as_raw(), y.as_raw(), mask.as_raw());
    parallel::fill_indexed(out, block, strategy, |i| {
        xs[i].mul_add(ms[i], ys[i] * (1.0 - ms[i]))
    });
    Ok(())
}
