//! Unsharp masking.

use crate::parallel::{self, ExecutionStrategy};
use crate::types::{Dimensions, Image, PipelineError, ensure_dimensions};

/// Sharpen `image` against its blur into a newly allocated image.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if `blurred` differs in
/// size from `image`.
pub fn unsharpen(image: &Image, blurred: &Image, amount: f32) -> Result<Image, PipelineError> {
    let mut out = Image::new(image.width(), image.height());
    unsharpen_into(
        image,
        blurred,
        amount,
        &mut out,
        crate::types::PipelineConfig::DEFAULT_BLOCK_SIZE,
        ExecutionStrategy::Parallel,
    )?;
    Ok(out)
}

/// `out[i] = clamp(image[i] * (1 + amount) - blurred[i] * amount, 0, 1)`.
///
/// `amount` is expected to be positive; [`PipelineConfig::validate`]
/// enforces that for pipeline runs.
///
/// [`PipelineConfig::validate`]: crate::PipelineConfig::validate
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the three images do not
/// share dimensions.
pub fn unsharpen_into(
    image: &Image,
    blurred: &Image,
    amount: f32,
    out: &mut Image,
    block: usize,
    strategy: ExecutionStrategy,
) -> Result<(), PipelineError> {
    let dims = Dimensions::of(image);
    ensure_dimensions(dims, Dimensions::of(blurred))?;
    ensure_dimensions(dims, Dimensions::of(out))?;

    let (src, blur) = (image.as_raw(), blurred.as_raw());
    let gain = 1.0 + amount;
    parallel::fill_indexed(out, block, strategy, |i| {
        src[i].mul_add(gain, -blur[i] * amount).clamp(0.0, 1.0)
    });
    Ok(())
}
