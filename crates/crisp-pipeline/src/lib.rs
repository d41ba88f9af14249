//! crisp-pipeline: edge-aware image sharpening (sans-IO).
//!
//! Sharpens a single-channel `f32` image along its edges and smooths it
//! elsewhere through:
//! three Gaussian blurs -> Sobel edge masks -> min/max reduction ->
//! mask extension -> unsharp masking -> two mask-weighted blends.
//!
//! Every kernel is data-parallel on the rayon pool, and independent
//! stages of the dependency graph run concurrently. The crate has no
//! I/O: callers hand in an image buffer and get the sharpened buffer,
//! warnings, and per-stage diagnostics back.
//!
//! ```rust
//! # use crisp_pipeline::{Image, PipelineConfig, PipelineError};
//! # fn main() -> Result<(), PipelineError> {
//! let image = Image::from_fn(64, 64, |x, y| image::Luma([((x ^ y) & 1) as f32]));
//! let sharpened = crisp_pipeline::process(&image, &PipelineConfig::default())?;
//! assert_eq!(sharpened.dimensions(), image.dimensions());
//! # Ok(())
//! # }
//! ```

pub mod combine;
pub mod convolve;
pub mod diagnostics;
pub mod graph;
pub mod kernel;
pub mod mask;
pub mod metrics;
pub mod parallel;
pub mod pipeline;
pub mod reduce;
pub mod reference;
pub mod sobel;
pub mod types;
pub mod unsharpen;
pub mod workspace;

pub use diagnostics::{Clock, PipelineDiagnostics, StageDiagnostics, StageMetrics, SystemClock};
pub use graph::{BufferId, StageKind, TaskGraph};
pub use kernel::ConvolutionKernel;
pub use parallel::ExecutionStrategy;
pub use pipeline::{Advance, Execution, Pipeline};
pub use reduce::{Accumulator, ReduceGeometry, ReduceOp};
pub use types::{Dimensions, Image, KernelSpec, PipelineConfig, PipelineError, PipelineWarning};

/// Sharpen `image` in one call.
///
/// Builds a [`Pipeline`] for the image size, runs it once and returns
/// a copy of the output. Callers processing many images of one size
/// should keep a [`Pipeline`] instead, which reuses its buffers.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid
/// configuration and [`PipelineError::EmptyImage`] for a zero-sized
/// image.
pub fn process(image: &Image, config: &PipelineConfig) -> Result<Image, PipelineError> {
    let mut pipeline = Pipeline::new(config.clone(), Dimensions::of(image))?;
    pipeline.run(image).cloned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn process_matches_a_reused_pipeline() {
        let image = Image::from_fn(20, 20, |x, y| image::Luma([((x * y) % 7) as f32 / 7.0]));
        let config = PipelineConfig::default();
        let once = process(&image, &config).unwrap();
        let mut pipeline = Pipeline::new(config, Dimensions::of(&image)).unwrap();
        assert_eq!(pipeline.run(&image).unwrap().as_raw(), once.as_raw());
    }

    #[test]
    fn process_rejects_empty_image() {
        assert_eq!(
            process(&Image::new(0, 0), &PipelineConfig::default()).unwrap_err(),
            PipelineError::EmptyImage
        );
    }
}
