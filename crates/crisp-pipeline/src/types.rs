//! Shared types for the crisp sharpening pipeline.

use serde::{Deserialize, Serialize};

use crate::graph::{BufferId, StageKind};
use crate::parallel::ExecutionStrategy;

/// Single-channel `f32` image, row-major.
///
/// Rows are the image height and columns the image width; element
/// `(i, j)` lives at `i * cols + j` in the raw buffer.
pub type Image = image::ImageBuffer<image::Luma<f32>, Vec<f32>>;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels (number of columns).
    pub width: u32,
    /// Height in pixels (number of rows).
    pub height: u32,
}

impl Dimensions {
    /// Square dimensions of side `size`.
    #[must_use]
    pub const fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }

    /// Dimensions of an existing image.
    #[must_use]
    pub fn of(image: &Image) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Number of rows (`height`).
    #[must_use]
    pub const fn rows(self) -> usize {
        self.height as usize
    }

    /// Number of columns (`width`).
    #[must_use]
    pub const fn cols(self) -> usize {
        self.width as usize
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.rows() * self.cols()
    }

    /// Whether either side is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Fail with [`PipelineError::ShapeMismatch`] unless `actual` matches
/// `expected`.
pub(crate) fn ensure_dimensions(
    expected: Dimensions,
    actual: Dimensions,
) -> Result<(), PipelineError> {
    if expected == actual {
        Ok(())
    } else {
        Err(PipelineError::ShapeMismatch { expected, actual })
    }
}

/// Diameter and variance of one Gaussian blur kernel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Kernel side length. Must be odd.
    pub diameter: usize,
    /// Spread parameter. Enters the Gaussian as `exp(-0.5 * r² / variance²)`.
    pub variance: f32,
}

impl KernelSpec {
    /// Create a kernel spec.
    #[must_use]
    pub const fn new(diameter: usize, variance: f32) -> Self {
        Self { diameter, variance }
    }
}

/// Configuration for the sharpening pipeline.
///
/// The defaults reproduce the benchmark configuration: a small 3×3
/// blur for medium frequencies, a large 5×5 blur for low frequencies
/// and a 3×3 blur feeding the unsharp mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Kernel for the small (medium-frequency) blur and its edge mask.
    pub blur_small: KernelSpec,

    /// Kernel for the large (low-frequency) blur and its extended mask.
    pub blur_large: KernelSpec,

    /// Kernel for the blur subtracted by the unsharp mask.
    pub blur_unsharpen: KernelSpec,

    /// Sharpening strength. Must be positive and finite.
    pub unsharpen_amount: f32,

    /// Worker group size for element-wise kernels and the reduction.
    /// Must be a power of two no larger than
    /// [`MAX_BLOCK_SIZE`](Self::MAX_BLOCK_SIZE).
    pub block_size: usize,

    /// Optional cap on the number of reduction groups. `None` launches
    /// one group per `block_size` elements.
    pub reduce_groups: Option<usize>,

    /// How stages and kernels are dispatched.
    pub strategy: ExecutionStrategy,
}

impl PipelineConfig {
    /// Default small blur kernel.
    pub const DEFAULT_BLUR_SMALL: KernelSpec = KernelSpec::new(3, 1.0);
    /// Default large blur kernel.
    pub const DEFAULT_BLUR_LARGE: KernelSpec = KernelSpec::new(5, 10.0);
    /// Default unsharp-mask blur kernel.
    pub const DEFAULT_BLUR_UNSHARPEN: KernelSpec = KernelSpec::new(3, 5.0);
    /// Default sharpening strength.
    pub const DEFAULT_UNSHARPEN_AMOUNT: f32 = 0.5;
    /// Default worker group size.
    pub const DEFAULT_BLOCK_SIZE: usize = 32;
    /// Largest accepted worker group size.
    pub const MAX_BLOCK_SIZE: usize = 1024;

    /// Check every invariant the kernels rely on.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, spec) in [
            ("blur_small", self.blur_small),
            ("blur_large", self.blur_large),
            ("blur_unsharpen", self.blur_unsharpen),
        ] {
            if spec.diameter % 2 == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name}.diameter must be odd, got {}",
                    spec.diameter
                )));
            }
            if !(spec.variance.is_finite() && spec.variance > 0.0) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name}.variance must be positive and finite, got {}",
                    spec.variance
                )));
            }
        }
        if !(self.unsharpen_amount.is_finite() && self.unsharpen_amount > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "unsharpen_amount must be positive and finite, got {}",
                self.unsharpen_amount
            )));
        }
        if !self.block_size.is_power_of_two() {
            return Err(PipelineError::InvalidConfig(format!(
                "block_size must be a power of two, got {}",
                self.block_size
            )));
        }
        if self.block_size > Self::MAX_BLOCK_SIZE {
            return Err(PipelineError::InvalidConfig(format!(
                "block_size must be at most {}, got {}",
                Self::MAX_BLOCK_SIZE,
                self.block_size
            )));
        }
        if self.reduce_groups == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "reduce_groups must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            blur_small: Self::DEFAULT_BLUR_SMALL,
            blur_large: Self::DEFAULT_BLUR_LARGE,
            blur_unsharpen: Self::DEFAULT_BLUR_UNSHARPEN,
            unsharpen_amount: Self::DEFAULT_UNSHARPEN_AMOUNT,
            block_size: Self::DEFAULT_BLOCK_SIZE,
            reduce_groups: None,
            strategy: ExecutionStrategy::default(),
        }
    }
}

/// A recoverable numerical condition met during a run.
///
/// Warnings never abort the pipeline; they are collected on the
/// [`Pipeline`](crate::Pipeline) and reported through diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PipelineWarning {
    /// The large edge mask had no spread (`max - min` not positive), so
    /// the extended mask was replaced by the neutral weight 0.
    DegenerateRange {
        /// Reduced minimum of the mask.
        min: f32,
        /// Reduced maximum of the mask.
        max: f32,
    },
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DegenerateRange { min, max } => {
                write!(f, "degenerate mask range [{min}, {max}], mask set to 0")
            }
        }
    }
}

/// Errors that can occur while building or running the pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// Buffers passed to a stage have inconsistent dimensions.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Dimensions the stage was built for.
        expected: Dimensions,
        /// Dimensions actually supplied.
        actual: Dimensions,
    },

    /// The problem has zero rows or zero columns.
    #[error("image has no pixels")]
    EmptyImage,

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A convolution kernel could not be constructed.
    #[error("invalid kernel of diameter {diameter}: {reason}")]
    InvalidKernel {
        /// Requested diameter.
        diameter: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Mask extension was asked to divide by a non-positive range.
    #[error("degenerate mask range: min={min}, max={max}")]
    DegenerateRange {
        /// Reduced minimum.
        min: f32,
        /// Reduced maximum.
        max: f32,
    },

    /// A stage was dispatched before one of its inputs was written.
    #[error("stage {stage} dispatched before buffer {buffer} was ready")]
    BufferNotReady {
        /// The stage that would have read the buffer.
        stage: StageKind,
        /// The buffer that had not been produced yet.
        buffer: BufferId,
    },

    /// The stage graph violates a structural rule.
    #[error("invalid stage graph: {0}")]
    InvalidGraph(String),

    /// The final barrier found the output buffer unwritten.
    #[error("pipeline run finished without producing the output image")]
    RunIncomplete,
}
