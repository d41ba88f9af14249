//! Square convolution kernels.
//!
//! Kernels are stored row-major: weight `(x, y)` of a kernel of
//! diameter `d` lives at `x * d + y`, where `x` is the row offset and
//! `y` the column offset. Diameters are always odd so that a symmetric
//! radius `d / 2` exists.

use crate::types::{KernelSpec, PipelineError};

/// Immutable square convolution kernel of odd diameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionKernel {
    weights: Vec<f32>,
    diameter: usize,
}

impl ConvolutionKernel {
    /// Build a kernel from explicit row-major weights.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidKernel`] if the diameter is even
    /// or `weights.len() != diameter²`.
    pub fn from_weights(weights: Vec<f32>, diameter: usize) -> Result<Self, PipelineError> {
        check_diameter(diameter)?;
        if weights.len() != diameter * diameter {
            return Err(PipelineError::InvalidKernel {
                diameter,
                reason: format!("expected {} weights, got {}", diameter * diameter, weights.len()),
            });
        }
        Ok(Self { weights, diameter })
    }

    /// The 1×1 identity kernel.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            weights: vec![1.0],
            diameter: 1,
        }
    }

    /// Normalized Gaussian kernel.
    ///
    /// Weight `(x, y)` for `x, y` in `0..diameter` is
    /// `exp(-0.5 * ((x - μ)² + (y - μ)²) / variance²)` with
    /// `μ = diameter / 2` taken in real arithmetic, so for odd
    /// diameters the peak sits half a tap past the middle weight.
    /// Weights are computed in `f64`, divided by their sum, and stored
    /// as `f32`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidKernel`] for an even diameter or
    /// a variance that is not positive and finite.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn gaussian(diameter: usize, variance: f32) -> Result<Self, PipelineError> {
        check_diameter(diameter)?;
        if !(variance.is_finite() && variance > 0.0) {
            return Err(PipelineError::InvalidKernel {
                diameter,
                reason: format!("variance must be positive and finite, got {variance}"),
            });
        }

        let mean = diameter as f64 / 2.0;
        let spread = f64::from(variance).powi(2);
        let mut raw = Vec::with_capacity(diameter * diameter);
        for x in 0..diameter {
            for y in 0..diameter {
                let dx = x as f64 - mean;
                let dy = y as f64 - mean;
                raw.push((-0.5 * dx.mul_add(dx, dy * dy) / spread).exp());
            }
        }
        let sum: f64 = raw.iter().sum();
        let weights = raw.into_iter().map(|w| (w / sum) as f32).collect();
        Ok(Self { weights, diameter })
    }

    /// Gaussian kernel described by a [`KernelSpec`].
    ///
    /// # Errors
    ///
    /// See [`gaussian`](Self::gaussian).
    pub fn from_spec(spec: KernelSpec) -> Result<Self, PipelineError> {
        Self::gaussian(spec.diameter, spec.variance)
    }

    /// Side length.
    #[must_use]
    pub const fn diameter(&self) -> usize {
        self.diameter
    }

    /// `diameter / 2`, rounded down.
    #[must_use]
    pub const fn radius(&self) -> usize {
        self.diameter / 2
    }

    /// Row-major weights.
    #[must_use]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Weight at row `x`, column `y` (both in `0..diameter`).
    #[must_use]
    pub fn weight(&self, x: usize, y: usize) -> f32 {
        self.weights[x * self.diameter + y]
    }
}

fn check_diameter(diameter: usize) -> Result<(), PipelineError> {
    if diameter % 2 == 1 {
        Ok(())
    } else {
        Err(PipelineError::InvalidKernel {
            diameter,
            reason: "diameter must be odd".to_string(),
        })
    }
}
