//! Straightforward sequential version of the whole pipeline.
//!
//! Computes every stage in `f64` on the calling thread with plain loops
//! and no shared buffers. It follows the same arithmetic as the
//! parallel kernels (boundary skipping, half-tap Gaussian offset,
//! unclamped lower mask, degenerate range replaced by mask 0), so the
//! two agree up to floating-point rounding.

use crate::mask::MASK_AMPLIFICATION;
use crate::sobel::{SOBEL_X, SOBEL_Y};
use crate::types::{Dimensions, Image, KernelSpec, PipelineConfig, PipelineError};

/// Row-major `f64` plane.
struct Plane {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Plane {
    fn from_image(image: &Image) -> Self {
        let dims = Dimensions::of(image);
        Self {
            rows: dims.rows(),
            cols: dims.cols(),
            data: image.as_raw().iter().map(|&v| f64::from(v)).collect(),
        }
    }

    fn map(&self, f: impl Fn(usize) -> f64) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: (0..self.data.len()).map(f).collect(),
        }
    }

    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn at(&self, i: isize, j: isize) -> Option<f64> {
        let in_range = i >= 0 && j >= 0 && (i as usize) < self.rows && (j as usize) < self.cols;
        in_range.then(|| self.data[i as usize * self.cols + j as usize])
    }
}

/// Run the full pipeline sequentially in `f64` and return the result
/// rounded to `f32`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid configuration
/// and [`PipelineError::EmptyImage`] for a zero-sized image.
#[allow(clippy::cast_possible_truncation)]
pub fn run_sequential(image: &Image, config: &PipelineConfig) -> Result<Image, PipelineError> {
    config.validate()?;
    let dims = Dimensions::of(image);
    if dims.is_empty() {
        return Err(PipelineError::EmptyImage);
    }

    let source = Plane::from_image(image);
    let blurred_small = convolve(&source, &gaussian(config.blur_small));
    let blurred_large = convolve(&source, &gaussian(config.blur_large));
    let blurred_unsharpen = convolve(&source, &gaussian(config.blur_unsharpen));

    let mask_small = sobel(&blurred_small);
    let mask_large = sobel(&blurred_large);

    let min = mask_large.data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = mask_large.data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    let extended = if range.is_finite() && range > 0.0 {
        let gain = f64::from(MASK_AMPLIFICATION);
        mask_large.map(|i| (gain * (mask_large.data[i] - min) / range).min(1.0))
    } else {
        mask_large.map(|_| 0.0)
    };

    let amount = f64::from(config.unsharpen_amount);
    let sharpened = source.map(|i| {
        (source.data[i] * (1.0 + amount) - blurred_unsharpen.data[i] * amount).clamp(0.0, 1.0)
    });

    let blended = combine(&sharpened, &blurred_large, &extended);
    let output = combine(&blended, &blurred_small, &mask_small);

    let mut out = Image::new(dims.width, dims.height);
    for (dst, &v) in out.iter_mut().zip(&output.data) {
        *dst = v as f32;
    }
    Ok(out)
}

/// Gaussian weights in `f64`, row-major, normalized to sum 1.
#[allow(clippy::cast_precision_loss)]
fn gaussian(spec: KernelSpec) -> (usize, Vec<f64>) {
    let d = spec.diameter;
    let mean = d as f64 / 2.0;
    let spread = f64::from(spec.variance).powi(2);
    let mut weights = Vec::with_capacity(d * d);
    for x in 0..d {
        for y in 0..d {
            let dx = x as f64 - mean;
            let dy = y as f64 - mean;
            weights.push((-0.5 * (dx * dx + dy * dy) / spread).exp());
        }
    }
    let sum: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= sum);
    (d, weights)
}

#[allow(clippy::cast_possible_wrap)]
fn convolve(plane: &Plane, (diameter, weights): &(usize, Vec<f64>)) -> Plane {
    let r = (*diameter / 2) as isize;
    plane.map(|idx| {
        let (i, j) = ((idx / plane.cols) as isize, (idx % plane.cols) as isize);
        let mut sum = 0.0;
        for x in -r..=r {
            for y in -r..=r {
                if let Some(v) = plane.at(i + x, j + y) {
                    #[allow(clippy::cast_sign_loss)]
                    let w = weights[(x + r) as usize * diameter + (y + r) as usize];
                    sum += w * v;
                }
            }
        }
        sum
    })
}

#[allow(clippy::cast_possible_wrap)]
fn sobel(plane: &Plane) -> Plane {
    plane.map(|idx| {
        let (i, j) = ((idx / plane.cols) as isize, (idx % plane.cols) as isize);
        let (mut gx, mut gy) = (0.0_f64, 0.0_f64);
        for x in 0..3 {
            for y in 0..3 {
                if let Some(v) = plane.at(i + x as isize - 1, j + y as isize - 1) {
                    gx += f64::from(SOBEL_X[x][y]) * v;
                    gy += f64::from(SOBEL_Y[x][y]) * v;
                }
            }
        }
        gx.hypot(gy)
    })
}

fn combine(x: &Plane, y: &Plane, mask: &Plane) -> Plane {
    x.map(|i| x.data[i] * mask.data[i] + y.data[i] * (1.0 - mask.data[i]))
}
