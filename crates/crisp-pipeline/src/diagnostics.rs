//! Pipeline diagnostics: per-stage timing and metrics.
//!
//! Time is read through the [`Clock`] trait so the library never has to
//! pick a time source itself. [`SystemClock`] uses the `web-time` crate,
//! which maps to `performance.now()` on WASM and `std::time::Instant`
//! elsewhere.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph::{BufferId, StageKind};
use crate::parallel::ExecutionStrategy;
use crate::reduce::ReduceOp;
use crate::types::{Dimensions, PipelineWarning};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

// ───────────────────────────── Clock ────────────────────────────────

/// Source of monotonic timestamps.
///
/// Shared by every stage of a wave, so it must be `Sync`.
pub trait Clock: Sync {
    /// Opaque point in time.
    type Instant: Copy + Send;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `start`.
    fn elapsed(&self, start: Self::Instant) -> Duration;
}

/// Wall clock backed by `web_time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Instant = web_time::Instant;

    fn now(&self) -> Self::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, start: Self::Instant) -> Duration {
        start.elapsed()
    }
}

/// Clock that never advances. Every duration reads as zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClock;

impl Clock for NoClock {
    type Instant = ();

    fn now(&self) {}

    fn elapsed(&self, (): ()) -> Duration {
        Duration::ZERO
    }
}

// ─────────────────────────── Diagnostics ────────────────────────────

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Image size of the run.
    pub dimensions: Dimensions,
    /// How stages were dispatched.
    pub strategy: ExecutionStrategy,
    /// One entry per executed stage, in completion order of their waves.
    pub stages: Vec<StageRecord>,
    /// Wall-clock duration of each wave.
    pub waves: Vec<WaveDiagnostics>,
    /// Numerical conditions recovered from during the run.
    pub warnings: Vec<PipelineWarning>,
    /// Wall-clock duration of the whole run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// A stage together with the wave it ran in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Which stage.
    pub stage: StageKind,
    /// Zero-based wave index.
    pub wave: usize,
    /// Timing and metrics.
    pub diagnostics: StageDiagnostics,
}

/// Timing of one wave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveDiagnostics {
    /// Stages dispatched in this wave.
    pub stages: Vec<StageKind>,
    /// Wall-clock duration from dispatch to barrier (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Gaussian blur.
    Blur {
        /// Kernel side length.
        diameter: usize,
        /// Kernel variance.
        variance: f32,
    },
    /// Sobel edge detection.
    EdgeDetection {
        /// Number of pixels processed.
        pixel_count: usize,
    },
    /// Min or max reduction.
    Reduce {
        /// Which extremum.
        op: ReduceOp,
        /// Reduced value.
        value: f32,
        /// Worker groups launched.
        groups: usize,
    },
    /// Mask extension.
    Extend {
        /// Range minimum.
        min: f32,
        /// Range maximum.
        max: f32,
        /// Whether the range was degenerate and the mask set to 0.
        degenerate: bool,
    },
    /// Unsharp masking.
    Unsharpen {
        /// Sharpening strength.
        amount: f32,
    },
    /// Mask-weighted blend.
    Combine {
        /// Buffer used as blend weight.
        mask: BufferId,
    },
}

impl PipelineDiagnostics {
    /// Diagnostics of `stage`, if it ran.
    #[must_use]
    pub fn stage(&self, stage: StageKind) -> Option<&StageDiagnostics> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.diagnostics)
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {} ({} pixels), strategy: {}",
            self.dimensions,
            self.dimensions.pixel_count(),
            self.strategy,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration)
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>4} {:>10} {:>8}  {}",
            "Stage", "Wave", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(72));

        let total_ms = duration_ms(self.total_duration);
        for record in &self.stages {
            let ms = duration_ms(record.diagnostics.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&record.diagnostics.metrics);
            lines.push(format!(
                "{:<16} {:>4} {ms:>8.3}ms {pct:>7.1}%  {details}",
                record.stage.name(),
                record.wave,
            ));
        }

        if !self.warnings.is_empty() {
            lines.push(String::new());
            for warning in &self.warnings {
                lines.push(format!("warning: {warning}"));
            }
        }

        lines.join("\n")
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Blur { diameter, variance } => format!("d={diameter} variance={variance:.2}"),
        StageMetrics::EdgeDetection { pixel_count } => format!("{pixel_count} px"),
        StageMetrics::Reduce { op, value, groups } => format!("{op}={value:.6} groups={groups}"),
        StageMetrics::Extend {
            min,
            max,
            degenerate,
        } => {
            if *degenerate {
                format!("range=[{min:.6}, {max:.6}] degenerate, mask=0")
            } else {
                format!("range=[{min:.6}, {max:.6}]")
            }
        }
        StageMetrics::Unsharpen { amount } => format!("amount={amount:.2}"),
        StageMetrics::Combine { mask } => format!("mask={mask}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> PipelineDiagnostics {
        PipelineDiagnostics {
            dimensions: Dimensions::square(4),
            strategy: ExecutionStrategy::Serial,
            stages: vec![
                StageRecord {
                    stage: StageKind::BlurSmall,
                    wave: 0,
                    diagnostics: StageDiagnostics {
                        duration: Duration::from_millis(3),
                        metrics: StageMetrics::Blur {
                            diameter: 3,
                            variance: 1.0,
                        },
                    },
                },
                StageRecord {
                    stage: StageKind::Extend,
                    wave: 3,
                    diagnostics: StageDiagnostics {
                        duration: Duration::from_millis(1),
                        metrics: StageMetrics::Extend {
                            min: 0.0,
                            max: 0.0,
                            degenerate: true,
                        },
                    },
                },
            ],
            waves: vec![WaveDiagnostics {
                stages: vec![StageKind::BlurSmall],
                duration: Duration::from_millis(3),
            }],
            warnings: vec![PipelineWarning::DegenerateRange { min: 0.0, max: 0.0 }],
            total_duration: Duration::from_millis(4),
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn report_lists_stages_and_warnings() {
        let report = sample().report();
        assert!(report.contains("Image: 4x4 (16 pixels), strategy: serial"));
        assert!(report.contains("blur_small"));
        assert!(report.contains("75.0%"));
        assert!(report.contains("degenerate, mask=0"));
        assert!(report.contains("warning: degenerate mask range [0, 0], mask set to 0"));
    }

    #[test]
    fn zero_total_duration_does_not_divide_by_zero() {
        let mut diag = sample();
        diag.total_duration = Duration::ZERO;
        assert!(diag.report().contains("0.0%"));
    }

    #[test]
    fn stage_lookup() {
        let diag = sample();
        assert!(diag.stage(StageKind::Extend).is_some());
        assert!(diag.stage(StageKind::CombineSmall).is_none());
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!((json["total_duration"].as_f64().unwrap() - 0.004).abs() < 1e-9);
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.stages.len(), 2);
        assert_eq!(back.stages[1].diagnostics.metrics, sample().stages[1].diagnostics.metrics);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["total_duration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<PipelineDiagnostics>(json).is_err());
    }

    #[test]
    fn no_clock_reads_zero() {
        let clock = NoClock;
        let start = clock.now();
        assert_eq!(clock.elapsed(start), Duration::ZERO);
    }
}
