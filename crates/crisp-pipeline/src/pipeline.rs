//! Pipeline orchestrator: runs the stage graph wave by wave over a
//! reusable [`Workspace`].
//!
//! [`Pipeline::run`] executes everything in one call. [`Pipeline::start`]
//! returns an [`Execution`] that the caller drives one wave at a time,
//! inspecting intermediate buffers between waves:
//!
//! ```rust
//! # use crisp_pipeline::{Dimensions, Image, Pipeline, PipelineConfig, PipelineError};
//! # use crisp_pipeline::pipeline::Advance;
//! # fn run(image: &Image) -> Result<(), PipelineError> {
//! let mut pipeline = Pipeline::new(PipelineConfig::default(), Dimensions::of(image))?;
//! let mut execution = pipeline.start(image)?;
//! while let Advance::Next { wave, stages } = execution.advance()? {
//!     println!("wave {wave}: {stages:?}");
//! }
//! let sharpened = execution.finish()?;
//! assert_eq!(sharpened.dimensions(), image.dimensions());
//! # Ok(())
//! # }
//! ```
//!
//! With [`ExecutionStrategy::Parallel`] the stages of a wave run as
//! separate rayon tasks; with [`ExecutionStrategy::Serial`] every stage
//! is its own wave, in canonical order, on the calling thread. Each
//! wave ends in a full barrier.

use rayon::prelude::*;

use crate::combine::combine_into;
use crate::convolve::convolve_into;
use crate::diagnostics::{
    Clock, NoClock, PipelineDiagnostics, StageDiagnostics, StageMetrics, StageRecord,
    SystemClock, WaveDiagnostics,
};
use crate::graph::{BufferId, StageKind, TaskGraph};
use crate::kernel::ConvolutionKernel;
use crate::mask::extend_into;
use crate::parallel::ExecutionStrategy;
use crate::reduce::{ReduceGeometry, ReduceOp, reduce_into};
use crate::sobel::sobel_into;
use crate::types::{Dimensions, Image, KernelSpec, PipelineConfig, PipelineError, PipelineWarning};
use crate::unsharpen::unsharpen_into;
use crate::workspace::{Slot, Workspace};

// ───────────────────────────── Pipeline ─────────────────────────────

/// A sharpening pipeline bound to one configuration and image size.
///
/// Kernels, the stage graph and every buffer are built in
/// [`new`](Self::new); runs only overwrite buffers.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    kernels: Kernels,
    graph: TaskGraph,
    schedule: Vec<Vec<StageKind>>,
    workspace: Workspace,
    warnings: Vec<PipelineWarning>,
}

#[derive(Debug)]
struct Kernels {
    blur_small: ConvolutionKernel,
    blur_large: ConvolutionKernel,
    blur_unsharpen: ConvolutionKernel,
}

impl Pipeline {
    /// Validate `config`, build the kernels and stage graph, and
    /// allocate buffers for `dimensions`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an invalid
    /// configuration and [`PipelineError::EmptyImage`] if either side of
    /// `dimensions` is zero.
    pub fn new(config: PipelineConfig, dimensions: Dimensions) -> Result<Self, PipelineError> {
        config.validate()?;
        let kernels = Kernels {
            blur_small: ConvolutionKernel::from_spec(config.blur_small)?,
            blur_large: ConvolutionKernel::from_spec(config.blur_large)?,
            blur_unsharpen: ConvolutionKernel::from_spec(config.blur_unsharpen)?,
        };
        let graph = TaskGraph::standard()?;
        let schedule = match config.strategy {
            ExecutionStrategy::Parallel => graph.waves().to_vec(),
            ExecutionStrategy::Serial => graph.serial_order().iter().map(|&s| vec![s]).collect(),
        };
        let workspace = Workspace::new(dimensions)?;

        tracing::debug!(
            %dimensions,
            strategy = %config.strategy,
            waves = schedule.len(),
            edges = graph.dependencies().count(),
            "pipeline built"
        );
        Ok(Self {
            config,
            kernels,
            graph,
            schedule,
            workspace,
            warnings: Vec::new(),
        })
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Image size every run must match.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.workspace.dimensions()
    }

    /// The stage dependency graph.
    #[must_use]
    pub const fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Waves in execution order for the configured strategy.
    #[must_use]
    pub fn schedule(&self) -> &[Vec<StageKind>] {
        &self.schedule
    }

    /// All buffers, including intermediates of the last run.
    #[must_use]
    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Warnings raised by the most recent run.
    #[must_use]
    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    /// Final image of the last run, if that run completed.
    #[must_use]
    pub fn output(&self) -> Option<&Image> {
        self.workspace
            .ready()
            .contains(BufferId::Output)
            .then(|| self.workspace.image(BufferId::Output))
    }

    /// Copy `image` into the source buffer and return an execution
    /// positioned before the first wave, timed with [`SystemClock`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if `image` does not
    /// match the pipeline dimensions.
    pub fn start(&mut self, image: &Image) -> Result<Execution<'_>, PipelineError> {
        self.start_with_clock(image, SystemClock)
    }

    /// Like [`start`](Self::start) with a caller-supplied clock.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub fn start_with_clock<C: Clock>(
        &mut self,
        image: &Image,
        clock: C,
    ) -> Result<Execution<'_, C>, PipelineError> {
        self.workspace.load_source(image)?;
        self.warnings.clear();
        let started = clock.now();
        Ok(Execution {
            pipeline: self,
            clock,
            started,
            next_wave: 0,
            stages: Vec::with_capacity(crate::graph::STAGE_COUNT),
            waves: Vec::new(),
        })
    }

    /// Run every stage on `image` and return the final image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if `image` does not
    /// match the pipeline dimensions, or any error raised by a stage.
    pub fn run(&mut self, image: &Image) -> Result<&Image, PipelineError> {
        self.start_with_clock(image, NoClock)?.complete().map(|(out, _)| out)
    }

    /// Run every stage on `image`, timing each stage with `clock`.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub fn run_with_diagnostics<C: Clock>(
        &mut self,
        image: &Image,
        clock: C,
    ) -> Result<(&Image, PipelineDiagnostics), PipelineError> {
        self.start_with_clock(image, clock)?.complete()
    }

    /// Sum of absolute differences between the last output and the
    /// sequential reference applied to `source`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RunIncomplete`] if no run has completed,
    /// or [`PipelineError::ShapeMismatch`] if `source` differs in size.
    pub fn difference_from_reference(&self, source: &Image) -> Result<f64, PipelineError> {
        let output = self.output().ok_or(PipelineError::RunIncomplete)?;
        let expected = crate::reference::run_sequential(source, &self.config)?;
        crate::metrics::sum_abs_difference(output, &expected)
    }

    /// Dispatch one wave and wait for all of its stages.
    ///
    /// Every input is checked for readiness before any output buffer is
    /// taken. Buffers are returned to the workspace even when a stage
    /// fails; the first failure is reported.
    fn dispatch_wave<C: Clock>(
        &mut self,
        wave: usize,
        stages: &[StageKind],
        clock: &C,
        records: &mut Vec<StageRecord>,
    ) -> Result<(), PipelineError> {
        let ready = self.workspace.ready();
        for &stage in stages {
            ready.ensure_inputs(stage)?;
        }
        tracing::debug!(wave, ?stages, "dispatching wave");

        let mut jobs: Vec<(StageKind, Slot)> = stages
            .iter()
            .map(|&stage| (stage, self.workspace.take(stage.writes())))
            .collect();

        let context = StageContext {
            config: &self.config,
            kernels: &self.kernels,
            workspace: &self.workspace,
        };
        let run = |(stage, slot): &mut (StageKind, Slot)| {
            let start = clock.now();
            let outcome = context.execute(*stage, slot);
            (outcome, clock.elapsed(start))
        };
        let results: Vec<_> = match self.config.strategy {
            ExecutionStrategy::Parallel if jobs.len() > 1 => jobs.par_iter_mut().map(run).collect(),
            _ => jobs.iter_mut().map(run).collect(),
        };

        for (stage, slot) in jobs {
            self.workspace.restore(stage.writes(), slot);
        }

        let mut first_error = None;
        for (&stage, (outcome, duration)) in stages.iter().zip(results) {
            match outcome {
                Ok(report) => {
                    self.workspace.mark_ready(stage.writes());
                    self.warnings.extend(report.warning);
                    tracing::debug!(
                        %stage,
                        wave,
                        elapsed_us = duration.as_micros(),
                        unblocks = ?self.graph.consumers(stage),
                        "stage complete"
                    );
                    records.push(StageRecord {
                        stage,
                        wave,
                        diagnostics: StageDiagnostics {
                            duration,
                            metrics: report.metrics,
                        },
                    });
                }
                Err(err) => {
                    tracing::debug!(%stage, wave, %err, "stage failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// ──────────────────────────── Execution ─────────────────────────────

/// Result of [`Execution::advance`].
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// A wave ran to its barrier.
    Next {
        /// Zero-based wave index.
        wave: usize,
        /// Stages the wave ran.
        stages: Vec<StageKind>,
    },
    /// Every wave has run. Call [`Execution::finish`].
    Complete,
}

/// One in-progress run, advanced wave by wave.
///
/// Dropping an execution part-way leaves the pipeline usable; the next
/// [`Pipeline::start`] begins from scratch.
#[must_use = "an execution does nothing until advanced"]
pub struct Execution<'p, C: Clock = SystemClock> {
    pipeline: &'p mut Pipeline,
    clock: C,
    started: C::Instant,
    next_wave: usize,
    stages: Vec<StageRecord>,
    waves: Vec<WaveDiagnostics>,
}

impl<'p, C: Clock> Execution<'p, C> {
    /// Number of waves that have run.
    #[must_use]
    pub const fn waves_completed(&self) -> usize {
        self.next_wave
    }

    /// Total number of waves.
    #[must_use]
    pub fn wave_count(&self) -> usize {
        self.pipeline.schedule.len()
    }

    /// Whether every wave has run.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.next_wave >= self.wave_count()
    }

    /// Buffers as they stand after the waves run so far.
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.pipeline.workspace
    }

    /// Run the next wave.
    ///
    /// Returns [`Advance::Complete`] once every wave has run; calling
    /// again after that keeps returning it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BufferNotReady`] if a stage's inputs were
    /// not produced, or the first error raised by a stage of the wave.
    /// A failed wave is not counted as run.
    pub fn advance(&mut self) -> Result<Advance, PipelineError> {
        let Some(stages) = self.pipeline.schedule.get(self.next_wave).cloned() else {
            return Ok(Advance::Complete);
        };
        let wave = self.next_wave;
        let start = self.clock.now();
        self.pipeline
            .dispatch_wave(wave, &stages, &self.clock, &mut self.stages)?;
        self.waves.push(WaveDiagnostics {
            stages: stages.clone(),
            duration: self.clock.elapsed(start),
        });
        self.next_wave += 1;
        Ok(Advance::Next { wave, stages })
    }

    /// Run every remaining wave, then [`finish_with_diagnostics`](Self::finish_with_diagnostics).
    ///
    /// # Errors
    ///
    /// See [`advance`](Self::advance) and [`finish`](Self::finish).
    pub fn complete(mut self) -> Result<(&'p Image, PipelineDiagnostics), PipelineError> {
        while let Advance::Next { .. } = self.advance()? {}
        self.finish_with_diagnostics()
    }

    /// Final barrier: return the output image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RunIncomplete`] if the output buffer was
    /// not written.
    pub fn finish(self) -> Result<&'p Image, PipelineError> {
        self.finish_with_diagnostics().map(|(out, _)| out)
    }

    /// Final barrier: return the output image and run diagnostics.
    ///
    /// # Errors
    ///
    /// See [`finish`](Self::finish).
    pub fn finish_with_diagnostics(
        self,
    ) -> Result<(&'p Image, PipelineDiagnostics), PipelineError> {
        let Self {
            pipeline,
            clock,
            started,
            stages,
            waves,
            ..
        } = self;
        let total_duration = clock.elapsed(started);
        let pipeline: &'p Pipeline = pipeline;
        let output = pipeline.output().ok_or(PipelineError::RunIncomplete)?;
        let diagnostics = PipelineDiagnostics {
            dimensions: pipeline.dimensions(),
            strategy: pipeline.config.strategy,
            stages,
            waves,
            warnings: pipeline.warnings.clone(),
            total_duration,
        };
        Ok((output, diagnostics))
    }
}

// ───────────────────────────── Stages ───────────────────────────────

/// Read-only view shared by every stage of a wave.
struct StageContext<'a> {
    config: &'a PipelineConfig,
    kernels: &'a Kernels,
    workspace: &'a Workspace,
}

struct StageReport {
    metrics: StageMetrics,
    warning: Option<PipelineWarning>,
}

impl From<StageMetrics> for StageReport {
    fn from(metrics: StageMetrics) -> Self {
        Self {
            metrics,
            warning: None,
        }
    }
}

impl StageContext<'_> {
    fn execute(&self, stage: StageKind, slot: &mut Slot) -> Result<StageReport, PipelineError> {
        use BufferId as B;
        use StageKind as S;

        let ws = self.workspace;
        let strategy = self.config.strategy;
        let block = self.config.block_size;

        match (stage, slot) {
            (S::BlurSmall, Slot::Image(out)) => {
                self.blur(&self.kernels.blur_small, self.config.blur_small, out)
            }
            (S::BlurLarge, Slot::Image(out)) => {
                self.blur(&self.kernels.blur_large, self.config.blur_large, out)
            }
            (S::BlurUnsharpen, Slot::Image(out)) => {
                self.blur(&self.kernels.blur_unsharpen, self.config.blur_unsharpen, out)
            }
            (S::SobelSmall, Slot::Image(out)) => self.sobel(ws.image(B::BlurredSmall), out),
            (S::SobelLarge, Slot::Image(out)) => self.sobel(ws.image(B::BlurredLarge), out),
            (S::ReduceMin | S::ReduceMax, Slot::Scalar(acc)) => {
                let op = if stage == S::ReduceMin {
                    ReduceOp::Min
                } else {
                    ReduceOp::Max
                };
                let values = ws.image(B::MaskLarge).as_raw();
                let geometry = ReduceGeometry {
                    block_size: block,
                    max_groups: self.config.reduce_groups,
                };
                let value = reduce_into(values, op, geometry, strategy, acc);
                Ok(StageMetrics::Reduce {
                    op,
                    value,
                    groups: geometry.groups_for(values.len()),
                }
                .into())
            }
            (S::Extend, Slot::Image(out)) => {
                let (min, max) = (ws.scalar(B::Minimum), ws.scalar(B::Maximum));
                match extend_into(ws.image(B::MaskLarge), min, max, out, block, strategy) {
                    Ok(()) => Ok(StageMetrics::Extend {
                        min,
                        max,
                        degenerate: false,
                    }
                    .into()),
                    Err(PipelineError::DegenerateRange { min, max }) => {
                        tracing::warn!(min, max, "large edge mask has no spread, using mask 0");
                        let raw: &mut [f32] = out;
                        raw.fill(0.0);
                        Ok(StageReport {
                            metrics: StageMetrics::Extend {
                                min,
                                max,
                                degenerate: true,
                            },
                            warning: Some(PipelineWarning::DegenerateRange { min, max }),
                        })
                    }
                    Err(err) => Err(err),
                }
            }
            (S::Unsharpen, Slot::Image(out)) => {
                let amount = self.config.unsharpen_amount;
                unsharpen_into(
                    ws.image(B::Source),
                    ws.image(B::BlurredUnsharpen),
                    amount,
                    out,
                    block,
                    strategy,
                )?;
                Ok(StageMetrics::Unsharpen { amount }.into())
            }
            (S::CombineLarge, Slot::Image(out)) => {
                combine_into(
                    ws.image(B::Unsharpened),
                    ws.image(B::BlurredLarge),
                    ws.image(B::MaskLargeExtended),
                    out,
                    block,
                    strategy,
                )?;
                Ok(StageMetrics::Combine {
                    mask: B::MaskLargeExtended,
                }
                .into())
            }
            (S::CombineSmall, Slot::Image(out)) => {
                combine_into(
                    ws.image(B::Blended),
                    ws.image(B::BlurredSmall),
                    ws.image(B::MaskSmall),
                    out,
                    block,
                    strategy,
                )?;
                Ok(StageMetrics::Combine { mask: B::MaskSmall }.into())
            }
            (stage, _) => Err(PipelineError::InvalidGraph(format!(
                "stage {stage} was handed a buffer of the wrong kind"
            ))),
        }
    }

    fn blur(
        &self,
        kernel: &ConvolutionKernel,
        spec: KernelSpec,
        out: &mut Image,
    ) -> Result<StageReport, PipelineError> {
        convolve_into(
            self.workspace.image(BufferId::Source),
            kernel,
            out,
            self.config.strategy,
        )?;
        Ok(StageMetrics::Blur {
            diameter: spec.diameter,
            variance: spec.variance,
        }
        .into())
    }

    fn sobel(&self, input: &Image, out: &mut Image) -> Result<StageReport, PipelineError> {
        sobel_into(input, out, self.config.strategy)?;
        Ok(StageMetrics::EdgeDetection {
            pixel_count: out.as_raw().len(),
        }
        .into())
    }
}
