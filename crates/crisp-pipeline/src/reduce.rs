//! Parallel min/max reduction with a shared atomic accumulator.
//!
//! A pass partitions the input across worker groups of `block_size`
//! lanes. Each lane folds a strided subset of the input into its slot,
//! the group then folds its slots pairwise (halving the distance each
//! round) and lane 0 merges the group value into the shared
//! [`Accumulator`] with a compare-and-retry loop. Every phase of a
//! group completes before the next one starts.
//!
//! Min and max are associative and commutative on IEEE floats, so the
//! result does not depend on the order in which groups merge.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::parallel::ExecutionStrategy;

/// Which extremum a reduction pass computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    /// Global minimum.
    Min,
    /// Global maximum.
    Max,
}

impl ReduceOp {
    /// Identity element: `+∞` for min, `−∞` for max.
    #[must_use]
    pub const fn identity(self) -> f32 {
        match self {
            Self::Min => f32::INFINITY,
            Self::Max => f32::NEG_INFINITY,
        }
    }

    /// Fold two values. NaN operands are ignored in favour of the other.
    #[must_use]
    pub const fn combine(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Min => a.min(b),
            Self::Max => a.max(b),
        }
    }

    /// Whether `candidate` would change an accumulator holding `current`.
    #[must_use]
    const fn improves(self, candidate: f32, current: f32) -> bool {
        match self {
            Self::Min => candidate < current,
            Self::Max => candidate > current,
        }
    }
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
        }
    }
}

/// A single `f32` shared by every group of one reduction pass.
///
/// Stored as the bit pattern in an [`AtomicU32`]. Merges only ever
/// move the value towards the pass's extremum, and a merge never loses
/// an improving value under contention.
#[derive(Debug)]
pub struct Accumulator {
    op: ReduceOp,
    bits: AtomicU32,
}

impl Accumulator {
    /// An accumulator holding the identity of `op`.
    #[must_use]
    pub const fn new(op: ReduceOp) -> Self {
        Self {
            op,
            bits: AtomicU32::new(op.identity().to_bits()),
        }
    }

    /// The operation this accumulator folds with.
    #[must_use]
    pub const fn op(&self) -> ReduceOp {
        self.op
    }

    /// Current value.
    #[must_use]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Reset to the identity of `op`.
    ///
    /// Requires exclusive access, so no merge of an earlier pass can
    /// be in flight.
    pub fn reset(&mut self, op: ReduceOp) {
        self.op = op;
        *self.bits.get_mut() = op.identity().to_bits();
    }

    /// Merge `candidate` into the accumulator.
    ///
    /// Reads the current value and, while `candidate` still improves on
    /// it, attempts to swap it in. A failed exchange retries against the
    /// value that won the race.
    pub fn merge(&self, candidate: f32) {
        let mut current = self.bits.load(Ordering::Acquire);
        while self.op.improves(candidate, f32::from_bits(current)) {
            match self.bits.compare_exchange_weak(
                current,
                candidate.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Launch geometry of a reduction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceGeometry {
    /// Lanes per group. Must be a power of two.
    pub block_size: usize,
    /// Cap on the number of groups. `None` launches
    /// `ceil(n / block_size)` groups, one element per lane.
    pub max_groups: Option<usize>,
}

impl ReduceGeometry {
    /// One element per lane, groups of `block_size` lanes.
    #[must_use]
    pub const fn new(block_size: usize) -> Self {
        Self {
            block_size,
            max_groups: None,
        }
    }

    /// Limit the number of groups; lanes then stride over the input.
    #[must_use]
    pub const fn with_max_groups(self, max_groups: usize) -> Self {
        Self {
            max_groups: Some(max_groups),
            ..self
        }
    }

    /// Lanes per group actually launched: `block_size` clamped to
    /// `1..=MAX_BLOCK_SIZE` and rounded up to a power of two.
    #[must_use]
    pub fn lanes(&self) -> usize {
        let max = crate::types::PipelineConfig::MAX_BLOCK_SIZE;
        self.block_size
            .clamp(1, max)
            .checked_next_power_of_two()
            .map_or(max, |lanes| lanes.min(max))
    }

    /// Number of groups launched for `n` elements.
    #[must_use]
    pub fn groups_for(&self, n: usize) -> usize {
        let natural = n.div_ceil(self.lanes());
        self.max_groups.map_or(natural, |cap| natural.min(cap.max(1)))
    }
}

impl Default for ReduceGeometry {
    fn default() -> Self {
        Self::new(crate::types::PipelineConfig::DEFAULT_BLOCK_SIZE)
    }
}

/// Global minimum of `values` using the default geometry on the rayon
/// pool. Returns `+∞` for an empty slice.
#[must_use]
pub fn reduce_min(values: &[f32]) -> f32 {
    let mut acc = Accumulator::new(ReduceOp::Min);
    reduce_into(
        values,
        ReduceOp::Min,
        ReduceGeometry::default(),
        ExecutionStrategy::Parallel,
        &mut acc,
    )
}

/// Global maximum of `values` using the default geometry on the rayon
/// pool. Returns `−∞` for an empty slice.
#[must_use]
pub fn reduce_max(values: &[f32]) -> f32 {
    let mut acc = Accumulator::new(ReduceOp::Max);
    reduce_into(
        values,
        ReduceOp::Max,
        ReduceGeometry::default(),
        ExecutionStrategy::Parallel,
        &mut acc,
    )
}

/// Run one reduction pass of `op` over `values` into `acc` and return
/// the result.
///
/// `acc` is reset to the identity of `op` before any group starts, so
/// a value left over from an earlier pass can never leak into this one.
/// The group width is [`ReduceGeometry::lanes`]: a non-power-of-two
/// `block_size` is rounded up and an oversized one is clamped. Surplus
/// lanes hold the identity.
pub fn reduce_into(
    values: &[f32],
    op: ReduceOp,
    geometry: ReduceGeometry,
    strategy: ExecutionStrategy,
    acc: &mut Accumulator,
) -> f32 {
    acc.reset(op);
    let n = values.len();
    if n == 0 {
        return acc.load();
    }

    let block = geometry.lanes();
    let groups = geometry.groups_for(n);
    let stride = groups * block;
    let shared: &Accumulator = acc;

    let run_group = |lanes: &mut Vec<f32>, group: usize| {
        lanes.clear();
        lanes.resize(block, op.identity());

        // Strided accumulation per lane.
        for (tid, lane) in lanes.iter_mut().enumerate() {
            let mut gid = group * block + tid;
            while gid < n {
                *lane = op.combine(*lane, values[gid]);
                gid += stride;
            }
        }

        // Binary-tree fold within the group.
        let mut distance = block / 2;
        while distance > 0 {
            for tid in 0..distance {
                lanes[tid] = op.combine(lanes[tid], lanes[tid + distance]);
            }
            distance /= 2;
        }

        tracing::trace!(group, value = lanes[0], op = %shared.op(), "merging group value");
        shared.merge(lanes[0]);
    };

    match strategy {
        ExecutionStrategy::Parallel => {
            (0..groups)
                .into_par_iter()
                .for_each_init(|| Vec::with_capacity(block), run_group);
        }
        ExecutionStrategy::Serial => {
            let mut lanes = Vec::with_capacity(block);
            for group in 0..groups {
                run_group(&mut lanes, group);
            }
        }
    }

    acc.load()
}
