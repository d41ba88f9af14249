//! Dispatch of data-parallel kernel work.
//!
//! Every kernel in this crate writes its output through one of the
//! helpers below, so the choice between the rayon pool and the calling
//! thread is made in one place. Row-shaped kernels (convolution,
//! Sobel) are partitioned by output row; element-wise kernels by
//! fixed-size blocks of elements.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Controls how kernels and independent stages are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    /// Run on the global rayon pool. Independent pipeline stages of
    /// the same wave run concurrently.
    #[default]
    Parallel,

    /// Run everything on the calling thread, one stage at a time, in
    /// canonical stage order.
    Serial,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parallel => f.write_str("parallel"),
            Self::Serial => f.write_str("serial"),
        }
    }
}

/// Fill `dst` row by row: `f(i, row)` writes output row `i`.
///
/// `dst.len()` must be a multiple of `cols`; a trailing partial row is
/// left untouched.
pub fn for_each_row<F>(dst: &mut [f32], cols: usize, strategy: ExecutionStrategy, f: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    if cols == 0 {
        return;
    }
    match strategy {
        ExecutionStrategy::Parallel => dst
            .par_chunks_exact_mut(cols)
            .enumerate()
            .for_each(|(i, row)| f(i, row)),
        ExecutionStrategy::Serial => dst
            .chunks_exact_mut(cols)
            .enumerate()
            .for_each(|(i, row)| f(i, row)),
    }
}

/// Fill `dst[i] = f(i)` for every element, in blocks of `block` elements.
pub fn fill_indexed<F>(dst: &mut [f32], block: usize, strategy: ExecutionStrategy, f: F)
where
    F: Fn(usize) -> f32 + Send + Sync,
{
    let block = block.max(1);
    let write_block = |(b, chunk): (usize, &mut [f32])| {
        let offset = b * block;
        for (k, out) in chunk.iter_mut().enumerate() {
            *out = f(offset + k);
        }
    };
    match strategy {
        ExecutionStrategy::Parallel => dst.par_chunks_mut(block).enumerate().for_each(write_block),
        ExecutionStrategy::Serial => dst.chunks_mut(block).enumerate().for_each(write_block),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_receive_their_index() {
        for strategy in [ExecutionStrategy::Parallel, ExecutionStrategy::Serial] {
            let mut dst = vec![0.0_f32; 12];
            for_each_row(&mut dst, 4, strategy, |i, row| {
                for (j, v) in row.iter_mut().enumerate() {
                    *v = (i * 10 + j) as f32;
                }
            });
            assert_eq!(
                dst,
                vec![0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0, 20.0, 21.0, 22.0, 23.0]
            );
        }
    }

    #[test]
    fn zero_columns_is_a_no_op() {
        let mut dst: Vec<f32> = Vec::new();
        for_each_row(&mut dst, 0, ExecutionStrategy::Parallel, |_, _| {});
        assert!(dst.is_empty());
    }

    #[test]
    fn fill_indexed_covers_partial_last_block() {
        for strategy in [ExecutionStrategy::Parallel, ExecutionStrategy::Serial] {
            let mut dst = vec![-1.0_f32; 37];
            fill_indexed(&mut dst, 8, strategy, |i| i as f32);
            for (i, v) in dst.iter().enumerate() {
                assert!((v - i as f32).abs() < f32::EPSILON, "index {i} got {v}");
            }
        }
    }

    #[test]
    fn zero_block_is_treated_as_one() {
        let mut dst = vec![0.0_f32; 3];
        fill_indexed(&mut dst, 0, ExecutionStrategy::Serial, |i| (i + 1) as f32);
        assert_eq!(dst, vec![1.0, 2.0, 3.0]);
    }
}
