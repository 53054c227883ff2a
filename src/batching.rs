// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Batched vectorization layer.
//!
//! A [`BatchPlan`] maps a single-trajectory function over the batch axes of
//! its arguments:
//!
//! - [`BatchMode::Cartesian`]: every argument keeps its own axes and the
//!   output shape is the concatenation of the argument batch shapes.
//! - [`BatchMode::Flat`]: arguments are broadcast to one common batch shape
//!   and mapped elementwise.
//!
//! Noise realizations add one more axis, always last and always mapped
//! independently of the physical axes.
//!
//! Elements run on a `rayon` pool when the runtime allows it, otherwise
//! sequentially in row-major order. The output order is row-major either way.

use rayon::prelude::*;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::time_array::broadcast_shapes;

/// How the batch axes of different arguments combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Outer product of all batch axes
    Cartesian,
    /// Broadcast to a common shape, then map elementwise
    Flat,
}

impl BatchMode {
    pub fn from_cartesian(cartesian: bool) -> Self {
        if cartesian {
            BatchMode::Cartesian
        } else {
            BatchMode::Flat
        }
    }
}

/// Index of one batch element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchIndex {
    /// Position in the output batch shape
    pub position: Vec<usize>,
    /// Index into each argument's own batch shape (broadcast-resolved)
    pub args: Vec<Vec<usize>>,
    /// Noise realization, if the plan has a key axis
    pub key: Option<usize>,
}

/// Output batch shape and per-argument index mapping.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    mode: BatchMode,
    arg_shapes: Vec<Vec<usize>>,
    /// Batch shape spanned by the physical arguments
    physical: Vec<usize>,
    nkeys: Option<usize>,
}

impl BatchPlan {
    /// Plan over arguments with the given batch shapes.
    pub fn new(mode: BatchMode, arg_shapes: &[Vec<usize>]) -> Result<Self> {
        let physical = match mode {
            BatchMode::Cartesian => arg_shapes.concat(),
            BatchMode::Flat => arg_shapes
                .iter()
                .try_fold(Vec::new(), |acc, s| broadcast_shapes(&acc, s))?,
        };
        Ok(Self {
            mode,
            arg_shapes: arg_shapes.to_vec(),
            physical,
            nkeys: None,
        })
    }

    /// Append an independent axis of `nkeys` noise realizations.
    pub fn with_keys(mut self, nkeys: usize) -> Self {
        self.nkeys = Some(nkeys);
        self
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Batch shape spanned by the physical arguments.
    pub fn physical_shape(&self) -> &[usize] {
        &self.physical
    }

    /// Full output batch shape, key axis last.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = self.physical.clone();
        shape.extend(self.nkeys);
        shape
    }

    /// Number of batch elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the `flat`-th element in row-major order.
    pub fn index(&self, flat: usize) -> BatchIndex {
        let shape = self.shape();
        let mut position = vec![0; shape.len()];
        let mut rem = flat;
        for (p, &n) in position.iter_mut().zip(&shape).rev() {
            *p = rem % n.max(1);
            rem /= n.max(1);
        }

        let (physical, key) = match self.nkeys {
            Some(_) => (&position[..position.len() - 1], position.last().copied()),
            None => (&position[..], None),
        };

        let args = match self.mode {
            BatchMode::Cartesian => {
                let mut offset = 0;
                self.arg_shapes
                    .iter()
                    .map(|s| {
                        let idx = physical[offset..offset + s.len()].to_vec();
                        offset += s.len();
                        idx
                    })
                    .collect()
            }
            BatchMode::Flat => self
                .arg_shapes
                .iter()
                .map(|s| {
                    let lead = physical.len() - s.len();
                    s.iter()
                        .enumerate()
                        .map(|(k, &n)| if n == 1 { 0 } else { physical[lead + k] })
                        .collect()
                })
                .collect(),
        };

        BatchIndex {
            position,
            args,
            key,
        }
    }

    /// Apply `f` to every element; results are in row-major order.
    pub fn map<T, F>(&self, runtime: &RuntimeConfig, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&BatchIndex) -> Result<T> + Sync,
    {
        let n = self.len();
        debug!(
            shape = ?self.shape(),
            parallel = runtime.parallel,
            "mapping over batch"
        );
        if !runtime.parallel || n <= 1 {
            return (0..n).map(|i| f(&self.index(i))).collect();
        }

        let run = || {
            (0..n)
                .into_par_iter()
                .map(|i| f(&self.index(i)))
                .collect::<Result<Vec<T>>>()
        };
        match runtime.num_threads {
            Some(threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads.max(1))
                .build()
                .map_err(|e| Error::Config(format!("failed to build thread pool: {}", e)))?
                .install(run),
            None => run(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequential() -> RuntimeConfig {
        RuntimeConfig {
            parallel: false,
            num_threads: None,
        }
    }

    // =========================================================================
    // Shapes
    // =========================================================================

    #[test]
    fn test_cartesian_concatenates_shapes() {
        let plan = BatchPlan::new(BatchMode::Cartesian, &[vec![3], vec![], vec![2, 4]]).unwrap();
        assert_eq!(plan.shape(), vec![3, 2, 4]);
        assert_eq!(plan.len(), 24);
        let idx = plan.index(23);
        assert_eq!(idx.position, vec![2, 1, 3]);
        assert_eq!(idx.args, vec![vec![2], vec![], vec![1, 3]]);
    }

    #[test]
    fn test_flat_broadcasts_shapes() {
        let plan = BatchPlan::new(BatchMode::Flat, &[vec![3, 1], vec![4], vec![]]).unwrap();
        assert_eq!(plan.shape(), vec![3, 4]);
        let idx = plan.index(6);
        assert_eq!(idx.position, vec![1, 2]);
        assert_eq!(idx.args, vec![vec![1, 0], vec![2], vec![]]);
    }

    #[test]
    fn test_flat_rejects_incompatible_shapes() {
        assert!(BatchPlan::new(BatchMode::Flat, &[vec![3], vec![2]]).is_err());
        assert!(BatchPlan::new(BatchMode::Cartesian, &[vec![3], vec![2]]).is_ok());
    }

    #[test]
    fn test_key_axis_is_last() {
        let plan = BatchPlan::new(BatchMode::Cartesian, &[vec![2], vec![3]])
            .unwrap()
            .with_keys(5);
        assert_eq!(plan.shape(), vec![2, 3, 5]);
        assert_eq!(plan.physical_shape(), &[2, 3]);
        let idx = plan.index(5 * 3 + 4);
        assert_eq!(idx.key, Some(4));
        assert_eq!(idx.args, vec![vec![1], vec![0]]);
    }

    #[test]
    fn test_unbatched_plan_has_one_element() {
        let plan = BatchPlan::new(BatchMode::Flat, &[vec![], vec![]]).unwrap();
        assert!(plan.shape().is_empty());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.index(0).args, vec![Vec::<usize>::new(), vec![]]);
    }

    // =========================================================================
    // Execution
    // =========================================================================

    #[test]
    fn test_parallel_and_sequential_agree() {
        let plan = BatchPlan::new(BatchMode::Cartesian, &[vec![4], vec![3]]).unwrap();
        let f = |idx: &BatchIndex| Ok(idx.args[0][0] * 10 + idx.args[1][0]);
        let seq = plan.map(&sequential(), f).unwrap();
        let par = plan
            .map(
                &RuntimeConfig {
                    parallel: true,
                    num_threads: Some(2),
                },
                f,
            )
            .unwrap();
        assert_eq!(seq, par);
        assert_eq!(seq[..4], [0, 1, 2, 10]);
    }

    #[test]
    fn test_first_error_is_returned() {
        let plan = BatchPlan::new(BatchMode::Flat, &[vec![3]]).unwrap();
        let result: Result<Vec<()>> = plan.map(&sequential(), |idx| {
            if idx.args[0][0] == 1 {
                Err(Error::Config("boom".into()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
    }
}
