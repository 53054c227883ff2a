// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Save policy.
//!
//! What is retained at each save time is a value, not a type: one
//! [`SavePolicy`] configures states, expectation values, extra quantities
//! and measurement signals for every step method.

use ndarray::{Array1, Array2};
use num_complex::Complex64;

use crate::linalg::expect;
use crate::options::SaveExtraFn;

/// What to retain at each save time.
#[derive(Clone, Default)]
pub struct SavePolicy {
    /// Keep every saved state, or only the last
    pub save_states: bool,
    /// Observables evaluated at each save time
    pub exp_ops: Vec<Array2<Complex64>>,
    /// Extra quantity evaluated at each save time
    pub extra: Option<SaveExtraFn>,
}

impl SavePolicy {
    pub fn new(save_states: bool, exp_ops: Vec<Array2<Complex64>>, extra: Option<SaveExtraFn>) -> Self {
        Self {
            save_states,
            exp_ops,
            extra,
        }
    }
}

/// Data retained by one trajectory.
#[derive(Debug, Clone)]
pub struct Saved {
    /// States at every save time, or only the final one
    pub ysave: Vec<Array2<Complex64>>,
    /// Expectation values, shape `(nE, ntsave)`
    pub esave: Array2<Complex64>,
    /// Extra quantities, shape `(ntsave, k)`
    pub extra: Option<Array2<Complex64>>,
    /// Time-averaged measurement records, shape `(nLm, ntsave - 1)`
    pub measurements: Option<Array2<f64>>,
}

impl Saved {
    /// State at the last save time.
    pub fn final_state(&self) -> Option<&Array2<Complex64>> {
        self.ysave.last()
    }
}

/// Incremental accumulator filled during a run.
pub(crate) struct Saver {
    policy: SavePolicy,
    states: Vec<Array2<Complex64>>,
    expects: Vec<Vec<Complex64>>,
    extra: Vec<Array1<Complex64>>,
    signals: Vec<Array1<f64>>,
}

impl Saver {
    pub fn new(policy: SavePolicy) -> Self {
        Self {
            policy,
            states: Vec::new(),
            expects: Vec::new(),
            extra: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn save_state(&mut self, y: &Array2<Complex64>) {
        if !self.policy.save_states {
            self.states.clear();
        }
        self.states.push(y.clone());
        self.expects
            .push(self.policy.exp_ops.iter().map(|op| expect(op, y)).collect());
        if let Some(f) = &self.policy.extra {
            self.extra.push(f(y));
        }
    }

    /// Integrated measurement signal at the current save time.
    pub fn save_signal(&mut self, signal: &Array1<f64>) {
        self.signals.push(signal.clone());
    }

    pub fn finalize(self, tsave: &[f64]) -> Saved {
        let nt = self.expects.len();
        let ne = self.policy.exp_ops.len();
        let esave = Array2::from_shape_fn((ne, nt), |(i, k)| self.expects[k][i]);

        let extra = self.policy.extra.as_ref().map(|_| {
            let width = self.extra.first().map_or(0, |e| e.len());
            Array2::from_shape_fn((nt, width), |(k, j)| {
                self.extra[k].get(j).copied().unwrap_or_default()
            })
        });

        let measurements = (!self.signals.is_empty()).then(|| {
            let nl = self.signals[0].len();
            let nint = self.signals.len().saturating_sub(1);
            Array2::from_shape_fn((nl, nint), |(l, k)| {
                (self.signals[k + 1][l] - self.signals[k][l]) / (tsave[k + 1] - tsave[k])
            })
        });

        Saved {
            ysave: self.states,
            esave,
            extra,
            measurements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::c;
    use crate::operators::{basis, sigmax, sigmaz};
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::sync::Arc;

    #[test]
    fn test_expectations_are_observable_major() {
        let mut saver = Saver::new(SavePolicy::new(true, vec![sigmaz(), sigmax()], None));
        saver.save_state(&basis(2, 0));
        saver.save_state(&basis(2, 1));
        saver.save_state(&basis(2, 1));
        let saved = saver.finalize(&[0.0, 1.0, 2.0]);
        assert_eq!(saved.esave.dim(), (2, 3));
        assert_relative_eq!(saved.esave[[0, 0]].re, 1.0);
        assert_relative_eq!(saved.esave[[0, 2]].re, -1.0);
        assert_eq!(saved.ysave.len(), 3);
    }

    #[test]
    fn test_final_only_keeps_last_state() {
        let mut saver = Saver::new(SavePolicy::new(false, vec![], None));
        saver.save_state(&basis(2, 0));
        saver.save_state(&basis(2, 1));
        let saved = saver.finalize(&[0.0, 1.0]);
        assert_eq!(saved.ysave.len(), 1);
        assert_eq!(saved.final_state(), Some(&basis(2, 1)));
        assert_eq!(saved.esave.dim(), (0, 2));
    }

    #[test]
    fn test_extra_is_time_major() {
        let extra: SaveExtraFn = Arc::new(|y| array![y[[0, 0]], y[[1, 0]] * c(2.0)]);
        let mut saver = Saver::new(SavePolicy::new(true, vec![], Some(extra)));
        saver.save_state(&basis(2, 1));
        let saved = saver.finalize(&[0.0]);
        let extra = saved.extra.unwrap();
        assert_eq!(extra.dim(), (1, 2));
        assert_relative_eq!(extra[[0, 1]].re, 2.0);
    }

    #[test]
    fn test_measurements_are_interval_averages() {
        let mut saver = Saver::new(SavePolicy::new(true, vec![], None));
        for signal in [array![0.0], array![0.5], array![2.5]] {
            saver.save_state(&basis(2, 0));
            saver.save_signal(&signal);
        }
        let saved = saver.finalize(&[0.0, 0.5, 1.5]);
        let meas = saved.measurements.unwrap();
        assert_eq!(meas.dim(), (1, 2));
        assert_relative_eq!(meas[[0, 0]], 1.0);
        assert_relative_eq!(meas[[0, 1]], 2.0);
    }
}
