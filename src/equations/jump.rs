// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Monte-Carlo wave-function unraveling.
//!
//! Between jumps the unnormalized state evolves under the non-Hermitian
//! Hamiltonian `H_eff = H − i/2 Σ L†L`; its norm decay sets the jump
//! probability.

use ndarray::Array2;
use num_complex::Complex64;

use super::{Generator, Layout};
use crate::linalg::{c, dag, norm_sqr, real_inner, I};
use crate::time_array::{merge_times, TimeArray};

/// Quantum-jump generator.
#[derive(Debug, Clone)]
pub struct MCInterface {
    pub h: TimeArray,
    pub jump_ops: Vec<TimeArray>,
}

impl MCInterface {
    pub fn new(h: TimeArray, jump_ops: Vec<TimeArray>) -> Self {
        Self { h, jump_ops }
    }

    /// `H_eff(t) = H(t) − i/2 Σ L†L`.
    pub fn effective_hamiltonian(&self, t: f64) -> Array2<Complex64> {
        self.jump_ops.iter().fold(self.h.at(t), |acc, l| {
            let l = l.at(t);
            acc - dag(&l).dot(&l) * (I * c(0.5))
        })
    }

    /// Jump weights `‖L_k ψ‖²`.
    pub fn jump_weights(&self, t: f64, psi: &Array2<Complex64>) -> Vec<f64> {
        self.jump_ops
            .iter()
            .map(|l| norm_sqr(&l.at(t).dot(psi)))
            .collect()
    }

    /// Normalized post-jump state `L_k ψ / ‖L_k ψ‖`.
    pub fn apply_jump(&self, t: f64, k: usize, psi: &Array2<Complex64>) -> Array2<Complex64> {
        let out = self.jump_ops[k].at(t).dot(psi);
        let norm = norm_sqr(&out).sqrt();
        if norm > 0.0 {
            out / c(norm)
        } else {
            out
        }
    }
}

impl Generator for MCInterface {
    fn dim(&self) -> usize {
        self.h.dim()
    }

    fn vector_field(&self, t: f64, y: &Array2<Complex64>) -> Array2<Complex64> {
        self.effective_hamiltonian(t).dot(y) * (-I)
    }

    fn adjoint_field(&self, t: f64, lambda: &Array2<Complex64>) -> Array2<Complex64> {
        dag(&self.effective_hamiltonian(t)).dot(lambda) * I
    }

    fn param_vjp(
        &self,
        t: f64,
        y: &Array2<Complex64>,
        lambda: &Array2<Complex64>,
        params: &[TimeArray],
    ) -> Vec<f64> {
        params
            .iter()
            .map(|p| real_inner(lambda, &(p.at(t).dot(y) * (-I))))
            .collect()
    }

    fn generator_matrix(&self, t: f64) -> Array2<Complex64> {
        self.effective_hamiltonian(t) * (-I)
    }

    fn param_matrix(&self, dh: &Array2<Complex64>) -> Array2<Complex64> {
        dh * (-I)
    }

    fn layout(&self) -> Layout {
        Layout::Left
    }

    fn discontinuity_ts(&self) -> Vec<f64> {
        merge_times(
            self.h
                .discontinuity_ts()
                .into_iter()
                .chain(self.jump_ops.iter().flat_map(|l| l.discontinuity_ts())),
        )
    }

    fn is_piecewise_constant(&self) -> bool {
        self.h.is_piecewise_constant() && self.jump_ops.iter().all(|l| l.is_piecewise_constant())
    }
}
