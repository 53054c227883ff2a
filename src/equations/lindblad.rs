// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Lindblad master equation.
//!
//! dρ/dt = -i[H, ρ] + Σ_k D[L_k](ρ),  D[L](ρ) = L ρ L† − ½{L†L, ρ}
//!
//! The right-hand side is evaluated in the reduced form
//! `T(ρ) + T(ρ)†` with `T(ρ) = M ρ + ½ Σ L ρ L†` and
//! `M = -iH − ½ Σ L†L`, which equals the Lindbladian for Hermitian ρ
//! and keeps the result Hermitian by construction.
//!
//! Ref: Breuer & Petruccione, "The Theory of Open Quantum Systems" (2002), Ch. 3.

use ndarray::Array2;
use num_complex::Complex64;

use super::{Generator, Layout};
use crate::linalg::{c, dag, eye, kron, real_inner, I};
use crate::time_array::{merge_times, TimeArray};

/// Open-system generator.
#[derive(Debug, Clone)]
pub struct MEInterface {
    pub h: TimeArray,
    pub jump_ops: Vec<TimeArray>,
}

impl MEInterface {
    pub fn new(h: TimeArray, jump_ops: Vec<TimeArray>) -> Self {
        Self { h, jump_ops }
    }

    /// `M(t) = -iH(t) − ½ Σ L†L` and the jump operators at `t`.
    fn parts(&self, t: f64) -> (Array2<Complex64>, Vec<Array2<Complex64>>) {
        let ls: Vec<_> = self.jump_ops.iter().map(|l| l.at(t)).collect();
        let mut m = self.h.at(t) * (-I);
        for l in &ls {
            m = m - dag(l).dot(l) * c(0.5);
        }
        (m, ls)
    }
}

/// Single-operator dissipator `D[L](ρ) = L ρ L† − ½ L†L ρ − ½ ρ L†L`.
pub fn dissipator(l: &Array2<Complex64>, rho: &Array2<Complex64>) -> Array2<Complex64> {
    let l_dag = dag(l);
    let l_dag_l = l_dag.dot(l);
    let half = c(0.5);
    l.dot(rho).dot(&l_dag) - l_dag_l.dot(rho) * half - rho.dot(&l_dag_l) * half
}

/// Lindbladian in its textbook form, `-i[H, ρ] + Σ D[L](ρ)`.
pub fn lindbladian(
    h: &Array2<Complex64>,
    jump_ops: &[Array2<Complex64>],
    rho: &Array2<Complex64>,
) -> Array2<Complex64> {
    let commutator = (h.dot(rho) - rho.dot(h)) * (-I);
    jump_ops
        .iter()
        .fold(commutator, |acc, l| acc + dissipator(l, rho))
}

fn conj(m: &Array2<Complex64>) -> Array2<Complex64> {
    m.mapv(|z| z.conj())
}

impl Generator for MEInterface {
    fn dim(&self) -> usize {
        self.h.dim()
    }

    fn vector_field(&self, t: f64, rho: &Array2<Complex64>) -> Array2<Complex64> {
        let (m, ls) = self.parts(t);
        let mut out = m.dot(rho);
        for l in &ls {
            out = out + l.dot(rho).dot(&dag(l)) * c(0.5);
        }
        let herm = dag(&out);
        out + herm
    }

    fn adjoint_field(&self, t: f64, lambda: &Array2<Complex64>) -> Array2<Complex64> {
        let (m, ls) = self.parts(t);
        let mu = lambda + &dag(lambda);
        let mut out = dag(&m).dot(&mu);
        for l in &ls {
            out = out + dag(l).dot(&mu).dot(l) * c(0.5);
        }
        out
    }

    fn param_vjp(
        &self,
        t: f64,
        rho: &Array2<Complex64>,
        lambda: &Array2<Complex64>,
        params: &[TimeArray],
    ) -> Vec<f64> {
        let mu = lambda + &dag(lambda);
        params
            .iter()
            .map(|p| real_inner(&mu, &(p.at(t).dot(rho) * (-I))))
            .collect()
    }

    fn generator_matrix(&self, t: f64) -> Array2<Complex64> {
        let (m, ls) = self.parts(t);
        let id = eye(m.nrows());
        let mut s = kron(&m, &id) + kron(&id, &conj(&m));
        for l in &ls {
            s = s + kron(l, &conj(l));
        }
        s
    }

    fn param_matrix(&self, dh: &Array2<Complex64>) -> Array2<Complex64> {
        let a = dh * (-I);
        let id = eye(a.nrows());
        kron(&a, &id) + kron(&id, &conj(&a))
    }

    fn layout(&self) -> Layout {
        Layout::Vectorized
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
