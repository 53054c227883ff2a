// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Diffusive stochastic master equation (Itô form).
//!
//! dρ = L(ρ) dt + Σ_k √η_k (L_k ρ + ρ L_k† − Tr[(L_k + L_k†) ρ] ρ) dW_k
//! dY_k = √η_k Tr[(L_k + L_k†) ρ] dt + dW_k
//!
//! `L` is the Lindbladian of every jump operator. Operators with non-zero
//! efficiency are monitored and each drives one Wiener process.

use ndarray::Array2;
use num_complex::Complex64;

use super::lindblad::MEInterface;
use super::{Generator, Layout};
use crate::linalg::{c, dag, real_inner, trace};
use crate::time_array::TimeArray;

/// A measured jump operator.
#[derive(Debug, Clone)]
pub struct Monitored {
    pub l: TimeArray,
    pub eta: f64,
}

/// Diffusive measurement generator.
#[derive(Debug, Clone)]
pub struct DSMEInterface {
    /// Deterministic part
    pub drift: MEInterface,
    pub monitored: Vec<Monitored>,
}

/// Diffusion term of one monitored channel at a given state.
#[derive(Debug, Clone)]
pub struct DiffusionTerm {
    /// `√η (Lρ + ρL†) − s ρ`
    pub g: Array2<Complex64>,
    /// Signal drift `s = √η Tr[(L + L†) ρ]`
    pub signal: f64,
}

impl DSMEInterface {
    /// Operators with `eta == 0` only contribute to the drift.
    pub fn new(h: TimeArray, jump_ops: Vec<TimeArray>, etas: &[f64]) -> Self {
        let monitored = jump_ops
            .iter()
            .zip(etas)
            .filter(|(_, &eta)| eta != 0.0)
            .map(|(l, &eta)| Monitored { l: l.clone(), eta })
            .collect();
        Self {
            drift: MEInterface::new(h, jump_ops),
            monitored,
        }
    }

    pub fn nmonitored(&self) -> usize {
        self.monitored.len()
    }

    /// Diffusion terms of every monitored channel.
    pub fn diffusion(&self, t: f64, rho: &Array2<Complex64>) -> Vec<DiffusionTerm> {
        self.monitored
            .iter()
            .map(|m| {
                let sqrt_eta = m.eta.sqrt();
                let l = m.l.at(t);
                let l_rho = l.dot(rho);
                let signal = sqrt_eta * (trace(&l_rho) + trace(&rho.dot(&dag(&l)))).re;
                let g = (&l_rho + &rho.dot(&dag(&l))) * c(sqrt_eta) - rho * c(signal);
                DiffusionTerm { g, signal }
            })
            .collect()
    }

    /// Pullback of `Σ_k dW_k g_k(ρ)` through `ρ`.
    pub fn diffusion_vjp(
        &self,
        t: f64,
        rho: &Array2<Complex64>,
        lambda: &Array2<Complex64>,
        dw: &[f64],
    ) -> Array2<Complex64> {
        let overlap = real_inner(lambda, rho);
        let mut out = Array2::zeros(rho.raw_dim());
        for (m, &w) in self.monitored.iter().zip(dw) {
            let sqrt_eta = m.eta.sqrt();
            let l = m.l.at(t);
            let l_dag = dag(&l);
            let x = &l + &l_dag;
            let signal = sqrt_eta * trace(&x.dot(rho)).re;
            let term = (l_dag.dot(lambda) + lambda.dot(&l)) * c(sqrt_eta)
                - lambda * c(signal)
                - x * c(overlap * sqrt_eta);
            out = out + term * c(w);
        }
        out
    }
}

impl Generator for DSMEInterface {
    fn dim(&self) -> usize {
        self.drift.dim()
    }

    fn vector_field(&self, t: f64, y: &Array2<Complex64>) -> Array2<Complex64> {
        self.drift.vector_field(t, y)
    }

    fn adjoint_field(&self, t: f64, lambda: &Array2<Complex64>) -> Array2<Complex64> {
        self.drift.adjoint_field(t, lambda)
    }

    fn param_vjp(
        &self,
        t: f64,
        y: &Array2<Complex64>,
        lambda: &Array2<Complex64>,
        params: &[TimeArray],
    ) -> Vec<f64> {
        self.drift.param_vjp(t, y, lambda, params)
    }

    fn generator_matrix(&self, t: f64) -> Array2<Complex64> {
        self.drift.generator_matrix(t)
    }

    fn param_matrix(&self, dh: &Array2<Complex64>) -> Array2<Complex64> {
        self.drift.param_matrix(dh)
    }

    fn layout(&self) -> Layout {
        Layout::Vectorized
    }

    fn discontinuity_ts(&self) -> Vec<f64> {
        self.drift.discontinuity_ts()
    }

    fn is_piecewise_constant(&self) -> bool {
        self.drift.is_piecewise_constant()
    }
}
