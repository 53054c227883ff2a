// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Euler-Maruyama for the diffusive stochastic master equation.
//!
//! The state is the pair `(ρ, Y)` of density matrix and integrated
//! measurement signals. One step draws a Wiener increment per monitored
//! channel:
//!
//! ```text
//! ρ₁ = ρ + h L(ρ) + Σ_k g_k(ρ) ΔW_k
//! Y₁ = Y + h s(ρ) + ΔW
//! ```
//!
//! The increments are the step record, so a step can be replayed exactly
//! during the backward sweep.

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use super::adjoint::Differentiable;
use super::save::Saver;
use super::state::OdeState;
use super::stepping::{Attempt, ReversibleRule, Savable, StepRule};
use super::tableau::StepSpan;
use crate::equations::{DSMEInterface, Generator};
use crate::error::Result;
use crate::linalg::dag;
use crate::time_array::TimeArray;

/// Density matrix and integrated signals of one measured trajectory.
#[derive(Debug, Clone)]
pub struct DsmeState {
    pub rho: Array2<Complex64>,
    /// Integrated measurement signal of each monitored channel
    pub signal: Array1<f64>,
}

impl DsmeState {
    pub fn new(rho: Array2<Complex64>, nmonitored: usize) -> Self {
        Self {
            rho,
            signal: Array1::zeros(nmonitored),
        }
    }
}

impl OdeState for DsmeState {
    fn add_scaled(&mut self, a: f64, x: &Self) {
        self.rho.add_scaled(a, &x.rho);
        self.signal.add_scaled(a, &x.signal);
    }

    fn zeros_like(&self) -> Self {
        Self {
            rho: self.rho.zeros_like(),
            signal: self.signal.zeros_like(),
        }
    }

    fn error_sums(err: &Self, y0: &Self, y1: &Self, atol: f64, rtol: f64) -> (f64, usize) {
        OdeState::error_sums(&err.rho, &y0.rho, &y1.rho, atol, rtol)
    }
}

impl Savable for DsmeState {
    fn save(&self, saver: &mut Saver) {
        saver.save_state(&self.rho);
        saver.save_signal(&self.signal);
    }
}

impl Differentiable for DsmeState {
    fn primal(&self) -> &Array2<Complex64> {
        &self.rho
    }

    fn cotangent(&self, g: Array2<Complex64>) -> Self {
        Self {
            rho: g,
            signal: self.signal.zeros_like(),
        }
    }
}

/// Wiener increments of `n` channels over a step of size `h`.
pub(crate) fn wiener_increments(rng: &mut StdRng, n: usize, h: f64) -> Vec<f64> {
    let scale = h.abs().sqrt();
    (0..n)
        .map(|_| scale * rng.sample::<f64, _>(StandardNormal))
        .collect()
}

/// Euler-Maruyama rule; the record is the Wiener increment of each channel.
pub(crate) struct EulerMaruyamaRule<'a> {
    pub gen: &'a DSMEInterface,
    pub rng: StdRng,
}

impl EulerMaruyamaRule<'_> {
    fn advance(&self, span: &StepSpan, y: &DsmeState, dw: &[f64]) -> DsmeState {
        let (t, h) = (span.t, span.h());
        let mut rho = y.rho.clone();
        rho.add_scaled(h, &self.gen.vector_field(t, &y.rho));
        let mut signal = y.signal.clone();
        for ((term, &w), s) in self
            .gen
            .diffusion(t, &y.rho)
            .iter()
            .zip(dw)
            .zip(signal.iter_mut())
        {
            rho.add_scaled(w, &term.g);
            *s += term.signal * h + w;
        }
        DsmeState { rho, signal }
    }
}

impl StepRule<DsmeState> for EulerMaruyamaRule<'_> {
    type Record = Vec<f64>;

    fn step(&mut self, span: &StepSpan, y: &DsmeState) -> Result<Attempt<DsmeState, Vec<f64>>> {
        let dw = wiener_increments(&mut self.rng, self.gen.nmonitored(), span.h());
        Ok(Attempt {
            y: self.advance(span, y, &dw),
            error: None,
            record: dw,
        })
    }

    fn derivative(&self, t: f64, y: &DsmeState) -> DsmeState {
        DsmeState {
            rho: self.gen.vector_field(t, &y.rho),
            signal: y.signal.zeros_like(),
        }
    }
}

impl ReversibleRule<DsmeState> for EulerMaruyamaRule<'_> {
    fn replay(&self, span: &StepSpan, record: &Vec<f64>, y: &DsmeState) -> Result<DsmeState> {
        Ok(self.advance(span, y, record))
    }

    fn vjp(
        &self,
        span: &StepSpan,
        record: &Vec<f64>,
        y: &DsmeState,
        ybar: &DsmeState,
        params: &[TimeArray],
    ) -> Result<(DsmeState, Vec<f64>)> {
        let (t, h) = (span.t, span.h());
        let lambda = &ybar.rho;
        let mut rho_bar = lambda.clone();
        rho_bar.add_scaled(h, &self.gen.adjoint_field(t, lambda));
        rho_bar.add_scaled(1.0, &self.gen.diffusion_vjp(t, &y.rho, lambda, record));
        // s_k = √η_k Re Tr[(L_k + L_k†) ρ]
        for (m, &sbar) in self.gen.monitored.iter().zip(ybar.signal.iter()) {
            if sbar != 0.0 {
                let l = m.l.at(t);
                let x = &l + &dag(&l);
                rho_bar.add_scaled(h * sbar * m.eta.sqrt(), &x);
            }
        }
        let grad = self
            .gen
            .param_vjp(t, &y.rho, lambda, params)
            .into_iter()
            .map(|g| h * g)
            .collect();
        Ok((
            DsmeState {
                rho: rho_bar,
                signal: ybar.signal.clone(),
            },
            grad,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{c, max_abs_diff, real_inner, todm, trace};
    use crate::operators::{basis, sigmam, sigmax, sigmay, sigmaz};
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn measured(theta: f64) -> DSMEInterface {
        DSMEInterface::new(
            TimeArray::from_matrix(sigmax() + sigmay() * c(theta)),
            vec![
                TimeArray::from_matrix(sigmam() * c(0.7)),
                TimeArray::from_matrix(sigmaz() * c(0.3)),
            ],
            &[0.8, 0.0],
        )
    }

    fn rho0() -> Array2<Complex64> {
        todm(&((basis(2, 0) + basis(2, 1) * c(0.5)) * c(1.0 / 1.25_f64.sqrt())))
    }

    #[test]
    fn test_wiener_increment_moments() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;
        // backward steps draw with the same variance
        let xs = wiener_increments(&mut rng, n, -0.25);
        let mean = xs.iter().sum::<f64>() / n as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.015, "mean {}", mean);
        assert!((var - 0.25).abs() < 0.0125, "variance {}", var);
    }

    #[test]
    fn test_step_preserves_trace() {
        let gen = measured(0.1);
        let mut rule = EulerMaruyamaRule {
            gen: &gen,
            rng: StdRng::seed_from_u64(1),
        };
        let y = DsmeState::new(rho0(), gen.nmonitored());
        let attempt = rule.step(&StepSpan::new(0.0, 0.01), &y).unwrap();
        assert_eq!(attempt.record.len(), 1);
        assert_relative_eq!(trace(&attempt.y.rho).re, 1.0, epsilon = 1e-12);
        let replayed = rule.replay(&StepSpan::new(0.0, 0.01), &attempt.record, &y).unwrap();
        assert!(max_abs_diff(&replayed.rho, &attempt.y.rho) < 1e-15);
        assert_eq!(replayed.signal, attempt.y.signal);
    }

    #[test]
    fn test_zero_noise_is_an_euler_step() {
        let gen = measured(0.0);
        let rule = EulerMaruyamaRule {
            gen: &gen,
            rng: StdRng::seed_from_u64(0),
        };
        let span = StepSpan::new(0.2, 0.25);
        let y = DsmeState::new(rho0(), 1);
        let out = rule.replay(&span, &vec![0.0], &y).unwrap();
        let mut expected = rho0();
        expected.add_scaled(0.05, &gen.vector_field(0.2, &rho0()));
        assert!(max_abs_diff(&out.rho, &expected) < 1e-15);
        // signal drift √η Tr[(L + L†) ρ] h
        let l = sigmam() * c(0.7);
        let drift = 0.8_f64.sqrt() * trace(&(&l + &dag(&l)).dot(&rho0())).re * 0.05;
        assert_relative_eq!(out.signal[0], drift, epsilon = 1e-14);
    }

    #[test]
    fn test_vjp_matches_finite_differences() {
        let theta = 0.25;
        let span = StepSpan::new(0.0, 0.05);
        let dw = vec![0.13];
        let params = vec![TimeArray::from_matrix(sigmay())];
        let ybar = DsmeState {
            rho: Array2::from_shape_fn((2, 2), |(i, j)| Complex64::new(0.3 + i as f64, 0.2 * j as f64)),
            signal: Array1::from(vec![0.4]),
        };
        let pairing = |out: &DsmeState| real_inner(&ybar.rho, &out.rho) + ybar.signal.dot(&out.signal);
        let out_at = |theta: f64, rho: &Array2<Complex64>| {
            let gen = measured(theta);
            let rule = EulerMaruyamaRule {
                gen: &gen,
                rng: StdRng::seed_from_u64(0),
            };
            rule.replay(&span, &dw, &DsmeState::new(rho.clone(), 1)).unwrap()
        };

        let gen = measured(theta);
        let rule = EulerMaruyamaRule {
            gen: &gen,
            rng: StdRng::seed_from_u64(0),
        };
        let y = DsmeState::new(rho0(), 1);
        let (y_bar, grad) = rule.vjp(&span, &dw, &y, &ybar, &params).unwrap();

        let eps = 1e-6;
        let fd = (pairing(&out_at(theta + eps, &rho0())) - pairing(&out_at(theta - eps, &rho0())))
            / (2.0 * eps);
        assert_relative_eq!(grad[0], fd, epsilon = 1e-7);

        // the step is nonlinear in ρ: compare directional derivatives
        let drho = sigmax() * c(0.1) + sigmaz() * c(0.05);
        let plus = rho0() + &drho * c(eps);
        let minus = rho0() - &drho * c(eps);
        let fd_rho = (pairing(&out_at(theta, &plus)) - pairing(&out_at(theta, &minus))) / (2.0 * eps);
        assert_relative_eq!(real_inner(&y_bar.rho, &drho), fd_rho, epsilon = 1e-7);
    }
}
