// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Matrix-exponential method for piecewise-constant generators.
//!
//! The time range is partitioned into maximal constant intervals (the
//! generator discontinuities, `t0` and the save times). Each interval
//! contributes `P_k = exp(G_k Δt_k)` and the state is advanced by
//! `P_n ⋯ P_2 P_1`, so later propagators act on the left.
//!
//! Gradients use the Fréchet derivative of the exponential, as in the
//! GRAPE propagator chain.

use ndarray::Array2;
use num_complex::Complex64;
use tracing::debug;

use super::save::Saver;
use super::stepping::Stats;
use super::TrajectoryOutput;
use crate::equations::{apply_matrix, Generator, Layout};
use crate::error::Result;
use crate::gradient::{GradientSpec, TrajectoryGrads};
use crate::linalg::{c, dag, expm_frechet, matrix_exp, real_inner, vectorize};
use crate::time_array::merge_times;

/// One constant interval of the partition.
struct Interval {
    t: f64,
    t_end: f64,
}

impl Interval {
    fn dt(&self) -> f64 {
        self.t_end - self.t
    }

    /// Evaluation point; the generator is constant on the open interval.
    fn midpoint(&self) -> f64 {
        0.5 * (self.t + self.t_end)
    }
}

fn partition(t0: f64, tsave: &[f64], discontinuities: &[f64]) -> Vec<Interval> {
    let Some(&tend) = tsave.last() else {
        return Vec::new();
    };
    let points = merge_times(
        std::iter::once(t0)
            .chain(discontinuities.iter().copied().filter(|&x| x > t0 && x < tend))
            .chain(tsave.iter().copied().filter(|&x| x > t0)),
    );
    points
        .windows(2)
        .map(|w| Interval { t: w[0], t_end: w[1] })
        .collect()
}

/// Propagate `y0` from `t0` through `tsave`.
pub(crate) fn expm_integrate(
    gen: &dyn Generator,
    y0: Array2<Complex64>,
    t0: f64,
    tsave: &[f64],
    mut saver: Saver,
    gradient: Option<&GradientSpec>,
) -> Result<TrajectoryOutput> {
    let layout = gen.layout();
    let intervals = partition(t0, tsave, &gen.discontinuity_ts());
    let reached = |t: f64, s: f64| s - t <= 1e-12 * t.abs().max(1.0);

    let mut next_save = 0;
    while next_save < tsave.len() && reached(t0, tsave[next_save]) {
        saver.save_state(&y0);
        next_save += 1;
    }

    // (A, P, y_before) per interval, kept only when differentiating
    let mut tape: Vec<(Array2<Complex64>, Array2<Complex64>, Array2<Complex64>)> = Vec::new();
    let mut y = y0;
    for interval in &intervals {
        let a = gen.generator_matrix(interval.midpoint()) * c(interval.dt());
        let p = matrix_exp(&a)?;
        let y_next = apply_matrix(layout, &p, &y);
        if gradient.is_some() {
            tape.push((a, p, y));
        }
        y = y_next;
        while next_save < tsave.len() && reached(interval.t_end, tsave[next_save]) {
            saver.save_state(&y);
            next_save += 1;
        }
    }

    let nsteps = intervals.len();
    debug!(nsteps, "propagator composition finished");

    let mut grads = None;
    if let Some(spec) = gradient {
        let (loss, g) = spec.loss.evaluate(&y);
        let mut lambda = g;
        let mut grad = vec![0.0; spec.params.len()];
        for (interval, (a, p, y_before)) in intervals.iter().zip(&tape).rev() {
            let w = match layout {
                Layout::Left => lambda.dot(&dag(y_before)),
                Layout::Vectorized => vectorize(&lambda).dot(&dag(&vectorize(y_before))),
            };
            let (_, frechet) = expm_frechet(&dag(a), &w)?;
            let tau = interval.midpoint();
            for (gk, param) in grad.iter_mut().zip(&spec.params) {
                let da = gen.param_matrix(&param.at(tau)) * c(interval.dt());
                *gk += real_inner(&frechet, &da);
            }
            lambda = apply_matrix(layout, &dag(p), &lambda);
        }
        grads = Some(TrajectoryGrads {
            loss,
            params: grad,
            y0: lambda,
        });
    }

    Ok(TrajectoryOutput {
        saved: saver.finalize(tsave),
        final_time: intervals.last().map_or(t0, |i| i.t_end),
        stats: Stats {
            nsteps,
            naccepted: nsteps,
            nrejected: 0,
        },
        grads,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equations::{MEInterface, SEInterface};
    use crate::gradient::{ExpectationLoss, Gradient};
    use crate::integrators::save::SavePolicy;
    use crate::linalg::{eye, max_abs_diff, todm, I};
    use crate::operators::{basis, sigmam, sigmax, sigmay, sigmaz};
    use crate::time_array::TimeArray;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    fn saver() -> Saver {
        Saver::new(SavePolicy::new(true, vec![sigmaz()], None))
    }

    fn unitary(h: &Array2<Complex64>, dt: f64) -> Array2<Complex64> {
        matrix_exp(&(h * (-I * c(dt)))).unwrap()
    }

    #[test]
    fn test_constant_generator_gives_exact_propagator() {
        let h = sigmax() * c(0.7) + sigmaz() * c(0.2);
        let gen = SEInterface::new(TimeArray::from_matrix(h.clone()));
        let out = expm_integrate(&gen, eye(2), 0.5, &[0.5, 2.0], saver(), None).unwrap();
        assert_eq!(out.stats.nsteps, 1);
        assert!(max_abs_diff(&out.saved.ysave[0], &eye(2)) < 1e-15);
        assert!(max_abs_diff(&out.saved.ysave[1], &unitary(&h, 1.5)) < 1e-12);
        assert_eq!(out.final_time, 2.0);
    }

    #[test]
    fn test_two_intervals_compose_later_on_the_left() {
        let pulse = TimeArray::pwc(
            vec![0.0, 1.0, 3.0],
            arr1(&[c(1.0), c(-0.5)]).into_dyn(),
            sigmax(),
        )
        .unwrap();
        let h = TimeArray::from_matrix(sigmaz()).plus(pulse).unwrap();
        let gen = SEInterface::new(h);
        let out = expm_integrate(&gen, eye(2), 0.0, &[0.0, 3.0], saver(), None).unwrap();

        let p1 = unitary(&(sigmaz() + sigmax()), 1.0);
        let p2 = unitary(&(sigmaz() - sigmax() * c(0.5)), 2.0);
        assert!(max_abs_diff(&out.saved.ysave[1], &p2.dot(&p1)) < 1e-12);
        assert!(max_abs_diff(&out.saved.ysave[1], &p1.dot(&p2)) > 1e-3);
        assert_eq!(out.stats.nsteps, 2);
    }

    #[test]
    fn test_save_times_before_t0_see_initial_state() {
        let gen = SEInterface::new(TimeArray::from_matrix(sigmax()));
        let psi = basis(2, 0);
        let out = expm_integrate(&gen, psi.clone(), 1.0, &[0.0, 0.5, 1.0, 2.0], saver(), None).unwrap();
        assert_eq!(out.saved.ysave.len(), 4);
        for k in 0..3 {
            assert_eq!(out.saved.ysave[k], psi);
        }
        assert_eq!(out.stats.nsteps, 1);
    }

    #[test]
    fn test_master_equation_decay() {
        let gamma: f64 = 0.8;
        let gen = MEInterface::new(
            TimeArray::from_matrix(sigmaz() * c(0.5)),
            vec![TimeArray::from_matrix(sigmam() * c(gamma.sqrt()))],
        );
        let rho0 = todm(&basis(2, 1));
        let out = expm_integrate(&gen, rho0, 0.0, &[0.0, 1.0, 2.0], saver(), None).unwrap();
        for (k, t) in [0.0, 1.0, 2.0].into_iter().enumerate() {
            // <σz> = 1 - 2 e^{-γt}
            assert_relative_eq!(out.saved.esave[[0, k]].re, 1.0 - 2.0 * (-gamma * t).exp(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let params = vec![TimeArray::from_matrix(sigmay())];
        let make = |theta: f64| {
            let pulse = TimeArray::pwc(
                vec![0.0, 0.4, 1.0],
                arr1(&[c(1.0), c(theta)]).into_dyn(),
                sigmay(),
            )
            .unwrap();
            SEInterface::new(TimeArray::from_matrix(sigmax()).plus(pulse).unwrap())
        };
        let spec = GradientSpec::new(Gradient::Autograd, params, ExpectationLoss::new(sigmaz()));
        let theta = 0.3;
        let out = expm_integrate(&make(theta), basis(2, 0), 0.0, &[0.0, 1.0], saver(), Some(&spec)).unwrap();
        let grads = out.grads.unwrap();

        let loss = |theta: f64| {
            expm_integrate(&make(theta), basis(2, 0), 0.0, &[0.0, 1.0], saver(), Some(&spec))
                .unwrap()
                .grads
                .unwrap()
                .loss
        };
        // the parameter operator is σy at every time, so dL/dθ is the
        // derivative along a constant σy perturbation
        let eps = 1e-6;
        let shift = |d: f64| {
            let pulse = TimeArray::pwc(
                vec![0.0, 0.4, 1.0],
                arr1(&[c(1.0 + d), c(theta + d)]).into_dyn(),
                sigmay(),
            )
            .unwrap();
            let gen = SEInterface::new(TimeArray::from_matrix(sigmax()).plus(pulse).unwrap());
            expm_integrate(&gen, basis(2, 0), 0.0, &[0.0, 1.0], saver(), Some(&spec))
                .unwrap()
                .grads
                .unwrap()
                .loss
        };
        let fd = (shift(eps) - shift(-eps)) / (2.0 * eps);
        assert_relative_eq!(grads.params[0], fd, epsilon = 1e-7);
        assert_relative_eq!(grads.loss, loss(theta), epsilon = 1e-14);
    }

    #[test]
    fn test_non_finite_generator_is_reported() {
        let mut h = sigmax();
        h[[0, 1]] = c(f64::NAN);
        let gen = SEInterface::new(TimeArray::from_matrix(h));
        let err = expm_integrate(&gen, eye(2), 0.0, &[0.0, 1.0], saver(), None).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Solver(crate::error::SolverError::Decomposition(_))
        ));
    }
}
