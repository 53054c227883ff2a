// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Monte-Carlo wave-function trajectories.
//!
//! The unnormalized state is integrated under `H_eff` with an embedded
//! Runge-Kutta pair. A uniform threshold `r` is drawn; once an accepted step
//! brings `‖ψ‖²` below `r`, the crossing time is located by bisection on
//! the step, a channel is drawn with probability `∝ ‖L_k ψ‖²`, the jump is
//! applied and a new threshold is drawn. The rest of the step is then
//! integrated from the jump time.

use ndarray::Array2;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::trace;

use super::save::Saver;
use super::stepping::{Attempt, Observer, StepRule};
use super::tableau::{rk_step, StepSpan, Tableau};
use crate::equations::{Generator, MCInterface};
use crate::error::Result;
use crate::linalg::{c, norm_sqr};

const BISECTION_STEPS: usize = 60;

/// A recorded jump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jump {
    pub t: f64,
    /// Index of the jump operator
    pub channel: usize,
}

/// Quantum-jump rule over an explicit embedded tableau.
pub(crate) struct JumpRule<'a> {
    pub tab: &'static Tableau,
    pub gen: &'a MCInterface,
    rng: StdRng,
    threshold: f64,
    pub jumps: Vec<Jump>,
}

impl<'a> JumpRule<'a> {
    pub fn new(tab: &'static Tableau, gen: &'a MCInterface, mut rng: StdRng) -> Self {
        let threshold = rng.gen::<f64>();
        Self {
            tab,
            gen,
            rng,
            threshold,
            jumps: Vec::new(),
        }
    }

    fn propagate(&self, span: &StepSpan, psi: &Array2<Complex64>) -> Array2<Complex64> {
        let f = |t: f64, y: &Array2<Complex64>| self.gen.vector_field(t, y);
        rk_step(self.tab, &f, span, psi).0
    }

    /// Time in `(t, t_end]` where `‖ψ‖²` crosses the threshold, and the
    /// state there.
    fn locate(&self, t: f64, t_end: f64, psi: &Array2<Complex64>) -> (f64, Array2<Complex64>) {
        let (mut lo, mut hi) = (t, t_end);
        let mut at_hi = self.propagate(&StepSpan::new(t, hi), psi);
        for _ in 0..BISECTION_STEPS {
            if hi - lo <= 1e-12 * hi.abs().max(1.0) {
                break;
            }
            let mid = 0.5 * (lo + hi);
            let at_mid = self.propagate(&StepSpan::new(t, mid), psi);
            if norm_sqr(&at_mid) < self.threshold {
                hi = mid;
                at_hi = at_mid;
            } else {
                lo = mid;
            }
        }
        (hi, at_hi)
    }

    /// Apply a jump at `t` and draw the next threshold.
    fn jump(&mut self, t: f64, psi: &Array2<Complex64>) -> Array2<Complex64> {
        let weights = self.gen.jump_weights(t, psi);
        let total: f64 = weights.iter().sum();
        self.threshold = self.rng.gen::<f64>();
        if total <= 0.0 {
            // no channel can fire; restart from the normalized state
            return psi / c(norm_sqr(psi).sqrt());
        }
        let u = self.rng.gen::<f64>() * total;
        let mut acc = 0.0;
        let channel = weights
            .iter()
            .position(|&w| {
                acc += w;
                u < acc
            })
            .unwrap_or(weights.len() - 1);
        trace!(t, channel, "quantum jump");
        self.jumps.push(Jump { t, channel });
        self.gen.apply_jump(t, channel, psi)
    }
}

impl StepRule<Array2<Complex64>> for JumpRule<'_> {
    type Record = ();

    fn step(&mut self, span: &StepSpan, y: &Array2<Complex64>) -> Result<Attempt<Array2<Complex64>, ()>> {
        let f = |t: f64, y: &Array2<Complex64>| self.gen.vector_field(t, y);
        let (y, error) = rk_step(self.tab, &f, span, y);
        Ok(Attempt {
            y,
            error,
            record: (),
        })
    }

    fn derivative(&self, t: f64, y: &Array2<Complex64>) -> Array2<Complex64> {
        self.gen.vector_field(t, y)
    }

    fn accept(
        &mut self,
        span: &StepSpan,
        y: &Array2<Complex64>,
        y_new: Array2<Complex64>,
    ) -> Result<Array2<Complex64>> {
        let (mut t, mut psi, mut end_state) = (span.t, y.clone(), y_new);
        while norm_sqr(&end_state) < self.threshold {
            let (t_jump, at_jump) = self.locate(t, span.t_end, &psi);
            psi = self.jump(t_jump, &at_jump);
            t = t_jump;
            if t >= span.t_end {
                return Ok(psi);
            }
            end_state = self.propagate(&StepSpan::new(t, span.t_end), &psi);
        }
        Ok(end_state)
    }
}

/// Saves the normalized state.
pub(crate) struct NormalizedSave {
    pub saver: Saver,
}

impl<R> Observer<Array2<Complex64>, R> for NormalizedSave {
    fn on_save(&mut self, _t: f64, y: &Array2<Complex64>) {
        let norm = norm_sqr(y).sqrt();
        if norm > 0.0 {
            self.saver.save_state(&(y / c(norm)));
        } else {
            self.saver.save_state(y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrators::controller::Controller;
    use crate::integrators::save::SavePolicy;
    use crate::integrators::stepping::{integrate, Run, Schedule};
    use crate::integrators::tableau::DOPRI5;
    use crate::operators::{basis, sigmam, sigmax, sigmaz};
    use crate::options::ProgressMeter;
    use crate::solver::AdaptiveConfig;
    use crate::time_array::TimeArray;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn schedule() -> Schedule {
        Schedule::Adaptive(Controller::new(
            AdaptiveConfig::default().with_tolerances(1e-8, 1e-10),
            DOPRI5.error_order,
        ))
    }

    fn trajectory(gen: &MCInterface, seed: u64, tsave: &[f64]) -> (Vec<Jump>, Vec<f64>) {
        let mut rule = JumpRule::new(&DOPRI5, gen, StdRng::seed_from_u64(seed));
        let mut obs = NormalizedSave {
            saver: Saver::new(SavePolicy::new(true, vec![sigmaz()], None)),
        };
        let run = Run {
            t0: tsave[0],
            tsave,
            discontinuities: &[],
            schedule: schedule(),
            progress: ProgressMeter::Off,
        };
        integrate(&mut rule, &mut obs, basis(2, 1), &run).unwrap();
        let saved = obs.saver.finalize(tsave);
        let sz = saved.esave.row(0).iter().map(|z| z.re).collect();
        (rule.jumps, sz)
    }

    fn decay(gamma: f64) -> MCInterface {
        MCInterface::new(
            TimeArray::from_matrix(sigmaz() * c(0.0)),
            vec![TimeArray::from_matrix(sigmam() * c(gamma.sqrt()))],
        )
    }

    #[test]
    fn test_jump_time_follows_threshold() {
        // ‖ψ(t)‖² = e^{-γt}, so the jump happens at t = -ln(r)/γ
        let gamma = 1.5;
        let gen = decay(gamma);
        let mut rng = StdRng::seed_from_u64(11);
        let r: f64 = rng.gen();
        let (jumps, sz) = trajectory(&gen, 11, &[0.0, 20.0]);
        assert_eq!(jumps.len(), 1);
        assert_eq!(jumps[0].channel, 0);
        assert_relative_eq!(jumps[0].t, -r.ln() / gamma, epsilon = 1e-6);
        assert_relative_eq!(sz[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let gen = MCInterface::new(
            TimeArray::from_matrix(sigmax()),
            vec![TimeArray::from_matrix(sigmam() * c(0.8))],
        );
        let tsave = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(trajectory(&gen, 5, &tsave), trajectory(&gen, 5, &tsave));
    }

    #[test]
    fn test_average_population_decays() {
        let gamma = 1.0;
        let gen = decay(gamma);
        let tsave = [0.0, 0.5, 1.0];
        let n = 400;
        let mut mean = vec![0.0; tsave.len()];
        for seed in 0..n {
            let (_, sz) = trajectory(&gen, seed, &tsave);
            for (m, v) in mean.iter_mut().zip(sz) {
                *m += v / n as f64;
            }
        }
        for (m, t) in mean.iter().zip(tsave) {
            // <σz> = 1 - 2 e^{-γt}, binomial error ~ 0.05
            assert!((m - (1.0 - 2.0 * (-gamma * t).exp())).abs() < 0.15, "t={} mean={}", t, m);
        }
    }
}
