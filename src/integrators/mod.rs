// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Single-trajectory integrators.
//!
//! Every step method is a step rule driven by the generic loop in
//! [`stepping`]; the matrix exponential composes propagators directly. The
//! runners here pick the rule for a solver, attach the save policy and the
//! gradient strategy, and return one trajectory's output.

pub mod adjoint;
pub mod controller;
pub mod implicit;
pub mod jump;
pub mod propagator;
pub mod save;
pub mod state;
pub mod stepping;
pub mod stochastic;
pub mod tableau;

pub use jump::Jump;
pub use save::{SavePolicy, Saved};
pub use stepping::Stats;
pub use stochastic::DsmeState;

use ndarray::Array2;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;

use adjoint::{autograd, checkpointed, continuous_adjoint, Differentiable};
use controller::Controller;
use implicit::ImplicitRule;
use jump::{JumpRule, NormalizedSave};
use save::Saver;
use stepping::{integrate, ReversibleRule, Run, SaveObserver, Schedule};
use stochastic::EulerMaruyamaRule;
use tableau::{ExplicitRule, Tableau};

use crate::equations::{DSMEInterface, Generator, MCInterface};
use crate::error::{Result, ValidationError};
use crate::gradient::{Gradient, GradientSpec, TrajectoryGrads};
use crate::options::ProgressMeter;
use crate::solver::Solver;

/// Output of one trajectory.
#[derive(Debug, Clone)]
pub(crate) struct TrajectoryOutput {
    pub saved: Saved,
    pub final_time: f64,
    pub stats: Stats,
    pub grads: Option<TrajectoryGrads>,
}

/// One trajectory of a linear equation.
pub(crate) struct Problem<'a> {
    pub gen: &'a dyn Generator,
    pub tsave: &'a [f64],
    pub t0: f64,
    pub solver: &'a Solver,
    pub policy: SavePolicy,
    pub gradient: Option<&'a GradientSpec>,
    pub progress: ProgressMeter,
}

impl Problem<'_> {
    fn final_time(&self) -> f64 {
        self.tsave.last().map_or(self.t0, |&t| t.max(self.t0))
    }

    fn schedule(&self, error_order: usize) -> Result<Schedule> {
        match (self.solver.fixed_dt(), self.solver.adaptive()) {
            (Some(dt), _) => Ok(Schedule::Fixed { dt }),
            (None, Some(cfg)) => Ok(Schedule::Adaptive(Controller::new(*cfg, error_order))),
            _ => Err(unsupported(self.solver, "the stepping loop")),
        }
    }
}

fn unsupported(solver: &Solver, method: &str) -> crate::error::Error {
    ValidationError::UnsupportedSolver {
        solver: solver.name().into(),
        method: method.into(),
    }
    .into()
}

/// Run a rule under the requested gradient strategy. The continuous
/// adjoint is handled by the caller.
fn drive<S, R>(
    rule: &mut R,
    solver: &Solver,
    saver: Saver,
    y0: S,
    run: &Run<'_>,
    gradient: Option<&GradientSpec>,
) -> Result<(Saved, S, Stats, Option<TrajectoryGrads>)>
where
    S: Differentiable,
    R: ReversibleRule<S>,
{
    match gradient {
        None => {
            let mut obs = SaveObserver { saver };
            let (y, stats) = integrate(rule, &mut obs, y0, run)?;
            Ok((obs.saver.finalize(run.tsave), y, stats, None))
        }
        Some(spec) => {
            let out = match spec.method {
                Gradient::Autograd => autograd(rule, saver, y0, run, spec)?,
                Gradient::CheckpointAutograd { ncheckpoints } => {
                    checkpointed(rule, saver, y0, run, spec, ncheckpoints)?
                }
                Gradient::Adjoint => {
                    return Err(ValidationError::UnsupportedGradient {
                        solver: solver.name().into(),
                        gradient: spec.method.to_string(),
                    }
                    .into())
                }
            };
            Ok((out.saved, out.y, out.stats, Some(out.grads)))
        }
    }
}

/// Integrate a Schrödinger, master or propagator equation.
pub(crate) fn solve_deterministic(
    problem: &Problem<'_>,
    y0: Array2<Complex64>,
) -> Result<TrajectoryOutput> {
    let saver = Saver::new(problem.policy.clone());
    let discontinuities = problem.gen.discontinuity_ts();

    if let Solver::Expm = problem.solver {
        return propagator::expm_integrate(
            problem.gen,
            y0,
            problem.t0,
            problem.tsave,
            saver,
            problem.gradient,
        );
    }

    let (saved, stats, grads) = if let Solver::Kvaerno3(_) = problem.solver {
        let run = Run {
            t0: problem.t0,
            tsave: problem.tsave,
            discontinuities: &discontinuities,
            schedule: problem.schedule(3)?,
            progress: problem.progress,
        };
        let mut rule = ImplicitRule { gen: problem.gen };
        let (saved, _, stats, grads) =
            drive(&mut rule, problem.solver, saver, y0, &run, problem.gradient)?;
        (saved, stats, grads)
    } else {
        let tab = Tableau::for_solver(problem.solver)
            .ok_or_else(|| unsupported(problem.solver, "deterministic equations"))?;
        let run = Run {
            t0: problem.t0,
            tsave: problem.tsave,
            discontinuities: &discontinuities,
            schedule: problem.schedule(tab.error_order)?,
            progress: problem.progress,
        };
        let mut rule = ExplicitRule {
            tab,
            gen: problem.gen,
        };
        match problem.gradient {
            Some(spec) if spec.method == Gradient::Adjoint => {
                let mut obs = SaveObserver { saver };
                let (y1, stats) = integrate(&mut rule, &mut obs, y0, &run)?;
                let (grads, _) = continuous_adjoint(tab, problem.gen, &run, &y1, spec)?;
                (obs.saver.finalize(problem.tsave), stats, Some(grads))
            }
            gradient => {
                let (saved, _, stats, grads) =
                    drive(&mut rule, problem.solver, saver, y0, &run, gradient)?;
                (saved, stats, grads)
            }
        }
    };

    Ok(TrajectoryOutput {
        saved,
        final_time: problem.final_time(),
        stats,
        grads,
    })
}

/// Integrate one noise realization of the diffusive stochastic master
/// equation.
pub(crate) fn solve_diffusive(
    gen: &DSMEInterface,
    problem: &Problem<'_>,
    rho0: Array2<Complex64>,
    seed: u64,
) -> Result<TrajectoryOutput> {
    let Solver::EulerMaruyama { dt } = *problem.solver else {
        return Err(unsupported(problem.solver, "dsmesolve"));
    };
    let discontinuities = gen.discontinuity_ts();
    let run = Run {
        t0: problem.t0,
        tsave: problem.tsave,
        discontinuities: &discontinuities,
        schedule: Schedule::Fixed { dt },
        progress: problem.progress,
    };
    let mut rule = EulerMaruyamaRule {
        gen,
        rng: StdRng::seed_from_u64(seed),
    };
    let y0 = DsmeState::new(rho0, gen.nmonitored());
    let saver = Saver::new(problem.policy.clone());
    let (saved, _, stats, grads) =
        drive(&mut rule, problem.solver, saver, y0, &run, problem.gradient)?;
    Ok(TrajectoryOutput {
        saved,
        final_time: problem.final_time(),
        stats,
        grads,
    })
}

/// Integrate one Monte-Carlo trajectory.
pub(crate) fn solve_jump(
    gen: &MCInterface,
    problem: &Problem<'_>,
    psi0: Array2<Complex64>,
    seed: u64,
) -> Result<(TrajectoryOutput, Vec<Jump>)> {
    let tab = match problem.solver {
        Solver::Bosh3(_) | Solver::Dopri5(_) => Tableau::for_solver(problem.solver),
        _ => None,
    }
    .ok_or_else(|| unsupported(problem.solver, "mcsolve"))?;
    let discontinuities = gen.discontinuity_ts();
    let run = Run {
        t0: problem.t0,
        tsave: problem.tsave,
        discontinuities: &discontinuities,
        schedule: problem.schedule(tab.error_order)?,
        progress: problem.progress,
    };
    let mut rule = JumpRule::new(tab, gen, StdRng::seed_from_u64(seed));
    let mut obs = NormalizedSave {
        saver: Saver::new(problem.policy.clone()),
    };
    let (_, stats) = integrate(&mut rule, &mut obs, psi0, &run)?;
    Ok((
        TrajectoryOutput {
            saved: obs.saver.finalize(problem.tsave),
            final_time: problem.final_time(),
            stats,
            grads: None,
        },
        rule.jumps,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equations::{MEInterface, SEInterface};
    use crate::gradient::ExpectationLoss;
    use crate::linalg::{c, max_abs_diff, todm};
    use crate::operators::{basis, sigmam, sigmax, sigmay, sigmaz};
    use crate::solver::AdaptiveConfig;
    use crate::time_array::TimeArray;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    fn problem<'a>(
        gen: &'a dyn Generator,
        tsave: &'a [f64],
        solver: &'a Solver,
        gradient: Option<&'a GradientSpec>,
    ) -> Problem<'a> {
        Problem {
            gen,
            tsave,
            t0: tsave[0],
            solver,
            policy: SavePolicy::new(true, vec![sigmaz()], None),
            gradient,
            progress: ProgressMeter::Off,
        }
    }

    fn tight() -> AdaptiveConfig {
        AdaptiveConfig::default().with_tolerances(1e-9, 1e-11)
    }

    // =========================================================================
    // Solver agreement
    // =========================================================================

    #[test]
    fn test_all_deterministic_solvers_agree() {
        let gen = MEInterface::new(
            TimeArray::from_matrix(sigmax() * c(0.9)),
            vec![TimeArray::from_matrix(sigmam() * c(0.4))],
        );
        let tsave = [0.0, 0.5, 1.0];
        let rho0 = todm(&basis(2, 0));
        let reference = solve_deterministic(&problem(&gen, &tsave, &Solver::Expm, None), rho0.clone())
            .unwrap();
        let solvers = [
            (Solver::Rk4 { dt: 0.01 }, 1e-8),
            (Solver::Bosh3(tight()), 1e-6),
            (Solver::Dopri5(tight()), 1e-8),
            (Solver::Kvaerno3(tight()), 1e-6),
            (Solver::Euler { dt: 1e-4 }, 1e-3),
        ];
        for (solver, tol) in solvers {
            let out = solve_deterministic(&problem(&gen, &tsave, &solver, None), rho0.clone()).unwrap();
            for (a, b) in out.saved.ysave.iter().zip(&reference.saved.ysave) {
                assert!(max_abs_diff(a, b) < tol, "{}", solver);
            }
            assert_eq!(out.final_time, 1.0);
        }
    }

    #[test]
    fn test_gradient_strategies_agree() {
        let gen = SEInterface::new(TimeArray::from_matrix(sigmax() + sigmaz() * c(0.4)));
        let tsave = [0.0, 1.5];
        let psi0 = basis(2, 0);
        let grads = |solver: Solver, method: Gradient| {
            let spec = GradientSpec::new(
                method,
                vec![TimeArray::from_matrix(sigmay())],
                ExpectationLoss::new(sigmaz()),
            );
            solve_deterministic(&problem(&gen, &tsave, &solver, Some(&spec)), psi0.clone())
                .unwrap()
                .grads
                .unwrap()
        };
        let exact = grads(Solver::Expm, Gradient::Autograd);
        for (solver, method) in [
            (Solver::Dopri5(tight()), Gradient::Autograd),
            (Solver::Dopri5(tight()), Gradient::CheckpointAutograd { ncheckpoints: 4 }),
            (Solver::Dopri5(tight()), Gradient::Adjoint),
            (Solver::Rk4 { dt: 0.01 }, Gradient::Adjoint),
            (Solver::Kvaerno3(tight()), Gradient::Autograd),
        ] {
            let g = grads(solver, method);
            assert_relative_eq!(g.loss, exact.loss, epsilon = 1e-6);
            assert_relative_eq!(g.params[0], exact.params[0], epsilon = 1e-5);
            assert!(max_abs_diff(&g.y0, &exact.y0) < 1e-5, "{} {}", solver, method);
        }
    }

    #[test]
    fn test_fixed_step_keeps_order_across_grid_breakpoint() {
        let pulse = TimeArray::pwc(vec![0.0, 0.7, 2.0], arr1(&[c(1.0), c(2.0)]).into_dyn(), sigmax()).unwrap();
        let h = TimeArray::from_matrix(sigmaz() * c(0.5)).plus(pulse).unwrap();
        let gen = SEInterface::new(h);
        let tsave = [0.0, 2.0];
        let psi0 = basis(2, 0);
        let exact = solve_deterministic(&problem(&gen, &tsave, &Solver::Expm, None), psi0.clone()).unwrap();
        let rk4 = Solver::Rk4 { dt: 0.01 };
        let out = solve_deterministic(&problem(&gen, &tsave, &rk4, None), psi0.clone()).unwrap();
        assert!(max_abs_diff(&out.saved.ysave[1], &exact.saved.ysave[1]) < 1e-8);

        let grads = |solver: Solver, method: Gradient| {
            let spec = GradientSpec::new(
                method,
                vec![TimeArray::from_matrix(sigmay())],
                ExpectationLoss::new(sigmaz()),
            );
            solve_deterministic(&problem(&gen, &tsave, &solver, Some(&spec)), psi0.clone())
                .unwrap()
                .grads
                .unwrap()
        };
        let reference = grads(Solver::Expm, Gradient::Autograd);
        for method in [Gradient::Autograd, Gradient::Adjoint] {
            let g = grads(rk4, method);
            assert_relative_eq!(g.params[0], reference.params[0], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_implicit_rejects_adjoint() {
        let gen = SEInterface::new(TimeArray::from_matrix(sigmax()));
        let tsave = [0.0, 1.0];
        let solver = Solver::kvaerno3();
        let spec = GradientSpec::new(Gradient::Adjoint, vec![], ExpectationLoss::new(sigmaz()));
        let err = solve_deterministic(&problem(&gen, &tsave, &solver, Some(&spec)), basis(2, 0))
            .unwrap_err();
        assert!(err.to_string().contains("does not support gradient"));
    }

    // =========================================================================
    // Stochastic runners
    // =========================================================================

    #[test]
    fn test_diffusive_records_have_interval_count() {
        let gen = DSMEInterface::new(
            TimeArray::from_matrix(sigmax()),
            vec![TimeArray::from_matrix(sigmam())],
            &[1.0],
        );
        let tsave = [0.0, 0.1, 0.2, 0.3];
        let solver = Solver::EulerMaruyama { dt: 1e-3 };
        let out = solve_diffusive(&gen, &problem(&gen, &tsave, &solver, None), todm(&basis(2, 0)), 3)
            .unwrap();
        assert_eq!(out.saved.ysave.len(), 4);
        assert_eq!(out.saved.measurements.as_ref().unwrap().dim(), (1, 3));
        assert_eq!(out.stats.nsteps, 300);
        let again = solve_diffusive(&gen, &problem(&gen, &tsave, &solver, None), todm(&basis(2, 0)), 3)
            .unwrap();
        assert_eq!(out.saved.measurements, again.saved.measurements);
    }

    #[test]
    fn test_jump_runner_requires_embedded_pair() {
        let gen = MCInterface::new(
            TimeArray::from_matrix(sigmax()),
            vec![TimeArray::from_matrix(sigmam())],
        );
        let tsave = [0.0, 1.0];
        let solver = Solver::Rk4 { dt: 0.1 };
        assert!(solve_jump(&gen, &problem(&gen, &tsave, &solver, None), basis(2, 1), 0).is_err());
        let solver = Solver::dopri5();
        let (out, _) = solve_jump(&gen, &problem(&gen, &tsave, &solver, None), basis(2, 1), 0).unwrap();
        for psi in &out.saved.ysave {
            assert_relative_eq!(crate::linalg::norm_sqr(psi), 1.0, epsilon = 1e-12);
        }
    }
}
