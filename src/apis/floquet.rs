// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::f64::consts::PI;

use ndarray::{Array2, Array3, ArrayD, Axis};
use num_complex::Complex64;
use tracing::debug;

use super::{Call, DETERMINISTIC_SOLVERS};
use crate::equations::{Generator, SEInterface};
use crate::error::{Result, SolverError, ValidationError};
use crate::integrators::{solve_deterministic, Problem, SavePolicy, Stats};
use crate::linalg::{eig_normal, eye};
use crate::options::Options;
use crate::result::{stack, FloquetResult, Infos};
use crate::solver::Solver;
use crate::time_array::{merge_times, TimeArray};

const TIME_TOL: f64 = 1e-12;
const PERIODICITY_TOL: f64 = 1e-8;

/// Floquet modes and quasienergies of a periodic Hamiltonian.
///
/// The one-period propagator `U(t0, t0 + T)` is diagonalized; each
/// eigenpair `(e^{-iεT}, Φ(t0))` gives a quasienergy folded into
/// `(-π/T, π/T]` and a mode propagated to the save times as
/// `Φ(t) = e^{iε(t - t0)} U(t0, t) Φ(t0)`. Modes are ordered by ascending
/// quasienergy.
pub fn floquet(
    h: &TimeArray,
    period: f64,
    tsave: &[f64],
    solver: &Solver,
    options: &Options,
) -> Result<FloquetResult> {
    if !(period.is_finite() && period > 0.0) {
        return Err(ValidationError::field("period", format!("must be positive, got {}", period)).into());
    }
    let call = Call {
        method: "floquet",
        tsave,
        exp_ops: &[],
        solver,
        gradient: None,
        options,
    };
    let n = h.dim();
    call.validate(DETERMINISTIC_SOLVERS, n)?;
    call.check_expm("H", &[h])?;
    let t0 = call.t0();
    check_periodicity(h, t0, period, tsave)?;

    let plan = call.plan(&[h.batch_shape()])?;
    call.log_start(&plan);
    let elements = plan.map(&options.runtime, |idx| {
        let gen = SEInterface::new(h.select(&idx.args[0]));
        floquet_element(&gen, &call, t0, period)
    })?;

    let batch = plan.shape();
    let stats: Vec<Stats> = elements.iter().map(|e| e.stats).collect();
    let modes: Vec<ArrayD<Complex64>> = elements.iter().map(|e| e.modes.clone()).collect();
    let quasienergies: Vec<ArrayD<f64>> = elements.iter().map(|e| e.quasienergies.clone()).collect();
    Ok(FloquetResult {
        meta: call.metadata(),
        period,
        modes: stack(&batch, &modes)?,
        quasienergies: stack(&batch, &quasienergies)?,
        infos: Infos::from_stats(&batch, &stats, solver.adaptive().is_some())?,
    })
}

struct FloquetElement {
    modes: ArrayD<Complex64>,
    quasienergies: ArrayD<f64>,
    stats: Stats,
}

fn check_periodicity(h: &TimeArray, t0: f64, period: f64, tsave: &[f64]) -> Result<()> {
    let window = tsave.last().map_or(0.0, |&t| t - t0);
    if window > period * (1.0 + TIME_TOL) {
        return Err(ValidationError::Periodicity(format!(
            "save window {} is wider than the period {}",
            window, period
        ))
        .into());
    }
    let (start, end) = (h.eval(t0)?, h.eval(t0 + period)?);
    let scale = start.iter().map(|z| z.norm()).fold(1.0, f64::max);
    let diff = (&start - &end).iter().map(|z| z.norm()).fold(0.0, f64::max);
    if diff > PERIODICITY_TOL * scale {
        return Err(ValidationError::Periodicity(format!(
            "H(t0) and H(t0 + T) differ by {:.3e} for T = {}",
            diff, period
        ))
        .into());
    }
    Ok(())
}

fn position(times: &[f64], t: f64) -> Result<usize> {
    times
        .iter()
        .position(|&s| (s - t).abs() <= TIME_TOL * t.abs().max(1.0))
        .ok_or_else(|| SolverError::Decomposition(format!("propagator at t = {} was not saved", t)).into())
}

/// Fold `-arg(λ)/T` into `(-π/T, π/T]`.
fn quasienergy(lambda: Complex64, period: f64) -> f64 {
    let eps = -lambda.arg() / period;
    if eps <= -PI / period {
        eps + 2.0 * PI / period
    } else {
        eps
    }
}

fn floquet_element(gen: &SEInterface, call: &Call<'_>, t0: f64, period: f64) -> Result<FloquetElement> {
    let n = gen.dim();
    let times = merge_times(call.tsave.iter().copied().chain([t0 + period]));
    let problem = Problem {
        gen,
        tsave: &times,
        t0,
        solver: call.solver,
        policy: SavePolicy::new(true, Vec::new(), None),
        gradient: None,
        progress: call.options.progress_meter,
    };
    let out = solve_deterministic(&problem, eye(n))?;
    let propagators = &out.saved.ysave;
    let u_period = &propagators[position(&times, t0 + period)?];

    let (evals, evecs) = eig_normal(u_period)?;
    let mut order: Vec<(f64, usize)> = evals
        .iter()
        .enumerate()
        .map(|(m, &lambda)| (quasienergy(lambda, period), m))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));
    debug!(quasienergies = ?order.iter().map(|(e, _)| *e).collect::<Vec<_>>(), "floquet spectrum");

    let mut modes = Array3::<Complex64>::zeros((call.tsave.len(), n, n));
    for (k, &t) in call.tsave.iter().enumerate() {
        let u: &Array2<Complex64> = &propagators[position(&times, t)?];
        for (slot, &(eps, m)) in order.iter().enumerate() {
            let phase = Complex64::from_polar(1.0, eps * (t - t0));
            let mode = u.dot(&evecs.index_axis(Axis(1), m)) * phase;
            modes.index_axis_mut(Axis(0), k).row_mut(slot).assign(&mode);
        }
    }
    let quasienergies = order.iter().map(|(e, _)| *e).collect::<Vec<_>>();
    Ok(FloquetElement {
        modes: modes.into_dyn(),
        quasienergies: ndarray::Array1::from(quasienergies).into_dyn(),
        stats: out.stats,
    })
}
