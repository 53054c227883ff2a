// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{Call, DETERMINISTIC_SOLVERS};
use crate::equations::SEInterface;
use crate::error::Result;
use crate::gradient::GradientSpec;
use crate::integrators::solve_deterministic;
use crate::linalg::eye;
use crate::options::Options;
use crate::result::{PropagatorResult, SolveResult};
use crate::solver::Solver;
use crate::time_array::TimeArray;

/// Propagator `U(t0, t)` of the Schrödinger equation at every save time.
///
/// The identity is evolved as the initial state, so the saved states are
/// the propagators, of shape `(...bh, ntsave, n, n)`.
pub fn sepropagator(
    h: &TimeArray,
    tsave: &[f64],
    solver: &Solver,
    gradient: Option<&GradientSpec>,
    options: &Options,
) -> Result<PropagatorResult> {
    let call = Call {
        method: "sepropagator",
        tsave,
        exp_ops: &[],
        solver,
        gradient,
        options,
    };
    let n = h.dim();
    call.validate(DETERMINISTIC_SOLVERS, n)?;
    call.check_expm("H", &[h])?;

    let plan = call.plan(&[h.batch_shape()])?;
    call.log_start(&plan);
    let outputs = plan.map(&options.runtime, |idx| {
        let gen = SEInterface::new(h.select(&idx.args[0]));
        solve_deterministic(&call.problem(&gen), eye(n))
    })?;
    SolveResult::assemble("PropagatorResult", plan.shape(), &outputs, call.metadata())
}
