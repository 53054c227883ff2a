// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

use ndarray::{Array2, ArrayD};
use num_complex::Complex64;

use super::{check_state, select_state, Call, DETERMINISTIC_SOLVERS};
use crate::equations::SEInterface;
use crate::error::Result;
use crate::gradient::GradientSpec;
use crate::integrators::solve_deterministic;
use crate::options::Options;
use crate::result::{SEResult, SolveResult};
use crate::solver::Solver;
use crate::time_array::TimeArray;

/// Solve the Schrödinger equation `dψ/dt = -i H(t) ψ`.
///
/// `h` has shape `(...bh, n, n)` and `psi0` shape `(...bψ, n, 1)`. With
/// Cartesian batching the result has batch shape `(...bh, ...bψ)`; with
/// flat batching the two batch shapes are broadcast together.
pub fn sesolve(
    h: &TimeArray,
    psi0: &ArrayD<Complex64>,
    tsave: &[f64],
    exp_ops: &[Array2<Complex64>],
    solver: &Solver,
    gradient: Option<&GradientSpec>,
    options: &Options,
) -> Result<SEResult> {
    let call = Call {
        method: "sesolve",
        tsave,
        exp_ops,
        solver,
        gradient,
        options,
    };
    let n = h.dim();
    call.validate(DETERMINISTIC_SOLVERS, n)?;
    call.check_expm("H", &[h])?;
    let state_batch = check_state("psi0", psi0, n, true, false)?;

    let plan = call.plan(&[h.batch_shape(), state_batch])?;
    call.log_start(&plan);
    let outputs = plan.map(&options.runtime, |idx| {
        let gen = SEInterface::new(h.select(&idx.args[0]));
        let y0 = select_state(psi0, &idx.args[1])?;
        solve_deterministic(&call.problem(&gen), y0)
    })?;
    SolveResult::assemble("SEResult", plan.shape(), &outputs, call.metadata())
}
