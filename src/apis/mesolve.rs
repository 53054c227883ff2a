// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

use ndarray::{Array2, ArrayD};
use num_complex::Complex64;
use tracing::warn;

use super::{check_jump_ops, check_state, select_state, Call, DETERMINISTIC_SOLVERS};
use crate::equations::MEInterface;
use crate::error::Result;
use crate::gradient::GradientSpec;
use crate::integrators::solve_deterministic;
use crate::linalg::{is_ket, todm};
use crate::options::Options;
use crate::result::{MEResult, SolveResult};
use crate::solver::Solver;
use crate::time_array::TimeArray;

/// Solve the Lindblad master equation
/// `dρ/dt = -i[H, ρ] + Σ_k D[L_k](ρ)`.
///
/// `rho0` has shape `(...bρ, n, n)`; kets `(...bρ, n, 1)` are converted to
/// density matrices first, and the initial-state cotangent of any gradient
/// then refers to that density matrix. Jump operators are unbatched.
#[allow(clippy::too_many_arguments)]
pub fn mesolve(
    h: &TimeArray,
    jump_ops: &[TimeArray],
    rho0: &ArrayD<Complex64>,
    tsave: &[f64],
    exp_ops: &[Array2<Complex64>],
    solver: &Solver,
    gradient: Option<&GradientSpec>,
    options: &Options,
) -> Result<MEResult> {
    let call = Call {
        method: "mesolve",
        tsave,
        exp_ops,
        solver,
        gradient,
        options,
    };
    let n = h.dim();
    call.validate(DETERMINISTIC_SOLVERS, n)?;
    check_jump_ops(jump_ops, n)?;
    let mut ops: Vec<&TimeArray> = vec![h];
    ops.extend(jump_ops);
    call.check_expm("H/jump_ops", &ops)?;
    let state_batch = check_state("rho0", rho0, n, true, true)?;
    if jump_ops.is_empty() {
        warn!("mesolve called without jump operators; consider sesolve for closed evolution");
    }

    let plan = call.plan(&[h.batch_shape(), state_batch])?;
    call.log_start(&plan);
    let outputs = plan.map(&options.runtime, |idx| {
        let gen = MEInterface::new(h.select(&idx.args[0]), jump_ops.to_vec());
        let y0 = select_state(rho0, &idx.args[1])?;
        let y0 = if is_ket(&y0) { todm(&y0) } else { y0 };
        solve_deterministic(&call.problem(&gen), y0)
    })?;
    SolveResult::assemble("MEResult", plan.shape(), &outputs, call.metadata())
}
