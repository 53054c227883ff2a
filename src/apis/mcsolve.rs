// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

use ndarray::{Array2, ArrayD};
use num_complex::Complex64;

use super::{check_jump_ops, check_keys, check_state, select_state, Call};
use crate::equations::MCInterface;
use crate::error::{Result, ValidationError};
use crate::integrators::solve_jump;
use crate::options::Options;
use crate::result::MCResult;
use crate::solver::Solver;
use crate::time_array::TimeArray;

/// Monte-Carlo wave-function unraveling of the master equation.
///
/// Each PRNG key drives one quantum-jump trajectory of the unnormalized
/// state under `H_eff = H - i/2 Σ L†L`. Saved states are normalized and
/// expectation values are averaged over trajectories. The key axis is the
/// last batch axis of the trajectory data. Gradients are not supported.
#[allow(clippy::too_many_arguments)]
pub fn mcsolve(
    h: &TimeArray,
    jump_ops: &[TimeArray],
    psi0: &ArrayD<Complex64>,
    keys: &[u64],
    tsave: &[f64],
    exp_ops: &[Array2<Complex64>],
    solver: &Solver,
    options: &Options,
) -> Result<MCResult> {
    let call = Call {
        method: "mcsolve",
        tsave,
        exp_ops,
        solver,
        gradient: None,
        options,
    };
    let n = h.dim();
    call.validate(&["Bosh3", "Dopri5"], n)?;
    if jump_ops.is_empty() {
        return Err(ValidationError::field(
            "jump_ops",
            "at least one jump operator is required; use sesolve otherwise",
        )
        .into());
    }
    check_jump_ops(jump_ops, n)?;
    check_keys(keys)?;
    let state_batch = check_state("psi0", psi0, n, true, false)?;

    let plan = call
        .plan(&[h.batch_shape(), state_batch])?
        .with_keys(keys.len());
    call.log_start(&plan);
    let outputs = plan.map(&options.runtime, |idx| {
        let gen = MCInterface::new(h.select(&idx.args[0]), jump_ops.to_vec());
        let y0 = select_state(psi0, &idx.args[1])?;
        let key = keys[idx.key.unwrap_or(0)];
        solve_jump(&gen, &call.problem(&gen), y0, key)
    })?;
    MCResult::assemble(plan.shape(), &outputs, call.metadata())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::mesolve;
    use crate::linalg::c;
    use crate::operators::{basis, sigmam, sigmax, sigmaz};
    use crate::test_utils::sequential;

    #[test]
    fn test_trajectory_average_follows_master_equation() {
        let h = TimeArray::from_matrix(sigmax() * c(0.5));
        let l = TimeArray::from_matrix(sigmam() * c(0.9));
        let psi0 = basis(2, 1).into_dyn();
        let tsave = [0.0, 0.5, 1.0, 1.5];
        let keys: Vec<u64> = (0..300).collect();
        let mc = mcsolve(
            &h,
            &[l.clone()],
            &psi0,
            &keys,
            &tsave,
            &[sigmaz()],
            &Solver::dopri5(),
            &Options::default(),
        )
        .unwrap();
        let me = mesolve(&h, &[l], &psi0, &tsave, &[sigmaz()], &Solver::dopri5(), None, &sequential())
            .unwrap();
        let (avg, exact) = (mc.expects().unwrap(), me.expects().unwrap());
        assert_eq!(avg.shape(), &[1, 4]);
        for k in 0..tsave.len() {
            // binomial error of 300 trajectories is below 0.06
            assert!((avg[[0, k]].re - exact[[0, k]].re).abs() < 0.2, "t={}", tsave[k]);
        }
        assert_eq!(mc.states().shape(), &[300, 4, 2, 1]);
        assert_eq!(mc.jumps.shape(), &[300]);
        assert!(mc.njumps() > 0);
    }

    #[test]
    fn test_same_keys_reproduce_jumps() {
        let h = TimeArray::from_matrix(sigmax());
        let l = [TimeArray::from_matrix(sigmam())];
        let run = || {
            mcsolve(&h, &l, &basis(2, 1).into_dyn(), &[7, 8], &[0.0, 2.0], &[], &Solver::bosh3(), &sequential())
                .unwrap()
        };
        assert_eq!(run().jumps, run().jumps);
    }

    #[test]
    fn test_requires_jump_ops_and_adaptive_solver() {
        let h = TimeArray::from_matrix(sigmax());
        let psi0 = basis(2, 0).into_dyn();
        let opts = sequential();
        assert!(mcsolve(&h, &[], &psi0, &[0], &[0.0, 1.0], &[], &Solver::dopri5(), &opts).is_err());
        let l = [TimeArray::from_matrix(sigmam())];
        assert!(mcsolve(&h, &l, &psi0, &[0], &[0.0, 1.0], &[], &Solver::Rk4 { dt: 0.1 }, &opts).is_err());
        assert!(mcsolve(&h, &l, &psi0, &[0], &[0.0, 1.0], &[], &Solver::Expm, &opts).is_err());
    }
}
