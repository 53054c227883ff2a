// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

use ndarray::{Array2, ArrayD};
use num_complex::Complex64;

use super::{check_jump_ops, check_keys, check_state, select_state, Call};
use crate::equations::DSMEInterface;
use crate::error::{Result, ValidationError};
use crate::gradient::GradientSpec;
use crate::integrators::solve_diffusive;
use crate::linalg::{is_ket, todm};
use crate::options::Options;
use crate::result::DSMEResult;
use crate::solver::Solver;
use crate::time_array::TimeArray;

/// Solve the diffusive stochastic master equation, one trajectory per
/// PRNG key.
///
/// Jump operators with non-zero efficiency `etas[k]` are monitored. The
/// result carries the time-averaged measurement record of every monitored
/// channel over each save interval. The key axis is the last batch axis.
#[allow(clippy::too_many_arguments)]
pub fn dsmesolve(
    h: &TimeArray,
    jump_ops: &[TimeArray],
    etas: &[f64],
    rho0: &ArrayD<Complex64>,
    keys: &[u64],
    tsave: &[f64],
    exp_ops: &[Array2<Complex64>],
    solver: &Solver,
    gradient: Option<&GradientSpec>,
    options: &Options,
) -> Result<DSMEResult> {
    let call = Call {
        method: "dsmesolve",
        tsave,
        exp_ops,
        solver,
        gradient,
        options,
    };
    let n = h.dim();
    call.validate(&["EulerMaruyama"], n)?;
    check_jump_ops(jump_ops, n)?;
    check_etas(etas, jump_ops.len())?;
    check_keys(keys)?;
    let state_batch = check_state("rho0", rho0, n, true, true)?;

    let plan = call
        .plan(&[h.batch_shape(), state_batch])?
        .with_keys(keys.len());
    call.log_start(&plan);
    let outputs = plan.map(&options.runtime, |idx| {
        let gen = DSMEInterface::new(h.select(&idx.args[0]), jump_ops.to_vec(), etas);
        let y0 = select_state(rho0, &idx.args[1])?;
        let y0 = if is_ket(&y0) { todm(&y0) } else { y0 };
        let key = keys[idx.key.unwrap_or(0)];
        solve_diffusive(&gen, &call.problem(&gen), y0, key)
    })?;
    DSMEResult::assemble(plan.shape(), &outputs, call.metadata())
}

fn check_etas(etas: &[f64], njump: usize) -> Result<()> {
    if etas.len() != njump {
        return Err(ValidationError::field(
            "etas",
            format!("expected {} efficiencies (one per jump operator), got {}", njump, etas.len()),
        )
        .into());
    }
    if etas.iter().any(|eta| !(0.0..=1.0).contains(eta)) {
        return Err(ValidationError::field("etas", "must lie in [0, 1]").into());
    }
    if etas.iter().all(|&eta| eta == 0.0) {
        return Err(ValidationError::field(
            "etas",
            "at least one jump operator must be monitored; use mesolve otherwise",
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{c, dag, trace};
    use crate::operators::{basis, sigmam, sigmax, sigmaz};
    use crate::test_utils::sequential;
    use ndarray::{Axis, Ix2};

    fn solver() -> Solver {
        Solver::EulerMaruyama { dt: 1e-3 }
    }

    #[test]
    fn test_etas_validation() {
        assert!(check_etas(&[1.0], 1).is_ok());
        assert!(check_etas(&[0.5, 0.0], 2).is_ok());
        assert!(check_etas(&[1.0], 2).is_err());
        assert!(check_etas(&[1.5], 1).is_err());
        assert!(check_etas(&[0.0, 0.0], 2).is_err());
    }

    #[test]
    fn test_key_axis_is_last() {
        let h = TimeArray::stack(&[sigmax(), sigmax() * c(2.0)]).unwrap();
        let l = TimeArray::from_matrix(sigmam());
        let result = dsmesolve(
            &h,
            &[l],
            &[1.0],
            &basis(2, 0).into_dyn(),
            &[1, 2, 3],
            &[0.0, 0.05, 0.1],
            &[sigmaz()],
            &solver(),
            None,
            &sequential(),
        )
        .unwrap();
        assert_eq!(result.result.batch_shape(), &[2, 3]);
        assert_eq!(result.measurements().shape(), &[2, 3, 1, 2]);
        assert_eq!(result.states().shape(), &[2, 3, 3, 2, 2]);
        assert_eq!(result.expects().unwrap().shape(), &[2, 3, 1, 3]);
        // distinct keys give distinct records
        let m = result.measurements();
        assert_ne!(m[[0, 0, 0, 0]], m[[0, 1, 0, 0]]);
    }

    #[test]
    fn test_mean_record_tracks_expectation() {
        // E[J] over [t, t + Δ) ≈ √η Tr[(L + L†) ρ(t)] for η = 1
        let h = TimeArray::from_matrix(sigmax() * c(0.5));
        let l = sigmam() * c(0.8);
        let psi0 = (basis(2, 0) + basis(2, 1)) * c(0.5_f64.sqrt());
        let keys: Vec<u64> = (0..400).collect();
        let tsave = [0.0, 0.5];
        let result = dsmesolve(
            &h,
            &[TimeArray::from_matrix(l.clone())],
            &[1.0],
            &psi0.clone().into_dyn(),
            &keys,
            &tsave,
            &[],
            &Solver::EulerMaruyama { dt: 2e-3 },
            None,
            &Options::default(),
        )
        .unwrap();
        let mean = result
            .measurements()
            .mean_axis(Axis(0))
            .unwrap()
            .into_dimensionality::<Ix2>()
            .unwrap();
        let rho0 = psi0.dot(&dag(&psi0));
        let expected = trace(&(&l + &dag(&l)).dot(&rho0)).re;
        // the noise of the averaged record is 1/√(Δ N) ≈ 0.07, the drift of ρ
        // over the interval is about as large
        assert!((mean[[0, 0]] - expected).abs() < 0.3, "{} vs {}", mean[[0, 0]], expected);
    }

    #[test]
    fn test_mean_record_scales_with_efficiency() {
        // H commutes with σx, so <σx>(t) = e^{-γt/2} and the interval
        // average of E[J] is √η 0.8 (e^{-γa/2} - e^{-γb/2}) / (γ/2 Δ)
        let h = TimeArray::from_matrix(sigmax() * c(0.5));
        let amplitude: f64 = 0.8;
        let gamma = amplitude * amplitude;
        let eta: f64 = 0.5;
        let psi0 = (basis(2, 0) + basis(2, 1)) * c(0.5_f64.sqrt());
        let nkeys = 2000;
        let keys: Vec<u64> = (0..nkeys).collect();
        let tsave = [0.0, 0.25, 0.5, 0.75, 1.0];
        let result = dsmesolve(
            &h,
            &[TimeArray::from_matrix(sigmam() * c(amplitude))],
            &[eta],
            &psi0.into_dyn(),
            &keys,
            &tsave,
            &[],
            &Solver::EulerMaruyama { dt: 2e-3 },
            None,
            &Options::default(),
        )
        .unwrap();
        let mean = result
            .measurements()
            .mean_axis(Axis(0))
            .unwrap()
            .into_dimensionality::<Ix2>()
            .unwrap();
        assert_eq!(mean.dim(), (1, 4));

        let rate = gamma / 2.0;
        let mut total_err = 0.0;
        for (i, w) in tsave.windows(2).enumerate() {
            let dt = w[1] - w[0];
            let expected =
                eta.sqrt() * amplitude * ((-rate * w[0]).exp() - (-rate * w[1]).exp()) / (rate * dt);
            // the averaged record has standard deviation about 1/√(Δ N)
            let tol = 4.0 / (dt * nkeys as f64).sqrt();
            let err = mean[[0, i]] - expected;
            assert!(err.abs() < tol, "interval {}: {} vs {}", i, mean[[0, i]], expected);
            total_err += err;
        }
        let pooled_tol = 4.0 / (1.0 * nkeys as f64).sqrt();
        assert!((total_err / 4.0).abs() < pooled_tol, "pooled error {}", total_err / 4.0);
    }

    #[test]
    fn test_rejects_wrong_solver_and_empty_keys() {
        let h = TimeArray::from_matrix(sigmax());
        let l = [TimeArray::from_matrix(sigmam())];
        let rho0 = basis(2, 0).into_dyn();
        let opts = sequential();
        assert!(dsmesolve(&h, &l, &[1.0], &rho0, &[0], &[0.0, 1.0], &[], &Solver::dopri5(), None, &opts).is_err());
        assert!(dsmesolve(&h, &l, &[1.0], &rho0, &[], &[0.0, 1.0], &[], &solver(), None, &opts).is_err());
    }
}
