// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Entry points.
//!
//! Each entry point validates its arguments, builds the generator of every
//! batch element, maps the single-trajectory integrator over the batch and
//! assembles the result. Every usage error is reported here, before any
//! stepping starts.

mod dsmesolve;
mod floquet;
mod mcsolve;
mod mesolve;
mod sepropagator;
mod sesolve;

pub use dsmesolve::dsmesolve;
pub use floquet::floquet;
pub use mcsolve::mcsolve;
pub use mesolve::mesolve;
pub use sepropagator::sepropagator;
pub use sesolve::sesolve;

use ndarray::{Array2, ArrayD, Axis, Ix2};
use num_complex::Complex64;
use tracing::{debug, info};

use crate::batching::{BatchMode, BatchPlan};
use crate::equations::Generator;
use crate::error::{Result, ValidationError};
use crate::gradient::GradientSpec;
use crate::integrators::{Problem, SavePolicy};
use crate::options::Options;
use crate::result::Metadata;
use crate::solver::Solver;
use crate::time_array::TimeArray;

/// Solvers of the Schrödinger, master and propagator equations.
const DETERMINISTIC_SOLVERS: &[&str] = &["Euler", "Rk4", "Bosh3", "Dopri5", "Kvaerno3", "Expm"];

/// Arguments shared by every entry point.
pub(crate) struct Call<'a> {
    pub method: &'static str,
    pub tsave: &'a [f64],
    pub exp_ops: &'a [Array2<Complex64>],
    pub solver: &'a Solver,
    pub gradient: Option<&'a GradientSpec>,
    pub options: &'a Options,
}

impl<'a> Call<'a> {
    pub fn t0(&self) -> f64 {
        self.options.start_time(self.tsave)
    }

    /// Check everything that does not depend on the equation.
    pub fn validate(&self, supported: &[&str], n: usize) -> Result<()> {
        check_tsave(self.tsave)?;
        let t0 = self.t0();
        if !t0.is_finite() || self.tsave.last().is_some_and(|&t| t0 > t) {
            return Err(ValidationError::field(
                "t0",
                format!("must be finite and <= the last save time, got {}", t0),
            )
            .into());
        }
        self.solver.validate()?;
        self.solver.assert_supported_by(self.method, supported)?;
        self.solver
            .assert_supports_gradient(self.gradient.map(|g| &g.method))?;

        for (k, op) in self.exp_ops.iter().enumerate() {
            if op.dim() != (n, n) {
                return Err(ValidationError::field(
                    format!("exp_ops[{}]", k),
                    format!("expected shape ({}, {}), got {:?}", n, n, op.dim()),
                )
                .into());
            }
        }

        if let Some(spec) = self.gradient {
            for (k, p) in spec.params.iter().enumerate() {
                let field = format!("gradient.params[{}]", k);
                check_operator(&field, p, n)?;
                if !p.batch_shape().is_empty() {
                    return Err(ValidationError::field(field, "must be unbatched").into());
                }
            }
            let params: Vec<&TimeArray> = spec.params.iter().collect();
            self.check_expm("gradient.params", &params)?;
        }
        Ok(())
    }

    /// The matrix exponential needs piecewise-constant operators.
    pub fn check_expm(&self, field: &str, ops: &[&TimeArray]) -> Result<()> {
        if matches!(self.solver, Solver::Expm) && ops.iter().any(|op| !op.is_piecewise_constant()) {
            return Err(ValidationError::NotPiecewiseConstant {
                field: field.into(),
            }
            .into());
        }
        Ok(())
    }

    pub fn policy(&self) -> SavePolicy {
        SavePolicy::new(
            self.options.save_states,
            self.exp_ops.to_vec(),
            self.options.save_extra.clone(),
        )
    }

    pub fn problem<'g>(&'g self, gen: &'g dyn Generator) -> Problem<'g> {
        Problem {
            gen,
            tsave: self.tsave,
            t0: self.t0(),
            solver: self.solver,
            policy: self.policy(),
            gradient: self.gradient,
            progress: self.options.progress_meter,
        }
    }

    pub fn metadata(&self) -> Metadata {
        Metadata {
            tsave: self.tsave.to_vec(),
            solver: *self.solver,
            gradient: self.gradient.map(|g| g.method),
            options: self.options.clone(),
            final_time: self.tsave.last().map_or(self.t0(), |&t| t.max(self.t0())),
        }
    }

    pub fn plan(&self, arg_shapes: &[Vec<usize>]) -> Result<BatchPlan> {
        BatchPlan::new(
            BatchMode::from_cartesian(self.options.cartesian_batching),
            arg_shapes,
        )
    }

    pub fn log_start(&self, plan: &BatchPlan) {
        info!(
            method = self.method,
            solver = %self.solver,
            batch = ?plan.shape(),
            "starting solve"
        );
        debug!(
            ntsave = self.tsave.len(),
            t0 = self.t0(),
            nexp_ops = self.exp_ops.len(),
            gradient = ?self.gradient.map(|g| g.method),
            "solve arguments"
        );
    }
}

/// Save times must be non-empty, finite and strictly increasing.
pub(crate) fn check_tsave(tsave: &[f64]) -> Result<()> {
    if tsave.is_empty() {
        return Err(ValidationError::field("tsave", "must not be empty").into());
    }
    if tsave.iter().any(|t| !t.is_finite()) {
        return Err(ValidationError::field("tsave", "must be finite").into());
    }
    if tsave.windows(2).any(|w| w[1] <= w[0]) {
        return Err(ValidationError::field("tsave", "must be strictly increasing").into());
    }
    Ok(())
}

pub(crate) fn check_operator(field: &str, op: &TimeArray, n: usize) -> Result<()> {
    if op.dim() != n {
        return Err(ValidationError::field(
            field,
            format!("expected dimension {}, got {}", n, op.dim()),
        )
        .into());
    }
    Ok(())
}

/// Jump operators are unbatched and match the Hamiltonian dimension.
pub(crate) fn check_jump_ops(jump_ops: &[TimeArray], n: usize) -> Result<()> {
    for (k, l) in jump_ops.iter().enumerate() {
        let field = format!("jump_ops[{}]", k);
        check_operator(&field, l, n)?;
        if !l.batch_shape().is_empty() {
            return Err(ValidationError::field(field, "must be unbatched").into());
        }
    }
    Ok(())
}

/// Check a batched state `(...b, n, m)`; `m` is 1 for kets. Returns the
/// batch shape.
pub(crate) fn check_state(
    field: &str,
    y: &ArrayD<Complex64>,
    n: usize,
    allow_ket: bool,
    allow_dm: bool,
) -> Result<Vec<usize>> {
    let shape = y.shape();
    let ok = shape.len() >= 2
        && shape[shape.len() - 2] == n
        && ((allow_ket && shape[shape.len() - 1] == 1) || (allow_dm && shape[shape.len() - 1] == n));
    if !ok {
        let expected = match (allow_ket, allow_dm) {
            (true, true) => format!("(..., {n}, 1) or (..., {n}, {n})"),
            (true, false) => format!("(..., {n}, 1)"),
            _ => format!("(..., {n}, {n})"),
        };
        return Err(ValidationError::field(
            field,
            format!("expected shape {}, got {:?}", expected, shape),
        )
        .into());
    }
    Ok(shape[..shape.len() - 2].to_vec())
}

/// The state of one batch element.
pub(crate) fn select_state(y: &ArrayD<Complex64>, index: &[usize]) -> Result<Array2<Complex64>> {
    let mut view = y.view();
    for &i in index {
        view = view.index_axis_move(Axis(0), i);
    }
    view.into_dimensionality::<Ix2>()
        .map(|v| v.to_owned())
        .map_err(|e| ValidationError::field("state", e.to_string()).into())
}

/// PRNG keys for the noise axis.
pub(crate) fn check_keys(keys: &[u64]) -> Result<()> {
    if keys.is_empty() {
        return Err(ValidationError::field("keys", "must not be empty").into());
    }
    Ok(())
}
