// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kværnø 3(2) ESDIRK method for stiff linear generators.
//!
//! Four stages, the first explicit, the others solving
//! `(I − h γ G(t_i)) Y_i = y + h Σ_{j<i} a_ij k_j` with the dense generator
//! matrix. The method is stiffly accurate: the solution is the last stage
//! and the embedded second-order solution is the third stage.
//!
//! Ref: Kværnø, "Singly diagonally implicit Runge-Kutta methods with an
//! explicit first stage", BIT 44 (2004).

use ndarray::Array2;
use num_complex::Complex64;

use super::state::OdeState;
use super::stepping::{Attempt, ReversibleRule, StepRule};
use super::tableau::StepSpan;
use crate::equations::{apply_matrix, solve_shifted, Generator};
use crate::error::{Result, SolverError};
use crate::linalg::{dag, real_inner};
use crate::time_array::TimeArray;

/// Diagonal coefficient.
pub const GAMMA: f64 = 0.435_866_521_508_459;

const STAGES: usize = 4;

/// Coefficients of the Kværnø 3(2) pair.
struct Esdirk {
    c: [f64; STAGES],
    a: [[f64; STAGES]; STAGES],
    b: [f64; STAGES],
    e: [f64; STAGES],
}

fn kvaerno3() -> Esdirk {
    let g = GAMMA;
    let a31 = (-4.0 * g * g + 6.0 * g - 1.0) / (4.0 * g);
    let a32 = (-2.0 * g + 1.0) / (4.0 * g);
    let a41 = (6.0 * g - 1.0) / (12.0 * g);
    let a42 = -1.0 / ((24.0 * g - 12.0) * g);
    let a43 = (-6.0 * g * g + 6.0 * g - 1.0) / (6.0 * g - 3.0);
    Esdirk {
        c: [0.0, 2.0 * g, 1.0, 1.0],
        a: [
            [0.0; 4],
            [g, g, 0.0, 0.0],
            [a31, a32, g, 0.0],
            [a41, a42, a43, g],
        ],
        b: [a41, a42, a43, g],
        e: [a41 - a31, a42 - a32, a43 - g, g],
    }
}

/// Stage values and slopes of one step.
struct Stages {
    ys: Vec<Array2<Complex64>>,
    ks: Vec<Array2<Complex64>>,
    gs: Vec<Array2<Complex64>>,
}

fn forward_stages(gen: &dyn Generator, span: &StepSpan, y: &Array2<Complex64>) -> Result<Stages> {
    let tab = kvaerno3();
    let h = span.h();
    let layout = gen.layout();
    let mut stages = Stages {
        ys: Vec::with_capacity(STAGES),
        ks: Vec::with_capacity(STAGES),
        gs: Vec::with_capacity(STAGES),
    };
    for i in 0..STAGES {
        let ti = span.stage_time(tab.c[i]);
        let g = gen.generator_matrix(ti);
        let yi = if i == 0 {
            y.clone()
        } else {
            let mut rhs = y.clone();
            for (k, &a) in stages.ks.iter().zip(&tab.a[i][..i]) {
                rhs.add_scaled(h * a, k);
            }
            solve_shifted(layout, &g, h * GAMMA, &rhs, false)
                .ok_or(SolverError::SingularSystem { t: ti })?
        };
        stages.ks.push(apply_matrix(layout, &g, &yi));
        stages.ys.push(yi);
        stages.gs.push(g);
    }
    Ok(stages)
}

/// One Kværnø 3 step; returns the new state and the error estimate.
pub fn kvaerno3_step(
    gen: &dyn Generator,
    span: &StepSpan,
    y: &Array2<Complex64>,
) -> Result<(Array2<Complex64>, Array2<Complex64>)> {
    let tab = kvaerno3();
    let h = span.h();
    let stages = forward_stages(gen, span, y)?;
    let mut y1 = y.clone();
    let mut err = y.zeros_like();
    for (i, k) in stages.ks.iter().enumerate() {
        y1.add_scaled(h * tab.b[i], k);
        err.add_scaled(h * tab.e[i], k);
    }
    Ok((y1, err))
}

/// Vector-Jacobian product of one Kværnø 3 step.
pub fn kvaerno3_vjp(
    gen: &dyn Generator,
    params: &[TimeArray],
    span: &StepSpan,
    y: &Array2<Complex64>,
    ybar: &Array2<Complex64>,
) -> Result<(Array2<Complex64>, Vec<f64>)> {
    let tab = kvaerno3();
    let h = span.h();
    let layout = gen.layout();
    let stages = forward_stages(gen, span, y)?;

    let mut kbar: Vec<Array2<Complex64>> = tab
        .b
        .iter()
        .map(|&b| ybar * Complex64::new(h * b, 0.0))
        .collect();
    let mut ybar0 = ybar.clone();
    let mut grad = vec![0.0; params.len()];

    for i in (0..STAGES).rev() {
        let ti = span.stage_time(tab.c[i]);
        let g_dag = dag(&stages.gs[i]);
        // k_i = G_i Y_i
        let stage_bar = apply_matrix(layout, &g_dag, &kbar[i]);
        // cotangent paired with ∂G_i Y_i
        let mut weight = kbar[i].clone();
        if i == 0 {
            ybar0.add_scaled(1.0, &stage_bar);
        } else {
            // Y_i = (I − hγG_i)⁻¹ R_i
            let rbar = solve_shifted(layout, &stages.gs[i], h * GAMMA, &stage_bar, true)
                .ok_or(SolverError::SingularSystem { t: ti })?;
            weight.add_scaled(h * GAMMA, &rbar);
            for (j, &a) in tab.a[i][..i].iter().enumerate() {
                kbar[j].add_scaled(h * a, &rbar);
            }
            ybar0.add_scaled(1.0, &rbar);
        }
        for (g, p) in grad.iter_mut().zip(params) {
            let dg = gen.param_matrix(&p.at(ti));
            *g += real_inner(&weight, &apply_matrix(layout, &dg, &stages.ys[i]));
        }
    }
    Ok((ybar0, grad))
}

/// Kværnø 3 as a step rule.
pub(crate) struct ImplicitRule<'a> {
    pub gen: &'a dyn Generator,
}

impl StepRule<Array2<Complex64>> for ImplicitRule<'_> {
    type Record = ();

    fn step(&mut self, span: &StepSpan, y: &Array2<Complex64>) -> Result<Attempt<Array2<Complex64>, ()>> {
        let (y, err) = kvaerno3_step(self.gen, span, y)?;
        Ok(Attempt {
            y,
            error: Some(err),
            record: (),
        })
    }

    fn derivative(&self, t: f64, y: &Array2<Complex64>) -> Array2<Complex64> {
        self.gen.vector_field(t, y)
    }
}

impl ReversibleRule<Array2<Complex64>> for ImplicitRule<'_> {
    fn replay(&self, span: &StepSpan, _record: &(), y: &Array2<Complex64>) -> Result<Array2<Complex64>> {
        Ok(kvaerno3_step(self.gen, span, y)?.0)
    }

    fn vjp(
        &self,
        span: &StepSpan,
        _record: &(),
        y: &Array2<Complex64>,
        ybar: &Array2<Complex64>,
        params: &[TimeArray],
    ) -> Result<(Array2<Complex64>, Vec<f64>)> {
        kvaerno3_vjp(self.gen, params, span, y, ybar)
    }
}
