// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Explicit Runge-Kutta tableaux and the generic step.
//!
//! Ref: Hairer, Nørsett & Wanner, "Solving Ordinary Differential Equations I"
//! (1993), §II.1 and §II.4.

use ndarray::Array2;
use num_complex::Complex64;

use super::state::{OdeState, VectorField};
use super::stepping::{Attempt, ReversibleRule, StepRule};
use crate::equations::Generator;
use crate::error::Result;
use crate::solver::Solver;
use crate::time_array::TimeArray;

/// Butcher tableau with an optional embedded error estimate.
#[derive(Debug)]
pub struct Tableau {
    pub name: &'static str,
    pub c: &'static [f64],
    /// Strictly lower-triangular rows
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64],
    /// `b - b̂` of the embedded pair
    pub e: Option<&'static [f64]>,
    /// Exponent of the step-size update (embedded order + 1)
    pub error_order: usize,
}

pub const EULER: Tableau = Tableau {
    name: "Euler",
    c: &[0.0],
    a: &[&[]],
    b: &[1.0],
    e: None,
    error_order: 1,
};

pub const RK4: Tableau = Tableau {
    name: "Rk4",
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
    e: None,
    error_order: 4,
};

/// Bogacki-Shampine 3(2).
pub const BOSH3: Tableau = Tableau {
    name: "Bosh3",
    c: &[0.0, 0.5, 0.75, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.75], &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0]],
    b: &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0, 0.0],
    e: Some(&[-5.0 / 72.0, 1.0 / 12.0, 1.0 / 9.0, -1.0 / 8.0]),
    error_order: 3,
};

/// Dormand-Prince 5(4).
pub const DOPRI5: Tableau = Tableau {
    name: "Dopri5",
    c: &[0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0],
    a: &[
        &[],
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
        &[
            19372.0 / 6561.0,
            -25360.0 / 2187.0,
            64448.0 / 6561.0,
            -212.0 / 729.0,
        ],
        &[
            9017.0 / 3168.0,
            -355.0 / 33.0,
            46732.0 / 5247.0,
            49.0 / 176.0,
            -5103.0 / 18656.0,
        ],
        &[
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
        ],
    ],
    b: &[
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
        0.0,
    ],
    e: Some(&[
        71.0 / 57600.0,
        0.0,
        -71.0 / 16695.0,
        71.0 / 1920.0,
        -17253.0 / 339200.0,
        22.0 / 525.0,
        -1.0 / 40.0,
    ]),
    error_order: 5,
};

impl Tableau {
    /// Explicit tableau of a solver, if it has one.
    pub fn for_solver(solver: &Solver) -> Option<&'static Tableau> {
        match solver {
            Solver::Euler { .. } => Some(&EULER),
            Solver::Rk4 { .. } => Some(&RK4),
            Solver::Bosh3(_) => Some(&BOSH3),
            Solver::Dopri5(_) => Some(&DOPRI5),
            _ => None,
        }
    }

    pub fn stages(&self) -> usize {
        self.c.len()
    }

    /// Stages that feed the solution; trailing stages only feed the error.
    fn solution_stages(&self) -> usize {
        self.b.iter().rposition(|&b| b != 0.0).map_or(0, |i| i + 1)
    }
}

/// Time interval covered by one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSpan {
    pub t: f64,
    pub t_end: f64,
}

impl StepSpan {
    pub fn new(t: f64, t_end: f64) -> Self {
        Self { t, t_end }
    }

    /// Signed step size.
    pub fn h(&self) -> f64 {
        self.t_end - self.t
    }

    /// Time of a stage at fraction `c` of the step.
    ///
    /// Stages are kept strictly below the upper end of the interval so
    /// piecewise-constant operators take the value of the integrated
    /// segment when the step ends on a breakpoint.
    pub fn stage_time(&self, c: f64) -> f64 {
        let lo = self.t.min(self.t_end);
        let hi = self.t.max(self.t_end);
        let hi = prev_float(hi).max(lo);
        (self.t + c * self.h()).clamp(lo, hi)
    }
}

fn prev_float(x: f64) -> f64 {
    if x.is_nan() || x == f64::NEG_INFINITY {
        x
    } else if x == 0.0 {
        -f64::from_bits(1)
    } else if x > 0.0 {
        f64::from_bits(x.to_bits() - 1)
    } else {
        f64::from_bits(x.to_bits() + 1)
    }
}

/// One explicit Runge-Kutta step. Returns the new state and, for embedded
/// pairs, the local error estimate.
pub fn rk_step<S, F>(tab: &Tableau, f: &F, span: &StepSpan, y: &S) -> (S, Option<S>)
where
    S: OdeState,
    F: VectorField<S>,
{
    let h = span.h();
    let mut ks: Vec<S> = Vec::with_capacity(tab.stages());
    for (i, row) in tab.a.iter().enumerate() {
        let mut yi = y.clone();
        for (k, &a) in ks.iter().zip(row.iter()) {
            if a != 0.0 {
                yi.add_scaled(h * a, k);
            }
        }
        ks.push(f(span.stage_time(tab.c[i]), &yi));
    }

    let mut y1 = y.clone();
    for (k, &b) in ks.iter().zip(tab.b) {
        if b != 0.0 {
            y1.add_scaled(h * b, k);
        }
    }

    let err = tab.e.map(|e| {
        let mut err = y.zeros_like();
        for (k, &w) in ks.iter().zip(e) {
            if w != 0.0 {
                err.add_scaled(h * w, k);
            }
        }
        err
    });
    (y1, err)
}

/// Vector-Jacobian product of one explicit step of a linear generator.
///
/// Given the cotangent `ybar` of the step output, returns the cotangent of
/// the step input and `Re⟨ybar, ∂y1/∂θ_k⟩` for each parameter.
pub fn rk_step_vjp(
    tab: &Tableau,
    gen: &dyn Generator,
    params: &[TimeArray],
    span: &StepSpan,
    y: &Array2<Complex64>,
    ybar: &Array2<Complex64>,
) -> (Array2<Complex64>, Vec<f64>) {
    let h = span.h();
    let s = tab.solution_stages();

    // recompute stage inputs
    let mut stages: Vec<Array2<Complex64>> = Vec::with_capacity(s);
    let mut ks: Vec<Array2<Complex64>> = Vec::with_capacity(s);
    for i in 0..s {
        let mut yi = y.clone();
        for (k, &a) in ks.iter().zip(tab.a[i].iter()) {
            if a != 0.0 {
                yi.add_scaled(h * a, k);
            }
        }
        ks.push(gen.vector_field(span.stage_time(tab.c[i]), &yi));
        stages.push(yi);
    }

    let mut kbar: Vec<Array2<Complex64>> = tab.b[..s]
        .iter()
        .map(|&b| ybar * Complex64::new(h * b, 0.0))
        .collect();
    let mut ybar0 = ybar.clone();
    let mut grad = vec![0.0; params.len()];

    for i in (0..s).rev() {
        let ti = span.stage_time(tab.c[i]);
        let stage_bar = gen.adjoint_field(ti, &kbar[i]);
        for (g, d) in grad
            .iter_mut()
            .zip(gen.param_vjp(ti, &stages[i], &kbar[i], params))
        {
            *g += d;
        }
        for (j, &a) in tab.a[i].iter().enumerate() {
            if a != 0.0 {
                kbar[j].add_scaled(h * a, &stage_bar);
            }
        }
        ybar0.add_scaled(1.0, &stage_bar);
    }
    (ybar0, grad)
}

/// Explicit Runge-Kutta rule over a linear generator.
pub(crate) struct ExplicitRule<'a> {
    pub tab: &'static Tableau,
    pub gen: &'a dyn Generator,
}

impl StepRule<Array2<Complex64>> for ExplicitRule<'_> {
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
}

impl ReversibleRule<Array2<Complex64>> for ExplicitRule<'_> {
    fn replay(&self, span: &StepSpan, _record: &(), y: &Array2<Complex64>) -> Result<Array2<Complex64>> {
        let f = |t: f64, y: &Array2<Complex64>| self.gen.vector_field(t, y);
        Ok(rk_step(self.tab, &f, span, y).0)
    }

    fn vjp(
        &self,
        span: &StepSpan,
        _record: &(),
        y: &Array2<Complex64>,
        ybar: &Array2<Complex64>,
        params: &[TimeArray],
    ) -> Result<(Array2<Complex64>, Vec<f64>)> {
        Ok(rk_step_vjp(self.tab, self.gen, params, span, y, ybar))
    }
}
