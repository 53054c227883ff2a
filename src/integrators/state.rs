// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! States the step rules operate on.

use ndarray::{Array1, Array2};
use num_complex::Complex64;

/// Vector-space operations needed by Runge-Kutta step rules and error
/// control.
pub trait OdeState: Clone + Send {
    /// `self += a * x`.
    fn add_scaled(&mut self, a: f64, x: &Self);

    /// Zero state of the same shape.
    fn zeros_like(&self) -> Self;

    /// Sum of squared scaled errors `|err| / (atol + rtol * max(|y0|, |y1|))`
    /// and the number of entries.
    fn error_sums(err: &Self, y0: &Self, y1: &Self, atol: f64, rtol: f64) -> (f64, usize);
}

/// Right-hand side `(t, y) -> dy/dt`.
pub trait VectorField<S>: Fn(f64, &S) -> S {}

impl<S, F: Fn(f64, &S) -> S> VectorField<S> for F {}

impl OdeState for Array2<Complex64> {
    fn add_scaled(&mut self, a: f64, x: &Self) {
        self.scaled_add(Complex64::new(a, 0.0), x);
    }

    fn zeros_like(&self) -> Self {
        Array2::zeros(self.raw_dim())
    }

    fn error_sums(err: &Self, y0: &Self, y1: &Self, atol: f64, rtol: f64) -> (f64, usize) {
        let sum = err
            .iter()
            .zip(y0.iter().zip(y1.iter()))
            .map(|(e, (a, b))| {
                let scale = atol + rtol * a.norm().max(b.norm());
                (e.norm() / scale).powi(2)
            })
            .sum();
        (sum, err.len())
    }
}

impl OdeState for Array1<f64> {
    fn add_scaled(&mut self, a: f64, x: &Self) {
        self.scaled_add(a, x);
    }

    fn zeros_like(&self) -> Self {
        Array1::zeros(self.len())
    }

    fn error_sums(err: &Self, y0: &Self, y1: &Self, atol: f64, rtol: f64) -> (f64, usize) {
        let sum = err
            .iter()
            .zip(y0.iter().zip(y1.iter()))
            .map(|(e, (a, b))| (e / (atol + rtol * a.abs().max(b.abs()))).powi(2))
            .sum();
        (sum, err.len())
    }
}

/// Augmented state of the backward adjoint sweep.
#[derive(Debug, Clone)]
pub struct AdjointState {
    /// Forward state, integrated backward
    pub y: Array2<Complex64>,
    /// Costate
    pub lambda: Array2<Complex64>,
    /// Accumulated parameter gradient
    pub grad: Array1<f64>,
}

impl OdeState for AdjointState {
    fn add_scaled(&mut self, a: f64, x: &Self) {
        self.y.add_scaled(a, &x.y);
        self.lambda.add_scaled(a, &x.lambda);
        self.grad.add_scaled(a, &x.grad);
    }

    fn zeros_like(&self) -> Self {
        Self {
            y: self.y.zeros_like(),
            lambda: self.lambda.zeros_like(),
            grad: self.grad.zeros_like(),
        }
    }

    fn error_sums(err: &Self, y0: &Self, y1: &Self, atol: f64, rtol: f64) -> (f64, usize) {
        let (s1, n1) = OdeState::error_sums(&err.y, &y0.y, &y1.y, atol, rtol);
        let (s2, n2) = OdeState::error_sums(&err.lambda, &y0.lambda, &y1.lambda, atol, rtol);
        let (s3, n3) = OdeState::error_sums(&err.grad, &y0.grad, &y1.grad, atol, rtol);
        (s1 + s2 + s3, n1 + n2 + n3)
    }
}

/// RMS of the scaled error.
pub fn error_ratio<S: OdeState>(err: &S, y0: &S, y1: &S, atol: f64, rtol: f64) -> f64 {
    let (sum, count) = S::error_sums(err, y0, y1, atol, rtol);
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}
