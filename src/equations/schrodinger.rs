// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Schrödinger equation `dψ/dt = -i H(t) ψ`.
//!
//! The same generator evolves propagators: columns of `U` are kets.

use ndarray::Array2;
use num_complex::Complex64;

use super::{Generator, Layout};
use crate::linalg::{dag, real_inner, I};
use crate::time_array::TimeArray;

/// Closed-system generator.
#[derive(Debug, Clone)]
pub struct SEInterface {
    pub h: TimeArray,
}

impl SEInterface {
    pub fn new(h: TimeArray) -> Self {
        Self { h }
    }
}

impl Generator for SEInterface {
    fn dim(&self) -> usize {
        self.h.dim()
    }

    fn vector_field(&self, t: f64, y: &Array2<Complex64>) -> Array2<Complex64> {
        self.h.at(t).dot(y) * (-I)
    }

    fn adjoint_field(&self, t: f64, lambda: &Array2<Complex64>) -> Array2<Complex64> {
        dag(&self.h.at(t)).dot(lambda) * I
    }

    fn param_vjp(
        &self,
        t: f64,
        y: &Array2<Complex64>,
        lambda: &Array2<Complex64>,
        params: &[TimeArray],
    ) -> Vec<f64> {
        params
            .iter()
            .map(|p| real_inner(lambda, &(p.at(t).dot(y) * (-I))))
            .collect()
    }

    fn generator_matrix(&self, t: f64) -> Array2<Complex64> {
        self.h.at(t) * (-I)
    }

    fn param_matrix(&self, dh: &Array2<Complex64>) -> Array2<Complex64> {
        dh * (-I)
    }

    fn layout(&self) -> Layout {
        Layout::Left
    }

    fn discontinuity_ts(&self) -> Vec<f64> {
        self.h.discontinuity_ts()
    }

    fn is_piecewise_constant(&self) -> bool {
        self.h.is_piecewise_constant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::c;
    use crate::operators::{basis, sigmax, sigmay};
    use approx::assert_relative_eq;

    fn generator() -> SEInterface {
        let h = TimeArray::from_matrix(sigmax())
            .plus(TimeArray::modulated_scalar(|t| c(t), sigmay()))
            .unwrap();
        SEInterface::new(h)
    }

    #[test]
    fn test_vector_field_on_ground_state() {
        let f = SEInterface::new(TimeArray::from_matrix(sigmax()))
            .vector_field(0.0, &basis(2, 0));
        // -i σx |0> = -i |1>
        assert_relative_eq!(f[[1, 0]].im, -1.0);
        assert_relative_eq!(f[[0, 0]].norm(), 0.0);
    }

    #[test]
    fn test_adjoint_field_pairing() {
        let gen = generator();
        let y = Array2::from_shape_vec((2, 1), vec![Complex64::new(0.3, 0.1), c(0.8)]).unwrap();
        let lam = Array2::from_shape_vec((2, 1), vec![c(-0.2), Complex64::new(0.5, 0.7)]).unwrap();
        let lhs = real_inner(&lam, &gen.vector_field(0.4, &y));
        let rhs = real_inner(&gen.adjoint_field(0.4, &lam), &y);
        assert_relative_eq!(lhs, rhs, epsilon = 1e-14);
    }

    #[test]
    fn test_param_vjp_matches_finite_difference() {
        let y = basis(2, 0);
        let lam = Array2::from_shape_vec((2, 1), vec![c(0.1), Complex64::new(0.0, 1.0)]).unwrap();
        let params = vec![TimeArray::from_matrix(sigmax())];
        let eps = 1e-6;
        let plus = SEInterface::new(TimeArray::from_matrix(sigmax() * c(1.0 + eps)));
        let minus = SEInterface::new(TimeArray::from_matrix(sigmax() * c(1.0 - eps)));
        let fd = (real_inner(&lam, &plus.vector_field(0.0, &y))
            - real_inner(&lam, &minus.vector_field(0.0, &y)))
            / (2.0 * eps);
        let vjp = plus.param_vjp(0.0, &y, &lam, &params);
        assert_relative_eq!(vjp[0], fd, epsilon = 1e-8);
    }
}
