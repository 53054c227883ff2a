// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Generator interfaces.
//!
//! A generator bundles the operators of one physical equation and exposes
//! the right-hand side the step rules need. Every equation here is linear
//! in the state, so each generator also provides:
//!
//! - the adjoint field `f†`, defined by `Re⟨λ, f(y)⟩ = Re⟨f†(λ), y⟩`;
//! - the parameter pullback `Re⟨λ, ∂f/∂θ_k (y)⟩`;
//! - a dense matrix `G(t)` with `f(y) = G y` ([`Layout::Left`]) or
//!   `vec f(y) = G vec y` ([`Layout::Vectorized`]), used by the implicit
//!   and matrix-exponential methods.

pub mod diffusive;
pub mod jump;
pub mod lindblad;
pub mod schrodinger;

pub use diffusive::DSMEInterface;
pub use jump::MCInterface;
pub use lindblad::MEInterface;
pub use schrodinger::SEInterface;

use ndarray::Array2;
use num_complex::Complex64;

use crate::linalg::{dag, eye, solve_linear, unvectorize, vectorize};
use crate::time_array::TimeArray;

/// How the dense generator matrix acts on the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `f(y) = G y`
    Left,
    /// `vec f(y) = G vec y` with row-major vectorization
    Vectorized,
}

/// Linear right-hand side `dy/dt = f(t, y)`.
pub trait Generator: Send + Sync {
    /// Hilbert space dimension.
    fn dim(&self) -> usize;

    /// `f(t, y)`.
    fn vector_field(&self, t: f64, y: &Array2<Complex64>) -> Array2<Complex64>;

    /// `f†(t, λ)`.
    fn adjoint_field(&self, t: f64, lambda: &Array2<Complex64>) -> Array2<Complex64>;

    /// `Re⟨λ, ∂f/∂θ_k (t, y)⟩` for each parameter operator `∂H/∂θ_k`.
    fn param_vjp(
        &self,
        t: f64,
        y: &Array2<Complex64>,
        lambda: &Array2<Complex64>,
        params: &[TimeArray],
    ) -> Vec<f64>;

    /// Dense generator matrix at time `t`.
    fn generator_matrix(&self, t: f64) -> Array2<Complex64>;

    /// Derivative of the generator matrix for a Hamiltonian perturbation `dh`.
    fn param_matrix(&self, dh: &Array2<Complex64>) -> Array2<Complex64>;

    fn layout(&self) -> Layout;

    /// Times where any operator may jump.
    fn discontinuity_ts(&self) -> Vec<f64>;

    /// Whether every operator is constant or piecewise constant.
    fn is_piecewise_constant(&self) -> bool;
}

/// Apply a dense generator-shaped matrix to a state.
pub(crate) fn apply_matrix(
    layout: Layout,
    m: &Array2<Complex64>,
    y: &Array2<Complex64>,
) -> Array2<Complex64> {
    match layout {
        Layout::Left => m.dot(y),
        Layout::Vectorized => unvectorize(&m.dot(&vectorize(y)), y.nrows(), y.ncols()),
    }
}

/// Solve `(I - α G) X = R`, or `(I - α G)† X = R` when `adjoint` is set.
///
/// Returns `None` when the shifted system is numerically singular.
pub(crate) fn solve_shifted(
    layout: Layout,
    g: &Array2<Complex64>,
    alpha: f64,
    rhs: &Array2<Complex64>,
    adjoint: bool,
) -> Option<Array2<Complex64>> {
    let shifted = eye(g.nrows()) - g * Complex64::new(alpha, 0.0);
    let m = if adjoint { dag(&shifted) } else { shifted };
    match layout {
        Layout::Left => solve_linear(&m, rhs),
        Layout::Vectorized => solve_linear(&m, &vectorize(rhs))
            .map(|v| unvectorize(&v, rhs.nrows(), rhs.ncols())),
    }
}
