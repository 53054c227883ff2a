// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dense complex linear algebra shared by the equations and step rules.
//!
//! States are `Array2<Complex64>`: kets are `(n, 1)` columns, density
//! matrices and propagators are `(n, n)`. Superoperators act on the
//! row-major vectorization `vec(ρ)[i*n + j] = ρ[i, j]`, for which
//! `vec(A ρ B) = (A ⊗ Bᵀ) vec(ρ)`.

pub mod expm;

pub use expm::{expm_frechet, matrix_exp};

use nalgebra::DMatrix;
use ndarray::{Array2, ArrayD, Ix2};
use num_complex::Complex64;

use crate::error::{Result, SolverError};

/// Complex one.
pub const ONE: Complex64 = Complex64 { re: 1.0, im: 0.0 };
/// Imaginary unit.
pub const I: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// Create Complex64 from f64.
#[inline]
pub fn c(x: f64) -> Complex64 {
    Complex64::new(x, 0.0)
}

/// Identity matrix of size `n`.
pub fn eye(n: usize) -> Array2<Complex64> {
    Array2::from_diag_elem(n, ONE)
}

/// Conjugate transpose A†.
pub fn dag(a: &Array2<Complex64>) -> Array2<Complex64> {
    a.t().mapv(|z| z.conj())
}

/// Matrix trace.
pub fn trace(a: &Array2<Complex64>) -> Complex64 {
    a.diag().sum()
}

/// Frobenius inner product `<a, b> = Tr(a† b)`.
pub fn inner(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Complex64 {
    a.iter().zip(b.iter()).map(|(x, y)| x.conj() * y).sum()
}

/// Real part of the Frobenius inner product, the pairing used for
/// cotangents of complex arrays.
pub fn real_inner(a: &Array2<Complex64>, b: &Array2<Complex64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.re * y.re + x.im * y.im)
        .sum()
}

/// Squared Frobenius norm.
pub fn norm_sqr(a: &Array2<Complex64>) -> f64 {
    a.iter().map(|z| z.norm_sqr()).sum()
}

/// Whether a state array is a ket `(n, 1)` rather than an operator.
pub fn is_ket(y: &Array2<Complex64>) -> bool {
    y.ncols() == 1 && y.nrows() > 1
}

/// Expectation value of `op` in state `y`: `<ψ|O|ψ>` for kets, `Tr(O ρ)`
/// otherwise.
pub fn expect(op: &Array2<Complex64>, y: &Array2<Complex64>) -> Complex64 {
    if is_ket(y) {
        inner(y, &op.dot(y))
    } else {
        // Tr(Oρ) = Σ_ij O_ij ρ_ji
        let n = y.nrows();
        let mut acc = Complex64::new(0.0, 0.0);
        for i in 0..n {
            for j in 0..n {
                acc += op[[i, j]] * y[[j, i]];
            }
        }
        acc
    }
}

/// Density matrix |ψ⟩⟨ψ| of a ket; operators are returned unchanged.
pub fn todm(y: &Array2<Complex64>) -> Array2<Complex64> {
    if is_ket(y) {
        y.dot(&dag(y))
    } else {
        y.clone()
    }
}

/// Kronecker product A ⊗ B.
pub fn kron(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Array2<Complex64> {
    let (ar, ac) = a.dim();
    let (br, bc) = b.dim();
    Array2::from_shape_fn((ar * br, ac * bc), |(i, j)| {
        a[[i / br, j / bc]] * b[[i % br, j % bc]]
    })
}

/// Row-major vectorization of a matrix into an `(n*m, 1)` column.
pub fn vectorize(a: &Array2<Complex64>) -> Array2<Complex64> {
    let (n, m) = a.dim();
    Array2::from_shape_fn((n * m, 1), |(k, _)| a[[k / m, k % m]])
}

/// Inverse of [`vectorize`] for an `(n, m)` target.
pub fn unvectorize(v: &Array2<Complex64>, n: usize, m: usize) -> Array2<Complex64> {
    Array2::from_shape_fn((n, m), |(i, j)| v[[i * m + j, 0]])
}

/// Collapse a dynamic array with trailing matrix axes into one matrix,
/// taking the first element along every leading batch axis.
pub fn first_matrix(mut a: ArrayD<Complex64>) -> Array2<Complex64> {
    while a.ndim() > 2 {
        a = a.index_axis_move(ndarray::Axis(0), 0);
    }
    match a.into_dimensionality::<Ix2>() {
        Ok(m) => m,
        Err(_) => Array2::zeros((0, 0)),
    }
}

/// Largest absolute entry of `a - b`.
pub fn max_abs_diff(a: &Array2<Complex64>, b: &Array2<Complex64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).norm())
        .fold(0.0, f64::max)
}

pub(crate) fn to_dmatrix(a: &Array2<Complex64>) -> DMatrix<Complex64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub(crate) fn from_dmatrix(m: &DMatrix<Complex64>) -> Array2<Complex64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Solve `A X = B` by LU decomposition with partial pivoting.
///
/// Returns `None` when a pivot of `U` is negligible against the largest
/// entry of `A`.
pub(crate) fn solve_linear(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Option<Array2<Complex64>> {
    let scale = a.iter().map(|z| z.norm()).fold(f64::MIN_POSITIVE, f64::max);
    let lu = to_dmatrix(a).lu();
    if lu.u().diagonal().iter().any(|p| p.norm() <= 1e-14 * scale) {
        return None;
    }
    lu.solve(&to_dmatrix(b)).map(|x| from_dmatrix(&x))
}

/// Eigendecomposition of a normal matrix (unitary, Hermitian, ...).
///
/// For normal matrices the complex Schur form is diagonal, so the Schur
/// vectors are an orthonormal eigenbasis. Returns the eigenvalues and the
/// eigenvectors as columns.
pub fn eig_normal(a: &Array2<Complex64>) -> Result<(Vec<Complex64>, Array2<Complex64>)> {
    let n = a.nrows();
    let schur = nalgebra::linalg::Schur::try_new(to_dmatrix(a), 1e-14, 10_000 * n.max(1))
        .ok_or_else(|| SolverError::Decomposition("Schur iteration did not converge".into()))?;
    let (q, t) = schur.unpack();
    let evals = (0..n).map(|i| t[(i, i)]).collect();
    Ok((evals, from_dmatrix(&q)))
}
