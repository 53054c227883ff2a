// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Standard operators, states and decoherence channels.
//!
//! Conventions: `|0⟩` is the first basis vector, `σz = diag(1, -1)` and
//! `σ⁻ = |0⟩⟨1|`. Times and rates share whatever unit the caller uses for
//! save times.
//!
//! Common channels for superconducting qubits:
//!   - Amplitude damping (T1): L = sqrt(1/T1) σ⁻
//!   - Pure dephasing (T_φ):   L = sqrt(1/(2 T_φ)) σz
//!     where 1/T_φ = 1/T2 − 1/(2T1)

use ndarray::{array, Array2};
use num_complex::Complex64;

use crate::error::{Result, ValidationError};
use crate::linalg::{self, c, dag, is_ket, matrix_exp, I, ONE};

/// Identity operator.
pub fn eye(n: usize) -> Array2<Complex64> {
    linalg::eye(n)
}

/// Bosonic annihilation operator truncated to `n` levels.
pub fn destroy(n: usize) -> Array2<Complex64> {
    Array2::from_shape_fn((n, n), |(i, j)| {
        if j == i + 1 {
            c((j as f64).sqrt())
        } else {
            c(0.0)
        }
    })
}

/// Bosonic creation operator truncated to `n` levels.
pub fn create(n: usize) -> Array2<Complex64> {
    dag(&destroy(n))
}

/// Number operator a†a.
pub fn number(n: usize) -> Array2<Complex64> {
    Array2::from_shape_fn((n, n), |(i, j)| if i == j { c(i as f64) } else { c(0.0) })
}

/// Fock state |k⟩ as an `(n, 1)` ket.
pub fn basis(n: usize, k: usize) -> Array2<Complex64> {
    let mut ket = Array2::zeros((n, 1));
    if k < n {
        ket[[k, 0]] = ONE;
    }
    ket
}

/// Coherent state D(α)|0⟩, built from the truncated displacement operator.
pub fn coherent(n: usize, alpha: Complex64) -> Result<Array2<Complex64>> {
    let generator = create(n) * alpha - destroy(n) * alpha.conj();
    Ok(matrix_exp(&generator)?.dot(&basis(n, 0)))
}

/// Pauli X.
pub fn sigmax() -> Array2<Complex64> {
    array![[c(0.0), ONE], [ONE, c(0.0)]]
}

/// Pauli Y.
pub fn sigmay() -> Array2<Complex64> {
    array![[c(0.0), -I], [I, c(0.0)]]
}

/// Pauli Z.
pub fn sigmaz() -> Array2<Complex64> {
    array![[ONE, c(0.0)], [c(0.0), -ONE]]
}

/// Qubit lowering operator σ⁻ = |0⟩⟨1|.
pub fn sigmam() -> Array2<Complex64> {
    let mut m = Array2::zeros((2, 2));
    m[[0, 1]] = ONE;
    m
}

/// T1 (amplitude damping) jump operator `sqrt(1/T1) σ⁻`.
pub fn amplitude_damping(t1: f64) -> Result<Array2<Complex64>> {
    if t1.is_nan() || t1 <= 0.0 {
        return Err(ValidationError::field("t1", format!("must be positive, got {t1}")).into());
    }
    Ok(sigmam() * c((1.0 / t1).sqrt()))
}

/// Pure dephasing jump operator `sqrt(1/(2 T_φ)) σz`, with
/// 1/T_φ = 1/T2 − 1/(2 T1). Requires T2 ≤ 2 T1.
pub fn pure_dephasing(t1: f64, t2: f64) -> Result<Array2<Complex64>> {
    if t1.is_nan() || t1 <= 0.0 {
        return Err(ValidationError::field("t1", format!("must be positive, got {t1}")).into());
    }
    if t2.is_nan() || t2 <= 0.0 {
        return Err(ValidationError::field("t2", format!("must be positive, got {t2}")).into());
    }
    if t2 > 2.0 * t1 {
        return Err(ValidationError::field(
            "t2",
            format!("T2 ({t2}) must be <= 2*T1 ({})", 2.0 * t1),
        )
        .into());
    }

    let gamma_phi = (1.0 / t2 - 1.0 / (2.0 * t1)).max(0.0);
    Ok(sigmaz() * c((gamma_phi / 2.0).sqrt()))
}

/// Both T1 and T_φ jump operators for a single qubit.
pub fn from_t1_t2(t1: f64, t2: f64) -> Result<Vec<Array2<Complex64>>> {
    Ok(vec![amplitude_damping(t1)?, pure_dephasing(t1, t2)?])
}

/// Purity Tr(ρ²); 1 for kets.
pub fn purity(y: &Array2<Complex64>) -> f64 {
    if is_ket(y) {
        return linalg::norm_sqr(y).powi(2);
    }
    linalg::trace(&y.dot(y)).re
}

/// Fidelity between two states, at least one of which is pure.
///
/// `|⟨ψ|φ⟩|²` for two kets, `⟨ψ|ρ|ψ⟩` for a ket and a density matrix and
/// `Tr(ρσ)` for two density matrices.
pub fn fidelity(a: &Array2<Complex64>, b: &Array2<Complex64>) -> f64 {
    match (is_ket(a), is_ket(b)) {
        (true, true) => linalg::inner(a, b).norm_sqr(),
        (true, false) => linalg::expect(b, a).re,
        (false, true) => linalg::expect(a, b).re,
        (false, false) => linalg::trace(&a.dot(b)).re,
    }
}
