// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Matrix exponential by scaling and squaring with a variable-degree Padé
//! approximant.
//!
//! Degrees and thresholds follow Higham (2005), "The Scaling and Squaring
//! Method for the Matrix Exponential Revisited", SIAM J. Matrix Anal. Appl.
//! 26(4), 1179. Small generators (short Expm intervals, stage matrices of
//! the adjoint) take a degree 3 to 9 approximant without squaring.
//!
//! The Fréchet derivative `L(A, E)` used to differentiate propagators is
//! read off the exponential of the block matrix `[[A, E], [0, A]]`
//! (Higham, "Functions of Matrices", Thm. 3.6).

use ndarray::{s, Array2};
use num_complex::Complex64;

use super::{c, eye, solve_linear};
use crate::error::{Result, SolverError};

/// Unnormalized Padé numerator coefficients `b_k` for degrees 3, 5, 7, 9.
const PADE_LOW: [(f64, &[f64]); 4] = [
    (1.495_585_217_958_292e-2, &[120.0, 60.0, 12.0, 1.0]),
    (
        2.539_398_330_063_23e-1,
        &[30240.0, 15120.0, 3360.0, 420.0, 30.0, 1.0],
    ),
    (
        9.504_178_996_162_932e-1,
        &[17_297_280.0, 8_648_640.0, 1_995_840.0, 277_200.0, 25_200.0, 1512.0, 56.0, 1.0],
    ),
    (
        2.097_847_961_257_068,
        &[
            17_643_225_600.0,
            8_821_612_800.0,
            2_075_673_600.0,
            302_702_400.0,
            30_270_240.0,
            2_162_160.0,
            110_880.0,
            3960.0,
            90.0,
            1.0,
        ],
    ),
];

const THETA_13: f64 = 5.371_920_351_148_152;

const PADE_13: [f64; 14] = [
    64_764_752_532_480_000.0,
    32_382_376_266_240_000.0,
    7_771_770_303_897_600.0,
    1_187_353_796_428_800.0,
    129_060_195_264_000.0,
    10_559_470_521_600.0,
    670_442_572_800.0,
    33_522_128_640.0,
    1_323_241_920.0,
    40_840_800.0,
    960_960.0,
    16_380.0,
    182.0,
    1.0,
];

/// Matrix exponential `exp(A)`.
///
/// Fails with [`SolverError::Decomposition`] on non-finite input or when
/// the Padé denominator is singular.
///
/// # Panics
/// Panics if `a` is not square.
pub fn matrix_exp(a: &Array2<Complex64>) -> Result<Array2<Complex64>> {
    let n = a.nrows();
    assert_eq!(n, a.ncols(), "matrix_exp requires a square matrix");
    if a.iter().any(|z| !z.is_finite()) {
        return Err(SolverError::Decomposition("matrix exponential of a non-finite matrix".into()).into());
    }
    match n {
        0 => return Ok(Array2::zeros((0, 0))),
        1 => return Ok(Array2::from_elem((1, 1), a[[0, 0]].exp())),
        _ => {}
    }

    let norm = one_norm(a);
    if let Some((_, coeffs)) = PADE_LOW.iter().find(|(theta, _)| norm <= *theta) {
        let (u, v) = pade_parts(a, coeffs);
        return pade_quotient(u, v);
    }

    // scale so that ||A / 2^s||_1 <= θ_13, then square s times
    let squarings = (norm / THETA_13).log2().ceil().max(0.0) as i32;
    let scaled = a * c(0.5f64.powi(squarings));
    let (u, v) = pade13_parts(&scaled);
    let mut e = pade_quotient(u, v)?;
    for _ in 0..squarings {
        e = e.dot(&e);
    }
    Ok(e)
}

/// Exponential and Fréchet derivative of the exponential.
///
/// Returns `(exp(A), L(A, E))` where `exp(A + tE) = exp(A) + t L(A, E) + O(t²)`.
pub fn expm_frechet(
    a: &Array2<Complex64>,
    e: &Array2<Complex64>,
) -> Result<(Array2<Complex64>, Array2<Complex64>)> {
    let n = a.nrows();
    let mut block = Array2::zeros((2 * n, 2 * n));
    block.slice_mut(s![..n, ..n]).assign(a);
    block.slice_mut(s![..n, n..]).assign(e);
    block.slice_mut(s![n.., n..]).assign(a);

    let full = matrix_exp(&block)?;
    Ok((
        full.slice(s![..n, ..n]).to_owned(),
        full.slice(s![..n, n..]).to_owned(),
    ))
}

/// Odd part `U` and even part `V` of a low-degree approximant, from
/// powers of `A²`.
fn pade_parts(a: &Array2<Complex64>, coeffs: &[f64]) -> (Array2<Complex64>, Array2<Complex64>) {
    let n = a.nrows();
    let a2 = a.dot(a);
    let mut power = eye(n);
    let mut odd = Array2::<Complex64>::zeros((n, n));
    let mut v = Array2::<Complex64>::zeros((n, n));
    let pairs = coeffs.len() / 2;
    for (k, pair) in coeffs.chunks(2).enumerate() {
        v.scaled_add(c(pair[0]), &power);
        odd.scaled_add(c(pair[1]), &power);
        if k + 1 < pairs {
            power = power.dot(&a2);
        }
    }
    (a.dot(&odd), v)
}

/// Degree 13 parts, evaluated with six matrix products.
fn pade13_parts(a: &Array2<Complex64>) -> (Array2<Complex64>, Array2<Complex64>) {
    let n = a.nrows();
    let id = eye(n);
    let a2 = a.dot(a);
    let a4 = a2.dot(&a2);
    let a6 = a2.dot(&a4);
    let b = &PADE_13;
    let combine = |k0: f64, k2: f64, k4: f64, k6: f64| -> Array2<Complex64> {
        &id * c(k0) + &a2 * c(k2) + &a4 * c(k4) + &a6 * c(k6)
    };

    let u = a.dot(&(a6.dot(&combine(0.0, b[9], b[11], b[13])) + combine(b[1], b[3], b[5], b[7])));
    let v = a6.dot(&combine(0.0, b[8], b[10], b[12])) + combine(b[0], b[2], b[4], b[6]);
    (u, v)
}

/// `r(A) = (V - U)⁻¹ (V + U)`.
fn pade_quotient(u: Array2<Complex64>, v: Array2<Complex64>) -> Result<Array2<Complex64>> {
    let numerator = &v + &u;
    let denominator = v - u;
    solve_linear(&denominator, &numerator)
        .ok_or_else(|| SolverError::Decomposition("singular Padé denominator".into()).into())
}

/// Largest absolute column sum.
fn one_norm(a: &Array2<Complex64>) -> f64 {
    a.columns()
        .into_iter()
        .map(|col| col.iter().map(|z| z.norm()).sum::<f64>())
        .fold(0.0, f64::max)
}
