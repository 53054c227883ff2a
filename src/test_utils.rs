// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared test utilities.

use ndarray::{stack, Array2, ArrayD, Axis};
use num_complex::Complex64;

use crate::config::RuntimeConfig;
use crate::linalg::{c, max_abs_diff};
use crate::operators::{sigmax, sigmaz};
use crate::options::Options;
use crate::time_array::TimeArray;

/// Assert two matrices agree entrywise within `tol`.
pub fn assert_matrix_close(a: &Array2<Complex64>, b: &Array2<Complex64>, tol: f64) {
    assert_eq!(a.dim(), b.dim(), "shape mismatch");
    let diff = max_abs_diff(a, b);
    assert!(diff < tol, "matrices differ by {:.3e} (tol {:.1e})\n{}\nvs\n{}", diff, tol, a, b);
}

/// Default options mapped on the calling thread.
pub fn sequential() -> Options {
    Options {
        runtime: RuntimeConfig {
            parallel: false,
            num_threads: None,
        },
        ..Options::default()
    }
}

/// Stack kets `(n, 1)` into a batch `(k, n, 1)`.
pub fn kets(states: &[Array2<Complex64>]) -> ArrayD<Complex64> {
    let views: Vec<_> = states.iter().map(|s| s.view()).collect();
    stack(Axis(0), &views).expect("kets share a shape").into_dyn()
}

/// Batch of qubit Hamiltonians `w σz + σx`, one per frequency.
pub fn qubit_hamiltonians(ws: &[f64]) -> TimeArray {
    let matrices: Vec<_> = ws.iter().map(|&w| sigmaz() * c(w) + sigmax()).collect();
    TimeArray::stack(&matrices).expect("equal shapes")
}
