// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Gradient strategies and differentiation targets.
//!
//! Parameters `θ_k` enter the Hamiltonian linearly through the operators
//! `∂H/∂θ_k`. A [`Loss`] maps the final state to a real number `L` and its
//! cotangent `g`, with the convention `dL = Re⟨g, dy⟩ = Re Tr(g† dy)`.
//! Integrators return `dL/dθ_k` and the cotangent of the initial state.

use ndarray::{Array2, ArrayD};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::linalg::{dag, expect, is_ket};
use crate::time_array::TimeArray;

/// How gradients flow through the integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Gradient {
    /// Retain every step and differentiate through it.
    Autograd,
    /// Retain at most `ncheckpoints` states and recompute the rest.
    CheckpointAutograd { ncheckpoints: usize },
    /// Integrate a costate backward in time; nothing is retained.
    Adjoint,
}

impl fmt::Display for Gradient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gradient::Autograd => write!(f, "Autograd"),
            Gradient::CheckpointAutograd { ncheckpoints } => {
                write!(f, "CheckpointAutograd(ncheckpoints={})", ncheckpoints)
            }
            Gradient::Adjoint => write!(f, "Adjoint"),
        }
    }
}

/// Real-valued function of the final state.
pub trait Loss: Send + Sync {
    /// Loss value and its cotangent with respect to the state.
    fn evaluate(&self, y: &Array2<Complex64>) -> (f64, Array2<Complex64>);
}

impl<F> Loss for F
where
    F: Fn(&Array2<Complex64>) -> (f64, Array2<Complex64>) + Send + Sync,
{
    fn evaluate(&self, y: &Array2<Complex64>) -> (f64, Array2<Complex64>) {
        self(y)
    }
}

/// Expectation value of an observable: `⟨ψ|O|ψ⟩` or `Re Tr(O ρ)`.
#[derive(Debug, Clone)]
pub struct ExpectationLoss {
    pub op: Array2<Complex64>,
}

impl ExpectationLoss {
    pub fn new(op: Array2<Complex64>) -> Self {
        Self { op }
    }
}

impl Loss for ExpectationLoss {
    fn evaluate(&self, y: &Array2<Complex64>) -> (f64, Array2<Complex64>) {
        let value = expect(&self.op, y).re;
        let g = if is_ket(y) {
            (&self.op + &dag(&self.op)).dot(y)
        } else {
            dag(&self.op)
        };
        (value, g)
    }
}

/// What to differentiate and how.
#[derive(Clone)]
pub struct GradientSpec {
    /// Strategy
    pub method: Gradient,
    /// `∂H/∂θ_k` for each parameter; must be unbatched
    pub params: Vec<TimeArray>,
    /// Function of the final state
    pub loss: Arc<dyn Loss>,
}

impl GradientSpec {
    pub fn new(method: Gradient, params: Vec<TimeArray>, loss: impl Loss + 'static) -> Self {
        Self {
            method,
            params,
            loss: Arc::new(loss),
        }
    }
}

impl fmt::Debug for GradientSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradientSpec")
            .field("method", &self.method)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Gradients of one trajectory.
#[derive(Debug, Clone)]
pub(crate) struct TrajectoryGrads {
    pub loss: f64,
    pub params: Vec<f64>,
    pub y0: Array2<Complex64>,
}

/// Batched gradients.
#[derive(Debug, Clone)]
pub struct Grads {
    /// Loss values, shape `(...b)`
    pub loss: ArrayD<f64>,
    /// `dL/dθ`, shape `(...b, nparams)`
    pub params: ArrayD<f64>,
    /// Cotangent of the initial state, shape `(...b, n, m)`
    pub y0: ArrayD<Complex64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{c, real_inner, todm};
    use crate::operators::{basis, sigmax, sigmaz};
    use approx::assert_relative_eq;

    #[test]
    fn test_expectation_loss_ket_cotangent() {
        // directional derivative matches Re<g, dψ>
        let psi = (basis(2, 0) + basis(2, 1)) * c(std::f64::consts::FRAC_1_SQRT_2);
        let loss = ExpectationLoss::new(sigmaz());
        let (value, g) = loss.evaluate(&psi);
        assert_relative_eq!(value, 0.0, epsilon = 1e-14);

        let dpsi = basis(2, 0) * Complex64::new(0.3, -0.2);
        let h = 1e-7;
        let (plus, _) = loss.evaluate(&(&psi + &(&dpsi * c(h))));
        let (minus, _) = loss.evaluate(&(&psi - &(&dpsi * c(h))));
        assert_relative_eq!((plus - minus) / (2.0 * h), real_inner(&g, &dpsi), epsilon = 1e-6);
    }

    #[test]
    fn test_expectation_loss_density_matrix() {
        let rho = todm(&basis(2, 0));
        let (value, g) = ExpectationLoss::new(sigmax()).evaluate(&rho);
        assert_relative_eq!(value, 0.0);
        assert_eq!(g, sigmax());
    }

    #[test]
    fn test_closure_loss() {
        let loss = |y: &Array2<Complex64>| (y[[0, 0]].re, Array2::zeros(y.raw_dim()));
        let spec = GradientSpec::new(Gradient::Adjoint, vec![], loss);
        let (value, _) = spec.loss.evaluate(&todm(&basis(2, 0)));
        assert_relative_eq!(value, 1.0);
    }

    #[test]
    fn test_gradient_display() {
        assert_eq!(Gradient::Autograd.to_string(), "Autograd");
        assert_eq!(
            Gradient::CheckpointAutograd { ncheckpoints: 8 }.to_string(),
            "CheckpointAutograd(ncheckpoints=8)"
        );
    }
}
