// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Step-size control.
//!
//! Proportional control on the RMS scaled error: the next step is
//! `h * safety * ratio^(-1/q)`, clamped to `[min_factor, max_factor]`.
//! The first step follows the Hairer heuristic.
//!
//! Ref: Hairer, Nørsett & Wanner, "Solving Ordinary Differential Equations I"
//! (1993), §II.4.

use super::state::{error_ratio, OdeState, VectorField};
use crate::solver::AdaptiveConfig;

/// Adaptive step-size controller.
#[derive(Debug, Clone, Copy)]
pub struct Controller {
    pub config: AdaptiveConfig,
    /// Exponent of the step update
    pub error_order: usize,
}

impl Controller {
    pub fn new(config: AdaptiveConfig, error_order: usize) -> Self {
        Self {
            config,
            error_order: error_order.max(1),
        }
    }

    /// RMS scaled error of a step from `y0` to `y1`.
    pub fn ratio<S: OdeState>(&self, err: &S, y0: &S, y1: &S) -> f64 {
        error_ratio(err, y0, y1, self.config.atol, self.config.rtol)
    }

    /// Multiplicative update of the step size.
    pub fn factor(&self, ratio: f64) -> f64 {
        let cfg = &self.config;
        if ratio == 0.0 {
            return cfg.max_factor;
        }
        if !ratio.is_finite() {
            return cfg.min_factor;
        }
        (cfg.safety_factor * ratio.powf(-1.0 / self.error_order as f64))
            .clamp(cfg.min_factor, cfg.max_factor)
    }

    /// Initial step size from `t0` towards `t0 + span` (signed).
    pub fn initial_step<S, F>(&self, f: &F, t0: f64, y0: &S, span: f64) -> f64
    where
        S: OdeState,
        F: VectorField<S>,
    {
        let (atol, rtol) = (self.config.atol, self.config.rtol);
        let direction = if span < 0.0 { -1.0 } else { 1.0 };
        let hmax = span.abs();
        if hmax == 0.0 {
            return 0.0;
        }

        // scaled norms use max(|y0|, |y0|) = |y0|
        let f0 = f(t0, y0);
        let d0 = error_ratio(y0, y0, y0, atol, rtol);
        let d1 = error_ratio(&f0, y0, y0, atol, rtol);
        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        }
        .min(hmax);

        // explicit Euler trial step for the second derivative
        let mut y1 = y0.clone();
        y1.add_scaled(direction * h0, &f0);
        let mut df = f(t0 + direction * h0, &y1);
        df.add_scaled(-1.0, &f0);
        let d2 = error_ratio(&df, y0, y0, atol, rtol) / h0;

        let dmax = d1.max(d2);
        let h1 = if dmax <= 1e-15 {
            (1e-6_f64).max(h0 * 1e-3)
        } else {
            (0.01 / dmax).powf(1.0 / self.error_order as f64)
        };
        direction * (100.0 * h0).min(h1).min(hmax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array1};

    fn controller() -> Controller {
        Controller::new(AdaptiveConfig::default(), 5)
    }

    #[test]
    fn test_factor_bounds() {
        let c = controller();
        assert_eq!(c.factor(0.0), 5.0);
        assert_eq!(c.factor(1e12), 0.2);
        assert_eq!(c.factor(f64::NAN), 0.2);
        assert_relative_eq!(c.factor(1.0), 0.9);
        // ratio 2^5 halves the step before the safety factor
        assert_relative_eq!(c.factor(32.0), 0.45, epsilon = 1e-12);
    }

    #[test]
    fn test_initial_step_is_bounded_and_signed() {
        let c = controller();
        let f = |_t: f64, y: &Array1<f64>| -y * 10.0;
        let y0 = array![1.0, 0.5];
        let h = c.initial_step(&f, 0.0, &y0, 1.0);
        assert!(h > 0.0 && h <= 1.0);
        let hb = c.initial_step(&f, 1.0, &y0, -1.0);
        assert!(hb < 0.0 && hb >= -1.0);
    }

    #[test]
    fn test_initial_step_for_constant_solution() {
        let c = controller();
        let f = |_t: f64, y: &Array1<f64>| y * 0.0;
        let h = c.initial_step(&f, 0.0, &array![1.0], 2.0);
        // no dynamics: the heuristic falls back to 100 h0
        assert!(h > 0.0 && h <= 2.0);
    }
}
