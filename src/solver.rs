// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Solver configuration.
//!
//! A [`Solver`] selects the step rule and its tunables. It is immutable and
//! validated against the requested equation and gradient strategy before
//! any stepping begins.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ToleranceConfig;
use crate::error::{Result, ValidationError};
use crate::gradient::Gradient;

/// Step budget of fixed-step solvers.
pub const FIXED_MAX_STEPS: usize = 100_000;

/// Tunables of adaptive step-size control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Relative tolerance
    #[serde(default = "default_rtol")]
    pub rtol: f64,
    /// Absolute tolerance
    #[serde(default = "default_atol")]
    pub atol: f64,
    /// Safety factor applied to the optimal step
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,
    /// Largest shrink of the step in one adjustment
    #[serde(default = "default_min_factor")]
    pub min_factor: f64,
    /// Largest growth of the step in one adjustment
    #[serde(default = "default_max_factor")]
    pub max_factor: f64,
    /// Maximum number of attempted steps
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            rtol: default_rtol(),
            atol: default_atol(),
            safety_factor: default_safety_factor(),
            min_factor: default_min_factor(),
            max_factor: default_max_factor(),
            max_steps: default_max_steps(),
        }
    }
}

fn default_rtol() -> f64 {
    1e-6
}

fn default_atol() -> f64 {
    1e-8
}

fn default_safety_factor() -> f64 {
    0.9
}

fn default_min_factor() -> f64 {
    0.2
}

fn default_max_factor() -> f64 {
    5.0
}

fn default_max_steps() -> usize {
    100_000
}

impl AdaptiveConfig {
    /// Defaults with tolerances taken from the runtime configuration.
    pub fn from_config(tolerances: &ToleranceConfig) -> Self {
        Self {
            rtol: tolerances.rtol,
            atol: tolerances.atol,
            ..Self::default()
        }
    }

    /// Override both tolerances.
    pub fn with_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.rtol = rtol;
        self.atol = atol;
        self
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("rtol", self.rtol),
            ("atol", self.atol),
            ("safety_factor", self.safety_factor),
            ("min_factor", self.min_factor),
            ("max_factor", self.max_factor),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ValidationError::field(
                    field,
                    format!("must be positive and finite, got {value}"),
                )
                .into());
            }
        }
        if self.min_factor > 1.0 || self.max_factor < 1.0 {
            return Err(ValidationError::field(
                "min_factor/max_factor",
                format!(
                    "require min_factor <= 1 <= max_factor, got {} and {}",
                    self.min_factor, self.max_factor
                ),
            )
            .into());
        }
        if self.max_steps == 0 {
            return Err(ValidationError::field("max_steps", "must be > 0").into());
        }
        Ok(())
    }
}

/// Step method selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Solver {
    /// Explicit Euler, fixed step
    Euler { dt: f64 },
    /// Classic 4th-order Runge-Kutta, fixed step
    Rk4 { dt: f64 },
    /// Bogacki-Shampine 3(2), adaptive
    Bosh3(AdaptiveConfig),
    /// Dormand-Prince 5(4), adaptive
    Dopri5(AdaptiveConfig),
    /// Kværnø ESDIRK 3(2), adaptive and stiffly accurate
    Kvaerno3(AdaptiveConfig),
    /// Matrix exponential of piecewise-constant generators
    Expm,
    /// Euler-Maruyama for diffusive stochastic equations, fixed step
    EulerMaruyama { dt: f64 },
}

impl Solver {
    /// Dormand-Prince with default tolerances.
    pub fn dopri5() -> Self {
        Solver::Dopri5(AdaptiveConfig::default())
    }

    /// Bogacki-Shampine with default tolerances.
    pub fn bosh3() -> Self {
        Solver::Bosh3(AdaptiveConfig::default())
    }

    /// Kværnø 3 with default tolerances.
    pub fn kvaerno3() -> Self {
        Solver::Kvaerno3(AdaptiveConfig::default())
    }

    /// Solver name.
    pub fn name(&self) -> &'static str {
        match self {
            Solver::Euler { .. } => "Euler",
            Solver::Rk4 { .. } => "Rk4",
            Solver::Bosh3(_) => "Bosh3",
            Solver::Dopri5(_) => "Dopri5",
            Solver::Kvaerno3(_) => "Kvaerno3",
            Solver::Expm => "Expm",
            Solver::EulerMaruyama { .. } => "EulerMaruyama",
        }
    }

    /// Adaptive control parameters, if any.
    pub fn adaptive(&self) -> Option<&AdaptiveConfig> {
        match self {
            Solver::Bosh3(cfg) | Solver::Dopri5(cfg) | Solver::Kvaerno3(cfg) => Some(cfg),
            _ => None,
        }
    }

    /// Fixed step size, if any.
    pub fn fixed_dt(&self) -> Option<f64> {
        match self {
            Solver::Euler { dt } | Solver::Rk4 { dt } | Solver::EulerMaruyama { dt } => Some(*dt),
            _ => None,
        }
    }

    /// Whether this solver supports the given gradient strategy.
    pub fn supports_gradient(&self, gradient: &Gradient) -> bool {
        match self {
            Solver::Euler { .. } | Solver::Rk4 { .. } | Solver::Bosh3(_) | Solver::Dopri5(_) => {
                true
            }
            Solver::Kvaerno3(_) | Solver::EulerMaruyama { .. } => matches!(
                gradient,
                Gradient::Autograd | Gradient::CheckpointAutograd { .. }
            ),
            Solver::Expm => matches!(gradient, Gradient::Autograd),
        }
    }

    /// Reject unsupported gradient strategies.
    pub fn assert_supports_gradient(&self, gradient: Option<&Gradient>) -> Result<()> {
        match gradient {
            Some(g) if !self.supports_gradient(g) => Err(ValidationError::UnsupportedGradient {
                solver: self.name().into(),
                gradient: g.to_string(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Reject solvers outside `supported` for the named entry point.
    pub(crate) fn assert_supported_by(&self, method: &str, supported: &[&str]) -> Result<()> {
        if supported.contains(&self.name()) {
            Ok(())
        } else {
            Err(ValidationError::UnsupportedSolver {
                solver: self.name().into(),
                method: method.into(),
            }
            .into())
        }
    }

    /// Check tunables.
    pub fn validate(&self) -> Result<()> {
        if let Some(dt) = self.fixed_dt() {
            if !(dt.is_finite() && dt > 0.0) {
                return Err(
                    ValidationError::field("dt", format!("must be positive, got {dt}")).into(),
                );
            }
        }
        if let Some(cfg) = self.adaptive() {
            cfg.validate()?;
        }
        Ok(())
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Solver::Euler { dt } | Solver::Rk4 { dt } | Solver::EulerMaruyama { dt } => {
                write!(f, "{} (dt={})", self.name(), dt)
            }
            Solver::Bosh3(cfg) | Solver::Dopri5(cfg) | Solver::Kvaerno3(cfg) => {
                write!(f, "{} (rtol={}, atol={})", self.name(), cfg.rtol, cfg.atol)
            }
            Solver::Expm => write!(f, "Expm"),
        }
    }
}
