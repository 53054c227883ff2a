// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the dynamics engine.
//!
//! Usage errors ([`ValidationError`]) are always raised before any stepping
//! begins. Numerical failures ([`SolverError`]) abort a run in progress and
//! carry the last reached time. A failed call never returns a partial result.

use std::fmt;

/// Result type alias for dynamics operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Dynamics error types.
#[derive(Debug)]
pub enum Error {
    /// Configuration error
    Config(String),
    /// Rejected call (bad shapes, unsupported combinations, ...)
    Validation(ValidationError),
    /// Solver failed to converge
    Solver(SolverError),
    /// IO error
    Io(std::io::Error),
    /// Serialization error
    Serialization(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Solver(e) => write!(f, "Solver error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Validation(e) => Some(e),
            Error::Solver(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}

impl From<SolverError> for Error {
    fn from(e: SolverError) -> Self {
        Error::Solver(e)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Precondition violations.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Field validation failed
    Field { field: String, message: String },
    /// Solver cannot integrate the requested equation
    UnsupportedSolver { solver: String, method: String },
    /// Solver does not implement the requested gradient strategy
    UnsupportedGradient { solver: String, gradient: String },
    /// Operator must be constant or piecewise constant
    NotPiecewiseConstant { field: String },
    /// Generator is not periodic with the claimed period
    Periodicity(String),
}

impl ValidationError {
    /// Shorthand for a [`ValidationError::Field`].
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::Field {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Field { field, message } => {
                write!(f, "Field '{}': {}", field, message)
            }
            ValidationError::UnsupportedSolver { solver, method } => {
                write!(f, "Solver {} is not supported by {}", solver, method)
            }
            ValidationError::UnsupportedGradient { solver, gradient } => {
                write!(
                    f,
                    "Solver {} does not support gradient {}",
                    solver, gradient
                )
            }
            ValidationError::NotPiecewiseConstant { field } => {
                write!(
                    f,
                    "Field '{}' must be constant or piecewise constant for the Expm solver",
                    field
                )
            }
            ValidationError::Periodicity(msg) => write!(f, "Periodicity check failed: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Numerical non-convergence.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// Step budget exhausted before reaching the final save time
    MaxStepsReached { t: f64, steps: usize },
    /// Adaptive step shrank below the representable minimum
    StepSizeTooSmall { t: f64, dt: f64, steps: usize },
    /// Implicit stage system could not be solved
    SingularSystem { t: f64 },
    /// Eigendecomposition did not converge
    Decomposition(String),
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::MaxStepsReached { t, steps } => {
                write!(
                    f,
                    "Maximum number of steps reached: {} steps at t={}",
                    steps, t
                )
            }
            SolverError::StepSizeTooSmall { t, dt, steps } => {
                write!(
                    f,
                    "Step size too small: dt={:e} at t={} after {} steps",
                    dt, t, steps
                )
            }
            SolverError::SingularSystem { t } => {
                write!(f, "Singular implicit stage system at t={}", t)
            }
            SolverError::Decomposition(msg) => write!(f, "Decomposition failed: {}", msg),
        }
    }
}

impl std::error::Error for SolverError {}

impl SolverError {
    /// Last time reached before the failure, when known.
    pub fn last_time(&self) -> Option<f64> {
        match self {
            SolverError::MaxStepsReached { t, .. }
            | SolverError::StepSizeTooSmall { t, .. }
            | SolverError::SingularSystem { t } => Some(*t),
            SolverError::Decomposition(_) => None,
        }
    }
}
