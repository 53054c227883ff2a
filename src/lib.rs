// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! QubitOS Dynamics
//!
//! Batched, differentiable time-stepping integrators for closed and open
//! quantum systems: the Schrödinger equation, the Lindblad master
//! equation, the diffusive stochastic master equation, Monte-Carlo quantum
//! jumps and Floquet analysis of periodic drives.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  apis: sesolve  mesolve  sepropagator  dsmesolve        │
//! │        mcsolve  floquet                                 │
//! ├──────────────────────────┬──────────────────────────────┤
//! │  batching (rayon)        │  result assembly             │
//! ├──────────────────────────┴──────────────────────────────┤
//! │  integrators: stepping loop, tableaus, Kvaerno3,        │
//! │  Expm, Euler-Maruyama, quantum jumps, save policy,      │
//! │  gradient strategies                                    │
//! ├─────────────────────────────────────────────────────────┤
//! │  equations: SE / ME / DSME / MC generators              │
//! ├──────────────────────────┬──────────────────────────────┤
//! │  time_array              │  linalg (ndarray, nalgebra)  │
//! └──────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`apis`]: Entry points
//! - [`time_array`]: Time-dependent operators
//! - [`integrators`]: Single-trajectory step methods
//! - [`equations`]: Vector fields of the supported equations
//! - [`solver`], [`gradient`], [`options`]: Call configuration
//! - [`config`]: Configuration file and logging
//! - [`error`]: Error types

pub mod apis;
pub mod batching;
pub mod config;
pub mod equations;
pub mod error;
pub mod gradient;
pub mod integrators;
pub mod linalg;
pub mod operators;
pub mod options;
pub mod result;
pub mod solver;
pub mod time_array;

pub use apis::{dsmesolve, floquet, mcsolve, mesolve, sepropagator, sesolve};
pub use config::Config;
pub use error::{Error, Result};
pub use gradient::{ExpectationLoss, Gradient, GradientSpec, Grads, Loss};
pub use options::Options;
pub use result::{DSMEResult, FloquetResult, MCResult, MEResult, PropagatorResult, SEResult, SolveResult};
pub use solver::Solver;
pub use time_array::TimeArray;

#[cfg(test)]
pub mod test_utils;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
