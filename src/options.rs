// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-call options.

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{Config, RuntimeConfig};

/// Extra quantity saved alongside the state at every save time.
pub type SaveExtraFn = Arc<dyn Fn(&Array2<Complex64>) -> Array1<Complex64> + Send + Sync>;

/// Progress reporting granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProgressMeter {
    /// No progress reporting
    #[default]
    Off,
    /// Log `updates` evenly spaced progress events at info level
    Tracing { updates: usize },
}

/// Options shared by all entry points.
#[derive(Clone)]
pub struct Options {
    /// Save the state at every save time, or only the final state
    pub save_states: bool,
    /// Optional extra quantity to save
    pub save_extra: Option<SaveExtraFn>,
    /// Cartesian (outer product) or flat (broadcast) batching
    pub cartesian_batching: bool,
    /// Progress reporting
    pub progress_meter: ProgressMeter,
    /// Start time; defaults to the first save time
    pub t0: Option<f64>,
    /// Batch execution settings
    pub runtime: RuntimeConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            save_states: true,
            save_extra: None,
            cartesian_batching: true,
            progress_meter: ProgressMeter::Off,
            t0: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Options {
    /// Defaults carrying the runtime settings of `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            runtime: config.runtime.clone(),
            ..Self::default()
        }
    }

    /// Start time for the given save times.
    pub fn start_time(&self, tsave: &[f64]) -> f64 {
        self.t0
            .unwrap_or_else(|| tsave.first().copied().unwrap_or(0.0))
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("save_states", &self.save_states)
            .field("save_extra", &self.save_extra.as_ref().map(|_| "<fn>"))
            .field("cartesian_batching", &self.cartesian_batching)
            .field("progress_meter", &self.progress_meter)
            .field("t0", &self.t0)
            .field("runtime", &self.runtime)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert!(options.save_states);
        assert!(options.cartesian_batching);
        assert_eq!(options.start_time(&[0.5, 1.0]), 0.5);
    }

    #[test]
    fn test_explicit_t0() {
        let options = Options {
            t0: Some(-1.0),
            ..Options::default()
        };
        assert_eq!(options.start_time(&[0.5, 1.0]), -1.0);
    }

    #[test]
    fn test_from_config_threads_runtime() {
        let mut config = Config::default();
        config.runtime.parallel = false;
        let options = Options::from_config(&config);
        assert!(!options.runtime.parallel);
        assert!(format!("{:?}", options).contains("save_extra: None"));
    }
}
