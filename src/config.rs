// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration.
//!
//! There is no process-wide state: callers build one [`Config`], derive
//! [`Options`](crate::options::Options) from it and pass those to every
//! entry point.
//!
//! Configuration is loaded from multiple sources with the following priority
//! (later sources override earlier ones):
//!
//! 1. Built-in defaults
//! 2. dynamics.yaml file
//! 3. Environment variables (QUBITOS_DYN_*)

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Batch execution settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Default tolerances for adaptive solvers
    #[serde(default)]
    pub tolerances: ToleranceConfig,
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = config_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                config = serde_yaml::from_str(&content)?;
            }
        } else {
            for path in &["dynamics.yaml", "dynamics.yml"] {
                let path = Path::new(path);
                if path.exists() {
                    let content = std::fs::read_to_string(path)?;
                    config = serde_yaml::from_str(&content)?;
                    break;
                }
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("QUBITOS_DYN_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("QUBITOS_DYN_LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("QUBITOS_DYN_PARALLEL") {
            self.runtime.parallel = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("QUBITOS_DYN_NUM_THREADS") {
            if let Ok(n) = val.parse() {
                self.runtime.num_threads = Some(n);
            }
        }
        if let Ok(val) = env::var("QUBITOS_DYN_RTOL") {
            if let Ok(x) = val.parse() {
                self.tolerances.rtol = x;
            }
        }
        if let Ok(val) = env::var("QUBITOS_DYN_ATOL") {
            if let Ok(x) = val.parse() {
                self.tolerances.atol = x;
            }
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerances.rtol > 0.0) || !(self.tolerances.atol > 0.0) {
            return Err(Error::Config(format!(
                "tolerances must be positive (rtol={}, atol={})",
                self.tolerances.rtol, self.tolerances.atol
            )));
        }
        if self.runtime.num_threads == Some(0) {
            return Err(Error::Config("num_threads cannot be 0".into()));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(Error::Config(format!(
                "unknown log format '{}' (expected json or pretty)",
                self.logging.format
            )));
        }
        if self.tolerances.rtol < 1e-13 {
            tracing::warn!(
                rtol = self.tolerances.rtol,
                "rtol is below double precision resolution; adaptive steps may underflow"
            );
        }
        if !self.runtime.parallel && self.runtime.num_threads.is_some() {
            tracing::warn!("num_threads is ignored when parallel execution is disabled");
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Batch execution configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Map independent batch elements on a thread pool
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Dedicated pool size; the global pool is used when unset
    #[serde(default)]
    pub num_threads: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            num_threads: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Default adaptive tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToleranceConfig {
    /// Relative tolerance
    #[serde(default = "default_rtol")]
    pub rtol: f64,

    /// Absolute tolerance
    #[serde(default = "default_atol")]
    pub atol: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            rtol: default_rtol(),
            atol: default_atol(),
        }
    }
}

fn default_rtol() -> f64 {
    1e-6
}

fn default_atol() -> f64 {
    1e-8
}

/// Install a global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once is harmless.
pub fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let _ = if config.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
}
