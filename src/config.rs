//! TOML-backed engine configuration.
//!
//! Every field has a default, so an empty string parses to a usable
//! serial configuration. Unknown solver method names are rejected at
//! load time rather than at the first solve.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::FemError;
use crate::solver::{BackwardEuler, LinearSolverKind, NewtonConfig};

/// Main engine configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub solver: SolverSection,
    #[serde(default)]
    pub parallel: ParallelSection,
    #[serde(default)]
    pub transient: TransientSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolverSection {
    /// Linear backend: "direct" or "cg"
    #[serde(default = "default_method")]
    pub method: String,
    /// Newton iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Relative residual tolerance
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Absolute residual floor
    #[serde(default = "default_abs_tolerance")]
    pub abs_tolerance: f64,
    /// Residual growth factor that trips divergence detection
    #[serde(default = "default_divergence_factor")]
    pub divergence_factor: f64,
    /// Inner linear solve iteration cap (iterative backend)
    #[serde(default = "default_linear_max_iterations")]
    pub linear_max_iterations: usize,
    /// Inner linear solve tolerance (iterative backend)
    #[serde(default = "default_linear_tolerance")]
    pub linear_tolerance: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParallelSection {
    /// Partition count; 1 runs serially without channel collectives
    #[serde(default = "default_num_partitions")]
    pub num_partitions: usize,
    /// Bound on every collective operation
    #[serde(default = "default_collective_timeout_ms")]
    pub collective_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransientSection {
    /// Step size for time marching
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Steps to march; 0 keeps the analysis static
    #[serde(default)]
    pub num_steps: usize,
}

fn default_method() -> String {
    "direct".to_string()
}
fn default_max_iterations() -> usize {
    25
}
fn default_tolerance() -> f64 {
    1e-8
}
fn default_abs_tolerance() -> f64 {
    1e-12
}
fn default_divergence_factor() -> f64 {
    1e6
}
fn default_linear_max_iterations() -> usize {
    2000
}
fn default_linear_tolerance() -> f64 {
    1e-12
}
fn default_num_partitions() -> usize {
    1
}
fn default_collective_timeout_ms() -> u64 {
    5000
}
fn default_dt() -> f64 {
    0.1
}

impl Default for SolverSection {
    fn default() -> Self {
        Self {
            method: default_method(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            abs_tolerance: default_abs_tolerance(),
            divergence_factor: default_divergence_factor(),
            linear_max_iterations: default_linear_max_iterations(),
            linear_tolerance: default_linear_tolerance(),
        }
    }
}

impl Default for ParallelSection {
    fn default() -> Self {
        Self {
            num_partitions: default_num_partitions(),
            collective_timeout_ms: default_collective_timeout_ms(),
        }
    }
}

impl Default for TransientSection {
    fn default() -> Self {
        Self { dt: default_dt(), num_steps: 0 }
    }
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FemError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| FemError::Config(format!("failed to read config file: {}", e)))?;
        Self::from_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, FemError> {
        let config: EngineConfig = toml::from_str(contents)
            .map_err(|e| FemError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FemError> {
        if self.parallel.num_partitions == 0 {
            return Err(FemError::Config("num_partitions must be at least 1".to_string()));
        }
        if self.parallel.collective_timeout_ms == 0 {
            return Err(FemError::Config("collective_timeout_ms must be positive".to_string()));
        }
        if self.solver.tolerance <= 0.0 {
            return Err(FemError::Config("tolerance must be positive".to_string()));
        }
        if self.solver.divergence_factor <= 1.0 {
            return Err(FemError::Config("divergence_factor must exceed 1".to_string()));
        }
        if self.transient.dt <= 0.0 {
            return Err(FemError::Config("transient dt must be positive".to_string()));
        }
        self.linear_solver_kind()?;
        Ok(())
    }

    fn linear_solver_kind(&self) -> Result<LinearSolverKind, FemError> {
        match self.solver.method.as_str() {
            "direct" => Ok(LinearSolverKind::Direct),
            "cg" => Ok(LinearSolverKind::ConjugateGradient),
            other => Err(FemError::Config(format!("unknown solver method '{}'", other))),
        }
    }

    /// Translate the solver section into Newton parameters
    pub fn newton_config(&self) -> Result<NewtonConfig, FemError> {
        Ok(NewtonConfig {
            max_iterations: self.solver.max_iterations,
            tolerance: self.solver.tolerance,
            abs_tolerance: self.solver.abs_tolerance,
            divergence_factor: self.solver.divergence_factor,
            linear_solver: self.linear_solver_kind()?,
            linear_max_iterations: self.solver.linear_max_iterations,
            linear_tolerance: self.solver.linear_tolerance,
        })
    }

    /// Translate the transient section into an integrator.
    ///
    /// Validation guarantees a positive step size, so the constructor
    /// assertion cannot fire here.
    pub fn backward_euler(&self) -> Result<BackwardEuler, FemError> {
        Ok(BackwardEuler::new(self.transient.dt).with_config(self.newton_config()?))
    }
}
