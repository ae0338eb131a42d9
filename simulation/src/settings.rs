//! Solver settings of the simulation context.
//!
//! All settings have defaults and builder-style setters, and can be deserialized from
//! partial JSON objects.

use brickfem::error::ConfigurationError;
use brickfem::minres::PreconditionerKind;
use brickfem::nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub use dynamics::integrators::{ConvergenceMode, HhtSettings};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearSolverSettings {
    pub preconditioner: PreconditionerKind,
    /// Iteration cap of MINRES. `None` uses twice the system dimension.
    pub max_iterations: Option<usize>,
    /// Relative tolerance of MINRES: a solve converges once `|b - A x| <= tolerance * |b|`.
    pub tolerance: f64,
}

impl Default for LinearSolverSettings {
    fn default() -> Self {
        Self {
            preconditioner: PreconditionerKind::Diagonal,
            max_iterations: Some(300),
            tolerance: 1e-8,
        }
    }
}

impl LinearSolverSettings {
    pub fn set_preconditioner(mut self, preconditioner: PreconditionerKind) -> Self {
        self.preconditioner = preconditioner;
        self
    }

    pub fn set_max_iterations(mut self, max_iterations: Option<usize>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn set_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_iterations == Some(0) {
            return Err(ConfigurationError::InvalidSettings(
                "linear solver needs at least one iteration".to_string(),
            ));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(ConfigurationError::InvalidSettings(format!(
                "linear solver tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticSolverSettings {
    /// Newton iterations per load increment.
    pub max_iterations: usize,
    /// Absolute tolerance on the norm of the force residual.
    pub force_tolerance: f64,
    /// Tolerance on the force residual relative to the norm of the applied load. An increment
    /// converges when either tolerance is met, which keeps stiff systems from stalling at the
    /// round-off level of the internal forces. Zero disables the relative test.
    pub relative_force_tolerance: f64,
    /// Number of equal increments over which the applied load is ramped up.
    pub load_increments: usize,
    /// Number of consecutive non-converged linear solves without residual decrease after
    /// which the Newton iteration gives up.
    pub linear_failure_limit: usize,
}

impl Default for StaticSolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            force_tolerance: 1e-9,
            relative_force_tolerance: 1e-8,
            load_increments: 1,
            linear_failure_limit: 5,
        }
    }
}

impl StaticSolverSettings {
    pub fn set_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn set_force_tolerance(mut self, force_tolerance: f64) -> Self {
        self.force_tolerance = force_tolerance;
        self
    }

    pub fn set_relative_force_tolerance(mut self, relative_force_tolerance: f64) -> Self {
        self.relative_force_tolerance = relative_force_tolerance;
        self
    }

    pub fn set_load_increments(mut self, load_increments: usize) -> Self {
        self.load_increments = load_increments;
        self
    }

    pub fn set_linear_failure_limit(mut self, linear_failure_limit: usize) -> Self {
        self.linear_failure_limit = linear_failure_limit;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.force_tolerance > 0.0 && self.force_tolerance.is_finite()) {
            return Err(ConfigurationError::InvalidSettings(format!(
                "force tolerance must be positive, got {}",
                self.force_tolerance
            )));
        }
        if !(self.relative_force_tolerance >= 0.0 && self.relative_force_tolerance.is_finite()) {
            return Err(ConfigurationError::InvalidSettings(format!(
                "relative force tolerance must be non-negative, got {}",
                self.relative_force_tolerance
            )));
        }
        if self.load_increments == 0 {
            return Err(ConfigurationError::InvalidSettings(
                "at least one load increment is required".to_string(),
            ));
        }
        if self.linear_failure_limit == 0 {
            return Err(ConfigurationError::InvalidSettings(
                "linear failure limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub gravity: Vector3<f64>,
    pub linear_solver: LinearSolverSettings,
    pub static_solver: StaticSolverSettings,
    pub integrator: HhtSettings<f64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            gravity: Vector3::new(0.0, 0.0, -9.81),
            linear_solver: LinearSolverSettings::default(),
            static_solver: StaticSolverSettings::default(),
            integrator: HhtSettings::default(),
        }
    }
}

impl SimulationSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(ConfigurationError::InvalidSettings("gravity must be finite".to_string()));
        }
        self.linear_solver.validate()?;
        self.static_solver.validate()?;
        self.integrator
            .validate()
            .map_err(|err| ConfigurationError::InvalidSettings(err.to_string()))
    }
}
