use brickfem::error::{ConfigurationError, GeometryError, LinearSolverError, MeshError};
use std::error::Error;
use thiserror::Error;

/// Errors returned by the simulation context.
///
/// Convergence outcomes are not errors. They are reported through the status of the
/// returned solve or step results.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    LinearSolver(#[from] LinearSolverError),
    #[error("time integration failed: {0}")]
    Integrator(String),
}

impl From<MeshError> for SimulationError {
    fn from(error: MeshError) -> Self {
        match error {
            MeshError::Configuration(error) => SimulationError::Configuration(error),
            MeshError::Geometry(error) => SimulationError::Geometry(error),
        }
    }
}

impl SimulationError {
    /// Recovers the typed error from an error that crossed the `dynamics` trait boundary.
    pub(crate) fn from_boxed(error: Box<dyn Error>) -> Self {
        match error.downcast::<SimulationError>() {
            Ok(error) => *error,
            Err(error) => SimulationError::Integrator(error.to_string()),
        }
    }
}
