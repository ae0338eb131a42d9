#![allow(clippy::too_many_arguments)]

//! Simulation context for meshes of 9-node large-deformation bricks.
//!
//! Ties the mesh and element layer of `brickfem` to the nonlinear static solver and the
//! HHT-alpha time integrator of `dynamics`.

pub mod error;
pub mod fe_system;
pub mod linear_solver;
pub mod settings;
pub mod simulation;
pub mod static_solver;

pub use error::SimulationError;
pub use simulation::{Simulation, SimulationStatistics};
pub use static_solver::{StaticSolveResult, StaticSolveStatus};

pub use brickfem;
pub use dynamics;
