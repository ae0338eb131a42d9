//! Newton's method for the nonlinear static equilibrium `F_int(x) = F_ext`.

use brickfem::assembly::assemble_par;
use brickfem::element::EvaluationRequest;
use brickfem::error::{LinearSolverError, MeshError};
use brickfem::nalgebra::DVector;
use brickfem::Mesh;
use coarse_prof::profile;
use dynamics::dynamic_system::LinearFailureTracker;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::linear_solver::LinearSolver;
use crate::settings::StaticSolverSettings;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaticSolveStatus {
    Converged,
    /// The iteration cap was reached. The mesh holds the last iterate.
    MaxIterReached,
    /// The iteration could not make progress. The mesh holds the last finite iterate.
    ConvergenceFailure,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticSolveResult {
    pub status: StaticSolveStatus,
    /// Total number of Newton updates over all load increments.
    pub iterations: usize,
    /// Norm of the last evaluated force residual.
    pub residual_norm: f64,
    /// Residual norm of every evaluation, in order.
    pub residual_history: Vec<f64>,
}

impl StaticSolveResult {
    pub fn converged(&self) -> bool {
        self.status == StaticSolveStatus::Converged
    }
}

/// Solves for the static equilibrium of the mesh under the applied forces.
///
/// The applied forces are ramped up over `settings.load_increments` equal increments, and each
/// increment may use up to `settings.max_iterations` full Newton steps. The residual is checked
/// before every step, so a mesh that is already in equilibrium converges with zero iterations.
/// An increment converges once the residual norm drops below `settings.force_tolerance` or below
/// `settings.relative_force_tolerance` times the norm of the current load. Material states are
/// committed at the end of every converged increment, so later increments start from the
/// plastic state reached by the earlier ones.
///
/// A geometry error during assembly restores the last accepted positions before it is
/// returned.
pub fn solve_static_nonlinear(
    mesh: &mut Mesh,
    applied_forces: &DVector<f64>,
    settings: &StaticSolverSettings,
    linear_solver: &mut LinearSolver,
) -> Result<StaticSolveResult, SimulationError> {
    profile!("static newton");
    settings.validate()?;
    let n = mesh.require_dof_map("solving for static equilibrium")?.num_free_dofs();
    if applied_forces.len() != n {
        return Err(LinearSolverError::DimensionMismatch {
            operator: n,
            vector: applied_forces.len(),
        }
        .into());
    }

    let mut x = DVector::zeros(n);
    mesh.gather_positions_into(x.as_view_mut())?;
    let mut x_accepted = x.clone();
    let mut delta = DVector::zeros(n);
    let mut load = DVector::zeros(n);
    let mut residual_history = Vec::new();
    let mut iterations = 0;

    let result = |status: StaticSolveStatus, residual_history: Vec<f64>, iterations: usize| StaticSolveResult {
        status,
        iterations,
        residual_norm: residual_history.last().copied().unwrap_or(0.0),
        residual_history,
    };

    let num_increments = settings.load_increments;
    for increment in 1..=num_increments {
        let load_factor = increment as f64 / num_increments as f64;
        load.copy_from(applied_forces);
        load *= load_factor;
        if num_increments > 1 {
            info!("Load increment {}/{} (factor {:.3})", increment, num_increments, load_factor);
        }

        let tolerance = settings.force_tolerance.max(settings.relative_force_tolerance * load.norm());
        let mut failure_tracker = LinearFailureTracker::new(settings.linear_failure_limit);
        let mut previous_norm = f64::INFINITY;
        let mut increment_iterations = 0;
        loop {
            let evaluation = match assemble_par(mesh, EvaluationRequest::static_tangent()) {
                Ok(evaluation) => evaluation,
                Err(err) => {
                    if let MeshError::Geometry(_) = &err {
                        mesh.scatter_positions(x_accepted.as_view())?;
                    }
                    return Err(err.into());
                }
            };

            let residual = &load - &evaluation.internal_force;
            let residual_norm = residual.norm();
            residual_history.push(residual_norm);
            debug!("Newton iteration {}: residual norm {:e}", increment_iterations, residual_norm);

            if !residual_norm.is_finite() {
                warn!("Non-finite residual in static solve, restoring the last accepted iterate.");
                mesh.scatter_positions(x_accepted.as_view())?;
                return Ok(result(StaticSolveStatus::ConvergenceFailure, residual_history, iterations));
            }
            x_accepted.copy_from(&x);

            if residual_norm < tolerance {
                info!(
                    "Static solve converged in {} iterations (residual {:e}).",
                    increment_iterations, residual_norm
                );
                mesh.commit_material_states(&evaluation.material_states);
                if increment == num_increments {
                    return Ok(result(StaticSolveStatus::Converged, residual_history, iterations));
                }
                break;
            }

            if increment_iterations == settings.max_iterations {
                warn!(
                    "Static solve reached the maximum number of iterations ({}), residual {:e}.",
                    settings.max_iterations, residual_norm
                );
                return Ok(result(StaticSolveStatus::MaxIterReached, residual_history, iterations));
            }

            let stiffness = evaluation
                .stiffness
                .as_ref()
                .expect("Stiffness matrix is always assembled for the static tangent");
            delta.fill(0.0);
            let output = linear_solver.solve(stiffness, &residual, &mut delta)?;
            let residual_decreased = residual_norm < previous_norm;
            if failure_tracker.record(output.converged(), residual_decreased) {
                warn!(
                    "Static solve gave up after {} non-converged linear solves without progress.",
                    settings.linear_failure_limit
                );
                return Ok(result(StaticSolveStatus::ConvergenceFailure, residual_history, iterations));
            }

            if !delta.iter().all(|d| d.is_finite()) {
                warn!("Non-finite Newton update in static solve, discarding it.");
                return Ok(result(StaticSolveStatus::ConvergenceFailure, residual_history, iterations));
            }

            x += &delta;
            mesh.scatter_positions(x.as_view())?;
            previous_norm = residual_norm;
            increment_iterations += 1;
            iterations += 1;
            info!(
                "Newton iteration {}: residual {:e}, update {:e}, {} linear iterations",
                increment_iterations,
                residual_norm,
                delta.norm(),
                output.num_iterations
            );
        }
    }

    // Only reachable without load increments, which the settings validation rules out
    Ok(result(StaticSolveStatus::Converged, residual_history, iterations))
}
