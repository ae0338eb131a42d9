use brickfem::error::LinearSolverError;
use brickfem::minres::{Minres, MinresOutput, MinresStatus, MinresWorkspace, SystemPreconditioner};
use brickfem::nalgebra::DVector;
use brickfem::nalgebra_sparse::CsrMatrix;
use coarse_prof::profile;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::settings::LinearSolverSettings;

/// Accumulated statistics of the linear solves performed by a [`LinearSolver`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearSolverStatistics {
    pub num_solves: usize,
    pub num_iterations: usize,
    pub num_unconverged: usize,
}

/// Preconditioned MINRES solver for the symmetric systems of the Newton iterations.
///
/// The preconditioner is rebuilt from the system matrix before every solve, and the
/// workspace is reused across solves.
#[derive(Debug)]
pub struct LinearSolver {
    settings: LinearSolverSettings,
    preconditioner: Box<dyn SystemPreconditioner>,
    workspace: MinresWorkspace,
    statistics: LinearSolverStatistics,
}

impl Default for LinearSolver {
    fn default() -> Self {
        Self::new(LinearSolverSettings::default())
    }
}

impl LinearSolver {
    pub fn new(settings: LinearSolverSettings) -> Self {
        Self {
            preconditioner: settings.preconditioner.build(),
            settings,
            workspace: MinresWorkspace::default(),
            statistics: LinearSolverStatistics::default(),
        }
    }

    pub fn settings(&self) -> &LinearSolverSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: LinearSolverSettings) {
        if settings.preconditioner != self.settings.preconditioner {
            self.preconditioner = settings.preconditioner.build();
        }
        self.settings = settings;
    }

    pub fn statistics(&self) -> &LinearSolverStatistics {
        &self.statistics
    }

    /// Solves `matrix * solution = rhs`, using the contents of `solution` as initial guess.
    ///
    /// Reaching the iteration cap is not an error: the best iterate is returned and the
    /// status of the output reports the outcome.
    pub fn solve(
        &mut self,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
        solution: &mut DVector<f64>,
    ) -> Result<MinresOutput, LinearSolverError> {
        profile!("linear solve");
        {
            profile!("update preconditioner");
            self.preconditioner.update(matrix)?;
        }

        let minres = Minres::with_workspace(&mut self.workspace)
            .with_operator(matrix)
            .with_system_preconditioner(self.preconditioner.as_ref())
            .with_tolerance(self.settings.tolerance);
        let minres = match self.settings.max_iterations {
            Some(max_iter) => minres.with_max_iter(max_iter),
            None => minres,
        };
        let output = {
            profile!("minres");
            minres.solve_with_guess(rhs, solution)?
        };

        self.statistics.num_solves += 1;
        self.statistics.num_iterations += output.num_iterations;
        match output.status {
            MinresStatus::Converged => {
                debug!(
                    "MINRES converged in {} iterations (residual {:e}).",
                    output.num_iterations, output.residual_norm
                );
            }
            MinresStatus::MaxIterationsReached => {
                self.statistics.num_unconverged += 1;
                warn!(
                    "MINRES reached maximum number of iterations ({}), residual {:e}.",
                    output.num_iterations, output.residual_norm
                );
            }
            MinresStatus::Breakdown => {
                self.statistics.num_unconverged += 1;
                warn!(
                    "MINRES broke down after {} iterations, residual {:e}.",
                    output.num_iterations, output.residual_norm
                );
            }
        }
        Ok(output)
    }
}
