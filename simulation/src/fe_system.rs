use brickfem::assembly::assemble_par;
use brickfem::element::EvaluationRequest;
use brickfem::error::LinearSolverError;
use brickfem::nalgebra::{DVector, DVectorView, DVectorViewMut};
use brickfem::nalgebra_sparse::CsrMatrix;
use brickfem::sparse::{csr_linear_combination, spmv_csr_par};
use brickfem::Mesh;
use coarse_prof::profile;
use dynamics::dynamic_system::{DifferentiableDynamicSystem, DynamicSystem, LinearSolveStatus};
use log::warn;
use std::error::Error;

use crate::error::SimulationError;
use crate::linear_solver::LinearSolver;

#[derive(Clone, Debug, PartialEq)]
struct State {
    t: f64,
    u: DVector<f64>,
    v: DVector<f64>,
}

#[derive(Debug)]
struct Tangent {
    state: State,
    stiffness: CsrMatrix<f64>,
    damping: CsrMatrix<f64>,
}

/// The second-order system `M dv/dt = F_applied - F_int(u, v)`, `du/dt = v` of a mesh,
/// restricted to its free DOFs.
///
/// Positions and velocities passed to the system are written to the mesh nodes before the
/// elements are evaluated. The applied forces are constant over a step.
#[derive(Debug)]
pub struct FiniteElementDynamicSystem<'a> {
    mesh: &'a mut Mesh,
    mass_matrix: &'a CsrMatrix<f64>,
    applied_forces: &'a DVector<f64>,
    linear_solver: &'a mut LinearSolver,
    state: Option<State>,
    /// Tangent matrices of the most recent element evaluation.
    tangent: Option<Tangent>,
    jacobian_combination: Option<CsrMatrix<f64>>,
    alpha: Option<f64>,
    beta: Option<f64>,
    gamma: Option<f64>,
    tangent_outdated: bool,
    jacobian_combination_outdated: bool,
}

impl<'a> FiniteElementDynamicSystem<'a> {
    pub fn new(
        mesh: &'a mut Mesh,
        mass_matrix: &'a CsrMatrix<f64>,
        applied_forces: &'a DVector<f64>,
        linear_solver: &'a mut LinearSolver,
    ) -> Self {
        Self {
            mesh,
            mass_matrix,
            applied_forces,
            linear_solver,
            state: None,
            tangent: None,
            jacobian_combination: None,
            alpha: None,
            beta: None,
            gamma: None,
            tangent_outdated: true,
            jacobian_combination_outdated: true,
        }
    }

    fn check_dimension(&self, len: usize) -> Result<(), SimulationError> {
        let n = self.mass_matrix.nrows();
        if len != n {
            return Err(LinearSolverError::DimensionMismatch {
                operator: n,
                vector: len,
            }
            .into());
        }
        Ok(())
    }

    fn scatter_state(&mut self, u: DVectorView<f64>, v: DVectorView<f64>) -> Result<(), SimulationError> {
        self.mesh.scatter_positions(u)?;
        self.mesh.scatter_velocities(v)?;
        Ok(())
    }

    fn update_tangent(&mut self) -> Result<(), SimulationError> {
        let state = self
            .state
            .clone()
            .ok_or_else(|| SimulationError::Integrator("state must be set before solving".to_string()))?;
        self.scatter_state(state.u.as_view(), state.v.as_view())?;
        let evaluation = assemble_par(&*self.mesh, EvaluationRequest::dynamic_tangent())?;
        self.store_tangent(state, evaluation.stiffness, evaluation.damping);
        Ok(())
    }

    fn store_tangent(&mut self, state: State, stiffness: Option<CsrMatrix<f64>>, damping: Option<CsrMatrix<f64>>) {
        if let (Some(stiffness), Some(damping)) = (stiffness, damping) {
            self.tangent = Some(Tangent {
                state,
                stiffness,
                damping,
            });
        }
    }

    fn solve_mass_system(
        &mut self,
        mut sol: DVectorViewMut<f64>,
        rhs: DVectorView<f64>,
    ) -> Result<(), SimulationError> {
        self.check_dimension(rhs.len())?;
        // TODO: Avoid copies once the linear solver accepts views
        let rhs = rhs.clone_owned();
        let mut solution = DVector::zeros(rhs.len());
        let output = self.linear_solver.solve(self.mass_matrix, &rhs, &mut solution)?;
        if !output.converged() {
            warn!("Mass matrix solve did not converge, using the best available iterate.");
        }
        sol.copy_from(&solution);
        Ok(())
    }

    fn solve_combination(
        &mut self,
        mut sol: DVectorViewMut<f64>,
        rhs: DVectorView<f64>,
    ) -> Result<LinearSolveStatus, SimulationError> {
        profile!("solve jacobian combination");
        self.check_dimension(rhs.len())?;

        if self.jacobian_combination_outdated || self.jacobian_combination.is_none() {
            if self.tangent_outdated || self.tangent.is_none() {
                profile!("assemble tangent");
                self.update_tangent()?;
                self.tangent_outdated = false;
            }
            let tangent = self
                .tangent
                .as_ref()
                .ok_or_else(|| SimulationError::Integrator("tangent matrices are unavailable".to_string()))?;
            // df/du = -K and df/dv = -C
            let combination = csr_linear_combination(
                self.mass_matrix.pattern(),
                vec![
                    (self.gamma.unwrap_or(1.0), self.mass_matrix),
                    (-self.alpha.unwrap_or(0.0), &tangent.stiffness),
                    (-self.beta.unwrap_or(0.0), &tangent.damping),
                ],
            );
            self.jacobian_combination = Some(combination);
            self.jacobian_combination_outdated = false;
        }

        let matrix = self
            .jacobian_combination
            .as_ref()
            .ok_or_else(|| SimulationError::Integrator("Jacobian combination is unavailable".to_string()))?;
        let rhs = rhs.clone_owned();
        let mut solution = sol.clone_owned();
        let output = self.linear_solver.solve(matrix, &rhs, &mut solution)?;
        sol.copy_from(&solution);

        if output.converged() {
            Ok(LinearSolveStatus::Converged)
        } else {
            Ok(LinearSolveStatus::NotConverged)
        }
    }
}

impl<'a> DynamicSystem<f64> for FiniteElementDynamicSystem<'a> {
    fn apply_mass_matrix(&mut self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        profile!("apply mass");
        let mut mx = DVector::zeros(self.mass_matrix.nrows());
        spmv_csr_par(mx.as_view_mut(), self.mass_matrix, x).map_err(SimulationError::from)?;
        y += &mx;
        Ok(())
    }

    fn apply_inverse_mass_matrix(&mut self, sol: DVectorViewMut<f64>, rhs: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        profile!("apply inverse mass");
        Ok(self.solve_mass_system(sol, rhs)?)
    }

    fn eval_f(
        &mut self,
        mut f: DVectorViewMut<f64>,
        t: f64,
        u: DVectorView<f64>,
        v: DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        profile!("eval f");
        self.check_dimension(f.len())?;
        self.scatter_state(u, v)?;
        let evaluation =
            assemble_par(&*self.mesh, EvaluationRequest::dynamic_tangent()).map_err(SimulationError::from)?;

        // f = F_applied - F_int, where F_int includes the damping forces
        f.copy_from(self.applied_forces);
        f -= &evaluation.internal_force;

        // The tangent at this state is reused if the integrator subsequently linearizes here
        let state = State {
            t,
            u: u.clone_owned(),
            v: v.clone_owned(),
        };
        self.store_tangent(state, evaluation.stiffness, evaluation.damping);
        self.tangent_outdated = self.state.as_ref() != self.tangent.as_ref().map(|tangent| &tangent.state);
        self.jacobian_combination_outdated = true;
        Ok(())
    }
}

impl<'a> DifferentiableDynamicSystem<f64> for FiniteElementDynamicSystem<'a> {
    fn set_state(&mut self, t: f64, u: DVectorView<f64>, v: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        let state = State {
            t,
            u: u.clone_owned(),
            v: v.clone_owned(),
        };
        self.tangent_outdated = self.tangent.as_ref().map(|tangent| &tangent.state) != Some(&state);
        self.state = Some(state);
        self.jacobian_combination_outdated = true;
        Ok(())
    }

    fn init_solve_jacobian_combination(
        &mut self,
        alpha: Option<f64>,
        beta: Option<f64>,
        gamma: Option<f64>,
    ) -> Result<(), Box<dyn Error>> {
        self.alpha = alpha;
        self.beta = beta;
        self.gamma = gamma;
        self.jacobian_combination_outdated = true;
        Ok(())
    }

    fn solve_jacobian_combination(
        &mut self,
        sol: DVectorViewMut<f64>,
        rhs: DVectorView<f64>,
    ) -> Result<LinearSolveStatus, Box<dyn Error>> {
        Ok(self.solve_combination(sol, rhs)?)
    }
}
