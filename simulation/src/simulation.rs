use brickfem::assembly::{assemble_applied_forces, assemble_mass_matrix, assemble_par};
use brickfem::element::EvaluationRequest;
use brickfem::error::ConfigurationError;
use brickfem::minres::PreconditionerKind;
use brickfem::nalgebra::{DVector, Vector3};
use brickfem::nalgebra_sparse::CsrMatrix;
use brickfem::{Brick9Element, ElementHandle, Material, MaterialHandle, Mesh, NodeHandle};
use coarse_prof::profile;
use dynamics::integrators::{
    compute_initial_acceleration, hht_step, ConvergenceMode, HhtSettings, HhtWorkspace, StepResult, StepStatus,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;

use crate::error::SimulationError;
use crate::fe_system::FiniteElementDynamicSystem;
use crate::linear_solver::LinearSolver;
use crate::settings::{LinearSolverSettings, SimulationSettings, StaticSolverSettings};
use crate::static_solver::{self, StaticSolveResult};

/// Counters accumulated over the lifetime of a [`Simulation`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatistics {
    pub static_solves: usize,
    pub static_iterations: usize,
    pub dynamic_steps: usize,
    pub failed_steps: usize,
    pub hht_iterations: usize,
    pub linear_solves: usize,
    pub linear_iterations: usize,
    pub unconverged_linear_solves: usize,
}

/// State that only exists once the mesh has been set up.
#[derive(Debug)]
struct SolverState {
    mass_matrix: CsrMatrix<f64>,
    /// Acceleration of the free DOFs. Recomputed from the equations of motion when absent.
    acceleration: Option<DVector<f64>>,
    hht_workspace: HhtWorkspace<f64>,
}

/// A structural simulation of a mesh of 9-node bricks.
///
/// The simulation owns its mesh and all solver state, so any number of simulations can
/// coexist. The mesh is built through the `add_*` methods, after which [`setup_initial`]
/// fixes the DOF layout. Static solves and dynamic steps then update the nodal state in place.
///
/// [`setup_initial`]: Simulation::setup_initial
#[derive(Debug)]
pub struct Simulation {
    mesh: Mesh,
    settings: SimulationSettings,
    linear_solver: LinearSolver,
    solver_state: Option<SolverState>,
    time: f64,
    statistics: SimulationStatistics,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        let settings = SimulationSettings::default();
        Self {
            mesh: Mesh::new(),
            linear_solver: LinearSolver::new(settings.linear_solver),
            settings,
            solver_state: None,
            time: 0.0,
            statistics: SimulationStatistics::default(),
        }
    }

    pub fn with_settings(settings: SimulationSettings) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        Ok(Self {
            mesh: Mesh::new(),
            linear_solver: LinearSolver::new(settings.linear_solver),
            settings,
            solver_state: None,
            time: 0.0,
            statistics: SimulationStatistics::default(),
        })
    }

    pub fn add_node(&mut self, position: Vector3<f64>, fixed: bool) -> Result<NodeHandle, ConfigurationError> {
        self.mesh.add_node(position, fixed)
    }

    pub fn add_curvature_node(&mut self) -> Result<NodeHandle, ConfigurationError> {
        self.mesh.add_curvature_node()
    }

    pub fn add_material(&mut self, material: Material) -> Result<MaterialHandle, ConfigurationError> {
        self.mesh.add_material(material)
    }

    pub fn add_element(&mut self, element: Brick9Element) -> Result<ElementHandle, ConfigurationError> {
        self.mesh.add_element(element)
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn mesh_mut(&mut self) -> &mut Mesh {
        &mut self.mesh
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn gravity(&self) -> Vector3<f64> {
        self.settings.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vector3<f64>) -> Result<(), ConfigurationError> {
        if !gravity.iter().all(|g| g.is_finite()) {
            return Err(ConfigurationError::InvalidSettings("gravity must be finite".to_string()));
        }
        self.settings.gravity = gravity;
        Ok(())
    }

    /// Applies gravity to all elements, not only those that compute their own gravitational load.
    pub fn set_automatic_gravity(&mut self, enabled: bool) {
        self.mesh.set_automatic_gravity(enabled);
    }

    /// Assigns DOFs, computes the reference geometry of all elements and assembles the mass matrix.
    pub fn setup_initial(&mut self) -> Result<(), SimulationError> {
        profile!("setup initial");
        self.mesh.setup_initial()?;
        let mass_matrix = assemble_mass_matrix(&self.mesh)?;
        info!(
            "Set up mesh with {} nodes, {} elements and {} free DOFs ({} non-zeros in the system matrix).",
            self.mesh.num_nodes(),
            self.mesh.num_elements(),
            self.mesh.num_free_dofs(),
            mass_matrix.nnz()
        );
        self.solver_state = Some(SolverState {
            mass_matrix,
            acceleration: None,
            hht_workspace: HhtWorkspace::default(),
        });
        Ok(())
    }

    pub fn is_set_up(&self) -> bool {
        self.solver_state.is_some()
    }

    /// Configures MINRES and the static force tolerance.
    ///
    /// `force_tolerance` is the absolute tolerance on the force residual of the static Newton
    /// iteration. MINRES keeps its relative tolerance from the current linear solver settings.
    pub fn set_linear_solver_options(
        &mut self,
        preconditioner: bool,
        max_iterations: usize,
        force_tolerance: f64,
    ) -> Result<(), ConfigurationError> {
        let preconditioner = if preconditioner {
            PreconditionerKind::Diagonal
        } else {
            PreconditionerKind::Identity
        };
        let linear_settings = self
            .settings
            .linear_solver
            .set_preconditioner(preconditioner)
            .set_max_iterations(Some(max_iterations));
        let static_settings = self.settings.static_solver.set_force_tolerance(force_tolerance);
        linear_settings.validate()?;
        static_settings.validate()?;
        self.set_linear_solver_settings(linear_settings)?;
        self.settings.static_solver = static_settings;
        Ok(())
    }

    pub fn set_linear_solver_settings(&mut self, settings: LinearSolverSettings) -> Result<(), ConfigurationError> {
        settings.validate()?;
        self.linear_solver.set_settings(settings);
        self.settings.linear_solver = settings;
        Ok(())
    }

    pub fn set_static_solver_settings(&mut self, settings: StaticSolverSettings) -> Result<(), ConfigurationError> {
        settings.validate()?;
        self.settings.static_solver = settings;
        Ok(())
    }

    pub fn set_integrator_options(
        &mut self,
        alpha: f64,
        max_iterations: usize,
        (abs_tolerance_position, abs_tolerance_velocity): (f64, f64),
        mode: ConvergenceMode,
        scaling: bool,
    ) -> Result<(), ConfigurationError> {
        let settings = HhtSettings::default()
            .set_alpha(alpha)
            .set_max_iterations(max_iterations)
            .set_abs_tolerances(abs_tolerance_position, abs_tolerance_velocity)
            .set_mode(mode)
            .set_scaling(scaling);
        self.set_integrator_settings(settings)
    }

    pub fn set_integrator_settings(&mut self, settings: HhtSettings<f64>) -> Result<(), ConfigurationError> {
        settings
            .validate()
            .map_err(|err| ConfigurationError::InvalidSettings(err.to_string()))?;
        self.settings.integrator = settings;
        Ok(())
    }

    /// Solves for static equilibrium under the nodal forces and gravity.
    ///
    /// The positions of the mesh are updated in place. Velocities are not modified.
    pub fn solve_static_nonlinear(&mut self, max_newton_iterations: usize) -> Result<StaticSolveResult, SimulationError> {
        let applied_forces = assemble_applied_forces(&self.mesh, &self.settings.gravity)?;
        let settings = self.settings.static_solver.set_max_iterations(max_newton_iterations);
        let result =
            static_solver::solve_static_nonlinear(&mut self.mesh, &applied_forces, &settings, &mut self.linear_solver)?;

        self.statistics.static_solves += 1;
        self.statistics.static_iterations += result.iterations;
        // The positions changed, so the stored acceleration no longer satisfies the equations of motion
        if let Some(solver_state) = self.solver_state.as_mut() {
            solver_state.acceleration = None;
        }
        Ok(result)
    }

    /// Advances the simulation by `dt` with the HHT-alpha integrator.
    ///
    /// A converged step commits positions, velocities and material states and advances the
    /// time. A failed step, or a step that returns an error, leaves the state of the mesh and the
    /// time unchanged. A zero time step does nothing.
    pub fn step_dynamics(&mut self, dt: f64) -> Result<StepResult<f64>, SimulationError> {
        let num_dofs = self.mesh.require_dof_map("stepping the dynamics")?.num_free_dofs();
        if !(dt >= 0.0 && dt.is_finite()) {
            return Err(ConfigurationError::InvalidSettings(format!(
                "time step must be non-negative and finite, got {}",
                dt
            ))
            .into());
        }
        if dt == 0.0 {
            return Ok(StepResult {
                status: StepStatus::Converged,
                iterations: 0,
                position_increment: 0.0,
                linear_solver_failures: 0,
            });
        }

        profile!("step dynamics");
        let applied_forces = assemble_applied_forces(&self.mesh, &self.settings.gravity)?;
        let mut u = DVector::zeros(num_dofs);
        let mut v = DVector::zeros(num_dofs);
        self.mesh.gather_positions_into(u.as_view_mut())?;
        self.mesh.gather_velocities_into(v.as_view_mut())?;
        let (u0, v0) = (u.clone(), v.clone());
        let t0 = self.time;

        let solver_state = self
            .solver_state
            .as_mut()
            .ok_or(ConfigurationError::NotSetUp("stepping the dynamics"))?;
        let outcome = {
            let SolverState {
                mass_matrix,
                acceleration,
                hht_workspace,
            } = solver_state;
            let mut system =
                FiniteElementDynamicSystem::new(&mut self.mesh, mass_matrix, &applied_forces, &mut self.linear_solver);
            hht_step_from_state(
                &mut system,
                &mut u,
                &mut v,
                acceleration,
                t0,
                dt,
                &self.settings.integrator,
                hht_workspace,
            )
        };

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.restore_state(&u0, &v0)?;
                return Err(SimulationError::from_boxed(err));
            }
        };

        match result.status {
            StepStatus::Converged => {
                self.mesh.scatter_positions(u.as_view())?;
                self.mesh.scatter_velocities(v.as_view())?;
                if let Err(err) = self.commit_material_states() {
                    self.restore_state(&u0, &v0)?;
                    return Err(err);
                }
                self.time += dt;
                self.statistics.dynamic_steps += 1;
                info!(
                    "HHT step to t = {:.6} converged in {} iterations (position increment {:e}).",
                    self.time, result.iterations, result.position_increment
                );
            }
            StepStatus::Failed => {
                self.restore_state(&u0, &v0)?;
                self.statistics.failed_steps += 1;
                warn!(
                    "HHT step from t = {:.6} with dt = {:e} failed after {} iterations.",
                    t0, dt, result.iterations
                );
            }
        }
        self.statistics.hht_iterations += result.iterations;
        Ok(result)
    }

    pub fn current_time(&self) -> f64 {
        self.time
    }

    pub fn node_position(&self, handle: NodeHandle) -> Result<Vector3<f64>, ConfigurationError> {
        Ok(self.mesh.position_node(handle)?.position)
    }

    pub fn node_velocity(&self, handle: NodeHandle) -> Result<Vector3<f64>, ConfigurationError> {
        Ok(self.mesh.position_node(handle)?.velocity)
    }

    /// Lumped mass of a position node. Zero before setup.
    pub fn node_mass(&self, handle: NodeHandle) -> Result<f64, ConfigurationError> {
        Ok(self.mesh.position_node(handle)?.mass)
    }

    pub fn set_node_force(&mut self, handle: NodeHandle, force: Vector3<f64>) -> Result<(), ConfigurationError> {
        self.mesh.set_node_force(handle, force)
    }

    pub fn statistics(&self) -> SimulationStatistics {
        let linear = self.linear_solver.statistics();
        SimulationStatistics {
            linear_solves: linear.num_solves,
            linear_iterations: linear.num_iterations,
            unconverged_linear_solves: linear.num_unconverged,
            ..self.statistics
        }
    }

    fn restore_state(&mut self, u: &DVector<f64>, v: &DVector<f64>) -> Result<(), ConfigurationError> {
        self.mesh.scatter_positions(u.as_view())?;
        self.mesh.scatter_velocities(v.as_view())
    }

    fn commit_material_states(&mut self) -> Result<(), SimulationError> {
        let has_plasticity = self
            .mesh
            .elements()
            .iter()
            .any(|element| element.settings().plasticity.is_some());
        if has_plasticity {
            let evaluation = assemble_par(&self.mesh, EvaluationRequest::force_only())?;
            debug!("Committing material states ({} plastic points).", evaluation.num_plastic_points);
            self.mesh.commit_material_states(&evaluation.material_states);
        }
        Ok(())
    }
}

/// Performs an HHT step, first computing the acceleration from the equations of motion if
/// none is available.
fn hht_step_from_state(
    system: &mut FiniteElementDynamicSystem,
    u: &mut DVector<f64>,
    v: &mut DVector<f64>,
    acceleration: &mut Option<DVector<f64>>,
    t0: f64,
    dt: f64,
    settings: &HhtSettings<f64>,
    workspace: &mut HhtWorkspace<f64>,
) -> Result<StepResult<f64>, Box<dyn Error>> {
    if acceleration.is_none() {
        let mut a = DVector::zeros(u.len());
        compute_initial_acceleration(system, t0, u.as_view(), v.as_view(), &mut a)?;
        debug!("Initial acceleration has norm {:e}.", a.norm());
        *acceleration = Some(a);
    }
    let a = acceleration.get_or_insert_with(|| DVector::zeros(u.len()));
    hht_step(system, u, v, a, t0, dt, settings, workspace)
}
