use nalgebra::{DVectorView, DVectorViewMut, Scalar};
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Outcome of an inner linear solve.
///
/// Iterative solvers may stop before reaching their tolerance. The integrators accept the
/// best available solution in that case and decide convergence on the outer iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolveStatus {
    Converged,
    NotConverged,
}

/// Tracks consecutive inner linear solves that neither converged nor let the outer iteration
/// make progress.
#[derive(Clone, Debug)]
pub struct LinearFailureTracker {
    limit: usize,
    consecutive_failures: usize,
}

impl LinearFailureTracker {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            consecutive_failures: 0,
        }
    }

    /// Records the outcome of a linear solve. Returns `true` once `limit` consecutive solves
    /// failed without progress, in which case the outer iteration should give up.
    pub fn record(&mut self, linear_converged: bool, made_progress: bool) -> bool {
        if linear_converged || made_progress {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
        self.consecutive_failures >= self.limit
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures
    }
}

/// An abstract dynamic system represented by a second-order ODE.
///
/// A dynamic system is represented by the second-order system of ODEs
///
/// ```ignore
///    M dv/dt = f(t, u, v),
///      du/dt = v.
/// ```
///
/// where M is constant.
pub trait DynamicSystem<T: Scalar> {
    /// Apply the mass matrix `M` to the vector `x` and accumulate the result in `y`,
    /// yielding `y = y + Mx`.
    fn apply_mass_matrix(&mut self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>>;

    /// Solve `M sol = rhs`.
    fn apply_inverse_mass_matrix(&mut self, sol: DVectorViewMut<T>, rhs: DVectorView<T>) -> Result<(), Box<dyn Error>>;

    /// Evaluate `f(t, u, v)` and store the result in `f`.
    fn eval_f(&mut self, f: DVectorViewMut<T>, t: T, u: DVectorView<T>, v: DVectorView<T>) -> Result<(), Box<dyn Error>>;
}

/// An abstract dynamic system that allows for differentiation of the functions involved.
///
/// This enables implicit integrators to work with an abstract representation of the dynamic
/// system.
pub trait DifferentiableDynamicSystem<T: Scalar>: DynamicSystem<T> {
    /// Internally stores the state, pre-computes stiffness matrix, etc. for calls to Jacobian combination functions
    fn set_state(&mut self, t: T, u: DVectorView<T>, v: DVectorView<T>) -> Result<(), Box<dyn Error>>;

    /// Prepares the operator `H = gamma * M + alpha * df/du + beta * df/dv` for subsequent
    /// calls to `solve_jacobian_combination`.
    ///
    /// Coefficients that are `None` are treated as zero, except for `gamma`, which defaults to one.
    fn init_solve_jacobian_combination(
        &mut self,
        alpha: Option<T>,
        beta: Option<T>,
        gamma: Option<T>,
    ) -> Result<(), Box<dyn Error>>;

    /// Solve a system consisting of linear combinations of Jacobians.
    ///
    /// Specifically, solve a linear system
    ///
    /// ```ignore
    /// H x = rhs,
    /// ```
    ///
    /// where `H` is the combination set up by `init_solve_jacobian_combination`,
    /// evaluated at the state that was set using `set_state`. The contents of `sol` are used
    /// as initial guess by iterative solvers.
    fn solve_jacobian_combination(
        &mut self,
        sol: DVectorViewMut<T>,
        rhs: DVectorView<T>,
    ) -> Result<LinearSolveStatus, Box<dyn Error>>;
}
