use coarse_prof::profile;
use log::{debug, warn};
use nalgebra::{DVector, DVectorView, DVectorViewMut, RealField};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::error::Error;

use crate::dynamic_system::{DifferentiableDynamicSystem, DynamicSystem, LinearFailureTracker, LinearSolveStatus};

/// Which Newton increments are tested for convergence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceMode {
    /// Only the position increment must drop below its tolerance.
    Position,
    /// Both the position and the velocity increments must drop below their tolerances.
    PositionVelocity,
}

impl Default for ConvergenceMode {
    fn default() -> Self {
        ConvergenceMode::Position
    }
}

/// Settings of the Hilber-Hughes-Taylor (HHT-alpha) integrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HhtSettings<T> {
    /// Numerical damping parameter in `[-1/3, 0]`. Zero gives the trapezoidal rule.
    pub alpha: T,
    pub max_iterations: usize,
    /// Absolute tolerance for the Euclidean norm of the position increment of a Newton iteration.
    pub abs_tolerance_position: T,
    /// Absolute tolerance for the Euclidean norm of the velocity increment of a Newton iteration.
    pub abs_tolerance_velocity: T,
    pub mode: ConvergenceMode,
    /// Divide the Newton system by `(1 + alpha) beta h^2`, so that the operator has units of stiffness.
    pub scaling: bool,
    /// Number of consecutive non-converged linear solves without a decrease of the position
    /// increment after which the step is rejected.
    #[serde(default = "default_linear_failure_limit")]
    pub linear_failure_limit: usize,
}

fn default_linear_failure_limit() -> usize {
    3
}

impl Default for HhtSettings<f64> {
    fn default() -> Self {
        Self {
            alpha: -0.2,
            max_iterations: 6,
            abs_tolerance_position: 1e-6,
            abs_tolerance_velocity: 1e-1,
            mode: ConvergenceMode::default(),
            scaling: false,
            linear_failure_limit: default_linear_failure_limit(),
        }
    }
}

impl<T: RealField + Copy> HhtSettings<T> {
    pub fn set_alpha(mut self, alpha: T) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn set_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn set_abs_tolerances(mut self, position: T, velocity: T) -> Self {
        self.abs_tolerance_position = position;
        self.abs_tolerance_velocity = velocity;
        self
    }

    pub fn set_mode(mut self, mode: ConvergenceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn set_scaling(mut self, scaling: bool) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn set_linear_failure_limit(mut self, linear_failure_limit: usize) -> Self {
        self.linear_failure_limit = linear_failure_limit;
        self
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        if !(self.alpha >= -1.0 / 3.0 && self.alpha <= 0.0) {
            return Err(format!("HHT alpha must lie in [-1/3, 0], got {}", self.alpha).into());
        }
        if self.max_iterations == 0 {
            return Err("HHT integrator needs at least one Newton iteration".into());
        }
        if self.linear_failure_limit == 0 {
            return Err("HHT linear failure limit must be positive".into());
        }
        let tolerances_valid = self.abs_tolerance_position > 0.0 && self.abs_tolerance_velocity > 0.0;
        if !tolerances_valid {
            return Err(format!(
                "HHT tolerances must be positive, got ({}, {})",
                self.abs_tolerance_position, self.abs_tolerance_velocity
            )
            .into());
        }
        Ok(())
    }

    /// The Newmark parameters `(gamma, beta)` associated with `alpha`.
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn newmark_parameters(&self) -> (T, T) {
        let gamma = (1.0 - 2.0 * self.alpha) / 2.0;
        let beta = (1.0 - self.alpha) * (1.0 - self.alpha) / 4.0;
        (gamma, beta)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// The state was advanced to the end of the step.
    Converged,
    /// Newton did not converge. The state was left untouched.
    Failed,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult<T> {
    pub status: StepStatus,
    pub iterations: usize,
    /// Norm of the position increment of the last Newton iteration.
    pub position_increment: T,
    /// Number of inner linear solves that stopped before reaching their tolerance.
    pub linear_solver_failures: usize,
}

impl<T> StepResult<T> {
    pub fn converged(&self) -> bool {
        self.status == StepStatus::Converged
    }
}

/// Reusable storage for `hht_step`.
#[derive(Clone, Debug)]
pub struct HhtWorkspace<T: RealField> {
    u_pred: DVector<T>,
    v_pred: DVector<T>,
    a_next: DVector<T>,
    u_next: DVector<T>,
    v_next: DVector<T>,
    f: DVector<T>,
    f_prev: DVector<T>,
    residual: DVector<T>,
    increment: DVector<T>,
}

impl<T: RealField> Default for HhtWorkspace<T> {
    fn default() -> Self {
        Self {
            u_pred: DVector::zeros(0),
            v_pred: DVector::zeros(0),
            a_next: DVector::zeros(0),
            u_next: DVector::zeros(0),
            v_next: DVector::zeros(0),
            f: DVector::zeros(0),
            f_prev: DVector::zeros(0),
            residual: DVector::zeros(0),
            increment: DVector::zeros(0),
        }
    }
}

impl<T: RealField> HhtWorkspace<T> {
    fn resize(&mut self, dim: usize) {
        for vector in [
            &mut self.u_pred,
            &mut self.v_pred,
            &mut self.a_next,
            &mut self.u_next,
            &mut self.v_next,
            &mut self.f,
            &mut self.f_prev,
            &mut self.residual,
            &mut self.increment,
        ] {
            if vector.len() != dim {
                *vector = DVector::zeros(dim);
            }
        }
    }
}

/// Computes the acceleration consistent with the initial state by solving `M a = f(t, u, v)`.
pub fn compute_initial_acceleration<'a, T, S>(
    system: &mut S,
    t0: T,
    u: DVectorView<T>,
    v: DVectorView<T>,
    a: impl Into<DVectorViewMut<'a, T>>,
) -> Result<(), Box<dyn Error>>
where
    T: RealField + Copy,
    S: DynamicSystem<T>,
{
    let mut f = DVector::zeros(u.len());
    system.eval_f(f.as_view_mut(), t0, u, v)?;
    system.apply_inverse_mass_matrix(a.into(), f.as_view())
}

#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
fn hht_step_<T, S>(
    system: &mut S,
    mut u: DVectorViewMut<T>,
    mut v: DVectorViewMut<T>,
    mut a: DVectorViewMut<T>,
    t0: T,
    dt: T,
    settings: &HhtSettings<T>,
    workspace: &mut HhtWorkspace<T>,
) -> Result<StepResult<T>, Box<dyn Error>>
where
    T: RealField + Copy,
    S: DifferentiableDynamicSystem<T>,
{
    settings.validate()?;
    if dt == 0.0 {
        return Ok(StepResult {
            status: StepStatus::Converged,
            iterations: 0,
            position_increment: 0.0,
            linear_solver_failures: 0,
        });
    }
    if !(dt > 0.0) || !dt.is_finite() {
        return Err(format!("time step must be non-negative and finite, got {}", dt).into());
    }
    let dim = u.len();
    if v.len() != dim || a.len() != dim {
        return Err("position, velocity and acceleration vectors must have the same length".into());
    }

    profile!("hht step");
    let alpha = settings.alpha;
    let (gamma, beta) = settings.newmark_parameters();
    let h = dt;
    let t1 = t0 + dt;
    let position_factor = beta * h * h;
    let velocity_factor = gamma * h;
    let scale = if settings.scaling {
        (1.0 + alpha) * position_factor
    } else {
        1.0
    };

    workspace.resize(dim);
    let HhtWorkspace {
        u_pred,
        v_pred,
        a_next,
        u_next,
        v_next,
        f,
        f_prev,
        residual,
        increment,
    } = workspace;

    // f_prev <- f(t^n, u^n, v^n)
    system.eval_f(f_prev.as_view_mut(), t0, u.as_view(), v.as_view())?;

    // Newmark predictors, so that u^{n+1} = u_pred + beta h^2 a^{n+1}, v^{n+1} = v_pred + gamma h a^{n+1}
    u_pred.copy_from(&u);
    u_pred.axpy(h, &v, 1.0);
    u_pred.axpy(h * h * (0.5 - beta), &a, 1.0);
    v_pred.copy_from(&v);
    v_pred.axpy(h * (1.0 - gamma), &a, 1.0);
    a_next.copy_from(&a);

    let mut linear_solver_failures = 0;
    let mut failure_tracker = LinearFailureTracker::new(settings.linear_failure_limit);
    let mut position_increment = 0.0;
    let mut previous_position_increment: Option<T> = None;
    for iteration in 1..=settings.max_iterations {
        u_next.copy_from(&*u_pred);
        u_next.axpy(position_factor, &*a_next, 1.0);
        v_next.copy_from(&*v_pred);
        v_next.axpy(velocity_factor, &*a_next, 1.0);

        // G(a) = M a - (1 + alpha) f(t^{n+1}, u^{n+1}, v^{n+1}) + alpha f(t^n, u^n, v^n)
        system.eval_f(f.as_view_mut(), t1, u_next.as_view(), v_next.as_view())?;
        residual.copy_from(&*f_prev);
        *residual *= alpha;
        residual.axpy(-(1.0 + alpha), &*f, 1.0);
        system.apply_mass_matrix(residual.as_view_mut(), a_next.as_view())?;
        *residual *= -1.0;

        // dG/da = M - (1 + alpha) (beta h^2 df/du + gamma h df/dv)
        system.set_state(t1, u_next.as_view(), v_next.as_view())?;
        system.init_solve_jacobian_combination(
            Some(-(1.0 + alpha) * position_factor / scale),
            Some(-(1.0 + alpha) * velocity_factor / scale),
            Some(1.0 / scale),
        )?;
        increment.fill(0.0);
        let status = {
            profile!("hht linear solve");
            system.solve_jacobian_combination(increment.as_view_mut(), residual.as_view())?
        };
        let linear_converged = status == LinearSolveStatus::Converged;
        if !linear_converged {
            linear_solver_failures += 1;
            debug!("HHT iteration {}: linear solve did not converge", iteration);
        }
        // The scaled system is solved for scale * da
        *increment /= scale;
        *a_next += &*increment;
        u_next.axpy(position_factor, &*increment, 1.0);
        v_next.axpy(velocity_factor, &*increment, 1.0);

        let increment_norm = increment.norm();
        position_increment = position_factor * increment_norm;
        let velocity_increment = velocity_factor * increment_norm;
        debug!(
            "HHT iteration {}: |du| = {}, |dv| = {}",
            iteration, position_increment, velocity_increment
        );

        if !position_increment.is_finite() || !a_next.iter().all(|a_i| a_i.is_finite()) {
            warn!("HHT step at t = {} produced non-finite values, step rejected", t0);
            return Ok(StepResult {
                status: StepStatus::Failed,
                iterations: iteration,
                position_increment,
                linear_solver_failures,
            });
        }

        let position_converged = position_increment < settings.abs_tolerance_position;
        let velocity_converged = velocity_increment < settings.abs_tolerance_velocity;
        let converged = match settings.mode {
            ConvergenceMode::Position => position_converged,
            ConvergenceMode::PositionVelocity => position_converged && velocity_converged,
        };

        if converged {
            u.copy_from(&*u_next);
            v.copy_from(&*v_next);
            a.copy_from(&*a_next);
            return Ok(StepResult {
                status: StepStatus::Converged,
                iterations: iteration,
                position_increment,
                linear_solver_failures,
            });
        }

        let made_progress = previous_position_increment.map_or(true, |previous| position_increment < previous);
        previous_position_increment = Some(position_increment);
        if failure_tracker.record(linear_converged, made_progress) {
            warn!(
                "HHT step at t = {} rejected after {} non-converged linear solves without progress",
                t0, settings.linear_failure_limit
            );
            return Ok(StepResult {
                status: StepStatus::Failed,
                iterations: iteration,
                position_increment,
                linear_solver_failures,
            });
        }
    }

    warn!(
        "HHT step at t = {} did not converge in {} iterations (|du| = {})",
        t0, settings.max_iterations, position_increment
    );
    Ok(StepResult {
        status: StepStatus::Failed,
        iterations: settings.max_iterations,
        position_increment,
        linear_solver_failures,
    })
}

/// Performs one step of the HHT-alpha integrator on the provided dynamic system.
///
/// The unknown of the Newton iteration is the acceleration at the end of the step. On
/// convergence `u`, `v` and `a` hold the state at `t0 + dt`, otherwise they are left unchanged.
/// A zero time step is a no-op.
pub fn hht_step<'a, 'b, 'c, T, S>(
    system: &mut S,
    u: impl Into<DVectorViewMut<'a, T>>,
    v: impl Into<DVectorViewMut<'b, T>>,
    a: impl Into<DVectorViewMut<'c, T>>,
    t0: T,
    dt: T,
    settings: &HhtSettings<T>,
    workspace: &mut HhtWorkspace<T>,
) -> Result<StepResult<T>, Box<dyn Error>>
where
    T: RealField + Copy,
    S: DifferentiableDynamicSystem<T>,
{
    hht_step_(system, u.into(), v.into(), a.into(), t0, dt, settings, workspace)
}
