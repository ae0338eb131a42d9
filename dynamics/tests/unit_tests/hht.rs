use approx::assert_relative_eq;
use dynamics::dynamic_system::{DifferentiableDynamicSystem, DynamicSystem, LinearSolveStatus};
use dynamics::integrators::{
    compute_initial_acceleration, hht_step, ConvergenceMode, HhtSettings, HhtWorkspace, StepStatus,
};
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use std::error::Error;

use crate::assert_approx_matrix_eq;

/// Define the (mock) dynamic system
///  M dv/dt = f(t, u, v),
///    du/dt = v,
/// with
///  M = m * I
///  f(t, u, v) = b * ones - k * u - c * v
pub struct MockLinearSystem {
    m: f64,
    k: f64,
    c: f64,
    b: f64,
    combination: (f64, f64, f64),
}

impl MockLinearSystem {
    fn new(m: f64, k: f64, c: f64, b: f64) -> Self {
        Self {
            m,
            k,
            c,
            b,
            combination: (0.0, 0.0, 1.0),
        }
    }

    fn energy(&self, u: &DVector<f64>, v: &DVector<f64>) -> f64 {
        0.5 * self.m * v.norm_squared() + 0.5 * self.k * u.norm_squared()
    }
}

impl DynamicSystem<f64> for MockLinearSystem {
    fn apply_mass_matrix(&mut self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        y.axpy(self.m, &x, 1.0);
        Ok(())
    }

    fn apply_inverse_mass_matrix(
        &mut self,
        mut sol: DVectorViewMut<f64>,
        rhs: DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        sol.copy_from(&(rhs / self.m));
        Ok(())
    }

    fn eval_f(
        &mut self,
        mut f: DVectorViewMut<f64>,
        _t: f64,
        u: DVectorView<f64>,
        v: DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        f.fill(self.b);
        f.axpy(-self.k, &u, 1.0);
        f.axpy(-self.c, &v, 1.0);
        Ok(())
    }
}

impl DifferentiableDynamicSystem<f64> for MockLinearSystem {
    fn set_state(&mut self, _t: f64, _u: DVectorView<f64>, _v: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        Ok(())
    }

    fn init_solve_jacobian_combination(
        &mut self,
        alpha: Option<f64>,
        beta: Option<f64>,
        gamma: Option<f64>,
    ) -> Result<(), Box<dyn Error>> {
        self.combination = (alpha.unwrap_or(0.0), beta.unwrap_or(0.0), gamma.unwrap_or(1.0));
        Ok(())
    }

    fn solve_jacobian_combination(
        &mut self,
        mut sol: DVectorViewMut<f64>,
        rhs: DVectorView<f64>,
    ) -> Result<LinearSolveStatus, Box<dyn Error>> {
        // df/du = -k I, df/dv = -c I
        let (alpha, beta, gamma) = self.combination;
        let h = gamma * self.m - alpha * self.k - beta * self.c;
        sol.copy_from(&(rhs / h));
        Ok(LinearSolveStatus::Converged)
    }
}

/// Wraps a system whose linear solves never report convergence and whose solutions are
/// multiplied by `solution_factor`.
struct InexactLinearSolves {
    system: MockLinearSystem,
    solution_factor: f64,
}

impl DynamicSystem<f64> for InexactLinearSolves {
    fn apply_mass_matrix(&mut self, y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        self.system.apply_mass_matrix(y, x)
    }

    fn apply_inverse_mass_matrix(&mut self, sol: DVectorViewMut<f64>, rhs: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        self.system.apply_inverse_mass_matrix(sol, rhs)
    }

    fn eval_f(
        &mut self,
        f: DVectorViewMut<f64>,
        t: f64,
        u: DVectorView<f64>,
        v: DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        self.system.eval_f(f, t, u, v)
    }
}

impl DifferentiableDynamicSystem<f64> for InexactLinearSolves {
    fn set_state(&mut self, t: f64, u: DVectorView<f64>, v: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        self.system.set_state(t, u, v)
    }

    fn init_solve_jacobian_combination(
        &mut self,
        alpha: Option<f64>,
        beta: Option<f64>,
        gamma: Option<f64>,
    ) -> Result<(), Box<dyn Error>> {
        self.system.init_solve_jacobian_combination(alpha, beta, gamma)
    }

    fn solve_jacobian_combination(
        &mut self,
        mut sol: DVectorViewMut<f64>,
        rhs: DVectorView<f64>,
    ) -> Result<LinearSolveStatus, Box<dyn Error>> {
        self.system.solve_jacobian_combination(sol.as_view_mut(), rhs)?;
        sol *= self.solution_factor;
        Ok(LinearSolveStatus::NotConverged)
    }
}

fn initial_state() -> (DVector<f64>, DVector<f64>, DVector<f64>) {
    let u = DVector::from_column_slice(&[1.0, 2.0, -3.0]);
    let v = DVector::from_column_slice(&[4.0, -5.0, 6.0]);
    let a = DVector::from_column_slice(&[0.5, 1.0, -1.5]);
    (u, v, a)
}

#[test]
fn hht_step_matches_closed_form_for_linear_system() {
    let (m, k, c, b) = (2.0, 30.0, 0.5, 3.0);
    let mut system = MockLinearSystem::new(m, k, c, b);
    let settings = HhtSettings::default().set_alpha(-0.2).set_max_iterations(10);
    let (gamma, beta) = settings.newmark_parameters();
    let alpha = settings.alpha;
    let h = 0.1;

    let (mut u, mut v, mut a) = initial_state();
    let (u_expected, v_expected, a_expected) = {
        let ones = DVector::repeat(3, 1.0);
        let f_n = &ones * b - &u * k - &v * c;
        let u_p = &u + &v * h + &a * (h * h * (0.5 - beta));
        let v_p = &v + &a * (h * (1.0 - gamma));
        let f_p = &ones * b - &u_p * k - &v_p * c;
        let denominator = m + (1.0 + alpha) * (k * beta * h * h + c * gamma * h);
        let a_next = (f_p * (1.0 + alpha) - f_n * alpha) / denominator;
        let u_next = &u_p + &a_next * (beta * h * h);
        let v_next = &v_p + &a_next * (gamma * h);
        (u_next, v_next, a_next)
    };

    let mut workspace = HhtWorkspace::default();
    let result = hht_step(&mut system, &mut u, &mut v, &mut a, 0.0, h, &settings, &mut workspace).unwrap();

    assert_eq!(result.status, StepStatus::Converged);
    // The first Newton iteration solves the linear problem exactly, the second one confirms it
    assert_eq!(result.iterations, 2);
    assert_approx_matrix_eq!(&a, &a_expected, abstol = 1e-10);
    assert_approx_matrix_eq!(&u, &u_expected, abstol = 1e-12);
    assert_approx_matrix_eq!(&v, &v_expected, abstol = 1e-12);
}

#[test]
fn zero_time_step_is_a_no_op() {
    let mut system = MockLinearSystem::new(1.0, 10.0, 0.0, 1.0);
    let (mut u, mut v, mut a) = initial_state();
    let (u0, v0, a0) = initial_state();

    let mut workspace = HhtWorkspace::default();
    let result = hht_step(
        &mut system,
        &mut u,
        &mut v,
        &mut a,
        0.0,
        0.0,
        &HhtSettings::default(),
        &mut workspace,
    )
    .unwrap();
    assert_eq!(result.status, StepStatus::Converged);
    assert_eq!(result.iterations, 0);
    assert_eq!((u, v, a), (u0, v0, a0));
}

#[test]
fn failed_step_leaves_state_untouched() {
    let mut system = MockLinearSystem::new(1.0, 100.0, 0.0, 0.0);
    let settings = HhtSettings::default().set_max_iterations(1);
    let (mut u, mut v, mut a) = initial_state();
    let (u0, v0, a0) = initial_state();

    let mut workspace = HhtWorkspace::default();
    let result = hht_step(&mut system, &mut u, &mut v, &mut a, 0.0, 0.1, &settings, &mut workspace).unwrap();
    assert_eq!(result.status, StepStatus::Failed);
    assert!(!result.converged());
    assert_eq!((u, v, a), (u0, v0, a0));
}

#[test]
fn scaled_and_unscaled_newton_systems_agree() {
    let run = |scaling: bool| {
        let mut system = MockLinearSystem::new(1.5, 40.0, 0.2, -2.0);
        let settings = HhtSettings::default()
            .set_scaling(scaling)
            .set_mode(ConvergenceMode::PositionVelocity)
            .set_abs_tolerances(1e-10, 1e-8);
        let (mut u, mut v, mut a) = initial_state();
        let mut workspace = HhtWorkspace::default();
        for step in 0..5 {
            let t0 = step as f64 * 0.01;
            let result = hht_step(&mut system, &mut u, &mut v, &mut a, t0, 0.01, &settings, &mut workspace).unwrap();
            assert!(result.converged());
        }
        (u, v)
    };
    let (u_scaled, v_scaled) = run(true);
    let (u_unscaled, v_unscaled) = run(false);
    assert_approx_matrix_eq!(&u_scaled, &u_unscaled, abstol = 1e-10);
    assert_approx_matrix_eq!(&v_scaled, &v_unscaled, abstol = 1e-8);
}

#[test]
fn initial_acceleration_satisfies_equation_of_motion() {
    let (m, k, c, b) = (2.0, 10.0, 1.0, 4.0);
    let mut system = MockLinearSystem::new(m, k, c, b);
    let (u, v, _) = initial_state();
    let mut a = DVector::zeros(3);
    compute_initial_acceleration(&mut system, 0.0, u.as_view(), v.as_view(), &mut a).unwrap();

    let expected = (DVector::repeat(3, b) - &u * k - &v * c) / m;
    assert_approx_matrix_eq!(&a, &expected, abstol = 1e-12);
}

/// Integrates the undamped oscillator for a number of steps and returns the energy ratio.
fn oscillator_energy_ratio(alpha: f64, num_steps: usize) -> f64 {
    let mut system = MockLinearSystem::new(1.0, 100.0, 0.0, 0.0);
    let settings = HhtSettings::default()
        .set_alpha(alpha)
        .set_max_iterations(10)
        .set_abs_tolerances(1e-12, 1e-8);
    let (mut u, mut v, _) = initial_state();
    let mut a = DVector::zeros(3);
    compute_initial_acceleration(&mut system, 0.0, u.as_view(), v.as_view(), &mut a).unwrap();
    let initial_energy = system.energy(&u, &v);

    let dt = 0.05;
    let mut workspace = HhtWorkspace::default();
    for step in 0..num_steps {
        let result = hht_step(
            &mut system,
            &mut u,
            &mut v,
            &mut a,
            step as f64 * dt,
            dt,
            &settings,
            &mut workspace,
        )
        .unwrap();
        assert!(result.converged());
    }
    system.energy(&u, &v) / initial_energy
}

#[test]
fn trapezoidal_rule_conserves_energy_of_linear_oscillator() {
    assert_relative_eq!(oscillator_energy_ratio(0.0, 200), 1.0, max_relative = 1e-8);
}

#[test]
fn negative_alpha_dissipates_energy() {
    let ratio = oscillator_energy_ratio(-0.3, 200);
    assert!(ratio < 0.9);
    assert!(ratio > 0.0);
}

#[test]
fn diverging_inexact_linear_solves_fail_the_step() {
    // Overshooting by a factor of three doubles the Newton increment in every iteration
    let mut system = InexactLinearSolves {
        system: MockLinearSystem::new(2.0, 30.0, 0.5, 3.0),
        solution_factor: 3.0,
    };
    let settings = HhtSettings::default()
        .set_max_iterations(10)
        .set_linear_failure_limit(2);
    let (mut u, mut v, mut a) = initial_state();
    let (u0, v0, a0) = initial_state();

    let mut workspace = HhtWorkspace::default();
    let result = hht_step(&mut system, &mut u, &mut v, &mut a, 0.0, 0.1, &settings, &mut workspace).unwrap();
    assert_eq!(result.status, StepStatus::Failed);
    assert_eq!(result.iterations, 3);
    assert_eq!(result.linear_solver_failures, 3);
    assert_eq!((u, v, a), (u0, v0, a0));
}

#[test]
fn inexact_linear_solves_that_make_progress_are_accepted() {
    let mut system = InexactLinearSolves {
        system: MockLinearSystem::new(2.0, 30.0, 0.5, 3.0),
        solution_factor: 1.0,
    };
    let settings = HhtSettings::default()
        .set_max_iterations(10)
        .set_linear_failure_limit(1);
    let (mut u, mut v, mut a) = initial_state();

    let mut workspace = HhtWorkspace::default();
    let result = hht_step(&mut system, &mut u, &mut v, &mut a, 0.0, 0.1, &settings, &mut workspace).unwrap();
    assert_eq!(result.status, StepStatus::Converged);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.linear_solver_failures, 2);
}
