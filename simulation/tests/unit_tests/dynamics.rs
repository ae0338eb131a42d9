use simulation::brickfem::assembly::assemble_applied_forces;
use simulation::brickfem::element::Brick9Settings;
use simulation::brickfem::error::ConfigurationError;
use simulation::brickfem::nalgebra::Vector3;
use simulation::brickfem::solid::plasticity::PlasticityModel;
use simulation::brickfem::solid::MaterialPointState;
use simulation::brickfem::Material;
use simulation::settings::{ConvergenceMode, LinearSolverSettings};
use simulation::{Simulation, SimulationError};

use crate::utils::{free_positions, free_velocities, plate_simulation, total_energy, Plate};

fn set_up(mut plate: Plate) -> Plate {
    let simulation = &mut plate.simulation;
    simulation.set_automatic_gravity(true);
    simulation.setup_initial().unwrap();
    let linear_settings = LinearSolverSettings::default()
        .set_max_iterations(Some(1000))
        .set_tolerance(1e-10);
    simulation.set_linear_solver_settings(linear_settings).unwrap();
    plate
}

/// A plate hanging from a single corner node.
fn swinging_plate(alpha_damping: f64) -> Plate {
    set_up(plate_simulation(
        2,
        2,
        Vector3::new(0.5, 0.5, 0.02),
        Material::isotropic(500.0, 1e7, 0.3).unwrap(),
        Brick9Settings::default().set_alpha_damping(alpha_damping),
        |i, j, layer| i == 0 && j == 0 && layer == 0,
    ))
}

/// A plate clamped along `x = 0`, released from rest under gravity.
fn drooping_plate(alpha_damping: f64) -> Plate {
    set_up(plate_simulation(
        2,
        1,
        Vector3::new(0.5, 0.25, 0.02),
        Material::isotropic(500.0, 1e8, 0.3).unwrap(),
        Brick9Settings::default().set_alpha_damping(alpha_damping),
        |i, _, _| i == 0,
    ))
}

#[test]
fn zero_time_step_leaves_state_unchanged() {
    let Plate { mut simulation, .. } = swinging_plate(0.0);
    let x0 = free_positions(&simulation);
    let v0 = free_velocities(&simulation);

    let result = simulation.step_dynamics(0.0).unwrap();
    assert!(result.converged());
    assert_eq!(result.iterations, 0);
    assert_eq!(free_positions(&simulation), x0);
    assert_eq!(free_velocities(&simulation), v0);
    assert_eq!(simulation.current_time(), 0.0);
}

#[test]
fn invalid_time_steps_are_rejected() {
    let Plate { mut simulation, .. } = swinging_plate(0.0);
    for dt in [-1e-3, f64::NAN, f64::INFINITY] {
        match simulation.step_dynamics(dt) {
            Err(SimulationError::Configuration(ConfigurationError::InvalidSettings(_))) => {}
            other => panic!("expected invalid settings for dt = {}, got {:?}", dt, other),
        }
    }
    assert_eq!(simulation.current_time(), 0.0);
}

#[test]
fn stepping_requires_setup() {
    let plate = plate_simulation(
        1,
        1,
        Vector3::new(1.0, 1.0, 0.1),
        Material::isotropic(500.0, 1e7, 0.3).unwrap(),
        Brick9Settings::default(),
        |i, _, _| i == 0,
    );
    let mut simulation = plate.simulation;
    match simulation.step_dynamics(1e-3) {
        Err(SimulationError::Configuration(ConfigurationError::NotSetUp(_))) => {}
        other => panic!("expected a setup error, got {:?}", other),
    }
}

#[test]
fn failed_step_restores_state_and_time() {
    let Plate { mut simulation, .. } = swinging_plate(0.0);
    // A single Newton iteration can never meet a vanishing tolerance
    simulation
        .set_integrator_options(-0.2, 1, (1e-300, 1e-300), ConvergenceMode::Position, false)
        .unwrap();
    let x0 = free_positions(&simulation);
    let v0 = free_velocities(&simulation);

    let result = simulation.step_dynamics(5e-3).unwrap();
    assert!(!result.converged());
    assert_eq!(result.iterations, 1);
    assert_eq!(free_positions(&simulation), x0);
    assert_eq!(free_velocities(&simulation), v0);
    assert_eq!(simulation.current_time(), 0.0);
    assert_eq!(simulation.statistics().failed_steps, 1);
}

#[test]
fn swinging_plate_falls_and_energy_stays_bounded() {
    let Plate { mut simulation, tip } = swinging_plate(0.005);
    simulation
        .set_integrator_options(-0.2, 20, (1e-6, 1e-1), ConvergenceMode::Position, true)
        .unwrap();
    let x0 = free_positions(&simulation);
    let initial_energy = total_energy(&simulation, &x0);
    assert!(initial_energy.abs() < 1e-9);

    let dt = 5e-3;
    for step in 1..=20 {
        let result = simulation.step_dynamics(dt).unwrap();
        assert!(result.converged(), "step {} failed", step);
        assert!((simulation.current_time() - step as f64 * dt).abs() < 1e-12);

        // Gravity does positive work while the plate falls, and the integrator never creates energy
        let energy = total_energy(&simulation, &x0);
        let gravity_work = {
            let forces = assemble_applied_forces(simulation.mesh(), &simulation.gravity()).unwrap();
            forces.dot(&(free_positions(&simulation) - &x0))
        };
        assert!(gravity_work > 0.0);
        assert!(energy < 1e-2 * gravity_work, "step {}: energy {:e}", step, energy);
    }

    let tip_position = simulation.node_position(tip).unwrap();
    assert!(tip_position.iter().all(|x| x.is_finite()));
    assert!(tip_position.z < 0.02);
    assert!(simulation.node_velocity(tip).unwrap().z < 0.0);
    assert!(simulation.node_mass(tip).unwrap() > 0.0);
}

/// Total variation of the tip height over a number of steps.
fn tip_height_variation(alpha_damping: f64, num_steps: usize) -> f64 {
    let Plate { mut simulation, tip } = drooping_plate(alpha_damping);
    let mut previous_z = simulation.node_position(tip).unwrap().z;
    let mut variation = 0.0;
    for _ in 0..num_steps {
        assert!(simulation.step_dynamics(1e-2).unwrap().converged());
        let z = simulation.node_position(tip).unwrap().z;
        variation += (z - previous_z).abs();
        previous_z = z;
    }
    variation
}

#[test]
fn structural_damping_reduces_oscillation_amplitude() {
    let undamped = tip_height_variation(0.0, 30);
    let damped = tip_height_variation(0.1, 30);
    assert!(undamped > 0.0);
    assert!(damped < 0.75 * undamped, "damped {:e}, undamped {:e}", damped, undamped);
}

fn material_states(simulation: &Simulation) -> Vec<MaterialPointState<f64>> {
    simulation
        .mesh()
        .elements()
        .iter()
        .flat_map(|element| element.material_states().iter().copied())
        .collect()
}

#[test]
fn only_converged_steps_advance_plastic_states() {
    let mut plate = plate_simulation(
        2,
        1,
        Vector3::new(1.0, 0.5, 0.05),
        Material::isotropic(10.0, 1e7, 0.3).unwrap(),
        Brick9Settings::default()
            .set_hencky_strain(true)
            .set_plasticity(Some(PlasticityModel::J2 {
                yield_stress: 1000.0,
                hardening: 1e5,
            })),
        |i, _, _| i == 0,
    );
    let tip = plate.tip;
    let simulation = &mut plate.simulation;
    simulation.set_gravity(Vector3::zeros()).unwrap();
    simulation.setup_initial().unwrap();
    let linear_settings = LinearSolverSettings::default()
        .set_max_iterations(Some(1000))
        .set_tolerance(1e-10);
    simulation.set_linear_solver_settings(linear_settings).unwrap();
    simulation.set_linear_solver_options(true, 1000, 1e-6).unwrap();

    // Yield the clamped end statically, then triple the load
    simulation.set_node_force(tip, Vector3::new(0.0, 0.0, -0.6)).unwrap();
    assert!(simulation.solve_static_nonlinear(100).unwrap().converged());
    let yielded_states = material_states(simulation);
    assert!(yielded_states.iter().any(|state| state.accumulated_plastic_strain > 0.0));
    simulation.set_node_force(tip, Vector3::new(0.0, 0.0, -1.8)).unwrap();

    simulation
        .set_integrator_options(-0.2, 1, (1e-300, 1e-300), ConvergenceMode::Position, false)
        .unwrap();
    let result = simulation.step_dynamics(5e-2).unwrap();
    assert!(!result.converged());
    assert_eq!(material_states(simulation), yielded_states);

    simulation
        .set_integrator_options(-0.2, 20, (1e-6, 1e-1), ConvergenceMode::Position, true)
        .unwrap();
    let result = simulation.step_dynamics(5e-2).unwrap();
    assert!(result.converged());
    let states = material_states(simulation);
    assert_eq!(states.len(), yielded_states.len());
    for (state, yielded) in states.iter().zip(&yielded_states) {
        assert!(state.accumulated_plastic_strain >= yielded.accumulated_plastic_strain);
    }
    assert!(states
        .iter()
        .zip(&yielded_states)
        .any(|(state, yielded)| state.accumulated_plastic_strain > yielded.accumulated_plastic_strain));
}
