use simulation::brickfem::element::Brick9Settings;
use simulation::brickfem::error::{ConfigurationError, GeometryError};
use simulation::brickfem::nalgebra::Vector3;
use simulation::brickfem::solid::plasticity::PlasticityModel;
use simulation::brickfem::solid::MaterialPointState;
use simulation::brickfem::{Brick9Element, Material};
use simulation::settings::{LinearSolverSettings, StaticSolverSettings};
use simulation::{Simulation, SimulationError, StaticSolveStatus};

use crate::assert_approx_matrix_eq;
use crate::utils::{free_positions, plate_simulation, Plate};

fn cantilever(tip_force: f64) -> Plate {
    let mut plate = plate_simulation(
        2,
        1,
        Vector3::new(1.0, 0.5, 0.05),
        Material::isotropic(500.0, 2.1e8, 0.3).unwrap(),
        Brick9Settings::default(),
        |i, _, _| i == 0,
    );
    let simulation = &mut plate.simulation;
    simulation.set_gravity(Vector3::zeros()).unwrap();
    simulation.setup_initial().unwrap();
    let linear_settings = LinearSolverSettings::default()
        .set_max_iterations(Some(1000))
        .set_tolerance(1e-10);
    simulation.set_linear_solver_settings(linear_settings).unwrap();
    simulation
        .set_static_solver_settings(StaticSolverSettings::default().set_force_tolerance(1e-6))
        .unwrap();
    simulation
        .set_node_force(plate.tip, Vector3::new(0.0, 0.0, tip_force))
        .unwrap();
    plate
}

fn tip_deflection(tip_force: f64) -> f64 {
    let Plate { mut simulation, tip } = cantilever(tip_force);
    let result = simulation.solve_static_nonlinear(50).unwrap();
    assert_eq!(result.status, StaticSolveStatus::Converged);
    assert!(result.residual_norm < 1e-6);
    assert_eq!(result.residual_history.len(), result.iterations + 1);
    simulation.node_position(tip).unwrap().z - 0.05
}

#[test]
fn unloaded_plate_is_in_equilibrium() {
    let Plate { mut simulation, tip } = cantilever(0.0);
    let x0 = free_positions(&simulation);

    let result = simulation.solve_static_nonlinear(10).unwrap();
    assert_eq!(result.status, StaticSolveStatus::Converged);
    assert_eq!(result.iterations, 0);
    assert_eq!(free_positions(&simulation), x0);
    assert_eq!(simulation.node_position(tip).unwrap(), Vector3::new(1.0, 0.5, 0.05));
}

#[test]
fn cantilever_deflects_along_the_load() {
    let deflection = tip_deflection(-5.0);
    assert!(deflection < 0.0);

    // Small deflections respond almost linearly to the load
    let ratio = tip_deflection(-10.0) / deflection;
    assert!(ratio > 1.9 && ratio < 2.1, "ratio = {}", ratio);
}

#[test]
fn load_increments_reach_the_same_equilibrium() {
    let Plate {
        simulation: mut direct, ..
    } = cantilever(-20.0);
    assert!(direct.solve_static_nonlinear(50).unwrap().converged());

    let Plate {
        simulation: mut incremental,
        ..
    } = cantilever(-20.0);
    let settings = StaticSolverSettings::default()
        .set_force_tolerance(1e-6)
        .set_load_increments(3);
    incremental.set_static_solver_settings(settings).unwrap();
    let result = incremental.solve_static_nonlinear(50).unwrap();
    assert!(result.converged());
    assert!(result.iterations >= 3);

    assert_approx_matrix_eq!(&free_positions(&direct), &free_positions(&incremental), abstol = 1e-8);
}

#[test]
fn iteration_cap_is_reported_and_keeps_last_iterate() {
    let Plate { mut simulation, tip } = cantilever(-50.0);
    let result = simulation.solve_static_nonlinear(1).unwrap();
    assert_eq!(result.status, StaticSolveStatus::MaxIterReached);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.residual_history.len(), 2);
    assert!(simulation.node_position(tip).unwrap().z < 0.05);

    // Continuing from the last iterate converges
    let result = simulation.solve_static_nonlinear(50).unwrap();
    assert!(result.converged());
}

#[test]
fn static_solve_requires_setup() {
    let mut plate = plate_simulation(
        1,
        1,
        Vector3::new(1.0, 1.0, 0.1),
        Material::isotropic(500.0, 2.1e8, 0.3).unwrap(),
        Brick9Settings::default(),
        |i, _, _| i == 0,
    );
    match plate.simulation.solve_static_nonlinear(10) {
        Err(SimulationError::Configuration(ConfigurationError::NotSetUp(_))) => {}
        other => panic!("expected a setup error, got {:?}", other),
    }
}

#[test]
fn reversed_winding_is_a_geometry_error() {
    let mut simulation = Simulation::new();
    let material = simulation
        .add_material(Material::isotropic(1000.0, 1e6, 0.3).unwrap())
        .unwrap();
    let mut positions = vec![
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(1.0, 1.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
    ];
    let top: Vec<_> = positions.iter().map(|p| p + Vector3::new(0.0, 0.0, 1.0)).collect();
    positions.extend(top);
    // Clockwise instead of counter-clockwise ordering of both faces
    positions.swap(1, 3);
    positions.swap(5, 7);

    let mut corners = Vec::new();
    for position in positions {
        corners.push(simulation.add_node(position, false).unwrap());
    }
    let mut handles = [corners[0]; 8];
    handles.copy_from_slice(&corners);
    let curvature = simulation.add_curvature_node().unwrap();
    let element = Brick9Element::new(handles, curvature, Vector3::new(1.0, 1.0, 1.0)).with_material(material);
    simulation.add_element(element).unwrap();

    match simulation.setup_initial() {
        Err(SimulationError::Geometry(GeometryError::NonPositiveJacobian { element, .. })) => assert_eq!(element, 0),
        other => panic!("expected a non-positive Jacobian, got {:?}", other),
    }
    assert!(!simulation.is_set_up());
}

#[test]
fn plate_bending_benchmark() {
    let mut plate = plate_simulation(
        4,
        4,
        Vector3::new(1.0, 1.0, 0.01),
        Material::isotropic(500.0, 2.1e8, 0.3).unwrap(),
        Brick9Settings::default(),
        |i, _, _| i == 0,
    );
    let simulation = &mut plate.simulation;
    simulation.set_gravity(Vector3::zeros()).unwrap();
    simulation.setup_initial().unwrap();
    simulation.set_linear_solver_options(true, 300, 1e-9).unwrap();
    simulation.set_node_force(plate.tip, Vector3::new(0.0, 0.0, -50.0)).unwrap();

    let result = simulation.solve_static_nonlinear(1000).unwrap();
    assert_ne!(result.status, StaticSolveStatus::ConvergenceFailure);
    let tip_z = simulation.node_position(plate.tip).unwrap().z;
    let reference = -0.4375;
    assert!(
        (tip_z - reference).abs() < reference.abs() / 100.0,
        "tip z = {}, reference {}",
        tip_z,
        reference
    );
}

#[test]
fn force_tolerance_does_not_tighten_linear_solves() {
    let Plate { mut simulation, tip } = cantilever(-5.0);
    let linear_tolerance = simulation.settings().linear_solver.tolerance;
    simulation.set_linear_solver_options(true, 300, 1e-6).unwrap();
    assert_eq!(simulation.settings().linear_solver.tolerance, linear_tolerance);
    assert_eq!(simulation.settings().static_solver.force_tolerance, 1e-6);

    let result = simulation.solve_static_nonlinear(50).unwrap();
    assert!(result.converged());
    assert_eq!(simulation.statistics().unconverged_linear_solves, 0);
    assert!(simulation.node_position(tip).unwrap().z < 0.05);
}

/// A cantilever whose clamped end yields under a tip load of about 0.4.
fn plastic_cantilever(plasticity: Option<PlasticityModel<f64>>, tip_force: f64) -> Plate {
    let mut plate = plate_simulation(
        2,
        1,
        Vector3::new(1.0, 0.5, 0.05),
        Material::isotropic(10.0, 1e7, 0.3).unwrap(),
        Brick9Settings::default()
            .set_hencky_strain(true)
            .set_plasticity(plasticity),
        |i, _, _| i == 0,
    );
    let simulation = &mut plate.simulation;
    simulation.set_gravity(Vector3::zeros()).unwrap();
    simulation.setup_initial().unwrap();
    let linear_settings = LinearSolverSettings::default()
        .set_max_iterations(Some(1000))
        .set_tolerance(1e-10);
    simulation.set_linear_solver_settings(linear_settings).unwrap();
    let static_settings = StaticSolverSettings::default()
        .set_force_tolerance(1e-6)
        .set_relative_force_tolerance(0.0)
        .set_load_increments(3);
    simulation.set_static_solver_settings(static_settings).unwrap();
    simulation
        .set_node_force(plate.tip, Vector3::new(0.0, 0.0, tip_force))
        .unwrap();
    plate
}

fn j2() -> Option<PlasticityModel<f64>> {
    Some(PlasticityModel::J2 {
        yield_stress: 1000.0,
        hardening: 1e5,
    })
}

fn material_states(simulation: &Simulation) -> Vec<MaterialPointState<f64>> {
    simulation
        .mesh()
        .elements()
        .iter()
        .flat_map(|element| element.material_states().iter().copied())
        .collect()
}

fn max_accumulated_plastic_strain(simulation: &Simulation) -> f64 {
    material_states(simulation)
        .iter()
        .map(|state| state.accumulated_plastic_strain)
        .fold(0.0, f64::max)
}

#[test]
fn material_states_are_committed_after_each_converged_increment() {
    let Plate { mut simulation, tip } = plastic_cantilever(j2(), -0.6);
    let virgin_states = material_states(&simulation);

    // Iterate to equilibrium without ever meeting the tolerance
    let unreachable = StaticSolverSettings::default()
        .set_force_tolerance(1e-300)
        .set_relative_force_tolerance(0.0);
    simulation.set_static_solver_settings(unreachable).unwrap();
    let result = simulation.solve_static_nonlinear(40).unwrap();
    assert!(!result.converged());
    assert!(result.residual_norm < 1e-7, "residual {:e}", result.residual_norm);
    assert_eq!(material_states(&simulation), virgin_states);

    // The first increment of twice the load starts in equilibrium and converges immediately,
    // the second one is cut off before its first Newton step
    simulation
        .set_node_force(tip, Vector3::new(0.0, 0.0, -1.2))
        .unwrap();
    let settings = StaticSolverSettings::default()
        .set_force_tolerance(1e-6)
        .set_relative_force_tolerance(0.0)
        .set_load_increments(2);
    simulation.set_static_solver_settings(settings).unwrap();
    let result = simulation.solve_static_nonlinear(0).unwrap();
    assert_eq!(result.status, StaticSolveStatus::MaxIterReached);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.residual_history.len(), 2);
    assert!(max_accumulated_plastic_strain(&simulation) > 0.0);
}

#[test]
fn unloading_leaves_residual_plastic_deflection() {
    let unload = |plasticity: Option<PlasticityModel<f64>>| {
        let Plate { mut simulation, tip } = plastic_cantilever(plasticity, -0.6);
        assert!(simulation.solve_static_nonlinear(100).unwrap().converged());
        let loaded_z = simulation.node_position(tip).unwrap().z;
        let plastic_strain = max_accumulated_plastic_strain(&simulation);

        simulation.set_node_force(tip, Vector3::zeros()).unwrap();
        assert!(simulation.solve_static_nonlinear(100).unwrap().converged());
        (loaded_z, simulation.node_position(tip).unwrap().z, plastic_strain)
    };

    let (elastic_loaded_z, elastic_unloaded_z, elastic_strain) = unload(None);
    assert!(elastic_loaded_z < 0.05);
    assert_eq!(elastic_strain, 0.0);
    assert!((elastic_unloaded_z - 0.05).abs() < 1e-7, "z = {}", elastic_unloaded_z);

    let (plastic_loaded_z, plastic_unloaded_z, plastic_strain) = unload(j2());
    assert!(plastic_strain > 0.0);
    assert!(plastic_loaded_z < elastic_loaded_z);
    assert!(plastic_unloaded_z < 0.05 - 1e-6, "z = {}", plastic_unloaded_z);
    assert!(plastic_unloaded_z > plastic_loaded_z);
}
