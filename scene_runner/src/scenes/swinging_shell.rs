use std::error::Error;

use log::info;
use serde::{Deserialize, Serialize};
use simulation::brickfem::minres::PreconditionerKind;
use simulation::brickfem::nalgebra::Vector3;
use simulation::brickfem::solid::plasticity::PlasticityModel;
use simulation::brickfem::{Brick9Settings, Material};
use simulation::settings::{ConvergenceMode, HhtSettings, LinearSolverSettings, SimulationSettings};
use simulation::Simulation;

use crate::meshes::{create_plate, PlateDescription};
use crate::scenes::{scene_config, Analysis, Scene, SceneParameters};

/// Thin plate pinned at a single bottom corner node, swinging down under its own weight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingingShellConfig {
    pub plate: PlateDescription,
    pub density: f64,
    pub young: f64,
    pub poisson: f64,
    pub alpha_damping: f64,
    pub plasticity: Option<PlasticityModel<f64>>,
    pub gravity: [f64; 3],
    pub time_step: f64,
    pub duration: f64,
    pub linear_solver: LinearSolverSettings,
    pub integrator: HhtSettings<f64>,
}

impl Default for SwingingShellConfig {
    fn default() -> Self {
        Self {
            plate: PlateDescription {
                num_elements: [8, 8],
                size: [1.0, 1.0, 0.01],
            },
            density: 1000.0,
            young: 2.1e7,
            poisson: 0.3,
            alpha_damping: 0.005,
            plasticity: None,
            gravity: [0.0, 0.0, -9.81],
            time_step: 5e-3,
            duration: 0.05,
            linear_solver: LinearSolverSettings::default()
                .set_preconditioner(PreconditionerKind::Diagonal)
                .set_max_iterations(Some(500))
                .set_tolerance(1e-8),
            integrator: HhtSettings::default()
                .set_alpha(-0.2)
                .set_max_iterations(20)
                .set_abs_tolerances(1e-6, 1e-1)
                .set_mode(ConvergenceMode::Position)
                .set_scaling(true),
        }
    }
}

pub fn swinging_shell(params: &SceneParameters) -> Result<Scene, Box<dyn Error>> {
    let config: SwingingShellConfig = scene_config(params, "swinging_shell")?;
    info!("Swinging shell configuration: {:?}", config);

    let settings = SimulationSettings {
        gravity: Vector3::from(config.gravity),
        linear_solver: config.linear_solver,
        integrator: config.integrator.clone(),
        ..SimulationSettings::default()
    };
    let mut simulation = Simulation::with_settings(settings)?;
    // Gravity enters through the elements only
    simulation.set_automatic_gravity(false);

    let material = simulation.add_material(Material::isotropic(config.density, config.young, config.poisson)?)?;
    let element_settings = Brick9Settings::default()
        .set_alpha_damping(config.alpha_damping)
        .set_gravity(true)
        .set_hencky_strain(true)
        .set_plasticity(config.plasticity);

    let plate = create_plate(
        &mut simulation,
        &config.plate,
        material,
        &element_settings,
        |i, j, layer| i == 0 && j == 0 && layer == 0,
    )?;
    simulation.setup_initial()?;

    Ok(Scene {
        name: String::from("swinging_shell"),
        simulation,
        tracked_node: plate.tip(),
        analysis: Analysis::Dynamic {
            time_step: config.time_step,
            duration: config.duration,
        },
    })
}
