use std::error::Error;

use log::info;
use serde::{Deserialize, Serialize};
use simulation::brickfem::minres::PreconditionerKind;
use simulation::brickfem::nalgebra::Vector3;
use simulation::brickfem::{Brick9Settings, Material};
use simulation::settings::{LinearSolverSettings, SimulationSettings, StaticSolverSettings};
use simulation::Simulation;

use crate::meshes::{create_plate, PlateDescription};
use crate::scenes::{scene_config, Analysis, Scene, SceneParameters};

/// Thin plate clamped along `x = 0` and bent by a point load on the opposite corner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateBendingConfig {
    pub plate: PlateDescription,
    pub density: f64,
    pub young: f64,
    pub poisson: f64,
    pub shear: f64,
    /// Vertical force on the top corner node at `(lx, ly)`.
    pub tip_force: f64,
    pub hencky_strain: bool,
    pub max_newton_iterations: usize,
    pub linear_solver: LinearSolverSettings,
    pub static_solver: StaticSolverSettings,
}

impl Default for PlateBendingConfig {
    fn default() -> Self {
        Self {
            plate: PlateDescription {
                num_elements: [4, 4],
                size: [1.0, 1.0, 0.01],
            },
            density: 500.0,
            young: 2.1e8,
            poisson: 0.3,
            shear: 8.0769231e7,
            tip_force: -50.0,
            hencky_strain: false,
            max_newton_iterations: 1000,
            linear_solver: LinearSolverSettings::default()
                .set_preconditioner(PreconditionerKind::Diagonal)
                .set_max_iterations(Some(300))
                .set_tolerance(1e-8),
            static_solver: StaticSolverSettings::default().set_force_tolerance(1e-9),
        }
    }
}

pub fn plate_bending(params: &SceneParameters) -> Result<Scene, Box<dyn Error>> {
    let config: PlateBendingConfig = scene_config(params, "plate_bending")?;
    info!("Plate bending configuration: {:?}", config);

    let settings = SimulationSettings {
        gravity: Vector3::zeros(),
        linear_solver: config.linear_solver,
        static_solver: config.static_solver,
        ..SimulationSettings::default()
    };
    let mut simulation = Simulation::with_settings(settings)?;
    let material = simulation.add_material(Material::isotropic_with_shear_modulus(
        config.density,
        config.young,
        config.poisson,
        config.shear,
    )?)?;
    let element_settings = Brick9Settings::default()
        .set_alpha_damping(0.0)
        .set_gravity(false)
        .set_hencky_strain(config.hencky_strain);

    let plate = create_plate(
        &mut simulation,
        &config.plate,
        material,
        &element_settings,
        |i, _, _| i == 0,
    )?;
    let tip = plate.tip();
    simulation.set_node_force(tip, Vector3::new(0.0, 0.0, config.tip_force))?;
    simulation.setup_initial()?;

    Ok(Scene {
        name: String::from("plate_bending"),
        simulation,
        tracked_node: tip,
        analysis: Analysis::Static {
            max_newton_iterations: config.max_newton_iterations,
        },
    })
}
