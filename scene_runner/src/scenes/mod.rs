use std::error::Error;
use std::path::PathBuf;

use coarse_prof::profile;
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use simulation::brickfem::NodeHandle;
use simulation::dynamics::integrators::StepStatus;
use simulation::Simulation;

use crate::reference::Trajectory;

mod plate_bending;
mod swinging_shell;

static SCENE_REGISTRY: Lazy<Vec<SceneConstructor>> = Lazy::new(|| {
    let mut scenes = vec![
        SceneConstructor {
            name: "plate_bending".to_string(),
            constructor: plate_bending::plate_bending,
        },
        SceneConstructor {
            name: "swinging_shell".to_string(),
            constructor: swinging_shell::swinging_shell,
        },
    ];

    scenes.sort_by_key(|constructor| constructor.name.clone());
    scenes
});

/// What to do with a scene once it is set up.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Analysis {
    /// A single nonlinear static solve.
    Static { max_newton_iterations: usize },
    /// Time stepping with a fixed step until `duration` is reached.
    Dynamic { time_step: f64, duration: f64 },
}

#[derive(Debug)]
pub struct Scene {
    pub name: String,
    pub simulation: Simulation,
    /// The node whose trajectory is recorded.
    pub tracked_node: NodeHandle,
    pub analysis: Analysis,
}

#[derive(Debug, Clone, Default)]
pub struct SceneParameters {
    pub output_dir: PathBuf,
    /// Parsed configuration file. Scenes read the member named after themselves, if present.
    pub config: Option<serde_json::Value>,
}

#[doc(hidden)]
pub struct SceneConstructor {
    name: String,
    constructor: fn(&SceneParameters) -> Result<Scene, Box<dyn Error>>,
}

pub fn available_scenes() -> Vec<String> {
    let mut names = Vec::new();
    for scene in SCENE_REGISTRY.iter() {
        names.push(scene.name.clone());
    }
    names
}

pub fn load_scene(name: &str, params: &SceneParameters) -> Result<Scene, Box<dyn Error>> {
    for scene in SCENE_REGISTRY.iter() {
        if scene.name == name {
            return (scene.constructor)(params);
        }
    }

    Err(Box::from(format!("Could not find scene {}", name)))
}

/// Deserializes the configuration of the scene `name`, falling back to `C::default()`.
fn scene_config<C>(params: &SceneParameters, name: &str) -> Result<C, Box<dyn Error>>
where
    C: DeserializeOwned + Default,
{
    match params.config.as_ref().and_then(|config| config.get(name)) {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| Box::<dyn Error>::from(format!("Invalid configuration for scene \"{}\": {}", name, e))),
        None => Ok(C::default()),
    }
}

impl Scene {
    fn tracked_position_sample(&self, trajectory: &mut Trajectory) -> Result<(), Box<dyn Error>> {
        let position = self.simulation.node_position(self.tracked_node)?;
        trajectory.push(self.simulation.current_time(), position);
        Ok(())
    }

    /// Runs the analysis and returns the trajectory of the tracked node.
    ///
    /// A static analysis records the equilibrium position. A dynamic analysis records the
    /// position after every step.
    pub fn run(&mut self) -> Result<Trajectory, Box<dyn Error>> {
        let mut trajectory = Trajectory::new();
        match self.analysis {
            Analysis::Static { max_newton_iterations } => {
                profile!("static solve");
                let result = self.simulation.solve_static_nonlinear(max_newton_iterations)?;
                if result.converged() {
                    info!(
                        "Static solve converged after {} iterations (residual {:.3e}).",
                        result.iterations, result.residual_norm
                    );
                } else {
                    warn!(
                        "Static solve stopped with status {:?} after {} iterations (residual {:.3e}).",
                        result.status, result.iterations, result.residual_norm
                    );
                }
                self.tracked_position_sample(&mut trajectory)?;
            }
            Analysis::Dynamic { time_step, duration } => {
                let num_steps = (duration / time_step - 1e-9).ceil().max(0.0) as usize;
                for step_index in 0..num_steps {
                    profile!("timestep");
                    let result = self.simulation.step_dynamics(time_step)?;
                    if result.status == StepStatus::Failed {
                        return Err(Box::from(format!(
                            "Time step {} failed at t = {} after {} iterations",
                            step_index + 1,
                            self.simulation.current_time(),
                            result.iterations
                        )));
                    }
                    self.tracked_position_sample(&mut trajectory)?;
                    if let Some(sample) = trajectory.last() {
                        info!(
                            "Step {}/{}: t = {:.4}, {} iterations, tracked node at ({:.6e}, {:.6e}, {:.6e}).",
                            step_index + 1,
                            num_steps,
                            sample.time,
                            result.iterations,
                            sample.position.x,
                            sample.position.y,
                            sample.position.z
                        );
                    }
                }
            }
        }
        Ok(trajectory)
    }
}
