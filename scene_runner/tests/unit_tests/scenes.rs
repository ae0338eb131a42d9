use approx::assert_relative_eq;
use scene_runner::scenes::{load_scene, Analysis, SceneParameters};
use serde_json::json;
use simulation::brickfem::nalgebra::Vector3;
use std::path::PathBuf;

fn parameters(config: serde_json::Value) -> SceneParameters {
    SceneParameters {
        output_dir: PathBuf::from("data"),
        config: Some(config),
    }
}

#[test]
fn plate_bending_scene_is_set_up_with_default_parameters() {
    let scene = load_scene("plate_bending", &SceneParameters::default()).unwrap();
    assert_eq!(scene.name, "plate_bending");
    assert_eq!(
        scene.analysis,
        Analysis::Static {
            max_newton_iterations: 1000
        }
    );

    let simulation = &scene.simulation;
    assert!(simulation.is_set_up());
    assert_eq!(simulation.mesh().num_elements(), 16);
    assert_eq!(simulation.gravity(), Vector3::zeros());
    // Five clamped nodes per layer along x = 0
    assert_eq!(simulation.mesh().num_free_dofs(), 3 * (50 - 10) + 9 * 16);

    let tip = simulation.mesh().position_node(scene.tracked_node).unwrap();
    assert_relative_eq!(tip.position, Vector3::new(1.0, 1.0, 0.01), epsilon = 1e-14);
    assert_eq!(tip.external_force, Vector3::new(0.0, 0.0, -50.0));
}

#[test]
fn invalid_scene_configuration_is_rejected() {
    let params = parameters(json!({ "plate_bending": { "density": "heavy" } }));
    assert!(load_scene("plate_bending", &params).is_err());

    let params = parameters(json!({ "swinging_shell": { "plate": { "num_elements": [0, 2], "size": [1.0, 1.0, 0.01] } } }));
    assert!(load_scene("swinging_shell", &params).is_err());
}

#[test]
fn coarse_swinging_shell_records_tip_after_every_step() {
    let params = parameters(json!({
        "swinging_shell": {
            "plate": { "num_elements": [2, 2], "size": [0.5, 0.5, 0.02] },
            "young": 1e7,
            "duration": 0.015,
            "linear_solver": { "max_iterations": 1000, "tolerance": 1e-10 }
        }
    }));
    let mut scene = load_scene("swinging_shell", &params).unwrap();
    assert_eq!(
        scene.analysis,
        Analysis::Dynamic {
            time_step: 5e-3,
            duration: 0.015
        }
    );

    let trajectory = scene.run().unwrap();
    assert_eq!(trajectory.len(), 3);
    for (k, sample) in trajectory.samples.iter().enumerate() {
        assert_relative_eq!(sample.time, 5e-3 * (k + 1) as f64, max_relative = 1e-12);
    }

    // The free corner starts falling under gravity
    let last = trajectory.last().unwrap();
    assert!(last.position.z < 0.02);
    assert_relative_eq!(scene.simulation.current_time(), 0.015, max_relative = 1e-12);
    assert_eq!(scene.simulation.statistics().dynamic_steps, 3);
}
