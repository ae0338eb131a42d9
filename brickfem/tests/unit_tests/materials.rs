use brickfem::solid::materials::*;
use brickfem::solid::plasticity::PlasticityModel;
use brickfem::solid::{approximate_stress_derivative, ConstitutiveModel, MaterialPointState};
use nalgebra::{Matrix3, Vector3};

use crate::assert_approx_matrix_eq;
use paste;

/// Assert that the stress derivative of the model is consistent with a finite difference
/// approximation of the stress
#[allow(non_snake_case)]
fn assert_stress_derivative_consistent_with_finite_difference(
    material_instances: &[impl ConstitutiveModel<f64>],
    deformation_gradients: &[Matrix3<f64>],
) {
    let state = MaterialPointState::default();
    for material in material_instances {
        for F in deformation_gradients {
            // Smaller steps are dominated by round-off in the eigen decompositions of the Hencky model
            let h = 1e-4 * f64::max(1.0, F.norm());
            let finite_diff = approximate_stress_derivative(material, F, &state, h);
            let derivative = material.compute_stress_derivative(F, &state);

            let scale = f64::max(finite_diff.amax(), derivative.amax());
            let abstol = scale * 1e-5;

            assert_approx_matrix_eq!(&finite_diff, &derivative, abstol = abstol);
        }
    }
}

/// Assert that the stress derivative of a hyperelastic model has major symmetry.
#[allow(non_snake_case)]
fn assert_stress_derivative_has_major_symmetry(
    material_instances: &[impl ConstitutiveModel<f64>],
    deformation_gradients: &[Matrix3<f64>],
) {
    let state = MaterialPointState::default();
    for material in material_instances {
        for F in deformation_gradients {
            let derivative = material.compute_stress_derivative(F, &state);
            let abstol = derivative.amax() * 1e-5;
            assert_approx_matrix_eq!(&derivative, &derivative.transpose(), abstol = abstol);
        }
    }
}

macro_rules! test_material_derivatives {
    ($material_name:ident, $materials:expr) => {
        // Use paste to automatically generate method names for the tests
        paste::item! {
            #[test]
            #[allow(non_snake_case)]
            pub fn [<$material_name _derivative_consistent_with_finite_difference>]() {
                assert_stress_derivative_consistent_with_finite_difference(
                    $materials.as_ref(),
                    test_deformation_gradients().as_ref(),
                );
            }

            #[test]
            #[allow(non_snake_case)]
            pub fn [<$material_name _derivative_has_major_symmetry>]() {
                assert_stress_derivative_has_major_symmetry(
                    $materials.as_ref(),
                    test_deformation_gradients().as_ref(),
                );
            }
        }
    };
}

#[allow(non_snake_case)]
fn test_deformation_gradients() -> Vec<Matrix3<f64>> {
    vec![
        // Identity corresponds to zero deformation
        Matrix3::identity(),
        // Mild deformation with shear
        Matrix3::new(1.1, 0.2, -0.1, 0.05, 0.9, 0.15, -0.1, 0.1, 1.05),
        // Strong anisotropic stretch combined with a rotation
        Matrix3::new(0.0, -0.8, 0.0, 1.5, 0.0, 0.0, 0.0, 0.0, 1.2),
    ]
}

fn young_poisson_test_parameters() -> Vec<YoungPoisson<f64>> {
    vec![
        YoungPoisson {
            young: 1e2,
            poisson: 0.1,
        },
        YoungPoisson {
            young: 1e6,
            poisson: 0.1,
        },
        YoungPoisson {
            young: 1e2,
            poisson: 0.45,
        },
        YoungPoisson {
            young: 1e6,
            poisson: 0.45,
        },
    ]
}

fn lame_test_parameters() -> Vec<LameParameters<f64>> {
    young_poisson_test_parameters()
        .into_iter()
        .map(LameParameters::from)
        .collect()
}

fn stvk_test_materials() -> Vec<StVKMaterial<f64>> {
    lame_test_parameters()
        .into_iter()
        .map(StVKMaterial::from)
        .collect()
}

fn hencky_test_materials() -> Vec<HenckyMaterial<f64>> {
    lame_test_parameters()
        .into_iter()
        .map(HenckyMaterial::from)
        .collect()
}

test_material_derivatives!(stvk, stvk_test_materials());
test_material_derivatives!(hencky, hencky_test_materials());

#[test]
fn lame_parameters_from_young_poisson() {
    let lame = LameParameters::from(YoungPoisson::<f64> {
        young: 2.1e8,
        poisson: 0.3,
    });
    assert!((lame.mu - 8.076923076923077e7).abs() < 1.0);
    assert!((lame.lambda - 1.2115384615384616e8).abs() < 1.0);
}

#[test]
#[allow(non_snake_case)]
fn hencky_and_stvk_agree_with_linear_elasticity_for_small_strains() {
    let lame = LameParameters::from(YoungPoisson::<f64> {
        young: 1e6,
        poisson: 0.3,
    });
    let H = Matrix3::new(1.0, 0.5, -0.2, 0.3, -0.7, 0.4, -0.1, 0.2, 0.6) * 1e-6;
    let F = Matrix3::identity() + H;
    let eps = (H + H.transpose()) * 0.5;
    let linear = eps * (2.0 * lame.mu) + Matrix3::identity() * (lame.lambda * eps.trace());

    let state = MaterialPointState::default();
    let hencky = HenckyMaterial::elastic(lame).compute_stress_tensor(&F, &state).stress;
    let stvk = StVKMaterial::from(lame).compute_stress_tensor(&F, &state).stress;

    let abstol = 1e-4 * linear.amax();
    assert_approx_matrix_eq!(&hencky, &linear, abstol = abstol);
    assert_approx_matrix_eq!(&stvk, &linear, abstol = abstol);
}

#[test]
#[allow(non_snake_case)]
fn committed_plastic_state_reproduces_returned_stress() {
    let lame = LameParameters::from(YoungPoisson::<f64> {
        young: 1e6,
        poisson: 0.3,
    });
    let material = HenckyMaterial::elastic(lame).with_plasticity(PlasticityModel::J2 {
        yield_stress: 5e3,
        hardening: 1e4,
    });
    let F = Matrix3::from_diagonal(&Vector3::new(1.05, 0.98, 0.98));

    let update = material.compute_stress_tensor(&F, &MaterialPointState::default());
    assert!(update.plastic);
    assert!(update.state.accumulated_plastic_strain > 0.0);

    // Re-evaluating with the committed plastic state at the same deformation is elastic
    let reevaluated = material.compute_stress_tensor(&F, &update.state);
    let abstol = 1e-6 * update.stress.amax();
    assert_approx_matrix_eq!(&reevaluated.stress, &update.stress, abstol = abstol);
    let increment =
        (reevaluated.state.accumulated_plastic_strain - update.state.accumulated_plastic_strain).abs();
    assert!(increment < 1e-8);

    // Removing the deformation leaves a residual stress
    let unloaded = material.compute_stress_tensor(&Matrix3::identity(), &update.state);
    assert!(unloaded.stress.amax() > 1e3);
}

#[test]
#[allow(non_snake_case)]
fn hencky_derivative_with_plastic_history_matches_finite_difference() {
    let lame = LameParameters::from(YoungPoisson::<f64> {
        young: 1e6,
        poisson: 0.3,
    });
    let material = HenckyMaterial::elastic(lame).with_plasticity(PlasticityModel::J2 {
        yield_stress: 5e3,
        hardening: 1e4,
    });
    let loaded = Matrix3::from_diagonal(&Vector3::new(1.05, 0.98, 0.98));
    let state = material.compute_stress_tensor(&loaded, &MaterialPointState::default()).state;
    assert!(state.accumulated_plastic_strain > 0.0);

    // Partial unloading combined with a rotation stays elastic
    let (c, s) = (0.3f64.cos(), 0.3f64.sin());
    let rotation = Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0);
    let F = rotation * Matrix3::from_diagonal(&Vector3::new(1.047, 0.9815, 0.9815));
    assert!(!material.compute_stress_tensor(&F, &state).plastic);

    let derivative = material.compute_stress_derivative(&F, &state);
    let finite_diff = approximate_stress_derivative(&material, &F, &state, 1e-4 * F.norm());
    let abstol = 1e-5 * finite_diff.amax();
    assert_approx_matrix_eq!(&derivative, &finite_diff, abstol = abstol);
}
