//! Return mapping algorithms in principal logarithmic strain space.
//!
//! The elastic trial state is given by principal logarithmic strains and the corresponding
//! principal Kirchhoff stresses. Because the Hencky law is isotropic, the return mapping acts on
//! the three principal values only and keeps the principal directions of the trial state.

use nalgebra::{RealField, Vector3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

use crate::solid::materials::LameParameters;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PlasticityModel<T> {
    /// Von Mises yield surface with linear isotropic hardening of the yield stress.
    J2 { yield_stress: T, hardening: T },
    /// Drucker-Prager cone matched to the outer edges of the Mohr-Coulomb surface,
    /// with linear hardening of the cohesion. Angles are in radians.
    DruckerPrager {
        cohesion: T,
        friction_angle: T,
        dilatancy_angle: T,
        hardening: T,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ReturnMapping<T> {
    pub elastic_strain: Vector3<T>,
    pub kirchhoff_stress: Vector3<T>,
    pub accumulated_plastic_strain: T,
    pub plastic: bool,
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
fn mean<T: RealField + Copy>(v: &Vector3<T>) -> T {
    (v.x + v.y + v.z) / 3.0
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
fn drucker_prager_coefficients<T: RealField + Copy>(angle: T) -> (T, T) {
    let sqrt3 = T::sqrt(3.0);
    let denominator = sqrt3 * (3.0 - angle.sin());
    (6.0 * angle.sin() / denominator, 6.0 * angle.cos() / denominator)
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T> PlasticityModel<T>
where
    T: RealField + Copy,
{
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            PlasticityModel::J2 {
                yield_stress,
                hardening,
            } => {
                if !(yield_stress > 0.0) {
                    return Err(format!("J2 yield stress must be positive, got {}", yield_stress));
                }
                if !(hardening >= 0.0) {
                    return Err(format!("hardening modulus must be non-negative, got {}", hardening));
                }
            }
            PlasticityModel::DruckerPrager {
                cohesion,
                friction_angle,
                dilatancy_angle,
                hardening,
            } => {
                if !(cohesion > 0.0) {
                    return Err(format!("Drucker-Prager cohesion must be positive, got {}", cohesion));
                }
                if !(friction_angle >= 0.0 && friction_angle < T::frac_pi_2()) {
                    return Err(format!("friction angle must be in [0, pi/2), got {}", friction_angle));
                }
                if !(dilatancy_angle >= 0.0 && dilatancy_angle <= friction_angle) {
                    return Err(format!(
                        "dilatancy angle must be in [0, friction angle], got {}",
                        dilatancy_angle
                    ));
                }
                if !(hardening >= 0.0) {
                    return Err(format!("hardening modulus must be non-negative, got {}", hardening));
                }
            }
        }
        Ok(())
    }

    /// Evaluates the yield function for principal Kirchhoff stresses. Positive values are inadmissible.
    pub fn yield_function(&self, tau: &Vector3<T>, accumulated_plastic_strain: T) -> T {
        let p = mean(tau);
        let s = tau - Vector3::repeat(p);
        match *self {
            PlasticityModel::J2 {
                yield_stress,
                hardening,
            } => T::sqrt(1.5) * s.norm() - (yield_stress + hardening * accumulated_plastic_strain),
            PlasticityModel::DruckerPrager {
                cohesion,
                friction_angle,
                hardening,
                ..
            } => {
                let (eta, xi) = drucker_prager_coefficients(friction_angle);
                let sqrt_j2 = s.norm() / T::sqrt(2.0);
                sqrt_j2 + eta * p - xi * (cohesion + hardening * accumulated_plastic_strain)
            }
        }
    }

    /// Projects the trial state back onto the yield surface.
    pub fn return_mapping(
        &self,
        lame: &LameParameters<T>,
        eps_trial: &Vector3<T>,
        tau_trial: &Vector3<T>,
        accumulated_plastic_strain: T,
    ) -> ReturnMapping<T> {
        let elastic = ReturnMapping {
            elastic_strain: *eps_trial,
            kirchhoff_stress: *tau_trial,
            accumulated_plastic_strain,
            plastic: false,
        };

        let f_trial = self.yield_function(tau_trial, accumulated_plastic_strain);
        if !(f_trial > 0.0) {
            return elastic;
        }

        let mu = lame.mu;
        let bulk = lame.bulk_modulus();
        let p_trial = mean(tau_trial);
        let s_trial = tau_trial - Vector3::repeat(p_trial);
        let s_norm = s_trial.norm();

        let (s, p, alpha) = match *self {
            PlasticityModel::J2 { hardening, .. } => {
                let delta_gamma = f_trial / (3.0 * mu + hardening);
                let scale = if s_norm > 0.0 {
                    1.0 - 3.0 * mu * delta_gamma / (T::sqrt(1.5) * s_norm)
                } else {
                    0.0
                };
                (s_trial * scale, p_trial, accumulated_plastic_strain + delta_gamma)
            }
            PlasticityModel::DruckerPrager {
                cohesion,
                friction_angle,
                dilatancy_angle,
                hardening,
            } => {
                let (eta, xi) = drucker_prager_coefficients(friction_angle);
                let (eta_bar, _) = drucker_prager_coefficients(dilatancy_angle);
                let sqrt_j2_trial = s_norm / T::sqrt(2.0);

                // Return to the smooth part of the cone
                let delta_gamma = f_trial / (mu + bulk * eta * eta_bar + xi * xi * hardening);
                let sqrt_j2 = sqrt_j2_trial - mu * delta_gamma;
                if sqrt_j2 >= 0.0 {
                    let scale = if sqrt_j2_trial > 0.0 {
                        sqrt_j2 / sqrt_j2_trial
                    } else {
                        0.0
                    };
                    (
                        s_trial * scale,
                        p_trial - bulk * eta_bar * delta_gamma,
                        accumulated_plastic_strain + xi * delta_gamma,
                    )
                } else if eta_bar > 0.0 && eta > 0.0 {
                    // Return to the apex
                    let beta = xi / eta;
                    let alpha_rate = xi / eta_bar;
                    let c = cohesion + hardening * accumulated_plastic_strain;
                    let delta_eps_v = (p_trial - beta * c) / (beta * hardening * alpha_rate + bulk);
                    (
                        Vector3::zeros(),
                        p_trial - bulk * delta_eps_v,
                        accumulated_plastic_strain + alpha_rate * delta_eps_v,
                    )
                } else {
                    (Vector3::zeros(), p_trial, accumulated_plastic_strain + xi * delta_gamma)
                }
            }
        };

        let tau = s + Vector3::repeat(p);
        let elastic_strain = s / (2.0 * mu) + Vector3::repeat(p / (3.0 * bulk));

        ReturnMapping {
            elastic_strain,
            kirchhoff_stress: tau,
            accumulated_plastic_strain: alpha,
            plastic: true,
        }
    }
}
