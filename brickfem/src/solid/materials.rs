use nalgebra::{Matrix3, Matrix6, RealField, SymmetricEigen, Vector3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

use crate::solid::plasticity::PlasticityModel;
use crate::solid::{
    approximate_stress_derivative, default_difference_step, green_lagrange_strain_voigt, symmetric_to_voigt_strain,
    vectorize, voigt_to_symmetric_stress, ConstitutiveModel, MaterialPointState, Matrix9, StressUpdate,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LameParameters<T> {
    pub mu: T,
    pub lambda: T,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YoungPoisson<T> {
    pub young: T,
    pub poisson: T,
}

impl<T> From<YoungPoisson<T>> for LameParameters<T>
where
    T: RealField + Copy,
{
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn from(params: YoungPoisson<T>) -> Self {
        let YoungPoisson { young, poisson } = params;
        let mu = 0.5 * young / (1.0 + poisson);
        let lambda = young * poisson / ((1.0 + poisson) * (1.0 - 2.0 * poisson));
        Self { mu, lambda }
    }
}

impl<T> LameParameters<T>
where
    T: RealField + Copy,
{
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn bulk_modulus(&self) -> T {
        self.lambda + 2.0 * self.mu / 3.0
    }

    /// Isotropic elasticity tensor in Voigt notation with engineering shear strains.
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn voigt_elasticity_tensor(&self) -> Matrix6<T> {
        let LameParameters { mu, lambda } = *self;
        let mut d = Matrix6::zeros();
        for i in 0..3 {
            for j in 0..3 {
                d[(i, j)] = lambda;
            }
            d[(i, i)] += 2.0 * mu;
            d[(i + 3, i + 3)] = mu;
        }
        d
    }
}

/// Saint Venant-Kirchhoff material with a general (orthotropic) Voigt elasticity tensor.
///
/// The second Piola-Kirchhoff stress is `S = D : E` with `E` the Green-Lagrange strain.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StVKMaterial<T: RealField + Copy> {
    pub elasticity: Matrix6<T>,
}

impl<T: RealField + Copy> StVKMaterial<T> {
    pub fn from_voigt_elasticity(elasticity: Matrix6<T>) -> Self {
        Self { elasticity }
    }

    #[allow(non_snake_case)]
    pub fn compute_second_piola_kirchhoff(&self, F: &Matrix3<T>) -> Matrix3<T> {
        let e = green_lagrange_strain_voigt(F);
        voigt_to_symmetric_stress(&(self.elasticity * e))
    }

    #[allow(non_snake_case)]
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn compute_strain_energy_density(&self, F: &Matrix3<T>) -> T {
        let e = green_lagrange_strain_voigt(F);
        0.5 * e.dot(&(self.elasticity * e))
    }
}

impl<T: RealField + Copy> From<LameParameters<T>> for StVKMaterial<T> {
    fn from(lame: LameParameters<T>) -> Self {
        Self::from_voigt_elasticity(lame.voigt_elasticity_tensor())
    }
}

impl<T: RealField + Copy> From<YoungPoisson<T>> for StVKMaterial<T> {
    fn from(params: YoungPoisson<T>) -> Self {
        Self::from(LameParameters::from(params))
    }
}

#[allow(non_snake_case)]
impl<T> ConstitutiveModel<T> for StVKMaterial<T>
where
    T: RealField + Copy,
{
    fn compute_stress_tensor(&self, F: &Matrix3<T>, state: &MaterialPointState<T>) -> StressUpdate<T> {
        StressUpdate {
            stress: F * self.compute_second_piola_kirchhoff(F),
            state: *state,
            plastic: false,
        }
    }

    /// Analytic derivative `dP = dF S + F (D : sym(F^T dF))`.
    fn compute_stress_derivative(&self, F: &Matrix3<T>, _state: &MaterialPointState<T>) -> Matrix9<T> {
        let S = self.compute_second_piola_kirchhoff(F);
        let mut dp_df = Matrix9::zeros();

        for l in 0..3 {
            for j in 0..3 {
                // Perturbation dF = e_j e_l^T
                let mut dF = Matrix3::zeros();
                dF[(j, l)] = T::one();
                let dE = F.transpose() * dF;
                let dS = voigt_to_symmetric_stress(&(self.elasticity * symmetric_to_voigt_strain(&sym_half(&dE))));
                let dP = dF * S + F * dS;
                dp_df.set_column(3 * l + j, &vectorize(&dP));
            }
        }

        dp_df
    }
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
fn sym_half<T: RealField + Copy>(m: &Matrix3<T>) -> Matrix3<T> {
    (m + m.transpose()) * 0.5
}

/// Isotropic hyperelastic material based on the logarithmic (Hencky) strain,
/// optionally with multiplicative plasticity.
///
/// The elastic left Cauchy-Green tensor is `b_e = F C_p^{-1} F^T` and the Kirchhoff stress is
/// coaxial with it, with principal values `tau_i = 2 mu eps_i + lambda (eps_1 + eps_2 + eps_3)` where
/// `eps_i = ln(lambda_i)` are the principal elastic logarithmic strains.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HenckyMaterial<T: RealField + Copy> {
    pub lame: LameParameters<T>,
    pub plasticity: Option<PlasticityModel<T>>,
}

impl<T: RealField + Copy> HenckyMaterial<T> {
    pub fn elastic(lame: LameParameters<T>) -> Self {
        Self { lame, plasticity: None }
    }

    pub fn with_plasticity(mut self, plasticity: PlasticityModel<T>) -> Self {
        self.plasticity = Some(plasticity);
        self
    }

    /// Principal Kirchhoff stresses for principal logarithmic strains.
    pub fn principal_kirchhoff_stress(&self, eps: &Vector3<T>) -> Vector3<T> {
        let LameParameters { mu, lambda } = self.lame;
        let trace = eps.x + eps.y + eps.z;
        eps * (mu + mu) + Vector3::repeat(lambda * trace)
    }
}

impl<T, X> From<X> for HenckyMaterial<T>
where
    T: RealField + Copy,
    X: Into<LameParameters<T>>,
{
    fn from(params: X) -> Self {
        Self::elastic(params.into())
    }
}

#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T> ConstitutiveModel<T> for HenckyMaterial<T>
where
    T: RealField + Copy,
{
    fn is_path_dependent(&self) -> bool {
        self.plasticity.is_some()
    }

    fn compute_stress_tensor(&self, F: &Matrix3<T>, state: &MaterialPointState<T>) -> StressUpdate<T> {
        let F_inv = match F.try_inverse() {
            Some(F_inv) => F_inv,
            None => {
                return StressUpdate {
                    stress: Matrix3::zeros(),
                    state: *state,
                    plastic: false,
                }
            }
        };

        let b_trial = F * state.inverse_plastic_cauchy_green * F.transpose();
        let b_trial = sym_half(&b_trial);
        let eigen = SymmetricEigen::new(b_trial);
        let min_eigenvalue = T::default_epsilon();
        let eps_trial = eigen
            .eigenvalues
            .map(|b_i| 0.5 * T::max(b_i, min_eigenvalue).ln());
        let tau_trial = self.principal_kirchhoff_stress(&eps_trial);

        let (eps, tau, accumulated_plastic_strain, plastic) = match &self.plasticity {
            Some(plasticity) => {
                let correction =
                    plasticity.return_mapping(&self.lame, &eps_trial, &tau_trial, state.accumulated_plastic_strain);
                (
                    correction.elastic_strain,
                    correction.kirchhoff_stress,
                    correction.accumulated_plastic_strain,
                    correction.plastic,
                )
            }
            None => (eps_trial, tau_trial, state.accumulated_plastic_strain, false),
        };

        let n = &eigen.eigenvectors;
        let mut tau_matrix = Matrix3::zeros();
        let mut b_elastic = Matrix3::zeros();
        for i in 0..3 {
            let n_i = n.column(i);
            let n_i_outer = n_i * n_i.transpose();
            tau_matrix += n_i_outer * tau[i];
            b_elastic += n_i_outer * (2.0 * eps[i]).exp();
        }

        let inverse_plastic_cauchy_green = if plastic {
            sym_half(&(F_inv * b_elastic * F_inv.transpose()))
        } else {
            state.inverse_plastic_cauchy_green
        };

        StressUpdate {
            stress: tau_matrix * F_inv.transpose(),
            state: MaterialPointState {
                inverse_plastic_cauchy_green,
                accumulated_plastic_strain,
            },
            plastic,
        }
    }

    /// Analytic derivative of `P = tau F^{-T}` for elastic updates.
    ///
    /// The derivative of the logarithmic strain follows from the eigen decomposition of `b_e`
    /// through the divided differences of the logarithm. Updates that trigger the return mapping
    /// fall back to central finite differences.
    fn compute_stress_derivative(&self, F: &Matrix3<T>, state: &MaterialPointState<T>) -> Matrix9<T> {
        let F_inv = match F.try_inverse() {
            Some(F_inv) => F_inv,
            None => return Matrix9::zeros(),
        };
        let finite_difference = || approximate_stress_derivative(self, F, state, default_difference_step(F));

        let C_p_inv = state.inverse_plastic_cauchy_green;
        let eigen = SymmetricEigen::new(sym_half(&(F * C_p_inv * F.transpose())));
        let b = eigen.eigenvalues;
        if b.iter().any(|b_i| !(*b_i > T::default_epsilon())) {
            return finite_difference();
        }
        let eps = b.map(|b_i| 0.5 * b_i.ln());
        let tau_principal = self.principal_kirchhoff_stress(&eps);
        if let Some(plasticity) = &self.plasticity {
            if plasticity.yield_function(&tau_principal, state.accumulated_plastic_strain) > 0.0 {
                return finite_difference();
            }
        }

        let n = eigen.eigenvectors;
        let F_inv_t = F_inv.transpose();
        let tau = n * Matrix3::from_diagonal(&tau_principal) * n.transpose();
        let tau_F_inv_t = tau * F_inv_t;

        // d ln(b) in the eigenbasis is (n_i^T db n_j) times the divided difference of ln
        let mut log_differences = Matrix3::zeros();
        for i in 0..3 {
            for j in 0..3 {
                log_differences[(i, j)] = if (b[i] - b[j]).abs() <= 1e-6 * T::max(b[i], b[j]) {
                    1.0 / (b[i] * b[j]).sqrt()
                } else {
                    (b[i].ln() - b[j].ln()) / (b[i] - b[j])
                };
            }
        }

        let LameParameters { mu, lambda } = self.lame;
        let F_C_p_inv_t = (F * C_p_inv).transpose();
        let mut dp_df = Matrix9::zeros();
        for l in 0..3 {
            for j in 0..3 {
                let mut dF = Matrix3::zeros();
                dF[(j, l)] = T::one();
                let half_db = dF * F_C_p_inv_t;
                let db = half_db + half_db.transpose();
                let d_eps = (n.transpose() * db * n).component_mul(&log_differences) * 0.5;
                let d_tau_principal = d_eps * (2.0 * mu) + Matrix3::identity() * (lambda * d_eps.trace());
                let d_tau = n * d_tau_principal * n.transpose();
                let dP = d_tau * F_inv_t - tau_F_inv_t * dF.transpose() * F_inv_t;
                dp_df.set_column(3 * l + j, &vectorize(&dP));
            }
        }
        dp_df
    }
}
