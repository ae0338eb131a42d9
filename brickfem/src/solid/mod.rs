//! Finite-strain constitutive models.
//!
//! All models map a deformation gradient `F` (and the committed state of the material point)
//! to the first Piola-Kirchhoff stress `P`. Derivatives `dP/dF` are stored as 9x9 matrices
//! acting on column-major vectorizations of 3x3 matrices, i.e. entry `(3 * k + i, 3 * l + j)`
//! holds `dP_ik / dF_jl`.

pub mod materials;
pub mod plasticity;

use std::fmt::Debug;
use std::ops::Deref;

use delegate::delegate;
use nalgebra::{Matrix3, RealField, SMatrix, SVector, Vector3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

pub type Matrix9<T> = SMatrix<T, 9, 9>;
pub type Vector9<T> = SVector<T, 9>;

/// History variables of a single material point.
///
/// Elastic models ignore the state and never change it.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialPointState<T: RealField + Copy> {
    /// Inverse of the plastic right Cauchy-Green tensor `C_p^{-1}`.
    pub inverse_plastic_cauchy_green: Matrix3<T>,
    pub accumulated_plastic_strain: T,
}

impl<T: RealField + Copy> Default for MaterialPointState<T> {
    fn default() -> Self {
        Self {
            inverse_plastic_cauchy_green: Matrix3::identity(),
            accumulated_plastic_strain: T::zero(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StressUpdate<T: RealField + Copy> {
    /// First Piola-Kirchhoff stress.
    pub stress: Matrix3<T>,
    /// State after the update. Only committed once the enclosing solve has converged.
    pub state: MaterialPointState<T>,
    /// Whether the update involved a plastic correction of the trial stress.
    pub plastic: bool,
}

pub trait ConstitutiveModel<T>: Debug
where
    T: RealField + Copy,
{
    /// Whether the stress depends on the material point history.
    fn is_path_dependent(&self) -> bool {
        false
    }

    /// Computes the first Piola-Kirchhoff stress for an invertible deformation gradient,
    /// starting from the last committed state.
    fn compute_stress_tensor(
        &self,
        deformation_gradient: &Matrix3<T>,
        state: &MaterialPointState<T>,
    ) -> StressUpdate<T>;

    /// Computes `dP/dF` with the history state held fixed at `state`.
    ///
    /// The default implementation uses central finite differences.
    fn compute_stress_derivative(&self, deformation_gradient: &Matrix3<T>, state: &MaterialPointState<T>) -> Matrix9<T> {
        let h = default_difference_step(deformation_gradient);
        approximate_stress_derivative(self, deformation_gradient, state, h)
    }

    /// Contracts the stress derivative with two vectors, `C_ij = dP_ik / dF_jl a_k b_l`.
    fn contract_stress_tensor_with(
        &self,
        deformation_gradient: &Matrix3<T>,
        state: &MaterialPointState<T>,
        a: &Vector3<T>,
        b: &Vector3<T>,
    ) -> Matrix3<T> {
        let dp_df = self.compute_stress_derivative(deformation_gradient, state);
        contract_stress_derivative(&dp_df, a, b)
    }
}

impl<T, X> ConstitutiveModel<T> for &X
where
    T: RealField + Copy,
    X: ConstitutiveModel<T>,
{
    delegate! {
        to self.deref() {
            fn is_path_dependent(&self) -> bool;
            fn compute_stress_tensor(
                &self,
                deformation_gradient: &Matrix3<T>,
                state: &MaterialPointState<T>
            ) -> StressUpdate<T>;
        }
    }

    fn compute_stress_derivative(&self, deformation_gradient: &Matrix3<T>, state: &MaterialPointState<T>) -> Matrix9<T> {
        X::compute_stress_derivative(*self, deformation_gradient, state)
    }
}

/// Column-major vectorization of a 3x3 matrix.
pub fn vectorize<T: RealField + Copy>(matrix: &Matrix3<T>) -> Vector9<T> {
    let mut result = Vector9::zeros();
    for j in 0..3 {
        for i in 0..3 {
            result[3 * j + i] = matrix[(i, j)];
        }
    }
    result
}

pub fn unvectorize<T: RealField + Copy>(vector: &Vector9<T>) -> Matrix3<T> {
    let mut result = Matrix3::zeros();
    for j in 0..3 {
        for i in 0..3 {
            result[(i, j)] = vector[3 * j + i];
        }
    }
    result
}

/// Computes `C_ij = dP_ik / dF_jl a_k b_l` from a vectorized stress derivative.
#[allow(non_snake_case)]
pub fn contract_stress_derivative<T: RealField + Copy>(dp_df: &Matrix9<T>, a: &Vector3<T>, b: &Vector3<T>) -> Matrix3<T> {
    let mut result = Matrix3::zeros();
    for l in 0..3 {
        for k in 0..3 {
            let a_k_b_l = a[k] * b[l];
            for j in 0..3 {
                for i in 0..3 {
                    result[(i, j)] += dp_df[(3 * k + i, 3 * l + j)] * a_k_b_l;
                }
            }
        }
    }
    result
}

/// Step for central differences of the stress. Eigen decompositions in the stress evaluation
/// carry round-off well above machine precision, so the step is kept comparatively large.
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
pub(crate) fn default_difference_step<T: RealField + Copy>(deformation_gradient: &Matrix3<T>) -> T {
    1e-4 * T::max(1.0, deformation_gradient.norm())
}

/// Central finite-difference approximation of `dP/dF`.
#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
pub fn approximate_stress_derivative<T, M>(
    model: &M,
    F: &Matrix3<T>,
    state: &MaterialPointState<T>,
    h: T,
) -> Matrix9<T>
where
    T: RealField + Copy,
    M: ?Sized + ConstitutiveModel<T>,
{
    let mut result = Matrix9::zeros();
    let P = |F: &Matrix3<T>| vectorize(&model.compute_stress_tensor(F, state).stress);

    for l in 0..3 {
        for j in 0..3 {
            let mut F_plus = *F;
            let mut F_minus = *F;
            F_plus[(j, l)] += h;
            F_minus[(j, l)] -= h;
            let column = (P(&F_plus) - P(&F_minus)) / (2.0 * h);
            result.set_column(3 * l + j, &column);
        }
    }

    result
}

/// Green-Lagrange strain in Voigt notation with engineering shear components,
/// ordered `xx, yy, zz, xy, xz, yz`.
#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
pub fn green_lagrange_strain_voigt<T: RealField + Copy>(F: &Matrix3<T>) -> SVector<T, 6> {
    let E = (F.transpose() * F - Matrix3::identity()) * 0.5;
    symmetric_to_voigt_strain(&E)
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
pub fn symmetric_to_voigt_strain<T: RealField + Copy>(e: &Matrix3<T>) -> SVector<T, 6> {
    SVector::<T, 6>::from_column_slice(&[
        e[(0, 0)],
        e[(1, 1)],
        e[(2, 2)],
        e[(0, 1)] + e[(1, 0)],
        e[(0, 2)] + e[(2, 0)],
        e[(1, 2)] + e[(2, 1)],
    ])
}

pub fn voigt_to_symmetric_stress<T: RealField + Copy>(s: &SVector<T, 6>) -> Matrix3<T> {
    Matrix3::new(s[0], s[3], s[4], s[3], s[1], s[5], s[4], s[5], s[2])
}
