use proptest::collection::vec;
use proptest::prelude::*;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

pub fn vector3() -> impl Strategy<Value = Vector3<f64>> {
    // Keep coordinates moderate so that products of them stay well-conditioned
    let range = -10.0..10.0;
    [range.clone(), range.clone(), range].prop_map(|[x, y, z]| Vector3::new(x, y, z))
}

/// Points in the reference cube `[-1, 1]^3`.
pub fn reference_coordinates() -> impl Strategy<Value = Vector3<f64>> {
    let range = -1.0..1.0;
    [range.clone(), range.clone(), range].prop_map(|[x, y, z]| Vector3::new(x, y, z))
}

/// Positive brick dimensions.
pub fn brick_dimensions() -> impl Strategy<Value = Vector3<f64>> {
    let range = 0.01..2.0;
    [range.clone(), range.clone(), range].prop_map(|[x, y, z]| Vector3::new(x, y, z))
}

/// Deformation gradients `I + H` with small perturbations `|H_ij| <= max_perturbation`.
pub fn deformation_gradient(max_perturbation: f64) -> impl Strategy<Value = Matrix3<f64>> {
    vec(-max_perturbation..max_perturbation, 9)
        .prop_map(|entries| Matrix3::identity() + Matrix3::from_column_slice(&entries))
}

/// Symmetric positive definite matrices of dimension `1..=max_dim` with condition number bounded
/// by construction.
pub fn spd_matrix(max_dim: usize) -> impl Strategy<Value = DMatrix<f64>> {
    (1..=max_dim).prop_flat_map(|n| {
        vec(-1.0..1.0, n * n).prop_map(move |entries| {
            let a = DMatrix::from_column_slice(n, n, &entries);
            &a * a.transpose() + DMatrix::identity(n, n) * (n as f64)
        })
    })
}

/// A symmetric positive definite system `(A, b)`.
pub fn spd_system(max_dim: usize) -> impl Strategy<Value = (DMatrix<f64>, DVector<f64>)> {
    spd_matrix(max_dim).prop_flat_map(|a| {
        let n = a.nrows();
        vec(-10.0..10.0, n).prop_map(move |b| (a.clone(), DVector::from_vec(b)))
    })
}
