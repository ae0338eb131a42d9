//! Gauss-Legendre quadrature rules on the reference cube `[-1, 1]^3`.

use nalgebra::Vector3;

pub trait Quadrature {
    fn weights(&self) -> &[f64];
    fn points(&self) -> &[Vector3<f64>];

    fn len(&self) -> usize {
        self.weights().len()
    }

    fn is_empty(&self) -> bool {
        self.weights().is_empty()
    }

    /// Integrates `f` over the reference domain.
    fn integrate(&self, f: impl Fn(&Vector3<f64>) -> f64) -> f64
    where
        Self: Sized,
    {
        self.weights()
            .iter()
            .zip(self.points())
            .map(|(w, xi)| w * f(xi))
            .sum()
    }
}

impl Quadrature for (Vec<f64>, Vec<Vector3<f64>>) {
    fn weights(&self) -> &[f64] {
        &self.0
    }

    fn points(&self) -> &[Vector3<f64>] {
        &self.1
    }
}

impl<Q: Quadrature> Quadrature for &Q {
    fn weights(&self) -> &[f64] {
        Q::weights(*self)
    }

    fn points(&self) -> &[Vector3<f64>] {
        Q::points(*self)
    }
}

/// One-dimensional Gauss-Legendre rule with `n` points on `[-1, 1]`, for `1 <= n <= 4`.
pub fn gauss_legendre_1d(n: usize) -> Option<(Vec<f64>, Vec<f64>)> {
    let rule = match n {
        1 => (vec![2.0], vec![0.0]),
        2 => {
            let x = 1.0 / f64::sqrt(3.0);
            (vec![1.0, 1.0], vec![-x, x])
        }
        3 => {
            let x = f64::sqrt(3.0 / 5.0);
            (vec![5.0 / 9.0, 8.0 / 9.0, 5.0 / 9.0], vec![-x, 0.0, x])
        }
        4 => {
            let a = f64::sqrt(3.0 / 7.0 - 2.0 / 7.0 * f64::sqrt(6.0 / 5.0));
            let b = f64::sqrt(3.0 / 7.0 + 2.0 / 7.0 * f64::sqrt(6.0 / 5.0));
            let w_a = (18.0 + f64::sqrt(30.0)) / 36.0;
            let w_b = (18.0 - f64::sqrt(30.0)) / 36.0;
            (vec![w_b, w_a, w_a, w_b], vec![-b, -a, a, b])
        }
        _ => return None,
    };
    Some(rule)
}

/// Tensor-product Gauss rule with `n` points per axis, exact for polynomials of degree `2n - 1`
/// in each variable.
pub fn hex_gauss_quadrature(n: usize) -> Option<(Vec<f64>, Vec<Vector3<f64>>)> {
    let (w1d, x1d) = gauss_legendre_1d(n)?;
    let mut weights = Vec::with_capacity(n * n * n);
    let mut points = Vec::with_capacity(n * n * n);
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                weights.push(w1d[i] * w1d[j] * w1d[k]);
                points.push(Vector3::new(x1d[i], x1d[j], x1d[k]));
            }
        }
    }
    Some((weights, points))
}

/// 2x2x2 Gauss rule.
pub fn hex_quadrature_strength_3() -> (Vec<f64>, Vec<Vector3<f64>>) {
    hex_gauss_quadrature(2).expect("two-point rule is always available")
}

/// 3x3x3 Gauss rule.
pub fn hex_quadrature_strength_5() -> (Vec<f64>, Vec<Vector3<f64>>) {
    hex_gauss_quadrature(3).expect("three-point rule is always available")
}
