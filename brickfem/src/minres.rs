//! Preconditioned MINRES for symmetric, possibly indefinite systems.
//!
//! The implementation follows the Lanczos-based algorithm of Paige and Saunders with a
//! symmetric positive definite preconditioner.

use std::fmt::Debug;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::error::LinearSolverError;
use crate::sparse::{csr_diagonal, spmv_csr_par};

pub trait LinearOperator {
    /// Computes `y = A x`.
    fn apply(&self, y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), LinearSolverError>;
}

impl<A: ?Sized + LinearOperator> LinearOperator for &A {
    fn apply(&self, y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), LinearSolverError> {
        A::apply(*self, y, x)
    }
}

impl LinearOperator for CsrMatrix<f64> {
    fn apply(&self, y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), LinearSolverError> {
        spmv_csr_par(y, self, x)
    }
}

impl LinearOperator for DMatrix<f64> {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), LinearSolverError> {
        if self.ncols() != x.len() || self.nrows() != y.len() {
            return Err(LinearSolverError::DimensionMismatch {
                operator: self.ncols(),
                vector: x.len(),
            });
        }
        y.gemv(1.0, self, &x, 0.0);
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityOperator;

impl LinearOperator for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), LinearSolverError> {
        if y.len() != x.len() {
            return Err(LinearSolverError::DimensionMismatch {
                operator: y.len(),
                vector: x.len(),
            });
        }
        y.copy_from(&x);
        Ok(())
    }
}

/// A preconditioner that is rebuilt from the system matrix before each solve.
pub trait SystemPreconditioner: Debug + Send + Sync {
    fn update(&mut self, matrix: &CsrMatrix<f64>) -> Result<(), LinearSolverError>;

    /// The action of the inverse preconditioner.
    fn as_linear_operator(&self) -> &dyn LinearOperator;

    /// A factor `c` with `|r| <= c |r|_P` for the preconditioned residual norm `|r|_P`.
    fn residual_norm_bound(&self) -> f64 {
        1.0
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityPreconditioner;

impl SystemPreconditioner for IdentityPreconditioner {
    fn update(&mut self, _matrix: &CsrMatrix<f64>) -> Result<(), LinearSolverError> {
        Ok(())
    }

    fn as_linear_operator(&self) -> &dyn LinearOperator {
        &IdentityOperator
    }
}

/// Jacobi preconditioner built from the absolute values of the diagonal, so that it stays
/// positive definite for indefinite systems.
#[derive(Clone, Debug, PartialEq)]
pub struct DiagonalPreconditioner {
    inverse_diagonal: DVector<f64>,
    norm_bound: f64,
}

impl Default for DiagonalPreconditioner {
    fn default() -> Self {
        Self {
            inverse_diagonal: DVector::zeros(0),
            norm_bound: 1.0,
        }
    }
}

impl DiagonalPreconditioner {
    pub fn from_matrix(matrix: &CsrMatrix<f64>) -> Result<Self, LinearSolverError> {
        let mut preconditioner = Self::default();
        preconditioner.update(matrix)?;
        Ok(preconditioner)
    }

    pub fn inverse_diagonal(&self) -> &DVector<f64> {
        &self.inverse_diagonal
    }
}

impl LinearOperator for DiagonalPreconditioner {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), LinearSolverError> {
        if x.len() != self.inverse_diagonal.len() || y.len() != x.len() {
            return Err(LinearSolverError::DimensionMismatch {
                operator: self.inverse_diagonal.len(),
                vector: x.len(),
            });
        }
        y.zip_zip_apply(&x, &self.inverse_diagonal, |y_i, x_i, d_i| *y_i = d_i * x_i);
        Ok(())
    }
}

impl SystemPreconditioner for DiagonalPreconditioner {
    fn update(&mut self, matrix: &CsrMatrix<f64>) -> Result<(), LinearSolverError> {
        let diagonal = csr_diagonal(matrix);
        if let Some(row) = diagonal.iter().position(|d| *d == 0.0 || !d.is_finite()) {
            return Err(LinearSolverError::SingularPreconditioner { row });
        }
        self.norm_bound = diagonal.iter().fold(0.0, |max: f64, d| max.max(d.abs())).sqrt();
        self.inverse_diagonal = diagonal.map(|d| 1.0 / d.abs());
        Ok(())
    }

    fn as_linear_operator(&self) -> &dyn LinearOperator {
        self
    }

    fn residual_norm_bound(&self) -> f64 {
        self.norm_bound
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreconditionerKind {
    Identity,
    Diagonal,
}

impl Default for PreconditionerKind {
    fn default() -> Self {
        PreconditionerKind::Diagonal
    }
}

impl PreconditionerKind {
    pub fn build(&self) -> Box<dyn SystemPreconditioner> {
        match self {
            PreconditionerKind::Identity => Box::new(IdentityPreconditioner),
            PreconditionerKind::Diagonal => Box::new(DiagonalPreconditioner::default()),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinresStatus {
    Converged,
    MaxIterationsReached,
    /// The Lanczos process broke down or produced non-finite values.
    Breakdown,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MinresOutput {
    pub status: MinresStatus,
    pub num_iterations: usize,
    /// Norm of the true residual `b - A x` of the returned iterate.
    pub residual_norm: f64,
}

impl MinresOutput {
    pub fn converged(&self) -> bool {
        self.status == MinresStatus::Converged
    }
}

/// Reusable vectors for MINRES.
#[derive(Clone, Debug)]
pub struct MinresWorkspace {
    r1: DVector<f64>,
    r2: DVector<f64>,
    y: DVector<f64>,
    v: DVector<f64>,
    w: DVector<f64>,
    w1: DVector<f64>,
    w2: DVector<f64>,
    residual: DVector<f64>,
}

impl Default for MinresWorkspace {
    fn default() -> Self {
        Self {
            r1: DVector::zeros(0),
            r2: DVector::zeros(0),
            y: DVector::zeros(0),
            v: DVector::zeros(0),
            w: DVector::zeros(0),
            w1: DVector::zeros(0),
            w2: DVector::zeros(0),
            residual: DVector::zeros(0),
        }
    }
}

impl MinresWorkspace {
    fn prepare(&mut self, dim: usize) {
        for vector in [
            &mut self.r1,
            &mut self.r2,
            &mut self.y,
            &mut self.v,
            &mut self.w,
            &mut self.w1,
            &mut self.w2,
            &mut self.residual,
        ] {
            if vector.len() != dim {
                *vector = DVector::zeros(dim);
            } else {
                vector.fill(0.0);
            }
        }
    }
}

#[derive(Debug)]
pub struct Minres<'a, A, P> {
    workspace: &'a mut MinresWorkspace,
    operator: A,
    preconditioner: P,
    tolerance: f64,
    max_iter: Option<usize>,
    norm_bound: f64,
}

impl<'a> Minres<'a, (), IdentityOperator> {
    pub fn with_workspace(workspace: &'a mut MinresWorkspace) -> Self {
        Self {
            workspace,
            operator: (),
            preconditioner: IdentityOperator,
            tolerance: 1e-12,
            max_iter: None,
            norm_bound: 1.0,
        }
    }
}

impl<'a, A, P> Minres<'a, A, P> {
    pub fn with_operator<A2>(self, operator: A2) -> Minres<'a, A2, P> {
        Minres {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            tolerance: self.tolerance,
            max_iter: self.max_iter,
            norm_bound: self.norm_bound,
        }
    }

    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> Minres<'a, A, P2> {
        Minres {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            tolerance: self.tolerance,
            max_iter: self.max_iter,
            norm_bound: self.norm_bound,
        }
    }

    /// Uses a system preconditioner, including its bound on the residual norm.
    pub fn with_system_preconditioner<'p>(
        self,
        preconditioner: &'p dyn SystemPreconditioner,
    ) -> Minres<'a, A, &'p dyn LinearOperator> {
        let norm_bound = preconditioner.residual_norm_bound();
        let mut minres = self.with_preconditioner(preconditioner.as_linear_operator());
        minres.norm_bound = norm_bound;
        minres
    }

    /// Relative tolerance: the solve converges once `|b - A x| <= tolerance * |b|`.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = Some(max_iter);
        self
    }
}

impl<'a, A, P> Minres<'a, A, P>
where
    A: LinearOperator,
    P: LinearOperator,
{
    /// Solves `A x = b` starting from the current contents of `x`.
    ///
    /// Non-convergence is reported through the status of the output. The returned iterate is
    /// the last, minimum-residual iterate.
    #[allow(clippy::many_single_char_names)]
    pub fn solve_with_guess(self, b: &DVector<f64>, x: &mut DVector<f64>) -> Result<MinresOutput, LinearSolverError> {
        let n = b.len();
        if x.len() != n {
            return Err(LinearSolverError::DimensionMismatch {
                operator: n,
                vector: x.len(),
            });
        }
        let max_iter = self.max_iter.unwrap_or(2 * n.max(1));
        let rhs_norm = b.norm();
        if rhs_norm == 0.0 {
            x.fill(0.0);
            return Ok(MinresOutput {
                status: MinresStatus::Converged,
                num_iterations: 0,
                residual_norm: 0.0,
            });
        }
        let tolerance = self.tolerance * rhs_norm;
        let norm_bound = self.norm_bound;
        let operator = &self.operator;
        let preconditioner = &self.preconditioner;

        self.workspace.prepare(n);
        let MinresWorkspace {
            r1,
            r2,
            y,
            v,
            w,
            w1,
            w2,
            residual,
        } = &mut *self.workspace;

        let mut true_residual_norm = |x: &DVector<f64>| -> Result<f64, LinearSolverError> {
            operator.apply(residual.as_view_mut(), x.as_view())?;
            residual.axpy(1.0, b, -1.0);
            Ok(residual.norm())
        };
        let output = |status, num_iterations, residual_norm| MinresOutput {
            status,
            num_iterations,
            residual_norm,
        };

        // r1 = b - A x
        operator.apply(r1.as_view_mut(), x.as_view())?;
        r1.axpy(1.0, b, -1.0);
        let initial_residual_norm = r1.norm();
        if initial_residual_norm <= tolerance {
            return Ok(output(MinresStatus::Converged, 0, initial_residual_norm));
        }

        preconditioner.apply(y.as_view_mut(), r1.as_view())?;
        let beta1 = r1.dot(y);
        if !(beta1 > 0.0) || !beta1.is_finite() {
            warn!("MINRES: preconditioner is not positive definite (beta1 = {:e})", beta1);
            return Ok(output(MinresStatus::Breakdown, 0, initial_residual_norm));
        }
        let beta1 = beta1.sqrt();
        r2.copy_from(r1);

        let mut beta = beta1;
        let mut old_beta = 0.0;
        let mut dbar = 0.0;
        let mut epsilon = 0.0;
        let mut phibar = beta1;
        let mut cs = -1.0;
        let mut sn = 0.0;

        for iteration in 1..=max_iter {
            v.copy_from(y);
            *v /= beta;
            operator.apply(y.as_view_mut(), v.as_view())?;
            if iteration >= 2 {
                y.axpy(-beta / old_beta, r1, 1.0);
            }
            let alpha = v.dot(y);
            y.axpy(-alpha / beta, r2, 1.0);
            std::mem::swap(r1, r2);
            r2.copy_from(y);
            preconditioner.apply(y.as_view_mut(), r2.as_view())?;
            old_beta = beta;
            beta = r2.dot(y);
            if !beta.is_finite() || beta < 0.0 {
                let residual_norm = true_residual_norm(x)?;
                warn!("MINRES broke down after {} iterations", iteration);
                return Ok(output(MinresStatus::Breakdown, iteration, residual_norm));
            }
            beta = beta.sqrt();

            // Apply the previous rotation and compute the next one
            let old_epsilon = epsilon;
            let delta = cs * dbar + sn * alpha;
            let gbar = sn * dbar - cs * alpha;
            epsilon = sn * beta;
            dbar = -cs * beta;
            let gamma = gbar.hypot(beta).max(f64::EPSILON);
            cs = gbar / gamma;
            sn = beta / gamma;
            let phi = cs * phibar;
            phibar *= sn;

            // w = (v - old_epsilon w1 - delta w2) / gamma with (w1, w2) the two previous directions
            std::mem::swap(w1, w2);
            std::mem::swap(w2, w);
            w.copy_from(v);
            w.axpy(-old_epsilon, w1, 1.0);
            w.axpy(-delta, w2, 1.0);
            *w /= gamma;
            x.axpy(phi, w, 1.0);

            if !phi.is_finite() || !x.iter().all(|x_i| x_i.is_finite()) {
                warn!("MINRES produced non-finite values after {} iterations", iteration);
                let residual_norm = true_residual_norm(x)?;
                return Ok(output(MinresStatus::Breakdown, iteration, residual_norm));
            }

            let lanczos_exhausted = beta == 0.0;
            if phibar * norm_bound <= tolerance || lanczos_exhausted {
                let residual_norm = true_residual_norm(x)?;
                if residual_norm <= tolerance {
                    debug!(
                        "MINRES converged after {} iterations with residual {:e}",
                        iteration, residual_norm
                    );
                    return Ok(output(MinresStatus::Converged, iteration, residual_norm));
                }
                if lanczos_exhausted {
                    return Ok(output(MinresStatus::Breakdown, iteration, residual_norm));
                }
            }
        }

        let residual_norm = true_residual_norm(x)?;
        let status = if residual_norm <= tolerance {
            MinresStatus::Converged
        } else {
            MinresStatus::MaxIterationsReached
        };
        Ok(output(status, max_iter, residual_norm))
    }
}
