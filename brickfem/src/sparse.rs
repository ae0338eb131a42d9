//! Helpers for CSR matrices with a shared sparsity pattern.

use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;

use crate::error::LinearSolverError;

/// Builds a sparsity pattern from unsorted, possibly duplicated column indices per row.
pub fn sparsity_pattern_from_rows(num_cols: usize, mut rows: Vec<Vec<usize>>) -> SparsityPattern {
    let mut offsets = Vec::with_capacity(rows.len() + 1);
    let mut indices = Vec::new();
    offsets.push(0);
    for row in &mut rows {
        row.sort_unstable();
        row.dedup();
        indices.extend_from_slice(row);
        offsets.push(indices.len());
    }
    SparsityPattern::try_from_offsets_and_indices(rows.len(), num_cols, offsets, indices)
        .expect("sorted and deduplicated rows always form a valid pattern")
}

/// Creates a CSR matrix with the given pattern and all stored values set to zero.
pub fn zeroed_csr_from_pattern(pattern: &SparsityPattern) -> CsrMatrix<f64> {
    let values = vec![0.0; pattern.nnz()];
    CsrMatrix::try_from_pattern_and_values(pattern.clone(), values)
        .expect("number of values always matches the pattern")
}

/// Adds `value` to the stored entry `(row, col)`. Returns `false` if the entry is not in the pattern.
pub fn add_to_csr_entry(row_offsets: &[usize], col_indices: &[usize], values: &mut [f64], row: usize, col: usize, value: f64) -> bool {
    let begin = row_offsets[row];
    let end = row_offsets[row + 1];
    match col_indices[begin..end].binary_search(&col) {
        Ok(local_index) => {
            values[begin + local_index] += value;
            true
        }
        Err(_) => false,
    }
}

/// Computes `y = A x` with rows distributed over the rayon thread pool.
pub fn spmv_csr_par(
    mut y: DVectorViewMut<f64>,
    a: &CsrMatrix<f64>,
    x: DVectorView<f64>,
) -> Result<(), LinearSolverError> {
    if a.ncols() != x.len() {
        return Err(LinearSolverError::DimensionMismatch {
            operator: a.ncols(),
            vector: x.len(),
        });
    }
    if a.nrows() != y.len() {
        return Err(LinearSolverError::DimensionMismatch {
            operator: a.nrows(),
            vector: y.len(),
        });
    }

    let row_offsets = a.row_offsets();
    let col_indices = a.col_indices();
    let values = a.values();
    y.as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, y_i)| {
            let range = row_offsets[i]..row_offsets[i + 1];
            *y_i = col_indices[range.clone()]
                .iter()
                .zip(&values[range])
                .map(|(j, a_ij)| a_ij * x[*j])
                .sum();
        });
    Ok(())
}

/// Extracts the diagonal. Missing diagonal entries are zero.
pub fn csr_diagonal(a: &CsrMatrix<f64>) -> DVector<f64> {
    let n = a.nrows().min(a.ncols());
    DVector::from_fn(n, |i, _| {
        let row = a.row(i);
        match row.col_indices().binary_search(&i) {
            Ok(local_index) => row.values()[local_index],
            Err(_) => 0.0,
        }
    })
}

/// Computes `target += scale * source` for matrices with identical sparsity patterns.
///
/// # Panics
///
/// Panics if the patterns differ.
pub fn add_scaled_csr(target: &mut CsrMatrix<f64>, scale: f64, source: &CsrMatrix<f64>) {
    assert_eq!(
        target.pattern(),
        source.pattern(),
        "matrices must share the same sparsity pattern"
    );
    target
        .values_mut()
        .iter_mut()
        .zip(source.values())
        .for_each(|(t, s)| *t += scale * s);
}

/// Forms `sum_i c_i A_i` for matrices sharing the sparsity pattern of `pattern`.
pub fn csr_linear_combination<'a>(
    pattern: &SparsityPattern,
    terms: impl IntoIterator<Item = (f64, &'a CsrMatrix<f64>)>,
) -> CsrMatrix<f64> {
    let mut result = zeroed_csr_from_pattern(pattern);
    for (coefficient, matrix) in terms {
        if coefficient != 0.0 {
            add_scaled_csr(&mut result, coefficient, matrix);
        }
    }
    result
}
