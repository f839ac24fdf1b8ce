//! Pluggable sparse linear solver backends.
//!
//! The solver hands the backend one compressed-sparse-column matrix and a
//! right-hand side per Newton iteration. The shipped backend expands to a
//! dense LU factorization, the single-threaded direct fallback; a parallel
//! sparse direct solver can be plugged in through the same trait.

use nalgebra::DVector;

use crate::graph::CscMatrix;

/// Failure modes of a linear solve.
#[derive(Debug)]
pub enum LinearSolveError {
    /// The matrix is (near-)singular; `near_null` is a right singular
    /// vector to the smallest singular value, pointing at the degenerate
    /// variable combination.
    Singular { near_null: Vec<f64> },
    /// Any other backend failure.
    Failed(String),
}

/// Contract of a direct linear solver: `solve(A, b) -> x` with `A x = b`.
pub trait LinearSolverBackend {
    fn solve(&self, matrix: &CscMatrix, rhs: &[f64]) -> Result<Vec<f64>, LinearSolveError>;
}

/// Dense LU factorization backend (single-threaded direct fallback).
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseLuBackend;

impl DenseLuBackend {
    fn near_null_vector(dense: &nalgebra::DMatrix<f64>) -> Vec<f64> {
        let svd = dense.clone().svd(false, true);
        let singular = &svd.singular_values;
        let mut smallest = 0;
        for i in 1..singular.len() {
            if singular[i] < singular[smallest] {
                smallest = i;
            }
        }
        match &svd.v_t {
            Some(v_t) => v_t.row(smallest).iter().copied().collect(),
            None => vec![0.0; dense.ncols()],
        }
    }
}

impl LinearSolverBackend for DenseLuBackend {
    fn solve(&self, matrix: &CscMatrix, rhs: &[f64]) -> Result<Vec<f64>, LinearSolveError> {
        if matrix.nrows != matrix.ncols {
            return Err(LinearSolveError::Failed(format!(
                "matrix is {}x{}, expected square",
                matrix.nrows, matrix.ncols
            )));
        }
        let dense = matrix.to_dense();
        let lu = dense.clone().lu();
        let solution = lu.solve(&DVector::from_column_slice(rhs));
        match solution {
            Some(solution) if solution.iter().all(|v| v.is_finite()) => {
                Ok(solution.iter().copied().collect())
            }
            _ => Err(LinearSolveError::Singular {
                near_null: DenseLuBackend::near_null_vector(&dense),
            }),
        }
    }
}
