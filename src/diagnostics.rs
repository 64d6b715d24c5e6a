// src/diagnostics.rs

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Numerical health of one SIMPLS extraction.
///
/// Produced by the engine after every successful run and logged at `debug`
/// level. None of these values feed back into the algorithm.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionDiagnostics {
    pub n_components: usize,
    /// Leading singular value of the deflated cross-covariance, per component.
    pub singular_values: Vec<f64>,
    /// ‖X·r‖ before normalization, per component.
    pub score_norms: Vec<f64>,
    /// max |VᵗV − I| over the deflation basis V, measured before V is dropped.
    pub deflation_basis_orthogonality_error: f64,
    /// max |TᵗT − I| over the X scores T.
    pub x_score_orthogonality_error: f64,
    /// Largest |(TᵗU)ᵢⱼ| with i < j, where U are the Y scores. Zero up to
    /// rounding, since TᵗU is lower triangular by construction.
    pub score_cross_upper_triangle_max: f64,
}

/// max |AᵗA − I| for a matrix whose columns should be orthonormal.
pub fn orthogonality_error(columns: ArrayView2<f64>) -> f64 {
    let gram = columns.t().dot(&columns);
    let identity = Array2::<f64>::eye(gram.nrows());
    (&gram - &identity)
        .iter()
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
}

/// Largest absolute entry strictly above the diagonal.
pub fn max_abs_strict_upper_triangle(matrix: ArrayView2<f64>) -> f64 {
    let mut largest = 0.0f64;
    for ((i, j), value) in matrix.indexed_iter() {
        if j > i {
            largest = largest.max(value.abs());
        }
    }
    largest
}

/// Frobenius norm; `0.0` for an empty matrix.
pub fn frobenius_norm(matrix: ArrayView2<f64>) -> f64 {
    matrix.iter().map(|v| v * v).sum::<f64>().sqrt()
}
