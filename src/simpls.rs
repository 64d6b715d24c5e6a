// src/simpls.rs

use crate::diagnostics::{self, ExtractionDiagnostics};
use crate::error::{PlsError, PlsResult};
use crate::linalg_backends::{BackendSVD, LinAlgBackendProvider};
use crate::storage::StoredCenteredMatrix;
use log::{debug, info, trace};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

// --- Trait for abstracting centered predictor access ---

/// How the SIMPLS engine reads the centered predictor matrix X (n × p).
///
/// The engine only ever needs `X·B`, `Xᵗ·B` and the total sum of squares, so
/// an implementation may keep X in memory or stream it from disk.
pub trait CenteredPredictors {
    /// n, the number of observations (rows of X).
    fn n_observations(&self) -> usize;

    /// p, the number of predictors (columns of X).
    fn n_predictors(&self) -> usize;

    /// `X · b` for `b` of shape (p × c). Returns (n × c).
    fn dot(&self, b: ArrayView2<f64>) -> PlsResult<Array2<f64>>;

    /// `Xᵗ · b` for `b` of shape (n × c). Returns (p × c).
    fn t_dot(&self, b: ArrayView2<f64>) -> PlsResult<Array2<f64>>;

    /// Σ X², the total centered sum of squares.
    fn sum_of_squares(&self) -> f64;
}

/// A centered predictor matrix held in memory.
#[derive(Debug, Clone, Copy)]
pub struct InMemoryPredictors<'a> {
    data: ArrayView2<'a, f64>,
}

impl<'a> InMemoryPredictors<'a> {
    /// Wraps an already centered matrix. No centering is done here.
    pub fn new(centered: ArrayView2<'a, f64>) -> Self {
        Self { data: centered }
    }

    pub fn view(&self) -> ArrayView2<'a, f64> {
        self.data
    }
}

impl CenteredPredictors for InMemoryPredictors<'_> {
    fn n_observations(&self) -> usize {
        self.data.nrows()
    }

    fn n_predictors(&self) -> usize {
        self.data.ncols()
    }

    fn dot(&self, b: ArrayView2<f64>) -> PlsResult<Array2<f64>> {
        Ok(self.data.dot(&b))
    }

    fn t_dot(&self, b: ArrayView2<f64>) -> PlsResult<Array2<f64>> {
        Ok(self.data.t().dot(&b))
    }

    fn sum_of_squares(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }
}

impl CenteredPredictors for StoredCenteredMatrix {
    fn n_observations(&self) -> usize {
        self.nrows()
    }

    fn n_predictors(&self) -> usize {
        self.ncols()
    }

    fn dot(&self, b: ArrayView2<f64>) -> PlsResult<Array2<f64>> {
        StoredCenteredMatrix::dot(self, b)
    }

    fn t_dot(&self, b: ArrayView2<f64>) -> PlsResult<Array2<f64>> {
        StoredCenteredMatrix::t_dot(self, b)
    }

    fn sum_of_squares(&self) -> f64 {
        StoredCenteredMatrix::sum_of_squares(self)
    }
}

// --- Configuration ---

/// Numerical knobs of the SIMPLS engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimplsConfig {
    /// A component is degenerate when ‖X·r‖ ≤ `score_norm_epsilon · max(1, ‖X‖_F)`.
    pub score_norm_epsilon: f64,
    /// Modified Gram-Schmidt sweeps used for the deflation basis and for the
    /// Y-score orthogonalization. Two sweeps restore orthogonality lost to rounding.
    pub gram_schmidt_passes: usize,
}

impl Default for SimplsConfig {
    fn default() -> Self {
        SimplsConfig {
            score_norm_epsilon: 1e-10,
            gram_schmidt_passes: 2,
        }
    }
}

// --- Output ---

/// Per-component results of one SIMPLS extraction. Column `i` of every
/// matrix belongs to component `i`, in extraction order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplsOutput {
    /// Shape: (p × k)
    pub x_loadings: Array2<f64>,
    /// Shape: (m × k)
    pub y_loadings: Array2<f64>,
    /// Unit-norm, mutually orthogonal X scores. Shape: (n × k)
    pub x_scores: Array2<f64>,
    /// Y scores orthogonalized against the preceding X scores, so that
    /// `x_scoresᵗ · y_scores` is lower triangular. Shape: (n × k)
    pub y_scores: Array2<f64>,
    /// Weights W with `x_scores = X · W`. Shape: (p × k)
    pub weights: Array2<f64>,
    pub diagnostics: ExtractionDiagnostics,
}

impl SimplsOutput {
    pub fn num_components(&self) -> usize {
        self.x_scores.ncols()
    }
}

// --- Engine ---

/// The SIMPLS component extractor (de Jong, 1993).
///
/// A direct method: exactly `k` SVDs of a shrinking cross-covariance matrix,
/// no inner convergence loop. Each call owns its own covariance and deflation
/// basis, so one engine may serve many sequential or parallel calls.
#[derive(Debug, Clone, Default)]
pub struct SimplsEngine {
    config: SimplsConfig,
    backend: LinAlgBackendProvider<f64>,
}

impl SimplsEngine {
    pub fn new(config: SimplsConfig) -> Self {
        Self {
            config,
            backend: LinAlgBackendProvider::new(),
        }
    }

    pub fn config(&self) -> &SimplsConfig {
        &self.config
    }

    /// Extracts `n_components` SIMPLS components from centered `x` and centered `y`.
    ///
    /// Callers guarantee `x` and `y` have the same number of rows and that
    /// `1 <= n_components <= min(n - 1, p)`; see [`crate::pls::validate_inputs`].
    ///
    /// # Errors
    /// - [`PlsError::DegenerateComponent`] when a score vector collapses to
    ///   (near) zero norm; `extracted` tells how many components were fine.
    /// - [`PlsError::Linalg`] if the SVD backend fails.
    /// - I/O and parse errors from a file-backed `x`.
    pub fn extract<X>(&self, x: &X, y: ArrayView2<f64>, n_components: usize) -> PlsResult<SimplsOutput>
    where
        X: CenteredPredictors + ?Sized,
    {
        let n_obs = x.n_observations();
        let n_pred = x.n_predictors();
        let n_resp = y.ncols();
        debug_assert_eq!(y.nrows(), n_obs, "X and Y must have the same number of observations");
        debug_assert!(
            n_components >= 1 && n_components <= n_obs.saturating_sub(1).min(n_pred),
            "n_components must lie in 1..=min(n-1, p)"
        );

        info!(
            "Starting SIMPLS extraction. Observations={}, Predictors={}, Responses={}, Components={}",
            n_obs, n_pred, n_resp, n_components
        );
        let start_time = std::time::Instant::now();

        let degenerate_threshold = self.config.score_norm_epsilon * x.sum_of_squares().sqrt().max(1.0);
        let passes = self.config.gram_schmidt_passes;

        let mut x_loadings = Array2::<f64>::zeros((n_pred, n_components));
        let mut y_loadings = Array2::<f64>::zeros((n_resp, n_components));
        let mut x_scores = Array2::<f64>::zeros((n_obs, n_components));
        let mut y_scores = Array2::<f64>::zeros((n_obs, n_components));
        let mut weights = Array2::<f64>::zeros((n_pred, n_components));
        // Orthonormal basis for the span of the X loadings.
        let mut basis = Array2::<f64>::zeros((n_pred, n_components));

        let mut singular_values = Vec::with_capacity(n_components);
        let mut score_norms = Vec::with_capacity(n_components);

        let mut cov = x.t_dot(y)?;

        for i in 0..n_components {
            // Unit t = X·r and u = Y·c with maximal covariance rᵗ·Xᵗ·Y·c,
            // subject to t being orthogonal to all earlier scores.
            let svd = self
                .backend
                .thin_svd(cov.clone())
                .map_err(|e| PlsError::Linalg(format!("SVD of the {}x{} cross-covariance failed: {}", n_pred, n_resp, e)))?;
            let (r, s_val, c) = svd.leading_triplet().ok_or_else(|| {
                PlsError::Linalg(format!("SVD of the {}x{} cross-covariance returned no singular triplet", n_pred, n_resp))
            })?;

            let mut t = x.dot(r.view().insert_axis(Axis(1)))?.index_axis_move(Axis(1), 0);
            let norm_t = t.dot(&t).sqrt();
            if !(norm_t > degenerate_threshold) {
                info!(
                    "SIMPLS stopped at component {}: score norm {:e} is at or below {:e}",
                    i + 1,
                    norm_t,
                    degenerate_threshold
                );
                return Err(PlsError::DegenerateComponent {
                    extracted: i,
                    requested: n_components,
                });
            }
            t /= norm_t;

            let p_load = x.t_dot(t.view().insert_axis(Axis(1)))?.index_axis_move(Axis(1), 0);
            // q = Yᵗ·t
            let q = c.mapv(|cj| cj * s_val / norm_t);
            let u = y.dot(&q);

            x_loadings.column_mut(i).assign(&p_load);
            y_loadings.column_mut(i).assign(&q);
            x_scores.column_mut(i).assign(&t);
            y_scores.column_mut(i).assign(&u);
            // Rescaled so that rᵗ·Xᵗ·X·r = tᵗ·t = 1.
            weights.column_mut(i).assign(&(&r / norm_t));

            let mut v = p_load;
            modified_gram_schmidt(&mut v, basis.slice(s![.., ..i]), passes);
            let norm_v = v.dot(&v).sqrt();
            // rᵗ·v = ‖X·r‖ with r orthogonal to the basis, so a healthy component
            // always keeps ‖v‖ above the score threshold.
            if !(norm_v > degenerate_threshold) {
                info!("SIMPLS stopped at component {}: X loading lies in the span of earlier loadings", i + 1);
                return Err(PlsError::DegenerateComponent {
                    extracted: i,
                    requested: n_components,
                });
            }
            v /= norm_v;
            basis.column_mut(i).assign(&v);

            // Deflate: remove the new direction, then whatever noise has crept
            // back in along all earlier directions.
            let v_col = v.view().insert_axis(Axis(1));
            let vt_cov = v_col.t().dot(&cov);
            cov -= &v_col.dot(&vt_cov);
            let basis_so_far = basis.slice(s![.., ..=i]);
            let projection = basis_so_far.dot(&basis_so_far.t().dot(&cov));
            cov -= &projection;

            trace!(
                "SIMPLS component {}/{}: singular value={:.6e}, score norm={:.6e}",
                i + 1,
                n_components,
                s_val,
                norm_t
            );
            singular_values.push(s_val);
            score_norms.push(norm_t);
        }

        // Keep only the new contribution of each component to the Y scores,
        // which makes x_scoresᵗ·y_scores lower triangular.
        for i in 0..n_components {
            let mut u = y_scores.column(i).to_owned();
            modified_gram_schmidt(&mut u, x_scores.slice(s![.., ..i]), passes);
            y_scores.column_mut(i).assign(&u);
        }

        let diagnostics = ExtractionDiagnostics {
            n_components,
            singular_values,
            score_norms,
            deflation_basis_orthogonality_error: diagnostics::orthogonality_error(basis.view()),
            x_score_orthogonality_error: diagnostics::orthogonality_error(x_scores.view()),
            score_cross_upper_triangle_max: diagnostics::max_abs_strict_upper_triangle(
                x_scores.t().dot(&y_scores).view(),
            ),
        };
        debug!("SIMPLS diagnostics: {:?}", diagnostics);
        info!(
            "Finished SIMPLS extraction of {} components in {:?}",
            n_components,
            start_time.elapsed()
        );

        Ok(SimplsOutput {
            x_loadings,
            y_loadings,
            x_scores,
            y_scores,
            weights,
            diagnostics,
        })
    }
}

/// Modified Gram-Schmidt: removes from `vector` its projection on each column
/// of `basis` in turn, repeated `passes` times. Columns of `basis` must be
/// unit length.
pub(crate) fn modified_gram_schmidt(vector: &mut Array1<f64>, basis: ArrayView2<f64>, passes: usize) {
    for _ in 0..passes {
        for column in basis.columns() {
            let projection = column.dot(&vector.view());
            vector.scaled_add(-projection, &column);
        }
    }
}

/// Convenience for callers holding a single response vector (m = 1).
pub fn extract_single_response<X>(
    engine: &SimplsEngine,
    x: &X,
    y: ArrayView1<f64>,
    n_components: usize,
) -> PlsResult<SimplsOutput>
where
    X: CenteredPredictors + ?Sized,
{
    engine.extract(x, y.insert_axis(Axis(1)), n_components)
}

#[cfg(test)]
#[path = "simpls_tests.rs"]
mod simpls_tests;
