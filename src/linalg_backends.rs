// src/linalg_backends.rs

#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

use ndarray::{Array1, Array2};
use std::error::Error;
use std::marker::PhantomData;

/// Boxed backend error. The SIMPLS engine maps this into `PlsError::Linalg`.
pub type BackendError = Box<dyn Error + Send + Sync>;

/// Output of a thin Singular Value Decomposition `A = U · diag(s) · Vᵗ`.
///
/// For an (r × c) input with `k = min(r, c)`: `u` is (r × k), `s` has length k
/// sorted in descending order, and `vt` is (k × c).
#[derive(Debug)]
pub struct SVDOutput<F: 'static> {
    pub u: Array2<F>,
    pub s: Array1<F>,
    pub vt: Array2<F>,
}

impl<F: 'static + Copy> SVDOutput<F> {
    /// The leading singular triplet `(u₀, s₀, v₀)`, or `None` for an empty decomposition.
    pub fn leading_triplet(&self) -> Option<(Array1<F>, F, Array1<F>)> {
        if self.s.is_empty() || self.u.ncols() == 0 || self.vt.nrows() == 0 {
            return None;
        }
        Some((
            self.u.column(0).to_owned(),
            self.s[0],
            self.vt.row(0).to_owned(),
        ))
    }
}

/// Trait for thin Singular Value Decomposition.
pub trait BackendSVD<F: 'static + Copy + Send + Sync> {
    fn thin_svd(&self, matrix: Array2<F>) -> Result<SVDOutput<F>, BackendError>;
}

// --- NdarrayLinAlgBackend (LAPACK through ndarray-linalg) ---
use ndarray_linalg::{JobSvd, SVDDCInto as NdLinalgSVDDCInto};

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> BackendError {
    Box::new(e)
}

fn missing_factor(name: &str, rows: usize, cols: usize) -> BackendError {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("LAPACK divide-and-conquer SVD of a {}x{} matrix returned no {} factor", rows, cols, name),
    ))
}

fn empty_svd(nrows: usize, ncols: usize) -> SVDOutput<f64> {
    let k_dim = nrows.min(ncols);
    SVDOutput {
        u: Array2::zeros((nrows, k_dim)),
        s: Array1::zeros(k_dim),
        vt: Array2::zeros((k_dim, ncols)),
    }
}

impl BackendSVD<f64> for NdarrayLinAlgBackend {
    fn thin_svd(&self, matrix: Array2<f64>) -> Result<SVDOutput<f64>, BackendError> {
        let (nrows, ncols) = matrix.dim();
        if matrix.is_empty() {
            return Ok(empty_svd(nrows, ncols));
        }
        let (u, s, vt) = matrix.svddc_into(JobSvd::Some).map_err(to_dyn_error)?;
        let u = u.ok_or_else(|| missing_factor("U", nrows, ncols))?;
        let vt = vt.ok_or_else(|| missing_factor("Vt", nrows, ncols))?;
        Ok(SVDOutput { u, s, vt })
    }
}

// --- FaerLinAlgBackend ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{empty_svd, BackendError, BackendSVD, SVDOutput};
    use bytemuck::Pod;
    use faer::linalg::solvers::Svd as FaerSolverSvd;
    use faer::traits::num_traits::Zero;
    use faer::traits::ComplexField;
    use faer::MatRef;
    use ndarray::{Array1, Array2, ShapeBuilder};

    fn to_dyn_error_faer(msg: String) -> BackendError {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, msg))
    }

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    fn faer_mat_to_ndarray<F: ComplexField + Copy + Pod + Zero>(faer_mat: MatRef<'_, F>) -> Array2<F> {
        Array2::from_shape_fn((faer_mat.nrows(), faer_mat.ncols()).f(), |(i, j)| unsafe {
            *faer_mat.get_unchecked(i, j)
        })
    }

    fn faer_col_to_ndarray_vec<F: ComplexField + Copy + Pod + Zero>(faer_col: faer::ColRef<'_, F>) -> Array1<F> {
        (0..faer_col.nrows())
            .map(|i| unsafe { *faer_col.get_unchecked(i) })
            .collect()
    }

    impl BackendSVD<f64> for FaerLinAlgBackend {
        fn thin_svd(&self, matrix: Array2<f64>) -> Result<SVDOutput<f64>, BackendError> {
            let (nrows, ncols) = matrix.dim();
            if matrix.is_empty() {
                return Ok(empty_svd(nrows, ncols));
            }
            // faer views need contiguous memory; a row-major copy is made only when required.
            let row_major = matrix.as_standard_layout();
            let slice = row_major.as_slice().ok_or_else(|| {
                to_dyn_error_faer(format!("Failed to get a contiguous slice from a {}x{} matrix", nrows, ncols))
            })?;
            let faer_mat_ref = MatRef::from_row_major_slice(slice, nrows, ncols);

            let svd_solver_instance = FaerSolverSvd::new_thin(faer_mat_ref)
                .map_err(|e| to_dyn_error_faer(format!("Faer SVD computation failed: {:?}", e)))?;

            let s = faer_col_to_ndarray_vec(svd_solver_instance.S().column_vector());
            let u = faer_mat_to_ndarray(svd_solver_instance.U().as_ref());
            let vt = faer_mat_to_ndarray(svd_solver_instance.V().as_ref()).t().into_owned();
            Ok(SVDOutput { u, s, vt })
        }
    }
}

// --- Provider dispatch, selected by cargo feature ---

impl BackendSVD<f64> for LinAlgBackendProvider<f64> {
    fn thin_svd(&self, matrix: Array2<f64>) -> Result<SVDOutput<f64>, BackendError> {
        #[cfg(feature = "backend_faer")]
        {
            faer_specific_code::FaerLinAlgBackend.thin_svd(matrix)
        }
        #[cfg(not(feature = "backend_faer"))]
        {
            NdarrayLinAlgBackend.thin_svd(matrix)
        }
    }
}
