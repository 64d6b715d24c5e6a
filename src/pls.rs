// src/pls.rs

use crate::error::{PlsError, PlsResult};
use crate::partition::{partition_dataset, split_folds, FoldSplit};
use crate::simpls::{CenteredPredictors, InMemoryPredictors, SimplsConfig, SimplsEngine, SimplsOutput};
use crate::storage::{center_and_store, LayoutPolicy, RawMatrix, RowSubset, StorageLayout, DEFAULT_DELIMITER};
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

// --- Configuration ---

/// Where the centered predictor matrix lives while components are extracted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Center X into a dense in-memory matrix.
    #[default]
    InMemory,
    /// Center X into a temporary text file and stream every product from it.
    /// Use this when the centered (dense) X does not fit in memory.
    OutOfCore,
}

/// Settings for the temporary file used by [`ExecutionMode::OutOfCore`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageOptions {
    /// Directory for the centered matrix file. `None` uses the system temp directory.
    pub directory: Option<PathBuf>,
    pub layout_policy: LayoutPolicy,
    pub delimiter: char,
    /// Keep the centered matrix file after a plain (non cross-validated) fit.
    /// Its location is then reported in [`StorageSummary::kept_file`].
    pub keep_file: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        StorageOptions {
            directory: None,
            layout_policy: LayoutPolicy::default(),
            delimiter: DEFAULT_DELIMITER,
            keep_file: false,
        }
    }
}

/// Configuration of a PLS fit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlsConfig {
    /// Number of latent components k. Must satisfy `1 <= k <= min(n - 1, p)`.
    pub n_components: usize,
    /// Cross-validation folds. `0` fits once on all data; otherwise at least 2.
    pub cv_folds: usize,
    /// Stratify the folds by class. Only meaningful for classification responses.
    pub stratified_cv: bool,
    pub execution: ExecutionMode,
    pub storage: StorageOptions,
    pub simpls: SimplsConfig,
    /// Seed for the fold shuffling.
    pub random_seed: u64,
}

impl Default for PlsConfig {
    fn default() -> Self {
        PlsConfig {
            n_components: 10,
            cv_folds: 0,
            stratified_cv: true,
            execution: ExecutionMode::default(),
            storage: StorageOptions::default(),
            simpls: SimplsConfig::default(),
            random_seed: 2025,
        }
    }
}

// --- Results ---

/// A fitted PLS regression model: everything needed to predict Y from raw X.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlsModel {
    x_mean: Array1<f64>,
    y_mean: Array1<f64>,
    /// Intercept row followed by the (p × m) regression coefficients. Shape: ((p+1) × m)
    coefficients: Array2<f64>,
    x_percent_var_exp: Array1<f64>,
    y_percent_var_exp: Array1<f64>,
}

/// Model plus the per-component matrices it was derived from.
#[derive(Debug, Clone)]
pub struct PlsFit {
    pub model: PlsModel,
    pub components: SimplsOutput,
}

/// What an out-of-core fit left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSummary {
    pub layout: StorageLayout,
    pub num_lines: usize,
    /// Location of the centered matrix, if [`StorageOptions::keep_file`] was set.
    pub kept_file: Option<PathBuf>,
}

/// Validation result of one cross-validation fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: usize,
    pub n_train: usize,
    pub n_validation: usize,
    /// Components actually extracted; can be below the requested count on small folds.
    pub n_components: usize,
    /// Mean squared prediction error on the held-out observations, per response.
    pub mean_squared_error: Array1<f64>,
}

/// Result of [`fit`]. The variant tells which execution path ran.
#[derive(Debug, Clone)]
pub enum PlsOutcome {
    InMemory(PlsFit),
    OutOfCore {
        fit: PlsFit,
        storage: StorageSummary,
    },
    CrossValidated {
        mode: ExecutionMode,
        /// Fold index of every observation.
        partition: Vec<usize>,
        folds: Vec<FoldResult>,
        /// Squared prediction error pooled over all held-out observations, per response.
        mean_squared_error: Array1<f64>,
    },
}

impl PlsOutcome {
    /// The fit on all observations, for the non cross-validated variants.
    pub fn fit(&self) -> Option<&PlsFit> {
        match self {
            PlsOutcome::InMemory(fit) | PlsOutcome::OutOfCore { fit, .. } => Some(fit),
            PlsOutcome::CrossValidated { .. } => None,
        }
    }

    pub fn model(&self) -> Option<&PlsModel> {
        self.fit().map(|fit| &fit.model)
    }
}

// --- Post-processing ---

/// Regression coefficients in the original (uncentered) coordinates.
///
/// `coefficients = weights · y_loadingsᵗ` and
/// `intercept = y_mean − x_mean · coefficients`. The intercept is stacked on
/// top, so the result has shape ((p+1) × m) and `[1 | X] · result` predicts Y.
pub fn coefficients_with_intercept(
    weights: ArrayView2<f64>,
    y_loadings: ArrayView2<f64>,
    x_mean: ArrayView1<f64>,
    y_mean: ArrayView1<f64>,
) -> Array2<f64> {
    let coefficients = weights.dot(&y_loadings.t());
    let intercept = &y_mean - &x_mean.dot(&coefficients);
    let mut stacked = Array2::<f64>::zeros((coefficients.nrows() + 1, coefficients.ncols()));
    stacked.row_mut(0).assign(&intercept);
    stacked.slice_mut(s![1.., ..]).assign(&coefficients);
    stacked
}

/// Fraction of the total centered sum of squares captured by each component:
/// `Σ loadings[:, i]² / total_sum_of_squares`. Not cumulative.
/// A zero total (a constant matrix) yields zeros.
pub fn percent_variance_explained(loadings: ArrayView2<f64>, total_sum_of_squares: f64) -> Array1<f64> {
    if !(total_sum_of_squares > 0.0) {
        return Array1::zeros(loadings.ncols());
    }
    loadings.map_axis(Axis(0), |column| column.dot(&column) / total_sum_of_squares)
}

impl PlsModel {
    /// Builds the model from extracted components and the statistics of the
    /// data they were extracted from.
    pub fn from_components(
        components: &SimplsOutput,
        x_mean: Array1<f64>,
        y_mean: Array1<f64>,
        x_sum_of_squares: f64,
        y_sum_of_squares: f64,
    ) -> Self {
        let coefficients = coefficients_with_intercept(
            components.weights.view(),
            components.y_loadings.view(),
            x_mean.view(),
            y_mean.view(),
        );
        PlsModel {
            x_percent_var_exp: percent_variance_explained(components.x_loadings.view(), x_sum_of_squares),
            y_percent_var_exp: percent_variance_explained(components.y_loadings.view(), y_sum_of_squares),
            x_mean,
            y_mean,
            coefficients,
        }
    }

    pub fn x_mean(&self) -> &Array1<f64> {
        &self.x_mean
    }

    pub fn y_mean(&self) -> &Array1<f64> {
        &self.y_mean
    }

    /// Intercept row on top of the slopes. Shape: ((p+1) × m)
    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    pub fn intercept(&self) -> ArrayView1<'_, f64> {
        self.coefficients.row(0)
    }

    /// Coefficients without the intercept row. Shape: (p × m)
    pub fn slopes(&self) -> ArrayView2<'_, f64> {
        self.coefficients.slice(s![1.., ..])
    }

    pub fn x_percent_var_exp(&self) -> &Array1<f64> {
        &self.x_percent_var_exp
    }

    pub fn y_percent_var_exp(&self) -> &Array1<f64> {
        &self.y_percent_var_exp
    }

    pub fn n_components(&self) -> usize {
        self.x_percent_var_exp.len()
    }

    pub fn n_predictors(&self) -> usize {
        self.x_mean.len()
    }

    pub fn n_responses(&self) -> usize {
        self.y_mean.len()
    }

    /// Predicts Y for raw (uncentered) observations: `[1 | X] · coefficients`.
    pub fn predict(&self, x: ArrayView2<f64>) -> PlsResult<Array2<f64>> {
        if x.ncols() != self.n_predictors() {
            return Err(PlsError::InvalidInput(format!(
                "Model expects {} predictors, but X has {} columns.",
                self.n_predictors(),
                x.ncols()
            )));
        }
        let mut predicted = x.dot(&self.slopes());
        predicted += &self.intercept();
        Ok(predicted)
    }

    /// Saves the model to `path` with bincode.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> PlsResult<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| PlsError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| PlsError::Model(format!("Failed to serialize PLS model: {}", e)))?;
        Ok(())
    }

    /// Loads a model written by [`PlsModel::save_model`] and checks that its
    /// parts agree in shape and hold only finite values.
    pub fn load_model<P: AsRef<Path>>(path: P) -> PlsResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PlsError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let model: PlsModel = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| PlsError::Model(format!("Failed to deserialize PLS model from {:?}: {}", path, e)))?;

        let (coef_rows, coef_cols) = model.coefficients.dim();
        if coef_rows != model.x_mean.len() + 1 || coef_cols != model.y_mean.len() {
            return Err(PlsError::Model(format!(
                "Loaded PLS model has inconsistent dimensions: coefficients={}x{}, x_mean={}, y_mean={}",
                coef_rows,
                coef_cols,
                model.x_mean.len(),
                model.y_mean.len()
            )));
        }
        if model.x_percent_var_exp.len() != model.y_percent_var_exp.len() {
            return Err(PlsError::Model(format!(
                "Loaded PLS model has {} X but {} Y variance fractions",
                model.x_percent_var_exp.len(),
                model.y_percent_var_exp.len()
            )));
        }
        let all_finite = model
            .x_mean
            .iter()
            .chain(model.y_mean.iter())
            .chain(model.coefficients.iter())
            .chain(model.x_percent_var_exp.iter())
            .chain(model.y_percent_var_exp.iter())
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(PlsError::Model("Loaded PLS model contains non-finite values.".to_string()));
        }
        Ok(model)
    }
}

// --- Driver ---

/// Checks every caller precondition of [`fit`] and reports all violations at
/// once, one per line, as [`PlsError::InvalidInput`].
pub fn validate_inputs(x_shape: (usize, usize), y_shape: (usize, usize), config: &PlsConfig) -> PlsResult<()> {
    let (n_obs, n_pred) = x_shape;
    let (n_y_obs, n_resp) = y_shape;
    let mut errors: Vec<String> = Vec::new();

    if n_obs != n_y_obs {
        errors.push(format!(
            "X has {} observations but Y has {}; both must have the same number of rows.",
            n_obs, n_y_obs
        ));
    }
    if n_obs < 2 {
        errors.push(format!("At least 2 observations are required, found {}.", n_obs));
    }
    if n_pred == 0 {
        errors.push("X must have at least one predictor column.".to_string());
    }
    if n_resp == 0 {
        errors.push("Y must have at least one response column.".to_string());
    }
    let max_components = n_obs.saturating_sub(1).min(n_pred);
    if config.n_components == 0 {
        errors.push("n_components must be at least 1.".to_string());
    } else if config.n_components > max_components {
        errors.push(format!(
            "n_components is {}, but at most min(n - 1, p) = min({}, {}) = {} components can be extracted.",
            config.n_components,
            n_obs.saturating_sub(1),
            n_pred,
            max_components
        ));
    }
    if config.cv_folds == 1 {
        errors.push("cv_folds must be 0 (no cross-validation) or at least 2.".to_string());
    } else if config.cv_folds > n_obs {
        errors.push(format!(
            "cv_folds is {}, which exceeds the {} observations.",
            config.cv_folds, n_obs
        ));
    }
    if !(config.simpls.score_norm_epsilon >= 0.0 && config.simpls.score_norm_epsilon.is_finite()) {
        errors.push(format!(
            "score_norm_epsilon must be a finite non-negative number, found {}.",
            config.simpls.score_norm_epsilon
        ));
    }
    if config.simpls.gram_schmidt_passes == 0 {
        errors.push("gram_schmidt_passes must be at least 1.".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(PlsError::InvalidInput(errors.join("\n")))
    }
}

/// Fits a PLS regression of `y` on `x` with SIMPLS.
///
/// `x` is the raw predictor matrix; any [`RawMatrix`] works, which lets a
/// sparse source be centered straight to disk with [`ExecutionMode::OutOfCore`].
/// With `cv_folds >= 2` the observations are partitioned (seeded by
/// `random_seed`) and one model per fold is fitted and scored on its held-out
/// observations.
///
/// # Errors
/// - [`PlsError::InvalidInput`] for violated preconditions; nothing is computed.
/// - [`PlsError::DegenerateComponent`] if the data support fewer components.
/// - [`PlsError::Partition`] if stratified folds cannot be built.
/// - I/O, parse and linear algebra errors from the selected path.
pub fn fit<M>(x: &M, y: ArrayView2<f64>, config: &PlsConfig) -> PlsResult<PlsOutcome>
where
    M: RawMatrix + Sync + ?Sized,
{
    validate_inputs(x.shape(), y.dim(), config)?;
    let engine = SimplsEngine::new(config.simpls.clone());
    let start_time = Instant::now();

    let outcome = if config.cv_folds >= 2 {
        cross_validate(&engine, x, y, config)?
    } else {
        match config.execution {
            ExecutionMode::InMemory => PlsOutcome::InMemory(fit_in_memory(&engine, x, y, config.n_components)?),
            ExecutionMode::OutOfCore => {
                let (fit, storage) = fit_out_of_core(&engine, x, y, config.n_components, &config.storage)?;
                PlsOutcome::OutOfCore { fit, storage }
            }
        }
    };
    info!("PLS fit ({:?}, {} CV folds) finished in {:?}", config.execution, config.cv_folds, start_time.elapsed());
    Ok(outcome)
}

/// [`fit`] for a single response vector.
pub fn fit_single_response<M>(x: &M, y: ArrayView1<f64>, config: &PlsConfig) -> PlsResult<PlsOutcome>
where
    M: RawMatrix + Sync + ?Sized,
{
    fit(x, y.insert_axis(Axis(1)), config)
}

fn centered_responses(y: ArrayView2<f64>) -> PlsResult<(Array2<f64>, Array1<f64>)> {
    let y_mean = y
        .mean_axis(Axis(0))
        .ok_or_else(|| PlsError::InvalidInput("Y has no observations.".to_string()))?;
    Ok((&y - &y_mean, y_mean))
}

/// Copies the selected rows of `x` into a dense matrix, subtracting `shift`.
fn gather_rows<M: RawMatrix + ?Sized>(x: &M, rows: &[usize], shift: Option<&Array1<f64>>) -> Array2<f64> {
    let mut dense = Array2::<f64>::zeros((rows.len(), x.shape().1));
    for (k, &i) in rows.iter().enumerate() {
        let row = x.row(i);
        match shift {
            Some(mean) => dense.row_mut(k).assign(&(row - mean)),
            None => dense.row_mut(k).assign(&row),
        }
    }
    dense
}

fn fit_in_memory<M: RawMatrix + ?Sized>(
    engine: &SimplsEngine,
    x: &M,
    y: ArrayView2<f64>,
    n_components: usize,
) -> PlsResult<PlsFit> {
    let (n_obs, _) = x.shape();
    let x_mean = x.column_means();
    let all_rows: Vec<usize> = (0..n_obs).collect();
    let x_centered = gather_rows(x, &all_rows, Some(&x_mean));
    let (y_centered, y_mean) = centered_responses(y)?;

    let predictors = InMemoryPredictors::new(x_centered.view());
    let components = engine.extract(&predictors, y_centered.view(), n_components)?;
    let model = PlsModel::from_components(
        &components,
        x_mean,
        y_mean,
        predictors.sum_of_squares(),
        y_centered.iter().map(|v| v * v).sum(),
    );
    Ok(PlsFit { model, components })
}

fn spill_file(options: &StorageOptions) -> PlsResult<tempfile::NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("simpls-centered-").suffix(".txt");
    match &options.directory {
        Some(dir) => builder.tempfile_in(dir).map_err(|e| PlsError::io(dir, e)),
        None => builder.tempfile().map_err(|e| PlsError::io(std::env::temp_dir(), e)),
    }
}

fn fit_out_of_core<M: RawMatrix + ?Sized>(
    engine: &SimplsEngine,
    x: &M,
    y: ArrayView2<f64>,
    n_components: usize,
    options: &StorageOptions,
) -> PlsResult<(PlsFit, StorageSummary)> {
    let spill = spill_file(options)?;
    let stored = center_and_store(x, spill.path(), options.layout_policy, options.delimiter)?;
    let (y_centered, y_mean) = centered_responses(y)?;

    let components = engine.extract(&stored, y_centered.view(), n_components)?;
    let x_mean = stored.column_means().cloned().unwrap_or_else(|| x.column_means());
    let model = PlsModel::from_components(
        &components,
        x_mean,
        y_mean,
        stored.sum_of_squares(),
        y_centered.iter().map(|v| v * v).sum(),
    );

    let layout = stored.layout();
    let kept_file = if options.keep_file {
        let (_, path) = spill.keep().map_err(|e| PlsError::io(stored.path(), e.error))?;
        debug!("Kept centered matrix file at {:?}", path);
        Some(path)
    } else {
        None
    };
    let storage = StorageSummary {
        layout,
        num_lines: layout.num_lines(stored.nrows(), stored.ncols()),
        kept_file,
    };
    Ok((PlsFit { model, components }, storage))
}

fn cross_validate<M>(engine: &SimplsEngine, x: &M, y: ArrayView2<f64>, config: &PlsConfig) -> PlsResult<PlsOutcome>
where
    M: RawMatrix + Sync + ?Sized,
{
    let mut rng = ChaCha8Rng::seed_from_u64(config.random_seed);
    let partition = partition_dataset(y, config.cv_folds, config.stratified_cv, &mut rng)?;
    let splits = split_folds(&partition, config.cv_folds);
    info!(
        "Cross-validating over {} folds ({}stratified, {:?})",
        config.cv_folds,
        if config.stratified_cv { "" } else { "not " },
        config.execution
    );

    let folds: Vec<FoldResult> = match config.execution {
        ExecutionMode::InMemory => splits
            .par_iter()
            .map(|split| evaluate_fold(engine, x, y, split, config))
            .collect::<PlsResult<Vec<_>>>()?,
        ExecutionMode::OutOfCore => splits
            .iter()
            .map(|split| evaluate_fold(engine, x, y, split, config))
            .collect::<PlsResult<Vec<_>>>()?,
    };

    let mut pooled = Array1::<f64>::zeros(y.ncols());
    for fold in &folds {
        pooled.scaled_add(fold.n_validation as f64, &fold.mean_squared_error);
    }
    pooled /= y.nrows() as f64;
    info!("Cross-validated mean squared error per response: {:?}", pooled);

    Ok(PlsOutcome::CrossValidated {
        mode: config.execution,
        partition,
        folds,
        mean_squared_error: pooled,
    })
}

fn evaluate_fold<M: RawMatrix + ?Sized>(
    engine: &SimplsEngine,
    x: &M,
    y: ArrayView2<f64>,
    split: &FoldSplit,
    config: &PlsConfig,
) -> PlsResult<FoldResult> {
    let n_train = split.train.len();
    let max_components = n_train.saturating_sub(1).min(x.shape().1);
    if max_components == 0 {
        return Err(PlsError::InvalidInput(format!(
            "Fold {} leaves only {} training observations.",
            split.fold, n_train
        )));
    }
    let n_components = config.n_components.min(max_components);
    if n_components < config.n_components {
        warn!(
            "Fold {} has {} training observations; extracting {} instead of {} components.",
            split.fold, n_train, n_components, config.n_components
        );
    }

    let train_x = RowSubset::new(x, &split.train);
    let train_y = y.select(Axis(0), &split.train);
    let fit = match config.execution {
        ExecutionMode::InMemory => fit_in_memory(engine, &train_x, train_y.view(), n_components)?,
        ExecutionMode::OutOfCore => {
            let options = StorageOptions {
                keep_file: false,
                ..config.storage.clone()
            };
            fit_out_of_core(engine, &train_x, train_y.view(), n_components, &options)?.0
        }
    };

    let validation_x = gather_rows(x, &split.validation, None);
    let residual = fit.model.predict(validation_x.view())? - &y.select(Axis(0), &split.validation);
    let mean_squared_error = residual
        .mapv(|r| r * r)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(y.ncols()));
    debug!("Fold {}: mean squared error {:?}", split.fold, mean_squared_error);

    Ok(FoldResult {
        fold: split.fold,
        n_train,
        n_validation: split.validation.len(),
        n_components,
        mean_squared_error,
    })
}
