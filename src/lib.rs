// Partial least squares regression (SIMPLS)

#![doc = include_str!("../README.md")]

pub mod diagnostics;
pub mod error;
pub mod linalg_backends;
pub mod partition;
pub mod pls;
pub mod simpls;
pub mod storage;

pub use error::{PlsError, PlsResult};
pub use partition::{partition_dataset, split_folds, FoldSplit};
pub use pls::{
    coefficients_with_intercept, fit, fit_single_response, percent_variance_explained, validate_inputs,
    ExecutionMode, FoldResult, PlsConfig, PlsFit, PlsModel, PlsOutcome, StorageOptions, StorageSummary,
};
pub use simpls::{
    extract_single_response, CenteredPredictors, InMemoryPredictors, SimplsConfig, SimplsEngine, SimplsOutput,
};
pub use storage::{
    center_and_store, count_lines, dot_product, dot_product_column, LayoutPolicy, RawMatrix, RowSubset,
    StorageLayout, StoredCenteredMatrix, DEFAULT_DELIMITER,
};
