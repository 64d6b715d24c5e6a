// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Every failure the PLS pipeline can report.
#[derive(Debug, Error)]
pub enum PlsError {
    /// One or more caller preconditions failed. All detected problems are
    /// reported together, one per line.
    #[error("Invalid input:\n{0}")]
    InvalidInput(String),

    /// The score vector of the next component collapsed to (near) zero norm, so
    /// no further meaningful component exists in the data.
    #[error(
        "SIMPLS extraction became degenerate after {extracted} of {requested} components: the next score vector has near-zero norm."
    )]
    DegenerateComponent { extracted: usize, requested: usize },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed centered matrix file '{}' at line {line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Linear algebra backend failed: {0}")]
    Linalg(String),

    #[error("Cannot partition the dataset: {0}")]
    Partition(String),

    #[error("PLS model error: {0}")]
    Model(String),
}

impl PlsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PlsError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type PlsResult<T> = Result<T, PlsError>;
