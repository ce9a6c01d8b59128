//! Error taxonomy for curve analysis.
//!
//! Errors fall into a small number of categories with stable CLI exit codes:
//!
//! - configuration errors (bad preprocessing order, invalid ranges/options)
//! - missing metadata (e.g. no spring constant when computing tip position)
//! - model registry problems (validation, duplicate/unknown keys)
//! - I/O and parse failures
//! - rating/regressor failures
//!
//! Numeric non-convergence of the minimizer is deliberately *not* an error.
//! It is recorded as `success = false` in the fit record so batch runs can
//! continue and report failed curves in their output.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FdError {
    /// Invalid configuration, detected before any numeric work.
    #[error("configuration error: {0}")]
    Config(String),

    /// Required curve metadata is absent (the curve stays usable otherwise).
    #[error("missing metadata: {0}")]
    MissingMetadata(String),

    /// A model descriptor failed validation.
    #[error("invalid model '{key}': {reason}")]
    ModelValidation { key: String, reason: String },

    /// Registration under an already-used model key.
    #[error("model key '{0}' is already registered")]
    DuplicateModel(String),

    /// Lookup or deregistration of an unknown model key.
    #[error("no model registered under key '{0}'")]
    ModelNotFound(String),

    /// Training-set or regressor failure inside the rating engine.
    #[error("rating error: {0}")]
    Rating(String),

    #[error("failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },
}

impl FdError {
    /// Process exit code for the CLI (stable per category).
    pub fn exit_code(&self) -> u8 {
        match self {
            FdError::Config(_) => 2,
            FdError::MissingMetadata(_) => 3,
            FdError::ModelValidation { .. }
            | FdError::DuplicateModel(_)
            | FdError::ModelNotFound(_) => 4,
            FdError::Io { .. } | FdError::Parse { .. } => 5,
            FdError::Rating(_) => 6,
        }
    }

    /// Shorthand for I/O errors carrying the offending path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FdError::Io {
            path: path.into(),
            source,
        }
    }
}
