//! Error types for the rba-slam library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.
//! Module-specific errors (dataset loading, configuration, optimizer, export)
//! convert into [`RbaError`] so the driver can propagate them with `?`.

use crate::{
    config::ConfigError, export::ExportError, io::DatasetError, optimizer::OptimizerError,
};
use std::{
    io::Error,
    num::{ParseFloatError, ParseIntError},
};
use thiserror::Error;

/// Main result type used throughout the rba-slam library
pub type RbaResult<T> = Result<T, RbaError>;

/// Main error type for the rba-slam library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RbaError {
    /// Invalid or inconsistent run configuration, detected before the run starts
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Dataset frame ids are not sequential with respect to the optimizer's keyframe ids
    #[error(
        "Sequence error: expected frame id {expected} but the dataset delivered {found} (dataset must be ordered by frame id without gaps)"
    )]
    Sequence { expected: u64, found: u64 },

    /// Failure reported by the optimizer while defining a keyframe
    #[error("Optimizer error: {0}")]
    Optimizer(String),

    /// Dataset loading or parsing errors
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// IO related errors (output files, telemetry tables)
    #[error("IO error: {0}")]
    Io(String),

    /// Export failures that the caller decided to treat as fatal
    #[error("Export error: {0}")]
    Export(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// Conversions from standard library errors

impl From<Error> for RbaError {
    fn from(err: Error) -> Self {
        RbaError::Io(err.to_string())
    }
}

impl From<ParseFloatError> for RbaError {
    fn from(err: ParseFloatError) -> Self {
        RbaError::InvalidInput(format!("Failed to parse float: {err}"))
    }
}

impl From<ParseIntError> for RbaError {
    fn from(err: ParseIntError) -> Self {
        RbaError::InvalidInput(format!("Failed to parse integer: {err}"))
    }
}

impl From<csv::Error> for RbaError {
    fn from(err: csv::Error) -> Self {
        RbaError::Io(format!("Failed to write table: {err}"))
    }
}

// Convert module-specific errors to RbaError

impl From<DatasetError> for RbaError {
    fn from(err: DatasetError) -> Self {
        RbaError::Dataset(err.to_string())
    }
}

impl From<ConfigError> for RbaError {
    fn from(err: ConfigError) -> Self {
        RbaError::Configuration(err.to_string())
    }
}

impl From<OptimizerError> for RbaError {
    fn from(err: OptimizerError) -> Self {
        RbaError::Optimizer(err.to_string())
    }
}

impl From<ExportError> for RbaError {
    fn from(err: ExportError) -> Self {
        RbaError::Export(err.to_string())
    }
}
