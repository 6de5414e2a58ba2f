//! Error types for slitred
//!
//! All modules use `SlitredResult<T>` as their return type. Errors raised
//! inside a single (exposure, detector) unit are caught by the sequencer and
//! never unwind past that unit.

use crate::calib::CalibrationType;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for slitred operations
pub type SlitredResult<T> = Result<T, SlitredError>;

/// All errors that can occur in slitred
#[derive(Error, Debug)]
pub enum SlitredError {
    // Instrument metadata errors
    #[error("Detector {detector} is outside the mosaic (detectors 1..={ndet})")]
    DetectorOutOfRange { detector: usize, ndet: usize },

    #[error("Missing metadata for exposure {exposure}: {field}")]
    MissingMetadata { exposure: usize, field: String },

    // Reduction errors
    #[error("{stage} failed for exposure {exposure}, detector {detector}: {reason}")]
    ComputeFailure {
        stage: String,
        exposure: usize,
        detector: usize,
        reason: String,
    },

    #[error("Cannot compute {kind} for {config} detector {detector}: {missing} has no master frame")]
    DependencyMissing {
        kind: CalibrationType,
        missing: CalibrationType,
        config: String,
        detector: usize,
    },

    #[error("Failed to load science frame for exposure {exposure}, detector {detector}: {reason}")]
    ScienceLoad {
        exposure: usize,
        detector: usize,
        reason: String,
    },

    #[error("Failed to persist spectra for exposure {exposure}: {reason}")]
    Persist { exposure: usize, reason: String },

    // Manifest errors
    #[error("Invalid exposure manifest at {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Exposure manifest is empty: {0}")]
    ManifestEmpty(PathBuf),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl SlitredError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a compute failure for a reduction stage
    pub fn compute(
        stage: impl Into<String>,
        exposure: usize,
        detector: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::ComputeFailure {
            stage: stage.into(),
            exposure,
            detector,
            reason: reason.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::DetectorOutOfRange { .. } => {
                Some("Check mosaic.ndet and the [[mosaic.detectors]] entries in your config")
            }
            Self::MissingMetadata { .. } => {
                Some("Add the keyword to the exposure's [exposure.metadata] table")
            }
            Self::ManifestEmpty(_) => Some("Add at least one [[exposure]] entry"),
            Self::ConfigNotFound(_) => Some("Run: slitred config init"),
            _ => None,
        }
    }
}
