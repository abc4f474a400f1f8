use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while generating data, fitting, or loading models.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A training parameter is out of range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Too few rows to fit a model.
    #[error("insufficient data: required {required}, got {got}")]
    InsufficientData {
        /// Minimum row count.
        required: usize,
        /// Rows supplied.
        got: usize,
    },

    /// The artifact was trained on a different feature layout.
    #[error("feature mismatch: expected {expected:?}, found {found:?}")]
    FeatureMismatch {
        /// Feature names the scorer builds.
        expected: Vec<String>,
        /// Feature names recorded in the artifact.
        found: Vec<String>,
    },

    /// Artifact written by an incompatible version.
    #[error("unsupported artifact format version {0}")]
    UnsupportedFormat(u32),

    /// Filesystem failure, tagged with the path involved.
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Artifact (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
