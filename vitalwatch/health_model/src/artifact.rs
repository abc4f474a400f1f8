use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::ModelError,
    forest::IsolationForest,
    reading::FEATURE_NAMES,
    synthetic::{FeatureStats, SyntheticConfig},
};

/// Bumped whenever the on-disk layout changes incompatibly.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;
/// Artifact location when running from the service directory.
pub const PRIMARY_MODEL_PATH: &str = "../model_data/health_model.json";
/// Artifact location when running from the workspace root.
pub const FALLBACK_MODEL_PATH: &str = "model_data/health_model.json";

/// Serialized fitted model plus the provenance of its training data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Layout version.
    pub format_version: u32,
    /// Column order the forest was fitted on.
    pub feature_names: Vec<String>,
    /// Fit time.
    pub trained_at: DateTime<Utc>,
    /// Dataset the forest was fitted on.
    pub training: SyntheticConfig,
    /// Statistics of that dataset.
    pub stats: FeatureStats,
    /// The fitted model.
    pub forest: IsolationForest,
}

impl ModelArtifact {
    /// Wraps a freshly fitted forest.
    #[must_use]
    pub fn new(forest: IsolationForest, training: SyntheticConfig, stats: FeatureStats) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            feature_names: FEATURE_NAMES.iter().map(ToString::to_string).collect(),
            trained_at: Utc::now(),
            training,
            stats,
            forest,
        }
    }

    /// Writes the artifact, creating parent directories. The file is replaced atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf, ModelError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| ModelError::io(parent, err))?;
        }
        let data = serde_json::to_vec(self)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, data).map_err(|err| ModelError::io(&staging, err))?;
        fs::rename(&staging, path).map_err(|err| ModelError::io(path, err))?;
        Ok(path.to_path_buf())
    }

    /// Reads and validates an artifact.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|err| ModelError::io(path, err))?;
        let artifact: Self = serde_json::from_slice(&data)?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ModelError::UnsupportedFormat(self.format_version));
        }
        let expected: Vec<String> = FEATURE_NAMES.iter().map(ToString::to_string).collect();
        if self.feature_names != expected || self.forest.n_features() != expected.len() {
            return Err(ModelError::FeatureMismatch {
                expected,
                found: self.feature_names.clone(),
            });
        }
        self.forest.validate()
    }
}

/// Picks `primary` if it exists, otherwise `fallback`.
#[must_use]
pub fn resolve_model_path(primary: &Path, fallback: &Path) -> PathBuf {
    if primary.exists() {
        primary.to_path_buf()
    } else {
        fallback.to_path_buf()
    }
}
