use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_event_bus::EventKind;
use shared_logging::LogLevel;

use crate::{
    artifact::{ModelArtifact, PRIMARY_MODEL_PATH},
    forest::{ForestParams, IsolationForest},
    synthetic::{self, feature_matrix, FeatureStats, SyntheticConfig},
    telemetry::VitalsTelemetry,
};

/// Everything needed to produce one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Synthetic dataset size and seed.
    pub data: SyntheticConfig,
    /// Forest hyperparameters.
    pub forest: ForestParams,
    /// Destination of the artifact.
    pub output: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data: SyntheticConfig::default(),
            forest: ForestParams::default(),
            output: PathBuf::from(PRIMARY_MODEL_PATH),
        }
    }
}

/// Outcome of a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Model family.
    pub model: String,
    /// Training rows.
    pub samples: usize,
    /// Trees in the forest.
    pub n_estimators: usize,
    /// Contamination used for calibration.
    pub contamination: f64,
    /// Calibrated threshold.
    pub offset: f64,
    /// Training rows labelled as outliers.
    pub flagged: usize,
    /// Dataset statistics.
    pub stats: FeatureStats,
    /// Where the artifact was written.
    pub artifact: PathBuf,
}

impl TrainingReport {
    /// Share of training rows labelled as outliers.
    #[must_use]
    pub fn flagged_fraction(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.flagged as f64 / self.samples as f64
        }
    }

    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[{}] samples={} trees={} offset={:.4} flagged={:.2}% artifact={}",
            self.model,
            self.samples,
            self.n_estimators,
            self.offset,
            self.flagged_fraction() * 100.0,
            self.artifact.display()
        )
    }
}

/// Generate, fit, and persist.
#[derive(Debug, Default)]
pub struct TrainingPipeline;

impl TrainingPipeline {
    /// Runs the pipeline and returns a training report.
    pub fn run(&self, config: &TrainingConfig) -> anyhow::Result<TrainingReport> {
        self.run_with_telemetry(config, None)
    }

    /// Runs the pipeline with optional telemetry instrumentation.
    pub fn run_with_telemetry(
        &self,
        config: &TrainingConfig,
        telemetry: Option<&VitalsTelemetry>,
    ) -> anyhow::Result<TrainingReport> {
        config.data.validate()?;
        config.forest.validate()?;
        log(
            telemetry,
            LogLevel::Info,
            "training.generate",
            json!({ "samples": config.data.samples, "seed": config.data.seed }),
        );
        let samples = synthetic::generate(&config.data)?;
        let stats = FeatureStats::from_samples(&samples);
        let matrix = feature_matrix(&samples);

        log(
            telemetry,
            LogLevel::Debug,
            "training.fit",
            json!({
                "n_estimators": config.forest.n_estimators,
                "max_samples": config.forest.max_samples,
                "contamination": config.forest.contamination,
            }),
        );
        let forest = IsolationForest::fit(matrix.view(), config.forest)?;
        let flagged = forest
            .predict_rows(matrix.view())
            .into_iter()
            .filter(|label| label.is_outlier())
            .count();

        let report = TrainingReport {
            model: "isolation_forest".into(),
            samples: samples.len(),
            n_estimators: forest.n_estimators(),
            contamination: config.forest.contamination,
            offset: forest.offset(),
            flagged,
            stats: stats.clone(),
            artifact: config.output.clone(),
        };

        ModelArtifact::new(forest, config.data, stats)
            .save(&config.output)
            .with_context(|| format!("saving model artifact to {}", config.output.display()))?;

        log(
            telemetry,
            LogLevel::Info,
            "training.saved",
            json!({ "artifact": report.artifact, "offset": report.offset, "flagged": report.flagged }),
        );
        if let Some(telemetry) = telemetry {
            let _ = telemetry.event(
                EventKind::TrainingCompleted,
                json!({
                    "artifact": report.artifact,
                    "samples": report.samples,
                    "flagged_fraction": report.flagged_fraction(),
                }),
            );
        }
        Ok(report)
    }
}

fn log(
    telemetry: Option<&VitalsTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: serde_json::Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}
