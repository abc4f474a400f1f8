#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! VitalWatch model stack: synthetic wearable data, isolation-forest training,
//! persisted model artifacts, and the vital-sign scoring cascade.

/// Model error taxonomy.
pub mod error;

/// Vital-sign readings and the model feature contract.
pub mod reading;

/// Seeded synthetic wearable data.
pub mod synthetic;

/// Isolation forest outlier detector.
pub mod forest;

/// On-disk model artifact.
pub mod artifact;

/// Reading assessment and recommendation cascade.
pub mod scoring;

/// Offline training pipeline.
pub mod trainer;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use artifact::{
    resolve_model_path, ModelArtifact, ARTIFACT_FORMAT_VERSION, FALLBACK_MODEL_PATH,
    PRIMARY_MODEL_PATH,
};
pub use error::ModelError;
pub use forest::{ForestParams, IsolationForest, OutlierDetector, OutlierLabel};
pub use reading::{ActivityLevel, FeatureVector, Reading, TrainingSample, FEATURE_NAMES};
pub use scoring::{Assessment, Recommendation, VitalsAnalyzer};
pub use synthetic::{ColumnStats, FeatureStats, SyntheticConfig};
pub use telemetry::{VitalsTelemetry, VitalsTelemetryBuilder};
pub use trainer::{TrainingConfig, TrainingPipeline, TrainingReport};
