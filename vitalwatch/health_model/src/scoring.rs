//! Maps a reading to an anomaly verdict and a recommendation.

use std::{fmt, path::Path, sync::Arc};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    artifact::ModelArtifact,
    error::ModelError,
    forest::OutlierDetector,
    reading::{ActivityLevel, Reading},
};

/// Heart rate (bpm) above which a resting outlier is treated as tachycardia.
pub const TACHYCARDIA_HEART_RATE: f64 = 120.0;
/// SpO2 (%) below which an outlier is treated as hypoxia.
pub const HYPOXIA_BLOOD_OXYGEN: f64 = 90.0;

/// Advice attached to every assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    /// No model is loaded.
    SystemNeedsTraining,
    /// Reading is an inlier.
    VitalsStable,
    /// Outlier with high heart rate while at rest.
    TachycardiaAtRest,
    /// Outlier with low blood oxygen.
    Hypoxia,
    /// Any other outlier.
    IrregularRhythm,
}

impl Recommendation {
    const ALL: [Self; 5] = [
        Self::SystemNeedsTraining,
        Self::VitalsStable,
        Self::TachycardiaAtRest,
        Self::Hypoxia,
        Self::IrregularRhythm,
    ];

    /// Text returned to clients.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::SystemNeedsTraining => "System needs training",
            Self::VitalsStable => "Vitals stable.",
            Self::TachycardiaAtRest => "CRITICAL: Tachycardia at rest. Sit down immediately.",
            Self::Hypoxia => "CRITICAL: Hypoxia detected. Seek oxygen/medical help.",
            Self::IrregularRhythm => "Irregular rhythm detected. Consult a cardiologist.",
        }
    }

    /// First matching rule for a reading already classified as an outlier.
    #[must_use]
    pub fn for_outlier(reading: &Reading) -> Self {
        if reading.heart_rate > TACHYCARDIA_HEART_RATE
            && reading.activity_level == ActivityLevel::Low
        {
            Self::TachycardiaAtRest
        } else if reading.blood_oxygen < HYPOXIA_BLOOD_OXYGEN {
            Self::Hypoxia
        } else {
            Self::IrregularRhythm
        }
    }

    /// Whether the advice is flagged critical.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::TachycardiaAtRest | Self::Hypoxia)
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl Serialize for Recommendation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.message())
    }
}

impl<'de> Deserialize<'de> for Recommendation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.message() == text)
            .ok_or_else(|| de::Error::custom(format!("unknown recommendation {text:?}")))
    }
}

/// Result of analysing one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    /// Detector flagged the reading as an outlier.
    pub is_anomaly: bool,
    /// Advice for the wearer.
    pub recommendation: Recommendation,
}

/// Scoring service. Holds the loaded detector, if any, and never mutates it.
#[derive(Clone)]
pub struct VitalsAnalyzer {
    detector: Option<Arc<dyn OutlierDetector>>,
}

impl fmt::Debug for VitalsAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VitalsAnalyzer")
            .field("trained", &self.is_trained())
            .finish()
    }
}

impl VitalsAnalyzer {
    /// Wraps an optional detector.
    #[must_use]
    pub fn new(detector: Option<Arc<dyn OutlierDetector>>) -> Self {
        Self { detector }
    }

    /// Analyzer without a model; every reading gets the fallback answer.
    #[must_use]
    pub fn untrained() -> Self {
        Self::new(None)
    }

    /// Analyzer backed by the given detector.
    #[must_use]
    pub fn with_detector(detector: impl OutlierDetector + 'static) -> Self {
        Self::new(Some(Arc::new(detector)))
    }

    /// Analyzer backed by the forest stored in an artifact file.
    pub fn from_artifact_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let artifact = ModelArtifact::load(path)?;
        Ok(Self::with_detector(artifact.forest))
    }

    /// Whether a detector is loaded.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.detector.is_some()
    }

    /// Classifies a reading and derives the recommendation.
    #[must_use]
    pub fn analyze(&self, reading: &Reading) -> Assessment {
        let Some(detector) = &self.detector else {
            return Assessment {
                is_anomaly: false,
                recommendation: Recommendation::SystemNeedsTraining,
            };
        };
        let is_anomaly = detector.predict(&reading.features()).is_outlier();
        let recommendation = if is_anomaly {
            Recommendation::for_outlier(reading)
        } else {
            Recommendation::VitalsStable
        };
        Assessment {
            is_anomaly,
            recommendation,
        }
    }
}
