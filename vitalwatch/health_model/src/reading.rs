use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize};

/// Feature order shared by training and inference. Changing it invalidates every artifact.
pub const FEATURE_NAMES: [&str; 2] = ["heart_rate", "blood_oxygen"];

/// Ordered `(heart_rate, blood_oxygen)` tuple fed to the detector.
pub type FeatureVector = [f64; 2];

/// Self-reported activity level attached to a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    /// Resting or light activity.
    Low,
    /// Walking, light exercise.
    Moderate,
    /// Intense exercise.
    High,
    /// Any label other than the three above.
    #[serde(other)]
    Unrecognized,
}

impl ActivityLevel {
    /// Parses a wire label. Matching is exact and case-sensitive.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            "low" => Self::Low,
            "moderate" => Self::Moderate,
            "high" => Self::High,
            _ => Self::Unrecognized,
        }
    }

    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Unrecognized => "unrecognized",
        }
    }

    /// Heart-rate increase (bpm) the synthetic generator adds for this level.
    #[must_use]
    pub const fn heart_rate_boost(self) -> f64 {
        match self {
            Self::Low | Self::Unrecognized => 0.0,
            Self::Moderate => 20.0,
            Self::High => 50.0,
        }
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single vital-sign reading from a wearable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Beats per minute.
    #[serde(deserialize_with = "number_or_numeric_text")]
    pub heart_rate: f64,
    /// SpO2 percentage.
    #[serde(deserialize_with = "number_or_numeric_text")]
    pub blood_oxygen: f64,
    /// Activity at the time of the reading.
    pub activity_level: ActivityLevel,
}

/// Accepts `75`, `75.5` or `"75"`; anything else is a type error.
fn number_or_numeric_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected a number, got {text:?}"))),
    }
}

/// Synthetic samples share the reading layout.
pub type TrainingSample = Reading;

impl Reading {
    /// Creates a reading.
    #[must_use]
    pub const fn new(heart_rate: f64, blood_oxygen: f64, activity_level: ActivityLevel) -> Self {
        Self {
            heart_rate,
            blood_oxygen,
            activity_level,
        }
    }

    /// Feature vector in [`FEATURE_NAMES`] order.
    #[must_use]
    pub const fn features(&self) -> FeatureVector {
        [self.heart_rate, self.blood_oxygen]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_follow_contract_order() {
        let reading = Reading::new(88.0, 97.5, ActivityLevel::Moderate);
        assert_eq!(reading.features(), [88.0, 97.5]);
        assert_eq!(FEATURE_NAMES, ["heart_rate", "blood_oxygen"]);
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let reading: Reading = serde_json::from_str(
            r#"{"heart_rate": "75", "blood_oxygen": " 98.5 ", "activity_level": "low"}"#,
        )
        .unwrap();
        assert_eq!(reading, Reading::new(75.0, 98.5, ActivityLevel::Low));

        for body in [
            r#"{"heart_rate": "fast", "blood_oxygen": 98, "activity_level": "low"}"#,
            r#"{"heart_rate": true, "blood_oxygen": 98, "activity_level": "low"}"#,
            r#"{"blood_oxygen": 98, "activity_level": "low"}"#,
        ] {
            assert!(serde_json::from_str::<Reading>(body).is_err(), "{body}");
        }
    }

    #[test]
    fn unknown_labels_deserialize_as_unrecognized() {
        let reading: Reading = serde_json::from_str(
            r#"{"heart_rate": 75, "blood_oxygen": 98, "activity_level": "LOW"}"#,
        )
        .unwrap();
        assert_eq!(reading.activity_level, ActivityLevel::Unrecognized);
        assert_eq!(ActivityLevel::from_label("LOW"), ActivityLevel::Unrecognized);
        assert_eq!(ActivityLevel::from_label("low"), ActivityLevel::Low);
    }
}
