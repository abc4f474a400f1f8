//! Isolation forest: an ensemble of random trees in which outliers end up on
//! short root-to-leaf paths.

use ndarray::ArrayView2;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{error::ModelError, reading::FeatureVector};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Verdict returned by an outlier detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierLabel {
    /// Isolated quickly: anomalous.
    Outlier,
    /// Part of the bulk of the distribution.
    Inlier,
}

impl OutlierLabel {
    /// Whether the verdict is an outlier.
    #[must_use]
    pub const fn is_outlier(self) -> bool {
        matches!(self, Self::Outlier)
    }
}

/// Anything that can classify a feature vector. Implementations must be safe to share across requests.
pub trait OutlierDetector: Send + Sync {
    /// Classifies one `(heart_rate, blood_oxygen)` vector.
    fn predict(&self, features: &FeatureVector) -> OutlierLabel;
}

/// Hyperparameters for [`IsolationForest::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Upper bound on rows drawn per tree; the effective size is `min(max_samples, n)`.
    pub max_samples: usize,
    /// Expected outlier fraction used to place the decision threshold.
    pub contamination: f64,
    /// Seed for subsampling and split selection.
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.05,
            seed: 42,
        }
    }
}

impl ForestParams {
    /// Rejects out-of-range values.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.n_estimators == 0 {
            return Err(ModelError::invalid("n_estimators", "must be at least 1"));
        }
        if self.max_samples < 2 {
            return Err(ModelError::invalid("max_samples", "must be at least 2"));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(ModelError::invalid(
                "contamination",
                format!("{} is outside (0, 0.5]", self.contamination),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

impl Node {
    fn is_well_formed(&self, n_features: usize) -> bool {
        match self {
            Self::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                *feature < n_features
                    && threshold.is_finite()
                    && left.is_well_formed(n_features)
                    && right.is_well_formed(n_features)
            }
            Self::Leaf { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn grow(
        data: &ArrayView2<'_, f64>,
        rows: &[usize],
        depth: usize,
        height_limit: usize,
        rng: &mut ChaCha8Rng,
    ) -> Node {
        if depth >= height_limit || rows.len() <= 1 {
            return Node::Leaf { size: rows.len() };
        }
        let mut features: Vec<usize> = (0..data.ncols()).collect();
        features.shuffle(rng);
        for feature in features {
            let (lo, hi) = rows.iter().fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), &row| {
                    let value = data[[row, feature]];
                    (lo.min(value), hi.max(value))
                },
            );
            if hi <= lo {
                continue;
            }
            let threshold = rng.gen_range(lo..hi);
            let (left, right): (Vec<usize>, Vec<usize>) = rows
                .iter()
                .copied()
                .partition(|&row| data[[row, feature]] < threshold);
            return Node::Split {
                feature,
                threshold,
                left: Box::new(Self::grow(data, &left, depth + 1, height_limit, rng)),
                right: Box::new(Self::grow(data, &right, depth + 1, height_limit, rng)),
            };
        }
        // Every feature is constant within this node.
        Node::Leaf { size: rows.len() }
    }

    fn path_length(&self, x: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
#[must_use]
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile (`pct` in `[0, 100]`) of unsorted values.
fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

/// Fitted isolation forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    params: ForestParams,
    sample_size: usize,
    n_features: usize,
    offset: f64,
    trees: Vec<IsolationTree>,
}

impl IsolationForest {
    /// Fits the forest on an `n x d` matrix and calibrates the threshold on the same rows.
    pub fn fit(features: ArrayView2<'_, f64>, params: ForestParams) -> Result<Self, ModelError> {
        params.validate()?;
        let rows = features.nrows();
        if rows < 2 {
            return Err(ModelError::InsufficientData {
                required: 2,
                got: rows,
            });
        }
        if features.ncols() == 0 {
            return Err(ModelError::invalid("features", "matrix has no columns"));
        }

        let sample_size = params.max_samples.min(rows);
        let height_limit = (sample_size as f64).log2().ceil() as usize;
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let all_rows: Vec<usize> = (0..rows).collect();

        let trees = (0..params.n_estimators)
            .map(|_| {
                let subsample: Vec<usize> = all_rows
                    .choose_multiple(&mut rng, sample_size)
                    .copied()
                    .collect();
                IsolationTree {
                    root: IsolationTree::grow(&features, &subsample, 0, height_limit, &mut rng),
                }
            })
            .collect();

        let mut forest = Self {
            params,
            sample_size,
            n_features: features.ncols(),
            offset: 0.0,
            trees,
        };
        let scores: Vec<f64> = features
            .rows()
            .into_iter()
            .map(|row| forest.score(&row.to_vec()))
            .collect();
        forest.offset = percentile(&scores, 100.0 * params.contamination);
        Ok(forest)
    }

    /// Checks a deserialized forest before it is used for scoring.
    ///
    /// Rejects empty ensembles, degenerate sample sizes, non-finite offsets and
    /// splits on columns the forest was not fitted on.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::invalid("trees", "forest has no trees"));
        }
        if self.sample_size < 2 {
            return Err(ModelError::InsufficientData {
                required: 2,
                got: self.sample_size,
            });
        }
        if !self.offset.is_finite() {
            return Err(ModelError::invalid(
                "offset",
                format!("{} is not finite", self.offset),
            ));
        }
        if !self
            .trees
            .iter()
            .all(|tree| tree.root.is_well_formed(self.n_features))
        {
            return Err(ModelError::invalid(
                "trees",
                format!(
                    "split outside the {} fitted features or with a non-finite threshold",
                    self.n_features
                ),
            ));
        }
        Ok(())
    }

    /// Raw score in `[-1, 0)`; lower means more anomalous.
    #[must_use]
    pub fn score(&self, x: &[f64]) -> f64 {
        let mean_depth = self
            .trees
            .iter()
            .map(|tree| tree.path_length(x))
            .sum::<f64>()
            / self.trees.len() as f64;
        -(2.0_f64.powf(-mean_depth / average_path_length(self.sample_size)))
    }

    /// Score shifted by the calibrated offset; negative values are outliers.
    #[must_use]
    pub fn decision_function(&self, x: &[f64]) -> f64 {
        self.score(x) - self.offset
    }

    /// Labels every row of a matrix.
    #[must_use]
    pub fn predict_rows(&self, features: ArrayView2<'_, f64>) -> Vec<OutlierLabel> {
        features
            .rows()
            .into_iter()
            .map(|row| self.label(&row.to_vec()))
            .collect()
    }

    fn label(&self, x: &[f64]) -> OutlierLabel {
        if self.decision_function(x) < 0.0 {
            OutlierLabel::Outlier
        } else {
            OutlierLabel::Inlier
        }
    }

    /// Calibrated threshold.
    #[must_use]
    pub const fn offset(&self) -> f64 {
        self.offset
    }

    /// Hyperparameters used for fitting.
    #[must_use]
    pub const fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Rows drawn per tree.
    #[must_use]
    pub const fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Width of the feature vectors the forest was fitted on.
    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Number of trees.
    #[must_use]
    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }
}

impl OutlierDetector for IsolationForest {
    fn predict(&self, features: &FeatureVector) -> OutlierLabel {
        self.label(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{feature_matrix, generate, SyntheticConfig};
    use ndarray::Array2;

    fn trained() -> IsolationForest {
        let samples = generate(&SyntheticConfig::default()).unwrap();
        IsolationForest::fit(feature_matrix(&samples).view(), ForestParams::default()).unwrap()
    }

    #[test]
    fn average_path_length_matches_reference_values() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.244_770_920_504_9).abs() < 1e-6, "{c256}");
    }

    #[test]
    fn percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert!((percentile(&values, 5.0) - 1.2).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_params() {
        let data = Array2::<f64>::zeros((10, 2));
        let params = ForestParams {
            contamination: 0.9,
            ..ForestParams::default()
        };
        assert!(matches!(
            IsolationForest::fit(data.view(), params),
            Err(ModelError::InvalidParameter { name: "contamination", .. })
        ));
        let tiny = Array2::<f64>::zeros((1, 2));
        assert!(matches!(
            IsolationForest::fit(tiny.view(), ForestParams::default()),
            Err(ModelError::InsufficientData { got: 1, .. })
        ));
    }

    #[test]
    fn flags_roughly_the_contamination_fraction() {
        let samples = generate(&SyntheticConfig::default()).unwrap();
        let matrix = feature_matrix(&samples);
        let forest = IsolationForest::fit(matrix.view(), ForestParams::default()).unwrap();
        let flagged = forest
            .predict_rows(matrix.view())
            .into_iter()
            .filter(|label| label.is_outlier())
            .count();
        let fraction = flagged as f64 / samples.len() as f64;
        assert!((fraction - 0.05).abs() < 0.01, "flagged {fraction}");
    }

    #[test]
    fn separates_typical_from_extreme_readings() {
        let forest = trained();
        assert_eq!(forest.predict(&[75.0, 98.0]), OutlierLabel::Inlier);
        assert_eq!(forest.predict(&[190.0, 80.0]), OutlierLabel::Outlier);
        assert!(forest.score(&[190.0, 80.0]) < forest.score(&[75.0, 98.0]));
    }

    #[test]
    fn fitting_is_deterministic_for_a_seed() {
        let a = trained();
        let b = trained();
        assert_eq!(a.offset(), b.offset());
        assert_eq!(a.score(&[101.0, 96.0]), b.score(&[101.0, 96.0]));
    }

    #[test]
    fn fitted_forest_is_well_formed() {
        let forest = trained();
        forest.validate().unwrap();

        let mut empty = forest.clone();
        empty.trees.clear();
        assert!(matches!(
            empty.validate(),
            Err(ModelError::InvalidParameter { name: "trees", .. })
        ));

        let mut degenerate = forest.clone();
        degenerate.sample_size = 0;
        assert!(degenerate.validate().is_err());

        let mut unbounded = forest;
        unbounded.offset = f64::NAN;
        assert!(matches!(
            unbounded.validate(),
            Err(ModelError::InvalidParameter { name: "offset", .. })
        ));
    }

    #[test]
    fn constant_data_does_not_panic() {
        let data = Array2::from_elem((20, 2), 5.0);
        let forest = IsolationForest::fit(data.view(), ForestParams::default()).unwrap();
        assert_eq!(forest.predict(&[5.0, 5.0]), OutlierLabel::Inlier);
    }
}
