//! Serialized model artifacts: feature scaler and forest classifier.
//!
//! Artifacts are JSON snapshots produced by the offline training tooling and
//! loaded once at startup. The classifier is a forest of axis-aligned
//! decision trees stored as flat node arrays; `predict_proba` averages the
//! normalized leaf class counts across trees. Both binary (healthy, anomaly)
//! and ternary (healthy, warning, critical) class layouts are accepted.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{FEATURE_NAMES, NUM_FEATURES};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read artifact {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("failed to parse artifact {0}: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("scaler shape mismatch: expected {expected} features, got {got}")]
    ScalerShape { expected: usize, got: usize },

    #[error("scaler feature order mismatch at index {index}: expected {expected}, got {got}")]
    FeatureOrder {
        index: usize,
        expected: &'static str,
        got: String,
    },

    #[error("unsupported class count {0} (expected 2 or 3)")]
    UnsupportedClassCount(usize),

    #[error("classifier has no trees")]
    EmptyForest,

    #[error("corrupt tree: {0}")]
    CorruptTree(String),
}

// ============================================================================
// Scaler
// ============================================================================

/// Standardizing scaler: `(x - mean) / scale` per feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub feature_names: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl FeatureScaler {
    /// Validate dimensions and feature ordering against the crate contract.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.mean.len() != NUM_FEATURES || self.scale.len() != NUM_FEATURES {
            return Err(ArtifactError::ScalerShape {
                expected: NUM_FEATURES,
                got: self.mean.len().max(self.scale.len()),
            });
        }
        if self.feature_names.len() != NUM_FEATURES {
            return Err(ArtifactError::ScalerShape {
                expected: NUM_FEATURES,
                got: self.feature_names.len(),
            });
        }
        for (index, (got, expected)) in self
            .feature_names
            .iter()
            .zip(FEATURE_NAMES.iter())
            .enumerate()
        {
            if got != expected {
                return Err(ArtifactError::FeatureOrder {
                    index,
                    expected,
                    got: got.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn transform(&self, x: &[f64; NUM_FEATURES]) -> [f64; NUM_FEATURES] {
        let mut out = [0.0; NUM_FEATURES];
        for i in 0..NUM_FEATURES {
            out[i] = (x[i] - self.mean[i]) / self.scale[i].max(1e-12);
        }
        out
    }
}

// ============================================================================
// Forest classifier
// ============================================================================

/// One node of a flat decision-tree array. `feature < 0` marks a leaf; for
/// split nodes, samples with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: i16,
    pub threshold: f64,
    pub left: u32,
    pub right: u32,
    /// Per-class training sample counts at this node (meaningful for leaves).
    pub counts: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Walk the tree to a leaf and return its class counts.
    fn leaf_counts(&self, x: &[f64; NUM_FEATURES]) -> Result<&[f64], ArtifactError> {
        let mut idx = 0usize;
        // Bounded walk: a well-formed tree reaches a leaf in < nodes.len() hops.
        for _ in 0..=self.nodes.len() {
            let node = self
                .nodes
                .get(idx)
                .ok_or_else(|| ArtifactError::CorruptTree(format!("node index {idx} out of bounds")))?;
            if node.feature < 0 {
                return Ok(&node.counts);
            }
            let feature = node.feature as usize;
            if feature >= NUM_FEATURES {
                return Err(ArtifactError::CorruptTree(format!(
                    "split on unknown feature {feature}"
                )));
            }
            idx = if x[feature] <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
        Err(ArtifactError::CorruptTree("cycle detected".to_string()))
    }
}

/// Forest classifier over the 8-feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpClassifier {
    pub n_classes: usize,
    pub trees: Vec<DecisionTree>,
}

impl PumpClassifier {
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if !(self.n_classes == 2 || self.n_classes == 3) {
            return Err(ArtifactError::UnsupportedClassCount(self.n_classes));
        }
        if self.trees.is_empty() {
            return Err(ArtifactError::EmptyForest);
        }
        for tree in &self.trees {
            if tree.nodes.is_empty() {
                return Err(ArtifactError::CorruptTree("empty node array".to_string()));
            }
            for node in &tree.nodes {
                if node.feature < 0 && node.counts.len() != self.n_classes {
                    return Err(ArtifactError::CorruptTree(format!(
                        "leaf has {} class counts, expected {}",
                        node.counts.len(),
                        self.n_classes
                    )));
                }
            }
        }
        Ok(())
    }

    /// Class probabilities: mean of normalized leaf counts across trees.
    pub fn predict_proba(&self, x: &[f64; NUM_FEATURES]) -> Result<Vec<f64>, ArtifactError> {
        let mut acc = vec![0.0_f64; self.n_classes];
        for tree in &self.trees {
            let counts = tree.leaf_counts(x)?;
            let total: f64 = counts.iter().sum();
            if total > 0.0 {
                for (slot, &c) in acc.iter_mut().zip(counts.iter()) {
                    *slot += c / total;
                }
            }
        }
        for slot in &mut acc {
            *slot /= self.trees.len() as f64;
        }
        Ok(acc)
    }

    /// Probability of the anomaly super-class: `P(anomaly)` for binary
    /// models, `P(warning) + P(critical)` for ternary models.
    pub fn anomaly_probability(&self, x: &[f64; NUM_FEATURES]) -> Result<f64, ArtifactError> {
        let proba = self.predict_proba(x)?;
        Ok(proba.iter().skip(1).sum())
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Classifier + scaler pair loaded from `models/`.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub classifier: PumpClassifier,
    pub scaler: FeatureScaler,
}

impl ModelArtifacts {
    /// Load and validate both artifacts.
    pub fn load(classifier_path: &Path, scaler_path: &Path) -> Result<Self, ArtifactError> {
        let classifier: PumpClassifier = read_json(classifier_path)?;
        classifier.validate()?;
        let scaler: FeatureScaler = read_json(scaler_path)?;
        scaler.validate()?;
        Ok(Self { classifier, scaler })
    }

    /// Scale then classify; returns the anomaly super-class probability.
    pub fn infer(&self, x: &[f64; NUM_FEATURES]) -> Result<f64, ArtifactError> {
        let scaled = self.scaler.transform(x);
        self.classifier.anomaly_probability(&scaled)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ArtifactError::Io(path.to_path_buf(), e))?;
    serde_json::from_str(&contents).map_err(|e| ArtifactError::Parse(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_scaler() -> FeatureScaler {
        FeatureScaler {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            mean: vec![0.0; NUM_FEATURES],
            scale: vec![1.0; NUM_FEATURES],
        }
    }

    /// Single-split tree on vib_rms: <= 5.0 is healthy, above is anomalous.
    fn vib_stump(n_classes: usize) -> DecisionTree {
        let healthy = {
            let mut c = vec![0.0; n_classes];
            c[0] = 10.0;
            c
        };
        let anomalous = {
            let mut c = vec![0.0; n_classes];
            c[n_classes - 1] = 10.0;
            c
        };
        DecisionTree {
            nodes: vec![
                TreeNode {
                    feature: 0,
                    threshold: 5.0,
                    left: 1,
                    right: 2,
                    counts: vec![0.0; n_classes],
                },
                TreeNode {
                    feature: -1,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                    counts: healthy,
                },
                TreeNode {
                    feature: -1,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                    counts: anomalous,
                },
            ],
        }
    }

    #[test]
    fn scaler_standardizes() {
        let mut scaler = identity_scaler();
        scaler.mean[0] = 2.0;
        scaler.scale[0] = 2.0;
        let x = [6.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let out = scaler.transform(&x);
        assert!((out[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn scaler_rejects_reordered_features() {
        let mut scaler = identity_scaler();
        scaler.feature_names.swap(0, 1);
        assert!(matches!(
            scaler.validate(),
            Err(ArtifactError::FeatureOrder { .. })
        ));
    }

    #[test]
    fn binary_forest_probability() {
        let clf = PumpClassifier {
            n_classes: 2,
            trees: vec![vib_stump(2), vib_stump(2)],
        };
        clf.validate().unwrap();
        let healthy = [2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let anomalous = [8.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert!((clf.anomaly_probability(&healthy).unwrap() - 0.0).abs() < 1e-12);
        assert!((clf.anomaly_probability(&anomalous).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ternary_sums_warning_and_critical() {
        // One stump votes critical, a second constant tree votes warning
        let warning_leaf = DecisionTree {
            nodes: vec![TreeNode {
                feature: -1,
                threshold: 0.0,
                left: 0,
                right: 0,
                counts: vec![0.0, 10.0, 0.0],
            }],
        };
        let clf = PumpClassifier {
            n_classes: 3,
            trees: vec![vib_stump(3), warning_leaf],
        };
        clf.validate().unwrap();
        let anomalous = [8.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        // Tree 1: P(critical)=1; tree 2: P(warning)=1 -> mean over trees = 0.5 each
        let p = clf.anomaly_probability(&anomalous).unwrap();
        assert!((p - 1.0).abs() < 1e-12);
        let proba = clf.predict_proba(&anomalous).unwrap();
        assert!((proba[1] - 0.5).abs() < 1e-12);
        assert!((proba[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_wrong_class_count() {
        let clf = PumpClassifier {
            n_classes: 4,
            trees: vec![vib_stump(4)],
        };
        assert!(matches!(
            clf.validate(),
            Err(ArtifactError::UnsupportedClassCount(4))
        ));
    }

    #[test]
    fn corrupt_tree_index_is_detected() {
        let tree = DecisionTree {
            nodes: vec![TreeNode {
                feature: 0,
                threshold: 1.0,
                left: 7,
                right: 7,
                counts: vec![],
            }],
        };
        let x = [0.0; NUM_FEATURES];
        assert!(matches!(
            tree.leaf_counts(&x),
            Err(ArtifactError::CorruptTree(_))
        ));
    }

    #[test]
    fn artifacts_round_trip_through_json() {
        let clf = PumpClassifier {
            n_classes: 2,
            trees: vec![vib_stump(2)],
        };
        let json = serde_json::to_string(&clf).unwrap();
        let back: PumpClassifier = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        let anomalous = [8.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(
            clf.anomaly_probability(&anomalous).unwrap(),
            back.anomaly_probability(&anomalous).unwrap()
        );
    }
}
