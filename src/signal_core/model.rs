//! Pretrained regime model artifacts
//!
//! The classifier is trained elsewhere and shipped as a serialized random
//! forest: JSON, optionally zstd-compressed (`.json.zst`). The artifact
//! records the feature names it was trained on so a column-order mismatch is
//! rejected at load time instead of silently corrupting predictions.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::types::{FeatureVector, FEATURE_COLUMNS};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model artifact not found: {0}")]
    Missing(String),

    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode model artifact: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("model trained on features {found:?}, expected {expected:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("invalid model input: {0}")]
    InvalidInput(String),

    #[error("model runtime error: {0}")]
    Runtime(String),
}

/// A loaded classifier. Class labels are -1 (sell), 0 (neutral), 1 (buy).
pub trait RegimeModel: Send + Sync {
    /// Predicted class for one row
    fn predict(&self, features: &FeatureVector) -> Result<i64, ModelError>;

    /// Per-class probabilities, in the order of `classes()`
    fn predict_proba(&self, features: &FeatureVector) -> Result<Vec<f64>, ModelError>;

    /// Class labels the probability vector refers to
    fn classes(&self) -> &[i64];
}

/// Decision tree node. Splits send `x[feature] <= threshold` left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        probabilities: Vec<f64>,
    },
}

impl TreeNode {
    fn leaf_for(&self, x: &[f64]) -> Result<&[f64], ModelError> {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { probabilities } => return Ok(probabilities.as_slice()),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = x.get(*feature).ok_or_else(|| {
                        ModelError::Runtime(format!("split on missing feature index {}", feature))
                    })?;
                    node = if *value <= *threshold { left.as_ref() } else { right.as_ref() };
                }
            }
        }
    }

    fn check(&self, n_classes: usize) -> Result<(), String> {
        match self {
            TreeNode::Leaf { probabilities } => {
                if probabilities.len() != n_classes {
                    return Err(format!(
                        "leaf has {} probabilities for {} classes",
                        probabilities.len(),
                        n_classes
                    ));
                }
                if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) {
                    return Err("leaf probabilities must be finite and non-negative".to_string());
                }
                Ok(())
            }
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if *feature >= FEATURE_COLUMNS.len() {
                    return Err(format!("split feature index {} out of range", feature));
                }
                if !threshold.is_finite() {
                    return Err("split threshold must be finite".to_string());
                }
                left.check(n_classes)?;
                right.check(n_classes)
            }
        }
    }
}

/// Random forest classifier: averaged leaf probabilities, argmax class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    pub feature_names: Vec<String>,
    pub classes: Vec<i64>,
    pub trees: Vec<TreeNode>,
}

impl ForestModel {
    /// Load and validate an artifact (`.json` or `.json.zst`)
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::Missing(path.display().to_string()));
        }

        let bytes = std::fs::read(path)?;
        let json = if is_compressed(path) {
            zstd::decode_all(&bytes[..])?
        } else {
            bytes
        };

        let model: ForestModel = serde_json::from_slice(&json)?;
        model.validate()?;
        Ok(model)
    }

    /// Write the artifact, compressing when the path ends in `.zst`
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let json = serde_json::to_vec(self)?;
        let bytes = if is_compressed(path) {
            zstd::encode_all(&json[..], 3)?
        } else {
            json
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let expected: Vec<String> = FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect();
        if self.feature_names != expected {
            return Err(ModelError::FeatureMismatch {
                expected,
                found: self.feature_names.clone(),
            });
        }
        if self.classes.is_empty() {
            return Err(ModelError::Runtime("model has no classes".to_string()));
        }
        if self.trees.is_empty() {
            return Err(ModelError::Runtime("model has no trees".to_string()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.check(self.classes.len())
                .map_err(|e| ModelError::Runtime(format!("tree {}: {}", i, e)))?;
        }
        Ok(())
    }
}

impl RegimeModel for ForestModel {
    fn predict(&self, features: &FeatureVector) -> Result<i64, ModelError> {
        let probs = self.predict_proba(features)?;
        let best = probs
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
            .ok_or_else(|| ModelError::Runtime("empty probability vector".to_string()))?;
        Ok(self.classes[best])
    }

    fn predict_proba(&self, features: &FeatureVector) -> Result<Vec<f64>, ModelError> {
        if !features.is_finite() {
            return Err(ModelError::InvalidInput(format!(
                "non-finite feature in {:?}",
                features.as_slice()
            )));
        }

        let mut sums = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let leaf = tree.leaf_for(features.as_slice())?;
            for (sum, p) in sums.iter_mut().zip(leaf) {
                *sum += p;
            }
        }

        let n = self.trees.len() as f64;
        Ok(sums.into_iter().map(|s| s / n).collect())
    }

    fn classes(&self) -> &[i64] {
        &self.classes
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "zst")
}
