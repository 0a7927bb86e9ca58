//! Confidence-gated regime classification
//!
//! `ModelHandle` owns the single model instance and its load-once lifecycle
//! (unloaded -> loaded | unavailable). `RegimeClassifier` turns a feature
//! row into a `Prediction` and never lets a model fault escape.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use super::model::{ForestModel, ModelError, RegimeModel};
use crate::types::{FeatureRow, Signal};

/// Minimum peak class probability required to act on a prediction
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.55;

/// Classifier output state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Buy,
    Sell,
    Neutral,
}

impl Regime {
    pub fn from_class(class: i64) -> Option<Self> {
        match class {
            1 => Some(Self::Buy),
            -1 => Some(Self::Sell),
            0 => Some(Self::Neutral),
            _ => None,
        }
    }

    pub fn signal(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
            Self::Neutral => 0,
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Outcome of scoring one row
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Confident prediction
    Scored { regime: Regime, confidence: f64 },
    /// Peak probability below the gate
    Uncertain { confidence: f64 },
    /// No model artifact for this process
    ModelUnavailable,
    /// Scoring failed; treated as neutral
    Fault(String),
}

impl Prediction {
    pub fn label(&self) -> String {
        match self {
            Self::Scored { regime, confidence } => {
                format!("{} ({:.0}%)", regime, confidence * 100.0)
            }
            Self::Uncertain { .. } => "UNCERTAIN".to_string(),
            Self::ModelUnavailable => "AWAITING MODEL".to_string(),
            Self::Fault(_) => "ERROR".to_string(),
        }
    }

    pub fn signal(&self) -> i8 {
        match self {
            Self::Scored { regime, .. } => regime.signal(),
            _ => 0,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::Scored { confidence, .. } | Self::Uncertain { confidence } => *confidence,
            _ => 0.0,
        }
    }

    pub fn to_signal(&self) -> Signal {
        Signal {
            label: self.label(),
            signal: self.signal(),
            confidence: self.confidence(),
        }
    }
}

/// Load state of the model
pub enum ModelState {
    Unloaded,
    Loaded(Box<dyn RegimeModel>),
    Unavailable,
}

impl fmt::Debug for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => write!(f, "Unloaded"),
            Self::Loaded(_) => write!(f, "Loaded"),
            Self::Unavailable => write!(f, "Unavailable"),
        }
    }
}

/// Owned model resource, loaded on first use and never reloaded
#[derive(Debug)]
pub struct ModelHandle {
    path: Option<PathBuf>,
    state: ModelState,
}

impl ModelHandle {
    /// Handle that loads `path` on first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            state: ModelState::Unloaded,
        }
    }

    /// Handle around an already constructed model
    pub fn preloaded(model: impl RegimeModel + 'static) -> Self {
        Self {
            path: None,
            state: ModelState::Loaded(Box::new(model)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            path: None,
            state: ModelState::Unavailable,
        }
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModelState::Loaded(_))
    }

    /// Resolve the handle, loading at most once. A failed first attempt
    /// leaves the handle unavailable for the rest of the process.
    pub fn get(&mut self) -> Option<&dyn RegimeModel> {
        if matches!(self.state, ModelState::Unloaded) {
            self.state = match self.path.as_deref() {
                Some(path) => match ForestModel::load(path) {
                    Ok(model) => {
                        info!(
                            "Loaded regime model from {:?} ({} trees, classes {:?})",
                            path,
                            model.trees.len(),
                            model.classes
                        );
                        ModelState::Loaded(Box::new(model))
                    }
                    Err(ModelError::Missing(p)) => {
                        warn!("Model artifact '{}' not found - predictions will await a model", p);
                        ModelState::Unavailable
                    }
                    Err(e) => {
                        error!("Failed to load model from {:?}: {} - predictions disabled", path, e);
                        ModelState::Unavailable
                    }
                },
                None => ModelState::Unavailable,
            };
        }

        match &self.state {
            ModelState::Loaded(model) => Some(model.as_ref()),
            _ => None,
        }
    }
}

/// Turns closed-bar feature rows into gated signals
#[derive(Debug)]
pub struct RegimeClassifier {
    handle: ModelHandle,
    confidence_threshold: f64,
}

impl RegimeClassifier {
    pub fn new(handle: ModelHandle, confidence_threshold: f64) -> Self {
        Self {
            handle,
            confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    /// Force the first load attempt; true if a model is resident
    pub fn ensure_loaded(&mut self) -> bool {
        self.handle.get().is_some()
    }

    /// Score one row. Never fails: faults come back as `Prediction::Fault`.
    pub fn predict(&mut self, row: &FeatureRow) -> Prediction {
        let threshold = self.confidence_threshold;
        let Some(model) = self.handle.get() else {
            return Prediction::ModelUnavailable;
        };

        let scored = panic::catch_unwind(AssertUnwindSafe(|| score(model, row, threshold)));
        match scored {
            Ok(Ok(prediction)) => prediction,
            Ok(Err(e)) => {
                warn!("Prediction failed for bar {}: {}", row.time, e);
                Prediction::Fault(e.to_string())
            }
            Err(_) => {
                error!("Model panicked while scoring bar {}", row.time);
                Prediction::Fault("model panicked".to_string())
            }
        }
    }
}

fn score(model: &dyn RegimeModel, row: &FeatureRow, threshold: f64) -> Result<Prediction, ModelError> {
    let features = row.to_vector();
    if !features.is_finite() {
        return Err(ModelError::InvalidInput(format!(
            "non-finite feature in {:?}",
            features.as_slice()
        )));
    }

    let class = model.predict(&features)?;
    let probs = model.predict_proba(&features)?;

    if probs.is_empty() || probs.iter().any(|p| !p.is_finite()) {
        return Err(ModelError::Runtime(format!("bad probability vector {:?}", probs)));
    }
    let confidence = probs.iter().copied().fold(f64::MIN, f64::max);

    debug!(
        class,
        confidence,
        features = ?features.as_slice(),
        "Scored bar {}",
        row.time
    );

    if confidence < threshold {
        return Ok(Prediction::Uncertain { confidence });
    }

    let regime = Regime::from_class(class)
        .ok_or_else(|| ModelError::Runtime(format!("unexpected class {}", class)))?;

    Ok(Prediction::Scored { regime, confidence })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_core::model::tests::{row, sample_forest};
    use crate::types::{FeatureVector, FEATURE_COLUMNS};
    use std::sync::{Arc, Mutex};

    /// Returns a fixed class/probability pair and records what it was fed
    struct FixedModel {
        class: i64,
        probs: Vec<f64>,
        seen: Arc<Mutex<Vec<Vec<f64>>>>,
    }

    impl FixedModel {
        fn new(class: i64, probs: &[f64]) -> Self {
            Self {
                class,
                probs: probs.to_vec(),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl RegimeModel for FixedModel {
        fn predict(&self, features: &FeatureVector) -> Result<i64, ModelError> {
            self.seen.lock().unwrap().push(features.as_slice().to_vec());
            Ok(self.class)
        }

        fn predict_proba(&self, _features: &FeatureVector) -> Result<Vec<f64>, ModelError> {
            Ok(self.probs.clone())
        }

        fn classes(&self) -> &[i64] {
            &[-1, 0, 1]
        }
    }

    struct FailingModel;

    impl RegimeModel for FailingModel {
        fn predict(&self, _features: &FeatureVector) -> Result<i64, ModelError> {
            Err(ModelError::Runtime("boom".to_string()))
        }

        fn predict_proba(&self, _features: &FeatureVector) -> Result<Vec<f64>, ModelError> {
            unreachable!()
        }

        fn classes(&self) -> &[i64] {
            &[]
        }
    }

    struct PanickingModel;

    impl RegimeModel for PanickingModel {
        fn predict(&self, _features: &FeatureVector) -> Result<i64, ModelError> {
            panic!("index out of bounds")
        }

        fn predict_proba(&self, _features: &FeatureVector) -> Result<Vec<f64>, ModelError> {
            unreachable!()
        }

        fn classes(&self) -> &[i64] {
            &[]
        }
    }

    fn classifier(model: impl RegimeModel + 'static) -> RegimeClassifier {
        RegimeClassifier::new(ModelHandle::preloaded(model), DEFAULT_CONFIDENCE_THRESHOLD)
    }

    #[test]
    fn test_confident_buy() {
        let mut clf = classifier(FixedModel::new(1, &[0.1, 0.2, 0.7]));
        let prediction = clf.predict(&row(2.1, 10.0));

        assert_eq!(
            prediction,
            Prediction::Scored {
                regime: Regime::Buy,
                confidence: 0.7
            }
        );
        assert_eq!(prediction.label(), "BUY (70%)");
        assert_eq!(prediction.signal(), 1);
    }

    #[test]
    fn test_sell_and_neutral_mapping() {
        let mut clf = classifier(FixedModel::new(-1, &[0.8, 0.1, 0.1]));
        let p = clf.predict(&row(-2.0, -5.0));
        assert_eq!(p.signal(), -1);
        assert_eq!(p.label(), "SELL (80%)");

        let mut clf = classifier(FixedModel::new(0, &[0.2, 0.6, 0.2]));
        let p = clf.predict(&row(0.0, 0.0));
        assert_eq!(p.signal(), 0);
        assert_eq!(p.label(), "NEUTRAL (60%)");
    }

    #[test]
    fn test_low_confidence_is_uncertain() {
        let mut clf = classifier(FixedModel::new(1, &[0.4, 0.35, 0.25]));
        let prediction = clf.predict(&row(2.1, 10.0));

        assert_eq!(prediction, Prediction::Uncertain { confidence: 0.4 });
        assert_eq!(prediction.label(), "UNCERTAIN");
        assert_eq!(prediction.signal(), 0);
    }

    #[test]
    fn test_gate_holds_for_every_class() {
        for class in [-1, 0, 1] {
            for peak in [0.34, 0.5, 0.549] {
                let rest = (1.0 - peak) / 2.0;
                let mut clf = classifier(FixedModel::new(class, &[rest, peak, rest]));
                let p = clf.predict(&row(1.0, 1.0));
                assert_eq!(p.signal(), 0);
                assert_eq!(p.label(), "UNCERTAIN");
            }
        }

        // Exactly at the threshold passes
        let mut clf = classifier(FixedModel::new(1, &[0.2, 0.25, 0.55]));
        assert_eq!(clf.predict(&row(1.0, 1.0)).signal(), 1);
    }

    #[test]
    fn test_feature_order_submitted_to_model() {
        let model = FixedModel::new(1, &[0.1, 0.2, 0.7]);
        let seen = model.seen.clone();
        let mut clf = classifier(model);

        clf.predict(&row(2.1, 10.0));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec![2.1, 0.3, 5.0, 10.0, 15.0]);
        assert_eq!(FEATURE_COLUMNS[3], "momentum_3");
    }

    #[test]
    fn test_missing_artifact_awaits_model_forever() {
        let path = std::env::temp_dir()
            .join(format!("regime_monitor_no_such_model_{}.json", std::process::id()));
        let mut clf = RegimeClassifier::new(ModelHandle::new(&path), DEFAULT_CONFIDENCE_THRESHOLD);

        for z in [0.0, 2.1, -3.0] {
            let p = clf.predict(&row(z, 1.0));
            assert_eq!(p, Prediction::ModelUnavailable);
            assert_eq!(p.label(), "AWAITING MODEL");
            assert_eq!(p.signal(), 0);
        }
        assert!(matches!(clf.handle().state(), ModelState::Unavailable));

        // Artifact appearing later is not picked up
        sample_forest().save(&path).unwrap();
        assert_eq!(clf.predict(&row(2.1, 10.0)), Prediction::ModelUnavailable);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_lazy_load_from_artifact() {
        let dir = std::env::temp_dir().join(format!("regime_monitor_clf_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.json.zst");
        sample_forest().save(&path).unwrap();

        let mut clf = RegimeClassifier::new(ModelHandle::new(&path), DEFAULT_CONFIDENCE_THRESHOLD);
        assert!(matches!(clf.handle().state(), ModelState::Unloaded));

        let p = clf.predict(&row(2.1, 10.0));
        assert!(clf.handle().is_loaded());
        assert_eq!(p.signal(), 1);
        assert!((p.confidence() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_unusable_artifact_disables_model_for_good() {
        let dir = std::env::temp_dir().join(format!("regime_monitor_bad_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let garbage = dir.join("garbage.json");
        std::fs::write(&garbage, b"{ not a forest").unwrap();

        let mut reordered_model = sample_forest();
        reordered_model.feature_names.swap(0, 1);
        let reordered = dir.join("reordered.json");
        reordered_model.save(&reordered).unwrap();

        for path in [garbage, reordered] {
            let mut clf = RegimeClassifier::new(ModelHandle::new(&path), DEFAULT_CONFIDENCE_THRESHOLD);

            let p = clf.predict(&row(2.1, 10.0));
            assert_eq!(p, Prediction::ModelUnavailable);
            assert_eq!(p.label(), "AWAITING MODEL");
            assert!(matches!(clf.handle().state(), ModelState::Unavailable));

            // A valid artifact at the same path is not reloaded
            sample_forest().save(&path).unwrap();
            assert_eq!(clf.predict(&row(2.1, 10.0)), Prediction::ModelUnavailable);
            assert!(!clf.ensure_loaded());
            assert!(matches!(clf.handle().state(), ModelState::Unavailable));
        }
    }

    #[test]
    fn test_model_error_becomes_fault() {
        let mut clf = classifier(FailingModel);
        let p = clf.predict(&row(1.0, 1.0));
        assert!(matches!(p, Prediction::Fault(_)));
        assert_eq!(p.label(), "ERROR");
        assert_eq!(p.signal(), 0);
    }

    #[test]
    fn test_model_panic_becomes_fault() {
        let mut clf = classifier(PanickingModel);
        assert!(matches!(clf.predict(&row(1.0, 1.0)), Prediction::Fault(_)));
    }

    #[test]
    fn test_malformed_vector_becomes_fault() {
        let mut clf = classifier(FixedModel::new(1, &[0.1, 0.2, 0.7]));
        assert!(matches!(clf.predict(&row(f64::INFINITY, 1.0)), Prediction::Fault(_)));
    }

    #[test]
    fn test_unknown_class_becomes_fault() {
        let mut clf = classifier(FixedModel::new(7, &[0.1, 0.2, 0.7]));
        assert!(matches!(clf.predict(&row(1.0, 1.0)), Prediction::Fault(_)));
    }
}
