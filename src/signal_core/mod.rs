//! Signal Core - feature derivation and regime classification
//!
//! This module contains the per-bar decision pipeline:
//! - Synthetic order flow (CVD) from bid/ask quotes
//! - Rolling indicators and the five model features
//! - Pretrained model artifacts
//! - Confidence-gated classification
//! - The polling monitor that ties them together

pub mod flow;
pub mod indicators;
pub mod features;
pub mod model;
pub mod classifier;
pub mod config;
pub mod monitor;

// Re-export commonly used types
pub use flow::{synthetic_delta, FlowAggregator};
pub use features::{FeatureBuilder, DEFAULT_EMA_SPAN, DEFAULT_Z_WINDOW, MOMENTUM_LAG};
pub use model::{ForestModel, ModelError, RegimeModel, TreeNode};
pub use classifier::{
    ModelHandle, ModelState, Prediction, Regime, RegimeClassifier, DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use config::MonitorConfig;
pub use monitor::{CycleOutcome, MonitorLoop, RunSummary, SkipReason};
