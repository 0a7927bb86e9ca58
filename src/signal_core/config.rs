//! Configuration for the regime monitor

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::classifier::DEFAULT_CONFIDENCE_THRESHOLD;
use super::features::{FeatureBuilder, DEFAULT_EMA_SPAN, DEFAULT_Z_WINDOW};
use crate::types::Timeframe;

/// Upper bound on the tick lookback (one week)
pub const MAX_TICK_LOOKBACK_SECS: i64 = 7 * 24 * 60 * 60;

/// Everything the core consumes per running instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Instrument symbol as the data source knows it (e.g., "BTCUSD")
    pub symbol: String,

    /// Bar width for candles and flow buckets
    pub timeframe: Timeframe,

    /// Rolling window for the close z-score
    pub z_window: usize,

    /// EMA span for TRFI
    pub ema_span: usize,

    /// Minimum peak class probability to act on
    pub confidence_threshold: f64,

    /// Delay between cycles, in milliseconds
    pub poll_interval_ms: u64,

    /// Candles pulled per cycle
    pub candle_count: usize,

    /// Tick history pulled per cycle, in seconds
    pub tick_lookback_secs: i64,

    /// Serialized model artifact
    pub model_path: PathBuf,

    /// Refuse to start without a model
    pub require_model: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSD".to_string(),
            timeframe: Timeframe::M1,
            z_window: DEFAULT_Z_WINDOW,
            ema_span: DEFAULT_EMA_SPAN,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            poll_interval_ms: 10_000,
            candle_count: 500,
            tick_lookback_secs: 4 * 60 * 60,
            model_path: PathBuf::from("regime_model.json"),
            require_model: false,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tick_lookback_secs)
    }

    pub fn feature_builder(&self) -> FeatureBuilder {
        FeatureBuilder::new(self.z_window, self.ema_span)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            bail!("symbol must not be empty");
        }
        if self.z_window == 0 {
            bail!("z_window must be at least 1");
        }
        if self.ema_span == 0 {
            bail!("ema_span must be at least 1");
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            bail!(
                "confidence_threshold must be in (0, 1], got {}",
                self.confidence_threshold
            );
        }
        if self.poll_interval_ms == 0 {
            bail!("poll interval must be positive");
        }
        if self.tick_lookback_secs <= 0 {
            bail!("tick lookback must be positive");
        }
        if self.tick_lookback_secs > MAX_TICK_LOOKBACK_SECS {
            bail!(
                "tick lookback {}s exceeds the {}s maximum",
                self.tick_lookback_secs,
                MAX_TICK_LOOKBACK_SECS
            );
        }

        // One extra candle: the newest bar is still forming
        let needed = self.feature_builder().min_history() + 1;
        if self.candle_count < needed {
            bail!(
                "candle_count {} is below the {} bars needed for one closed feature row",
                self.candle_count,
                needed
            );
        }
        Ok(())
    }
}
