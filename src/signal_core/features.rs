//! Feature derivation
//!
//! Joins bucketed CVD onto the candle grid and derives the five model
//! features. Rows whose trailing windows are incomplete are dropped, never
//! zero-filled.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use super::indicators::{diff, ema, rolling_mean, rolling_std, z_score};
use crate::types::{Candle, FeatureRow, FlowPoint};

/// Bars of lookback behind `momentum_3`
pub const MOMENTUM_LAG: usize = 3;

/// Default rolling window for the close z-score
pub const DEFAULT_Z_WINDOW: usize = 20;

/// Default span of the price-change EMA (TRFI)
pub const DEFAULT_EMA_SPAN: usize = 13;

#[derive(Debug, Clone, Copy)]
pub struct FeatureBuilder {
    z_window: usize,
    ema_span: usize,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_Z_WINDOW, DEFAULT_EMA_SPAN)
    }
}

impl FeatureBuilder {
    pub fn new(z_window: usize, ema_span: usize) -> Self {
        Self { z_window, ema_span }
    }

    pub fn z_window(&self) -> usize {
        self.z_window
    }

    pub fn ema_span(&self) -> usize {
        self.ema_span
    }

    /// Candles needed before the first row can be emitted
    pub fn min_history(&self) -> usize {
        // price_change and cvd_slope need one prior bar, momentum_3 three
        self.z_window.max(MOMENTUM_LAG + 1).max(2)
    }

    /// CVD per candle: left join on bucket time, forward-filled, leading gaps 0
    pub fn align_cvd(candles: &[Candle], flow: &[FlowPoint]) -> Vec<i64> {
        let by_bucket: HashMap<DateTime<Utc>, i64> =
            flow.iter().map(|p| (p.bucket_time, p.cvd)).collect();

        let mut last = 0i64;
        candles
            .iter()
            .map(|c| {
                if let Some(cvd) = by_bucket.get(&c.time) {
                    last = *cvd;
                }
                last
            })
            .collect()
    }

    /// Feature rows, ascending by time, one per candle with full history
    pub fn build(&self, candles: &[Candle], flow: &[FlowPoint]) -> Vec<FeatureRow> {
        let mut candles = candles.to_vec();
        candles.sort_by_key(|c| c.time);

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let cvd: Vec<f64> = Self::align_cvd(&candles, flow)
            .into_iter()
            .map(|v| v as f64)
            .collect();

        let means = rolling_mean(&closes, self.z_window);
        let stds = rolling_std(&closes, self.z_window);
        let price_change = diff(&closes, 1);
        let trfi = ema(&price_change, self.ema_span);
        let cvd_slope = diff(&cvd, 1);
        let momentum = diff(&closes, MOMENTUM_LAG);

        let rows: Vec<FeatureRow> = candles
            .iter()
            .enumerate()
            .filter_map(|(i, candle)| {
                let (mean, std) = (means[i]?, stds[i]?);
                Some(FeatureRow {
                    time: candle.time,
                    close: candle.close,
                    z_score: z_score(candle.close, mean, std),
                    trfi: trfi[i]?,
                    cvd_slope: cvd_slope[i]?,
                    momentum_3: momentum[i]?,
                    volatility: candle.high - candle.low,
                })
            })
            .collect();

        debug!(
            candles = candles.len(),
            flow_buckets = flow.len(),
            rows = rows.len(),
            "Built feature rows"
        );

        rows
    }
}
