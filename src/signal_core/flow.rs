//! Synthetic order flow from quote movement
//!
//! No trade prints are available, so pressure is inferred from the quotes:
//! an ask that steps up counts as a buyer lifting (+1), a bid that steps
//! down counts as a seller hitting (-1). Both in the same tick cancel to 0.
//! Deltas are summed into bar-width buckets and accumulated into CVD.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::types::{FlowPoint, Tick, Timeframe};

/// Delta contributed by `curr` given the previous quote. Always -1, 0 or 1.
pub fn synthetic_delta(prev: &Tick, curr: &Tick) -> i64 {
    let buy_pressure = if curr.ask - prev.ask > 0.0 { 1 } else { 0 };
    let sell_pressure = if curr.bid - prev.bid < 0.0 { -1 } else { 0 };
    buy_pressure + sell_pressure
}

/// Aggregates tick deltas onto the candle time grid
#[derive(Debug, Clone, Copy)]
pub struct FlowAggregator {
    timeframe: Timeframe,
}

impl FlowAggregator {
    pub fn new(timeframe: Timeframe) -> Self {
        Self { timeframe }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Per-tick deltas, one per consecutive pair. The first tick has no
    /// predecessor and is dropped.
    pub fn tick_deltas(ticks: &[Tick]) -> Vec<(DateTime<Utc>, i64)> {
        ticks
            .windows(2)
            .map(|pair| (pair[1].time, synthetic_delta(&pair[0], &pair[1])))
            .collect()
    }

    /// Bucketed flow with running CVD, ascending by bucket time.
    ///
    /// Buckets without ticks are absent here; FeatureBuilder forward-fills
    /// them once the flow is joined onto candles. Fewer than two ticks
    /// yields an empty series.
    pub fn aggregate(&self, ticks: &[Tick]) -> Vec<FlowPoint> {
        let mut buckets: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();
        for (time, delta) in Self::tick_deltas(ticks) {
            *buckets.entry(self.timeframe.bucket_start(time)).or_insert(0) += delta;
        }

        let mut cvd = 0i64;
        buckets
            .into_iter()
            .map(|(bucket_time, synthetic_delta)| {
                cvd += synthetic_delta;
                FlowPoint {
                    bucket_time,
                    synthetic_delta,
                    cvd,
                }
            })
            .collect()
    }
}
