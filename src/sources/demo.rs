//! Synthetic quote feed for running without a broker
//!
//! Generates a random-walk mid price with a fixed spread on a simulated
//! clock. Each candle pull advances the clock by `step`, so bars close at a
//! predictable rate regardless of wall time.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{ticks_in_range, DataSource, SourceError};
use crate::types::{Candle, Tick, Timeframe};

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub start_price: f64,
    pub spread: f64,
    /// Std dev of the mid-price change per tick
    pub tick_volatility: f64,
    /// Tick spacing is uniform in this range (ms)
    pub min_tick_gap_ms: i64,
    pub max_tick_gap_ms: i64,
    /// Simulated history generated on initialize
    pub warmup: Duration,
    /// Simulated time advanced per candle pull
    pub step: Duration,
    /// Generated ticks older than this are dropped
    pub retention: Duration,
    pub seed: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            start_price: 65_000.0,
            spread: 5.0,
            tick_volatility: 2.5,
            min_tick_gap_ms: 200,
            max_tick_gap_ms: 3_000,
            warmup: Duration::hours(9),
            step: Duration::seconds(15),
            retention: Duration::hours(12),
            seed: 42,
        }
    }
}

/// Build bid-based OHLC candles from quotes; volume counts ticks
pub fn candles_from_ticks(ticks: &[Tick], timeframe: Timeframe) -> Vec<Candle> {
    let mut bars: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
    for tick in ticks {
        let time = timeframe.bucket_start(tick.time);
        bars.entry(time)
            .and_modify(|c| {
                c.high = c.high.max(tick.bid);
                c.low = c.low.min(tick.bid);
                c.close = tick.bid;
                c.volume += 1;
            })
            .or_insert(Candle {
                time,
                open: tick.bid,
                high: tick.bid,
                low: tick.bid,
                close: tick.bid,
                volume: 1,
            });
    }
    bars.into_values().collect()
}

pub struct DemoSource {
    timeframe: Timeframe,
    config: DemoConfig,
    rng: StdRng,
    noise: Normal<f64>,
    clock: DateTime<Utc>,
    mid: f64,
    ticks: Vec<Tick>,
    connected: bool,
}

impl DemoSource {
    pub fn new(timeframe: Timeframe, config: DemoConfig, start: DateTime<Utc>) -> Result<Self> {
        if !config.tick_volatility.is_finite() || config.tick_volatility < 0.0 {
            anyhow::bail!("Invalid tick volatility: {}", config.tick_volatility);
        }
        let noise = Normal::new(0.0, config.tick_volatility)
            .with_context(|| format!("Invalid tick volatility: {}", config.tick_volatility))?;
        if config.min_tick_gap_ms <= 0 || config.max_tick_gap_ms < config.min_tick_gap_ms {
            anyhow::bail!(
                "Invalid tick gap range {}..={} ms",
                config.min_tick_gap_ms,
                config.max_tick_gap_ms
            );
        }

        Ok(Self {
            timeframe,
            rng: StdRng::seed_from_u64(config.seed),
            noise,
            clock: start,
            mid: config.start_price,
            ticks: Vec::new(),
            connected: false,
            config,
        })
    }

    fn round(price: f64) -> f64 {
        (price * 100.0).round() / 100.0
    }

    /// Generate quotes up to `until`
    fn generate_until(&mut self, until: DateTime<Utc>) {
        let mut time = self.ticks.last().map(|t| t.time).unwrap_or(self.clock);
        loop {
            let gap = self
                .rng
                .gen_range(self.config.min_tick_gap_ms..=self.config.max_tick_gap_ms);
            time += Duration::milliseconds(gap);
            if time > until {
                break;
            }

            self.mid = (self.mid + self.noise.sample(&mut self.rng)).max(self.config.spread);
            let half = self.config.spread / 2.0;
            self.ticks.push(Tick {
                time,
                bid: Self::round(self.mid - half),
                ask: Self::round(self.mid + half),
            });
        }

        let cutoff = until - self.config.retention;
        let keep_from = self.ticks.partition_point(|t| t.time < cutoff);
        if keep_from > 0 {
            self.ticks.drain(..keep_from);
        }
    }
}

impl DataSource for DemoSource {
    fn initialize(&mut self) -> Result<(), SourceError> {
        let until = self.clock + self.config.warmup;
        self.generate_until(until);
        self.clock = until;
        self.connected = true;
        info!(
            "Demo feed ready: {} warmup ticks, mid {:.2}",
            self.ticks.len(),
            self.mid
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        self.connected = false;
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock
    }

    fn get_candles(
        &mut self,
        _symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        if !self.connected {
            return Err(SourceError::Unavailable("demo feed not initialized".to_string()));
        }
        if timeframe != self.timeframe {
            return Err(SourceError::Unavailable(format!(
                "demo feed runs at {}, requested {}",
                self.timeframe, timeframe
            )));
        }

        self.clock += self.config.step;
        let until = self.clock;
        self.generate_until(until);

        let candles = candles_from_ticks(&self.ticks, timeframe);
        if candles.is_empty() {
            return Err(SourceError::Unavailable("no demo candles yet".to_string()));
        }
        let start = candles.len().saturating_sub(count);
        debug!("Demo clock {} | {} candles", self.clock, candles.len() - start);
        Ok(candles[start..].to_vec())
    }

    fn get_ticks(
        &mut self,
        _symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Tick>, SourceError> {
        if !self.connected {
            return Err(SourceError::Unavailable("demo feed not initialized".to_string()));
        }
        let ticks = ticks_in_range(&self.ticks, from, to);
        if ticks.is_empty() {
            return Err(SourceError::Unavailable("no demo ticks in range".to_string()));
        }
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_candles_from_ticks() {
        let tick = |secs: i64, bid: f64| Tick {
            time: start() + Duration::seconds(secs),
            bid,
            ask: bid + 1.0,
        };
        let ticks = vec![tick(1, 10.0), tick(20, 12.0), tick(50, 9.0), tick(61, 11.0)];

        let candles = candles_from_ticks(&ticks, Timeframe::M1);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time, start());
        assert_eq!(
            (candles[0].open, candles[0].high, candles[0].low, candles[0].close),
            (10.0, 12.0, 9.0, 9.0)
        );
        assert_eq!(candles[0].volume, 3);
        assert_eq!(candles[1].open, 11.0);
    }

    #[test]
    fn test_demo_feed_is_deterministic_and_ordered() {
        let pull = || {
            let mut source = DemoSource::new(Timeframe::M1, DemoConfig::default(), start()).unwrap();
            source.initialize().unwrap();
            let candles = source.get_candles("DEMO", Timeframe::M1, 500).unwrap();
            let now = source.now();
            let ticks = source.get_ticks("DEMO", now - Duration::hours(4), now).unwrap();
            (candles, ticks)
        };

        let (candles, ticks) = pull();
        assert!(candles.len() >= 500);
        assert!(candles.windows(2).all(|w| w[0].time < w[1].time));
        assert!(ticks.windows(2).all(|w| w[0].time <= w[1].time));
        assert!(ticks.iter().all(|t| t.ask > t.bid));

        let (again, _) = pull();
        assert_eq!(candles, again);
    }

    #[test]
    fn test_clock_advances_per_pull() {
        let mut source = DemoSource::new(Timeframe::M1, DemoConfig::default(), start()).unwrap();
        assert!(source.get_candles("DEMO", Timeframe::M1, 10).is_err());

        source.initialize().unwrap();
        let before = source.now();
        source.get_candles("DEMO", Timeframe::M1, 10).unwrap();
        assert_eq!(source.now() - before, Duration::seconds(15));
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = DemoConfig {
            tick_volatility: -1.0,
            ..Default::default()
        };
        assert!(DemoSource::new(Timeframe::M1, config, start()).is_err());

        let config = DemoConfig {
            tick_volatility: f64::NAN,
            ..Default::default()
        };
        assert!(DemoSource::new(Timeframe::M1, config, start()).is_err());

        // Zero volatility is a flat feed, still valid
        let config = DemoConfig {
            tick_volatility: 0.0,
            ..Default::default()
        };
        assert!(DemoSource::new(Timeframe::M1, config, start()).is_ok());

        let config = DemoConfig {
            min_tick_gap_ms: 500,
            max_tick_gap_ms: 100,
            ..Default::default()
        };
        assert!(DemoSource::new(Timeframe::M1, config, start()).is_err());
    }
}
