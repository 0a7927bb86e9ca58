//! Polling loop
//!
//! One cycle: pull candles and ticks, rebuild flow and features from scratch,
//! classify the last closed bar if it is new, hand the event to the sink.
//! Cycles never overlap; the stop signal is only observed while sleeping.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use tracing::{debug, info, warn};

use super::classifier::{ModelHandle, RegimeClassifier};
use super::config::MonitorConfig;
use super::features::FeatureBuilder;
use super::flow::FlowAggregator;
use crate::sinks::SignalSink;
use crate::sources::{DataSource, SourceError};
use crate::types::SignalEvent;

/// Why a cycle produced nothing
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// A data pull failed or came back empty
    DataUnavailable(String),
    /// Not enough feature rows for a closed bar plus a forming one
    InsufficientHistory { rows: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataUnavailable(reason) => write!(f, "data unavailable: {}", reason),
            Self::InsufficientHistory { rows } => {
                write!(f, "insufficient history ({} feature rows)", rows)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Emitted(SignalEvent),
    /// The closed bar was already acted on
    AlreadySignaled(DateTime<Utc>),
    Skipped(SkipReason),
    /// The source has no more data; the loop stops
    Exhausted,
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    pub emitted: usize,
    pub skipped: usize,
}

pub struct MonitorLoop<D: DataSource, S: SignalSink> {
    config: MonitorConfig,
    source: D,
    sink: S,
    aggregator: FlowAggregator,
    builder: FeatureBuilder,
    classifier: RegimeClassifier,
    last_signaled_time: Option<DateTime<Utc>>,
}

impl<D: DataSource, S: SignalSink> MonitorLoop<D, S> {
    /// Monitor whose model is loaded lazily from `config.model_path`
    pub fn new(config: MonitorConfig, source: D, sink: S) -> Self {
        let classifier = RegimeClassifier::new(
            ModelHandle::new(config.model_path.clone()),
            config.confidence_threshold,
        );
        Self::with_classifier(config, source, sink, classifier)
    }

    pub fn with_classifier(
        config: MonitorConfig,
        source: D,
        sink: S,
        classifier: RegimeClassifier,
    ) -> Self {
        Self {
            aggregator: FlowAggregator::new(config.timeframe),
            builder: config.feature_builder(),
            config,
            source,
            sink,
            classifier,
            last_signaled_time: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn last_signaled_time(&self) -> Option<DateTime<Utc>> {
        self.last_signaled_time
    }

    /// Connect the source. Failure here is fatal; so is a missing model when
    /// `require_model` is set.
    pub fn start(&mut self) -> Result<()> {
        self.source
            .initialize()
            .context("Failed to initialize data source")?;

        if self.config.require_model && !self.classifier.ensure_loaded() {
            self.source.shutdown();
            bail!(
                "No usable model at {:?} and --require-model is set",
                self.config.model_path
            );
        }

        info!(
            "Monitoring {} on {} | z window {} | EMA span {} | gate {:.2} | poll {:?}",
            self.config.symbol,
            self.config.timeframe,
            self.builder.z_window(),
            self.builder.ema_span(),
            self.classifier.confidence_threshold(),
            self.config.poll_interval()
        );
        Ok(())
    }

    fn skip(&self, reason: SkipReason) -> CycleOutcome {
        match &reason {
            SkipReason::DataUnavailable(_) => warn!("Skipping cycle: {}", reason),
            SkipReason::InsufficientHistory { .. } => debug!("Skipping cycle: {}", reason),
        }
        CycleOutcome::Skipped(reason)
    }

    /// One poll. Never fails; every fault ends up in the returned outcome.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let symbol = self.config.symbol.clone();

        let candles = match self.source.get_candles(
            &symbol,
            self.config.timeframe,
            self.config.candle_count,
        ) {
            Ok(candles) if candles.is_empty() => {
                return self.skip(SkipReason::DataUnavailable("no candles".to_string()))
            }
            Ok(candles) => candles,
            Err(SourceError::Exhausted) => return CycleOutcome::Exhausted,
            Err(e) => return self.skip(SkipReason::DataUnavailable(e.to_string())),
        };

        let now = self.source.now();
        let ticks = match self
            .source
            .get_ticks(&symbol, now - self.config.tick_lookback(), now)
        {
            Ok(ticks) if ticks.is_empty() => {
                return self.skip(SkipReason::DataUnavailable("no ticks".to_string()))
            }
            Ok(ticks) => ticks,
            Err(SourceError::Exhausted) => return CycleOutcome::Exhausted,
            Err(e) => return self.skip(SkipReason::DataUnavailable(e.to_string())),
        };

        let flow = self.aggregator.aggregate(&ticks);
        let rows = self.builder.build(&candles, &flow);
        if rows.len() < 2 {
            return self.skip(SkipReason::InsufficientHistory { rows: rows.len() });
        }

        // The newest row belongs to the bar still forming
        let closed = &rows[rows.len() - 2];
        let current = &rows[rows.len() - 1];

        if self.last_signaled_time == Some(closed.time) {
            debug!("Bar {} already signaled", closed.time);
            return CycleOutcome::AlreadySignaled(closed.time);
        }
        self.last_signaled_time = Some(closed.time);

        let signal = self.classifier.predict(closed).to_signal();
        let event = SignalEvent {
            symbol,
            time: closed.time,
            price: current.close,
            z_score: closed.z_score,
            label: signal.label,
            signal: signal.signal,
            confidence: signal.confidence,
        };

        self.sink.emit(&event);
        CycleOutcome::Emitted(event)
    }

    /// Cycle until `shutdown` resolves or the source runs dry, then close the
    /// source.
    pub async fn run_until<F>(&mut self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut summary = RunSummary::default();

        loop {
            summary.cycles += 1;
            match self.run_cycle() {
                CycleOutcome::Emitted(_) => summary.emitted += 1,
                CycleOutcome::Skipped(_) => summary.skipped += 1,
                CycleOutcome::AlreadySignaled(_) => {}
                CycleOutcome::Exhausted => {
                    info!("Data source exhausted");
                    break;
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        self.source.shutdown();
        info!(
            "Monitor stopped after {} cycles: {} signals, {} skipped",
            summary.cycles, summary.emitted, summary.skipped
        );
        summary
    }
}
