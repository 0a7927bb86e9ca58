//! Market data sources
//!
//! The monitor only talks to the `DataSource` trait. Two feeds ship with the
//! crate: recorded CSV replay and a synthetic random-walk demo.

mod demo;
mod replay;

pub use demo::{candles_from_ticks, DemoConfig, DemoSource};
pub use replay::{load_candles_csv, load_ticks_csv, ReplaySource};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Candle, Tick, Timeframe};

#[derive(Error, Debug)]
pub enum SourceError {
    /// Nothing usable for this pull; the cycle is skipped
    #[error("data unavailable: {0}")]
    Unavailable(String),

    /// Could not reach the data source
    #[error("connection failed: {0}")]
    Connection(String),

    /// A finite feed has no more bars
    #[error("data source exhausted")]
    Exhausted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Broker-style market data access. Calls block until data is returned.
pub trait DataSource {
    fn initialize(&mut self) -> Result<(), SourceError>;

    fn shutdown(&mut self);

    /// Source clock as of the most recent candle pull
    fn now(&self) -> DateTime<Utc>;

    /// Latest `count` candles, ascending. The last one is still forming.
    fn get_candles(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, SourceError>;

    /// Ticks with `from <= time < to`, ascending
    fn get_ticks(
        &mut self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Tick>, SourceError>;
}

impl<D: DataSource + ?Sized> DataSource for Box<D> {
    fn initialize(&mut self) -> Result<(), SourceError> {
        (**self).initialize()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }

    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn get_candles(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        (**self).get_candles(symbol, timeframe, count)
    }

    fn get_ticks(
        &mut self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Tick>, SourceError> {
        (**self).get_ticks(symbol, from, to)
    }
}

/// Ticks in `[from, to)` from an ascending slice
pub(crate) fn ticks_in_range(ticks: &[Tick], from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Tick> {
    let start = ticks.partition_point(|t| t.time < from);
    let end = ticks.partition_point(|t| t.time < to);
    if start >= end {
        return Vec::new();
    }
    ticks[start..end].to_vec()
}
