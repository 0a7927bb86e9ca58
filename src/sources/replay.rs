//! Replay of recorded candles and ticks
//!
//! Each candle pull advances one bar; the newest bar served is treated as
//! the one still forming. Files are CSV, optionally zstd-compressed, with
//! `time` as Unix seconds or RFC 3339.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

use super::{ticks_in_range, DataSource, SourceError};
use crate::types::{Candle, Tick, Timeframe};

#[derive(Debug, Deserialize)]
struct CandleRow {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default, alias = "tick_volume")]
    volume: u64,
}

#[derive(Debug, Deserialize)]
struct TickRow {
    time: String,
    bid: f64,
    ask: f64,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0)
            .with_context(|| format!("Timestamp out of range: {}", raw));
    }
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Failed to parse timestamp: {}", raw))?
        .with_timezone(&Utc))
}

fn open_reader(path: &Path) -> Result<csv::Reader<Box<dyn Read>>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;

    let reader: Box<dyn Read> = if path.extension().map_or(false, |ext| ext == "zst") {
        let decoder = zstd::stream::Decoder::new(file)
            .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
        Box::new(BufReader::new(decoder))
    } else {
        Box::new(BufReader::new(file))
    };

    Ok(csv::Reader::from_reader(reader))
}

/// Load candles from `time,open,high,low,close[,volume]` CSV
pub fn load_candles_csv(path: &Path) -> Result<Vec<Candle>> {
    let mut reader = open_reader(path)?;
    let mut candles = Vec::new();

    for result in reader.deserialize() {
        let row: CandleRow = result.with_context(|| "Failed to parse candle row")?;
        candles.push(Candle {
            time: parse_time(&row.time)?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }

    candles.sort_by_key(|c| c.time);
    Ok(candles)
}

/// Load quotes from `time,bid,ask` CSV
pub fn load_ticks_csv(path: &Path) -> Result<Vec<Tick>> {
    let mut reader = open_reader(path)?;
    let mut ticks = Vec::new();

    for result in reader.deserialize() {
        let row: TickRow = result.with_context(|| "Failed to parse tick row")?;
        ticks.push(Tick {
            time: parse_time(&row.time)?,
            bid: row.bid,
            ask: row.ask,
        });
    }

    // Stable: quotes sharing a timestamp keep file order
    ticks.sort_by_key(|t| t.time);
    Ok(ticks)
}

/// Recorded feed served one bar per candle pull
#[derive(Debug)]
pub struct ReplaySource {
    timeframe: Timeframe,
    candles: Vec<Candle>,
    ticks: Vec<Tick>,
    /// Index of the next bar to expose as forming
    cursor: usize,
    connected: bool,
}

impl ReplaySource {
    pub fn new(timeframe: Timeframe, mut candles: Vec<Candle>, mut ticks: Vec<Tick>) -> Self {
        candles.sort_by_key(|c| c.time);
        ticks.sort_by_key(|t| t.time);
        Self {
            timeframe,
            candles,
            ticks,
            cursor: 0,
            connected: false,
        }
    }

    pub fn from_files(timeframe: Timeframe, candles_path: &Path, ticks_path: &Path) -> Result<Self> {
        let candles = load_candles_csv(candles_path)?;
        let ticks = load_ticks_csv(ticks_path)?;
        info!(
            "Loaded {} candles from {:?} and {} ticks from {:?}",
            candles.len(),
            candles_path,
            ticks.len(),
            ticks_path
        );
        Ok(Self::new(timeframe, candles, ticks))
    }

    /// Skip ahead so the first pull already has `index` bars of history
    pub fn starting_at(mut self, index: usize) -> Self {
        self.cursor = index.min(self.candles.len());
        self
    }

    pub fn remaining(&self) -> usize {
        self.candles.len() - self.cursor
    }
}

impl DataSource for ReplaySource {
    fn initialize(&mut self) -> Result<(), SourceError> {
        if self.candles.is_empty() {
            return Err(SourceError::Connection("replay has no candles".to_string()));
        }
        self.connected = true;
        info!(
            "Replay ready: {} bars from {} to {}",
            self.remaining(),
            self.candles[self.cursor.min(self.candles.len() - 1)].time,
            self.candles[self.candles.len() - 1].time
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        self.connected = false;
    }

    fn now(&self) -> DateTime<Utc> {
        let forming = self.cursor.saturating_sub(1).min(self.candles.len().saturating_sub(1));
        self.candles
            .get(forming)
            .map(|c| c.time + self.timeframe.duration())
            .unwrap_or_else(Utc::now)
    }

    fn get_candles(
        &mut self,
        _symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        if !self.connected {
            return Err(SourceError::Unavailable("replay not initialized".to_string()));
        }
        if timeframe != self.timeframe {
            return Err(SourceError::Unavailable(format!(
                "replay recorded at {}, requested {}",
                self.timeframe, timeframe
            )));
        }
        if self.cursor >= self.candles.len() {
            return Err(SourceError::Exhausted);
        }

        let end = self.cursor + 1;
        let start = end.saturating_sub(count);
        self.cursor += 1;
        Ok(self.candles[start..end].to_vec())
    }

    fn get_ticks(
        &mut self,
        _symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Tick>, SourceError> {
        if !self.connected {
            return Err(SourceError::Unavailable("replay not initialized".to_string()));
        }
        let ticks = ticks_in_range(&self.ticks, from, to);
        if ticks.is_empty() {
            return Err(SourceError::Unavailable(format!("no ticks between {} and {}", from, to)));
        }
        Ok(ticks)
    }
}
