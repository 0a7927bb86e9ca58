use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column order the classifier was trained on. Changing it invalidates every model artifact.
pub const FEATURE_COLUMNS: [&str; 5] = ["z_score", "trfi", "cvd_slope", "momentum_3", "volatility"];

/// Bid/ask quote update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
}

/// OHLC bar, stamped with its open time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Synthetic order flow for one bar-width bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPoint {
    pub bucket_time: DateTime<Utc>,
    pub synthetic_delta: i64,
    pub cvd: i64,
}

/// Model-ready features for one candle with complete trailing history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub time: DateTime<Utc>,
    pub close: f64,
    pub z_score: f64,
    pub trfi: f64,
    pub cvd_slope: f64,
    pub momentum_3: f64,
    pub volatility: f64,
}

impl FeatureRow {
    /// Assemble the model input in `FEATURE_COLUMNS` order
    pub fn to_vector(&self) -> FeatureVector {
        FeatureVector([
            self.z_score,
            self.trfi,
            self.cvd_slope,
            self.momentum_3,
            self.volatility,
        ])
    }
}

/// Single-row model input. Only constructible in the trained column order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; 5]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Named view, mostly for logging
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_COLUMNS.iter().copied().zip(self.0.iter().copied())
    }
}

/// Gated classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub label: String,
    /// -1 sell, 0 stand aside, 1 buy
    pub signal: i8,
    pub confidence: f64,
}

/// What the presentation side receives once per newly closed bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub symbol: String,
    /// Open time of the closed bar that was classified
    pub time: DateTime<Utc>,
    /// Latest price from the bar still forming
    pub price: f64,
    pub z_score: f64,
    pub label: String,
    pub signal: i8,
    pub confidence: f64,
}

/// Bar width shared by candles and flow buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::M1
    }
}

impl Timeframe {
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            1 => Some(Self::M1),
            5 => Some(Self::M5),
            15 => Some(Self::M15),
            60 => Some(Self::H1),
            _ => None,
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::H1 => 60,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    /// Start of the bucket containing `time` (epoch-aligned)
    pub fn bucket_start(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        time.duration_trunc(self.duration()).unwrap_or(time)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::M1 => write!(f, "1m"),
            Self::M5 => write!(f, "5m"),
            Self::M15 => write!(f, "15m"),
            Self::H1 => write!(f, "1h"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "m1" => Ok(Self::M1),
            "5m" | "m5" => Ok(Self::M5),
            "15m" | "m15" => Ok(Self::M15),
            "1h" | "h1" | "60m" => Ok(Self::H1),
            other => other
                .parse::<u32>()
                .ok()
                .and_then(Self::from_minutes)
                .ok_or_else(|| format!("unsupported timeframe '{}' (use 1m, 5m, 15m or 1h)", s)),
        }
    }
}
