use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use regime_monitor::signal_core::{MonitorConfig, MonitorLoop};
use regime_monitor::sinks::{JsonLinesSink, LogSink, SignalSink};
use regime_monitor::sources::{DataSource, DemoConfig, DemoSource, ReplaySource};
use regime_monitor::Timeframe;

#[derive(Parser, Debug)]
#[command(name = "regime-monitor")]
#[command(about = "Confidence-gated regime signals from synthetic order flow")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Instrument symbol
    #[arg(short, long, env = "REGIME_SYMBOL", default_value = "BTCUSD", global = true)]
    symbol: String,

    /// Bar width (1m, 5m, 15m, 1h or minutes)
    #[arg(short, long, env = "REGIME_TIMEFRAME", default_value = "1m", global = true)]
    timeframe: Timeframe,

    /// Rolling window for the close z-score
    #[arg(long, env = "REGIME_Z_WINDOW", default_value = "20", global = true)]
    z_window: usize,

    /// EMA span for TRFI
    #[arg(long, env = "REGIME_EMA_SPAN", default_value = "13", global = true)]
    ema_span: usize,

    /// Minimum class probability to act on
    #[arg(long, env = "REGIME_CONFIDENCE", default_value = "0.55", global = true)]
    confidence: f64,

    /// Delay between polls in milliseconds
    #[arg(long, env = "REGIME_POLL_MS", default_value = "10000", global = true)]
    poll_ms: u64,

    /// Candles pulled per cycle
    #[arg(long, env = "REGIME_CANDLES", default_value = "500", global = true)]
    candles: usize,

    /// Tick history pulled per cycle, in minutes
    #[arg(long, env = "REGIME_TICK_LOOKBACK_MINS", default_value = "240", global = true)]
    tick_lookback_mins: i64,

    /// Model artifact (.json or .json.zst)
    #[arg(short, long, env = "REGIME_MODEL", default_value = "regime_model.json", global = true)]
    model: PathBuf,

    /// Exit at startup if the model cannot be loaded
    #[arg(long, env = "REGIME_REQUIRE_MODEL", global = true)]
    require_model: bool,

    /// Write signals to stdout as JSON lines instead of the log
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run against a synthetic random-walk feed
    Demo {
        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Simulated history generated before the first poll, in hours
        #[arg(long, default_value = "9")]
        warmup_hours: i64,

        /// Simulated seconds per poll
        #[arg(long, default_value = "15")]
        step_secs: i64,

        /// Starting mid price
        #[arg(long, default_value = "65000.0")]
        start_price: f64,
    },

    /// Replay recorded candles and ticks, one bar per poll
    Replay {
        /// Candle CSV (time,open,high,low,close[,volume]), optionally .zst
        #[arg(long)]
        candles_file: PathBuf,

        /// Tick CSV (time,bid,ask), optionally .zst
        #[arg(long)]
        ticks_file: PathBuf,

        /// Bars of history before the first poll (defaults to --candles)
        #[arg(long)]
        start: Option<usize>,
    },
}

impl Args {
    fn monitor_config(&self) -> Result<MonitorConfig> {
        let tick_lookback_secs = self
            .tick_lookback_mins
            .checked_mul(60)
            .with_context(|| {
                format!("Tick lookback of {} minutes is out of range", self.tick_lookback_mins)
            })?;

        Ok(MonitorConfig {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            z_window: self.z_window,
            ema_span: self.ema_span,
            confidence_threshold: self.confidence,
            poll_interval_ms: self.poll_ms,
            candle_count: self.candles,
            tick_lookback_secs,
            model_path: self.model.clone(),
            require_model: self.require_model,
        })
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed the monitor keeps
/// running until the source is exhausted or the process is killed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing; stdout is reserved for --json output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("regime_monitor=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = args.monitor_config()?;
    config.validate().context("Invalid configuration")?;

    let source: Box<dyn DataSource> = match &args.command {
        Commands::Demo {
            seed,
            warmup_hours,
            step_secs,
            start_price,
        } => {
            let demo = DemoConfig {
                seed: *seed,
                warmup: Duration::hours(*warmup_hours),
                step: Duration::seconds(*step_secs),
                start_price: *start_price,
                ..Default::default()
            };
            let start = Utc::now() - demo.warmup;
            info!("Starting demo feed (seed {})", seed);
            Box::new(DemoSource::new(config.timeframe, demo, start)?)
        }
        Commands::Replay {
            candles_file,
            ticks_file,
            start,
        } => {
            let replay = ReplaySource::from_files(config.timeframe, candles_file, ticks_file)?
                .starting_at(start.unwrap_or(config.candle_count));
            info!("Replaying {} bars", replay.remaining());
            Box::new(replay)
        }
    };

    let sink: Box<dyn SignalSink> = if args.json {
        Box::new(JsonLinesSink::new(std::io::stdout()))
    } else {
        Box::new(LogSink)
    };

    let mut monitor = MonitorLoop::new(config, source, sink);
    monitor.start()?;

    monitor.run_until(shutdown_signal()).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_maps_to_config() {
        let args = Args::try_parse_from([
            "regime-monitor",
            "--timeframe",
            "5m",
            "--tick-lookback-mins",
            "90",
            "--json",
            "replay",
            "--candles-file",
            "c.csv",
            "--ticks-file",
            "t.csv",
        ])
        .unwrap();

        assert!(args.json);
        let config = args.monitor_config().unwrap();
        assert_eq!(config.timeframe, Timeframe::M5);
        assert_eq!(config.tick_lookback_secs, 90 * 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_tick_lookback_is_rejected() {
        let huge = i64::MAX.to_string();
        let overflow = Args::try_parse_from([
            "regime-monitor",
            "--tick-lookback-mins",
            huge.as_str(),
            "demo",
        ])
        .unwrap();
        assert!(overflow.monitor_config().is_err());

        // Fits in i64 but is past the cap
        let too_long = Args::try_parse_from([
            "regime-monitor",
            "--tick-lookback-mins",
            "100000000",
            "demo",
        ])
        .unwrap();
        let config = too_long.monitor_config().unwrap();
        assert!(config.validate().is_err());
    }
}
