//! Signal presentation
//!
//! The monitor hands every finished `SignalEvent` to a `SignalSink`. Rendering
//! lives here so the core never formats anything for humans.

use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};

use crate::types::SignalEvent;

pub trait SignalSink {
    fn emit(&mut self, event: &SignalEvent);
}

impl<S: SignalSink + ?Sized> SignalSink for Box<S> {
    fn emit(&mut self, event: &SignalEvent) {
        (**self).emit(event)
    }
}

/// Collects events in memory
impl SignalSink for Vec<SignalEvent> {
    fn emit(&mut self, event: &SignalEvent) {
        self.push(event.clone());
    }
}

/// Writes events through `tracing`; actionable signals get an alert banner
#[derive(Debug, Default)]
pub struct LogSink;

impl SignalSink for LogSink {
    fn emit(&mut self, event: &SignalEvent) {
        info!(
            "{} | bar {} | price {:.2} | z {:+.2} | {}",
            event.symbol,
            event.time.format("%Y-%m-%d %H:%M"),
            event.price,
            event.z_score,
            event.label
        );

        if event.signal != 0 {
            let side = if event.signal > 0 { "BUY" } else { "SELL" };
            info!("========================================");
            info!(
                "ALERT: {} {} @ {:.2} ({:.0}% confidence)",
                side,
                event.symbol,
                event.price,
                event.confidence * 100.0
            );
            info!("========================================");
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OutputMessage<'a> {
    Signal(&'a SignalEvent),
    Alert {
        symbol: &'a str,
        side: &'static str,
        price: f64,
        confidence: f64,
    },
}

/// Newline-delimited JSON, one `Signal` message per event plus an `Alert`
/// message for non-zero signals
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_message(&mut self, message: &OutputMessage<'_>) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write> SignalSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &SignalEvent) {
        let mut messages = vec![OutputMessage::Signal(event)];
        if event.signal != 0 {
            messages.push(OutputMessage::Alert {
                symbol: &event.symbol,
                side: if event.signal > 0 { "BUY" } else { "SELL" },
                price: event.price,
                confidence: event.confidence,
            });
        }

        for message in &messages {
            if let Err(e) = self.write_message(message) {
                warn!("Failed to write signal for bar {}: {}", event.time, e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(signal: i8, label: &str) -> SignalEvent {
        SignalEvent {
            symbol: "BTCUSD".to_string(),
            time: Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap(),
            price: 65_012.5,
            z_score: 2.1,
            label: label.to_string(),
            signal,
            confidence: 0.7,
        }
    }

    #[test]
    fn test_json_lines_tags_messages() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(&event(0, "UNCERTAIN"));
        sink.emit(&event(1, "BUY (70%)"));

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "Signal");
        assert_eq!(lines[0]["label"], "UNCERTAIN");
        assert_eq!(lines[1]["type"], "Signal");
        assert_eq!(lines[1]["signal"], 1);
        assert_eq!(lines[2]["type"], "Alert");
        assert_eq!(lines[2]["side"], "BUY");
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_does_not_panic() {
        let mut sink = JsonLinesSink::new(BrokenPipe);
        sink.emit(&event(-1, "SELL (80%)"));
    }

    #[test]
    fn test_boxed_sinks_forward() {
        let mut sink: Box<dyn SignalSink> = Box::new(LogSink);
        sink.emit(&event(-1, "SELL (80%)"));

        let mut recorded: Box<Vec<SignalEvent>> = Box::default();
        SignalSink::emit(&mut recorded, &event(0, "NEUTRAL (60%)"));
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].label, "NEUTRAL (60%)");
    }
}
