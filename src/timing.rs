//! Timing
//!
//! Monotonic stopwatch and the elapsed-time report emitted by timed wrappers.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::io::Write;
use std::time::Instant;

use crate::foresight::types::TaskId;

/// Start instant of an execution span
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Close the span and build a report for `id`
    pub fn report(&self, id: TaskId) -> TimingReport {
        TimingReport {
            id,
            elapsed_ms: self.elapsed_ms(),
            completed_at: Utc::now(),
        }
    }
}

/// Elapsed time of one completed execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingReport {
    pub id: TaskId,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl std::fmt::Display for TimingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] took {}ms.", self.id, self.elapsed_ms)
    }
}

/// Destination for timing reports
pub trait TimingSink: Send + Sync {
    fn record(&self, report: &TimingReport);
}

/// Writes each report as a single line to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl StdoutSink {
    /// Write the single report line to `out`
    pub fn write_line<W: Write>(&self, out: &mut W, report: &TimingReport) -> std::io::Result<()> {
        writeln!(out, "{}", report)?;
        out.flush()
    }
}

impl TimingSink for StdoutSink {
    fn record(&self, report: &TimingReport) {
        debug!("Timing report for {} at {}", report.id, report.completed_at.to_rfc3339());
        if let Err(e) = self.write_line(&mut std::io::stdout().lock(), report) {
            warn!("Failed to write timing report for {}: {}", report.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_report_line_format() {
        let id = TaskId::new();
        let report = TimingReport {
            id,
            elapsed_ms: 12,
            completed_at: Utc::now(),
        };
        assert_eq!(report.to_string(), format!("[{}] took 12ms.", id));
    }

    #[test]
    fn test_stdout_sink_writes_one_line() {
        let id = TaskId::new();
        let report = TimingReport {
            id,
            elapsed_ms: 7,
            completed_at: Utc::now(),
        };

        let mut out = Vec::new();
        StdoutSink.write_line(&mut out, &report).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("[{}] took 7ms.\n", id));
    }

    #[test]
    fn test_stopwatch_measures_elapsed() {
        let watch = Stopwatch::start();
        std::thread::sleep(Duration::from_millis(15));
        let report = watch.report(TaskId::new());
        assert!(report.elapsed_ms >= 15);
    }
}
