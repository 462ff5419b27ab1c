//! Download throughput accounting.

use std::fmt;
use std::time::{Duration, Instant};

/// Cumulative and windowed transfer statistics for one remote segment.
#[derive(Debug, Clone)]
pub struct TransferStats {
    started: Instant,
    total: Option<u64>,
    received: u64,
    interval: Duration,
    window_start: Instant,
    window_bytes: u64,
}

/// Snapshot produced every reporting interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub received: u64,
    pub total: Option<u64>,
    /// Bytes per second over the last interval.
    pub instant_speed: f64,
    /// Bytes per second since the transfer started.
    pub average_speed: f64,
}

impl TransferStats {
    pub fn new(total: Option<u64>, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            total,
            received: 0,
            interval,
            window_start: now,
            window_bytes: 0,
        }
    }

    pub fn record(&mut self, bytes: usize) {
        self.received += bytes as u64;
        self.window_bytes += bytes as u64;
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn average_speed(&self) -> f64 {
        speed(self.received, self.elapsed())
    }

    /// Current snapshot without resetting the window.
    pub fn snapshot(&self) -> ProgressReport {
        ProgressReport {
            received: self.received,
            total: self.total,
            instant_speed: speed(self.window_bytes, self.window_start.elapsed()),
            average_speed: self.average_speed(),
        }
    }

    /// A report when the interval has elapsed since the last one.
    pub fn take_report(&mut self) -> Option<ProgressReport> {
        if self.window_start.elapsed() < self.interval {
            return None;
        }
        let report = self.snapshot();
        self.window_start = Instant::now();
        self.window_bytes = 0;
        Some(report)
    }
}

fn speed(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) if total > 0 => write!(
                f,
                "{} / {} ({:.1}%)",
                human_bytes(self.received as f64),
                human_bytes(total as f64),
                self.received as f64 * 100.0 / total as f64
            )?,
            _ => write!(f, "{}", human_bytes(self.received as f64))?,
        }
        write!(
            f,
            ", {}/s, avg {}/s",
            human_bytes(self.instant_speed),
            human_bytes(self.average_speed)
        )
    }
}

/// `1536.0` -> `"1.5 KiB"`.
pub fn human_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
