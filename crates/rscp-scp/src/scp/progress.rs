// ── Progress observers ───────────────────────────────────────────────────────

use log::info;
use std::time::Duration;

/// Per-file progress callbacks invoked by both engines from the protocol
/// task. Implementations must be cheap; they run between payload chunks.
pub trait ProgressObserver: Send + Sync {
    fn file_started(&self, _name: &str, _size: u64) {}
    fn file_progress(&self, _name: &str, _transferred: u64, _size: u64) {}
    fn file_finished(&self, _name: &str, _size: u64, _elapsed: Duration) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Logs one line per completed file with size, time and rate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress {
    quiet: bool,
}

impl LogProgress {
    pub fn new(quiet: bool) -> Self {
        LogProgress { quiet }
    }
}

impl ProgressObserver for LogProgress {
    fn file_finished(&self, name: &str, size: u64, elapsed: Duration) {
        if self.quiet {
            return;
        }
        info!(
            "{} {} {:.1}s {}/s",
            name,
            format_bytes(size),
            elapsed.as_secs_f64(),
            format_bytes(rate(size, elapsed))
        );
    }
}

fn rate(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return bytes;
    }
    (bytes as f64 / secs) as u64
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
