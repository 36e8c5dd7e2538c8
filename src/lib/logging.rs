//! Logging helpers: number and time formatting, progress, and the end-of-run summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::dispatcher::RunSummary;

/// Formats an integer with thousands separators, e.g. `1,234,567`.
#[must_use]
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Formats a fraction as a percentage with `decimals` decimal places.
///
/// ```
/// use cellsplit_lib::logging::format_percent;
///
/// assert_eq!(format_percent(0.9543, 2), "95.43%");
/// ```
#[must_use]
pub fn format_percent(value: f64, decimals: usize) -> String {
    format!("{:.decimals$}%", value * 100.0)
}

/// Formats a duration as `45s`, `2m 15s` or `1h 30m`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let (mins, rem) = (secs / 60, secs % 60);
        if rem == 0 { format!("{mins}m") } else { format!("{mins}m {rem}s") }
    } else {
        let (hours, mins) = (secs / 3600, (secs % 3600) / 60);
        if mins == 0 { format!("{hours}h") } else { format!("{hours}h {mins}m") }
    }
}

/// Formats a throughput in records per second.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_rate(count: u64, duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 0.001 {
        return format!("{} records/s", format_count(count));
    }
    format!("{} records/s", format_count((count as f64 / secs) as u64))
}

/// Times an operation and logs its start and completion.
pub struct OperationTimer {
    operation: String,
    start_time: Instant,
}

impl OperationTimer {
    /// Starts timing and logs `"<operation> ..."`.
    #[must_use]
    pub fn new(operation: &str) -> Self {
        info!("{operation} ...");
        Self { operation: operation.to_string(), start_time: Instant::now() }
    }

    /// Time since the timer started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Logs completion with a record count and throughput.
    pub fn log_completion(&self, count: u64) {
        let duration = self.elapsed();
        info!(
            "{} completed: {} records in {} ({})",
            self.operation,
            format_count(count),
            format_duration(duration),
            format_rate(count, duration)
        );
    }
}

/// Shared record counter that logs every `interval` records.
///
/// Workers add their counts in batches; each crossed multiple of the interval is logged once.
pub struct ProgressTracker {
    label: String,
    interval: u64,
    count: AtomicU64,
    start_time: Instant,
}

impl ProgressTracker {
    /// Default number of records between progress lines.
    pub const DEFAULT_INTERVAL: u64 = 1_000_000;

    /// Creates a tracker logging `"<label> <count> ..."` lines.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            interval: Self::DEFAULT_INTERVAL,
            count: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Sets the logging interval (minimum 1).
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Adds `n` records, logging each interval boundary crossed. Returns the number of lines
    /// logged.
    pub fn add(&self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        let before = self.count.fetch_add(n, Ordering::Relaxed);
        let after = before + n;
        let crossed = after / self.interval - before / self.interval;
        for i in 1..=crossed {
            let milestone = (before / self.interval + i) * self.interval;
            info!(
                "{} {} ({})",
                self.label,
                format_count(milestone),
                format_rate(milestone, self.start_time.elapsed())
            );
        }
        crossed
    }

    /// Current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Logs the end-of-run summary at `info`, and failures at `warn`.
#[allow(clippy::cast_precision_loss)]
pub fn log_run_summary(summary: &RunSummary) {
    info!("Split Summary:");
    info!("  Records read: {}", format_count(summary.records_read));
    info!("  Records written: {}", format_count(summary.records_written));
    info!("  Records skipped (undecodable): {}", format_count(summary.records_skipped));
    info!("  Records with missing or malformed barcode tag: {}", format_count(summary.malformed_tags));
    info!("  Records with unknown barcode: {}", format_count(summary.unknown_barcodes));
    if summary.records_read > 0 {
        let assigned = summary
            .records_read
            .saturating_sub(summary.records_skipped + summary.malformed_tags + summary.unknown_barcodes);
        info!(
            "  Assigned to a mapped group: {}",
            format_percent(assigned as f64 / summary.records_read as f64, 2)
        );
    }
    info!("  Output groups: {}", summary.groups.len());
    for report in &summary.groups {
        info!("    {}: {}", report.group, format_count(report.records));
    }
    info!("  Elapsed: {}", format_duration(summary.elapsed));

    if summary.records_dropped > 0 {
        warn!("  Records dropped for failed groups: {}", format_count(summary.records_dropped));
    }
    for report in summary.groups.iter().filter(|r| r.is_failed()) {
        warn!(
            "  Group '{}' failed: {}",
            report.group,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    for failure in &summary.failed_units {
        warn!("  Work unit {} stopped early: {}", failure.index, failure.error);
    }
}
