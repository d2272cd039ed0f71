//! Reporting of diff events and pass summaries

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::Error;
use crate::entry::{Count, DiffEvent, DiffOp};

/// One-time report after the first completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub count: Count,
    /// Destination version after the pass, 0 for unversioned destinations
    pub version: u64,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Total files: {} ({})",
            self.count.files,
            format_count(&self.count)
        )?;
        if self.version > 0 {
            write!(f, " | Version: {}", self.version)?;
        }
        Ok(())
    }
}

/// Receives the output of a mirror session.
pub trait MirrorObserver: Send + Sync {
    fn on_diff(&self, _event: &DiffEvent) {}

    fn on_summary(&self, _summary: &Summary) {}

    /// A key-scoped failure the pass recovered from.
    fn on_error(&self, _error: &Error) {}
}

/// Observer that forwards everything to `tracing`.
#[derive(Debug, Default)]
pub struct LogObserver;

impl MirrorObserver for LogObserver {
    fn on_diff(&self, event: &DiffEvent) {
        info!(
            op = event.op.as_str(),
            key = %event.key,
            bytes_added = event.bytes_added,
            bytes_removed = event.bytes_removed,
            "Diff"
        );
    }

    fn on_summary(&self, summary: &Summary) {
        info!(
            files = summary.count.files,
            add = summary.count.add,
            remove = summary.count.remove,
            change = summary.count.change,
            version = summary.version,
            "Initial pass complete"
        );
    }

    fn on_error(&self, error: &Error) {
        warn!(error = %error, "Mirror error");
    }
}

#[derive(Debug, Default)]
struct Recorded {
    events: Vec<DiffEvent>,
    summaries: Vec<Summary>,
    errors: Vec<String>,
}

/// Observer that keeps everything in memory, for tests and embedding.
#[derive(Debug)]
pub struct RecordingObserver {
    recorded: Mutex<Recorded>,
    updates: watch::Sender<u64>,
}

impl Default for RecordingObserver {
    fn default() -> Self {
        Self {
            recorded: Mutex::new(Recorded::default()),
            updates: watch::channel(0).0,
        }
    }
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> R {
        let result = f(&mut *self.recorded.lock().unwrap_or_else(|e| e.into_inner()));
        self.updates.send_modify(|n| *n += 1);
        result
    }

    fn read<R>(&self, f: impl FnOnce(&Recorded) -> R) -> R {
        f(&*self.recorded.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn events(&self) -> Vec<DiffEvent> {
        self.read(|r| r.events.clone())
    }

    pub fn summaries(&self) -> Vec<Summary> {
        self.read(|r| r.summaries.clone())
    }

    pub fn errors(&self) -> Vec<String> {
        self.read(|r| r.errors.clone())
    }

    /// Events for `key` with operation `op`.
    pub fn events_for(&self, key: &str, op: DiffOp) -> Vec<DiffEvent> {
        self.read(|r| {
            r.events
                .iter()
                .filter(|e| e.key == key && e.op == op)
                .cloned()
                .collect()
        })
    }

    /// Wait until `condition` holds or `limit` elapses. Returns whether it held.
    pub async fn wait_for(&self, limit: Duration, condition: impl Fn(&RecordingObserver) -> bool) -> bool {
        let mut updates = self.updates.subscribe();
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if condition(self) {
                return true;
            }
            match tokio::time::timeout_at(deadline, updates.changed()).await {
                Ok(Ok(())) => {}
                _ => return condition(self),
            }
        }
    }
}

impl MirrorObserver for RecordingObserver {
    fn on_diff(&self, event: &DiffEvent) {
        self.with(|r| r.events.push(event.clone()));
    }

    fn on_summary(&self, summary: &Summary) {
        self.with(|r| r.summaries.push(*summary));
    }

    fn on_error(&self, error: &Error) {
        self.with(|r| r.errors.push(error.to_string()));
    }
}

/// Human-readable byte size: `24 B`, `1.5 kB`, `3 MB`.
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let sign = if bytes < 0 { "-" } else { "" };
    let mut value = bytes.unsigned_abs() as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        return format!("{sign}{} {}", value as u64, UNITS[0]);
    }
    let rounded = format!("{value:.1}");
    let trimmed = rounded.strip_suffix(".0").unwrap_or(&rounded);
    format!("{sign}{trimmed} {}", UNITS[unit])
}

fn signed(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

/// One line per diff event: `+ /key 12 B`, `~ /key 10 B -2 B`.
pub fn format_diff(event: &DiffEvent) -> String {
    let size = match event.op {
        DiffOp::Remove => event.bytes_removed,
        DiffOp::Add | DiffOp::Change => event.bytes_added,
    };
    let mut line = format!("{} {} {}", event.op.symbol(), event.key, format_bytes(signed(size)));
    if event.op == DiffOp::Change {
        let delta = signed(event.bytes_added) - signed(event.bytes_removed);
        let plus = if delta > 0 { "+" } else { "" };
        line.push_str(&format!(" {plus}{}", format_bytes(delta)));
    }
    line
}

/// `+add -remove ~change`.
pub fn format_count(count: &Count) -> String {
    format!("+{} -{} ~{}", count.add, count.remove, count.change)
}
