//! Delivery log.
//!
//! Counts what the tracker queued, delivered, retried and lost, without
//! keeping any of the event payloads. Totals can be carried across runs
//! through a JSON file holding the last `DeliveryStats` snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Counter {
    Queued,
    Delivered,
    BatchesSent,
    BatchesFailed,
    Retries,
    Dropped,
}

const COUNTERS: usize = 6;

/// Delivery counters for one tracker instance.
#[derive(Debug)]
pub struct DeliveryLog {
    counters: [AtomicU64; COUNTERS],
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl DeliveryLog {
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that resumes from, and saves to, the stats file at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let log = Self {
            persist_path: Some(path),
            ..Self::new()
        };

        match log.persist_path.as_deref().map(read_snapshot) {
            Some(Ok(Some(previous))) => log.restore(&previous),
            Some(Err(e)) => tracing::warn!(error = %e, "Could not load previous delivery stats"),
            _ => {}
        }

        log
    }

    fn add(&self, counter: Counter, n: u64) {
        self.counters[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    fn restore(&self, stats: &DeliveryStats) {
        for (counter, value) in [
            (Counter::Queued, stats.events_queued),
            (Counter::Delivered, stats.events_delivered),
            (Counter::BatchesSent, stats.batches_sent),
            (Counter::BatchesFailed, stats.batches_failed),
            (Counter::Retries, stats.retries_scheduled),
            (Counter::Dropped, stats.events_dropped),
        ] {
            self.add(counter, value);
        }
    }

    pub fn record_queued(&self) {
        self.add(Counter::Queued, 1);
    }

    /// Record a successful batch of `count` records.
    pub fn record_batch_sent(&self, count: u64) {
        self.add(Counter::BatchesSent, 1);
        self.add(Counter::Delivered, count);
    }

    pub fn record_batch_failed(&self) {
        self.add(Counter::BatchesFailed, 1);
    }

    pub fn record_retry_scheduled(&self) {
        self.add(Counter::Retries, 1);
    }

    pub fn record_dropped(&self, count: u64) {
        self.add(Counter::Dropped, count);
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            events_queued: self.get(Counter::Queued),
            events_delivered: self.get(Counter::Delivered),
            batches_sent: self.get(Counter::BatchesSent),
            batches_failed: self.get(Counter::BatchesFailed),
            retries_scheduled: self.get(Counter::Retries),
            events_dropped: self.get(Counter::Dropped),
            session_start: self.started_at,
            session_duration_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Write the current snapshot to the stats file, if one is configured.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = self.persist_path.as_deref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.stats()).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl Default for DeliveryLog {
    fn default() -> Self {
        Self::new()
    }
}

fn read_snapshot(path: &Path) -> Result<Option<DeliveryStats>, std::io::Error> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(std::io::Error::other)
}

/// Snapshot of delivery statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub events_queued: u64,
    pub events_delivered: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub retries_scheduled: u64,
    pub events_dropped: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl fmt::Display for DeliveryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Delivery Statistics:")?;
        writeln!(f, "  Events queued:      {}", self.events_queued)?;
        writeln!(f, "  Events delivered:   {}", self.events_delivered)?;
        writeln!(
            f,
            "  Batches sent/failed: {}/{}",
            self.batches_sent, self.batches_failed
        )?;
        writeln!(f, "  Retries scheduled:  {}", self.retries_scheduled)?;
        writeln!(f, "  Events dropped:     {}", self.events_dropped)?;
        write!(f, "  Session duration:   {}s", self.session_duration_secs)
    }
}

/// Thread-safe shared delivery log.
pub type SharedDeliveryLog = Arc<DeliveryLog>;

pub fn create_shared_log() -> SharedDeliveryLog {
    Arc::new(DeliveryLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedDeliveryLog {
    Arc::new(DeliveryLog::with_persistence(path))
}
