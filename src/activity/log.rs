//! Running counters for sampling and gateway activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Counters for the current run, optionally persisted across runs.
#[derive(Debug)]
pub struct ActivityLog {
    /// Stats ticks executed
    ticks: AtomicU64,
    /// Samples admitted by the retention policy
    samples_stored: AtomicU64,
    /// Samples the retention policy rejected
    samples_skipped: AtomicU64,
    /// Reads or writes that failed
    failures: AtomicU64,
    /// Publish calls that reached at least one subscriber
    broadcasts: AtomicU64,
    /// Rows removed by expiry sweeps
    samples_expired: AtomicU64,
    /// Gateway requests or sockets refused for a bad token
    rejected_connections: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            samples_stored: AtomicU64::new(0),
            samples_skipped: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            samples_expired: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that loads and saves totals at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            debug!("Could not load previous activity totals: {}", e);
        }

        log
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.samples_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.samples_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: u64) {
        self.samples_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rejected_connection(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ActivityStats {
        ActivityStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            samples_stored: self.samples_stored.load(Ordering::Relaxed),
            samples_skipped: self.samples_skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            samples_expired: self.samples_expired.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary for the CLI.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Activity:\n\
             - Stats ticks: {}\n\
             - Samples stored: {}\n\
             - Samples skipped by retention: {}\n\
             - Samples expired: {}\n\
             - Failures: {}\n\
             - Broadcasts: {}\n\
             - Rejected connections: {}\n\
             - Session duration: {} seconds",
            stats.ticks,
            stats.samples_stored,
            stats.samples_skipped,
            stats.samples_expired,
            stats.failures,
            stats.broadcasts,
            stats.rejected_connections,
            stats.session_duration_secs
        )
    }

    /// Save totals to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                ticks: stats.ticks,
                samples_stored: stats.samples_stored,
                samples_skipped: stats.samples_skipped,
                failures: stats.failures,
                broadcasts: stats.broadcasts,
                samples_expired: stats.samples_expired,
                rejected_connections: stats.rejected_connections,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.ticks.store(persisted.ticks, Ordering::Relaxed);
                self.samples_stored
                    .store(persisted.samples_stored, Ordering::Relaxed);
                self.samples_skipped
                    .store(persisted.samples_skipped, Ordering::Relaxed);
                self.failures.store(persisted.failures, Ordering::Relaxed);
                self.broadcasts.store(persisted.broadcasts, Ordering::Relaxed);
                self.samples_expired
                    .store(persisted.samples_expired, Ordering::Relaxed);
                self.rejected_connections
                    .store(persisted.rejected_connections, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    pub fn reset(&self) {
        for counter in [
            &self.ticks,
            &self.samples_stored,
            &self.samples_skipped,
            &self.failures,
            &self.broadcasts,
            &self.samples_expired,
            &self.rejected_connections,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of activity counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub ticks: u64,
    pub samples_stored: u64,
    pub samples_skipped: u64,
    pub failures: u64,
    pub broadcasts: u64,
    pub samples_expired: u64,
    pub rejected_connections: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    ticks: u64,
    samples_stored: u64,
    samples_skipped: u64,
    failures: u64,
    broadcasts: u64,
    #[serde(default)]
    samples_expired: u64,
    #[serde(default)]
    rejected_connections: u64,
    last_updated: DateTime<Utc>,
}

pub type SharedActivityLog = Arc<ActivityLog>;
