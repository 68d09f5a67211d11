//! Metrics history storage and retrieval.
//!
//! Stores admitted samples in SQLite. Every write goes through the
//! retention policy: the store reads the current extent, asks the policy,
//! and only then inserts. Reads never see a partial insert.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use statrs::statistics::{Data, Distribution, OrderStatistics};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::collector::Sample;
use crate::core::clock::SharedClock;
use crate::core::retention::{RetentionPolicy, MAX_RETENTION};
use crate::error::StoreError;

const SCHEMA_VERSION: i64 = 1;

/// Outcome of [`HistoryStore::record_sample`].
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The sample was persisted with this timestamp.
    Stored(Sample),
    /// The retention policy rejected the sample.
    Skipped,
}

impl Admission {
    pub fn is_stored(&self) -> bool {
        matches!(self, Admission::Stored(_))
    }
}

/// `{oldest, newest, count}` summary of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Extent {
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
    pub count: i64,
}

/// Aggregate figures for one metric over a range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub p95: f64,
    pub std_dev: f64,
}

impl MetricSummary {
    fn from_values(values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut data = Data::new(values);
        let std_dev = data.std_dev().filter(|v| v.is_finite()).unwrap_or(0.0);
        Some(Self {
            mean: data.mean().unwrap_or(0.0),
            min,
            max,
            median: data.median(),
            p95: data.percentile(95),
            std_dev,
        })
    }
}

/// Statistics over a history range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub start: i64,
    pub end: i64,
    pub count: usize,
    pub cpu: Option<MetricSummary>,
    pub ram: Option<MetricSummary>,
    pub disk: Option<MetricSummary>,
    pub network: Option<MetricSummary>,
    pub temperature: Option<MetricSummary>,
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Durable log of admitted samples.
pub struct HistoryStore {
    location: Location,
    policy: RetentionPolicy,
    clock: SharedClock,
    pool: RwLock<Option<SqlitePool>>,
    /// Serializes read-extent → decide → insert.
    write_gate: Mutex<()>,
}

impl HistoryStore {
    /// Store backed by a SQLite file. Nothing is opened until [`init`](Self::init).
    pub fn new(db_path: impl AsRef<Path>, policy: RetentionPolicy, clock: SharedClock) -> Self {
        Self::with_location(Location::File(db_path.as_ref().to_path_buf()), policy, clock)
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory(policy: RetentionPolicy, clock: SharedClock) -> Self {
        Self::with_location(Location::Memory, policy, clock)
    }

    fn with_location(location: Location, policy: RetentionPolicy, clock: SharedClock) -> Self {
        Self {
            location,
            policy,
            clock,
            pool: RwLock::new(None),
            write_gate: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Open storage, run migrations, and sweep expired rows.
    ///
    /// Returns immediately when already open. Concurrent callers wait for the
    /// first one to finish.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<(), StoreError> {
        if !self.open_pool().await? {
            return Ok(());
        }
        info!(location = ?self.location, "History store initialized");

        if let Err(e) = self.expire_older_than_30_days().await {
            warn!("Initial expiry sweep failed: {}", e);
        }
        Ok(())
    }

    /// Open storage and run migrations without the expiry sweep, for callers
    /// that only read.
    pub async fn open(&self) -> Result<(), StoreError> {
        self.open_pool().await.map(|_| ())
    }

    /// Returns `true` when this call opened the pool.
    async fn open_pool(&self) -> Result<bool, StoreError> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(false);
        }
        let pool = self.connect().await?;
        migrate(&pool).await?;
        *guard = Some(pool);
        Ok(true)
    }

    async fn connect(&self) -> Result<SqlitePool, StoreError> {
        match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| StoreError::Open(format!("{}: {}", parent.display(), e)))?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(Duration::from_secs(5));
                SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .map_err(|e| StoreError::Open(e.to_string()))
            }
            Location::Memory => {
                let options = SqliteConnectOptions::from_str("sqlite::memory:")
                    .map_err(|e| StoreError::Open(e.to_string()))?;
                // Each connection would get its own database; keep exactly one alive.
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await
                    .map_err(|e| StoreError::Open(e.to_string()))
            }
        }
    }

    async fn pool(&self) -> Result<SqlitePool, StoreError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or(StoreError::StorageUnavailable)
    }

    pub async fn is_open(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// Persist `raw` at the current time if the retention policy admits it.
    #[instrument(skip(self, raw))]
    pub async fn record_sample(&self, raw: &Sample) -> Result<Admission, StoreError> {
        let pool = self.pool().await?;
        let _gate = self.write_gate.lock().await;

        let now = self.clock.now_millis();
        let (oldest, newest) = bounds(&pool).await?;
        if !self.policy.admits(oldest, newest, now) {
            debug!(now, ?newest, "Sample skipped by retention policy");
            return Ok(Admission::Skipped);
        }

        let sample = Sample {
            timestamp: now,
            ..*raw
        };
        insert(&pool, &sample).await?;
        Ok(Admission::Stored(sample))
    }

    /// All samples with `start <= timestamp <= end`, oldest first.
    #[instrument(skip(self))]
    pub async fn query_range(&self, start: i64, end: i64) -> Result<Vec<Sample>, StoreError> {
        let pool = self.pool().await?;
        if start > end {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT timestamp, cpu, ram, disk, network_throughput, battery_percent, temperature
            FROM samples
            WHERE timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp, id
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&pool)
        .await
        .map_err(|e| StoreError::ReadFailed(e.to_string()))?;

        rows.iter()
            .map(sample_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::ReadFailed(e.to_string()))
    }

    /// Averages per `bucket_millis` bucket. Each bucket is stamped with its
    /// start time. A non-positive bucket returns raw samples.
    #[instrument(skip(self))]
    pub async fn query_buckets(
        &self,
        start: i64,
        end: i64,
        bucket_millis: i64,
    ) -> Result<Vec<Sample>, StoreError> {
        if bucket_millis <= 0 {
            return self.query_range(start, end).await;
        }
        let pool = self.pool().await?;
        if start > end {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT
                bucket AS timestamp,
                AVG(cpu) AS cpu,
                AVG(ram) AS ram,
                AVG(disk) AS disk,
                AVG(network_throughput) AS network_throughput,
                AVG(battery_percent) AS battery_percent,
                AVG(temperature) AS temperature
            FROM (
                SELECT (timestamp / ?) * ? AS bucket, cpu, ram, disk,
                       network_throughput, battery_percent, temperature
                FROM samples
                WHERE timestamp >= ? AND timestamp <= ?
            )
            GROUP BY bucket
            ORDER BY bucket
            "#,
        )
        .bind(bucket_millis)
        .bind(bucket_millis)
        .bind(start)
        .bind(end)
        .fetch_all(&pool)
        .await
        .map_err(|e| StoreError::ReadFailed(e.to_string()))?;

        rows.iter()
            .map(sample_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::ReadFailed(e.to_string()))
    }

    /// Mean/min/max/median/p95/std-dev for each metric over a range.
    pub async fn summarize(&self, start: i64, end: i64) -> Result<HistorySummary, StoreError> {
        let samples = self.query_range(start, end).await?;
        let column = |f: fn(&Sample) -> Option<f64>| -> Option<MetricSummary> {
            MetricSummary::from_values(samples.iter().filter_map(f).collect())
        };

        Ok(HistorySummary {
            start,
            end,
            count: samples.len(),
            cpu: column(|s| Some(s.cpu)),
            ram: column(|s| Some(s.ram)),
            disk: column(|s| Some(s.disk)),
            network: column(|s| Some(s.network_throughput)),
            temperature: column(|s| s.temperature),
        })
    }

    /// Oldest and newest timestamps plus the row count.
    #[instrument(skip(self))]
    pub async fn query_extent(&self) -> Result<Extent, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            "SELECT MIN(timestamp) AS oldest, MAX(timestamp) AS newest, COUNT(*) AS count FROM samples",
        )
        .fetch_one(&pool)
        .await
        .map_err(|e| StoreError::ReadFailed(e.to_string()))?;

        let read = |row: &SqliteRow| -> Result<Extent, sqlx::Error> {
            Ok(Extent {
                oldest: row.try_get("oldest")?,
                newest: row.try_get("newest")?,
                count: row.try_get("count")?,
            })
        };
        read(&row).map_err(|e| StoreError::ReadFailed(e.to_string()))
    }

    /// Delete samples older than thirty days. Returns the number removed.
    #[instrument(skip(self))]
    pub async fn expire_older_than_30_days(&self) -> Result<u64, StoreError> {
        let pool = self.pool().await?;
        let cutoff = self.clock.now_millis() - MAX_RETENTION.as_millis() as i64;

        let result = sqlx::query("DELETE FROM samples WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, cutoff, "Expired old history samples");
        }
        Ok(deleted)
    }

    /// Delete every sample.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<u64, StoreError> {
        let pool = self.pool().await?;
        let _gate = self.write_gate.lock().await;
        let result = sqlx::query("DELETE FROM samples")
            .execute(&pool)
            .await
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        info!(deleted = result.rows_affected(), "History reset");
        Ok(result.rows_affected())
    }

    /// Release the storage handle. Safe to call repeatedly.
    pub async fn close(&self) {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            info!("History store closed");
        }
    }

    #[cfg(test)]
    async fn insert_unchecked(&self, sample: &Sample) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        insert(&pool, sample).await
    }
}

async fn bounds(pool: &SqlitePool) -> Result<(Option<i64>, Option<i64>), StoreError> {
    let row = sqlx::query("SELECT MIN(timestamp) AS oldest, MAX(timestamp) AS newest FROM samples")
        .fetch_one(pool)
        .await
        .map_err(|e| StoreError::ReadFailed(e.to_string()))?;
    let oldest: Option<i64> = row
        .try_get("oldest")
        .map_err(|e| StoreError::ReadFailed(e.to_string()))?;
    let newest: Option<i64> = row
        .try_get("newest")
        .map_err(|e| StoreError::ReadFailed(e.to_string()))?;
    Ok((oldest, newest))
}

async fn insert(pool: &SqlitePool, sample: &Sample) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO samples (timestamp, cpu, ram, disk, network_throughput, battery_percent, temperature)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(sample.timestamp)
    .bind(sample.cpu)
    .bind(sample.ram)
    .bind(sample.disk)
    .bind(sample.network_throughput)
    .bind(sample.battery_percent)
    .bind(sample.temperature)
    .execute(pool)
    .await
    .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
    Ok(())
}

fn sample_from_row(row: &SqliteRow) -> Result<Sample, sqlx::Error> {
    Ok(Sample {
        timestamp: row.try_get("timestamp")?,
        cpu: row.try_get("cpu")?,
        ram: row.try_get("ram")?,
        disk: row.try_get("disk")?,
        network_throughput: row.try_get("network_throughput")?,
        battery_percent: row.try_get("battery_percent")?,
        temperature: row.try_get("temperature")?,
    })
}

#[instrument(skip(pool))]
async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    let fail = |e: sqlx::Error| StoreError::Open(format!("migration failed: {e}"));

    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)")
        .execute(pool)
        .await
        .map_err(fail)?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(fail)?;
    let current = current.unwrap_or(0);

    if current >= SCHEMA_VERSION {
        debug!("History schema is up to date (version {})", current);
        return Ok(());
    }

    info!("Migrating history schema from version {} to {}", current, SCHEMA_VERSION);
    let mut tx = pool.begin().await.map_err(fail)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS samples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            cpu REAL NOT NULL,
            ram REAL NOT NULL,
            disk REAL NOT NULL,
            network_throughput REAL NOT NULL,
            battery_percent REAL,
            temperature REAL,
            inserted_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(fail)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp)")
        .execute(&mut *tx)
        .await
        .map_err(fail)?;

    sqlx::query("INSERT OR REPLACE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(&mut *tx)
        .await
        .map_err(fail)?;

    tx.commit().await.map_err(fail)?;
    Ok(())
}
