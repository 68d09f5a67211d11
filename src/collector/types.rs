//! Resource snapshot types.
//!
//! A [`Reading`] is what a source measures. A [`Sample`] is a reading stamped
//! with the tick time, which is what gets stored and broadcast.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One normalized measurement produced by a sample source.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// CPU usage percentage (0-100)
    pub cpu: f64,
    /// Memory usage percentage (0-100)
    pub ram: f64,
    /// Disk usage percentage (0-100)
    pub disk: f64,
    /// Combined rx+tx throughput in KB/s
    pub network_throughput: f64,
    /// Battery charge, absent on machines without a battery
    pub battery_percent: Option<f64>,
    /// Temperature in °C, absent when no sensor is exposed
    pub temperature: Option<f64>,
}

impl Reading {
    /// Clamp every field into its documented range.
    pub fn normalized(self) -> Self {
        Self {
            cpu: clamp_percent(self.cpu),
            ram: clamp_percent(self.ram),
            disk: clamp_percent(self.disk),
            network_throughput: if self.network_throughput.is_finite() {
                self.network_throughput.max(0.0)
            } else {
                0.0
            },
            battery_percent: self.battery_percent.map(clamp_percent),
            temperature: self.temperature.filter(|t| t.is_finite()),
        }
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// One timestamped resource snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
    pub network_throughput: f64,
    pub battery_percent: Option<f64>,
    pub temperature: Option<f64>,
}

impl Sample {
    /// Stamp a reading with a tick time.
    pub fn new(timestamp: i64, reading: Reading) -> Self {
        let r = reading.normalized();
        Self {
            timestamp,
            cpu: r.cpu,
            ram: r.ram,
            disk: r.disk,
            network_throughput: r.network_throughput,
            battery_percent: r.battery_percent,
            temperature: r.temperature,
        }
    }

    /// Timestamp as a UTC datetime.
    pub fn time(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_default()
    }
}

/// Shape served by `GET /api/history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: i64,
    /// ISO-8601 rendering of `timestamp`
    pub time: String,
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
    pub network: f64,
    pub battery: Option<f64>,
    pub temperature: Option<f64>,
}

impl From<&Sample> for HistoryRecord {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp: sample.timestamp,
            time: sample.time().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            cpu: sample.cpu,
            ram: sample.ram,
            disk: sample.disk,
            network: sample.network_throughput,
            battery: sample.battery_percent,
            temperature: sample.temperature,
        }
    }
}
