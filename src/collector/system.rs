//! Live system sampling through `sysinfo`.
//!
//! Battery level is not exposed by `sysinfo`, so readings from this source
//! always carry `battery_percent: None`.

use std::time::Instant;
use sysinfo::{Components, DiskKind, Disks, Networks, System};

use crate::collector::types::Reading;
use crate::collector::SampleSource;
use crate::error::CollectorError;

/// Reads CPU, memory, disk, network and temperature from the host.
pub struct SystemSource {
    sys: System,
    disks: Disks,
    networks: Networks,
    components: Components,
    last_refresh: Option<Instant>,
}

/// Physical and unclassified volumes. VMs and containers usually report
/// their root disk as `Unknown`.
fn counts_toward_usage(kind: DiskKind) -> bool {
    matches!(kind, DiskKind::HDD | DiskKind::SSD | DiskKind::Unknown(_))
}

impl SystemSource {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
            last_refresh: None,
        }
    }

    fn disk_percent(&self) -> f64 {
        let (used, total) = self
            .disks
            .list()
            .iter()
            .filter(|d| d.total_space() > 0 && counts_toward_usage(d.kind()))
            .fold((0u64, 0u64), |(used, total), d| {
                (
                    used + d.total_space().saturating_sub(d.available_space()),
                    total + d.total_space(),
                )
            });
        if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        }
    }

    fn network_kbps(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }
        let bytes: u64 = self
            .networks
            .iter()
            .map(|(_, data)| data.received() + data.transmitted())
            .sum();
        bytes as f64 / 1024.0 / elapsed_secs
    }

    fn temperature(&self) -> Option<f64> {
        let temps: Vec<f64> = self
            .components
            .iter()
            .filter_map(|c| c.temperature())
            .map(f64::from)
            .filter(|t| t.is_finite() && *t > 0.0)
            .collect();
        temps.into_iter().reduce(f64::max)
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for SystemSource {
    fn read(&mut self) -> Result<Reading, CollectorError> {
        let now = Instant::now();

        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh(false);
        self.networks.refresh(false);
        self.components.refresh(false);

        let total_memory = self.sys.total_memory();
        if total_memory == 0 {
            return Err(CollectorError::Unavailable(
                "memory totals not reported".to_string(),
            ));
        }

        // The first refresh has no baseline for network deltas.
        let elapsed = self
            .last_refresh
            .map(|prev| now.duration_since(prev).as_secs_f64())
            .unwrap_or(0.0);
        self.last_refresh = Some(now);

        Ok(Reading {
            cpu: f64::from(self.sys.global_cpu_usage()),
            ram: self.sys.used_memory() as f64 / total_memory as f64 * 100.0,
            disk: self.disk_percent(),
            network_throughput: self.network_kbps(elapsed),
            battery_percent: None,
            temperature: self.temperature(),
        }
        .normalized())
    }

    fn name(&self) -> &'static str {
        "system"
    }
}
