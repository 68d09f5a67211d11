//! Periodic sampling loop.
//!
//! The stats tick reads the source, offers the sample to the history store,
//! and publishes it regardless of whether it was stored. The tray tick runs
//! on its own timer and only refreshes the tray label. An hourly sweep
//! expires old history.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::activity::SharedActivityLog;
use crate::collector::{Sample, SharedSource};
use crate::core::broadcaster::{PublishReport, SharedBroadcaster};
use crate::core::clock::SharedClock;
use crate::core::history::{Admission, HistoryStore};
use crate::error::CollectorError;

/// Timer periods for the sampling loop.
#[derive(Debug, Clone, Copy)]
pub struct SamplerIntervals {
    pub stats: Duration,
    pub tray: Duration,
    pub expiry: Duration,
}

impl Default for SamplerIntervals {
    fn default() -> Self {
        Self {
            stats: Duration::from_secs(1),
            tray: Duration::from_secs(2),
            expiry: Duration::from_secs(3600),
        }
    }
}

/// What one stats tick did.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// The snapshot that was published
    pub sample: Sample,
    /// `None` when the store call failed
    pub admission: Option<Admission>,
    pub report: PublishReport,
}

/// Compact summary for the tray icon.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrayStatus {
    pub cpu: f64,
    pub ram: f64,
    pub temperature: Option<f64>,
    pub label: String,
}

impl TrayStatus {
    fn from_sample(sample: &Sample) -> Self {
        let mut label = format!("CPU {:.0}%  RAM {:.0}%", sample.cpu, sample.ram);
        if let Some(t) = sample.temperature {
            label.push_str(&format!("  {t:.0}°C"));
        }
        Self {
            cpu: sample.cpu,
            ram: sample.ram,
            temperature: sample.temperature,
            label,
        }
    }
}

/// Drives the source, the store and the broadcaster.
pub struct Sampler {
    source: SharedSource,
    store: Arc<HistoryStore>,
    broadcaster: SharedBroadcaster,
    activity: SharedActivityLog,
    clock: SharedClock,
}

impl Sampler {
    pub fn new(
        source: SharedSource,
        store: Arc<HistoryStore>,
        broadcaster: SharedBroadcaster,
        activity: SharedActivityLog,
        clock: SharedClock,
    ) -> Self {
        Self {
            source,
            store,
            broadcaster,
            activity,
            clock,
        }
    }

    async fn read(&self) -> Result<Sample, CollectorError> {
        let reading = self.source.lock().await.read()?;
        Ok(Sample::new(self.clock.now_millis(), reading))
    }

    /// One stats tick. Store failures are logged; the sample is still published.
    pub async fn tick(&self) -> Result<TickOutcome, CollectorError> {
        self.activity.record_tick();
        let raw = self.read().await.inspect_err(|e| {
            warn!("Sample source failed: {}", e);
            self.activity.record_failure();
        })?;

        let (sample, admission) = match self.store.record_sample(&raw).await {
            Ok(Admission::Stored(stored)) => {
                self.activity.record_stored();
                (stored, Some(Admission::Stored(stored)))
            }
            Ok(Admission::Skipped) => {
                self.activity.record_skipped();
                (raw, Some(Admission::Skipped))
            }
            Err(e) => {
                warn!("Failed to record sample: {}", e);
                self.activity.record_failure();
                (raw, None)
            }
        };

        let report = self.broadcaster.publish_stats(sample);
        if report.delivered > 0 {
            self.activity.record_broadcast();
        }

        Ok(TickOutcome {
            sample,
            admission,
            report,
        })
    }

    /// One tray tick.
    pub async fn tray_tick(&self) -> Result<TrayStatus, CollectorError> {
        let sample = self.read().await?;
        Ok(TrayStatus::from_sample(&sample))
    }

    /// Run the 30-day sweep once.
    pub async fn expire(&self) {
        match self.store.expire_older_than_30_days().await {
            Ok(deleted) => self.activity.record_expired(deleted),
            Err(e) => {
                warn!("Expiry sweep failed: {}", e);
                self.activity.record_failure();
            }
        }
    }

    /// Start the three timers on a background task.
    pub fn spawn(self: Arc<Self>, intervals: SamplerIntervals) -> SamplerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (tray_tx, tray_rx) = watch::channel::<Option<TrayStatus>>(None);

        let task = tokio::spawn(async move {
            let mut stats = tokio::time::interval(intervals.stats);
            let mut tray = tokio::time::interval(intervals.tray);
            let mut expiry = tokio::time::interval_at(
                tokio::time::Instant::now() + intervals.expiry,
                intervals.expiry,
            );
            for timer in [&mut stats, &mut tray, &mut expiry] {
                timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            }

            info!(
                stats_ms = intervals.stats.as_millis() as u64,
                tray_ms = intervals.tray.as_millis() as u64,
                "Sampler started"
            );

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = stats.tick() => {
                        if let Ok(outcome) = self.tick().await {
                            debug!(
                                timestamp = outcome.sample.timestamp,
                                stored = outcome.admission.as_ref().is_some_and(Admission::is_stored),
                                delivered = outcome.report.delivered,
                                "Stats tick"
                            );
                        }
                    }
                    _ = tray.tick() => {
                        match self.tray_tick().await {
                            Ok(status) => {
                                tray_tx.send_replace(Some(status));
                            }
                            Err(e) => debug!("Tray tick skipped: {}", e),
                        }
                    }
                    _ = expiry.tick() => self.expire().await,
                }
            }

            info!("Sampler stopped");
        });

        SamplerHandle {
            stop: Some(stop_tx),
            task: Some(task),
            tray: tray_rx,
        }
    }
}

/// Running sampler.
pub struct SamplerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    tray: watch::Receiver<Option<TrayStatus>>,
}

impl SamplerHandle {
    /// Latest tray label, updated every tray tick.
    pub fn tray(&self) -> watch::Receiver<Option<TrayStatus>> {
        self.tray.clone()
    }

    /// Stop the timers and wait for the current tick to finish.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Sampler task ended abnormally: {}", e);
            }
        }
    }
}
