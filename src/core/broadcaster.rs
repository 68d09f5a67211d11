//! In-process fan-out of live events.
//!
//! Each subscriber owns a bounded queue. `publish` serializes the event once
//! and offers the same frame to every queue without waiting, so a stalled
//! subscriber only ever loses its own messages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::collector::Sample;
use crate::config::{Settings, Theme};

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

/// Payload of a `theme-changed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeChange {
    pub theme: Theme,
}

/// Events pushed to subscribers, encoded as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PushEvent {
    DetailedStatsUpdate(Sample),
    SettingsUpdated(Settings),
    ThemeChanged(ThemeChange),
}

impl PushEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PushEvent::DetailedStatsUpdate(_) => "detailed-stats-update",
            PushEvent::SettingsUpdated(_) => "settings-updated",
            PushEvent::ThemeChanged(_) => "theme-changed",
        }
    }

    /// Encode as one text frame.
    pub fn to_frame(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

/// Where a subscriber lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberKind {
    /// In-process consumer such as the tray or a local window.
    Local,
    /// A socket served by the gateway.
    Remote,
}

/// Opaque identifier returned by [`LiveBroadcaster::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Receiving side of a subscription.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    kind: SubscriberKind,
    frames: mpsc::Receiver<Arc<str>>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    pub fn kind(&self) -> SubscriberKind {
        self.kind
    }

    /// Next frame. `None` once the broadcaster has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.frames.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.frames.try_recv().ok()
    }
}

/// Per-publish delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers whose queue was full; they stay registered.
    pub dropped: usize,
    /// Subscribers whose receiver was gone; they were removed.
    pub pruned: usize,
}

struct Subscriber {
    kind: SubscriberKind,
    tx: mpsc::Sender<Arc<str>>,
}

/// Fan-out hub shared by the sampler, the gateway and local consumers.
pub struct LiveBroadcaster {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    latest: Mutex<Option<Sample>>,
    queue_depth: usize,
}

impl Default for LiveBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LiveBroadcaster {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            latest: Mutex::new(None),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Offer `event` to every subscriber. Never waits on a subscriber.
    pub fn publish(&self, event: &PushEvent) -> PublishReport {
        if let PushEvent::DetailedStatsUpdate(sample) = event {
            *lock(&self.latest) = Some(*sample);
        }

        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode {} event: {}", event.kind(), e);
                return PublishReport::default();
            }
        };

        let mut report = PublishReport::default();
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|id, sub| match sub.tx.try_send(frame.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(subscriber = id, "Subscriber queue full, message dropped");
                report.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = id, "Subscriber gone, pruning");
                report.pruned += 1;
                false
            }
        });
        report
    }

    pub fn publish_stats(&self, sample: Sample) -> PublishReport {
        self.publish(&PushEvent::DetailedStatsUpdate(sample))
    }

    pub fn publish_settings(&self, settings: Settings) -> PublishReport {
        self.publish(&PushEvent::SettingsUpdated(settings))
    }

    pub fn publish_theme(&self, theme: Theme) -> PublishReport {
        self.publish(&PushEvent::ThemeChanged(ThemeChange { theme }))
    }

    /// Register a subscriber. The caller sends any initial snapshot itself.
    pub fn subscribe(&self, kind: SubscriberKind) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, frames) = mpsc::channel(self.queue_depth);
        lock(&self.subscribers).insert(id, Subscriber { kind, tx });
        debug!(subscriber = id, ?kind, "Subscriber registered");
        Subscription {
            handle: SubscriptionHandle(id),
            kind,
            frames,
        }
    }

    /// Remove a subscriber. Returns whether it was still registered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        lock(&self.subscribers).remove(&handle.0).is_some()
    }

    /// Remove every remote subscriber, closing their queues.
    pub fn drop_remote(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|_, sub| sub.kind != SubscriberKind::Remote);
        before - subscribers.len()
    }

    /// Most recent stats snapshot published.
    pub fn latest(&self) -> Option<Sample> {
        *lock(&self.latest)
    }

    /// Latest snapshot encoded as a `detailed-stats-update` frame.
    pub fn latest_frame(&self) -> Option<Arc<str>> {
        let sample = self.latest()?;
        PushEvent::DetailedStatsUpdate(sample).to_frame().ok()
    }

    pub fn len(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, kind: SubscriberKind) -> usize {
        lock(&self.subscribers)
            .values()
            .filter(|s| s.kind == kind)
            .count()
    }
}

pub type SharedBroadcaster = Arc<LiveBroadcaster>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Reading;

    fn sample(ts: i64) -> Sample {
        Sample::new(
            ts,
            Reading {
                cpu: 12.0,
                ram: 34.0,
                disk: 56.0,
                network_throughput: 7.0,
                battery_percent: None,
                temperature: Some(48.5),
            },
        )
    }

    #[test]
    fn test_wire_envelope() {
        let frame = PushEvent::DetailedStatsUpdate(sample(1_000)).to_frame().unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "detailed-stats-update");
        assert_eq!(json["data"]["timestamp"], 1_000);
        assert_eq!(json["data"]["networkThroughput"], 7.0);

        let frame = PushEvent::ThemeChanged(ThemeChange { theme: Theme::Dark })
            .to_frame()
            .unwrap();
        assert_eq!(&*frame, r#"{"type":"theme-changed","data":{"theme":"dark"}}"#);
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_the_same_frame() {
        let hub = LiveBroadcaster::default();
        let mut local = hub.subscribe(SubscriberKind::Local);
        let mut remote = hub.subscribe(SubscriberKind::Remote);

        let report = hub.publish_stats(sample(5));
        assert_eq!(report.delivered, 2);

        let a = local.recv().await.unwrap();
        let b = remote.recv().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(hub.latest(), Some(sample(5)));
    }

    #[test]
    fn test_full_queue_does_not_block_others() {
        let hub = LiveBroadcaster::new(1);
        let mut stalled = hub.subscribe(SubscriberKind::Remote);
        let mut healthy = hub.subscribe(SubscriberKind::Remote);

        hub.publish_stats(sample(1));
        assert!(healthy.try_recv().is_some());

        let report = hub.publish_stats(sample(2));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert!(healthy.try_recv().is_some());

        // The stalled subscriber keeps its registration and its first frame.
        assert_eq!(hub.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&stalled.try_recv().unwrap()).unwrap();
        assert_eq!(first["data"]["timestamp"], 1);
        assert!(stalled.try_recv().is_none());
    }

    #[test]
    fn test_closed_subscriber_is_pruned() {
        let hub = LiveBroadcaster::default();
        let gone = hub.subscribe(SubscriberKind::Remote);
        let _kept = hub.subscribe(SubscriberKind::Local);
        drop(gone);

        let report = hub.publish_stats(sample(1));
        assert_eq!(report.pruned, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = LiveBroadcaster::default();
        let sub = hub.subscribe(SubscriberKind::Local);
        assert!(hub.unsubscribe(sub.handle()));
        assert!(!hub.unsubscribe(sub.handle()));
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_drop_remote_closes_remote_queues_only() {
        let hub = LiveBroadcaster::default();
        let mut remote_a = hub.subscribe(SubscriberKind::Remote);
        let mut remote_b = hub.subscribe(SubscriberKind::Remote);
        let _local = hub.subscribe(SubscriberKind::Local);

        assert_eq!(hub.drop_remote(), 2);
        assert_eq!(hub.count(SubscriberKind::Remote), 0);
        assert_eq!(hub.count(SubscriberKind::Local), 1);
        assert!(remote_a.recv().await.is_none());
        assert!(remote_b.recv().await.is_none());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = LiveBroadcaster::default();
        assert_eq!(hub.publish_stats(sample(9)), PublishReport::default());
        assert!(hub.latest_frame().is_some());
    }
}
