//! Core functionality for sysdeck.
//!
//! This module contains:
//! - The retention policy that decides which samples are persisted
//! - The SQLite-backed history store
//! - The live broadcaster that fans snapshots out to subscribers
//! - The sampler that drives both on a timer

pub mod broadcaster;
pub mod clock;
pub mod history;
pub mod retention;
pub mod sampler;

// Re-export commonly used types
pub use broadcaster::{
    LiveBroadcaster, PublishReport, PushEvent, SharedBroadcaster, SubscriberKind, Subscription,
    SubscriptionHandle, ThemeChange,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use history::{Admission, Extent, HistoryStore, HistorySummary, MetricSummary};
pub use retention::{should_store, RetentionPolicy, RetentionTier, TierBasis, DEFAULT_TIERS};
pub use sampler::{Sampler, SamplerHandle, SamplerIntervals, TickOutcome, TrayStatus};
