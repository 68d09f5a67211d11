//! sysdeck - system stats history and live fan-out for a desktop tray app.
//!
//! The library samples host resources on a timer, keeps a decimated history
//! in SQLite, and pushes every snapshot to local and remote subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              sysdeck                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  tick  ┌───────────────┐                        │
//! │  │ SampleSource │──────▶│    Sampler    │                        │
//! │  │  (sysinfo)   │        └───────────────┘                        │
//! │  └──────────────┘          │          │                           │
//! │              record_sample │          │ publish (every tick)      │
//! │                            ▼          ▼                           │
//! │  ┌──────────────────────────┐  ┌─────────────────┐                │
//! │  │ HistoryStore (SQLite)    │  │ LiveBroadcaster │──▶ local      │
//! │  │  gated by RetentionPolicy│  └─────────────────┘                │
//! │  └──────────────────────────┘          │                          │
//! │                 │ queries              │ frames                   │
//! │                 ▼                      ▼                          │
//! │        ┌──────────────────────────────────────┐                   │
//! │        │ TransportGateway (static/push/api)    │──▶ browsers      │
//! │        └──────────────────────────────────────┘                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sysdeck::core::{HistoryStore, RetentionPolicy, SystemClock};
//!
//! # async fn demo() -> Result<(), sysdeck::error::StoreError> {
//! let store = HistoryStore::new("history.db", RetentionPolicy::default(), Arc::new(SystemClock));
//! store.init().await?;
//! let extent = store.query_extent().await?;
//! println!("{} samples stored", extent.count);
//! store.close().await;
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod server;

#[cfg(feature = "client")]
pub mod client;

// Re-export key types at crate root for convenience
pub use activity::{ActivityLog, ActivityStats, SharedActivityLog};
pub use collector::{FixedSource, HistoryRecord, Reading, Sample, SampleSource, SystemSource};
pub use config::{Config, PortConfig, Settings, SettingsStore, Theme};
pub use crate::core::{
    Admission, Extent, HistoryStore, LiveBroadcaster, PushEvent, RetentionPolicy, Sampler,
    SubscriberKind, TierBasis,
};
pub use error::{ApiError, CollectorError, ConfigError, GatewayError, StoreError};
pub use gateway::{EndpointKind, GatewayConfig, GatewayState, GatewayStatus, Services, TransportGateway};

#[cfg(feature = "client")]
pub use client::{GatewayClient, PushClient, ReconnectPolicy};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
