//! Activity accounting for sysdeck.
//!
//! Counts what the sampler and the gateway did so `sysdeck status` and
//! `GET /api/status` can report it without touching the history store.

pub mod log;

// Re-export commonly used types
pub use log::{ActivityLog, ActivityStats, SharedActivityLog};
