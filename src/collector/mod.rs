//! Sample collection for sysdeck.
//!
//! A [`SampleSource`] is the boundary to the operating system. The system
//! source reads live stats through `sysinfo`; the fixed source replays
//! scripted readings and is what tests and headless runs use.

pub mod fixed;
pub mod system;
pub mod types;

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::CollectorError;

// Re-export commonly used types
pub use fixed::FixedSource;
pub use system::SystemSource;
pub use types::{HistoryRecord, Reading, Sample};

/// Something that can produce a resource reading on demand.
pub trait SampleSource: Send {
    /// Take one reading.
    fn read(&mut self) -> Result<Reading, CollectorError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// A source shared by the stats tick and the tray tick.
pub type SharedSource = Arc<Mutex<Box<dyn SampleSource>>>;

/// Wrap a source so both timers can read it.
pub fn share(source: impl SampleSource + 'static) -> SharedSource {
    Arc::new(Mutex::new(Box::new(source)))
}
