//! Scripted sample source.
//!
//! Replays a fixed list of readings in a loop. Used when live sampling is
//! disabled and by tests that need deterministic values.

use crate::collector::types::Reading;
use crate::collector::SampleSource;
use crate::error::CollectorError;

/// A source that cycles through a list of readings.
#[derive(Debug, Clone)]
pub struct FixedSource {
    readings: Vec<Reading>,
    cursor: usize,
}

impl FixedSource {
    /// Always return the same reading.
    pub fn constant(reading: Reading) -> Self {
        Self::cycle(vec![reading])
    }

    /// Return the readings in order, wrapping around at the end.
    pub fn cycle(readings: Vec<Reading>) -> Self {
        Self {
            readings,
            cursor: 0,
        }
    }
}

impl SampleSource for FixedSource {
    fn read(&mut self) -> Result<Reading, CollectorError> {
        if self.readings.is_empty() {
            return Err(CollectorError::Unavailable(
                "fixed source has no readings".to_string(),
            ));
        }
        let reading = self.readings[self.cursor % self.readings.len()];
        self.cursor += 1;
        Ok(reading)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}
