//! Tiered decimation schedule for stored samples.
//!
//! The policy is a pure function of the stored history and the current
//! time. The default basis selects the tier from the time elapsed since the
//! last stored sample and compares that same quantity to the tier's minimum
//! spacing. As long as ticks arrive faster than the finest spacing, the
//! elapsed time never leaves the fresh tier, so the store keeps sampling at
//! the fresh rate. [`TierBasis::HistorySpan`] is the alternative reading,
//! where the tier follows how much history has accumulated.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Samples older than this are expired.
pub const MAX_RETENTION: Duration = Duration::from_secs(30 * DAY);

/// One row of the retention schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionTier {
    pub name: &'static str,
    /// Exclusive upper bound of the tier's age window
    pub max_age: Duration,
    /// Minimum spacing between stored samples while in this tier
    pub min_interval: Duration,
}

/// fresh / recent / day / month.
pub const DEFAULT_TIERS: [RetentionTier; 4] = [
    RetentionTier {
        name: "fresh",
        max_age: Duration::from_secs(HOUR),
        min_interval: Duration::from_secs(5),
    },
    RetentionTier {
        name: "recent",
        max_age: Duration::from_secs(4 * HOUR),
        min_interval: Duration::from_secs(MINUTE),
    },
    RetentionTier {
        name: "day",
        max_age: Duration::from_secs(DAY),
        min_interval: Duration::from_secs(5 * MINUTE),
    },
    RetentionTier {
        name: "month",
        max_age: MAX_RETENTION,
        min_interval: Duration::from_secs(15 * MINUTE),
    },
];

/// Which age drives tier selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierBasis {
    /// Age is the time since the most recent stored sample.
    #[default]
    SinceLastStore,
    /// Age is the span between the oldest stored sample and now.
    HistorySpan,
}

/// Admission rules for the history store.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    tiers: Vec<RetentionTier>,
    basis: TierBasis,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(TierBasis::SinceLastStore)
    }
}

impl RetentionPolicy {
    /// Default schedule with the given basis.
    pub fn new(basis: TierBasis) -> Self {
        Self {
            tiers: DEFAULT_TIERS.to_vec(),
            basis,
        }
    }

    /// Custom schedule. Tiers are sorted by `max_age`; an empty list falls
    /// back to the default schedule.
    pub fn with_tiers(mut tiers: Vec<RetentionTier>, basis: TierBasis) -> Self {
        if tiers.is_empty() {
            return Self::new(basis);
        }
        tiers.sort_by_key(|t| t.max_age);
        Self { tiers, basis }
    }

    pub fn basis(&self) -> TierBasis {
        self.basis
    }

    pub fn tiers(&self) -> &[RetentionTier] {
        &self.tiers
    }

    /// Tier whose half-open age window contains `age_millis`. Ages past the
    /// last window use the last tier.
    pub fn tier_for_age(&self, age_millis: i64) -> &RetentionTier {
        let age = age_millis.max(0) as u128;
        self.tiers
            .iter()
            .find(|t| age < t.max_age.as_millis())
            .unwrap_or_else(|| &self.tiers[self.tiers.len() - 1])
    }

    /// Admission test against the last stored timestamp.
    ///
    /// The tier age and the elapsed time are the same quantity here.
    pub fn should_store(&self, last_stored: Option<i64>, now: i64) -> bool {
        let Some(last) = last_stored else {
            return true;
        };
        let age_of_last_store = now - last;
        let time_since_last_store = now - last;
        let tier = self.tier_for_age(age_of_last_store);
        time_since_last_store >= tier.min_interval.as_millis() as i64
    }

    /// Admission test given the stored extent, honoring the configured basis.
    pub fn admits(&self, oldest: Option<i64>, newest: Option<i64>, now: i64) -> bool {
        match self.basis {
            TierBasis::SinceLastStore => self.should_store(newest, now),
            TierBasis::HistorySpan => {
                let (Some(oldest), Some(newest)) = (oldest, newest) else {
                    return true;
                };
                let tier = self.tier_for_age(now - oldest);
                now - newest >= tier.min_interval.as_millis() as i64
            }
        }
    }
}

/// Admission test with the default schedule and basis.
pub fn should_store(last_stored: Option<i64>, now: i64) -> bool {
    RetentionPolicy::default().should_store(last_stored, now)
}
