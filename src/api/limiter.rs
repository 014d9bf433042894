//! Per-category rate-limit ledger
//!
//! Every [`ActionCategory`] has a fixed minimum interval measured from its
//! own last execution. Categories are independent: a pending recruitment
//! telegram never delays a generic query.
//!
//! Claiming goes through a per-category async gate, so two callers racing
//! for the same category are served one interval apart. Waiting sleeps in
//! steps of at most `poll_step` and re-checks, which keeps the wait
//! cancellable and lets a seeded or re-stamped ledger take effect.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::ActionCategory;
use crate::config::RateLimitConfig;

/// One category's interval, last execution and claim gate
#[derive(Debug)]
struct Slot {
    interval: Duration,
    last: Mutex<Option<Instant>>,
    gate: tokio::sync::Mutex<()>,
}

impl Slot {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    fn last(&self) -> Option<Instant> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamp `at` unless a later execution is already recorded
    fn stamp(&self, at: Instant) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.map_or(true, |prev| prev < at) {
            *last = Some(at);
        }
    }

    fn remaining(&self, interval: Duration, now: Instant) -> Duration {
        match self.last() {
            Some(last) => (last + interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

/// Last-executed timestamps for every action category
#[derive(Debug)]
pub struct RateLimitLedger {
    slots: [Slot; 5],
    generic_interval: Duration,
    poll_step: Duration,
}

impl RateLimitLedger {
    /// Create a ledger with the configured intervals
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            slots: ActionCategory::ALL.map(|category| Slot::new(config.interval(category))),
            generic_interval: config.interval(ActionCategory::Generic),
            poll_step: config.poll_step().max(Duration::from_millis(1)),
        }
    }

    /// A ledger with every interval set to zero (tests and offline tools)
    pub fn unthrottled() -> Self {
        let config = RateLimitConfig {
            generic_interval_ms: 0,
            telegram_interval_secs: 0,
            recruitment_telegram_interval_secs: 0,
            new_nations_interval_secs: 0,
            region_nations_interval_secs: 0,
            ..RateLimitConfig::default()
        };
        Self::new(&config)
    }

    fn slot(&self, category: ActionCategory) -> &Slot {
        &self.slots[category as usize]
    }

    /// Effective interval for a request of `category`
    pub fn interval(&self, category: ActionCategory, automated: bool) -> Duration {
        if !automated && category.is_harvest() {
            self.generic_interval
        } else {
            self.slot(category).interval
        }
    }

    /// Time left until `category` opens
    pub fn remaining(&self, category: ActionCategory, automated: bool) -> Duration {
        self.slot(category)
            .remaining(self.interval(category, automated), Instant::now())
    }

    pub fn is_ready(&self, category: ActionCategory, automated: bool) -> bool {
        self.remaining(category, automated).is_zero()
    }

    /// Block until `category` is legal and claim it
    ///
    /// The slot is stamped before returning, so the caller owns this
    /// execution window. Dropping the future abandons the wait without
    /// touching the ledger.
    pub async fn await_ready(&self, category: ActionCategory, automated: bool) {
        let slot = self.slot(category);
        let interval = self.interval(category, automated);
        let _gate = slot.gate.lock().await;

        loop {
            let now = Instant::now();
            let remaining = slot.remaining(interval, now);
            if remaining.is_zero() {
                slot.stamp(now);
                return;
            }
            tokio::time::sleep(remaining.min(self.poll_step)).await;
        }
    }

    /// Block until `category` is legal without claiming it
    pub async fn wait_until_ready(&self, category: ActionCategory, automated: bool) {
        loop {
            let remaining = self.remaining(category, automated);
            if remaining.is_zero() {
                return;
            }
            tokio::time::sleep(remaining.min(self.poll_step)).await;
        }
    }

    /// Re-stamp after the request completed
    pub fn mark_executed(&self, category: ActionCategory) {
        self.slot(category).stamp(Instant::now());
    }

    /// Record an execution at wall-clock time `at`
    ///
    /// Used at start-up so a restart does not fire a telegram right after
    /// the one sent before shutdown.
    pub fn seed(&self, category: ActionCategory, at: DateTime<Utc>) {
        let slot = self.slot(category);
        let age = (Utc::now() - at).to_std().unwrap_or(Duration::ZERO);
        if age >= slot.interval {
            return;
        }
        let now = Instant::now();
        slot.stamp(now.checked_sub(age).unwrap_or(now));
        tracing::debug!(
            category = %category,
            age_secs = age.as_secs(),
            "Seeded rate-limit ledger"
        );
    }
}
