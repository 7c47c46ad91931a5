//! Per-session hourly and daily request ceilings.
//!
//! Counters live in fixed buckets keyed by `floor(unix / 3600)` and the UTC
//! calendar date. A counter whose bucket key no longer matches the current one
//! is simply started over; stale sessions are dropped by `prune`.
//!
//! Clients that never return their cookie mint a session per request, so
//! `prune` also drops sessions used exactly once in an earlier hour. Such a
//! session, if it ever comes back, regains that one daily slot.

use chrono::{DateTime, Days, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SECS_PER_HOUR: i64 = 3600;

/// Which ceiling was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateWindow {
    Hourly,
    Daily,
}

impl RateWindow {
    pub fn label(&self) -> &'static str {
        match self {
            RateWindow::Hourly => "hourly",
            RateWindow::Daily => "daily",
        }
    }
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A rejected request, with the time left until the full bucket rolls over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub window: RateWindow,
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_hour: 100,
            per_day: 500,
        }
    }
}

/// Keyed counter store shared by every request.
///
/// `check_and_increment` must be atomic per key: two concurrent calls for the
/// same session can never both pass on the last free slot.
pub trait RateLimitStore: Send + Sync {
    fn check_and_increment(
        &self,
        session: &str,
        now: DateTime<Utc>,
        limits: &RateLimits,
    ) -> Result<(), RateLimitExceeded>;

    /// Drop state that can no longer affect a decision at `now`
    fn prune(&self, now: DateTime<Utc>) -> usize;
}

/// Counters for one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCounters {
    hour_key: i64,
    hour_count: u32,
    day_key: NaiveDate,
    day_count: u32,
}

impl SessionCounters {
    fn roll(&mut self, hour_key: i64, day_key: NaiveDate) {
        if self.hour_key != hour_key {
            self.hour_key = hour_key;
            self.hour_count = 0;
        }
        if self.day_key != day_key {
            self.day_key = day_key;
            self.day_count = 0;
        }
    }

    pub fn hour_count(&self) -> u32 {
        self.hour_count
    }

    pub fn day_count(&self) -> u32 {
        self.day_count
    }
}

fn hour_key(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(SECS_PER_HOUR)
}

fn secs_until_next_hour(now: DateTime<Utc>) -> u64 {
    ((hour_key(now) + 1) * SECS_PER_HOUR - now.timestamp()).max(1) as u64
}

fn secs_until_next_day(now: DateTime<Utc>) -> u64 {
    now.date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|midnight| (midnight.and_utc().timestamp() - now.timestamp()).max(1) as u64)
        .unwrap_or(1)
}

/// In-process store; each session's counters sit behind their DashMap shard lock
#[derive(Debug, Clone, Default)]
pub struct InMemoryRateLimitStore {
    sessions: Arc<DashMap<String, SessionCounters>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn counters(&self, session: &str) -> Option<SessionCounters> {
        self.sessions.get(session).map(|c| c.value().clone())
    }

    /// Periodically prune stale sessions.
    /// Must be called from within a tokio runtime.
    pub fn start_cleanup_task(&self, clock: Arc<dyn crate::Clock>, every: Duration) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                store.prune(clock.now());
            }
        });
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn check_and_increment(
        &self,
        session: &str,
        now: DateTime<Utc>,
        limits: &RateLimits,
    ) -> Result<(), RateLimitExceeded> {
        let hour = hour_key(now);
        let day = now.date_naive();

        // The entry guard holds the shard write lock until it drops, so the
        // check and both increments happen as one step.
        let mut counters = self.sessions.entry(session.to_string()).or_default();
        counters.roll(hour, day);

        if counters.hour_count >= limits.per_hour {
            return Err(RateLimitExceeded {
                window: RateWindow::Hourly,
                retry_after_secs: secs_until_next_hour(now),
            });
        }
        if counters.day_count >= limits.per_day {
            return Err(RateLimitExceeded {
                window: RateWindow::Daily,
                retry_after_secs: secs_until_next_day(now),
            });
        }

        counters.hour_count += 1;
        counters.day_count += 1;
        Ok(())
    }

    fn prune(&self, now: DateTime<Utc>) -> usize {
        let today = now.date_naive();
        let hour = hour_key(now);
        let before = self.sessions.len();
        self.sessions.retain(|_, counters| {
            counters.day_key >= today && (counters.hour_key >= hour || counters.day_count > 1)
        });

        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(
                removed,
                remaining = self.sessions.len(),
                "Pruned stale rate limit sessions"
            );
        }
        removed
    }
}
