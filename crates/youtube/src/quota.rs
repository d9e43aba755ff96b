//! Daily quota budget for the upstream API.
//!
//! A token bucket shared by every caller in the process. Refill is applied
//! lazily whenever the bucket is inspected.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Quota bucket configuration.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Maximum units held by the bucket.
    pub capacity: u64,
    /// Units restored per elapsed refill interval.
    pub refill_amount: u64,
    /// Length of one refill interval.
    pub refill_interval: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            refill_amount: 10_000,
            refill_interval: Duration::from_secs(24 * 3600),
        }
    }
}

/// Snapshot of the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    /// Maximum units held by the bucket.
    pub capacity: u64,
    /// Units currently available.
    pub available: u64,
}

#[derive(Debug)]
struct Bucket {
    available: u64,
    last_refill: Instant,
}

/// Token bucket limiting upstream calls to a fixed budget.
#[derive(Debug)]
pub struct QuotaManager {
    config: QuotaConfig,
    bucket: Mutex<Bucket>,
}

impl QuotaManager {
    /// Create a full bucket.
    #[must_use]
    pub fn new(config: QuotaConfig) -> Self {
        let bucket = Bucket {
            available: config.capacity,
            last_refill: Instant::now(),
        };
        Self {
            config,
            bucket: Mutex::new(bucket),
        }
    }

    /// Whether at least one unit is available.
    pub async fn can_make_request(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.available >= 1
    }

    /// Spend one unit. Does nothing when the bucket is empty.
    pub async fn consume_quota(&self) {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.available = bucket.available.saturating_sub(1);
    }

    /// Spend `units` if that many are available, as one atomic step.
    pub async fn try_consume(&self, units: u64) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.available < units {
            return false;
        }
        bucket.available -= units;
        true
    }

    /// Current capacity and availability.
    pub async fn status(&self) -> QuotaStatus {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        QuotaStatus {
            capacity: self.config.capacity,
            available: bucket.available,
        }
    }

    /// Drop every remaining unit until the next refill.
    ///
    /// Used when upstream reports the quota spent before the local bucket is.
    pub async fn exhaust(&self) {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.available = 0;
    }

    /// Restore the full budget.
    pub async fn reset(&self) {
        let mut bucket = self.bucket.lock().await;
        bucket.available = self.config.capacity;
        bucket.last_refill = Instant::now();
    }

    fn refill(&self, bucket: &mut Bucket) {
        if self.config.refill_interval.is_zero() {
            bucket.available = self.config.capacity;
            return;
        }

        let elapsed = bucket.last_refill.elapsed();
        let intervals = elapsed.as_nanos() / self.config.refill_interval.as_nanos();
        if intervals == 0 {
            return;
        }

        let intervals = u64::try_from(intervals).unwrap_or(u64::MAX);
        let owed = intervals.saturating_mul(self.config.refill_amount);
        bucket.available = bucket
            .available
            .saturating_add(owed)
            .min(self.config.capacity);
        // Keep the partial interval so refills stay aligned.
        bucket.last_refill += self
            .config
            .refill_interval
            .saturating_mul(u32::try_from(intervals).unwrap_or(u32::MAX));
    }
}

impl Default for QuotaManager {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}
