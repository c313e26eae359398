//! Per-account engagement counters.
//!
//! Lock-free so the backoff controller can bump them from deep inside
//! a retry loop without touching the account state mutex.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct AccountStats {
    comments_sent: AtomicU64,
    reactions_set: AtomicU64,
    channels_processed: AtomicU64,
    errors: AtomicU64,
    flood_waits: AtomicU64,
    total_flood_wait_secs: AtomicU64,
}

/// A point-in-time copy of the counters, safe to serialize for the
/// control surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub comments_sent: u64,
    pub reactions_set: u64,
    pub channels_processed: u64,
    pub errors: u64,
    pub flood_waits: u64,
    pub total_flood_wait_secs: u64,
}

impl AccountStats {
    pub fn record_comment(&self) {
        self.comments_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reaction(&self) {
        self.reactions_set.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel_processed(&self) {
        self.channels_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flood_wait(&self, secs: u64) {
        self.flood_waits.fetch_add(1, Ordering::Relaxed);
        self.total_flood_wait_secs.fetch_add(secs, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            comments_sent: self.comments_sent.load(Ordering::Relaxed),
            reactions_set: self.reactions_set.load(Ordering::Relaxed),
            channels_processed: self.channels_processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            flood_waits: self.flood_waits.load(Ordering::Relaxed),
            total_flood_wait_secs: self.total_flood_wait_secs.load(Ordering::Relaxed),
        }
    }

    /// Overwrite the counters from a persisted snapshot.
    pub fn restore(&self, snap: &StatsSnapshot) {
        self.comments_sent.store(snap.comments_sent, Ordering::Relaxed);
        self.reactions_set.store(snap.reactions_set, Ordering::Relaxed);
        self.channels_processed
            .store(snap.channels_processed, Ordering::Relaxed);
        self.errors.store(snap.errors, Ordering::Relaxed);
        self.flood_waits.store(snap.flood_waits, Ordering::Relaxed);
        self.total_flood_wait_secs
            .store(snap.total_flood_wait_secs, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.comments_sent.store(0, Ordering::Relaxed);
        self.reactions_set.store(0, Ordering::Relaxed);
        self.channels_processed.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.flood_waits.store(0, Ordering::Relaxed);
        self.total_flood_wait_secs.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = AccountStats::default();
        stats.record_comment();
        stats.record_comment();
        stats.record_reaction();
        stats.record_flood_wait(30);

        let snap = stats.snapshot();
        assert_eq!(snap.comments_sent, 2);
        assert_eq!(snap.reactions_set, 1);
        assert_eq!(snap.flood_waits, 1);
        assert_eq!(snap.total_flood_wait_secs, 30);
    }

    #[test]
    fn restore_overwrites_counters() {
        let stats = AccountStats::default();
        stats.record_error();
        stats.restore(&StatsSnapshot {
            comments_sent: 5,
            reactions_set: 4,
            channels_processed: 3,
            errors: 0,
            flood_waits: 2,
            total_flood_wait_secs: 60,
        });

        let snap = stats.snapshot();
        assert_eq!(snap.comments_sent, 5);
        assert_eq!(snap.errors, 0);
        assert_eq!(snap.total_flood_wait_secs, 60);
    }

    #[test]
    fn reset_zeroes_everything() {
        let stats = AccountStats::default();
        stats.record_error();
        stats.record_channel_processed();
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
