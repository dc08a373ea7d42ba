//! Self-expiring notification cache.
//!
//! Maps a label to the instant its suppression ends. Expired entries are
//! evicted lazily when looked up; `purge_expired` is available for callers
//! that want to bound memory with a sweep.
//!
//! The cache is owned by the detection cycle and is not shared between
//! threads, so it carries no locking.

use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL_BASE: Duration = Duration::from_millis(750);
pub const DEFAULT_TTL_MIN_MULTIPLIER: u32 = 2;
pub const DEFAULT_TTL_MAX_MULTIPLIER: u32 = 5;

/// Randomized per-notification TTL: `base * uniform(min..=max)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlPolicy {
    pub base: Duration,
    pub min_multiplier: u32,
    pub max_multiplier: u32,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_TTL_BASE,
            min_multiplier: DEFAULT_TTL_MIN_MULTIPLIER,
            max_multiplier: DEFAULT_TTL_MAX_MULTIPLIER,
        }
    }
}

impl TtlPolicy {
    pub fn shortest(&self) -> Duration {
        self.base * self.min_multiplier
    }

    pub fn longest(&self) -> Duration {
        self.base * self.max_multiplier.max(self.min_multiplier)
    }

    /// Draw a TTL for one notification.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let upper = self.max_multiplier.max(self.min_multiplier);
        self.base * rng.gen_range(self.min_multiplier..=upper)
    }
}

#[derive(Debug, Default)]
pub struct NotificationCache {
    entries: HashMap<String, Instant>,
}

impl NotificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress `label` until `now + ttl`. Replaces any existing entry.
    pub fn put(&mut self, label: &str, ttl: Duration, now: Instant) {
        self.entries.insert(label.to_string(), now + ttl);
    }

    /// True while `label` is suppressed. An expired entry is removed and
    /// reported absent.
    pub fn contains(&mut self, label: &str, now: Instant) -> bool {
        match self.entries.get(label) {
            Some(&expires_at) if now < expires_at => true,
            Some(_) => {
                self.entries.remove(label);
                false
            }
            None => false,
        }
    }

    /// Instant at which `label` stops being suppressed, if it still is.
    pub fn expires_at(&self, label: &str, now: Instant) -> Option<Instant> {
        self.entries
            .get(label)
            .copied()
            .filter(|&expires_at| now < expires_at)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| now < *expires_at);
        before - self.entries.len()
    }

    /// Entries currently stored, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
