//! Merging local and remote detections, and deciding which are worth a cue.
//!
//! Remote results arrive on their own threads at arbitrary times. They are
//! appended to a `RemoteInbox` under its mutex and drained, all at once, by
//! the next detection cycle. Draining moves the entries out, so each remote
//! detection is fused exactly once.

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::detect::Detection;

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.75;

// ----------------------------------------------------------------------------
// RemoteInbox
// ----------------------------------------------------------------------------

/// Shared queue of remote detections awaiting fusion.
#[derive(Clone, Debug, Default)]
pub struct RemoteInbox {
    pending: Arc<Mutex<Vec<Detection>>>,
}

impl RemoteInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one response's detections, preserving arrival order.
    pub fn push(&self, detections: Vec<Detection>) -> Result<()> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| anyhow!("remote inbox lock poisoned"))?;
        pending.extend(detections);
        Ok(())
    }

    /// Move everything out, leaving the inbox empty.
    pub fn drain(&self) -> Result<Vec<Detection>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| anyhow!("remote inbox lock poisoned"))?;
        Ok(std::mem::take(&mut *pending))
    }

    /// Entries waiting to be fused. Still counts them if a pusher panicked
    /// while holding the lock.
    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .map(|p| p.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append every pending remote detection to this cycle's local list.
///
/// Remote detections are not confidence-filtered here.
pub fn fuse(mut local: Vec<Detection>, inbox: &RemoteInbox) -> Result<Vec<Detection>> {
    let remote = inbox.drain()?;
    if !remote.is_empty() {
        log::debug!(
            "fusing {} remote detection(s) with {} local",
            remote.len(),
            local.len()
        );
    }
    local.extend(remote);
    Ok(local)
}

// ----------------------------------------------------------------------------
// AllowList
// ----------------------------------------------------------------------------

/// Labels the user asked to hear about. Empty means everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllowList {
    labels: HashSet<String>,
}

impl AllowList {
    /// Parse a comma-separated list. Tokens are trimmed and lower-cased;
    /// empty tokens are dropped.
    pub fn from_csv(input: &str) -> Self {
        let labels = input
            .split(',')
            .map(|token| token.trim().to_lowercase())
            .filter(|token| !token.is_empty())
            .collect();
        Self { labels }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Exact, case-sensitive match against the normalized tokens.
    pub fn permits(&self, label: &str) -> bool {
        self.labels.is_empty() || self.labels.contains(label)
    }
}

// ----------------------------------------------------------------------------
// NotificationFilter
// ----------------------------------------------------------------------------

/// Eligibility for a spoken cue. Applies to the fused list; it does not
/// affect what the tracker receives.
#[derive(Clone, Debug)]
pub struct NotificationFilter {
    pub min_confidence: f32,
    pub allow_list: AllowList,
}

impl Default for NotificationFilter {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            allow_list: AllowList::default(),
        }
    }
}

impl NotificationFilter {
    pub fn new(min_confidence: f32, allow_list: AllowList) -> Self {
        Self {
            min_confidence,
            allow_list,
        }
    }

    pub fn eligible(&self, detection: &Detection) -> bool {
        detection.confidence >= self.min_confidence && self.allow_list.permits(&detection.label)
    }

    pub fn apply<'a>(&'a self, detections: &'a [Detection]) -> impl Iterator<Item = &'a Detection> {
        detections.iter().filter(move |d| self.eligible(d))
    }
}
