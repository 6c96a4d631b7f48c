//! Bounded, priority-ordered store of pending requests.
//!
//! The queue holds no policy about when to send. It hands out a fresh drain
//! order on demand and tracks retry budgets and expiry; the drain loop decides
//! what to do with each entry.

use crate::network::OutboundRequest;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const ID_SUFFIX_LEN: usize = 6;

/// Identifier of a queued request: `req-<counter>-<random suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Per-request options for [`RequestQueue::enqueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Higher is sent first.
    pub priority: i32,
    /// Overrides the configured retry budget for this request.
    pub max_retries: Option<u32>,
}

impl QueueOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedRequest {
    pub id: RequestId,
    #[serde(flatten)]
    pub request: OutboundRequest,
    pub priority: i32,
    pub retries: u32,
    pub max_retries: u32,
    #[serde(skip)]
    pub created_at: Instant,
    #[serde(skip)]
    pub expires_at: Option<Instant>,
    /// Insertion order; breaks `created_at` ties.
    #[serde(skip)]
    seq: u64,
}

impl QueuedRequest {
    /// Past its deadline at `now`. Entries without a deadline never expire.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline < now)
    }
}

/// What [`RequestQueue::mark_failed`] did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Kept for another attempt.
    Retained { retries: u32 },
    /// Retry budget exhausted; removed.
    Dropped,
    /// No such entry (cancelled or already removed).
    Missing,
}

/// The pending request store.
#[derive(Debug)]
pub struct RequestQueue {
    /// Insertion order, so the front is always the oldest entry.
    entries: VecDeque<QueuedRequest>,
    max_size: usize,
    expiry: Option<Duration>,
    default_max_retries: u32,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new(max_size: usize, expiry: Option<Duration>, default_max_retries: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size: max_size.max(1),
            expiry,
            default_max_retries,
            next_seq: 0,
        }
    }

    /// Insert a request, evicting the oldest entry if the queue is full.
    ///
    /// Returns the new id and the evicted entry, if any.
    pub fn enqueue(
        &mut self,
        request: OutboundRequest,
        options: QueueOptions,
        now: Instant,
    ) -> (RequestId, Option<QueuedRequest>) {
        let evicted = if self.entries.len() >= self.max_size {
            self.entries.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            warn!(
                "Request queue full ({} entries), evicting oldest request {}",
                self.max_size, old.id
            );
        }

        self.next_seq += 1;
        let id = self.generate_id();
        let entry = QueuedRequest {
            id: id.clone(),
            request,
            priority: options.priority,
            retries: 0,
            max_retries: options.max_retries.unwrap_or(self.default_max_retries),
            created_at: now,
            expires_at: self.expiry.map(|ttl| now + ttl),
            seq: self.next_seq,
        };
        debug!(
            "Queued {} {} {} (priority {})",
            entry.id, entry.request.method, entry.request.url, entry.priority
        );
        self.entries.push_back(entry);
        (id, evicted)
    }

    /// Remove an entry. Absent ids are a no-op.
    pub fn cancel(&mut self, id: &RequestId) -> bool {
        self.remove(id).is_some()
    }

    /// Remove all entries, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Snapshot in send order: priority descending, then oldest first.
    pub fn drain_order(&self) -> Vec<QueuedRequest> {
        let mut ordered: Vec<QueuedRequest> = self.entries.iter().cloned().collect();
        ordered.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.seq.cmp(&b.seq))
        });
        ordered
    }

    /// Count a failed send against an entry's retry budget.
    pub fn mark_failed(&mut self, id: &RequestId) -> FailureOutcome {
        let Some(index) = self.position(id) else {
            return FailureOutcome::Missing;
        };
        let entry = &mut self.entries[index];
        entry.retries = entry.retries.saturating_add(1);
        if entry.retries > entry.max_retries {
            let retries = entry.retries;
            self.entries.remove(index);
            debug!("Dropping {} after {} failed attempts", id, retries);
            FailureOutcome::Dropped
        } else {
            FailureOutcome::Retained {
                retries: entry.retries,
            }
        }
    }

    pub fn remove(&mut self, id: &RequestId) -> Option<QueuedRequest> {
        let index = self.position(id)?;
        self.entries.remove(index)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &RequestId) -> Option<&QueuedRequest> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn pending(&self) -> Vec<QueuedRequest> {
        self.entries.iter().cloned().collect()
    }

    /// Apply new limits. Shrinking evicts the oldest entries; the new expiry
    /// only applies to requests queued from now on.
    ///
    /// Returns the evicted entries.
    pub fn set_limits(
        &mut self,
        max_size: usize,
        expiry: Option<Duration>,
        default_max_retries: u32,
    ) -> Vec<QueuedRequest> {
        self.max_size = max_size.max(1);
        self.expiry = expiry;
        self.default_max_retries = default_max_retries;

        let excess = self.entries.len().saturating_sub(self.max_size);
        if excess > 0 {
            warn!(
                "Request queue limit lowered to {}, evicting {} oldest requests",
                self.max_size, excess
            );
        }
        self.entries.drain(..excess).collect()
    }

    /// Give every entry that has failed before a fresh retry budget.
    pub fn reset_failed_retries(&mut self) -> usize {
        let mut reset = 0;
        for entry in self.entries.iter_mut().filter(|e| e.retries > 0) {
            entry.retries = 0;
            reset += 1;
        }
        reset
    }

    fn position(&self, id: &RequestId) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.id == id)
    }

    fn generate_id(&self) -> RequestId {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();
        RequestId(format!("req-{}-{}", self.next_seq, suffix))
    }
}
