//! Bounded log of decisions and their eventual outcomes.
//!
//! Every decision the engine hands out is recorded as an [`Experience`]. The
//! outcome arrives later, when the scheduler observes what the decision led
//! to. The log is a ring buffer: once full, the oldest entry is evicted.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use guildhall_types::{Decision, NpcId, Situation};

/// What a decision led to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Reward signal, nominally in `-1.0..=1.0`.
    pub reward: f32,
    /// Tick the outcome was observed.
    pub observed_at: u64,
}

/// One recorded decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Experience {
    /// Sequence number, unique within a log.
    pub id: u64,
    /// The NPC that decided.
    pub entity: NpcId,
    /// The situation the decision was made in.
    pub situation: Arc<Situation>,
    /// The decision handed out.
    pub decision: Decision,
    /// Outcome, once known.
    pub outcome: Option<Outcome>,
    /// Tick of the request.
    pub tick: u64,
    /// Wall-clock time of recording.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct LogInner {
    entries: VecDeque<Experience>,
    next_id: u64,
    evicted: u64,
}

/// Append-only, bounded, internally synchronized experience log.
#[derive(Debug)]
pub struct ExperienceLog {
    capacity: usize,
    inner: Mutex<LogInner>,
}

impl ExperienceLog {
    /// Create a log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(LogInner {
                entries: VecDeque::with_capacity(capacity),
                next_id: 0,
                evicted: 0,
            }),
        }
    }

    /// Maximum number of entries.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a decision. Returns the new entry's ID.
    pub fn record(&self, entity: NpcId, situation: Arc<Situation>, decision: Decision, tick: u64) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);
        if inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
            inner.evicted = inner.evicted.saturating_add(1);
        }
        inner.entries.push_back(Experience {
            id,
            entity,
            situation,
            decision,
            outcome: None,
            tick,
            timestamp: Utc::now(),
        });
        id
    }

    /// Attach `outcome` to `entity`'s most recent entry that has none.
    ///
    /// Returns `false` when there is no such entry.
    pub fn attach_outcome(&self, entity: NpcId, outcome: Outcome) -> bool {
        let mut inner = self.inner.lock();
        let open = inner
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.entity == entity && e.outcome.is_none());
        match open {
            Some(entry) => {
                entry.outcome = Some(outcome);
                true
            }
            None => false,
        }
    }

    /// Up to `batch` randomly chosen entries that have an outcome.
    pub fn sample_with_outcomes<R: Rng>(&self, rng: &mut R, batch: usize) -> Vec<Experience> {
        let mut pool: Vec<Experience> = self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.outcome.is_some())
            .cloned()
            .collect();

        // Partial Fisher-Yates: the first `take` slots become the sample.
        let take = batch.min(pool.len());
        for i in 0..take {
            let j = rng.random_range(i..pool.len());
            pool.swap(i, j);
        }
        pool.truncate(take);
        pool
    }

    /// Most recent entry for `entity`.
    pub fn latest_for(&self, entity: NpcId) -> Option<Experience> {
        self.inner
            .lock()
            .entries
            .iter()
            .rev()
            .find(|e| e.entity == entity)
            .cloned()
    }

    /// Copy of every entry, oldest first.
    pub fn snapshot(&self) -> Vec<Experience> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries dropped on overflow so far.
    pub fn evicted(&self) -> u64 {
        self.inner.lock().evicted
    }
}
