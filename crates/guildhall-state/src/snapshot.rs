//! Checksummed snapshots of the game state.
//!
//! A snapshot's checksum is the lowercase hex SHA-256 of its version (as
//! big-endian bytes) followed by the canonical JSON of its state. Registries
//! are `BTreeMap`s, so the JSON, and therefore the checksum, is
//! deterministic.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use guildhall_types::{GameState, SnapshotId};

use crate::SnapshotError;

/// A checksummed deep copy of the game state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot identifier.
    pub id: SnapshotId,
    /// The captured state.
    pub state: GameState,
    /// Wall-clock capture time.
    pub created_at: DateTime<Utc>,
    /// State version at capture time.
    pub version: u64,
    /// Hex SHA-256 over `version` and `state`.
    pub checksum: String,
}

impl Snapshot {
    /// Capture `state` at `version`.
    pub fn capture(state: &GameState, version: u64) -> Result<Self, SnapshotError> {
        let checksum = Self::compute_checksum(version, state)?;
        Ok(Self {
            id: SnapshotId::new(),
            state: state.clone(),
            created_at: Utc::now(),
            version,
            checksum,
        })
    }

    /// Checksum a `(version, state)` pair.
    pub fn compute_checksum(version: u64, state: &GameState) -> Result<String, SnapshotError> {
        let json = serde_json::to_vec(state)?;
        let mut hasher = Sha256::new();
        hasher.update(version.to_be_bytes());
        hasher.update(&json);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Recompute the checksum and compare it with the stored one.
    pub fn verify(&self) -> Result<(), SnapshotError> {
        let actual = Self::compute_checksum(self.version, &self.state)?;
        if actual == self.checksum {
            Ok(())
        } else {
            Err(SnapshotError::Corrupted {
                id: self.id,
                expected: self.checksum.clone(),
                actual,
            })
        }
    }
}

/// Hex SHA-256 of the canonical JSON of `state` alone.
///
/// Unlike [`Snapshot::checksum`], this ignores the version, so a
/// snapshot-then-restore round trip leaves it unchanged.
pub fn state_checksum(state: &GameState) -> Result<String, SnapshotError> {
    let json = serde_json::to_vec(state)?;
    Ok(format!("{:x}", Sha256::digest(&json)))
}

/// Bounded history of snapshots, oldest evicted first.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    capacity: usize,
    entries: VecDeque<Snapshot>,
}

impl SnapshotHistory {
    /// Create a history that keeps at most `capacity` snapshots (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Store a snapshot, returning the evicted one when full.
    pub fn push(&mut self, snapshot: Snapshot) -> Option<Snapshot> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(snapshot);
        evicted
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<&Snapshot> {
        self.entries.back()
    }

    /// Look up a snapshot by ID.
    pub fn get(&self, id: SnapshotId) -> Option<&Snapshot> {
        self.entries.iter().find(|s| s.id == id)
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no snapshot is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshots from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> + '_ {
        self.entries.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use guildhall_types::{Npc, NpcId};

    use super::*;

    fn sample_state() -> GameState {
        let mut state = GameState::new();
        let id = NpcId::new();
        state.npcs.insert(id, Npc::new(id, "Ada"));
        state
    }

    #[test]
    fn fresh_snapshot_verifies() {
        let snapshot = Snapshot::capture(&sample_state(), 3).unwrap();
        assert!(snapshot.verify().is_ok());
        assert_eq!(snapshot.checksum.len(), 64);
    }

    #[test]
    fn tampered_state_fails_verification() {
        let mut snapshot = Snapshot::capture(&sample_state(), 3).unwrap();
        for npc in snapshot.state.npcs.values_mut() {
            npc.health = 1;
        }
        assert!(matches!(snapshot.verify(), Err(SnapshotError::Corrupted { .. })));
    }

    #[test]
    fn checksum_covers_version() {
        let state = sample_state();
        assert_ne!(
            Snapshot::compute_checksum(1, &state).unwrap(),
            Snapshot::compute_checksum(2, &state).unwrap()
        );
        assert_eq!(state_checksum(&state).unwrap(), state_checksum(&state.clone()).unwrap());
    }

    #[test]
    fn history_evicts_oldest() {
        let mut history = SnapshotHistory::new(2);
        let state = GameState::new();
        let first = Snapshot::capture(&state, 1).unwrap();
        let first_id = first.id;
        assert!(history.push(first).is_none());
        assert!(history.push(Snapshot::capture(&state, 2).unwrap()).is_none());
        let evicted = history.push(Snapshot::capture(&state, 3).unwrap()).unwrap();
        assert_eq!(evicted.id, first_id);
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().unwrap().version, 3);
        assert!(history.get(first_id).is_none());
    }
}
