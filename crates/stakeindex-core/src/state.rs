//! The AppState singleton — the single source of truth for "where are we".

use serde::{Deserialize, Serialize};

use crate::types::{AccountId, BlockHash, Level, OpId, ProtocolHash};

/// Singleton row tracking the indexer's position and its monotonic id
/// counters. Mutated by every applied block; never deleted, only rewound.
///
/// Counter invariant: each counter equals the highest id currently in use,
/// so `next_*` hands out `counter + 1` and a revert releases exactly the
/// number of ids the forward pass consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    /// Level of the last persisted block.
    pub level: Level,
    /// Hash of the last persisted block.
    pub hash: BlockHash,
    /// Active protocol (empty before the first activation).
    pub protocol: ProtocolHash,
    /// Protocol announced for the next block.
    pub next_protocol: ProtocolHash,
    /// Timestamp of the last persisted block (unix seconds).
    pub timestamp: i64,
    /// Most recent remote head level seen by the observer.
    pub known_head: Level,
    pub account_counter: AccountId,
    pub operation_counter: OpId,
    pub staking_update_counter: i64,
}

impl AppState {
    /// Fresh state anchored at a genesis block (level 0).
    pub fn bootstrap(genesis_hash: impl Into<BlockHash>, timestamp: i64) -> Self {
        Self {
            level: 0,
            hash: genesis_hash.into(),
            protocol: String::new(),
            next_protocol: String::new(),
            timestamp,
            known_head: 0,
            account_counter: 0,
            operation_counter: 0,
            staking_update_counter: 0,
        }
    }

    pub fn next_account_id(&mut self) -> AccountId {
        self.account_counter += 1;
        self.account_counter
    }

    pub fn next_operation_id(&mut self) -> OpId {
        self.operation_counter += 1;
        self.operation_counter
    }

    pub fn next_staking_update_id(&mut self) -> i64 {
        self.staking_update_counter += 1;
        self.staking_update_counter
    }

    /// Give back the last `count` account ids after a revert deleted the
    /// rows that used them.
    pub fn release_account_ids(&mut self, count: i64) {
        debug_assert!(count <= self.account_counter);
        self.account_counter -= count;
    }

    pub fn release_operation_ids(&mut self, count: i64) {
        debug_assert!(count <= self.operation_counter);
        self.operation_counter -= count;
    }

    pub fn release_staking_update_ids(&mut self, count: i64) {
        debug_assert!(count <= self.staking_update_counter);
        self.staking_update_counter -= count;
    }

    /// Returns `true` if the local head has caught up with the remote head.
    pub fn is_synced(&self) -> bool {
        self.level >= self.known_head
    }
}
