//! Protocol rows and per-version constants.

use serde::{Deserialize, Serialize};

use crate::rights::TieBreak;
use crate::types::{Address, Level, Mutez, ProtocolHash};

/// Feature support declared by a protocol version. The dispatcher consults
/// these instead of calling a path and catching "not implemented".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Version emits stake/unstake/slash events in block metadata.
    pub staking_updates: bool,
    /// Version precomputes attesting rights alongside baking rights.
    pub attesting_rights: bool,
}

/// One protocol version's constants. Pinned per version in the handler
/// table; never inferred from an adjacent version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtoConstants {
    pub blocks_per_cycle: Level,
    /// Stake snapshots are taken every this many levels.
    pub blocks_per_snapshot: Level,
    /// Baker reward minted per block.
    pub block_reward: Mutez,
    /// Stake below this contributes zero sampling weight.
    pub minimal_stake: Mutez,
    /// Number of priority rounds precomputed per level.
    pub baking_rounds: u32,
    /// Number of attesting slots per level.
    pub attester_slots: u32,
    /// Candidate ordering rule for the rights sampler.
    pub tie_break: TieBreak,
    pub capabilities: Capabilities,
    /// One-off accounts credited by this version's activation migration.
    pub invoices: Vec<(Address, Mutez)>,
}

impl ProtoConstants {
    /// Cycle index containing `level` (levels are 1-based; level 0 is the
    /// genesis block and belongs to no cycle).
    pub fn cycle_of(&self, level: Level) -> i64 {
        debug_assert!(level >= 1);
        (level - 1) / self.blocks_per_cycle
    }

    /// First level of `cycle`.
    pub fn cycle_start(&self, cycle: i64) -> Level {
        cycle * self.blocks_per_cycle + 1
    }

    /// Last level of `cycle`.
    pub fn cycle_end(&self, cycle: i64) -> Level {
        (cycle + 1) * self.blocks_per_cycle
    }

    pub fn is_cycle_start(&self, level: Level) -> bool {
        level >= 1 && (level - 1) % self.blocks_per_cycle == 0
    }

    pub fn is_cycle_end(&self, level: Level) -> bool {
        level >= 1 && level % self.blocks_per_cycle == 0
    }

    pub fn is_snapshot_level(&self, level: Level) -> bool {
        level >= 1 && level % self.blocks_per_snapshot == 0
    }
}

/// Persisted description of one protocol version and its validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    /// Version code (1-based, in activation order).
    pub code: i32,
    pub hash: ProtocolHash,
    pub first_level: Level,
    /// `-1` while the protocol is still active.
    pub last_level: Level,
    pub constants: ProtoConstants,
}

impl Protocol {
    pub fn is_open(&self) -> bool {
        self.last_level < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants(blocks_per_cycle: Level) -> ProtoConstants {
        ProtoConstants {
            blocks_per_cycle,
            blocks_per_snapshot: 4,
            block_reward: 0,
            minimal_stake: 0,
            baking_rounds: 1,
            attester_slots: 0,
            tie_break: TieBreak::AddressBytes,
            capabilities: Capabilities { staking_updates: false, attesting_rights: false },
            invoices: vec![],
        }
    }

    #[test]
    fn cycle_arithmetic() {
        let c = constants(8);
        assert_eq!(c.cycle_of(1), 0);
        assert_eq!(c.cycle_of(8), 0);
        assert_eq!(c.cycle_of(9), 1);
        assert_eq!(c.cycle_start(0), 1);
        assert_eq!(c.cycle_end(0), 8);
        assert_eq!(c.cycle_start(2), 17);
        assert!(c.is_cycle_start(1));
        assert!(c.is_cycle_start(9));
        assert!(!c.is_cycle_start(2));
        assert!(c.is_cycle_end(8));
        assert!(!c.is_cycle_end(7));
    }

    #[test]
    fn snapshot_levels() {
        let c = constants(8);
        assert!(c.is_snapshot_level(4));
        assert!(c.is_snapshot_level(8));
        assert!(!c.is_snapshot_level(5));
    }
}
