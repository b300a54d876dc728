//! Persisted entity rows.
//!
//! Every row carries enough information to undo its own creation or
//! mutation: reverts read these rows back from storage, never from memory
//! kept across blocks.

use serde::{Deserialize, Serialize};

use crate::types::{
    AccountId, Address, BlockHash, CycleIndex, Level, Mutez, OpHash, OpId, OpStatus,
};

// ─── Block ───────────────────────────────────────────────────────────────────

/// One row per chain level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub level: Level,
    pub hash: BlockHash,
    pub predecessor: BlockHash,
    /// Unix seconds.
    pub timestamp: i64,
    /// Version code of the protocol that produced this block.
    pub proto_code: i32,
    pub baker_id: Option<AccountId>,
    /// Bitmask of [`crate::types::block_events`] flags.
    pub events: u32,
    /// Bitmask of [`crate::types::op_kinds`] present in this block.
    pub operations: u32,
    /// Total newly minted in this block (baker reward + one-off credits).
    pub reward: Mutez,
    /// Total fees paid to the baker in this block.
    pub fees: Mutez,
    /// Total destroyed in this block.
    pub burned: Mutez,
}

impl Block {
    /// Returns `true` if the given event flag is set.
    pub fn has_event(&self, flag: u32) -> bool {
        self.events & flag != 0
    }
}

// ─── Account ─────────────────────────────────────────────────────────────────

/// Classification of an account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Plain user account.
    User,
    /// Baker: entitled to produce and attest blocks, weighted by stake.
    Delegate,
    /// Smart contract.
    Contract,
    /// Address seen on chain but never classified.
    Ghost,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Delegate => "delegate",
            Self::Contract => "contract",
            Self::Ghost => "ghost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "delegate" => Some(Self::Delegate),
            "contract" => Some(Self::Contract),
            "ghost" => Some(Self::Ghost),
            _ => None,
        }
    }
}

/// One row per address. Delegate-only fields are zero/None for other kinds.
///
/// Invariant: every address maps to exactly one row, and `balance` plus
/// `frozen_deposits` always reconciles to the sum of operation effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub address: Address,
    pub kind: AccountKind,
    /// Spendable balance.
    pub balance: Mutez,
    /// Last operation counter used by this account as a sender.
    pub counter: i64,
    pub delegate_id: Option<AccountId>,
    /// Delegate only: own stake plus stake delegated to it.
    pub staking_balance: Mutez,
    /// Delegate only: funds locked as security deposits.
    pub frozen_deposits: Mutez,
    /// Delegate only.
    pub delegators_count: i64,
    /// Delegate only: level at which the delegate was registered.
    pub activation_level: Option<Level>,
    /// Delegate only: level at which the delegate was deactivated.
    pub deactivation_level: Option<Level>,
    /// Delegate only: first byte of the revealed public key, used by the
    /// rights sampler's tie-break ordering.
    pub pubkey_first_byte: Option<u8>,
    pub first_level: Level,
    pub last_level: Level,
}

impl Account {
    /// A freshly seen plain account with no history.
    pub fn new_user(id: AccountId, address: impl Into<Address>, level: Level) -> Self {
        Self {
            id,
            address: address.into(),
            kind: AccountKind::User,
            balance: 0,
            counter: 0,
            delegate_id: None,
            staking_balance: 0,
            frozen_deposits: 0,
            delegators_count: 0,
            activation_level: None,
            deactivation_level: None,
            pubkey_first_byte: None,
            first_level: level,
            last_level: level,
        }
    }

    pub fn is_delegate(&self) -> bool {
        self.kind == AccountKind::Delegate
    }

    /// Total funds attributable to this account (spendable + frozen).
    pub fn total_balance(&self) -> Mutez {
        self.balance + self.frozen_deposits
    }
}

// ─── Cycle / rights / staking ────────────────────────────────────────────────

/// One entry of a cycle's frozen stake distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub baker_id: AccountId,
    pub stake: Mutez,
}

/// Snapshot of total baking power and the stake distribution for one cycle.
/// The sampling input is persisted so rights stay reproducible and
/// revertible from storage alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleInfo {
    pub index: CycleIndex,
    pub first_level: Level,
    pub last_level: Level,
    /// Level whose stake distribution was frozen into `snapshot`.
    pub snapshot_level: Level,
    pub total_staking: Mutez,
    /// Hex-encoded 32-byte cycle seed.
    pub seed: String,
    /// Ordered `(baker, stake)` pairs as fed to the sampler.
    pub snapshot: Vec<SnapshotEntry>,
}

/// Kind of a precomputed duty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RightKind {
    Baking,
    Attesting,
}

impl RightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baking => "baking",
            Self::Attesting => "attesting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "baking" => Some(Self::Baking),
            "attesting" => Some(Self::Attesting),
            _ => None,
        }
    }
}

/// Deterministic assignment of one duty slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakingRight {
    pub cycle: CycleIndex,
    pub level: Level,
    pub kind: RightKind,
    /// Baking: priority round. Attesting: slot index.
    pub round: i32,
    pub baker_id: AccountId,
}

/// Kind of a persisted stake movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StakingUpdateKind {
    Stake,
    Unstake,
    Slash,
}

impl StakingUpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stake => "stake",
            Self::Unstake => "unstake",
            Self::Slash => "slash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stake" => Some(Self::Stake),
            "unstake" => Some(Self::Unstake),
            "slash" => Some(Self::Slash),
            _ => None,
        }
    }
}

/// Append-only ledger of every stake/unstake/slash event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingUpdate {
    pub id: i64,
    pub level: Level,
    pub cycle: CycleIndex,
    pub baker_id: AccountId,
    pub staker_id: AccountId,
    pub kind: StakingUpdateKind,
    pub amount: Mutez,
    /// Causing operation, when one exists (None for protocol-originated
    /// events such as slashes).
    pub op_id: Option<OpId>,
}

// ─── Operations ──────────────────────────────────────────────────────────────

/// The representative operation table: token transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOp {
    pub id: OpId,
    pub level: Level,
    pub op_hash: OpHash,
    pub counter: i64,
    pub sender_id: AccountId,
    pub target_id: AccountId,
    pub amount: Mutez,
    pub fee: Mutez,
    pub burned: Mutez,
    pub status: OpStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_kind_roundtrip() {
        for k in [AccountKind::User, AccountKind::Delegate, AccountKind::Contract, AccountKind::Ghost] {
            assert_eq!(AccountKind::parse(k.as_str()), Some(k));
        }
    }

    #[test]
    fn block_event_check() {
        let block = Block {
            level: 1,
            hash: "BL1".into(),
            predecessor: "BL0".into(),
            timestamp: 0,
            proto_code: 1,
            baker_id: None,
            events: crate::types::block_events::CYCLE_BEGIN,
            operations: 0,
            reward: 0,
            fees: 0,
            burned: 0,
        };
        assert!(block.has_event(crate::types::block_events::CYCLE_BEGIN));
        assert!(!block.has_event(crate::types::block_events::CYCLE_END));
    }
}
