//! Shared scalar types and the typed intermediate representation of a raw
//! block as fetched from the node.
//!
//! Node responses are decoded per protocol version into [`RawBlock`] by the
//! version's decoder; downstream commits only ever see this typed shape,
//! never loose JSON.

use serde::{Deserialize, Serialize};

// ─── Scalars ─────────────────────────────────────────────────────────────────

/// Sequential block height.
pub type Level = i64;

/// Index of a fixed-size window of levels over which stake snapshots and
/// rights are computed.
pub type CycleIndex = i64;

/// Surrogate account identifier assigned by the indexer.
pub type AccountId = i64;

/// Surrogate operation identifier assigned by the indexer.
pub type OpId = i64;

/// Smallest unit of the chain's token. Signed so deltas compose.
pub type Mutez = i64;

/// Base58 account address.
pub type Address = String;

/// Base58 block hash.
pub type BlockHash = String;

/// Base58 protocol hash.
pub type ProtocolHash = String;

/// Base58 operation group hash.
pub type OpHash = String;

// ─── Block event flags ───────────────────────────────────────────────────────

/// Bitmask of events attached to a block row. Downstream commits read these
/// to decide whether boundary-only logic runs.
pub mod block_events {
    /// First block of a protocol's validity window (activation ran here).
    pub const PROTOCOL_BEGIN: u32 = 1;
    /// Last block before a protocol switch.
    pub const PROTOCOL_END: u32 = 1 << 1;
    /// First block of a cycle (cycle row + rights are created here).
    pub const CYCLE_BEGIN: u32 = 1 << 2;
    /// Last block of a cycle.
    pub const CYCLE_END: u32 = 1 << 3;
    /// Stake distribution snapshot point.
    pub const BALANCE_SNAPSHOT: u32 = 1 << 4;
}

/// Bitmask of operation kinds present in a block.
pub mod op_kinds {
    pub const TRANSACTIONS: u32 = 1;
    pub const STAKING: u32 = 1 << 1;
}

// ─── Operation status ────────────────────────────────────────────────────────

/// Outcome of an operation as reported by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Applied,
    Failed,
    Backtracked,
    Skipped,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Backtracked => "backtracked",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "applied" => Some(Self::Applied),
            "failed" => Some(Self::Failed),
            "backtracked" => Some(Self::Backtracked),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Returns `true` if the operation's effects (beyond fees) were applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

// ─── Raw block IR ────────────────────────────────────────────────────────────

/// Header fields shared by every protocol version's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHeader {
    pub level: Level,
    pub hash: BlockHash,
    pub predecessor: BlockHash,
    /// Unix seconds.
    pub timestamp: i64,
    pub protocol: ProtocolHash,
    pub next_protocol: ProtocolHash,
}

/// One signed operation group (a batch of contents sharing a hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOperationGroup {
    pub hash: OpHash,
    pub contents: Vec<RawContent>,
}

/// A single operation content. One representative kind is modeled fully;
/// further kinds plug in as variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawContent {
    Transaction(RawTransaction),
}

/// A token transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub sender: Address,
    pub target: Address,
    pub amount: Mutez,
    pub fee: Mutez,
    /// Storage/allocation burn charged to the sender on top of the amount.
    pub burned: Mutez,
    /// Sender's operation counter; must be exactly previous + 1.
    pub counter: i64,
    pub status: OpStatus,
}

/// Kind of a protocol-tracked stake movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawStakingKind {
    Stake,
    Unstake,
    Slash,
}

/// A stake/unstake/slash event from block metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStakingEvent {
    pub kind: RawStakingKind,
    pub staker: Address,
    pub delegate: Address,
    pub amount: Mutez,
}

/// The typed intermediate representation of one block, produced by a
/// protocol version's decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    pub header: RawHeader,
    /// Block producer's address.
    pub baker: Address,
    pub operations: Vec<RawOperationGroup>,
    /// Protocol-originated stake movements (empty for versions without
    /// staking support).
    pub staking_events: Vec<RawStakingEvent>,
}
