//! Abstract interface to the remote chain node.
//!
//! The indexer computes rights and balances itself; the rights/delegate
//! endpoints exist only for the diagnostics cross-check.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{Address, BlockHash, CycleIndex, Level, Mutez, ProtocolHash};

/// Minimal header view of a remote block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    pub level: Level,
    pub hash: BlockHash,
    pub predecessor: BlockHash,
    /// Unix seconds.
    pub timestamp: i64,
    pub protocol: ProtocolHash,
}

/// One duty slot as reported by the node (diagnostics only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRight {
    pub level: Level,
    pub round: i32,
    pub delegate: Address,
}

/// Delegate snapshot as reported by the node (diagnostics only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDelegate {
    pub address: Address,
    pub balance: Mutez,
    pub staking_balance: Mutez,
    pub frozen_deposits: Mutez,
}

/// Contract/account snapshot as reported by the node (diagnostics only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContract {
    pub address: Address,
    pub balance: Mutez,
    pub counter: i64,
}

/// Everything the indexer consumes from a node.
#[async_trait]
pub trait NodeSource: Send + Sync + 'static {
    /// Current remote head.
    async fn get_head(&self) -> Result<NodeHeader, IndexerError>;

    /// Header at a specific level on the node's current canonical chain.
    async fn get_header(&self, level: Level) -> Result<NodeHeader, IndexerError>;

    /// Full raw block with operations and metadata, as loose JSON; the
    /// resolved protocol version's decoder gives it shape.
    async fn get_block(&self, level: Level) -> Result<serde_json::Value, IndexerError>;

    /// Baking rights for a cycle, as the node computes them.
    async fn get_baking_rights(&self, cycle: CycleIndex) -> Result<Vec<NodeRight>, IndexerError>;

    /// Attesting rights for a cycle; `round` carries the slot index.
    async fn get_attesting_rights(
        &self,
        cycle: CycleIndex,
    ) -> Result<Vec<NodeRight>, IndexerError>;

    /// Delegate snapshot at a level.
    async fn get_delegate(
        &self,
        level: Level,
        address: &str,
    ) -> Result<NodeDelegate, IndexerError>;

    /// Contract/account snapshot at a level.
    async fn get_contract(
        &self,
        level: Level,
        address: &str,
    ) -> Result<NodeContract, IndexerError>;
}
