//! In-memory storage backend.
//!
//! Holds the full relational model in RAM behind one mutex, so a write
//! batch is trivially atomic. Useful for tests and ephemeral indexers; the
//! `dump` accessor exposes a deterministic snapshot of everything persisted
//! so tests can assert bit-identical state round trips.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use stakeindex_core::error::IndexerError;
use stakeindex_core::models::{
    Account, BakingRight, Block, CycleInfo, StakingUpdate, TransactionOp,
};
use stakeindex_core::protocol::Protocol;
use stakeindex_core::state::AppState;
use stakeindex_core::store::{Storage, WriteBatch, SCHEMA_VERSION};
use stakeindex_core::types::{AccountId, CycleIndex, Level};

#[derive(Debug, Default, Clone, PartialEq)]
struct Inner {
    state: Option<AppState>,
    blocks: BTreeMap<Level, Block>,
    accounts: BTreeMap<AccountId, Account>,
    protocols: BTreeMap<i32, Protocol>,
    cycles: BTreeMap<CycleIndex, CycleInfo>,
    /// Kept in insertion (generation) order.
    rights: Vec<BakingRight>,
    staking: BTreeMap<i64, StakingUpdate>,
    transactions: BTreeMap<i64, TransactionOp>,
}

/// Deterministic snapshot of everything persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageDump {
    pub state: Option<AppState>,
    pub blocks: Vec<Block>,
    pub accounts: Vec<Account>,
    pub protocols: Vec<Protocol>,
    pub cycles: Vec<CycleInfo>,
    pub rights: Vec<BakingRight>,
    pub staking: Vec<StakingUpdate>,
    pub transactions: Vec<TransactionOp>,
}

/// In-memory indexer storage. All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the entire store for equality assertions.
    pub fn dump(&self) -> StorageDump {
        let inner = self.inner.lock().unwrap();
        StorageDump {
            state: inner.state.clone(),
            blocks: inner.blocks.values().cloned().collect(),
            accounts: inner.accounts.values().cloned().collect(),
            protocols: inner.protocols.values().cloned().collect(),
            cycles: inner.cycles.values().cloned().collect(),
            rights: inner.rights.clone(),
            staking: inner.staking.values().cloned().collect(),
            transactions: inner.transactions.values().cloned().collect(),
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn schema_version(&self) -> Result<Option<i32>, IndexerError> {
        Ok(Some(SCHEMA_VERSION))
    }

    async fn load_app_state(&self) -> Result<Option<AppState>, IndexerError> {
        Ok(self.inner.lock().unwrap().state.clone())
    }

    async fn get_block(&self, level: Level) -> Result<Option<Block>, IndexerError> {
        Ok(self.inner.lock().unwrap().blocks.get(&level).cloned())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, IndexerError> {
        Ok(self.inner.lock().unwrap().accounts.get(&id).cloned())
    }

    async fn get_account_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Account>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .accounts
            .values()
            .find(|a| a.address == address)
            .cloned())
    }

    async fn list_delegates(&self) -> Result<Vec<Account>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .accounts
            .values()
            .filter(|a| a.is_delegate())
            .cloned()
            .collect())
    }

    async fn get_protocol(&self, code: i32) -> Result<Option<Protocol>, IndexerError> {
        Ok(self.inner.lock().unwrap().protocols.get(&code).cloned())
    }

    async fn get_cycle(&self, index: CycleIndex) -> Result<Option<CycleInfo>, IndexerError> {
        Ok(self.inner.lock().unwrap().cycles.get(&index).cloned())
    }

    async fn get_rights(&self, cycle: CycleIndex) -> Result<Vec<BakingRight>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .rights
            .iter()
            .filter(|r| r.cycle == cycle)
            .cloned()
            .collect())
    }

    async fn get_transactions(&self, level: Level) -> Result<Vec<TransactionOp>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .transactions
            .values()
            .filter(|t| t.level == level)
            .cloned()
            .collect())
    }

    async fn get_staking_updates(
        &self,
        level: Level,
    ) -> Result<Vec<StakingUpdate>, IndexerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .staking
            .values()
            .filter(|s| s.level == level)
            .cloned()
            .collect())
    }

    async fn last_activity_level(
        &self,
        account: AccountId,
        before_level: Level,
    ) -> Result<Option<Level>, IndexerError> {
        let inner = self.inner.lock().unwrap();
        let mut max: Option<Level> = None;
        let mut push = |level: Level| {
            if level < before_level {
                max = Some(max.map_or(level, |m: Level| m.max(level)));
            }
        };
        for b in inner.blocks.values() {
            if b.baker_id == Some(account) {
                push(b.level);
            }
        }
        for t in inner.transactions.values() {
            if t.sender_id == account || t.target_id == account {
                push(t.level);
            }
        }
        for s in inner.staking.values() {
            if s.baker_id == account || s.staker_id == account {
                push(s.level);
            }
        }
        Ok(max)
    }

    async fn apply_batch(&self, batch: &WriteBatch) -> Result<(), IndexerError> {
        let mut inner = self.inner.lock().unwrap();
        // Deletes first, then upserts, matching the SQLite backend.
        for level in &batch.blocks_del {
            inner.blocks.remove(level);
        }
        for id in &batch.accounts_del {
            inner.accounts.remove(id);
        }
        for code in &batch.protocols_del {
            inner.protocols.remove(code);
        }
        for index in &batch.cycles_del {
            inner.cycles.remove(index);
        }
        for cycle in &batch.rights_del_cycles {
            inner.rights.retain(|r| r.cycle != *cycle);
        }
        for id in &batch.staking_del {
            inner.staking.remove(id);
        }
        for id in &batch.transactions_del {
            inner.transactions.remove(id);
        }
        for block in &batch.blocks_put {
            inner.blocks.insert(block.level, block.clone());
        }
        for account in &batch.accounts_put {
            inner.accounts.insert(account.id, account.clone());
        }
        for protocol in &batch.protocols_put {
            inner.protocols.insert(protocol.code, protocol.clone());
        }
        for cycle in &batch.cycles_put {
            inner.cycles.insert(cycle.index, cycle.clone());
        }
        inner.rights.extend(batch.rights_put.iter().cloned());
        for update in &batch.staking_put {
            inner.staking.insert(update.id, update.clone());
        }
        for op in &batch.transactions_put {
            inner.transactions.insert(op.id, op.clone());
        }
        if let Some(state) = &batch.state {
            inner.state = Some(state.clone());
        }
        Ok(())
    }
}
