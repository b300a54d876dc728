//! Write-through entity cache.
//!
//! Avoids a storage round trip for every entity read/write while applying a
//! single block. By the time a block's commits finish, every dirty entity
//! is drained into a [`WriteBatch`] and made visible to persistence in one
//! atomic step.
//!
//! The cache is owned by the indexing engine with an explicit lifecycle:
//! `invalidate_above` before a revert, `reset` after a failed attempt.

use std::collections::{HashMap, VecDeque};

use crate::error::IndexerError;
use crate::models::{Account, BakingRight, Block, CycleInfo, StakingUpdate, TransactionOp};
use crate::protocol::Protocol;
use crate::state::AppState;
use crate::store::{Storage, WriteBatch};
use crate::types::{AccountId, Address, CycleIndex, Level};

// ─── Cache entries ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry<T> {
    current: T,
    /// As-loaded copy; `None` means the entity was created this block.
    loaded: Option<T>,
    dirty: bool,
    /// Level at which this entry was last touched, for reorg invalidation.
    touched: Level,
}

impl<T: Clone> Entry<T> {
    fn clean(value: T, level: Level) -> Self {
        Self { loaded: Some(value.clone()), current: value, dirty: false, touched: level }
    }

    fn created(value: T, level: Level) -> Self {
        Self { current: value, loaded: None, dirty: true, touched: level }
    }

    /// After a flush the persisted image matches `current`.
    fn settle(&mut self) {
        self.loaded = Some(self.current.clone());
        self.dirty = false;
    }
}

// ─── Bounded lookup map ──────────────────────────────────────────────────────

/// Insert-order-evicting map for unbounded-cardinality lookups
/// (address → account id), so memory stays flat regardless of chain length.
#[derive(Debug)]
struct BoundedMap {
    capacity: usize,
    map: HashMap<Address, (AccountId, Level)>,
    order: VecDeque<Address>,
}

impl BoundedMap {
    fn new(capacity: usize) -> Self {
        Self { capacity, map: HashMap::new(), order: VecDeque::new() }
    }

    fn get(&self, address: &str) -> Option<AccountId> {
        self.map.get(address).map(|(id, _)| *id)
    }

    fn insert(&mut self, address: Address, id: AccountId, level: Level) {
        if self.map.insert(address.clone(), (id, level)).is_none() {
            self.order.push_back(address);
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
    }

    fn remove(&mut self, address: &str) {
        if self.map.remove(address).is_some() {
            self.order.retain(|a| a != address);
        }
    }

    fn drop_above(&mut self, level: Level) {
        self.map.retain(|_, (_, touched)| *touched <= level);
        let map = &self.map;
        self.order.retain(|a| map.contains_key(a));
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

// ─── EntityCache ─────────────────────────────────────────────────────────────

/// Default capacity of the address → id lookup.
const ADDRESS_CACHE_CAPACITY: usize = 65_536;

/// In-memory, write-through view of the mutable entities touched while
/// applying one block.
pub struct EntityCache {
    state: AppState,
    level: Level,
    accounts: HashMap<AccountId, Entry<Account>>,
    address_ids: BoundedMap,
    protocols: HashMap<i32, Entry<Protocol>>,
    // Append/delete sets drained into the next batch.
    blocks_put: Vec<Block>,
    blocks_del: Vec<Level>,
    accounts_del: Vec<AccountId>,
    protocols_del: Vec<i32>,
    cycles_put: Vec<CycleInfo>,
    cycles_del: Vec<CycleIndex>,
    rights_put: Vec<BakingRight>,
    rights_del_cycles: Vec<CycleIndex>,
    staking_put: Vec<StakingUpdate>,
    staking_del: Vec<i64>,
    transactions_put: Vec<TransactionOp>,
    transactions_del: Vec<i64>,
}

impl EntityCache {
    pub fn new(state: AppState) -> Self {
        let level = state.level;
        Self {
            state,
            level,
            accounts: HashMap::new(),
            address_ids: BoundedMap::new(ADDRESS_CACHE_CAPACITY),
            protocols: HashMap::new(),
            blocks_put: vec![],
            blocks_del: vec![],
            accounts_del: vec![],
            protocols_del: vec![],
            cycles_put: vec![],
            cycles_del: vec![],
            rights_put: vec![],
            rights_del_cycles: vec![],
            staking_put: vec![],
            staking_del: vec![],
            transactions_put: vec![],
            transactions_del: vec![],
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    pub fn restore_state(&mut self, state: AppState) {
        self.state = state;
    }

    /// Set the working level; entries touched from now on carry it.
    pub fn begin_level(&mut self, level: Level) {
        self.level = level;
    }

    // ── Accounts ──────────────────────────────────────────────────────────────

    async fn load_account(
        &mut self,
        store: &dyn Storage,
        id: AccountId,
    ) -> Result<(), IndexerError> {
        if !self.accounts.contains_key(&id) {
            let account = store.get_account(id).await?.ok_or_else(|| {
                IndexerError::Validation(format!("account {id} not found in storage"))
            })?;
            self.address_ids.insert(account.address.clone(), id, self.level);
            self.accounts.insert(id, Entry::clean(account, self.level));
        }
        Ok(())
    }

    /// Read an account, loading it from storage on miss.
    pub async fn account(
        &mut self,
        store: &dyn Storage,
        id: AccountId,
    ) -> Result<&Account, IndexerError> {
        self.load_account(store, id).await?;
        let entry = self.accounts.get_mut(&id).expect("loaded above");
        entry.touched = self.level;
        Ok(&entry.current)
    }

    /// Mutable access; marks the entry dirty so it flushes with the block.
    pub async fn account_mut(
        &mut self,
        store: &dyn Storage,
        id: AccountId,
    ) -> Result<&mut Account, IndexerError> {
        self.load_account(store, id).await?;
        let entry = self.accounts.get_mut(&id).expect("loaded above");
        entry.touched = self.level;
        entry.dirty = true;
        Ok(&mut entry.current)
    }

    /// Resolve an address to an account id, consulting the bounded lookup
    /// first and storage on miss.
    pub async fn account_id_by_address(
        &mut self,
        store: &dyn Storage,
        address: &str,
    ) -> Result<Option<AccountId>, IndexerError> {
        if let Some(id) = self.address_ids.get(address) {
            return Ok(Some(id));
        }
        match store.get_account_by_address(address).await? {
            Some(account) => {
                let id = account.id;
                self.address_ids.insert(account.address.clone(), id, self.level);
                self.accounts.entry(id).or_insert_with(|| Entry::clean(account, self.level));
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Register a newly created account.
    pub fn add_account(&mut self, account: Account) {
        self.address_ids.insert(account.address.clone(), account.id, self.level);
        self.accounts.insert(account.id, Entry::created(account, self.level));
    }

    /// Idempotent re-registration: a commit that already holds an entity
    /// instance can attach it so later commits share the same in-flight
    /// mutation. A no-op when the id is already cached.
    pub fn try_attach_account(&mut self, account: Account) {
        self.address_ids.insert(account.address.clone(), account.id, self.level);
        self.accounts
            .entry(account.id)
            .or_insert_with(|| Entry::clean(account, self.level));
    }

    /// Drop an account row (revert of a creation).
    pub fn delete_account(&mut self, id: AccountId) {
        if let Some(entry) = self.accounts.remove(&id) {
            self.address_ids.remove(&entry.current.address);
        }
        self.accounts_del.push(id);
    }

    // ── Protocols ─────────────────────────────────────────────────────────────

    pub async fn protocol_mut(
        &mut self,
        store: &dyn Storage,
        code: i32,
    ) -> Result<&mut Protocol, IndexerError> {
        if !self.protocols.contains_key(&code) {
            let protocol = store.get_protocol(code).await?.ok_or_else(|| {
                IndexerError::Validation(format!("protocol {code} not found in storage"))
            })?;
            self.protocols.insert(code, Entry::clean(protocol, self.level));
        }
        let entry = self.protocols.get_mut(&code).expect("loaded above");
        entry.touched = self.level;
        entry.dirty = true;
        Ok(&mut entry.current)
    }

    pub fn add_protocol(&mut self, protocol: Protocol) {
        self.protocols.insert(protocol.code, Entry::created(protocol, self.level));
    }

    pub fn delete_protocol(&mut self, code: i32) {
        self.protocols.remove(&code);
        self.protocols_del.push(code);
    }

    // ── Append-only rows ──────────────────────────────────────────────────────

    pub fn push_block(&mut self, block: Block) {
        self.blocks_put.push(block);
    }

    pub fn delete_block(&mut self, level: Level) {
        self.blocks_del.push(level);
    }

    pub fn push_cycle(&mut self, cycle: CycleInfo) {
        self.cycles_put.push(cycle);
    }

    pub fn delete_cycle(&mut self, index: CycleIndex) {
        self.cycles_del.push(index);
    }

    pub fn push_rights(&mut self, rights: Vec<BakingRight>) {
        self.rights_put.extend(rights);
    }

    pub fn delete_rights_for_cycle(&mut self, cycle: CycleIndex) {
        self.rights_del_cycles.push(cycle);
    }

    pub fn push_staking_update(&mut self, update: StakingUpdate) {
        self.staking_put.push(update);
    }

    pub fn delete_staking_update(&mut self, id: i64) {
        self.staking_del.push(id);
    }

    pub fn push_transaction(&mut self, op: TransactionOp) {
        self.transactions_put.push(op);
    }

    pub fn delete_transaction(&mut self, id: i64) {
        self.transactions_del.push(id);
    }

    // ── Accounting / lifecycle ────────────────────────────────────────────────

    /// Net change of `balance + frozen_deposits` across all cached accounts
    /// since they were loaded. Used for the per-block conservation check.
    pub fn balance_flow(&self) -> i64 {
        self.accounts
            .values()
            .map(|e| {
                let before = e.loaded.as_ref().map(|a| a.total_balance()).unwrap_or(0);
                e.current.total_balance() - before
            })
            .sum()
    }

    /// Drain everything dirty into a write batch, settling entries so the
    /// cache's image matches what persistence is about to hold.
    pub fn take_batch(&mut self) -> WriteBatch {
        let mut accounts_put: Vec<Account> = self
            .accounts
            .values()
            .filter(|e| e.dirty)
            .map(|e| e.current.clone())
            .collect();
        accounts_put.sort_by_key(|a| a.id);
        let mut protocols_put: Vec<Protocol> = self
            .protocols
            .values()
            .filter(|e| e.dirty)
            .map(|e| e.current.clone())
            .collect();
        protocols_put.sort_by_key(|p| p.code);
        for entry in self.accounts.values_mut() {
            entry.settle();
        }
        for entry in self.protocols.values_mut() {
            entry.settle();
        }
        WriteBatch {
            state: Some(self.state.clone()),
            blocks_put: std::mem::take(&mut self.blocks_put),
            blocks_del: std::mem::take(&mut self.blocks_del),
            accounts_put,
            accounts_del: std::mem::take(&mut self.accounts_del),
            protocols_put,
            protocols_del: std::mem::take(&mut self.protocols_del),
            cycles_put: std::mem::take(&mut self.cycles_put),
            cycles_del: std::mem::take(&mut self.cycles_del),
            rights_put: std::mem::take(&mut self.rights_put),
            rights_del_cycles: std::mem::take(&mut self.rights_del_cycles),
            staking_put: std::mem::take(&mut self.staking_put),
            staking_del: std::mem::take(&mut self.staking_del),
            transactions_put: std::mem::take(&mut self.transactions_put),
            transactions_del: std::mem::take(&mut self.transactions_del),
        }
    }

    /// Drop every entry last touched above `level`. Must run before a
    /// revert so a cached stale value cannot survive into the reverted
    /// state.
    pub fn invalidate_above(&mut self, level: Level) {
        self.accounts.retain(|_, e| e.touched <= level);
        self.protocols.retain(|_, e| e.touched <= level);
        self.address_ids.drop_above(level);
    }

    /// Clear every cached entry and pending write. Called after a failed
    /// block attempt; the state snapshot is restored separately.
    pub fn reset(&mut self) {
        self.accounts.clear();
        self.protocols.clear();
        self.address_ids.clear();
        self.blocks_put.clear();
        self.blocks_del.clear();
        self.accounts_del.clear();
        self.protocols_del.clear();
        self.cycles_put.clear();
        self.cycles_del.clear();
        self.rights_put.clear();
        self.rights_del_cycles.clear();
        self.staking_put.clear();
        self.staking_del.clear();
        self.transactions_put.clear();
        self.transactions_del.clear();
    }

    /// Number of cached account entries (observability).
    pub fn cached_accounts(&self) -> usize {
        self.accounts.len()
    }

    /// Number of cached address mappings (observability).
    pub fn cached_addresses(&self) -> usize {
        self.address_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal storage stub: account lookups served from a fixed list,
    /// everything else empty.
    struct StubStore {
        accounts: Vec<Account>,
    }

    #[async_trait::async_trait]
    impl Storage for StubStore {
        async fn schema_version(&self) -> Result<Option<i32>, IndexerError> {
            Ok(Some(crate::store::SCHEMA_VERSION))
        }
        async fn load_app_state(&self) -> Result<Option<AppState>, IndexerError> {
            Ok(None)
        }
        async fn get_block(&self, _: Level) -> Result<Option<Block>, IndexerError> {
            Ok(None)
        }
        async fn get_account(&self, id: AccountId) -> Result<Option<Account>, IndexerError> {
            Ok(self.accounts.iter().find(|a| a.id == id).cloned())
        }
        async fn get_account_by_address(
            &self,
            address: &str,
        ) -> Result<Option<Account>, IndexerError> {
            Ok(self.accounts.iter().find(|a| a.address == address).cloned())
        }
        async fn list_delegates(&self) -> Result<Vec<Account>, IndexerError> {
            Ok(vec![])
        }
        async fn get_protocol(&self, _: i32) -> Result<Option<Protocol>, IndexerError> {
            Ok(None)
        }
        async fn get_cycle(&self, _: CycleIndex) -> Result<Option<CycleInfo>, IndexerError> {
            Ok(None)
        }
        async fn get_rights(&self, _: CycleIndex) -> Result<Vec<BakingRight>, IndexerError> {
            Ok(vec![])
        }
        async fn get_transactions(&self, _: Level) -> Result<Vec<TransactionOp>, IndexerError> {
            Ok(vec![])
        }
        async fn get_staking_updates(
            &self,
            _: Level,
        ) -> Result<Vec<StakingUpdate>, IndexerError> {
            Ok(vec![])
        }
        async fn last_activity_level(
            &self,
            _: AccountId,
            _: Level,
        ) -> Result<Option<Level>, IndexerError> {
            Ok(None)
        }
        async fn apply_batch(&self, _: &WriteBatch) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    fn account(id: AccountId, address: &str) -> Account {
        Account::new_user(id, address, 1)
    }

    #[tokio::test]
    async fn miss_loads_from_storage_and_caches() {
        let store = StubStore { accounts: vec![account(1, "tz1aaa")] };
        let mut cache = EntityCache::new(AppState::bootstrap("BLg", 0));
        cache.begin_level(2);

        let acc = cache.account(&store, 1).await.unwrap();
        assert_eq!(acc.address, "tz1aaa");
        assert_eq!(cache.cached_accounts(), 1);

        // Second read hits the cache even if the store no longer has it.
        let empty = StubStore { accounts: vec![] };
        assert!(cache.account(&empty, 1).await.is_ok());
    }

    #[tokio::test]
    async fn reads_do_not_flush_writes_do() {
        let store = StubStore { accounts: vec![account(1, "tz1aaa")] };
        let mut cache = EntityCache::new(AppState::bootstrap("BLg", 0));
        cache.begin_level(2);

        cache.account(&store, 1).await.unwrap();
        assert!(cache.take_batch().accounts_put.is_empty());

        cache.account_mut(&store, 1).await.unwrap().balance += 10;
        let batch = cache.take_batch();
        assert_eq!(batch.accounts_put.len(), 1);
        assert_eq!(batch.accounts_put[0].balance, 10);

        // Settled: no further flush until mutated again.
        assert!(cache.take_batch().accounts_put.is_empty());
    }

    #[tokio::test]
    async fn try_attach_is_idempotent() {
        let store = StubStore { accounts: vec![] };
        let mut cache = EntityCache::new(AppState::bootstrap("BLg", 0));
        cache.begin_level(1);

        let mut acc = account(7, "tz1bbb");
        acc.balance = 100;
        cache.try_attach_account(acc.clone());
        acc.balance = 999; // second attach must not clobber the first
        cache.try_attach_account(acc);

        assert_eq!(cache.account(&store, 7).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn balance_flow_tracks_total_balance_delta() {
        let store = StubStore { accounts: vec![account(1, "tz1aaa"), account(2, "tz1bbb")] };
        let mut cache = EntityCache::new(AppState::bootstrap("BLg", 0));
        cache.begin_level(2);

        cache.account_mut(&store, 1).await.unwrap().balance += 50;
        cache.account_mut(&store, 2).await.unwrap().balance -= 20;
        cache.account_mut(&store, 2).await.unwrap().frozen_deposits += 20;
        assert_eq!(cache.balance_flow(), 50);
    }

    #[tokio::test]
    async fn invalidate_drops_entries_above_target() {
        let store = StubStore { accounts: vec![account(1, "tz1aaa"), account(2, "tz1bbb")] };
        let mut cache = EntityCache::new(AppState::bootstrap("BLg", 0));

        cache.begin_level(5);
        cache.account(&store, 1).await.unwrap();
        cache.begin_level(6);
        cache.account(&store, 2).await.unwrap();

        cache.invalidate_above(5);
        assert_eq!(cache.cached_accounts(), 1);
        assert_eq!(cache.cached_addresses(), 1);
        assert_eq!(
            cache.account_id_by_address(&store, "tz1aaa").await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn bounded_address_map_evicts_oldest() {
        let mut map = BoundedMap::new(2);
        map.insert("a".into(), 1, 1);
        map.insert("b".into(), 2, 1);
        map.insert("c".into(), 3, 1);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), None);
        assert_eq!(map.get("b"), Some(2));
        assert_eq!(map.get("c"), Some(3));
    }

    #[tokio::test]
    async fn new_account_flushes_and_deletes_propagate() {
        let mut cache = EntityCache::new(AppState::bootstrap("BLg", 0));
        cache.begin_level(3);
        cache.add_account(account(9, "tz1new"));

        let batch = cache.take_batch();
        assert_eq!(batch.accounts_put.len(), 1);

        cache.delete_account(9);
        let batch = cache.take_batch();
        assert_eq!(batch.accounts_del, vec![9]);
        assert_eq!(cache.cached_accounts(), 0);
    }
}
