//! Storage contract: everything persisted for one block travels in a single
//! [`WriteBatch`], applied atomically by the backend.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::models::{Account, BakingRight, Block, CycleInfo, StakingUpdate, TransactionOp};
use crate::protocol::Protocol;
use crate::state::AppState;
use crate::types::{AccountId, CycleIndex, Level};

/// Version of the persisted relational schema. Backends refuse to start
/// when the stored version differs.
pub const SCHEMA_VERSION: i32 = 1;

/// All writes produced by applying or reverting one block.
///
/// Deletes are executed before upserts by every backend, and the whole
/// batch is atomic: a partial failure leaves storage exactly as it was.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub state: Option<AppState>,
    pub blocks_put: Vec<Block>,
    pub blocks_del: Vec<Level>,
    pub accounts_put: Vec<Account>,
    pub accounts_del: Vec<AccountId>,
    pub protocols_put: Vec<Protocol>,
    pub protocols_del: Vec<i32>,
    pub cycles_put: Vec<CycleInfo>,
    pub cycles_del: Vec<CycleIndex>,
    pub rights_put: Vec<BakingRight>,
    /// Rights are deleted per cycle (the granularity they are created at).
    pub rights_del_cycles: Vec<CycleIndex>,
    pub staking_put: Vec<StakingUpdate>,
    pub staking_del: Vec<i64>,
    pub transactions_put: Vec<TransactionOp>,
    pub transactions_del: Vec<i64>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.blocks_put.is_empty()
            && self.blocks_del.is_empty()
            && self.accounts_put.is_empty()
            && self.accounts_del.is_empty()
            && self.protocols_put.is_empty()
            && self.protocols_del.is_empty()
            && self.cycles_put.is_empty()
            && self.cycles_del.is_empty()
            && self.rights_put.is_empty()
            && self.rights_del_cycles.is_empty()
            && self.staking_put.is_empty()
            && self.staking_del.is_empty()
            && self.transactions_put.is_empty()
            && self.transactions_del.is_empty()
    }
}

/// Persistence backend. Implementations: in-memory (tests) and SQLite.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Version of the schema currently on disk, if initialized.
    async fn schema_version(&self) -> Result<Option<i32>, IndexerError>;

    async fn load_app_state(&self) -> Result<Option<AppState>, IndexerError>;

    async fn get_block(&self, level: Level) -> Result<Option<Block>, IndexerError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, IndexerError>;

    async fn get_account_by_address(&self, address: &str) -> Result<Option<Account>, IndexerError>;

    /// All delegate accounts, ordered by id.
    async fn list_delegates(&self) -> Result<Vec<Account>, IndexerError>;

    async fn get_protocol(&self, code: i32) -> Result<Option<Protocol>, IndexerError>;

    async fn get_cycle(&self, index: CycleIndex) -> Result<Option<CycleInfo>, IndexerError>;

    /// Rights of one cycle, in generation order.
    async fn get_rights(&self, cycle: CycleIndex) -> Result<Vec<BakingRight>, IndexerError>;

    /// Transactions of one level, in id order.
    async fn get_transactions(&self, level: Level) -> Result<Vec<TransactionOp>, IndexerError>;

    /// Staking updates of one level, in id order.
    async fn get_staking_updates(&self, level: Level) -> Result<Vec<StakingUpdate>, IndexerError>;

    /// Highest level strictly below `before_level` at which `account`
    /// appears in any persisted row (as sender, target, staker or baker),
    /// or `None`. Used to restore `last_level` on revert from persisted
    /// state alone — the bound excludes the rows of the block currently
    /// being unwound.
    async fn last_activity_level(
        &self,
        account: AccountId,
        before_level: Level,
    ) -> Result<Option<Level>, IndexerError>;

    /// Apply all writes atomically.
    async fn apply_batch(&self, batch: &WriteBatch) -> Result<(), IndexerError>;
}
