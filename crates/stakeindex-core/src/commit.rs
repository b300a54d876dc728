//! The reversible unit-of-work framework.
//!
//! A protocol handler is an ordered sequence of commits. `apply` runs them
//! in declared order inside one atomic batch; `revert` runs the same
//! sequence in reverse. Each commit must be undoable from persisted rows
//! alone (a process restart rolls back a partially-synced head from a cold
//! cache), so nothing needed for reversal may live only in memory.

use async_trait::async_trait;

use crate::cache::EntityCache;
use crate::error::IndexerError;
use crate::models::{Account, Block};
use crate::protocol::ProtoConstants;
use crate::store::Storage;
use crate::types::{AccountId, RawBlock};

/// Everything a commit may touch while applying or reverting one block.
pub struct CommitContext<'a> {
    pub store: &'a dyn Storage,
    pub cache: &'a mut EntityCache,
    /// The block row being built (apply) or the persisted row (revert).
    pub block: &'a mut Block,
    /// Decoded payload; `None` during revert — reverts read persisted rows.
    pub raw: Option<&'a RawBlock>,
    pub constants: &'a ProtoConstants,
}

impl<'a> CommitContext<'a> {
    /// The decoded payload, required. Calling this from a revert path is a
    /// framework bug.
    pub fn raw(&self) -> Result<&'a RawBlock, IndexerError> {
        self.raw.ok_or_else(|| {
            IndexerError::Validation("raw block not available during revert".into())
        })
    }

    /// Resolve an address that must already exist.
    pub async fn existing_account_id(&mut self, address: &str) -> Result<AccountId, IndexerError> {
        self.cache
            .account_id_by_address(self.store, address)
            .await?
            .ok_or_else(|| IndexerError::Validation(format!("unknown account {address}")))
    }

    /// Resolve an address, creating a fresh plain account on first sight.
    pub async fn account_id_or_create(
        &mut self,
        address: &str,
    ) -> Result<AccountId, IndexerError> {
        if let Some(id) = self.cache.account_id_by_address(self.store, address).await? {
            return Ok(id);
        }
        let id = self.cache.state_mut().next_account_id();
        let account = Account::new_user(id, address, self.block.level);
        self.cache.add_account(account);
        Ok(id)
    }

    /// Restore an account's `last_level` from persisted rows after a revert
    /// removed its most recent activity. Rows of the block being unwound
    /// are still persisted at this point, so the lookup is bounded below
    /// the current level.
    pub async fn restore_last_level(&mut self, id: AccountId) -> Result<(), IndexerError> {
        let level = self
            .store
            .last_activity_level(id, self.block.level)
            .await?
            .unwrap_or(self.cache.account(self.store, id).await?.first_level);
        let account = self.cache.account_mut(self.store, id).await?;
        account.last_level = level;
        Ok(())
    }
}

/// One reversible unit of state change within a block's application.
#[async_trait]
pub trait Commit: Send + Sync {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    async fn apply(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError>;

    async fn revert(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError>;
}

/// One-time context migration run when the chain crosses a protocol
/// boundary. `deactivate` is the exact inverse of `activate`.
#[async_trait]
pub trait Migration: Send + Sync {
    async fn activate(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError>;

    async fn deactivate(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError>;
}
