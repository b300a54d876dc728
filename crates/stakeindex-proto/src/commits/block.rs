//! Block-level commit: baker attribution, boundary event flags, issuance.

use async_trait::async_trait;

use stakeindex_core::commit::{Commit, CommitContext};
use stakeindex_core::error::IndexerError;
use stakeindex_core::types::block_events;

/// First commit of every block. Later commits rely on `block.baker_id` and
/// the event flags computed here.
pub struct BlockCommit;

#[async_trait]
impl Commit for BlockCommit {
    fn name(&self) -> &'static str {
        "block"
    }

    async fn apply(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError> {
        let raw = ctx.raw()?;
        let level = ctx.block.level;

        // The baker must already be a registered delegate.
        let baker_id = ctx
            .cache
            .account_id_by_address(ctx.store, &raw.baker)
            .await?
            .ok_or_else(|| IndexerError::Validation(format!("unknown baker {}", raw.baker)))?;
        if !ctx.cache.account(ctx.store, baker_id).await?.is_delegate() {
            return Err(IndexerError::Validation(format!(
                "baker {} is not a delegate",
                raw.baker
            )));
        }
        ctx.block.baker_id = Some(baker_id);

        let constants = ctx.constants;
        if constants.is_cycle_start(level) {
            ctx.block.events |= block_events::CYCLE_BEGIN;
        }
        if constants.is_cycle_end(level) {
            ctx.block.events |= block_events::CYCLE_END;
        }
        if constants.is_snapshot_level(level) {
            ctx.block.events |= block_events::BALANCE_SNAPSHOT;
        }

        ctx.block.reward += constants.block_reward;
        let baker = ctx.cache.account_mut(ctx.store, baker_id).await?;
        baker.balance += constants.block_reward;
        baker.last_level = level;
        Ok(())
    }

    async fn revert(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError> {
        let baker_id = ctx
            .block
            .baker_id
            .ok_or_else(|| IndexerError::Validation("persisted block has no baker".into()))?;
        let reward = ctx.constants.block_reward;
        let baker = ctx.cache.account_mut(ctx.store, baker_id).await?;
        baker.balance -= reward;
        ctx.restore_last_level(baker_id).await?;
        Ok(())
    }
}
