//! Staking commit — materializes stake/unstake/slash events into the
//! append-only staking ledger and the delegates' freezer balances.
//!
//! Only versions whose capabilities declare staking support include this
//! commit in their sequence; the dispatcher never calls it otherwise.

use async_trait::async_trait;

use stakeindex_core::commit::{Commit, CommitContext};
use stakeindex_core::error::IndexerError;
use stakeindex_core::models::{StakingUpdate, StakingUpdateKind};
use stakeindex_core::types::{op_kinds, RawStakingKind};

pub struct StakingCommit;

#[async_trait]
impl Commit for StakingCommit {
    fn name(&self) -> &'static str {
        "staking"
    }

    async fn apply(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError> {
        let raw = ctx.raw()?;
        if raw.staking_events.is_empty() {
            return Ok(());
        }
        let level = ctx.block.level;
        let cycle = ctx.constants.cycle_of(level);

        for event in &raw.staking_events {
            let staker_id = ctx.existing_account_id(&event.staker).await?;
            let delegate_id = ctx.existing_account_id(&event.delegate).await?;
            if !ctx.cache.account(ctx.store, delegate_id).await?.is_delegate() {
                return Err(IndexerError::Validation(format!(
                    "staking event targets non-delegate {}",
                    event.delegate
                )));
            }

            let kind = match event.kind {
                RawStakingKind::Stake => {
                    let staker = ctx.cache.account_mut(ctx.store, staker_id).await?;
                    if staker.balance < event.amount {
                        return Err(IndexerError::Validation(format!(
                            "malformed stake: {} exceeds balance of {}",
                            event.amount, event.staker
                        )));
                    }
                    staker.balance -= event.amount;
                    staker.last_level = level;
                    let delegate = ctx.cache.account_mut(ctx.store, delegate_id).await?;
                    delegate.frozen_deposits += event.amount;
                    delegate.staking_balance += event.amount;
                    delegate.last_level = level;
                    StakingUpdateKind::Stake
                }
                RawStakingKind::Unstake => {
                    let delegate = ctx.cache.account_mut(ctx.store, delegate_id).await?;
                    if delegate.frozen_deposits < event.amount {
                        return Err(IndexerError::Validation(format!(
                            "malformed unstake: {} exceeds freezer of {}",
                            event.amount, event.delegate
                        )));
                    }
                    delegate.frozen_deposits -= event.amount;
                    delegate.staking_balance -= event.amount;
                    delegate.last_level = level;
                    let staker = ctx.cache.account_mut(ctx.store, staker_id).await?;
                    staker.balance += event.amount;
                    staker.last_level = level;
                    StakingUpdateKind::Unstake
                }
                RawStakingKind::Slash => {
                    let delegate = ctx.cache.account_mut(ctx.store, delegate_id).await?;
                    if delegate.frozen_deposits < event.amount {
                        return Err(IndexerError::Validation(format!(
                            "malformed slash: {} exceeds freezer of {}",
                            event.amount, event.delegate
                        )));
                    }
                    delegate.frozen_deposits -= event.amount;
                    delegate.staking_balance -= event.amount;
                    delegate.last_level = level;
                    ctx.block.burned += event.amount;
                    StakingUpdateKind::Slash
                }
            };

            let id = ctx.cache.state_mut().next_staking_update_id();
            ctx.cache.push_staking_update(StakingUpdate {
                id,
                level,
                cycle,
                baker_id: delegate_id,
                staker_id,
                kind,
                amount: event.amount,
                op_id: None,
            });
        }
        ctx.block.operations |= op_kinds::STAKING;
        Ok(())
    }

    async fn revert(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError> {
        let level = ctx.block.level;
        let rows = ctx.store.get_staking_updates(level).await?;
        if rows.is_empty() {
            return Ok(());
        }

        for row in rows.iter().rev() {
            match row.kind {
                StakingUpdateKind::Stake => {
                    let delegate = ctx.cache.account_mut(ctx.store, row.baker_id).await?;
                    delegate.frozen_deposits -= row.amount;
                    delegate.staking_balance -= row.amount;
                    let staker = ctx.cache.account_mut(ctx.store, row.staker_id).await?;
                    staker.balance += row.amount;
                }
                StakingUpdateKind::Unstake => {
                    let staker = ctx.cache.account_mut(ctx.store, row.staker_id).await?;
                    staker.balance -= row.amount;
                    let delegate = ctx.cache.account_mut(ctx.store, row.baker_id).await?;
                    delegate.frozen_deposits += row.amount;
                    delegate.staking_balance += row.amount;
                }
                StakingUpdateKind::Slash => {
                    let delegate = ctx.cache.account_mut(ctx.store, row.baker_id).await?;
                    delegate.frozen_deposits += row.amount;
                    delegate.staking_balance += row.amount;
                }
            }
            ctx.cache.delete_staking_update(row.id);
        }
        ctx.cache.state_mut().release_staking_update_ids(rows.len() as i64);

        let mut touched: std::collections::BTreeSet<i64> = std::collections::BTreeSet::new();
        for row in &rows {
            touched.insert(row.baker_id);
            touched.insert(row.staker_id);
        }
        for id in touched {
            ctx.restore_last_level(id).await?;
        }
        Ok(())
    }
}
