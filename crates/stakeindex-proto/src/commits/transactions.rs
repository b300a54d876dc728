//! Transaction commit — the representative operation kind, implemented
//! end-to-end: balance moves, fee routing, burns, counter sequencing,
//! account creation on first sight, and the full inverse of all of it.

use std::collections::BTreeSet;

use async_trait::async_trait;

use stakeindex_core::commit::{Commit, CommitContext};
use stakeindex_core::error::IndexerError;
use stakeindex_core::models::TransactionOp;
use stakeindex_core::types::{op_kinds, RawContent};

pub struct TransactionsCommit;

#[async_trait]
impl Commit for TransactionsCommit {
    fn name(&self) -> &'static str {
        "transactions"
    }

    async fn apply(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError> {
        let raw = ctx.raw()?;
        let level = ctx.block.level;
        let baker_id = ctx
            .block
            .baker_id
            .ok_or_else(|| IndexerError::Validation("transactions applied before block".into()))?;

        let mut count = 0usize;
        for group in &raw.operations {
            for content in &group.contents {
                let RawContent::Transaction(tx) = content;

                let sender_id = ctx.existing_account_id(&tx.sender).await?;
                let sender = ctx.cache.account(ctx.store, sender_id).await?;
                if tx.counter != sender.counter + 1 {
                    return Err(IndexerError::Validation(format!(
                        "broken counter sequence for {}: got {}, expected {}",
                        tx.sender,
                        tx.counter,
                        sender.counter + 1
                    )));
                }
                let target_id = ctx.account_id_or_create(&tx.target).await?;

                // Fees are paid even when the operation itself failed.
                let sender = ctx.cache.account_mut(ctx.store, sender_id).await?;
                sender.counter = tx.counter;
                sender.balance -= tx.fee;
                sender.last_level = level;
                if tx.status.is_applied() {
                    sender.balance -= tx.amount + tx.burned;
                }

                let target = ctx.cache.account_mut(ctx.store, target_id).await?;
                if tx.status.is_applied() {
                    target.balance += tx.amount;
                }
                target.last_level = level;

                let baker = ctx.cache.account_mut(ctx.store, baker_id).await?;
                baker.balance += tx.fee;

                ctx.block.fees += tx.fee;
                if tx.status.is_applied() {
                    ctx.block.burned += tx.burned;
                }

                let id = ctx.cache.state_mut().next_operation_id();
                ctx.cache.push_transaction(TransactionOp {
                    id,
                    level,
                    op_hash: group.hash.clone(),
                    counter: tx.counter,
                    sender_id,
                    target_id,
                    amount: tx.amount,
                    fee: tx.fee,
                    burned: tx.burned,
                    status: tx.status,
                });
                count += 1;
            }
        }
        if count > 0 {
            ctx.block.operations |= op_kinds::TRANSACTIONS;
        }
        Ok(())
    }

    async fn revert(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError> {
        let level = ctx.block.level;
        let rows = ctx.store.get_transactions(level).await?;
        if rows.is_empty() {
            return Ok(());
        }
        let baker_id = ctx
            .block
            .baker_id
            .ok_or_else(|| IndexerError::Validation("persisted block has no baker".into()))?;

        let mut touched: BTreeSet<i64> = BTreeSet::new();
        for row in rows.iter().rev() {
            let sender = ctx.cache.account_mut(ctx.store, row.sender_id).await?;
            sender.counter = row.counter - 1;
            sender.balance += row.fee;
            if row.status.is_applied() {
                sender.balance += row.amount + row.burned;
            }

            let target = ctx.cache.account_mut(ctx.store, row.target_id).await?;
            if row.status.is_applied() {
                target.balance -= row.amount;
            }

            let baker = ctx.cache.account_mut(ctx.store, baker_id).await?;
            baker.balance -= row.fee;

            touched.insert(row.sender_id);
            touched.insert(row.target_id);
            ctx.cache.delete_transaction(row.id);
        }
        ctx.cache.state_mut().release_operation_ids(rows.len() as i64);

        // Accounts first seen in this block are deleted outright; their ids
        // are the most recently allocated, so releasing by count restores
        // the counter exactly. Invoice accounts belong to the activation
        // migration and are left for its inverse.
        let mut created = 0i64;
        for id in touched {
            let account = ctx.cache.account(ctx.store, id).await?;
            let is_invoice =
                ctx.constants.invoices.iter().any(|(address, _)| *address == account.address);
            if account.first_level == level && !is_invoice {
                ctx.cache.delete_account(id);
                created += 1;
            } else {
                ctx.restore_last_level(id).await?;
            }
        }
        ctx.cache.state_mut().release_account_ids(created);
        Ok(())
    }
}
