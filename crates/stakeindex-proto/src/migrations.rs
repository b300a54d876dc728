//! Activation migrations.
//!
//! Run once when the chain crosses a protocol boundary, inside the same
//! atomic batch as the boundary block's commits: create the protocol row,
//! close the predecessor's validity window, and credit the version's
//! one-off invoice accounts. Deactivation is the exact inverse.

use async_trait::async_trait;

use stakeindex_core::commit::{CommitContext, Migration};
use stakeindex_core::error::IndexerError;
use stakeindex_core::models::{Account, AccountKind};
use stakeindex_core::protocol::Protocol;

/// Standard migration used by every version so far; the per-version part
/// is entirely data (constants and invoices in the handler spec).
pub struct ProtoMigration;

#[async_trait]
impl Migration for ProtoMigration {
    async fn activate(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError> {
        let raw = ctx.raw()?;
        let code = ctx.block.proto_code;
        let level = ctx.block.level;

        if code > 1 {
            let previous = ctx.cache.protocol_mut(ctx.store, code - 1).await?;
            previous.last_level = level - 1;
        }
        ctx.cache.add_protocol(Protocol {
            code,
            hash: raw.header.protocol.clone(),
            first_level: level,
            last_level: -1,
            constants: ctx.constants.clone(),
        });

        let constants = ctx.constants;
        for (address, amount) in &constants.invoices {
            // Invoice targets have never been seen on chain; they enter as
            // ghosts until an operation classifies them.
            let id = match ctx.cache.account_id_by_address(ctx.store, address).await? {
                Some(id) => id,
                None => {
                    let id = ctx.cache.state_mut().next_account_id();
                    let mut account = Account::new_user(id, address.clone(), level);
                    account.kind = AccountKind::Ghost;
                    ctx.cache.add_account(account);
                    id
                }
            };
            let account = ctx.cache.account_mut(ctx.store, id).await?;
            account.balance += *amount;
            account.last_level = level;
            // Invoices are minted out of nothing.
            ctx.block.reward += *amount;
            tracing::info!(address = %address, amount = *amount, "protocol invoice credited");
        }
        Ok(())
    }

    async fn deactivate(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError> {
        let code = ctx.block.proto_code;
        let level = ctx.block.level;

        let constants = ctx.constants;
        let mut released = 0i64;
        for (address, amount) in constants.invoices.iter().rev() {
            let id = ctx.existing_account_id(address).await?;
            let account = ctx.cache.account_mut(ctx.store, id).await?;
            account.balance -= *amount;
            if account.first_level == level {
                ctx.cache.delete_account(id);
                released += 1;
            } else {
                ctx.restore_last_level(id).await?;
            }
        }
        ctx.cache.state_mut().release_account_ids(released);

        ctx.cache.delete_protocol(code);
        if code > 1 {
            let previous = ctx.cache.protocol_mut(ctx.store, code - 1).await?;
            previous.last_level = -1;
        }
        Ok(())
    }
}
