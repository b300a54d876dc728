//! Cycle commit — at each cycle's first block, snapshots the stake
//! distribution, derives the cycle seed, and materializes the full
//! deterministic rights assignment for the cycle.
//!
//! The snapshot and seed are persisted on the cycle row itself, so both the
//! rights and their removal on revert are reproducible from storage alone.

use async_trait::async_trait;

use stakeindex_core::commit::{Commit, CommitContext};
use stakeindex_core::error::IndexerError;
use stakeindex_core::models::{CycleInfo, SnapshotEntry};
use stakeindex_core::rights::{genesis_seed, next_cycle_seed, Candidate, RightsGenerator};
use stakeindex_core::types::{block_events, Mutez};

pub struct CycleCommit;

#[async_trait]
impl Commit for CycleCommit {
    fn name(&self) -> &'static str {
        "cycle"
    }

    async fn apply(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError> {
        if !ctx.block.has_event(block_events::CYCLE_BEGIN) {
            return Ok(());
        }
        let constants = ctx.constants;
        let level = ctx.block.level;
        let cycle = constants.cycle_of(level);

        let seed: [u8; 32] = if cycle == 0 {
            let genesis = ctx
                .store
                .get_block(0)
                .await?
                .ok_or_else(|| IndexerError::Storage("genesis block missing".into()))?;
            genesis_seed(&genesis.hash)
        } else {
            let prev = ctx.store.get_cycle(cycle - 1).await?.ok_or_else(|| {
                IndexerError::Validation(format!("cycle {} missing, cannot seed {cycle}", cycle - 1))
            })?;
            let prev_seed: [u8; 32] = hex::decode(&prev.seed)
                .ok()
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| {
                    IndexerError::Storage(format!("cycle {} has a malformed seed", cycle - 1))
                })?;
            next_cycle_seed(&prev_seed, cycle)
        };

        // The distribution is frozen as of the previous block: delegates are
        // read from storage, which the current block has not yet reached.
        let delegates = ctx.store.list_delegates().await?;
        let mut snapshot = Vec::with_capacity(delegates.len());
        let mut candidates = Vec::with_capacity(delegates.len());
        let mut total: Mutez = 0;
        for delegate in &delegates {
            // Below-minimum stake contributes zero weight but the candidate
            // keeps its position in the ordered list.
            let stake =
                if delegate.staking_balance >= constants.minimal_stake { delegate.staking_balance } else { 0 };
            total += stake;
            snapshot.push(SnapshotEntry { baker_id: delegate.id, stake });
            candidates.push(Candidate {
                baker_id: delegate.id,
                address: delegate.address.clone().into_bytes(),
                pubkey_first_byte: delegate.pubkey_first_byte.unwrap_or(0),
                stake,
            });
        }

        let first_level = constants.cycle_start(cycle);
        let last_level = constants.cycle_end(cycle);

        if total > 0 {
            let generator = RightsGenerator::new(candidates, constants.tie_break);
            let attester_slots =
                if constants.capabilities.attesting_rights { constants.attester_slots } else { 0 };
            let rights = generator.generate(
                &seed,
                cycle,
                first_level,
                last_level,
                constants.baking_rounds,
                attester_slots,
            )?;
            tracing::info!(cycle, rights = rights.len(), total_staking = total, "rights generated");
            ctx.cache.push_rights(rights);
        } else {
            tracing::warn!(cycle, "no staking power; cycle has no precomputed rights");
        }

        ctx.cache.push_cycle(CycleInfo {
            index: cycle,
            first_level,
            last_level,
            snapshot_level: level - 1,
            total_staking: total,
            seed: hex::encode(seed),
            snapshot,
        });
        Ok(())
    }

    async fn revert(&self, ctx: &mut CommitContext<'_>) -> Result<(), IndexerError> {
        if !ctx.block.has_event(block_events::CYCLE_BEGIN) {
            return Ok(());
        }
        let cycle = ctx.constants.cycle_of(ctx.block.level);
        ctx.cache.delete_rights_for_cycle(cycle);
        ctx.cache.delete_cycle(cycle);
        Ok(())
    }
}
