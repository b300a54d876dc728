//! The indexing engine — commit/revert orchestrator.
//!
//! `apply` runs a handler's commits forward, `revert_last` runs the same
//! sequence in reverse from persisted rows. All persistence for one block
//! goes through a single atomic write batch; a failed attempt resets the
//! cache and leaves storage exactly as it was.

use std::sync::Arc;

use crate::cache::EntityCache;
use crate::commit::CommitContext;
use crate::error::IndexerError;
use crate::models::Block;
use crate::registry::HandlerRegistry;
use crate::state::AppState;
use crate::store::Storage;
use crate::types::{block_events, Level, RawBlock};

pub struct IndexingEngine {
    registry: HandlerRegistry,
    cache: EntityCache,
    store: Arc<dyn Storage>,
}

impl IndexingEngine {
    /// Open the engine over existing storage, or initialize fresh storage
    /// with the configured genesis. A persisted genesis that does not match
    /// the configuration is fatal.
    pub async fn bootstrap(
        store: Arc<dyn Storage>,
        mut registry: HandlerRegistry,
        genesis_hash: &str,
        genesis_time: i64,
    ) -> Result<Self, IndexerError> {
        match store.load_app_state().await? {
            Some(state) => {
                let genesis = store
                    .get_block(0)
                    .await?
                    .ok_or_else(|| IndexerError::Genesis("genesis block missing".into()))?;
                if genesis.hash != genesis_hash {
                    return Err(IndexerError::Genesis(format!(
                        "stored genesis {} does not match configured {genesis_hash}",
                        genesis.hash
                    )));
                }
                if !state.protocol.is_empty() {
                    let version = registry.resolve(&state.protocol)?.version;
                    let since = store
                        .get_protocol(version)
                        .await?
                        .map(|p| p.first_level)
                        .unwrap_or(0);
                    registry.restore(version, since);
                }
                tracing::info!(level = state.level, hash = %state.hash, "resuming from storage");
                Ok(Self { registry, cache: EntityCache::new(state), store })
            }
            None => {
                let state = AppState::bootstrap(genesis_hash, genesis_time);
                let mut cache = EntityCache::new(state);
                cache.push_block(Block {
                    level: 0,
                    hash: genesis_hash.to_string(),
                    predecessor: String::new(),
                    timestamp: genesis_time,
                    proto_code: 0,
                    baker_id: None,
                    events: 0,
                    operations: 0,
                    reward: 0,
                    fees: 0,
                    burned: 0,
                });
                let batch = cache.take_batch();
                store.apply_batch(&batch).await?;
                tracing::info!(hash = genesis_hash, "initialized fresh storage at genesis");
                Ok(Self { registry, cache, store })
            }
        }
    }

    pub fn state(&self) -> &AppState {
        self.cache.state()
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    /// Record the most recent remote head level (persisted with the next
    /// applied block).
    pub fn set_known_head(&mut self, level: Level) {
        self.cache.state_mut().known_head = level;
    }

    /// Decode a raw node response by resolving its protocol's versioned
    /// decoder.
    pub fn decode(&self, json: &serde_json::Value) -> Result<RawBlock, IndexerError> {
        let protocol = json
            .get("protocol")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IndexerError::Wire("missing field `protocol`".into()))?;
        let spec = self.registry.resolve(protocol)?;
        (spec.decode)(json)
    }

    /// Apply one decoded block. On any error the cache is reset and the
    /// in-memory state restored; storage is never partially written.
    pub async fn apply(&mut self, raw: &RawBlock) -> Result<Block, IndexerError> {
        let snapshot = self.cache.state().clone();
        match self.apply_inner(raw).await {
            Ok(block) => Ok(block),
            Err(e) => {
                self.cache.reset();
                self.cache.restore_state(snapshot);
                Err(e)
            }
        }
    }

    async fn apply_inner(&mut self, raw: &RawBlock) -> Result<Block, IndexerError> {
        let prev = self.cache.state().clone();
        if raw.header.level != prev.level + 1 {
            return Err(IndexerError::Validation(format!(
                "level gap: local head {} cannot accept block {}",
                prev.level, raw.header.level
            )));
        }
        if raw.header.predecessor != prev.hash {
            return Err(IndexerError::Validation(format!(
                "branch mismatch at level {}: predecessor {} != local head {}",
                raw.header.level, raw.header.predecessor, prev.hash
            )));
        }

        let (version, constants, commits) = {
            let spec = self.registry.resolve(&raw.header.protocol)?;
            (spec.version, spec.constants.clone(), (spec.commits)())
        };

        let mut block = Block {
            level: raw.header.level,
            hash: raw.header.hash.clone(),
            predecessor: raw.header.predecessor.clone(),
            timestamp: raw.header.timestamp,
            proto_code: version,
            baker_id: None,
            events: 0,
            operations: 0,
            reward: 0,
            fees: 0,
            burned: 0,
        };

        self.cache.begin_level(block.level);
        let store = self.store.clone();
        let mut ctx = CommitContext {
            store: store.as_ref(),
            cache: &mut self.cache,
            block: &mut block,
            raw: Some(raw),
            constants: &constants,
        };

        if raw.header.protocol != prev.protocol {
            ctx.block.events |= block_events::PROTOCOL_BEGIN;
            self.registry.activate(version, &mut ctx).await?;
            if let Some(mut parent) = store.get_block(prev.level).await? {
                parent.events |= block_events::PROTOCOL_END;
                ctx.cache.push_block(parent);
            }
        }

        for commit in &commits {
            tracing::debug!(commit = commit.name(), level = ctx.block.level, "applying");
            commit.apply(&mut ctx).await?;
        }

        // Conservation: net balance flow must equal net issuance.
        let flow = ctx.cache.balance_flow();
        let minted = ctx.block.reward;
        let burned = ctx.block.burned;
        if flow != minted - burned {
            return Err(IndexerError::Validation(format!(
                "conservation violated at level {}: flow {flow}, minted {minted}, burned {burned}",
                ctx.block.level
            )));
        }
        drop(ctx);

        let state = self.cache.state_mut();
        state.level = block.level;
        state.hash = block.hash.clone();
        state.protocol = raw.header.protocol.clone();
        state.next_protocol = raw.header.next_protocol.clone();
        state.timestamp = block.timestamp;

        self.cache.push_block(block.clone());
        let batch = self.cache.take_batch();
        self.store.apply_batch(&batch).await?;

        tracing::info!(
            level = block.level,
            hash = %block.hash,
            ops = block.operations,
            "block applied"
        );
        Ok(block)
    }

    /// Roll back the local head by exactly one block, from persisted rows
    /// alone. On any error the cache is reset; storage is untouched.
    pub async fn revert_last(&mut self) -> Result<Block, IndexerError> {
        let snapshot = self.cache.state().clone();
        match self.revert_inner().await {
            Ok(block) => Ok(block),
            Err(e) => {
                self.cache.reset();
                self.cache.restore_state(snapshot);
                Err(e)
            }
        }
    }

    async fn revert_inner(&mut self) -> Result<Block, IndexerError> {
        let prev = self.cache.state().clone();
        if prev.level <= 0 {
            return Err(IndexerError::Validation("nothing to revert: at genesis".into()));
        }
        let mut block = self
            .store
            .get_block(prev.level)
            .await?
            .ok_or_else(|| IndexerError::Storage(format!("head block {} missing", prev.level)))?;

        let (version, constants, commits) = {
            let spec = self.registry.resolve_by_code(block.proto_code)?;
            (spec.version, spec.constants.clone(), (spec.commits)())
        };

        // Stale entries above the rollback target must not survive.
        self.cache.invalidate_above(prev.level - 1);
        self.cache.begin_level(block.level);

        let store = self.store.clone();
        let mut ctx = CommitContext {
            store: store.as_ref(),
            cache: &mut self.cache,
            block: &mut block,
            raw: None,
            constants: &constants,
        };

        for commit in commits.iter().rev() {
            tracing::debug!(commit = commit.name(), level = ctx.block.level, "reverting");
            commit.revert(&mut ctx).await?;
        }

        if ctx.block.has_event(block_events::PROTOCOL_BEGIN) {
            self.registry.deactivate(version, &mut ctx).await?;
            if let Some(mut parent) = store.get_block(prev.level - 1).await? {
                parent.events &= !block_events::PROTOCOL_END;
                ctx.cache.push_block(parent);
            }
        }
        drop(ctx);

        self.cache.delete_block(block.level);

        let parent = self
            .store
            .get_block(prev.level - 1)
            .await?
            .ok_or_else(|| IndexerError::Storage(format!("parent block {} missing", prev.level - 1)))?;
        let protocol = if parent.proto_code > 0 {
            self.store
                .get_protocol(parent.proto_code)
                .await?
                .map(|p| p.hash)
                .ok_or_else(|| {
                    IndexerError::Storage(format!("protocol {} missing", parent.proto_code))
                })?
        } else {
            String::new()
        };

        let state = self.cache.state_mut();
        state.level = parent.level;
        state.hash = parent.hash.clone();
        state.timestamp = parent.timestamp;
        state.next_protocol = protocol.clone();
        state.protocol = protocol;

        let batch = self.cache.take_batch();
        self.store.apply_batch(&batch).await?;

        tracing::info!(level = block.level, hash = %block.hash, "block reverted");
        Ok(block)
    }
}
