//! Protocol handler registry and the activation state machine.
//!
//! Handlers are declared in an explicit ordered table — a strategy table of
//! per-version specs rather than an inheritance chain — so "what changed in
//! version N" is a single diffable data structure and resolution is exact
//! and auditable. An unknown hash is a fatal error, never a fallback to the
//! closest version.

use crate::commit::{Commit, CommitContext, Migration};
use crate::error::IndexerError;
use crate::protocol::ProtoConstants;
use crate::types::{Level, RawBlock};

/// One protocol version's full strategy: constants, wire decoder, commit
/// set and migration, all pinned at construction.
#[derive(Debug)]
pub struct HandlerSpec {
    /// Version code, 1-based in activation order.
    pub version: i32,
    /// The protocol hash this handler serves.
    pub protocol: &'static str,
    pub constants: ProtoConstants,
    /// Versioned wire decoder: loose JSON → typed block, with explicit
    /// missing-field errors.
    pub decode: fn(&serde_json::Value) -> Result<RawBlock, IndexerError>,
    /// Ordered commit sequence for this version.
    pub commits: fn() -> Vec<Box<dyn Commit>>,
    pub migration: fn() -> Box<dyn Migration>,
}

/// Where the registry currently stands in the activation lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationState {
    /// No protocol active yet (before the first activation block).
    Inactive,
    Active { version: i32, since_level: Level },
}

/// Resolves protocol hashes to handler specs and tracks activation.
pub struct HandlerRegistry {
    table: Vec<HandlerSpec>,
    state: ActivationState,
}

impl HandlerRegistry {
    pub fn new(table: Vec<HandlerSpec>) -> Self {
        Self { table, state: ActivationState::Inactive }
    }

    pub fn activation_state(&self) -> &ActivationState {
        &self.state
    }

    /// Exact hash → handler resolution.
    pub fn resolve(&self, protocol: &str) -> Result<&HandlerSpec, IndexerError> {
        self.table
            .iter()
            .find(|spec| spec.protocol == protocol)
            .ok_or_else(|| IndexerError::UnknownProtocol { hash: protocol.to_string() })
    }

    /// Resolution by version code (used when reverting persisted blocks,
    /// which store the code rather than the hash).
    pub fn resolve_by_code(&self, version: i32) -> Result<&HandlerSpec, IndexerError> {
        self.table
            .iter()
            .find(|spec| spec.version == version)
            .ok_or_else(|| IndexerError::UnknownProtocol { hash: format!("code {version}") })
    }

    /// Run `spec`'s one-time migration and mark it active.
    pub async fn activate(
        &mut self,
        version: i32,
        ctx: &mut CommitContext<'_>,
    ) -> Result<(), IndexerError> {
        let spec = self.resolve_by_code(version)?;
        let migration = (spec.migration)();
        migration.activate(ctx).await?;
        tracing::info!(
            version,
            protocol = spec.protocol,
            level = ctx.block.level,
            "protocol activated"
        );
        self.state = ActivationState::Active { version, since_level: ctx.block.level };
        Ok(())
    }

    /// Run the exact inverse of `spec`'s migration and mark the previous
    /// version active (or none, when reverting the first activation).
    pub async fn deactivate(
        &mut self,
        version: i32,
        ctx: &mut CommitContext<'_>,
    ) -> Result<(), IndexerError> {
        let spec = self.resolve_by_code(version)?;
        let migration = (spec.migration)();
        migration.deactivate(ctx).await?;
        tracing::info!(
            version,
            protocol = spec.protocol,
            level = ctx.block.level,
            "protocol deactivated"
        );
        self.state = if version > 1 {
            ActivationState::Active { version: version - 1, since_level: 0 }
        } else {
            ActivationState::Inactive
        };
        Ok(())
    }

    /// Restore activation bookkeeping from persisted state on startup.
    pub fn restore(&mut self, version: i32, since_level: Level) {
        self.state = if version > 0 {
            ActivationState::Active { version, since_level }
        } else {
            ActivationState::Inactive
        };
    }
}
