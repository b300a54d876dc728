//! stakeindex-proto — the per-protocol-version strategy tables.
//!
//! Each supported protocol version is one [`stakeindex_core::HandlerSpec`]
//! pinning its constants, wire decoder, ordered commit set and activation
//! migration. Version deltas are expressed as named overrides of the
//! previous version's parts, so "what changed in version N" is a single
//! diffable constructor.

pub mod commits;
pub mod decoder;
pub mod migrations;
pub mod versions;

pub use versions::{standard_registry, PROTO_V1, PROTO_V2};
