//! stakeindex-core — foundation for the reorg-safe staking-chain indexer.
//!
//! # Architecture
//!
//! ```text
//! Observer (head tracking)
//!     └── IndexingEngine
//!             ├── HandlerRegistry   (protocol hash → versioned handler)
//!             │       └── Commits   (ordered, reversible units of work)
//!             ├── EntityCache       (write-through view of mutable entities)
//!             ├── RightsGenerator   (deterministic stake-weighted sampler)
//!             └── Storage backend   (memory / SQLite)
//! Diagnostics (periodic cross-check against the node, read-only)
//! ```
//!
//! Every block is applied as one ordered sequence of commits inside one
//! atomic write batch; the same sequence runs in reverse to roll the block
//! back, using nothing but persisted rows, so a restart can always unwind a
//! partially-synced head.

pub mod cache;
pub mod commit;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod models;
pub mod node;
pub mod observer;
pub mod protocol;
pub mod registry;
pub mod rights;
pub mod state;
pub mod store;
pub mod types;

pub use cache::EntityCache;
pub use commit::{Commit, CommitContext, Migration};
pub use diagnostics::{Diagnostics, DiagnosticsReport};
pub use engine::IndexingEngine;
pub use error::IndexerError;
pub use models::{Account, AccountKind, BakingRight, Block, CycleInfo, RightKind, StakingUpdate, TransactionOp};
pub use node::{NodeContract, NodeDelegate, NodeHeader, NodeRight, NodeSource};
pub use observer::{Observer, ObserverConfig, SyncStatus};
pub use protocol::{Capabilities, ProtoConstants, Protocol};
pub use registry::{ActivationState, HandlerRegistry, HandlerSpec};
pub use rights::{Candidate, RightsGenerator, SeedStream, TieBreak};
pub use state::AppState;
pub use store::{Storage, WriteBatch, SCHEMA_VERSION};
pub use types::{RawBlock, RawHeader, RawOperationGroup, RawStakingEvent, RawTransaction};
