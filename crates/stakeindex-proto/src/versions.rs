//! The version strategy table.
//!
//! One constructor per protocol version; later versions are written as
//! overrides of the previous version's constants, so the delta between two
//! versions reads as a diff of one function. Tie-break rules are pinned
//! per version against golden vectors, never inferred from the neighbor.

use stakeindex_core::commit::Commit;
use stakeindex_core::protocol::{Capabilities, ProtoConstants};
use stakeindex_core::registry::{HandlerRegistry, HandlerSpec};
use stakeindex_core::rights::TieBreak;

use crate::commits::{BlockCommit, CycleCommit, StakingCommit, TransactionsCommit};
use crate::decoder;
use crate::migrations::ProtoMigration;

/// First supported protocol.
pub const PROTO_V1: &str = "PtGenesaAlphaXdXhZJSrdXaMeGohN3fFyBy3rjYMnpPtH7fNSAe";

/// Second supported protocol: staking events, pubkey-prefixed tie-break,
/// reduced issuance, one activation invoice.
pub const PROTO_V2: &str = "PtStakingBetaQfRzhzPtH7fNSAeXdXhZJSrdXaMeGohN3fFyBy3";

/// Address credited by v2's activation, compensating a pre-launch audit.
pub const V2_INVOICE_ADDRESS: &str = "tz1invoiceAuditRewardXXXXXXXXXXXXXXX";

fn v1_constants() -> ProtoConstants {
    ProtoConstants {
        blocks_per_cycle: 8,
        blocks_per_snapshot: 4,
        block_reward: 1_000,
        minimal_stake: 2_000,
        baking_rounds: 2,
        attester_slots: 2,
        tie_break: TieBreak::AddressBytes,
        capabilities: Capabilities { staking_updates: false, attesting_rights: true },
        invoices: vec![],
    }
}

fn v2_constants() -> ProtoConstants {
    ProtoConstants {
        block_reward: 800,
        tie_break: TieBreak::PubkeyPrefixed,
        capabilities: Capabilities { staking_updates: true, attesting_rights: true },
        invoices: vec![(V2_INVOICE_ADDRESS.into(), 500)],
        ..v1_constants()
    }
}

fn v1_commits() -> Vec<Box<dyn Commit>> {
    vec![Box::new(BlockCommit), Box::new(TransactionsCommit), Box::new(CycleCommit)]
}

/// v1's sequence plus the staking ledger, in pipeline position 3.
fn v2_commits() -> Vec<Box<dyn Commit>> {
    vec![
        Box::new(BlockCommit),
        Box::new(TransactionsCommit),
        Box::new(StakingCommit),
        Box::new(CycleCommit),
    ]
}

fn v1() -> HandlerSpec {
    HandlerSpec {
        version: 1,
        protocol: PROTO_V1,
        constants: v1_constants(),
        decode: decoder::decode_v1,
        commits: v1_commits,
        migration: || Box::new(ProtoMigration),
    }
}

fn v2() -> HandlerSpec {
    HandlerSpec {
        version: 2,
        protocol: PROTO_V2,
        constants: v2_constants(),
        decode: decoder::decode_v2,
        commits: v2_commits,
        migration: || Box::new(ProtoMigration),
    }
}

/// The full ordered handler table.
pub fn standard_registry() -> HandlerRegistry {
    HandlerRegistry::new(vec![v1(), v2()])
}
