//! End-to-end tests over the full pipeline: engine + handlers + memory
//! storage, driven the same way the observer drives them in production.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use stakeindex_core::diagnostics::Diagnostics;
use stakeindex_core::engine::IndexingEngine;
use stakeindex_core::error::IndexerError;
use stakeindex_core::models::{Account, AccountKind, RightKind};
use stakeindex_core::node::{NodeContract, NodeDelegate, NodeHeader, NodeRight, NodeSource};
use stakeindex_core::observer::{Observer, ObserverConfig, SyncStatus};
use stakeindex_core::state::AppState;
use stakeindex_core::store::{Storage, WriteBatch};
use stakeindex_core::types::{block_events, CycleIndex, Level};
use stakeindex_proto::{standard_registry, PROTO_V1, PROTO_V2};
use stakeindex_storage::InMemoryStorage;

const GENESIS: &str = "BLockGenesisGenesis11111111111111111111111111111111";
const BAKER_A: &str = "tz1bakerAAAA";
const BAKER_B: &str = "tz1bakerBBBB";
const USER: &str = "tz1userCCCC";

// ─── Rig ─────────────────────────────────────────────────────────────────────

fn delegate(id: i64, address: &str, pubkey_byte: u8, staking: i64) -> Account {
    Account {
        id,
        address: address.into(),
        kind: AccountKind::Delegate,
        balance: 10_000,
        counter: 0,
        delegate_id: None,
        staking_balance: staking,
        frozen_deposits: 0,
        delegators_count: 0,
        activation_level: Some(0),
        deactivation_level: None,
        pubkey_first_byte: Some(pubkey_byte),
        first_level: 0,
        last_level: 0,
    }
}

fn user(id: i64, address: &str) -> Account {
    let mut account = Account::new_user(id, address, 0);
    account.balance = 5_000;
    account
}

/// Storage pre-populated with a genesis block, two bootstrap delegates and
/// one plain account.
async fn seeded_store() -> Arc<InMemoryStorage> {
    let store = Arc::new(InMemoryStorage::new());
    let mut state = AppState::bootstrap(GENESIS, 0);
    state.account_counter = 3;
    let batch = WriteBatch {
        state: Some(state),
        blocks_put: vec![stakeindex_core::models::Block {
            level: 0,
            hash: GENESIS.into(),
            predecessor: String::new(),
            timestamp: 0,
            proto_code: 0,
            baker_id: None,
            events: 0,
            operations: 0,
            reward: 0,
            fees: 0,
            burned: 0,
        }],
        accounts_put: vec![
            delegate(1, BAKER_A, 0x41, 8_000),
            delegate(2, BAKER_B, 0x42, 4_000),
            user(3, USER),
        ],
        ..Default::default()
    };
    store.apply_batch(&batch).await.unwrap();
    store
}

async fn engine_over(store: Arc<InMemoryStorage>) -> IndexingEngine {
    let dyn_store: Arc<dyn Storage> = store;
    IndexingEngine::bootstrap(dyn_store, standard_registry(), GENESIS, 0)
        .await
        .expect("bootstrap")
}

fn block_json(level: Level, protocol: &str, baker: &str, operations: Value, staking: Value) -> Value {
    let predecessor =
        if level == 1 { GENESIS.to_string() } else { format!("BL{}", level - 1) };
    json!({
        "protocol": protocol,
        "hash": format!("BL{level}"),
        "header": { "level": level, "predecessor": predecessor, "timestamp": level * 60 },
        "metadata": { "baker": baker, "staking_events": staking },
        "operations": operations,
    })
}

fn transfer(hash: &str, source: &str, dest: &str, amount: i64, fee: i64, burned: i64, counter: i64) -> Value {
    json!({
        "hash": hash,
        "contents": [{
            "kind": "transaction",
            "source": source,
            "destination": dest,
            "amount": amount,
            "fee": fee,
            "burned": burned,
            "counter": counter,
            "status": "applied"
        }]
    })
}

async fn apply(engine: &mut IndexingEngine, json: &Value) -> Result<(), IndexerError> {
    let raw = engine.decode(json)?;
    engine.apply(&raw).await?;
    Ok(())
}

/// Apply `levels` empty v1 blocks baked by BAKER_A.
async fn apply_empty_chain(engine: &mut IndexingEngine, levels: std::ops::RangeInclusive<Level>) {
    for level in levels {
        let block = block_json(level, PROTO_V1, BAKER_A, json!([]), json!([]));
        apply(engine, &block).await.unwrap_or_else(|e| panic!("apply level {level}: {e}"));
    }
}

// ─── Apply/revert round trip ─────────────────────────────────────────────────

#[tokio::test]
async fn apply_then_revert_restores_storage_bit_identical() {
    let store = seeded_store().await;
    let mut engine = engine_over(store.clone()).await;
    let before = store.dump();

    let block = block_json(
        1,
        PROTO_V1,
        BAKER_A,
        json!([transfer("opAA", USER, "tz1newDDDD", 1_000, 10, 5, 1)]),
        json!([]),
    );
    apply(&mut engine, &block).await.unwrap();
    assert_ne!(store.dump(), before, "apply must change storage");

    engine.revert_last().await.unwrap();
    assert_eq!(store.dump(), before, "revert must restore storage exactly");
}

#[tokio::test]
async fn conservation_holds_for_transfer_fee_and_burn() {
    let store = seeded_store().await;
    let mut engine = engine_over(store.clone()).await;

    let block = block_json(
        1,
        PROTO_V1,
        BAKER_A,
        json!([transfer("opAA", USER, "tz1newDDDD", 1_000, 10, 5, 1)]),
        json!([]),
    );
    apply(&mut engine, &block).await.unwrap();

    let row = store.get_block(1).await.unwrap().unwrap();
    assert_eq!(row.reward, 1_000);
    assert_eq!(row.fees, 10);
    assert_eq!(row.burned, 5);

    let sender = store.get_account(3).await.unwrap().unwrap();
    assert_eq!(sender.balance, 5_000 - 1_000 - 10 - 5);
    assert_eq!(sender.counter, 1);
    let target = store.get_account_by_address("tz1newDDDD").await.unwrap().unwrap();
    assert_eq!(target.balance, 1_000);
    assert_eq!(target.first_level, 1);
    let baker = store.get_account(1).await.unwrap().unwrap();
    assert_eq!(baker.balance, 10_000 + 1_000 + 10);

    // Net flow equals issuance minus burn.
    let flow = (sender.balance - 5_000) + target.balance + (baker.balance - 10_000);
    assert_eq!(flow, row.reward - row.burned);
}

#[tokio::test]
async fn counters_return_after_n_applies_and_reverts() {
    let store = seeded_store().await;
    let mut engine = engine_over(store.clone()).await;
    let before = store.dump();

    for level in 1..=3 {
        let block = block_json(
            level,
            PROTO_V1,
            BAKER_A,
            json!([transfer(
                &format!("op{level}"),
                USER,
                &format!("tz1fresh{level}"),
                100,
                1,
                0,
                level
            )]),
            json!([]),
        );
        apply(&mut engine, &block).await.unwrap();
    }
    let state = store.load_app_state().await.unwrap().unwrap();
    assert_eq!(state.account_counter, 6); // three fresh targets
    assert_eq!(state.operation_counter, 3);

    for _ in 0..3 {
        engine.revert_last().await.unwrap();
    }
    let state = store.load_app_state().await.unwrap().unwrap();
    assert_eq!(state.account_counter, 3);
    assert_eq!(state.operation_counter, 0);
    assert_eq!(store.dump(), before);
}

// ─── Rights and cycles ───────────────────────────────────────────────────────

#[tokio::test]
async fn cycle_start_materializes_deterministic_rights() {
    let store = seeded_store().await;
    let mut engine = engine_over(store.clone()).await;

    let block = block_json(1, PROTO_V1, BAKER_A, json!([]), json!([]));
    apply(&mut engine, &block).await.unwrap();

    let row = store.get_block(1).await.unwrap().unwrap();
    assert!(row.has_event(block_events::CYCLE_BEGIN));
    assert!(row.has_event(block_events::PROTOCOL_BEGIN));

    let cycle = store.get_cycle(0).await.unwrap().unwrap();
    assert_eq!(cycle.first_level, 1);
    assert_eq!(cycle.last_level, 8);
    assert_eq!(cycle.total_staking, 12_000);
    // seed₀ = SHA-256(genesis hash)
    assert_eq!(
        cycle.seed,
        "3d0b46ef3e0b1d88f9db1a372d3ff760229fd91f26838b16a3cacb912da963f5"
    );

    // 8 levels × (2 baking rounds + 2 attesting slots)
    let rights = store.get_rights(0).await.unwrap();
    assert_eq!(rights.len(), 32);
    assert!(rights.iter().all(|r| r.baker_id == 1 || r.baker_id == 2));
    assert_eq!(rights.iter().filter(|r| r.kind == RightKind::Baking).count(), 16);

    // Same seed + same snapshot ⇒ identical regeneration after a revert.
    engine.revert_last().await.unwrap();
    assert!(store.get_rights(0).await.unwrap().is_empty());
    assert!(store.get_cycle(0).await.unwrap().is_none());
    let block = block_json(1, PROTO_V1, BAKER_A, json!([]), json!([]));
    apply(&mut engine, &block).await.unwrap();
    assert_eq!(store.get_rights(0).await.unwrap(), rights);
}

// ─── Protocol activation ─────────────────────────────────────────────────────

#[tokio::test]
async fn activation_and_deactivation_are_symmetric() {
    let store = seeded_store().await;
    let mut engine = engine_over(store.clone()).await;
    apply_empty_chain(&mut engine, 1..=8).await;
    let before = store.dump();

    // Level 9 switches to v2: migration credits the invoice, closes v1.
    let block = block_json(9, PROTO_V2, BAKER_A, json!([]), json!([]));
    apply(&mut engine, &block).await.unwrap();

    let v1 = store.get_protocol(1).await.unwrap().unwrap();
    assert_eq!(v1.last_level, 8);
    let v2 = store.get_protocol(2).await.unwrap().unwrap();
    assert_eq!(v2.first_level, 9);
    assert!(v2.is_open());
    let invoice = store
        .get_account_by_address(stakeindex_proto::versions::V2_INVOICE_ADDRESS)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invoice.balance, 500);
    assert_eq!(invoice.kind, AccountKind::Ghost);
    assert_eq!(store.load_app_state().await.unwrap().unwrap().protocol, PROTO_V2);

    engine.revert_last().await.unwrap();
    assert_eq!(store.dump(), before, "deactivation must be the exact inverse");
    let v1 = store.get_protocol(1).await.unwrap().unwrap();
    assert!(v1.is_open());
}

#[tokio::test]
async fn staking_ledger_applies_and_reverts() {
    let store = seeded_store().await;
    let mut engine = engine_over(store.clone()).await;
    apply_empty_chain(&mut engine, 1..=8).await;
    let v2_block = block_json(9, PROTO_V2, BAKER_A, json!([]), json!([]));
    apply(&mut engine, &v2_block).await.unwrap();
    let before = store.dump();

    let events = json!([
        { "kind": "stake",   "staker": USER,  "delegate": BAKER_B, "amount": 500 },
        { "kind": "stake",   "staker": USER,  "delegate": BAKER_A, "amount": 300 },
        { "kind": "slash",   "staker": BAKER_A, "delegate": BAKER_A, "amount": 200 },
        { "kind": "unstake", "staker": USER,  "delegate": BAKER_B, "amount": 100 },
    ]);
    let block = block_json(10, PROTO_V2, BAKER_A, json!([]), events);
    apply(&mut engine, &block).await.unwrap();

    let updates = store.get_staking_updates(10).await.unwrap();
    assert_eq!(updates.len(), 4);
    assert!(updates.iter().all(|u| u.cycle == 1 && u.op_id.is_none()));

    let user_row = store.get_account(3).await.unwrap().unwrap();
    assert_eq!(user_row.balance, 5_000 - 500 - 300 + 100);
    let baker_a = store.get_account(1).await.unwrap().unwrap();
    assert_eq!(baker_a.frozen_deposits, 300 - 200);
    assert_eq!(baker_a.staking_balance, 8_000 + 300 - 200);
    let baker_b = store.get_account(2).await.unwrap().unwrap();
    assert_eq!(baker_b.frozen_deposits, 500 - 100);
    assert_eq!(baker_b.staking_balance, 4_000 + 500 - 100);
    let row = store.get_block(10).await.unwrap().unwrap();
    assert_eq!(row.burned, 200);

    engine.revert_last().await.unwrap();
    assert_eq!(store.dump(), before);
}

// ─── Validation failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn broken_counter_sequence_aborts_without_persisting() {
    let store = seeded_store().await;
    let mut engine = engine_over(store.clone()).await;
    let before = store.dump();

    let block = block_json(
        1,
        PROTO_V1,
        BAKER_A,
        json!([transfer("opAA", USER, "tz1newDDDD", 100, 1, 0, 7)]), // expected counter 1
        json!([]),
    );
    let err = apply(&mut engine, &block).await.unwrap_err();
    assert!(matches!(err, IndexerError::Validation(_)), "{err}");
    assert_eq!(store.dump(), before, "failed attempt must not persist anything");
    assert_eq!(engine.state().level, 0, "in-memory state must be rolled back");

    // The same level can be retried after the failure.
    let block = block_json(
        1,
        PROTO_V1,
        BAKER_A,
        json!([transfer("opAA", USER, "tz1newDDDD", 100, 1, 0, 1)]),
        json!([]),
    );
    apply(&mut engine, &block).await.unwrap();
    assert_eq!(engine.state().level, 1);
}

#[tokio::test]
async fn unknown_or_non_delegate_baker_is_rejected() {
    let store = seeded_store().await;
    let mut engine = engine_over(store.clone()).await;

    let block = block_json(1, PROTO_V1, "tz1nobodyEEEE", json!([]), json!([]));
    let err = apply(&mut engine, &block).await.unwrap_err();
    assert!(matches!(err, IndexerError::Validation(_)), "{err}");

    let block = block_json(1, PROTO_V1, USER, json!([]), json!([]));
    let err = apply(&mut engine, &block).await.unwrap_err();
    assert!(matches!(err, IndexerError::Validation(_)), "{err}");
}

#[tokio::test]
async fn unknown_protocol_is_fatal_at_decode() {
    let store = seeded_store().await;
    let engine = engine_over(store).await;
    let block = block_json(1, "PtTotallyUnknown", BAKER_A, json!([]), json!([]));
    let err = engine.decode(&block).unwrap_err();
    assert!(matches!(err, IndexerError::UnknownProtocol { .. }));
    assert!(err.is_fatal());
}

// ─── Observer: branch validation against a forked remote ────────────────────

#[derive(Clone)]
struct ChainBlock {
    level: Level,
    hash: String,
    json: Value,
}

struct MockNode {
    chain: Mutex<Vec<ChainBlock>>,
    header_calls: Mutex<Vec<Level>>,
}

impl MockNode {
    fn new(chain: Vec<ChainBlock>) -> Self {
        Self { chain: Mutex::new(chain), header_calls: Mutex::new(vec![]) }
    }

    fn switch(&self, chain: Vec<ChainBlock>) {
        *self.chain.lock().unwrap() = chain;
    }

    fn header_calls(&self) -> Vec<Level> {
        self.header_calls.lock().unwrap().clone()
    }

    fn find(&self, level: Level) -> Option<ChainBlock> {
        self.chain.lock().unwrap().iter().find(|b| b.level == level).cloned()
    }
}

#[async_trait]
impl NodeSource for MockNode {
    async fn get_head(&self) -> Result<NodeHeader, IndexerError> {
        let chain = self.chain.lock().unwrap();
        let last = chain.last().expect("empty chain");
        Ok(NodeHeader {
            level: last.level,
            hash: last.hash.clone(),
            predecessor: last.json["header"]["predecessor"].as_str().unwrap().to_string(),
            timestamp: last.level * 60,
            protocol: PROTO_V1.into(),
        })
    }

    async fn get_header(&self, level: Level) -> Result<NodeHeader, IndexerError> {
        self.header_calls.lock().unwrap().push(level);
        let block = self
            .find(level)
            .ok_or_else(|| IndexerError::Node(format!("no block at level {level}")))?;
        Ok(NodeHeader {
            level,
            hash: block.hash.clone(),
            predecessor: block.json["header"]["predecessor"].as_str().unwrap().to_string(),
            timestamp: level * 60,
            protocol: PROTO_V1.into(),
        })
    }

    async fn get_block(&self, level: Level) -> Result<Value, IndexerError> {
        self.find(level)
            .map(|b| b.json)
            .ok_or_else(|| IndexerError::Node(format!("no block at level {level}")))
    }

    async fn get_baking_rights(&self, _: CycleIndex) -> Result<Vec<NodeRight>, IndexerError> {
        Err(IndexerError::Node("rights endpoint not wired in this test".into()))
    }

    async fn get_attesting_rights(&self, _: CycleIndex) -> Result<Vec<NodeRight>, IndexerError> {
        Err(IndexerError::Node("rights endpoint not wired in this test".into()))
    }

    async fn get_delegate(&self, _: Level, _: &str) -> Result<NodeDelegate, IndexerError> {
        Err(IndexerError::Node("delegate endpoint not wired in this test".into()))
    }

    async fn get_contract(&self, _: Level, _: &str) -> Result<NodeContract, IndexerError> {
        Err(IndexerError::Node("contract endpoint not wired in this test".into()))
    }
}

/// Chain of empty v1 blocks. Levels at or above `fork_at` get `B`-branch
/// hashes; everything below stays on the `A` branch.
fn make_chain(total: Level, fork_at: Option<Level>) -> Vec<ChainBlock> {
    let mut blocks = Vec::with_capacity(total as usize);
    let mut predecessor = GENESIS.to_string();
    for level in 1..=total {
        let branch = if fork_at.is_some_and(|f| level >= f) { "B" } else { "A" };
        let hash = format!("{branch}{level}");
        let json = json!({
            "protocol": PROTO_V1,
            "hash": hash,
            "header": { "level": level, "predecessor": predecessor, "timestamp": level * 60 },
            "metadata": { "baker": BAKER_A, "staking_events": [] },
            "operations": [],
        });
        blocks.push(ChainBlock { level, hash: hash.clone(), json });
        predecessor = hash;
    }
    blocks
}

async fn wait_for_level(status: &Arc<RwLock<SyncStatus>>, level: Level) {
    for _ in 0..2_000 {
        if status.read().unwrap().level == level {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for level {level}, at {}", status.read().unwrap().level);
}

#[tokio::test]
async fn observer_unwinds_fork_in_exactly_one_revert_per_level() {
    let store = seeded_store().await;
    let engine = engine_over(store.clone()).await;

    let node = Arc::new(MockNode::new(make_chain(100, None)));
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    let config = ObserverConfig {
        poll_interval: Duration::from_millis(10),
        retry_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    };
    let observer = Observer::new(node.clone(), engine, config, cancel_rx);
    let status = observer.status();
    let handle = tokio::spawn(observer.run());

    wait_for_level(&status, 100).await;
    assert!(node.header_calls().is_empty(), "clean sync needs no branch validation");
    assert_eq!(store.get_block(100).await.unwrap().unwrap().hash, "A100");

    // The remote chain reorganizes: fork at level 80, new head at 101.
    node.switch(make_chain(101, Some(80)));
    wait_for_level(&status, 101).await;

    // Exactly one header probe per mismatching level (100 down to 80) plus
    // the matching probe at 79: 21 reverts, never fewer, never more.
    let expected: Vec<Level> = (79..=100).rev().collect();
    assert_eq!(node.header_calls(), expected);

    assert_eq!(store.get_block(79).await.unwrap().unwrap().hash, "A79");
    assert_eq!(store.get_block(80).await.unwrap().unwrap().hash, "B80");
    assert_eq!(store.get_block(101).await.unwrap().unwrap().hash, "B101");
    assert!(!status.read().unwrap().is_syncing);

    cancel_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

// ─── Diagnostics ─────────────────────────────────────────────────────────────

struct SyntheticNode {
    baking: Vec<NodeRight>,
    attesting: Vec<NodeRight>,
    delegates: Vec<NodeDelegate>,
}

#[async_trait]
impl NodeSource for SyntheticNode {
    async fn get_head(&self) -> Result<NodeHeader, IndexerError> {
        Err(IndexerError::Node("not used by diagnostics".into()))
    }
    async fn get_header(&self, _: Level) -> Result<NodeHeader, IndexerError> {
        Err(IndexerError::Node("not used by diagnostics".into()))
    }
    async fn get_block(&self, _: Level) -> Result<Value, IndexerError> {
        Err(IndexerError::Node("not used by diagnostics".into()))
    }
    async fn get_baking_rights(&self, _: CycleIndex) -> Result<Vec<NodeRight>, IndexerError> {
        Ok(self.baking.clone())
    }
    async fn get_attesting_rights(&self, _: CycleIndex) -> Result<Vec<NodeRight>, IndexerError> {
        Ok(self.attesting.clone())
    }
    async fn get_delegate(&self, _: Level, address: &str) -> Result<NodeDelegate, IndexerError> {
        self.delegates
            .iter()
            .find(|d| d.address == address)
            .cloned()
            .ok_or_else(|| IndexerError::Node(format!("unknown delegate {address}")))
    }
    async fn get_contract(&self, _: Level, _: &str) -> Result<NodeContract, IndexerError> {
        Err(IndexerError::Node("not used by diagnostics".into()))
    }
}

/// Build the node's view from what the indexer itself persisted.
async fn node_view(store: &InMemoryStorage) -> SyntheticNode {
    let mut baking = vec![];
    let mut attesting = vec![];
    for right in store.get_rights(0).await.unwrap() {
        let account = store.get_account(right.baker_id).await.unwrap().unwrap();
        let entry = NodeRight { level: right.level, round: right.round, delegate: account.address };
        match right.kind {
            RightKind::Baking => baking.push(entry),
            RightKind::Attesting => attesting.push(entry),
        }
    }
    let delegates = store
        .list_delegates()
        .await
        .unwrap()
        .into_iter()
        .map(|d| NodeDelegate {
            address: d.address,
            balance: d.balance,
            staking_balance: d.staking_balance,
            frozen_deposits: d.frozen_deposits,
        })
        .collect();
    SyntheticNode { baking, attesting, delegates }
}

#[tokio::test]
async fn diagnostics_clean_when_node_agrees() {
    let store = seeded_store().await;
    let mut engine = engine_over(store.clone()).await;
    apply_empty_chain(&mut engine, 1..=2).await;

    let node = Arc::new(node_view(&store).await);
    let dyn_store: Arc<dyn Storage> = store;
    let diagnostics = Diagnostics::new(node, dyn_store, Duration::from_secs(60));
    let report = diagnostics.run_once().await.unwrap();
    assert!(report.is_clean(), "mismatches: {}", report.mismatches);
    assert!(report.rights_checked > 0);
    assert_eq!(report.balances_checked, 2);
}

#[tokio::test]
async fn diagnostics_flags_divergence() {
    let store = seeded_store().await;
    let mut engine = engine_over(store.clone()).await;
    apply_empty_chain(&mut engine, 1..=2).await;

    let mut view = node_view(&store).await;
    // The node disagrees about one right and one balance.
    view.baking[0].delegate = "tz1somebodyElse".into();
    view.delegates[0].balance += 1;

    let dyn_store: Arc<dyn Storage> = store;
    let diagnostics = Diagnostics::new(Arc::new(view), dyn_store, Duration::from_secs(60));
    let report = diagnostics.run_once().await.unwrap();
    assert_eq!(report.mismatches, 2);
}
