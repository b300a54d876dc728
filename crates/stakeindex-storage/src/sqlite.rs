//! SQLite storage backend.
//!
//! Persists the full relational model to a single SQLite file using `sqlx`
//! with WAL mode. The schema carries a version row; opening a database
//! whose version differs from the binary's expected version fails with the
//! fatal schema-mismatch error instead of migrating silently.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use stakeindex_core::error::IndexerError;
use stakeindex_core::models::{
    Account, AccountKind, BakingRight, Block, CycleInfo, RightKind, SnapshotEntry, StakingUpdate,
    StakingUpdateKind, TransactionOp,
};
use stakeindex_core::protocol::{ProtoConstants, Protocol};
use stakeindex_core::state::AppState;
use stakeindex_core::store::{Storage, WriteBatch, SCHEMA_VERSION};
use stakeindex_core::types::{AccountId, CycleIndex, Level, OpStatus};

/// SQLite-backed storage.
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite:./index.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database (tests / ephemeral runs).
    ///
    /// Pinned to a single connection: every pooled connection to
    /// `sqlite::memory:` would otherwise get its own empty database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables, enable WAL mode, and enforce the schema version gate.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_info (
                id      INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        let row = sqlx::query("SELECT version FROM schema_info WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        match row {
            Some(r) => {
                let found: i64 = r.get("version");
                if found as i32 != SCHEMA_VERSION {
                    return Err(IndexerError::SchemaMismatch {
                        expected: SCHEMA_VERSION,
                        found: found as i32,
                    });
                }
            }
            None => {
                sqlx::query("INSERT INTO schema_info (id, version) VALUES (1, ?)")
                    .bind(SCHEMA_VERSION as i64)
                    .execute(&self.pool)
                    .await
                    .map_err(storage_err)?;
            }
        }

        for ddl in [
            "CREATE TABLE IF NOT EXISTS app_state (
                id                     INTEGER PRIMARY KEY CHECK (id = 1),
                level                  INTEGER NOT NULL,
                hash                   TEXT    NOT NULL,
                protocol               TEXT    NOT NULL,
                next_protocol          TEXT    NOT NULL,
                timestamp              INTEGER NOT NULL,
                known_head             INTEGER NOT NULL,
                account_counter        INTEGER NOT NULL,
                operation_counter      INTEGER NOT NULL,
                staking_update_counter INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS blocks (
                level       INTEGER PRIMARY KEY,
                hash        TEXT    NOT NULL,
                predecessor TEXT    NOT NULL,
                timestamp   INTEGER NOT NULL,
                proto_code  INTEGER NOT NULL,
                baker_id    INTEGER,
                events      INTEGER NOT NULL,
                operations  INTEGER NOT NULL,
                reward      INTEGER NOT NULL,
                fees        INTEGER NOT NULL,
                burned      INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS accounts (
                id                  INTEGER PRIMARY KEY,
                address             TEXT    NOT NULL UNIQUE,
                kind                TEXT    NOT NULL,
                balance             INTEGER NOT NULL,
                counter             INTEGER NOT NULL,
                delegate_id         INTEGER,
                staking_balance     INTEGER NOT NULL,
                frozen_deposits     INTEGER NOT NULL,
                delegators_count    INTEGER NOT NULL,
                activation_level    INTEGER,
                deactivation_level  INTEGER,
                pubkey_first_byte   INTEGER,
                first_level         INTEGER NOT NULL,
                last_level          INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS protocols (
                code        INTEGER PRIMARY KEY,
                hash        TEXT    NOT NULL,
                first_level INTEGER NOT NULL,
                last_level  INTEGER NOT NULL,
                constants   TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS cycles (
                idx            INTEGER PRIMARY KEY,
                first_level    INTEGER NOT NULL,
                last_level     INTEGER NOT NULL,
                snapshot_level INTEGER NOT NULL,
                total_staking  INTEGER NOT NULL,
                seed           TEXT    NOT NULL,
                snapshot       TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS baking_rights (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle    INTEGER NOT NULL,
                level    INTEGER NOT NULL,
                kind     TEXT    NOT NULL,
                round    INTEGER NOT NULL,
                baker_id INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS staking_updates (
                id        INTEGER PRIMARY KEY,
                level     INTEGER NOT NULL,
                cycle     INTEGER NOT NULL,
                baker_id  INTEGER NOT NULL,
                staker_id INTEGER NOT NULL,
                kind      TEXT    NOT NULL,
                amount    INTEGER NOT NULL,
                op_id     INTEGER
            );",
            "CREATE TABLE IF NOT EXISTS transactions (
                id        INTEGER PRIMARY KEY,
                level     INTEGER NOT NULL,
                op_hash   TEXT    NOT NULL,
                counter   INTEGER NOT NULL,
                sender_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                amount    INTEGER NOT NULL,
                fee       INTEGER NOT NULL,
                burned    INTEGER NOT NULL,
                status    TEXT    NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_rights_cycle ON baking_rights (cycle);",
            "CREATE INDEX IF NOT EXISTS idx_transactions_level ON transactions (level);",
            "CREATE INDEX IF NOT EXISTS idx_staking_level ON staking_updates (level);",
            "CREATE INDEX IF NOT EXISTS idx_blocks_baker ON blocks (baker_id);",
        ] {
            sqlx::query(ddl).execute(&self.pool).await.map_err(storage_err)?;
        }

        Ok(())
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn block_from_row(row: &sqlx::sqlite::SqliteRow) -> Block {
    Block {
        level: row.get("level"),
        hash: row.get("hash"),
        predecessor: row.get("predecessor"),
        timestamp: row.get("timestamp"),
        proto_code: row.get::<i64, _>("proto_code") as i32,
        baker_id: row.get("baker_id"),
        events: row.get::<i64, _>("events") as u32,
        operations: row.get::<i64, _>("operations") as u32,
        reward: row.get("reward"),
        fees: row.get("fees"),
        burned: row.get("burned"),
    }
}

fn account_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Account, IndexerError> {
    let kind: String = row.get("kind");
    Ok(Account {
        id: row.get("id"),
        address: row.get("address"),
        kind: AccountKind::parse(&kind)
            .ok_or_else(|| IndexerError::Storage(format!("bad account kind {kind}")))?,
        balance: row.get("balance"),
        counter: row.get("counter"),
        delegate_id: row.get("delegate_id"),
        staking_balance: row.get("staking_balance"),
        frozen_deposits: row.get("frozen_deposits"),
        delegators_count: row.get("delegators_count"),
        activation_level: row.get("activation_level"),
        deactivation_level: row.get("deactivation_level"),
        pubkey_first_byte: row.get::<Option<i64>, _>("pubkey_first_byte").map(|b| b as u8),
        first_level: row.get("first_level"),
        last_level: row.get("last_level"),
    })
}

fn protocol_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Protocol, IndexerError> {
    let constants: String = row.get("constants");
    let constants: ProtoConstants = serde_json::from_str(&constants).map_err(storage_err)?;
    Ok(Protocol {
        code: row.get::<i64, _>("code") as i32,
        hash: row.get("hash"),
        first_level: row.get("first_level"),
        last_level: row.get("last_level"),
        constants,
    })
}

fn cycle_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CycleInfo, IndexerError> {
    let snapshot: String = row.get("snapshot");
    let snapshot: Vec<SnapshotEntry> = serde_json::from_str(&snapshot).map_err(storage_err)?;
    Ok(CycleInfo {
        index: row.get("idx"),
        first_level: row.get("first_level"),
        last_level: row.get("last_level"),
        snapshot_level: row.get("snapshot_level"),
        total_staking: row.get("total_staking"),
        seed: row.get("seed"),
        snapshot,
    })
}

fn right_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<BakingRight, IndexerError> {
    let kind: String = row.get("kind");
    Ok(BakingRight {
        cycle: row.get("cycle"),
        level: row.get("level"),
        kind: RightKind::parse(&kind)
            .ok_or_else(|| IndexerError::Storage(format!("bad right kind {kind}")))?,
        round: row.get::<i64, _>("round") as i32,
        baker_id: row.get("baker_id"),
    })
}

fn staking_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StakingUpdate, IndexerError> {
    let kind: String = row.get("kind");
    Ok(StakingUpdate {
        id: row.get("id"),
        level: row.get("level"),
        cycle: row.get("cycle"),
        baker_id: row.get("baker_id"),
        staker_id: row.get("staker_id"),
        kind: StakingUpdateKind::parse(&kind)
            .ok_or_else(|| IndexerError::Storage(format!("bad staking kind {kind}")))?,
        amount: row.get("amount"),
        op_id: row.get("op_id"),
    })
}

fn transaction_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TransactionOp, IndexerError> {
    let status: String = row.get("status");
    Ok(TransactionOp {
        id: row.get("id"),
        level: row.get("level"),
        op_hash: row.get("op_hash"),
        counter: row.get("counter"),
        sender_id: row.get("sender_id"),
        target_id: row.get("target_id"),
        amount: row.get("amount"),
        fee: row.get("fee"),
        burned: row.get("burned"),
        status: OpStatus::parse(&status)
            .ok_or_else(|| IndexerError::Storage(format!("bad op status {status}")))?,
    })
}

// ─── Storage impl ────────────────────────────────────────────────────────────

#[async_trait]
impl Storage for SqliteStorage {
    async fn schema_version(&self) -> Result<Option<i32>, IndexerError> {
        let row = sqlx::query("SELECT version FROM schema_info WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<i64, _>("version") as i32))
    }

    async fn load_app_state(&self) -> Result<Option<AppState>, IndexerError> {
        let row = sqlx::query("SELECT * FROM app_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| AppState {
            level: r.get("level"),
            hash: r.get("hash"),
            protocol: r.get("protocol"),
            next_protocol: r.get("next_protocol"),
            timestamp: r.get("timestamp"),
            known_head: r.get("known_head"),
            account_counter: r.get("account_counter"),
            operation_counter: r.get("operation_counter"),
            staking_update_counter: r.get("staking_update_counter"),
        }))
    }

    async fn get_block(&self, level: Level) -> Result<Option<Block>, IndexerError> {
        let row = sqlx::query("SELECT * FROM blocks WHERE level = ?")
            .bind(level)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| block_from_row(&r)))
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, IndexerError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| account_from_row(&r)).transpose()
    }

    async fn get_account_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Account>, IndexerError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| account_from_row(&r)).transpose()
    }

    async fn list_delegates(&self) -> Result<Vec<Account>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE kind = 'delegate' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(account_from_row).collect()
    }

    async fn get_protocol(&self, code: i32) -> Result<Option<Protocol>, IndexerError> {
        let row = sqlx::query("SELECT * FROM protocols WHERE code = ?")
            .bind(code as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| protocol_from_row(&r)).transpose()
    }

    async fn get_cycle(&self, index: CycleIndex) -> Result<Option<CycleInfo>, IndexerError> {
        let row = sqlx::query("SELECT * FROM cycles WHERE idx = ?")
            .bind(index)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| cycle_from_row(&r)).transpose()
    }

    async fn get_rights(&self, cycle: CycleIndex) -> Result<Vec<BakingRight>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM baking_rights WHERE cycle = ? ORDER BY id")
            .bind(cycle)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(right_from_row).collect()
    }

    async fn get_transactions(&self, level: Level) -> Result<Vec<TransactionOp>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM transactions WHERE level = ? ORDER BY id")
            .bind(level)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn get_staking_updates(
        &self,
        level: Level,
    ) -> Result<Vec<StakingUpdate>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM staking_updates WHERE level = ? ORDER BY id")
            .bind(level)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(staking_from_row).collect()
    }

    async fn last_activity_level(
        &self,
        account: AccountId,
        before_level: Level,
    ) -> Result<Option<Level>, IndexerError> {
        let row = sqlx::query(
            "SELECT MAX(lvl) AS lvl FROM (
                SELECT MAX(level) AS lvl FROM blocks
                    WHERE baker_id = ?1 AND level < ?2
                UNION ALL
                SELECT MAX(level) FROM transactions
                    WHERE (sender_id = ?1 OR target_id = ?1) AND level < ?2
                UNION ALL
                SELECT MAX(level) FROM staking_updates
                    WHERE (baker_id = ?1 OR staker_id = ?1) AND level < ?2
            )",
        )
        .bind(account)
        .bind(before_level)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(row.get::<Option<i64>, _>("lvl"))
    }

    /// All writes in one transaction: a partial failure rolls everything
    /// back and leaves the database exactly as it was.
    async fn apply_batch(&self, batch: &WriteBatch) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        for level in &batch.blocks_del {
            sqlx::query("DELETE FROM blocks WHERE level = ?")
                .bind(level)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        for id in &batch.accounts_del {
            sqlx::query("DELETE FROM accounts WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        for code in &batch.protocols_del {
            sqlx::query("DELETE FROM protocols WHERE code = ?")
                .bind(*code as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        for index in &batch.cycles_del {
            sqlx::query("DELETE FROM cycles WHERE idx = ?")
                .bind(index)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        for cycle in &batch.rights_del_cycles {
            sqlx::query("DELETE FROM baking_rights WHERE cycle = ?")
                .bind(cycle)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        for id in &batch.staking_del {
            sqlx::query("DELETE FROM staking_updates WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        for id in &batch.transactions_del {
            sqlx::query("DELETE FROM transactions WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        for block in &batch.blocks_put {
            sqlx::query(
                "INSERT OR REPLACE INTO blocks
                 (level, hash, predecessor, timestamp, proto_code, baker_id, events, operations, reward, fees, burned)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(block.level)
            .bind(&block.hash)
            .bind(&block.predecessor)
            .bind(block.timestamp)
            .bind(block.proto_code as i64)
            .bind(block.baker_id)
            .bind(block.events as i64)
            .bind(block.operations as i64)
            .bind(block.reward)
            .bind(block.fees)
            .bind(block.burned)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        for account in &batch.accounts_put {
            sqlx::query(
                "INSERT OR REPLACE INTO accounts
                 (id, address, kind, balance, counter, delegate_id, staking_balance, frozen_deposits,
                  delegators_count, activation_level, deactivation_level, pubkey_first_byte, first_level, last_level)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(account.id)
            .bind(&account.address)
            .bind(account.kind.as_str())
            .bind(account.balance)
            .bind(account.counter)
            .bind(account.delegate_id)
            .bind(account.staking_balance)
            .bind(account.frozen_deposits)
            .bind(account.delegators_count)
            .bind(account.activation_level)
            .bind(account.deactivation_level)
            .bind(account.pubkey_first_byte.map(|b| b as i64))
            .bind(account.first_level)
            .bind(account.last_level)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        for protocol in &batch.protocols_put {
            let constants = serde_json::to_string(&protocol.constants).map_err(storage_err)?;
            sqlx::query(
                "INSERT OR REPLACE INTO protocols (code, hash, first_level, last_level, constants)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(protocol.code as i64)
            .bind(&protocol.hash)
            .bind(protocol.first_level)
            .bind(protocol.last_level)
            .bind(constants)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        for cycle in &batch.cycles_put {
            let snapshot = serde_json::to_string(&cycle.snapshot).map_err(storage_err)?;
            sqlx::query(
                "INSERT OR REPLACE INTO cycles
                 (idx, first_level, last_level, snapshot_level, total_staking, seed, snapshot)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(cycle.index)
            .bind(cycle.first_level)
            .bind(cycle.last_level)
            .bind(cycle.snapshot_level)
            .bind(cycle.total_staking)
            .bind(&cycle.seed)
            .bind(snapshot)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        for right in &batch.rights_put {
            sqlx::query(
                "INSERT INTO baking_rights (cycle, level, kind, round, baker_id)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(right.cycle)
            .bind(right.level)
            .bind(right.kind.as_str())
            .bind(right.round as i64)
            .bind(right.baker_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        for update in &batch.staking_put {
            sqlx::query(
                "INSERT OR REPLACE INTO staking_updates
                 (id, level, cycle, baker_id, staker_id, kind, amount, op_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(update.id)
            .bind(update.level)
            .bind(update.cycle)
            .bind(update.baker_id)
            .bind(update.staker_id)
            .bind(update.kind.as_str())
            .bind(update.amount)
            .bind(update.op_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        for op in &batch.transactions_put {
            sqlx::query(
                "INSERT OR REPLACE INTO transactions
                 (id, level, op_hash, counter, sender_id, target_id, amount, fee, burned, status)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(op.id)
            .bind(op.level)
            .bind(&op.op_hash)
            .bind(op.counter)
            .bind(op.sender_id)
            .bind(op.target_id)
            .bind(op.amount)
            .bind(op.fee)
            .bind(op.burned)
            .bind(op.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        if let Some(state) = &batch.state {
            sqlx::query(
                "INSERT OR REPLACE INTO app_state
                 (id, level, hash, protocol, next_protocol, timestamp, known_head,
                  account_counter, operation_counter, staking_update_counter)
                 VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(state.level)
            .bind(&state.hash)
            .bind(&state.protocol)
            .bind(&state.next_protocol)
            .bind(state.timestamp)
            .bind(state.known_head)
            .bind(state.account_counter)
            .bind(state.operation_counter)
            .bind(state.staking_update_counter)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(
            blocks = batch.blocks_put.len(),
            accounts = batch.accounts_put.len(),
            "batch committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakeindex_core::protocol::Capabilities;
    use stakeindex_core::rights::TieBreak;

    fn sample_state() -> AppState {
        let mut state = AppState::bootstrap("BLgenesis", 1_700_000_000);
        state.level = 42;
        state.hash = "BL42".into();
        state.account_counter = 7;
        state
    }

    #[tokio::test]
    async fn schema_version_is_written() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), Some(SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn app_state_roundtrip() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.load_app_state().await.unwrap().is_none());

        let batch = WriteBatch { state: Some(sample_state()), ..Default::default() };
        store.apply_batch(&batch).await.unwrap();

        let loaded = store.load_app_state().await.unwrap().unwrap();
        assert_eq!(loaded, sample_state());
    }

    #[tokio::test]
    async fn account_roundtrip_with_null_fields() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let mut account = Account::new_user(1, "tz1aaa", 5);
        account.kind = AccountKind::Delegate;
        account.pubkey_first_byte = Some(0x30);
        account.activation_level = Some(5);

        let batch = WriteBatch { accounts_put: vec![account.clone()], ..Default::default() };
        store.apply_batch(&batch).await.unwrap();

        let loaded = store.get_account(1).await.unwrap().unwrap();
        assert_eq!(loaded, account);
        assert_eq!(store.list_delegates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn protocol_constants_json_roundtrip() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let protocol = Protocol {
            code: 1,
            hash: "PtAlpha".into(),
            first_level: 1,
            last_level: -1,
            constants: ProtoConstants {
                blocks_per_cycle: 8,
                blocks_per_snapshot: 4,
                block_reward: 1_000,
                minimal_stake: 6_000,
                baking_rounds: 2,
                attester_slots: 4,
                tie_break: TieBreak::PubkeyPrefixed,
                capabilities: Capabilities { staking_updates: true, attesting_rights: true },
                invoices: vec![("tz1invoice".into(), 100)],
            },
        };
        let batch = WriteBatch { protocols_put: vec![protocol.clone()], ..Default::default() };
        store.apply_batch(&batch).await.unwrap();

        let loaded = store.get_protocol(1).await.unwrap().unwrap();
        assert_eq!(loaded, protocol);
    }

    #[tokio::test]
    async fn rights_ordered_and_deleted_per_cycle() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let right = |cycle, level, round| BakingRight {
            cycle,
            level,
            kind: RightKind::Baking,
            round,
            baker_id: 1,
        };
        let batch = WriteBatch {
            rights_put: vec![right(0, 2, 0), right(0, 1, 0), right(1, 9, 0)],
            ..Default::default()
        };
        store.apply_batch(&batch).await.unwrap();

        let rights = store.get_rights(0).await.unwrap();
        let levels: Vec<_> = rights.iter().map(|r| r.level).collect();
        assert_eq!(levels, vec![2, 1]); // generation order, not level order

        let batch = WriteBatch { rights_del_cycles: vec![0], ..Default::default() };
        store.apply_batch(&batch).await.unwrap();
        assert!(store.get_rights(0).await.unwrap().is_empty());
        assert_eq!(store.get_rights(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn last_activity_level_unions_tables() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let batch = WriteBatch {
            transactions_put: vec![TransactionOp {
                id: 1,
                level: 11,
                op_hash: "op1".into(),
                counter: 1,
                sender_id: 5,
                target_id: 6,
                amount: 10,
                fee: 1,
                burned: 0,
                status: OpStatus::Applied,
            }],
            staking_put: vec![StakingUpdate {
                id: 1,
                level: 13,
                cycle: 1,
                baker_id: 6,
                staker_id: 5,
                kind: StakingUpdateKind::Stake,
                amount: 10,
                op_id: None,
            }],
            ..Default::default()
        };
        store.apply_batch(&batch).await.unwrap();

        assert_eq!(store.last_activity_level(5, 100).await.unwrap(), Some(13));
        assert_eq!(store.last_activity_level(6, 100).await.unwrap(), Some(13));
        assert_eq!(store.last_activity_level(7, 100).await.unwrap(), None);
        // The bound excludes rows at or above it.
        assert_eq!(store.last_activity_level(5, 13).await.unwrap(), Some(11));
    }
}
