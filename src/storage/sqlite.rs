//! SQLite Persistent Storage for Deposits
//!
//! Provides durable storage for deposit records that survives service restarts.
//! Uses connection pooling via r2d2 for concurrent access. Several watcher
//! processes may share one database file; the claim is a single conditional
//! `UPDATE`, so SQLite's write lock is the only arbiter.

use async_trait::async_trait;
use primitive_types::U256;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, ToSql};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::traits::{DepositFilter, DepositStore, StorageError, StorageResult};
use crate::types::{parse_wei, Address, Deposit, TxHash};

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed deposit store with connection pooling
pub struct SqliteDepositStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteDepositStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Connection(e.to_string()))?;
            }
        }

        // WAL lets API readers proceed while a watcher writes
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            conn.busy_timeout(BUSY_TIMEOUT)
        });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS deposits (
                id TEXT PRIMARY KEY,
                deposit_address TEXT NOT NULL UNIQUE,
                destination_address TEXT NOT NULL,
                derivation_index INTEGER NOT NULL,
                nonce INTEGER NOT NULL,
                deposit_status TEXT NOT NULL DEFAULT 'waiting',
                payout_status TEXT NOT NULL DEFAULT 'pending',
                deposit_amount TEXT NOT NULL,
                deposit_tx_hash TEXT,
                deposit_block_number INTEGER,
                deposit_created_block_number INTEGER,
                payout_tx_hash TEXT,
                payout_amount TEXT,
                payout_error TEXT,
                claimed_by TEXT,
                claimed_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (destination_address, nonce)
            );

            CREATE INDEX IF NOT EXISTS idx_deposits_status ON deposits(deposit_status, payout_status);
            CREATE INDEX IF NOT EXISTS idx_deposits_created_at ON deposits(created_at);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Convert a database row to Deposit
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Deposit> {
        Ok(Deposit {
            id: row.get("id")?,
            deposit_address: parse_column(row, "deposit_address")?,
            destination_address: parse_column(row, "destination_address")?,
            index: row.get::<_, i64>("derivation_index")? as u32,
            nonce: row.get::<_, i64>("nonce")? as u64,
            deposit_status: parse_column(row, "deposit_status")?,
            payout_status: parse_column(row, "payout_status")?,
            deposit_amount: amount_column(row, "deposit_amount")?.unwrap_or_default(),
            deposit_tx_hash: parse_optional_column(row, "deposit_tx_hash")?,
            deposit_block_number: row
                .get::<_, Option<i64>>("deposit_block_number")?
                .map(|v| v as u64),
            deposit_created_block_number: row
                .get::<_, Option<i64>>("deposit_created_block_number")?
                .map(|v| v as u64),
            payout_tx_hash: parse_optional_column(row, "payout_tx_hash")?,
            payout_amount: amount_column(row, "payout_amount")?,
            payout_error: row.get("payout_error")?,
            claimed_by: row.get("claimed_by")?,
            claimed_at: row.get::<_, Option<i64>>("claimed_at")?.map(|v| v as u64),
            created_at: row.get::<_, i64>("created_at")? as u64,
            updated_at: row.get::<_, i64>("updated_at")? as u64,
        })
    }

    // Synchronous helper methods for the trait implementations

    fn insert_sync(&self, deposit: &Deposit) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO deposits (
                id, deposit_address, destination_address, derivation_index, nonce,
                deposit_status, payout_status, deposit_amount,
                deposit_tx_hash, deposit_block_number, deposit_created_block_number,
                payout_tx_hash, payout_amount, payout_error,
                claimed_by, claimed_at, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8,
                ?9, ?10, ?11,
                ?12, ?13, ?14,
                ?15, ?16, ?17, ?18
            )
            "#,
            params![
                deposit.id,
                deposit.deposit_address.to_lower_hex(),
                deposit.destination_address.to_lower_hex(),
                deposit.index as i64,
                deposit.nonce as i64,
                deposit.deposit_status.to_string(),
                deposit.payout_status.to_string(),
                deposit.deposit_amount.to_string(),
                deposit.deposit_tx_hash.map(|h| h.to_string()),
                deposit.deposit_block_number.map(|v| v as i64),
                deposit.deposit_created_block_number.map(|v| v as i64),
                deposit.payout_tx_hash.map(|h| h.to_string()),
                deposit.payout_amount.map(|a| a.to_string()),
                deposit.payout_error,
                deposit.claimed_by,
                deposit.claimed_at.map(|v| v as i64),
                deposit.created_at as i64,
                deposit.updated_at as i64,
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                // SQLITE_CONSTRAINT_PRIMARYKEY / SQLITE_CONSTRAINT_UNIQUE
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return StorageError::Duplicate(format!(
                        "{} ({}-{})",
                        deposit.deposit_address, deposit.destination_address, deposit.nonce
                    ));
                }
            }
            StorageError::Database(e.to_string())
        })?;

        Ok(())
    }

    fn query_one_sync(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Option<Deposit>, StorageError> {
        let conn = self.conn()?;

        let record = conn
            .query_row(sql, params, |row| Self::row_to_record(row))
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(record)
    }

    fn query_many_sync(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<Deposit>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let records = stmt
            .query_map(params, |row| Self::row_to_record(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(records)
    }

    fn list_sync(&self, filter: DepositFilter) -> Result<Vec<Deposit>, StorageError> {
        let deposit_status = filter.deposit_status.map(|s| s.to_string());
        let payout_status = filter.payout_status.map(|s| s.to_string());
        let claimed = filter.claimed.map(|c| c as i64);

        self.query_many_sync(
            r#"
            SELECT * FROM deposits
            WHERE (?1 IS NULL OR deposit_status = ?1)
              AND (?2 IS NULL OR payout_status = ?2)
              AND (?3 IS NULL OR (claimed_by IS NOT NULL) = ?3)
            ORDER BY created_at ASC, id ASC
            "#,
            params![deposit_status, payout_status, claimed],
        )
    }

    fn count_column_sync(&self, column: &str) -> Result<HashMap<String, u64>, StorageError> {
        let conn = self.conn()?;

        let sql = format!(
            "SELECT {column}, COUNT(*) as count FROM deposits GROUP BY {column}"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut counts = HashMap::new();
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| StorageError::Database(e.to_string()))?;

        for row in rows {
            let (status, count) = row.map_err(|e| StorageError::Database(e.to_string()))?;
            counts.insert(status, count as u64);
        }

        Ok(counts)
    }

    fn total_paid_out_sync(&self) -> Result<U256, StorageError> {
        let conn = self.conn()?;

        // Amounts are decimal text; sum in U256 rather than in SQL
        let mut stmt = conn
            .prepare(
                "SELECT payout_amount FROM deposits WHERE payout_status = 'sent' AND payout_amount IS NOT NULL",
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let amounts = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut total = U256::zero();
        for amount in amounts {
            let amount = amount.map_err(|e| StorageError::Database(e.to_string()))?;
            let value = parse_wei(&amount)
                .ok_or_else(|| StorageError::InvalidData(format!("payout_amount {}", amount)))?;
            total = total.saturating_add(value);
        }

        Ok(total)
    }

    /// Run a conditional UPDATE; `true` iff exactly one row changed
    fn update_sync(&self, sql: &str, params: &[&dyn ToSql]) -> Result<bool, StorageError> {
        let conn = self.conn()?;

        let rows_affected = conn
            .execute(sql, params)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows_affected == 1)
    }
}

fn conversion_error(
    column: &str,
    err: impl std::fmt::Display,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("{}: {}", column, err).into(),
    )
}

fn parse_column<T>(row: &rusqlite::Row, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e| conversion_error(column, e))
}

fn parse_optional_column<T>(row: &rusqlite::Row, column: &str) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    row.get::<_, Option<String>>(column)?
        .map(|raw| raw.parse().map_err(|e| conversion_error(column, e)))
        .transpose()
}

fn amount_column(row: &rusqlite::Row, column: &str) -> rusqlite::Result<Option<U256>> {
    row.get::<_, Option<String>>(column)?
        .map(|raw| parse_wei(&raw).ok_or_else(|| conversion_error(column, raw)))
        .transpose()
}

#[async_trait]
impl DepositStore for SqliteDepositStore {
    async fn insert(&self, deposit: &Deposit) -> StorageResult<()> {
        self.insert_sync(deposit)
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<Deposit>> {
        self.query_one_sync("SELECT * FROM deposits WHERE id = ?1", params![id])
    }

    async fn get_by_address(&self, address: &Address) -> StorageResult<Option<Deposit>> {
        self.query_one_sync(
            "SELECT * FROM deposits WHERE deposit_address = ?1",
            params![address.to_lower_hex()],
        )
    }

    async fn get_by_destination(
        &self,
        destination: &Address,
        nonce: u64,
    ) -> StorageResult<Option<Deposit>> {
        self.query_one_sync(
            "SELECT * FROM deposits WHERE destination_address = ?1 AND nonce = ?2",
            params![destination.to_lower_hex(), nonce as i64],
        )
    }

    async fn list(&self, filter: DepositFilter) -> StorageResult<Vec<Deposit>> {
        self.list_sync(filter)
    }

    async fn get_all(&self) -> StorageResult<Vec<Deposit>> {
        self.query_many_sync(
            "SELECT * FROM deposits ORDER BY created_at DESC, id DESC",
            params![],
        )
    }

    async fn count_by_status(&self) -> StorageResult<HashMap<String, u64>> {
        self.count_column_sync("deposit_status")
    }

    async fn count_by_payout_status(&self) -> StorageResult<HashMap<String, u64>> {
        self.count_column_sync("payout_status")
    }

    async fn total_paid_out(&self) -> StorageResult<U256> {
        self.total_paid_out_sync()
    }

    async fn mark_confirming(
        &self,
        id: &str,
        tx_hash: &TxHash,
        block_number: u64,
        now: u64,
    ) -> StorageResult<bool> {
        self.update_sync(
            r#"
            UPDATE deposits SET
                deposit_status = 'confirming',
                deposit_tx_hash = ?2,
                deposit_block_number = ?3,
                updated_at = ?4
            WHERE id = ?1 AND deposit_status = 'waiting'
            "#,
            params![id, tx_hash.to_string(), block_number as i64, now as i64],
        )
    }

    async fn mark_confirmed(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.update_sync(
            r#"
            UPDATE deposits SET deposit_status = 'confirmed', updated_at = ?2
            WHERE id = ?1 AND deposit_status = 'confirming'
            "#,
            params![id, now as i64],
        )
    }

    async fn claim_deposit_for_processing(
        &self,
        id: &str,
        claimant: &str,
        now: u64,
    ) -> StorageResult<bool> {
        self.update_sync(
            r#"
            UPDATE deposits SET claimed_by = ?2, claimed_at = ?3, updated_at = ?3
            WHERE id = ?1
              AND deposit_status = 'confirmed'
              AND payout_status = 'pending'
              AND claimed_by IS NULL
            "#,
            params![id, claimant, now as i64],
        )
    }

    async fn release_claim(&self, id: &str, claimant: &str, now: u64) -> StorageResult<bool> {
        self.update_sync(
            r#"
            UPDATE deposits SET claimed_by = NULL, claimed_at = NULL, updated_at = ?3
            WHERE id = ?1 AND claimed_by = ?2 AND payout_status = 'pending'
            "#,
            params![id, claimant, now as i64],
        )
    }

    async fn record_payout_hash(
        &self,
        id: &str,
        claimant: &str,
        tx_hash: &TxHash,
        amount: U256,
        now: u64,
    ) -> StorageResult<bool> {
        self.update_sync(
            r#"
            UPDATE deposits SET payout_tx_hash = ?3, payout_amount = ?4, updated_at = ?5
            WHERE id = ?1 AND claimed_by = ?2 AND payout_status = 'pending'
            "#,
            params![id, claimant, tx_hash.to_string(), amount.to_string(), now as i64],
        )
    }

    async fn mark_payout_sent(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.update_sync(
            r#"
            UPDATE deposits SET
                payout_status = 'sent',
                payout_error = NULL,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = ?2
            WHERE id = ?1 AND payout_status = 'pending' AND payout_tx_hash IS NOT NULL
            "#,
            params![id, now as i64],
        )
    }

    async fn mark_payout_failed(&self, id: &str, error: &str, now: u64) -> StorageResult<bool> {
        self.update_sync(
            r#"
            UPDATE deposits SET
                payout_status = 'failed',
                payout_error = ?2,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = ?3
            WHERE id = ?1 AND payout_status = 'pending'
            "#,
            params![id, error, now as i64],
        )
    }

    async fn fail_claimed_payout(
        &self,
        id: &str,
        claimant: &str,
        broadcast: Option<&TxHash>,
        error: &str,
        now: u64,
    ) -> StorageResult<bool> {
        self.update_sync(
            r#"
            UPDATE deposits SET
                payout_status = 'failed',
                payout_error = ?4,
                payout_tx_hash = COALESCE(?3, payout_tx_hash),
                payout_amount = CASE WHEN ?3 IS NULL THEN payout_amount ELSE deposit_amount END,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = ?5
            WHERE id = ?1
              AND payout_status = 'pending'
              AND (claimed_by IS NULL OR claimed_by = ?2)
            "#,
            params![
                id,
                claimant,
                broadcast.map(|hash| hash.to_string()),
                error,
                now as i64
            ],
        )
    }

    async fn reset_payout(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.update_sync(
            r#"
            UPDATE deposits SET payout_status = 'pending', payout_error = NULL, updated_at = ?2
            WHERE id = ?1
              AND deposit_status = 'confirmed'
              AND payout_status = 'failed'
              AND payout_tx_hash IS NULL
            "#,
            params![id, now as i64],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepositStatus, PayoutStatus};
    use std::sync::Arc;

    fn create_test_record(seed: u8, nonce: u64) -> Deposit {
        Deposit::new(
            Address::from_bytes([seed; 20]),
            Address::from_bytes([0xbb; 20]),
            seed as u32,
            nonce,
            U256::from_dec_str("123456789012345678901234567890").unwrap(),
            Some(1_000),
        )
    }

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "hdbridge-{}-{}-{:08x}.db",
            name,
            std::process::id(),
            rand::random::<u32>()
        ))
    }

    async fn confirmed(store: &SqliteDepositStore, seed: u8) -> Deposit {
        let record = create_test_record(seed, seed as u64);
        store.insert(&record).await.unwrap();
        store
            .mark_confirming(&record.id, &TxHash::from_bytes([seed; 32]), 1_005, 10)
            .await
            .unwrap();
        store.mark_confirmed(&record.id, 11).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let store = SqliteDepositStore::in_memory().unwrap();
        let record = create_test_record(1, 0);

        store.insert(&record).await.unwrap();

        let retrieved = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(retrieved, record);

        let by_address = store
            .get_by_address(&record.deposit_address)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_address.id, record.id);

        let by_destination = store
            .get_by_destination(&record.destination_address, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_destination.id, record.id);
    }

    #[tokio::test]
    async fn test_duplicate_pair_and_address() {
        let store = SqliteDepositStore::in_memory().unwrap();
        store.insert(&create_test_record(1, 0)).await.unwrap();

        let same_pair = create_test_record(2, 0);
        assert!(matches!(
            store.insert(&same_pair).await,
            Err(StorageError::Duplicate(_))
        ));

        let same_address = create_test_record(1, 9);
        assert!(matches!(
            store.insert(&same_address).await,
            Err(StorageError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_updates() {
        let store = SqliteDepositStore::in_memory().unwrap();
        let record = confirmed(&store, 1).await;

        let stored = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.deposit_status, DepositStatus::Confirmed);
        assert_eq!(stored.deposit_block_number, Some(1_005));
        assert_eq!(stored.deposit_tx_hash, Some(TxHash::from_bytes([1; 32])));

        assert!(store.claim_deposit_for_processing(&record.id, "w1", 20).await.unwrap());
        assert!(!store.claim_deposit_for_processing(&record.id, "w2", 21).await.unwrap());

        // Refused without a hash
        assert!(!store.mark_payout_sent(&record.id, 22).await.unwrap());

        let hash = TxHash::from_bytes([0xab; 32]);
        assert!(!store
            .record_payout_hash(&record.id, "w2", &hash, record.deposit_amount, 22)
            .await
            .unwrap());
        assert!(store
            .record_payout_hash(&record.id, "w1", &hash, record.deposit_amount, 22)
            .await
            .unwrap());
        assert!(store.mark_payout_sent(&record.id, 23).await.unwrap());

        let stored = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.payout_status, PayoutStatus::Sent);
        assert_eq!(stored.payout_tx_hash, Some(hash));
        assert_eq!(stored.payout_amount, Some(record.deposit_amount));
        assert!(stored.claimed_by.is_none());
        assert_eq!(store.total_paid_out().await.unwrap(), record.deposit_amount);
    }

    #[tokio::test]
    async fn test_release_and_failure() {
        let store = SqliteDepositStore::in_memory().unwrap();
        let record = confirmed(&store, 2).await;

        store.claim_deposit_for_processing(&record.id, "w1", 20).await.unwrap();
        assert!(store.release_claim(&record.id, "w1", 21).await.unwrap());
        let stored = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert!(stored.awaiting_payout());

        store.claim_deposit_for_processing(&record.id, "w1", 22).await.unwrap();
        assert!(store.mark_payout_failed(&record.id, "boom", 23).await.unwrap());
        assert!(!store.mark_payout_failed(&record.id, "again", 24).await.unwrap());

        let stored = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.payout_status, PayoutStatus::Failed);
        assert_eq!(stored.payout_error.as_deref(), Some("boom"));
        assert_eq!(stored.deposit_status, DepositStatus::Confirmed);

        assert!(store.reset_payout(&record.id, 25).await.unwrap());
        let stored = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.payout_status, PayoutStatus::Pending);
    }

    #[tokio::test]
    async fn test_claimed_failure_keeps_broadcast_hash() {
        let store = SqliteDepositStore::in_memory().unwrap();
        let record = confirmed(&store, 3).await;
        store.claim_deposit_for_processing(&record.id, "w1", 20).await.unwrap();

        assert!(!store
            .fail_claimed_payout(&record.id, "w2", None, "lost claim", 21)
            .await
            .unwrap());

        let hash = TxHash::from_bytes([0xcd; 32]);
        assert!(store
            .fail_claimed_payout(&record.id, "w1", Some(&hash), "not recorded", 22)
            .await
            .unwrap());

        let stored = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.payout_status, PayoutStatus::Failed);
        assert_eq!(stored.payout_tx_hash, Some(hash));
        assert_eq!(stored.payout_amount, Some(record.deposit_amount));
        assert_eq!(stored.payout_error.as_deref(), Some("not recorded"));
        assert!(stored.claimed_by.is_none());
        assert!(!store.reset_payout(&record.id, 23).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_counts() {
        let store = SqliteDepositStore::in_memory().unwrap();
        let waiting = create_test_record(1, 1);
        store.insert(&waiting).await.unwrap();
        let claimed = confirmed(&store, 2).await;
        store.claim_deposit_for_processing(&claimed.id, "w1", 30).await.unwrap();

        let all_waiting = store
            .list(DepositFilter::deposit(DepositStatus::Waiting))
            .await
            .unwrap();
        assert_eq!(all_waiting.len(), 1);
        assert_eq!(all_waiting[0].id, waiting.id);

        let in_flight = store
            .list(
                DepositFilter::deposit(DepositStatus::Confirmed)
                    .with_payout(PayoutStatus::Pending)
                    .with_claimed(true),
            )
            .await
            .unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].claimed_by.as_deref(), Some("w1"));

        let unclaimed = store
            .list(DepositFilter::deposit(DepositStatus::Confirmed).with_claimed(false))
            .await
            .unwrap();
        assert!(unclaimed.is_empty());

        assert_eq!(store.list(DepositFilter::default()).await.unwrap().len(), 2);

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.get("waiting"), Some(&1));
        assert_eq!(counts.get("confirmed"), Some(&1));
        let payouts = store.count_by_payout_status().await.unwrap();
        assert_eq!(payouts.get("pending"), Some(&2));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let path = temp_db_path("reopen");
        let record = create_test_record(3, 0);
        {
            let store = SqliteDepositStore::new(&path).unwrap();
            store.insert(&record).await.unwrap();
        }

        let store = SqliteDepositStore::new(&path).unwrap();
        let retrieved = store.get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(retrieved, record);

        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_claim_exclusive_across_stores() {
        // Two independent pools on one file, like two watcher processes
        let path = temp_db_path("claim");
        let first = Arc::new(SqliteDepositStore::new(&path).unwrap());
        let second = Arc::new(SqliteDepositStore::new(&path).unwrap());
        let record = confirmed(&first, 4).await;

        let mut handles = Vec::new();
        for i in 0..12 {
            let store = if i % 2 == 0 { first.clone() } else { second.clone() };
            let id = record.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_deposit_for_processing(&id, &format!("watcher-{}", i), 40)
                    .await
                    .unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);

        drop(first);
        drop(second);
        let _ = std::fs::remove_file(&path);
    }
}
