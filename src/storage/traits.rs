//! Storage Trait Definitions
//!
//! Defines the abstract storage interface for deposits.
//! Implementations can use SQLite (production) or in-memory (testing).
//!
//! Every state transition is a conditional update that names the prior state
//! it expects and reports whether it applied. Callers never read-then-write.

use async_trait::async_trait;
use primitive_types::U256;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{Address, Deposit, DepositStatus, PayoutStatus, TxHash};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Selection criteria for [`DepositStore::list`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepositFilter {
    pub deposit_status: Option<DepositStatus>,
    pub payout_status: Option<PayoutStatus>,
    /// `Some(true)` only claimed, `Some(false)` only unclaimed
    pub claimed: Option<bool>,
}

impl DepositFilter {
    /// Deposits in the given source-side status
    pub fn deposit(status: DepositStatus) -> Self {
        Self {
            deposit_status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_payout(mut self, status: PayoutStatus) -> Self {
        self.payout_status = Some(status);
        self
    }

    pub fn with_claimed(mut self, claimed: bool) -> Self {
        self.claimed = Some(claimed);
        self
    }

    /// Whether `deposit` satisfies every set criterion
    pub fn matches(&self, deposit: &Deposit) -> bool {
        self.deposit_status.map_or(true, |s| deposit.deposit_status == s)
            && self.payout_status.map_or(true, |s| deposit.payout_status == s)
            && self.claimed.map_or(true, |c| deposit.is_claimed() == c)
    }
}

/// Deposit storage interface
///
/// Implementations:
/// - `SqliteDepositStore` - Production storage with SQLite
/// - `MemoryDepositStore` - In-memory storage for testing
#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Insert a new deposit
    ///
    /// Fails with `Duplicate` if the id, the deposit address, or the
    /// (destination, nonce) pair already exists.
    async fn insert(&self, deposit: &Deposit) -> StorageResult<()>;

    /// Get a deposit by ID
    async fn get_by_id(&self, id: &str) -> StorageResult<Option<Deposit>>;

    /// Get a deposit by its derived deposit address
    async fn get_by_address(&self, address: &Address) -> StorageResult<Option<Deposit>>;

    /// Get the deposit for a (destination, nonce) pair
    async fn get_by_destination(
        &self,
        destination: &Address,
        nonce: u64,
    ) -> StorageResult<Option<Deposit>>;

    /// Deposits matching `filter`, oldest first
    async fn list(&self, filter: DepositFilter) -> StorageResult<Vec<Deposit>>;

    /// Get all deposits, newest first
    async fn get_all(&self) -> StorageResult<Vec<Deposit>>;

    /// Count by deposit status
    async fn count_by_status(&self) -> StorageResult<HashMap<String, u64>>;

    /// Count by payout status
    async fn count_by_payout_status(&self) -> StorageResult<HashMap<String, u64>>;

    /// Sum of `payout_amount` over deposits with payout `sent`
    async fn total_paid_out(&self) -> StorageResult<U256>;

    /// waiting → confirming, recording the matching source transaction
    async fn mark_confirming(
        &self,
        id: &str,
        tx_hash: &TxHash,
        block_number: u64,
        now: u64,
    ) -> StorageResult<bool>;

    /// confirming → confirmed
    async fn mark_confirmed(&self, id: &str, now: u64) -> StorageResult<bool>;

    /// Atomically claim a confirmed, pending, unclaimed deposit
    ///
    /// Returns `true` iff this call took the claim.
    async fn claim_deposit_for_processing(
        &self,
        id: &str,
        claimant: &str,
        now: u64,
    ) -> StorageResult<bool>;

    /// Drop `claimant`'s claim, leaving the payout pending
    async fn release_claim(&self, id: &str, claimant: &str, now: u64) -> StorageResult<bool>;

    /// Persist the broadcast payout transaction while the claim is held
    async fn record_payout_hash(
        &self,
        id: &str,
        claimant: &str,
        tx_hash: &TxHash,
        amount: U256,
        now: u64,
    ) -> StorageResult<bool>;

    /// pending → sent; refused unless a payout hash is recorded
    async fn mark_payout_sent(&self, id: &str, now: u64) -> StorageResult<bool>;

    /// pending → failed with `error`; clears the claim
    async fn mark_payout_failed(&self, id: &str, error: &str, now: u64) -> StorageResult<bool>;

    /// pending → failed on behalf of the watcher that took the claim
    ///
    /// Applies only while `claimant` holds the claim or nobody does. A
    /// transfer that was broadcast but never recorded passes its hash as
    /// `broadcast`; it is stored as the payout hash (with the deposit amount)
    /// so the payout can never be reset into a second transfer.
    async fn fail_claimed_payout(
        &self,
        id: &str,
        claimant: &str,
        broadcast: Option<&TxHash>,
        error: &str,
        now: u64,
    ) -> StorageResult<bool>;

    /// failed → pending for a payout that never recorded a hash (admin retry)
    async fn reset_payout(&self, id: &str, now: u64) -> StorageResult<bool>;
}
