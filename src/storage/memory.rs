//! In-Memory Storage Implementation
//!
//! Provides in-memory storage for testing and development.
//! Data is lost when the service restarts.

use async_trait::async_trait;
use primitive_types::U256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{DepositFilter, DepositStore, StorageError, StorageResult};
use crate::types::{Address, Deposit, DepositStatus, PayoutStatus, TxHash};

/// In-memory deposit store
///
/// All records sit behind one lock, so every conditional update runs its
/// check and its write under the same write guard.
#[derive(Clone, Default)]
pub struct MemoryDepositStore {
    records: Arc<RwLock<HashMap<String, Deposit>>>,
}

impl MemoryDepositStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` to record `id` iff `condition` holds; returns whether it applied
    async fn update_where<C, U>(&self, id: &str, condition: C, update: U) -> StorageResult<bool>
    where
        C: FnOnce(&Deposit) -> bool,
        U: FnOnce(&mut Deposit),
    {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) if condition(record) => {
                update(record);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find<P>(&self, predicate: P) -> Option<Deposit>
    where
        P: Fn(&Deposit) -> bool,
    {
        self.records
            .read()
            .await
            .values()
            .find(|record| predicate(record))
            .cloned()
    }
}

fn tally<I: Iterator<Item = String>>(keys: I) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

#[async_trait]
impl DepositStore for MemoryDepositStore {
    async fn insert(&self, deposit: &Deposit) -> StorageResult<()> {
        let mut records = self.records.write().await;

        if records.contains_key(&deposit.id) {
            return Err(StorageError::Duplicate(deposit.id.clone()));
        }
        for existing in records.values() {
            if existing.deposit_address == deposit.deposit_address {
                return Err(StorageError::Duplicate(deposit.deposit_address.to_string()));
            }
            if existing.destination_address == deposit.destination_address
                && existing.nonce == deposit.nonce
            {
                return Err(StorageError::Duplicate(format!(
                    "{}-{}",
                    deposit.destination_address, deposit.nonce
                )));
            }
        }

        records.insert(deposit.id.clone(), deposit.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<Deposit>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn get_by_address(&self, address: &Address) -> StorageResult<Option<Deposit>> {
        Ok(self.find(|r| r.deposit_address == *address).await)
    }

    async fn get_by_destination(
        &self,
        destination: &Address,
        nonce: u64,
    ) -> StorageResult<Option<Deposit>> {
        Ok(self
            .find(|r| r.destination_address == *destination && r.nonce == nonce)
            .await)
    }

    async fn list(&self, filter: DepositFilter) -> StorageResult<Vec<Deposit>> {
        let records = self.records.read().await;
        let mut result: Vec<Deposit> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    async fn get_all(&self) -> StorageResult<Vec<Deposit>> {
        let records = self.records.read().await;
        let mut result: Vec<Deposit> = records.values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn count_by_status(&self) -> StorageResult<HashMap<String, u64>> {
        let records = self.records.read().await;
        Ok(tally(records.values().map(|r| r.deposit_status.to_string())))
    }

    async fn count_by_payout_status(&self) -> StorageResult<HashMap<String, u64>> {
        let records = self.records.read().await;
        Ok(tally(records.values().map(|r| r.payout_status.to_string())))
    }

    async fn total_paid_out(&self) -> StorageResult<U256> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.payout_status == PayoutStatus::Sent)
            .filter_map(|r| r.payout_amount)
            .fold(U256::zero(), |acc, amount| acc.saturating_add(amount)))
    }

    async fn mark_confirming(
        &self,
        id: &str,
        tx_hash: &TxHash,
        block_number: u64,
        now: u64,
    ) -> StorageResult<bool> {
        let tx_hash = *tx_hash;
        self.update_where(
            id,
            |r| r.deposit_status == DepositStatus::Waiting,
            |r| {
                r.deposit_status = DepositStatus::Confirming;
                r.deposit_tx_hash = Some(tx_hash);
                r.deposit_block_number = Some(block_number);
                r.updated_at = now;
            },
        )
        .await
    }

    async fn mark_confirmed(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.update_where(
            id,
            |r| r.deposit_status == DepositStatus::Confirming,
            |r| {
                r.deposit_status = DepositStatus::Confirmed;
                r.updated_at = now;
            },
        )
        .await
    }

    async fn claim_deposit_for_processing(
        &self,
        id: &str,
        claimant: &str,
        now: u64,
    ) -> StorageResult<bool> {
        self.update_where(id, Deposit::awaiting_payout, |r| {
            r.claimed_by = Some(claimant.to_string());
            r.claimed_at = Some(now);
            r.updated_at = now;
        })
        .await
    }

    async fn release_claim(&self, id: &str, claimant: &str, now: u64) -> StorageResult<bool> {
        self.update_where(
            id,
            |r| {
                r.claimed_by.as_deref() == Some(claimant)
                    && r.payout_status == PayoutStatus::Pending
            },
            |r| {
                r.claimed_by = None;
                r.claimed_at = None;
                r.updated_at = now;
            },
        )
        .await
    }

    async fn record_payout_hash(
        &self,
        id: &str,
        claimant: &str,
        tx_hash: &TxHash,
        amount: U256,
        now: u64,
    ) -> StorageResult<bool> {
        let tx_hash = *tx_hash;
        self.update_where(
            id,
            |r| {
                r.claimed_by.as_deref() == Some(claimant)
                    && r.payout_status == PayoutStatus::Pending
            },
            |r| {
                r.payout_tx_hash = Some(tx_hash);
                r.payout_amount = Some(amount);
                r.updated_at = now;
            },
        )
        .await
    }

    async fn mark_payout_sent(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.update_where(
            id,
            |r| r.payout_status == PayoutStatus::Pending && r.payout_tx_hash.is_some(),
            |r| {
                r.payout_status = PayoutStatus::Sent;
                r.payout_error = None;
                r.claimed_by = None;
                r.claimed_at = None;
                r.updated_at = now;
            },
        )
        .await
    }

    async fn mark_payout_failed(&self, id: &str, error: &str, now: u64) -> StorageResult<bool> {
        self.update_where(
            id,
            |r| r.payout_status == PayoutStatus::Pending,
            |r| {
                r.payout_status = PayoutStatus::Failed;
                r.payout_error = Some(error.to_string());
                r.claimed_by = None;
                r.claimed_at = None;
                r.updated_at = now;
            },
        )
        .await
    }

    async fn fail_claimed_payout(
        &self,
        id: &str,
        claimant: &str,
        broadcast: Option<&TxHash>,
        error: &str,
        now: u64,
    ) -> StorageResult<bool> {
        let broadcast = broadcast.copied();
        self.update_where(
            id,
            |r| {
                r.payout_status == PayoutStatus::Pending
                    && r.claimed_by.as_deref().map_or(true, |c| c == claimant)
            },
            |r| {
                if let Some(hash) = broadcast {
                    r.payout_tx_hash = Some(hash);
                    r.payout_amount = Some(r.deposit_amount);
                }
                r.payout_status = PayoutStatus::Failed;
                r.payout_error = Some(error.to_string());
                r.claimed_by = None;
                r.claimed_at = None;
                r.updated_at = now;
            },
        )
        .await
    }

    async fn reset_payout(&self, id: &str, now: u64) -> StorageResult<bool> {
        self.update_where(
            id,
            |r| {
                r.deposit_status == DepositStatus::Confirmed
                    && r.payout_status == PayoutStatus::Failed
                    && r.payout_tx_hash.is_none()
            },
            |r| {
                r.payout_status = PayoutStatus::Pending;
                r.payout_error = None;
                r.updated_at = now;
            },
        )
        .await
    }
}
