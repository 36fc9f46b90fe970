//! Payout Phase and In-Flight Recovery
//!
//! A payout is exclusive to the watcher holding the claim. The transfer hash is
//! persisted before waiting for the receipt, so a crash after broadcast leaves
//! enough on record to settle the payout from chain state without resending.

use tracing::{debug, error, info, warn};

use super::{DepositWatcher, PayoutOutcome, PayoutRecord, PhaseReport, WatcherError};
use crate::common::logging::log_payout_event;
use crate::derivation::derive_deposit_address;
use crate::storage::{DepositFilter, StorageError};
use crate::types::{Deposit, DepositStatus, PayoutStatus, ReceiptStatus, TxHash};

impl DepositWatcher {
    // =========================================================================
    // Recovery
    // =========================================================================

    /// Settle claimed payouts left behind by an earlier attempt
    ///
    /// Returns the phase report and the ids of stale claims with no recorded
    /// transaction, which need an operator.
    pub(super) async fn recover_in_flight(&self) -> (PhaseReport, Vec<String>) {
        let filter = DepositFilter::deposit(DepositStatus::Confirmed)
            .with_payout(PayoutStatus::Pending)
            .with_claimed(true);
        let in_flight = match self.store.list(filter).await {
            Ok(deposits) => deposits,
            Err(e) => {
                error!("Recovery: failed to list in-flight payouts: {}", e);
                return (PhaseReport::aborted(e), Vec::new());
            }
        };

        let mut report = PhaseReport::default();
        let mut stale = Vec::new();
        let now = self.clock.now();
        let timeout = self.config.claim_timeout.as_secs();

        for deposit in &in_flight {
            report.processed += 1;
            let age = now.saturating_sub(deposit.claimed_at.unwrap_or(now));
            let expired = age >= timeout;

            match deposit.payout_tx_hash {
                Some(hash) => match self.recover_payout(deposit, hash, age, expired).await {
                    Ok(true) => report.advanced += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(deposit_id = %deposit.id, tx_hash = %hash, "Recovery failed: {}", e);
                        report.record_failure(&deposit.id, e);
                    }
                },
                None if expired => {
                    warn!(
                        deposit_id = %deposit.id,
                        claimed_by = deposit.claimed_by.as_deref().unwrap_or(""),
                        age_secs = age,
                        "Stale payout claim with no recorded transaction, manual review required"
                    );
                    stale.push(deposit.id.clone());
                }
                None => {}
            }
        }

        (report, stale)
    }

    async fn recover_payout(
        &self,
        deposit: &Deposit,
        hash: TxHash,
        age: u64,
        expired: bool,
    ) -> Result<bool, WatcherError> {
        match self.payout_reader.transaction_receipt(&hash).await? {
            Some(status) => {
                info!(deposit_id = %deposit.id, tx_hash = %hash, ?status, "Recovered in-flight payout");
                self.settle(deposit, hash, status).await?;
                Ok(true)
            }
            None if expired => {
                let message = format!(
                    "no receipt for payout {} after {}s, manual follow-up required",
                    hash, age
                );
                self.store
                    .mark_payout_failed(&deposit.id, &message, self.clock.now())
                    .await?;
                error!(deposit_id = %deposit.id, tx_hash = %hash, "{}", message);
                log_payout_event(
                    "payout_unresolved",
                    &deposit.id,
                    deposit.payout_amount.unwrap_or(deposit.deposit_amount),
                    &deposit.destination_address.to_string(),
                    false,
                    Some(&hash.to_string()),
                    Some(&message),
                );
                Ok(true)
            }
            None => {
                debug!(deposit_id = %deposit.id, tx_hash = %hash, "Payout receipt not yet available");
                Ok(false)
            }
        }
    }

    // =========================================================================
    // Payout
    // =========================================================================

    pub(super) async fn process_payouts(&self) -> (PhaseReport, Vec<PayoutRecord>) {
        let filter = DepositFilter::deposit(DepositStatus::Confirmed)
            .with_payout(PayoutStatus::Pending)
            .with_claimed(false);
        let ready = match self.store.list(filter).await {
            Ok(deposits) => deposits,
            Err(e) => {
                error!("Payout: failed to list confirmed deposits: {}", e);
                return (PhaseReport::aborted(e), Vec::new());
            }
        };

        let mut report = PhaseReport::default();
        let mut payouts = Vec::with_capacity(ready.len());

        for deposit in &ready {
            report.processed += 1;
            let outcome = self.process_payout(deposit).await;
            match &outcome {
                PayoutOutcome::Sent(_) => report.advanced += 1,
                PayoutOutcome::Reverted(hash) => {
                    report.record_failure(&deposit.id, WatcherError::PayoutReverted(*hash))
                }
                PayoutOutcome::Failed(message) => report.record_failure(&deposit.id, message),
                _ => {}
            }
            payouts.push(PayoutRecord {
                deposit_id: deposit.id.clone(),
                outcome,
            });
        }

        (report, payouts)
    }

    /// Claim and pay out one confirmed deposit
    pub async fn process_payout(&self, deposit: &Deposit) -> PayoutOutcome {
        match self
            .store
            .claim_deposit_for_processing(&deposit.id, &self.id, self.clock.now())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(deposit_id = %deposit.id, "Payout already claimed elsewhere");
                return PayoutOutcome::AlreadyClaimed;
            }
            Err(e) => {
                warn!(deposit_id = %deposit.id, "Failed to claim payout: {}", e);
                return PayoutOutcome::Failed(e.to_string());
            }
        }

        match self.send_payout(deposit).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                let broadcast = match &e {
                    WatcherError::UnrecordedPayout { hash, .. } => Some(*hash),
                    _ => None,
                };
                match self
                    .store
                    .fail_claimed_payout(
                        &deposit.id,
                        &self.id,
                        broadcast.as_ref(),
                        &message,
                        self.clock.now(),
                    )
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        deposit_id = %deposit.id,
                        "Payout claimed by another watcher, failure not recorded: {}", message
                    ),
                    Err(store_err) => error!(
                        deposit_id = %deposit.id,
                        "Failed to record payout failure ({}): {}", message, store_err
                    ),
                }
                let tx_hash = broadcast.map(|hash| hash.to_string());
                log_payout_event(
                    "payout_failed",
                    &deposit.id,
                    deposit.deposit_amount,
                    &deposit.destination_address.to_string(),
                    false,
                    tx_hash.as_deref(),
                    Some(&message),
                );
                PayoutOutcome::Failed(message)
            }
        }
    }

    /// Balance check, broadcast and hash recording; the claim is held
    async fn send_payout(&self, deposit: &Deposit) -> Result<PayoutOutcome, WatcherError> {
        let key = derive_deposit_address(&self.seed, deposit.index)?;
        if key.address != deposit.deposit_address {
            return Err(WatcherError::Invariant(format!(
                "index {} derives {}, stored deposit address is {}",
                deposit.index, key.address, deposit.deposit_address
            )));
        }

        let need = deposit.deposit_amount;
        let have = self.payout_reader.balance_of(&key.address).await?;
        if have < need {
            self.store
                .release_claim(&deposit.id, &self.id, self.clock.now())
                .await?;
            warn!(
                deposit_id = %deposit.id,
                "Payout deferred: {}",
                WatcherError::InsufficientFunds { need, have }
            );
            return Ok(PayoutOutcome::InsufficientFunds { need, have });
        }

        let hash = self
            .payout_writer
            .send_transfer(&key, &deposit.destination_address, need)
            .await?;
        info!(
            deposit_id = %deposit.id,
            tx_hash = %hash,
            destination = %deposit.destination_address,
            amount = %need,
            "Payout broadcast"
        );

        let recorded = self
            .store
            .record_payout_hash(&deposit.id, &self.id, &hash, need, self.clock.now())
            .await;
        let reason = match recorded {
            Ok(true) => None,
            Ok(false) => Some("claim no longer held".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = reason {
            error!(
                deposit_id = %deposit.id,
                tx_hash = %hash,
                "Payout broadcast but hash not recorded: {}", reason
            );
            return Err(WatcherError::UnrecordedPayout { hash, reason });
        }

        Ok(self.finalize(deposit, hash).await)
    }

    /// Await the receipt of a recorded payout
    async fn finalize(&self, deposit: &Deposit, hash: TxHash) -> PayoutOutcome {
        let status = match self.payout_writer.wait_for_receipt(&hash).await {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    deposit_id = %deposit.id,
                    tx_hash = %hash,
                    "Receipt unavailable, leaving payout for recovery: {}", e
                );
                return PayoutOutcome::AwaitingReceipt(hash);
            }
        };

        match self.settle(deposit, hash, status).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    deposit_id = %deposit.id,
                    tx_hash = %hash,
                    ?status,
                    "Failed to record payout result, leaving for recovery: {}", e
                );
                PayoutOutcome::AwaitingReceipt(hash)
            }
        }
    }

    /// Move a recorded payout to its terminal status
    async fn settle(
        &self,
        deposit: &Deposit,
        hash: TxHash,
        status: ReceiptStatus,
    ) -> Result<PayoutOutcome, StorageError> {
        let now = self.clock.now();
        let amount = deposit.payout_amount.unwrap_or(deposit.deposit_amount);
        let destination = deposit.destination_address.to_string();
        let tx_hash = hash.to_string();

        match status {
            ReceiptStatus::Success => {
                if !self.store.mark_payout_sent(&deposit.id, now).await? {
                    debug!(deposit_id = %deposit.id, "Payout already settled");
                }
                info!(deposit_id = %deposit.id, tx_hash = %hash, "Payout sent");
                log_payout_event(
                    "payout_sent",
                    &deposit.id,
                    amount,
                    &destination,
                    true,
                    Some(&tx_hash),
                    None,
                );
                Ok(PayoutOutcome::Sent(hash))
            }
            ReceiptStatus::Reverted => {
                let message = WatcherError::PayoutReverted(hash).to_string();
                if !self
                    .store
                    .mark_payout_failed(&deposit.id, &message, now)
                    .await?
                {
                    debug!(deposit_id = %deposit.id, "Payout already settled");
                }
                log_payout_event(
                    "payout_reverted",
                    &deposit.id,
                    amount,
                    &destination,
                    false,
                    Some(&tx_hash),
                    Some(&message),
                );
                Ok(PayoutOutcome::Reverted(hash))
            }
        }
    }
}
