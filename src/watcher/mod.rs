//! Deposit Watcher
//!
//! Drives deposits through their lifecycle:
//! waiting → confirming → confirmed, then pays out on the payout chain.
//!
//! # Flow:
//! 1. Detection: scan recent source-chain blocks for an exact-amount transfer
//!    to each waiting deposit address
//! 2. Confirmation: advance once the transfer is buried deep enough
//! 3. Recovery: resolve payouts left in flight by a crashed or timed-out attempt
//! 4. Payout: claim, check funds, send, record the hash, await the receipt
//!
//! Each phase reads its work from the store, so any number of watcher processes
//! may share one database; the atomic claim keeps payouts exclusive.

pub mod clock;
mod payout;
pub mod report;

#[cfg(test)]
mod test_support;

use primitive_types::U256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chain::{ChainError, ChainReader, ChainWriter};
use crate::common::logging::log_deposit_event;
use crate::derivation::{BridgeSeed, DerivationError};
use crate::storage::{DepositFilter, DepositStore, StorageError};
use crate::types::{Deposit, DepositStatus, TxHash};

pub use clock::{Clock, ManualClock, SystemClock};
pub use report::{DepositFailure, PayoutOutcome, PayoutRecord, PhaseReport, TickReport};

/// Watcher errors
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("derivation error: {0}")]
    Derivation(#[from] DerivationError),

    #[error("insufficient funds: need {need} wei, have {have} wei")]
    InsufficientFunds { need: U256, have: U256 },

    #[error("transaction reverted: {0}")]
    PayoutReverted(TxHash),

    /// The transfer went out but its hash could not be persisted
    #[error("payout {hash} broadcast but not recorded: {reason}")]
    UnrecordedPayout { hash: TxHash, reason: String },

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl WatcherError {
    /// Whether a later tick may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        match self {
            WatcherError::Chain(_) | WatcherError::InsufficientFunds { .. } => true,
            WatcherError::Storage(e) => !matches!(
                e,
                StorageError::Duplicate(_) | StorageError::InvalidData(_)
            ),
            _ => false,
        }
    }
}

/// Watcher tuning
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Blocks on top of the deposit block before it counts as confirmed
    pub required_confirmations: u64,
    /// Sleep between ticks
    pub poll_interval: Duration,
    /// Blocks scanned below the height recorded at deposit creation
    pub safety_margin_blocks: u64,
    /// Scan depth when no creation height is known
    pub fallback_window_blocks: u64,
    /// Age after which an in-flight claim needs attention
    pub claim_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            required_confirmations: 7,
            poll_interval: Duration::from_millis(10_000),
            safety_margin_blocks: 10,
            fallback_window_blocks: 1_000,
            claim_timeout: Duration::from_secs(600),
        }
    }
}

/// Lowest block the detection scan visits for a deposit
pub fn scan_floor(created_block: Option<u64>, current: u64, config: &WatcherConfig) -> u64 {
    let fallback = current.saturating_sub(config.fallback_window_blocks);
    let floor = match created_block {
        Some(created) => created
            .saturating_sub(config.safety_margin_blocks)
            .max(fallback),
        None => fallback,
    };
    floor.min(current)
}

/// Deposit lifecycle driver
pub struct DepositWatcher {
    id: String,
    store: Arc<dyn DepositStore>,
    source: Arc<dyn ChainReader>,
    payout_reader: Arc<dyn ChainReader>,
    payout_writer: Arc<dyn ChainWriter>,
    seed: BridgeSeed,
    config: WatcherConfig,
    clock: Arc<dyn Clock>,
}

impl DepositWatcher {
    /// Create a watcher with a fresh instance id
    pub fn new(
        store: Arc<dyn DepositStore>,
        source: Arc<dyn ChainReader>,
        payout_reader: Arc<dyn ChainReader>,
        payout_writer: Arc<dyn ChainWriter>,
        seed: BridgeSeed,
        config: WatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id: format!("watcher-{}", Uuid::new_v4()),
            store,
            source,
            payout_reader,
            payout_writer,
            seed,
            config,
            clock,
        }
    }

    /// Override the instance id used as claimant
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Run the watcher forever
    pub async fn run(&self) {
        info!(
            watcher_id = %self.id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            required_confirmations = self.config.required_confirmations,
            "Deposit watcher started"
        );

        loop {
            let report = self.tick().await;
            if report.is_clean() {
                debug!(watcher_id = %self.id, "Tick complete: {}", report);
            } else {
                warn!(watcher_id = %self.id, "Tick complete with problems: {}", report);
            }
            self.clock.sleep(self.config.poll_interval).await;
        }
    }

    /// Run every phase once
    pub async fn tick(&self) -> TickReport {
        let detection = self.detect_deposits().await;
        let confirmation = self.confirm_deposits().await;
        let (recovery, stale_claims) = self.recover_in_flight().await;
        let (payout, payouts) = self.process_payouts().await;

        TickReport {
            detection,
            confirmation,
            recovery,
            payout,
            payouts,
            stale_claims,
        }
    }

    // =========================================================================
    // Detection
    // =========================================================================

    async fn detect_deposits(&self) -> PhaseReport {
        let waiting = match self
            .store
            .list(DepositFilter::deposit(DepositStatus::Waiting))
            .await
        {
            Ok(deposits) => deposits,
            Err(e) => {
                error!("Detection: failed to list waiting deposits: {}", e);
                return PhaseReport::aborted(e);
            }
        };
        if waiting.is_empty() {
            return PhaseReport::default();
        }

        let current = match self.source.current_height().await {
            Ok(height) => height,
            Err(e) => {
                error!("Detection: failed to read source height: {}", e);
                return PhaseReport::aborted(e);
            }
        };

        let mut report = PhaseReport::default();
        for deposit in &waiting {
            report.processed += 1;
            match self.detect_deposit(deposit, current).await {
                Ok(true) => report.advanced += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(deposit_id = %deposit.id, "Detection failed: {}", e);
                    report.record_failure(&deposit.id, e);
                }
            }
        }
        report
    }

    /// Scan backward from `current` for the funding transfer
    async fn detect_deposit(&self, deposit: &Deposit, current: u64) -> Result<bool, WatcherError> {
        let balance = self.source.balance_of(&deposit.deposit_address).await?;
        if balance.is_zero() {
            return Ok(false);
        }

        let floor = scan_floor(deposit.deposit_created_block_number, current, &self.config);
        let mut height = current;
        loop {
            let block = self.source.block_with_transactions(height).await?;
            for tx in block.transfers_to(&deposit.deposit_address) {
                if tx.value != deposit.deposit_amount {
                    warn!(
                        deposit_id = %deposit.id,
                        block = block.number,
                        tx_hash = %tx.hash,
                        expected = %deposit.deposit_amount,
                        received = %tx.value,
                        "Ignoring transfer with unexpected amount"
                    );
                    continue;
                }

                let applied = self
                    .store
                    .mark_confirming(&deposit.id, &tx.hash, block.number, self.clock.now())
                    .await?;
                if applied {
                    info!(
                        deposit_id = %deposit.id,
                        block = block.number,
                        tx_hash = %tx.hash,
                        "Deposit detected"
                    );
                    log_deposit_event("deposit_detected", &deposit.id, tx.value, true, None);
                }
                return Ok(applied);
            }

            if height <= floor {
                break;
            }
            height -= 1;
        }

        debug!(
            deposit_id = %deposit.id,
            floor,
            current,
            "Balance present but no matching transfer in scan window"
        );
        Ok(false)
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    async fn confirm_deposits(&self) -> PhaseReport {
        let confirming = match self
            .store
            .list(DepositFilter::deposit(DepositStatus::Confirming))
            .await
        {
            Ok(deposits) => deposits,
            Err(e) => {
                error!("Confirmation: failed to list confirming deposits: {}", e);
                return PhaseReport::aborted(e);
            }
        };
        if confirming.is_empty() {
            return PhaseReport::default();
        }

        let current = match self.source.current_height().await {
            Ok(height) => height,
            Err(e) => {
                error!("Confirmation: failed to read source height: {}", e);
                return PhaseReport::aborted(e);
            }
        };

        let mut report = PhaseReport::default();
        for deposit in &confirming {
            report.processed += 1;
            match self.confirm_deposit(deposit, current).await {
                Ok(true) => report.advanced += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(deposit_id = %deposit.id, "Confirmation failed: {}", e);
                    report.record_failure(&deposit.id, e);
                }
            }
        }
        report
    }

    async fn confirm_deposit(&self, deposit: &Deposit, current: u64) -> Result<bool, WatcherError> {
        let confirmations = deposit.confirmations_at(current).ok_or_else(|| {
            WatcherError::Invariant(format!(
                "deposit {} is confirming without a block number",
                deposit.id
            ))
        })?;

        if confirmations < self.config.required_confirmations {
            debug!(
                deposit_id = %deposit.id,
                confirmations,
                required = self.config.required_confirmations,
                "Waiting for confirmations"
            );
            return Ok(false);
        }

        let applied = self
            .store
            .mark_confirmed(&deposit.id, self.clock.now())
            .await?;
        if applied {
            info!(deposit_id = %deposit.id, confirmations, "Deposit confirmed");
            log_deposit_event(
                "deposit_confirmed",
                &deposit.id,
                deposit.deposit_amount,
                true,
                None,
            );
        }
        Ok(applied)
    }
}
