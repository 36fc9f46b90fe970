//! Tick Reports
//!
//! Per-deposit errors never abort a tick; they are collected here instead.

use primitive_types::U256;
use std::fmt;

use crate::types::TxHash;

/// A deposit that could not be processed in a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositFailure {
    pub deposit_id: String,
    pub error: String,
}

/// Outcome of one phase over all eligible deposits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    /// Deposits examined
    pub processed: usize,
    /// Deposits whose state moved forward
    pub advanced: usize,
    pub failures: Vec<DepositFailure>,
    /// Set when the phase could not start (e.g. the store was unreachable)
    pub error: Option<String>,
}

impl PhaseReport {
    pub(crate) fn record_failure(&mut self, deposit_id: &str, error: impl fmt::Display) {
        self.failures.push(DepositFailure {
            deposit_id: deposit_id.to_string(),
            error: error.to_string(),
        });
    }

    pub(crate) fn aborted(error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.error.is_none()
    }
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} advanced, {} failed",
            self.advanced,
            self.processed,
            self.failures.len()
        )?;
        if let Some(error) = &self.error {
            write!(f, " (aborted: {})", error)?;
        }
        Ok(())
    }
}

/// Result of a single payout attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutOutcome {
    /// Transfer mined successfully
    Sent(TxHash),
    /// Transfer mined but reverted; payout marked failed
    Reverted(TxHash),
    /// Payout wallet short; claim released for a later tick
    InsufficientFunds { need: U256, have: U256 },
    /// Another watcher holds or finished the payout
    AlreadyClaimed,
    /// Broadcast and recorded but the receipt is not yet known; left to recovery
    AwaitingReceipt(TxHash),
    /// Nothing was recorded on chain; payout marked failed
    Failed(String),
}

/// Payout outcome for one deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRecord {
    pub deposit_id: String,
    pub outcome: PayoutOutcome,
}

/// Everything one watcher tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub detection: PhaseReport,
    pub confirmation: PhaseReport,
    pub recovery: PhaseReport,
    pub payout: PhaseReport,
    pub payouts: Vec<PayoutRecord>,
    /// Claimed deposits with no payout hash whose claim has timed out
    pub stale_claims: Vec<String>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.detection.is_clean()
            && self.confirmation.is_clean()
            && self.recovery.is_clean()
            && self.payout.is_clean()
            && self.stale_claims.is_empty()
    }

    /// Outcome recorded for `deposit_id` in this tick, if any
    pub fn payout_outcome(&self, deposit_id: &str) -> Option<&PayoutOutcome> {
        self.payouts
            .iter()
            .find(|record| record.deposit_id == deposit_id)
            .map(|record| &record.outcome)
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "detect: {}; confirm: {}; recover: {}; payout: {}",
            self.detection, self.confirmation, self.recovery, self.payout
        )?;
        if !self.stale_claims.is_empty() {
            write!(f, "; stale claims: {}", self.stale_claims.len())?;
        }
        Ok(())
    }
}
