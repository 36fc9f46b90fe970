//! Deposit Types
//!
//! A deposit moves through two independent status tracks:
//! deposit side: waiting → confirming → confirmed
//! payout side:  pending → sent | failed
//!
//! A confirmed deposit is "claimed" while `claimed_by` is set; at most one
//! watcher holds the claim at a time.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use super::evm::{Address, TxHash};
use super::units::{u256_dec, u256_dec_opt};

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Status of the incoming payment on the source chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Waiting for the exact payment to appear
    Waiting,
    /// Payment found, accumulating confirmations
    Confirming,
    /// Enough confirmations, eligible for payout
    Confirmed,
    /// Reserved; the watcher phases never produce it
    Failed,
}

impl Default for DepositStatus {
    fn default() -> Self {
        Self::Waiting
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Confirming => "confirming",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "confirming" => Ok(Self::Confirming),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown deposit status: {}", s)),
        }
    }
}

/// Status of the outgoing transfer on the payout chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Sent,
    Failed,
}

impl Default for PayoutStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown payout status: {}", s)),
        }
    }
}

/// A deposit record tracking one bridge transfer end to end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Unique deposit ID
    pub id: String,
    /// Derived receiving address on the source chain
    pub deposit_address: Address,
    /// Payout recipient on the payout chain
    pub destination_address: Address,
    /// Address-level child index of the HD path
    pub index: u32,
    /// Caller-supplied nonce, part of the index preimage
    pub nonce: u64,
    pub deposit_status: DepositStatus,
    pub payout_status: PayoutStatus,
    /// Exact expected transfer in wei
    #[serde(with = "u256_dec")]
    pub deposit_amount: U256,

    // Source chain payment
    pub deposit_tx_hash: Option<TxHash>,
    pub deposit_block_number: Option<u64>,
    /// Source chain height when the deposit was created (scan lower bound)
    pub deposit_created_block_number: Option<u64>,

    // Payout chain transfer
    pub payout_tx_hash: Option<TxHash>,
    #[serde(with = "u256_dec_opt")]
    pub payout_amount: Option<U256>,
    pub payout_error: Option<String>,

    /// Watcher instance currently holding the payout claim
    pub claimed_by: Option<String>,
    /// Unix seconds the claim was taken
    pub claimed_at: Option<u64>,

    pub created_at: u64,
    pub updated_at: u64,
}

impl Deposit {
    /// Create a new deposit in `waiting`/`pending`
    pub fn new(
        deposit_address: Address,
        destination_address: Address,
        index: u32,
        nonce: u64,
        deposit_amount: U256,
        created_block: Option<u64>,
    ) -> Self {
        let now = unix_now();
        let id = format!("dep_{}_{:08x}", now, rand::random::<u32>());

        Self {
            id,
            deposit_address,
            destination_address,
            index,
            nonce,
            deposit_status: DepositStatus::Waiting,
            payout_status: PayoutStatus::Pending,
            deposit_amount,
            deposit_tx_hash: None,
            deposit_block_number: None,
            deposit_created_block_number: created_block,
            payout_tx_hash: None,
            payout_amount: None,
            payout_error: None,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a watcher currently holds the payout claim
    pub fn is_claimed(&self) -> bool {
        self.claimed_by.is_some()
    }

    /// Eligible for a fresh payout attempt
    pub fn awaiting_payout(&self) -> bool {
        self.deposit_status == DepositStatus::Confirmed
            && self.payout_status == PayoutStatus::Pending
            && !self.is_claimed()
    }

    /// Confirmations on top of the deposit block at `current_height`
    pub fn confirmations_at(&self, current_height: u64) -> Option<u64> {
        self.deposit_block_number
            .map(|block| current_height.saturating_sub(block))
    }
}

// =============================================================================
// API Request/Response Types
// =============================================================================

/// POST /api/v1/deposit-address
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDepositRequest {
    pub destination_address: String,
    /// Wei amount, decimal string or JSON number
    pub amount: serde_json::Value,
    /// Optional nonce, non-negative integer or decimal string
    #[serde(default)]
    pub nonce: Option<serde_json::Value>,
}

/// Response to POST /api/v1/deposit-address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDepositResponse {
    pub index: u32,
    pub nonce: u64,
    pub deposit_address: Address,
    pub destination_address: Address,
}

/// Source-chain half of a status response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositLeg {
    pub status: DepositStatus,
    #[serde(with = "u256_dec")]
    pub amount: U256,
    pub tx_hash: Option<TxHash>,
    pub block_number: Option<u64>,
}

/// Payout-chain half of a status response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutLeg {
    pub status: PayoutStatus,
    pub tx_hash: Option<TxHash>,
    #[serde(with = "u256_dec_opt")]
    pub amount: Option<U256>,
    pub error: Option<String>,
}

/// GET /api/v1/deposits/:deposit_address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositStatusResponse {
    pub deposit: DepositLeg,
    pub payout: PayoutLeg,
}

impl From<&Deposit> for DepositStatusResponse {
    fn from(record: &Deposit) -> Self {
        Self {
            deposit: DepositLeg {
                status: record.deposit_status,
                amount: record.deposit_amount,
                tx_hash: record.deposit_tx_hash,
                block_number: record.deposit_block_number,
            },
            payout: PayoutLeg {
                status: record.payout_status,
                tx_hash: record.payout_tx_hash,
                amount: record.payout_amount,
                error: record.payout_error.clone(),
            },
        }
    }
}

/// GET /api/v1/verify query string
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    pub deposit_address: String,
    pub destination_address: String,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Response to GET /api/v1/verify
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    pub index: Option<u32>,
}

/// Bridge statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeStats {
    pub total_deposits: u64,
    pub waiting: u64,
    pub confirming: u64,
    pub confirmed: u64,
    pub payout_pending: u64,
    pub payout_sent: u64,
    pub payout_failed: u64,
    #[serde(with = "u256_dec")]
    pub total_paid_out_wei: U256,
}

impl std::fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Deposits: {} total | {} waiting | {} confirming | {} confirmed | payouts: {} pending, {} sent, {} failed",
            self.total_deposits,
            self.waiting,
            self.confirming,
            self.confirmed,
            self.payout_pending,
            self.payout_sent,
            self.payout_failed
        )
    }
}
