//! Deposit Service
//!
//! Inbound operations behind the HTTP API: issuing deposit addresses, status
//! lookups, client-side address verification, statistics and the admin payout
//! retry. The watcher owns every other state transition.

use primitive_types::U256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::{ChainError, ChainReader};
use crate::common::logging::log_deposit_event;
use crate::derivation::{
    self, calculate_index, derive_deposit_address, parse_address, parse_nonce, BridgeSeed,
    DerivationError,
};
use crate::storage::{DepositStore, StorageError};
use crate::types::{
    parse_wei, unix_now, BridgeStats, CreateDepositRequest, CreateDepositResponse, Deposit,
    DepositStatusResponse, PayoutStatus, VerifyQuery, VerifyResponse,
};

/// Deposit service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("duplicate deposit: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("derivation error: {0}")]
    Derivation(String),
}

impl ServiceError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::Duplicate(_) => "DUPLICATE_DEPOSIT",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Chain(_) => "CHAIN_ERROR",
            ServiceError::Storage(_) => "STORAGE_ERROR",
            ServiceError::Derivation(_) => "DERIVATION_ERROR",
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Duplicate(msg) => ServiceError::Duplicate(msg),
            StorageError::NotFound(msg) => ServiceError::NotFound(msg),
            other => ServiceError::Storage(other),
        }
    }
}

impl From<DerivationError> for ServiceError {
    fn from(e: DerivationError) -> Self {
        match e {
            DerivationError::Validation(msg) => ServiceError::Validation(msg),
            DerivationError::Derivation(msg) => ServiceError::Derivation(msg),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Message returned when a (destination, nonce) pair is reused
const DUPLICATE_PAIR: &str =
    "this combination of destination address and nonce already exists, use a different nonce";

/// Inbound deposit operations
pub struct DepositService {
    store: Arc<dyn DepositStore>,
    source: Arc<dyn ChainReader>,
    seed: BridgeSeed,
    xpub: String,
}

impl DepositService {
    pub fn new(
        store: Arc<dyn DepositStore>,
        source: Arc<dyn ChainReader>,
        seed: BridgeSeed,
        xpub: String,
    ) -> Self {
        Self {
            store,
            source,
            seed,
            xpub,
        }
    }

    /// Issue the deposit address for a destination/nonce pair
    ///
    /// The nonce defaults to 0. The source-chain height is recorded to bound
    /// the detection scan; if it cannot be read the deposit is still created.
    pub async fn create_deposit(
        &self,
        req: &CreateDepositRequest,
    ) -> ServiceResult<CreateDepositResponse> {
        let destination = parse_address(req.destination_address.trim())?;
        let nonce = nonce_from_json(req.nonce.as_ref())?;
        let amount = amount_from_json(&req.amount)?;

        if self
            .store
            .get_by_destination(&destination, nonce)
            .await?
            .is_some()
        {
            return Err(ServiceError::Duplicate(DUPLICATE_PAIR.to_string()));
        }

        let index = calculate_index(&destination, nonce);
        let key = derive_deposit_address(&self.seed, index)?;
        if self.store.get_by_address(&key.address).await?.is_some() {
            return Err(ServiceError::Duplicate(address_collision(index)));
        }

        let created_block = match self.source.current_height().await {
            Ok(height) => Some(height),
            Err(e) => {
                warn!(
                    destination = %destination,
                    nonce,
                    "Could not read source height, detection will use the fallback window: {}", e
                );
                None
            }
        };

        let deposit = Deposit::new(key.address, destination, index, nonce, amount, created_block);
        if let Err(e) = self.store.insert(&deposit).await {
            return Err(match e {
                // Lost a race with a concurrent request
                StorageError::Duplicate(_) => {
                    let same_pair = self
                        .store
                        .get_by_destination(&destination, nonce)
                        .await?
                        .is_some();
                    if same_pair {
                        ServiceError::Duplicate(DUPLICATE_PAIR.to_string())
                    } else {
                        ServiceError::Duplicate(address_collision(index))
                    }
                }
                other => other.into(),
            });
        }

        info!(
            deposit_id = %deposit.id,
            deposit_address = %deposit.deposit_address,
            destination = %destination,
            index,
            nonce,
            "Deposit address issued"
        );
        log_deposit_event("deposit_created", &deposit.id, amount, true, None);

        Ok(CreateDepositResponse {
            index,
            nonce,
            deposit_address: deposit.deposit_address,
            destination_address: destination,
        })
    }

    /// Status of the deposit issued at `deposit_address`
    pub async fn get_deposit_status(
        &self,
        deposit_address: &str,
    ) -> ServiceResult<DepositStatusResponse> {
        let address = parse_address(deposit_address.trim())?;
        let deposit = self
            .store
            .get_by_address(&address)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("deposit {}", address)))?;

        Ok(DepositStatusResponse::from(&deposit))
    }

    /// Recompute a deposit address from the public key only
    pub fn verify_deposit_address(&self, query: &VerifyQuery) -> ServiceResult<VerifyResponse> {
        let nonce = match query.nonce.as_deref() {
            Some(nonce) => parse_nonce(nonce)?,
            None => 0,
        };

        let valid = derivation::verify_deposit_address(
            &self.xpub,
            &query.destination_address,
            nonce,
            &query.deposit_address,
        );
        let index = parse_address(query.destination_address.trim())
            .ok()
            .map(|destination| calculate_index(&destination, nonce));

        Ok(VerifyResponse { valid, index })
    }

    /// Account-level extended public key handed to clients
    pub fn xpub(&self) -> &str {
        &self.xpub
    }

    pub async fn stats(&self) -> ServiceResult<BridgeStats> {
        let by_status = self.store.count_by_status().await?;
        let by_payout = self.store.count_by_payout_status().await?;
        let count = |map: &std::collections::HashMap<String, u64>, key: &str| {
            map.get(key).copied().unwrap_or(0)
        };

        Ok(BridgeStats {
            total_deposits: by_status.values().sum(),
            waiting: count(&by_status, "waiting"),
            confirming: count(&by_status, "confirming"),
            confirmed: count(&by_status, "confirmed"),
            payout_pending: count(&by_payout, "pending"),
            payout_sent: count(&by_payout, "sent"),
            payout_failed: count(&by_payout, "failed"),
            total_paid_out_wei: self.store.total_paid_out().await?,
        })
    }

    /// Admin: put a failed payout back in the queue
    ///
    /// Refused once a payout transaction was recorded, since that transfer may
    /// still land.
    pub async fn retry_payout(&self, id: &str) -> ServiceResult<Deposit> {
        let deposit = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("deposit {}", id)))?;

        if deposit.payout_status != PayoutStatus::Failed {
            return Err(ServiceError::Validation(format!(
                "payout is {}, only failed payouts can be retried",
                deposit.payout_status
            )));
        }
        if let Some(hash) = deposit.payout_tx_hash {
            return Err(ServiceError::Validation(format!(
                "payout transaction {} was broadcast, resolve it manually",
                hash
            )));
        }

        if !self.store.reset_payout(id, unix_now()).await? {
            return Err(ServiceError::Validation(format!(
                "deposit {} is not eligible for retry",
                id
            )));
        }
        info!(deposit_id = %id, previous_error = ?deposit.payout_error, "Payout reset for retry");

        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("deposit {}", id)))
    }
}

fn address_collision(index: u32) -> String {
    format!(
        "derivation index {} is already assigned to another destination/nonce pair, use a different nonce",
        index
    )
}

fn nonce_from_json(value: Option<&serde_json::Value>) -> ServiceResult<u64> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| ServiceError::Validation(format!("invalid nonce: {}", n))),
        Some(serde_json::Value::String(s)) => Ok(parse_nonce(s)?),
        Some(other) => Err(ServiceError::Validation(format!("invalid nonce: {}", other))),
    }
}

/// Wei amount from a JSON number or decimal string; must be positive
fn amount_from_json(value: &serde_json::Value) -> ServiceResult<U256> {
    let amount = match value {
        serde_json::Value::Number(n) => n.as_u64().map(U256::from),
        serde_json::Value::String(s) => parse_wei(s.trim()),
        _ => None,
    }
    .ok_or_else(|| ServiceError::Validation(format!("invalid amount: {}", value)))?;

    if amount.is_zero() {
        return Err(ServiceError::Validation("amount must be positive".to_string()));
    }
    Ok(amount)
}
