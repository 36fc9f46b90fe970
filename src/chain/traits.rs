//! Chain Access Trait Definitions
//!
//! Narrow read and write interfaces over an EVM chain. Implementations:
//! - `JsonRpcClient` - HTTP JSON-RPC node (production)
//! - `MemoryChain` - simulated chain for tests

use async_trait::async_trait;
use primitive_types::U256;
use thiserror::Error;

use crate::derivation::DepositKey;
use crate::types::{Address, Block, ReceiptStatus, TxHash};

/// Chain access errors
///
/// All variants are treated as transient by the watcher: the deposit is left
/// in place and retried on the next tick.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

/// Result type for chain operations
pub type ChainResult<T> = Result<T, ChainError>;

/// Read-only chain access
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest block number
    async fn current_height(&self) -> ChainResult<u64>;

    /// Native balance of an address at the latest block
    async fn balance_of(&self, address: &Address) -> ChainResult<U256>;

    /// Block at `height` including full transactions
    async fn block_with_transactions(&self, height: u64) -> ChainResult<Block>;

    /// Receipt status if the transaction is mined, `None` otherwise
    async fn transaction_receipt(&self, hash: &TxHash) -> ChainResult<Option<ReceiptStatus>>;
}

/// Chain writes signed by a derived deposit key
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Broadcast a native transfer of `amount` from `key` to `to`
    async fn send_transfer(&self, key: &DepositKey, to: &Address, amount: U256)
        -> ChainResult<TxHash>;

    /// Block until the transaction is mined (bounded by the implementation's timeout)
    async fn wait_for_receipt(&self, hash: &TxHash) -> ChainResult<ReceiptStatus>;
}
