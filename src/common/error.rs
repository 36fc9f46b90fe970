//! Common Error Types for the Bridge
//!
//! Provides unified error handling across all modules.

use thiserror::Error;

use crate::chain::ChainError;
use crate::derivation::DerivationError;
use crate::service::ServiceError;
use crate::storage::StorageError;
use crate::watcher::WatcherError;

/// Root error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Address or key derivation errors
    #[error("derivation error: {0}")]
    Derivation(#[from] DerivationError),

    /// RPC / chain access errors
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Deposit lifecycle errors
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// Inbound service errors
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Chain(_) | BridgeError::Io(_) => true,
            BridgeError::Storage(e) => !matches!(
                e,
                StorageError::Duplicate(_) | StorageError::InvalidData(_)
            ),
            BridgeError::Watcher(e) => e.is_retryable(),
            BridgeError::Service(ServiceError::Chain(_) | ServiceError::Storage(_)) => true,
            _ => false,
        }
    }

    /// Get error code for API responses and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Logging(_) => "LOGGING_ERROR",
            BridgeError::Derivation(DerivationError::Validation(_)) => "VALIDATION_ERROR",
            BridgeError::Derivation(DerivationError::Derivation(_)) => "DERIVATION_ERROR",
            BridgeError::Chain(_) => "CHAIN_ERROR",
            BridgeError::Storage(_) => "STORAGE_ERROR",
            BridgeError::Watcher(WatcherError::InsufficientFunds { .. }) => "INSUFFICIENT_FUNDS",
            BridgeError::Watcher(WatcherError::PayoutReverted(_)) => "PAYOUT_REVERTED",
            BridgeError::Watcher(_) => "WATCHER_ERROR",
            BridgeError::Service(e) => e.error_code(),
            BridgeError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
