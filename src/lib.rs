//! HD Bridge Backend
//!
//! Bridges a native asset from a source EVM chain to a payout EVM chain using
//! per-deposit addresses derived from one HD wallet.
//!
//! ## Components
//!
//! 1. **Address derivation** - BIP-32/44 deposit addresses keyed by
//!    (destination, nonce), verifiable from the xpub alone
//! 2. **Deposit service** - Issues addresses and answers status queries
//! 3. **Deposit watcher** - Detects, confirms and pays out deposits
//!
//! ## Storage
//!
//! SQLite in production, in-memory for tests. Several watchers may share one
//! database; payouts are made exclusive by an atomic claim.

pub mod api;
pub mod chain;
pub mod common;
pub mod derivation;
pub mod service;
pub mod storage;
pub mod types;
pub mod watcher;

// Re-exports: configuration and errors
pub use common::{BridgeConfig, BridgeError, ConfigError};

// Re-exports: derivation
pub use derivation::{
    calculate_index, derive_address_from_xpub, derive_deposit_address,
    derive_public_extended_key, verify_deposit_address, BridgeSeed, DepositKey, DerivationError,
};

// Re-exports: chain access
pub use chain::{ChainError, ChainReader, ChainWriter, JsonRpcClient, MemoryChain};

// Re-exports: storage
pub use storage::{DepositStore, MemoryDepositStore, SqliteDepositStore, StorageError};

// Re-exports: service and watcher
pub use service::{DepositService, ServiceError};
pub use watcher::{DepositWatcher, TickReport, WatcherConfig, WatcherError};

// Re-exports: core types
pub use types::{Address, Deposit, DepositStatus, PayoutStatus, TxHash};
