//! Shared Types Module
//!
//! Data types shared across the bridge.

pub mod deposit;
pub mod evm;
pub mod units;

// Re-exports for convenience
pub use deposit::{
    unix_now, BridgeStats, CreateDepositRequest, CreateDepositResponse, Deposit, DepositLeg,
    DepositStatus, DepositStatusResponse, PayoutLeg, PayoutStatus, VerifyQuery, VerifyResponse,
};
pub use evm::{keccak256, Address, Block, ChainTransaction, HexParseError, ReceiptStatus, TxHash};
pub use units::{format_ether, parse_hex_quantity, parse_wei, to_hex_quantity};
