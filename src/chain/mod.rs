//! Chain Access Module
//!
//! Read/write abstractions over the source and payout chains, a JSON-RPC
//! implementation, and an in-memory simulated chain.

pub mod memory;
pub mod rpc;
pub mod traits;
pub mod tx;

pub use memory::{MemoryChain, SentTransfer, EXTERNAL_SENDER};
pub use rpc::JsonRpcClient;
pub use traits::{ChainError, ChainReader, ChainResult, ChainWriter};
pub use tx::{LegacyTransaction, SignedTransaction};

#[cfg(test)]
pub use traits::{MockChainReader, MockChainWriter};
