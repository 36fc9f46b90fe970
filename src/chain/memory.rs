//! In-Memory Simulated Chain
//!
//! A single-node EVM chain held in memory for tests and local development.
//! Every transfer is mined into its own block immediately. Failure modes
//! (reverts, broadcast errors, receipts that never arrive) are toggled by the
//! test driving it.

use async_trait::async_trait;
use primitive_types::U256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{ChainError, ChainReader, ChainResult, ChainWriter};
use crate::derivation::DepositKey;
use crate::types::{keccak256, Address, Block, ChainTransaction, ReceiptStatus, TxHash};

/// Sender used for transfers injected with [`MemoryChain::transfer_to`]
pub const EXTERNAL_SENDER: Address = Address::from_bytes([0xee; 20]);

/// A transfer broadcast through `ChainWriter::send_transfer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransfer {
    pub hash: TxHash,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

#[derive(Default)]
struct ChainState {
    /// Block `n` lives at index `n`
    blocks: Vec<Block>,
    balances: HashMap<Address, U256>,
    receipts: HashMap<TxHash, ReceiptStatus>,
    /// Mined but not yet visible through receipt queries
    withheld_receipts: HashMap<TxHash, ReceiptStatus>,
    sent: Vec<SentTransfer>,
    tx_counter: u64,

    revert_sends: bool,
    send_failure: Option<String>,
    withhold_receipts: bool,
}

impl ChainState {
    fn next_hash(&mut self) -> TxHash {
        self.tx_counter += 1;
        TxHash::from_bytes(keccak256(self.tx_counter.to_be_bytes()))
    }

    fn mine(&mut self, transactions: Vec<ChainTransaction>) -> u64 {
        let number = self.blocks.len() as u64;
        self.blocks.push(Block {
            number,
            transactions,
        });
        number
    }

    fn height(&self) -> u64 {
        self.blocks.len().saturating_sub(1) as u64
    }
}

/// In-memory chain implementing both `ChainReader` and `ChainWriter`
#[derive(Clone)]
pub struct MemoryChain {
    state: Arc<RwLock<ChainState>>,
}

impl MemoryChain {
    /// Create a chain holding only an empty genesis block
    pub fn new() -> Self {
        let mut state = ChainState::default();
        state.mine(Vec::new());
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Latest block number
    pub async fn height(&self) -> u64 {
        self.state.read().await.height()
    }

    /// Mine `count` empty blocks; returns the new height
    pub async fn mine_empty(&self, count: u64) -> u64 {
        let mut state = self.state.write().await;
        for _ in 0..count {
            state.mine(Vec::new());
        }
        state.height()
    }

    /// Mine a block with a transfer of `value` from an external account to `to`
    ///
    /// Returns the transaction hash and its block number.
    pub async fn transfer_to(&self, to: Address, value: U256) -> (TxHash, u64) {
        let mut state = self.state.write().await;
        let hash = state.next_hash();
        *state.balances.entry(to).or_default() += value;
        state.receipts.insert(hash, ReceiptStatus::Success);
        let block = state.mine(vec![ChainTransaction {
            hash,
            from: EXTERNAL_SENDER,
            to: Some(to),
            value,
        }]);
        (hash, block)
    }

    /// Mine a block with arbitrary transactions; balances are not touched
    pub async fn mine_block(&self, transactions: Vec<ChainTransaction>) -> u64 {
        self.state.write().await.mine(transactions)
    }

    pub async fn set_balance(&self, address: Address, balance: U256) {
        self.state.write().await.balances.insert(address, balance);
    }

    pub async fn balance(&self, address: &Address) -> U256 {
        self.state
            .read()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    /// Make subsequent transfers mine with a reverted receipt
    pub async fn set_revert_sends(&self, revert: bool) {
        self.state.write().await.revert_sends = revert;
    }

    /// Make subsequent broadcasts fail with an RPC error
    pub async fn set_send_failure(&self, message: Option<&str>) {
        self.state.write().await.send_failure = message.map(str::to_string);
    }

    /// Hide receipts of subsequent transfers; `wait_for_receipt` times out
    pub async fn set_withhold_receipts(&self, withhold: bool) {
        self.state.write().await.withhold_receipts = withhold;
    }

    /// Publish every withheld receipt
    pub async fn release_receipts(&self) {
        let mut state = self.state.write().await;
        let withheld: Vec<_> = state.withheld_receipts.drain().collect();
        state.receipts.extend(withheld);
    }

    /// Transfers broadcast so far, oldest first
    pub async fn sent_transfers(&self) -> Vec<SentTransfer> {
        self.state.read().await.sent.clone()
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainReader for MemoryChain {
    async fn current_height(&self) -> ChainResult<u64> {
        Ok(self.height().await)
    }

    async fn balance_of(&self, address: &Address) -> ChainResult<U256> {
        Ok(self.balance(address).await)
    }

    async fn block_with_transactions(&self, height: u64) -> ChainResult<Block> {
        self.state
            .read()
            .await
            .blocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("block {}", height)))
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> ChainResult<Option<ReceiptStatus>> {
        Ok(self.state.read().await.receipts.get(hash).copied())
    }
}

#[async_trait]
impl ChainWriter for MemoryChain {
    async fn send_transfer(
        &self,
        key: &DepositKey,
        to: &Address,
        amount: U256,
    ) -> ChainResult<TxHash> {
        let mut state = self.state.write().await;

        if let Some(message) = state.send_failure.clone() {
            return Err(ChainError::Rpc {
                code: -32000,
                message,
            });
        }

        let from = key.address;
        let available = state.balances.get(&from).copied().unwrap_or_default();
        if available < amount {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "insufficient funds for transfer".to_string(),
            });
        }

        let hash = state.next_hash();
        let status = if state.revert_sends {
            ReceiptStatus::Reverted
        } else {
            *state.balances.entry(from).or_default() -= amount;
            *state.balances.entry(*to).or_default() += amount;
            ReceiptStatus::Success
        };

        if state.withhold_receipts {
            state.withheld_receipts.insert(hash, status);
        } else {
            state.receipts.insert(hash, status);
        }

        state.sent.push(SentTransfer {
            hash,
            from,
            to: *to,
            amount,
        });
        state.mine(vec![ChainTransaction {
            hash,
            from,
            to: Some(*to),
            value: amount,
        }]);

        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> ChainResult<ReceiptStatus> {
        let state = self.state.read().await;
        match state.receipts.get(hash) {
            Some(status) => Ok(*status),
            None if state.withheld_receipts.contains_key(hash) => {
                Err(ChainError::Timeout(format!("receipt for {}", hash)))
            }
            None => Err(ChainError::NotFound(format!("transaction {}", hash))),
        }
    }
}
