//! JSON-RPC Chain Client
//!
//! Minimal EVM node client over HTTP. Serves as `ChainReader` for the source
//! chain and as both `ChainReader` and `ChainWriter` for the payout chain.

use async_trait::async_trait;
use primitive_types::U256;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::traits::{ChainError, ChainReader, ChainResult, ChainWriter};
use super::tx::LegacyTransaction;
use crate::derivation::DepositKey;
use crate::types::{
    parse_hex_quantity, to_hex_quantity, Address, Block, ChainTransaction, ReceiptStatus, TxHash,
};

/// Default per-request timeout
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on waiting for a receipt
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(180);

/// JSON-RPC HTTP client
#[derive(Debug)]
pub struct JsonRpcClient {
    client: Client,
    url: String,
    /// EIP-155 chain id used when signing
    chain_id: Option<u64>,
    receipt_timeout: Duration,
    receipt_poll_interval: Duration,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Create a new client with a per-request timeout
    pub fn new(url: &str, rpc_timeout: Duration) -> ChainResult<Self> {
        let client = Client::builder().timeout(rpc_timeout).build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            chain_id: None,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            receipt_poll_interval: Duration::from_secs(2),
            next_id: AtomicU64::new(1),
        })
    }

    /// Enable transaction signing for this chain id
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC call and return the raw `result`
    async fn call_raw(&self, method: &str, params: Value) -> ChainResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::Timeout(method.to_string())
                } else {
                    ChainError::Http(e)
                }
            })?;

        let envelope: RpcEnvelope = resp.json().await?;
        if let Some(err) = envelope.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResult<T> {
        let result = self.call_raw(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| ChainError::Parse(format!("{}: {}", method, e)))
    }

    async fn call_quantity(&self, method: &str, params: Value) -> ChainResult<U256> {
        let raw: String = self.call(method, params).await?;
        parse_hex_quantity(&raw)
            .ok_or_else(|| ChainError::Parse(format!("{}: bad quantity {}", method, raw)))
    }

    /// Chain id reported by the node (`eth_chainId`)
    pub async fn remote_chain_id(&self) -> ChainResult<u64> {
        let id = self.call_quantity("eth_chainId", json!([])).await?;
        quantity_to_u64(id, "eth_chainId")
    }

    async fn gas_price(&self) -> ChainResult<U256> {
        self.call_quantity("eth_gasPrice", json!([])).await
    }

    async fn pending_nonce(&self, address: &Address) -> ChainResult<u64> {
        let nonce = self
            .call_quantity(
                "eth_getTransactionCount",
                json!([address.to_lower_hex(), "pending"]),
            )
            .await?;
        quantity_to_u64(nonce, "eth_getTransactionCount")
    }

    async fn poll_receipt(&self, hash: &TxHash) -> ChainResult<ReceiptStatus> {
        loop {
            if let Some(status) = self.transaction_receipt(hash).await? {
                return Ok(status);
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

#[async_trait]
impl ChainReader for JsonRpcClient {
    async fn current_height(&self) -> ChainResult<u64> {
        let height = self.call_quantity("eth_blockNumber", json!([])).await?;
        quantity_to_u64(height, "eth_blockNumber")
    }

    async fn balance_of(&self, address: &Address) -> ChainResult<U256> {
        self.call_quantity("eth_getBalance", json!([address.to_lower_hex(), "latest"]))
            .await
    }

    async fn block_with_transactions(&self, height: u64) -> ChainResult<Block> {
        let block: Option<RpcBlock> = self
            .call(
                "eth_getBlockByNumber",
                json!([to_hex_quantity(U256::from(height)), true]),
            )
            .await?;

        block
            .ok_or_else(|| ChainError::NotFound(format!("block {}", height)))?
            .into_block()
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> ChainResult<Option<ReceiptStatus>> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;

        receipt.map(|r| r.status()).transpose()
    }
}

#[async_trait]
impl ChainWriter for JsonRpcClient {
    async fn send_transfer(
        &self,
        key: &DepositKey,
        to: &Address,
        amount: U256,
    ) -> ChainResult<TxHash> {
        let chain_id = self
            .chain_id
            .ok_or_else(|| ChainError::Signing("client has no chain id configured".to_string()))?;

        let nonce = self.pending_nonce(&key.address).await?;
        let gas_price = self.gas_price().await?;

        let tx = LegacyTransaction::transfer(nonce, gas_price, *to, amount, chain_id);
        let signed = tx.sign(key.signing_key())?;

        tracing::debug!(
            from = %key.address,
            to = %to,
            nonce,
            gas_price = %gas_price,
            tx_hash = %signed.hash,
            "Broadcasting transfer"
        );

        let returned: String = self
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(&signed.raw))]),
            )
            .await?;

        let node_hash: TxHash = returned
            .parse()
            .map_err(|e| ChainError::Parse(format!("eth_sendRawTransaction: {}", e)))?;
        if node_hash != signed.hash {
            tracing::warn!(local = %signed.hash, node = %node_hash, "Node returned a different tx hash");
        }

        Ok(node_hash)
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> ChainResult<ReceiptStatus> {
        tokio::time::timeout(self.receipt_timeout, self.poll_receipt(hash))
            .await
            .map_err(|_| ChainError::Timeout(format!("receipt for {}", hash)))?
    }
}

fn quantity_to_u64(value: U256, what: &str) -> ChainResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(ChainError::Parse(format!("{}: value exceeds u64", what)));
    }
    Ok(value.low_u64())
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    hash: TxHash,
    from: Address,
    to: Option<Address>,
    value: String,
}

impl RpcBlock {
    fn into_block(self) -> ChainResult<Block> {
        let number = parse_hex_quantity(&self.number)
            .ok_or_else(|| ChainError::Parse(format!("bad block number {}", self.number)))
            .and_then(|n| quantity_to_u64(n, "block number"))?;

        let transactions = self
            .transactions
            .into_iter()
            .map(|tx| {
                let value = parse_hex_quantity(&tx.value)
                    .ok_or_else(|| ChainError::Parse(format!("bad value {}", tx.value)))?;
                Ok(ChainTransaction {
                    hash: tx.hash,
                    from: tx.from,
                    to: tx.to,
                    value,
                })
            })
            .collect::<ChainResult<Vec<_>>>()?;

        Ok(Block {
            number,
            transactions,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RpcReceipt {
    status: Option<String>,
}

impl RpcReceipt {
    fn status(&self) -> ChainResult<ReceiptStatus> {
        match self.status.as_deref() {
            Some("0x1") => Ok(ReceiptStatus::Success),
            Some("0x0") => Ok(ReceiptStatus::Reverted),
            other => Err(ChainError::Parse(format!("unexpected receipt status {:?}", other))),
        }
    }
}
