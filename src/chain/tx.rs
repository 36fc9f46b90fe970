//! Legacy (EIP-155) Transaction Encoding and Signing
//!
//! A replay-protected legacy transaction signed with the deposit's secp256k1
//! key. RLP framing comes from `alloy-rlp`.

use alloy_rlp::{BufMut, Encodable, Header};
use k256::ecdsa::SigningKey;
use primitive_types::U256;

use super::traits::ChainError;
use crate::types::{keccak256, Address, TxHash};

/// Gas used by a plain native transfer
pub const TRANSFER_GAS: u64 = 21_000;

// =============================================================================
// RLP
// =============================================================================

/// 256-bit integer as an RLP scalar (big-endian, no leading zeros)
struct RlpUint(U256);

impl RlpUint {
    fn be_bytes(&self) -> Vec<u8> {
        let mut buf = [0u8; 32];
        self.0.to_big_endian(&mut buf);
        let start = buf.iter().position(|b| *b != 0).unwrap_or(buf.len());
        buf[start..].to_vec()
    }
}

impl Encodable for RlpUint {
    fn encode(&self, out: &mut dyn BufMut) {
        self.be_bytes().as_slice().encode(out)
    }

    fn length(&self) -> usize {
        self.be_bytes().as_slice().length()
    }
}

/// RLP list of heterogeneous items
fn encode_list(items: &[&dyn Encodable]) -> Vec<u8> {
    let payload_length: usize = items.iter().map(|item| item.length()).sum();
    let mut out = Vec::with_capacity(payload_length + 9);
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for item in items {
        item.encode(&mut out);
    }
    out
}

// =============================================================================
// Legacy transaction
// =============================================================================

/// A legacy transaction with EIP-155 replay protection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub chain_id: u64,
}

/// A signed, broadcastable transaction
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// RLP bytes for `eth_sendRawTransaction`
    pub raw: Vec<u8>,
    pub hash: TxHash,
    pub v: u64,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl LegacyTransaction {
    /// Native transfer with the standard gas limit
    pub fn transfer(nonce: u64, gas_price: U256, to: Address, value: U256, chain_id: u64) -> Self {
        Self {
            nonce,
            gas_price,
            gas_limit: TRANSFER_GAS,
            to,
            value,
            chain_id,
        }
    }

    /// Six transaction fields followed by `tail`, as one RLP list
    fn encode_with(&self, tail: [&dyn Encodable; 3]) -> Vec<u8> {
        let gas_price = RlpUint(self.gas_price);
        let value = RlpUint(self.value);
        // empty calldata
        let calldata: &[u8] = &[];
        encode_list(&[
            &self.nonce,
            &gas_price,
            &self.gas_limit,
            self.to.as_bytes(),
            &value,
            &calldata,
            tail[0],
            tail[1],
            tail[2],
        ])
    }

    /// RLP payload that gets hashed for signing: fields || chain_id, 0, 0
    pub fn signing_payload(&self) -> Vec<u8> {
        self.encode_with([&self.chain_id, &0u64, &0u64])
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(self.signing_payload())
    }

    /// Sign with `key`; `v = recovery_id + 2 * chain_id + 35`
    pub fn sign(&self, key: &SigningKey) -> Result<SignedTransaction, ChainError> {
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&self.signing_hash())
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&signature.r().to_bytes());
        s.copy_from_slice(&signature.s().to_bytes());
        let v = recovery_id.to_byte() as u64 + self.chain_id * 2 + 35;

        let sig_r = RlpUint(U256::from_big_endian(&r));
        let sig_s = RlpUint(U256::from_big_endian(&s));
        let raw = self.encode_with([&v, &sig_r, &sig_s]);

        Ok(SignedTransaction {
            hash: TxHash::from_bytes(keccak256(&raw)),
            raw,
            v,
            r,
            s,
        })
    }
}
